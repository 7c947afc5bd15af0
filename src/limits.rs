use crate::model::Ms;

pub const MAX_TITLE_LEN: usize = 80;
pub const MAX_DESCRIPTION_LEN: usize = 400;

pub const MAX_VENUE_NAME_LEN: usize = 60;
pub const MAX_VENUE_LOCATION_LEN: usize = 200;
pub const MIN_VENUE_CAPACITY: u32 = 1;
pub const MAX_VENUE_CAPACITY: u32 = 500;

/// Recurrence step, in units of the series frequency.
pub const MAX_INTERVAL: u32 = 365;
pub const MAX_COUNT: u32 = 1000;

/// Hard cap on occurrences materialized for one series (Until-terminated rules included).
pub const MAX_OCCURRENCES_PER_SERIES: usize = 5000;

/// Consecutive week windows without a selectable day before weekly expansion gives up.
pub const MAX_EMPTY_WINDOWS: u32 = 2;

/// 0001-01-01T00:00:00Z. Instants before the Unix epoch are ordinary negative values.
pub const MIN_VALID_TIMESTAMP_MS: Ms = -62_135_596_800_000;
/// 9999-12-31T23:59:59.999Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_799_999;
