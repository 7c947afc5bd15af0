use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

pub type VenueId = i64;
pub type BookingId = i64;
pub type SeriesId = i64;

/// Opaque concurrency token. Replaced on every write of the owning record.
pub type Version = Ulid;

pub const MINUTE_MS: Ms = 60_000;
pub const DAY_MS: Ms = 86_400_000;

/// Drop sub-minute precision.
pub fn truncate_to_minute(t: Ms) -> Ms {
    t.div_euclid(MINUTE_MS) * MINUTE_MS
}

pub fn to_datetime(t: Ms) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(t)
}

/// Inclusive UTC window `[00:00:00.000, 23:59:59.999]` of a calendar date.
pub fn day_window(date: NaiveDate) -> (Ms, Ms) {
    let start = date.and_time(NaiveTime::MIN).and_utc().timestamp_millis();
    (start, start + DAY_MS - 1)
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Checked constructor for caller-supplied bounds.
    pub fn try_new(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Smallest span covering every span in `spans`.
    pub fn bounding<'a>(spans: impl IntoIterator<Item = &'a Span>) -> Option<Span> {
        spans.into_iter().fold(None, |acc: Option<Span>, s| {
            Some(match acc {
                None => *s,
                Some(b) => Span {
                    start: b.start.min(s.start),
                    end: b.end.max(s.end),
                },
            })
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Frequency {
    #[default]
    None,
    Daily,
    Weekly,
    Monthly,
}

/// How a recurring series ends. Exactly one rule binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    /// Total number of occurrences, the first included.
    Count(u32),
    /// Inclusive bound on occurrence start instants.
    Until(Ms),
}

const WEEKDAY_TOKENS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// Ordered set of weekdays, iterated Monday-first.
///
/// Stored as comma-separated three-letter tokens (`"Mon,Wed"`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct WeekdaySet {
    days: [bool; 7],
}

impl WeekdaySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(day: Weekday) -> Self {
        let mut set = Self::new();
        set.insert(day);
        set
    }

    pub fn insert(&mut self, day: Weekday) {
        self.days[day.num_days_from_monday() as usize] = true;
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.days[day.num_days_from_monday() as usize]
    }

    pub fn is_empty(&self) -> bool {
        !self.days.iter().any(|d| *d)
    }

    pub fn len(&self) -> usize {
        self.days.iter().filter(|d| **d).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = Weekday> + '_ {
        self.days
            .iter()
            .enumerate()
            .filter(|(_, on)| **on)
            .filter_map(|(i, _)| Weekday::try_from(i as u8).ok())
    }
}

impl FromIterator<Weekday> for WeekdaySet {
    fn from_iter<I: IntoIterator<Item = Weekday>>(iter: I) -> Self {
        let mut set = Self::new();
        for day in iter {
            set.insert(day);
        }
        set
    }
}

impl fmt::Display for WeekdaySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tokens: Vec<&str> = self
            .iter()
            .map(|d| WEEKDAY_TOKENS[d.num_days_from_monday() as usize])
            .collect();
        f.write_str(&tokens.join(","))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeekdayParseError(pub String);

impl fmt::Display for WeekdayParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown weekday token: {:?}", self.0)
    }
}

impl std::error::Error for WeekdayParseError {}

impl FromStr for WeekdaySet {
    type Err = WeekdayParseError;

    /// Accepts any case and any token starting with a three-letter weekday prefix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut set = Self::new();
        for token in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let lower = token.to_ascii_lowercase();
            let idx = WEEKDAY_TOKENS
                .iter()
                .position(|w| lower.starts_with(&w.to_ascii_lowercase()))
                .ok_or_else(|| WeekdayParseError(token.to_string()))?;
            set.days[idx] = true;
        }
        Ok(set)
    }
}

impl From<WeekdaySet> for String {
    fn from(set: WeekdaySet) -> Self {
        set.to_string()
    }
}

impl TryFrom<String> for WeekdaySet {
    type Error = WeekdayParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

// ── Stored records ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenueRecord {
    pub id: VenueId,
    pub name: String,
    pub capacity: u32,
    pub location: String,
    pub version: Version,
}

/// A concrete reservation. Occurrences of a series carry its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRecord {
    pub id: BookingId,
    pub venue_id: VenueId,
    pub series_id: Option<SeriesId>,
    pub title: String,
    pub description: Option<String>,
    pub span: Span,
    pub version: Version,
}

/// Recurrence rule plus the seed window it was expanded from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesRecord {
    pub id: SeriesId,
    pub venue_id: VenueId,
    pub title: String,
    pub description: Option<String>,
    pub seed: Span,
    pub frequency: Frequency,
    pub interval: u32,
    pub termination: Termination,
    pub weekdays: WeekdaySet,
}

/// Bookings of one venue, sorted by `span.start`.
#[derive(Debug, Clone)]
pub struct VenueState {
    pub venue: VenueRecord,
    pub bookings: Vec<BookingRecord>,
}

impl VenueState {
    pub fn new(venue: VenueRecord) -> Self {
        Self {
            venue,
            bookings: Vec::new(),
        }
    }

    /// Insert booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: BookingRecord) {
        let pos = self
            .bookings
            .partition_point(|b| (b.span.start, b.id) < (booking.span.start, booking.id));
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: BookingId) -> Option<BookingRecord> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn get_booking(&self, id: BookingId) -> Option<&BookingRecord> {
        self.bookings.iter().find(|b| b.id == id)
    }

    /// Return only bookings whose span overlaps the query window.
    /// Uses binary search to skip bookings starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &BookingRecord> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }
}

/// The WAL record format. One event is one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    VenueCreated {
        venue: VenueRecord,
    },
    VenueUpdated {
        venue: VenueRecord,
    },
    VenueDeleted {
        id: VenueId,
    },
    BookingCreated {
        booking: BookingRecord,
    },
    BookingUpdated {
        previous_venue_id: VenueId,
        booking: BookingRecord,
    },
    BookingDeleted {
        id: BookingId,
        venue_id: VenueId,
    },
    SeriesCreated {
        series: SeriesRecord,
        occurrences: Vec<BookingRecord>,
    },
    /// Cascades to every occurrence. `venue_ids` lists each venue holding one,
    /// which differs from the series venue once an occurrence has been moved.
    SeriesDeleted {
        id: SeriesId,
        venue_ids: Vec<VenueId>,
    },
    /// Highest ids ever issued. Written by compaction so deleted ids stay retired.
    SequencesObserved {
        venue: VenueId,
        booking: BookingId,
        series: SeriesId,
    },
}

// ── Requests ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVenue {
    pub name: String,
    pub capacity: u32,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VenueUpdate {
    pub name: String,
    pub capacity: u32,
    pub location: String,
    pub expected_version: Version,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBooking {
    pub venue_id: VenueId,
    pub title: String,
    pub description: Option<String>,
    pub start: Ms,
    pub end: Ms,
}

/// Mutable fields of a booking. Identity and series linkage are not part of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingUpdate {
    pub venue_id: VenueId,
    pub title: String,
    pub description: Option<String>,
    pub start: Ms,
    pub end: Ms,
    /// When set, the write fails unless the stored version still matches.
    pub expected_version: Option<Version>,
}

/// A one-off or recurring booking request, as submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSeries {
    pub venue_id: VenueId,
    pub title: String,
    pub description: Option<String>,
    pub start: Ms,
    pub end: Ms,
    pub frequency: Frequency,
    /// Non-positive values are treated as 1.
    pub interval: i32,
    /// `Some(0)` counts as not provided.
    pub count: Option<u32>,
    pub until: Option<Ms>,
    pub weekdays: WeekdaySet,
}

impl NewSeries {
    /// A non-recurring request for `[start, end)`.
    pub fn once(venue_id: VenueId, title: impl Into<String>, start: Ms, end: Ms) -> Self {
        Self {
            venue_id,
            title: title.into(),
            description: None,
            start,
            end,
            frequency: Frequency::None,
            interval: 1,
            count: None,
            until: None,
            weekdays: WeekdaySet::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeriesOutcome {
    /// `Frequency::None`: a plain booking, no series row.
    Single(BookingId),
    Series {
        id: SeriesId,
        occurrences: Vec<BookingId>,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingView {
    pub id: BookingId,
    pub venue_id: VenueId,
    pub venue_name: String,
    pub series_id: Option<SeriesId>,
    pub title: String,
    pub description: Option<String>,
    pub start: Ms,
    pub end: Ms,
    pub version: Version,
}

impl BookingView {
    pub fn new(booking: &BookingRecord, venue_name: &str) -> Self {
        Self {
            id: booking.id,
            venue_id: booking.venue_id,
            venue_name: venue_name.to_string(),
            series_id: booking.series_id,
            title: booking.title.clone(),
            description: booking.description.clone(),
            start: booking.span.start,
            end: booking.span.end,
            version: booking.version,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeriesInfo {
    pub series: SeriesRecord,
    pub occurrence_count: usize,
}
