use crate::model::{BookingId, VenueId, WeekdayParseError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Venue,
    Booking,
    Series,
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Entity::Venue => "venue",
            Entity::Booking => "booking",
            Entity::Series => "series",
        })
    }
}

/// Which write failed. Picks the caller-facing message; details stay in the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageFailure {
    CreateBooking,
    CreateSeries,
    UpdateBooking,
    DeleteBooking,
    DeleteSeries,
    SaveVenue,
    DeleteVenue,
    Compact,
}

/// Error taxonomy, coarse enough for callers to branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    NotFound,
    ConcurrentModification,
    Forbidden,
    Storage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulingError {
    Validation(String),
    SlotTaken(BookingId),
    /// `with` is `None` when two occurrences of the new series collide with each other.
    SeriesConflict {
        occurrence: usize,
        with: Option<BookingId>,
    },
    VenueInUse(VenueId),
    NotFound(Entity, i64),
    ConcurrentModification(Entity, i64),
    Forbidden,
    Storage(StorageFailure),
}

impl SchedulingError {
    pub fn validation(msg: impl Into<String>) -> Self {
        SchedulingError::Validation(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SchedulingError::Validation(_) => ErrorKind::Validation,
            SchedulingError::SlotTaken(_)
            | SchedulingError::SeriesConflict { .. }
            | SchedulingError::VenueInUse(_) => ErrorKind::Conflict,
            SchedulingError::NotFound(..) => ErrorKind::NotFound,
            SchedulingError::ConcurrentModification(..) => ErrorKind::ConcurrentModification,
            SchedulingError::Forbidden => ErrorKind::Forbidden,
            SchedulingError::Storage(_) => ErrorKind::Storage,
        }
    }
}

impl std::fmt::Display for SchedulingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulingError::Validation(msg) => f.write_str(msg),
            SchedulingError::SlotTaken(_) => f.write_str("The selected time-slot is already taken."),
            SchedulingError::SeriesConflict { .. } => {
                f.write_str("One or more occurrences overlap existing bookings. No changes saved.")
            }
            SchedulingError::VenueInUse(id) => {
                write!(f, "Venue {id} still has bookings and cannot be deleted.")
            }
            SchedulingError::NotFound(entity, id) => write!(f, "{entity} {id} not found"),
            SchedulingError::ConcurrentModification(entity, _) => write!(
                f,
                "This {entity} was modified by another user. Please reload and try again."
            ),
            SchedulingError::Forbidden => f.write_str("Admin role required."),
            SchedulingError::Storage(failure) => f.write_str(match failure {
                StorageFailure::CreateBooking => "Unable to create booking.",
                StorageFailure::CreateSeries => "Failed to create recurring bookings.",
                StorageFailure::UpdateBooking => "Unable to update booking.",
                StorageFailure::DeleteBooking => "Unable to delete booking.",
                StorageFailure::DeleteSeries => "Unable to delete booking series.",
                StorageFailure::SaveVenue => "Unable to save venue.",
                StorageFailure::DeleteVenue => "Unable to delete venue.",
                StorageFailure::Compact => "Unable to compact the booking log.",
            }),
        }
    }
}

impl std::error::Error for SchedulingError {}

impl From<WeekdayParseError> for SchedulingError {
    fn from(e: WeekdayParseError) -> Self {
        SchedulingError::Validation(format!("malformed weekday set: {e}"))
    }
}
