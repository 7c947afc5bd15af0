use tracing::{error, info, warn};
use ulid::Ulid;

use crate::auth::Admin;
use crate::limits::*;
use crate::model::*;
use crate::observability::{OCCURRENCES_GENERATED, timed};
use crate::recurrence::{RecurrenceRule, occurrences};

use super::conflict::{Conflict, find_conflict};
use super::{Engine, Entity, SchedulingError, StorageFailure};

// ── Validation ───────────────────────────────────────────

fn check_text(field: &str, value: &str, max: usize) -> Result<(), SchedulingError> {
    if value.trim().is_empty() {
        return Err(SchedulingError::validation(format!("{field} is required.")));
    }
    check_optional_text(field, Some(value), max)
}

fn check_optional_text(field: &str, value: Option<&str>, max: usize) -> Result<(), SchedulingError> {
    match value {
        Some(v) if v.chars().count() > max => Err(SchedulingError::validation(format!(
            "{field} must be at most {max} characters."
        ))),
        _ => Ok(()),
    }
}

fn check_booking_text(title: &str, description: Option<&str>) -> Result<(), SchedulingError> {
    check_text("Title", title, MAX_TITLE_LEN)?;
    check_optional_text("Description", description, MAX_DESCRIPTION_LEN)
}

fn check_venue_fields(name: &str, capacity: u32, location: &str) -> Result<(), SchedulingError> {
    check_text("Name", name, MAX_VENUE_NAME_LEN)?;
    check_text("Location", location, MAX_VENUE_LOCATION_LEN)?;
    if !(MIN_VENUE_CAPACITY..=MAX_VENUE_CAPACITY).contains(&capacity) {
        return Err(SchedulingError::validation(format!(
            "Capacity must be between {MIN_VENUE_CAPACITY} and {MAX_VENUE_CAPACITY}."
        )));
    }
    Ok(())
}

fn check_timestamp(t: Ms) -> Result<(), SchedulingError> {
    if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&t) {
        return Err(SchedulingError::validation("Timestamp out of range."));
    }
    Ok(())
}

/// Truncate both bounds to the minute, then require `start < end`.
fn normalize_span(start: Ms, end: Ms) -> Result<Span, SchedulingError> {
    check_timestamp(start)?;
    check_timestamp(end)?;
    Span::try_new(truncate_to_minute(start), truncate_to_minute(end))
        .ok_or_else(|| SchedulingError::validation("Start time must be before end time."))
}

fn termination_of(count: Option<u32>, until: Option<Ms>) -> Result<Termination, SchedulingError> {
    match (count.filter(|c| *c > 0), until) {
        (Some(_), Some(_)) => Err(SchedulingError::validation(
            "Provide either a Count or an Until date, not both.",
        )),
        (None, None) => Err(SchedulingError::validation(
            "Provide either a Count or an Until date for recurrence.",
        )),
        (Some(c), None) if c > MAX_COUNT => Err(SchedulingError::validation(format!(
            "Count must be between 1 and {MAX_COUNT}."
        ))),
        (Some(c), None) => Ok(Termination::Count(c)),
        (None, Some(u)) => {
            check_timestamp(u)?;
            Ok(Termination::Until(u))
        }
    }
}

fn interval_of(raw: i32) -> Result<u32, SchedulingError> {
    let interval = if raw <= 0 { 1 } else { raw as u32 };
    if interval > MAX_INTERVAL {
        return Err(SchedulingError::validation(format!(
            "Interval must be between 1 and {MAX_INTERVAL}."
        )));
    }
    Ok(interval)
}

/// Last-line store check. A failure here means the detector and the store disagree.
fn enforce_rows(
    engine: &Engine,
    vs: &VenueState,
    rows: &[BookingRecord],
    replacing: Option<BookingId>,
    failure: StorageFailure,
) -> Result<(), SchedulingError> {
    engine
        .store()
        .check_row_constraints(vs, rows, replacing)
        .map_err(|violation| {
            error!("venue {}: {violation}", vs.venue.id);
            SchedulingError::Storage(failure)
        })
}

impl Engine {
    // ── Venues ───────────────────────────────────────────

    pub async fn create_venue(&self, admin: &Admin, req: NewVenue) -> Result<VenueId, SchedulingError> {
        timed("create_venue", async {
            check_venue_fields(&req.name, req.capacity, &req.location)?;
            let venue = VenueRecord {
                id: self.store().allocate_venue_id(),
                name: req.name,
                capacity: req.capacity,
                location: req.location,
                version: Ulid::new(),
            };
            let id = venue.id;
            self.commit(Vec::new(), Event::VenueCreated { venue }, StorageFailure::SaveVenue)
                .await?;
            info!("{} created venue {id}", admin.name());
            Ok(id)
        })
        .await
    }

    pub async fn update_venue(
        &self,
        admin: &Admin,
        id: VenueId,
        req: VenueUpdate,
    ) -> Result<(), SchedulingError> {
        timed("update_venue", async {
            check_venue_fields(&req.name, req.capacity, &req.location)?;
            let guard = self.lock_venue(id).await?;
            if guard.venue.version != req.expected_version {
                warn!("venue {id}: stale version from {}", admin.name());
                return Err(SchedulingError::ConcurrentModification(Entity::Venue, id));
            }
            let venue = VenueRecord {
                id,
                name: req.name,
                capacity: req.capacity,
                location: req.location,
                version: Ulid::new(),
            };
            self.commit(vec![guard], Event::VenueUpdated { venue }, StorageFailure::SaveVenue)
                .await?;
            info!("{} updated venue {id}", admin.name());
            Ok(())
        })
        .await
    }

    /// Refused while any booking or series still references the venue.
    pub async fn delete_venue(&self, admin: &Admin, id: VenueId) -> Result<(), SchedulingError> {
        timed("delete_venue", async {
            let guard = self.lock_venue(id).await?;
            if !guard.bookings.is_empty() || self.store().venue_has_series(id) {
                warn!("venue {id}: delete refused, still referenced");
                return Err(SchedulingError::VenueInUse(id));
            }
            self.commit(vec![guard], Event::VenueDeleted { id }, StorageFailure::DeleteVenue)
                .await?;
            info!("{} deleted venue {id}", admin.name());
            Ok(())
        })
        .await
    }

    // ── Bookings ─────────────────────────────────────────

    pub async fn create_booking(&self, admin: &Admin, req: NewBooking) -> Result<BookingId, SchedulingError> {
        timed("create_booking", self.insert_single(admin, req)).await
    }

    async fn insert_single(&self, admin: &Admin, req: NewBooking) -> Result<BookingId, SchedulingError> {
        check_booking_text(&req.title, req.description.as_deref())?;
        let span = normalize_span(req.start, req.end)?;

        let guard = self.lock_venue(req.venue_id).await?;
        if let Some(Conflict::Existing { with, .. }) = find_conflict(&guard, &[span], None) {
            warn!("venue {}: slot [{}, {}) taken by {with}", req.venue_id, span.start, span.end);
            return Err(SchedulingError::SlotTaken(with));
        }

        let booking = BookingRecord {
            id: self.store().allocate_booking_id(),
            venue_id: req.venue_id,
            series_id: None,
            title: req.title,
            description: req.description,
            span,
            version: Ulid::new(),
        };
        let id = booking.id;
        enforce_rows(self, &guard, std::slice::from_ref(&booking), None, StorageFailure::CreateBooking)?;
        self.commit(vec![guard], Event::BookingCreated { booking }, StorageFailure::CreateBooking)
            .await?;
        info!("{} booked {id} in venue {}", admin.name(), req.venue_id);
        Ok(id)
    }

    /// Create a one-off booking or an all-or-nothing recurring series.
    pub async fn create_series(&self, admin: &Admin, req: NewSeries) -> Result<SeriesOutcome, SchedulingError> {
        timed("create_series", async {
            if req.frequency == Frequency::None {
                let single = NewBooking {
                    venue_id: req.venue_id,
                    title: req.title,
                    description: req.description,
                    start: req.start,
                    end: req.end,
                };
                return self.insert_single(admin, single).await.map(SeriesOutcome::Single);
            }

            check_booking_text(&req.title, req.description.as_deref())?;
            let seed = normalize_span(req.start, req.end)?;
            let termination = termination_of(req.count, req.until)?;
            let interval = interval_of(req.interval)?;
            let rule = RecurrenceRule {
                seed,
                frequency: req.frequency,
                interval,
                termination,
                weekdays: req.weekdays,
            };

            // One past the cap tells "exactly at the cap" from "over it".
            let spans: Vec<Span> = occurrences(&rule)
                .with_limit(MAX_OCCURRENCES_PER_SERIES + 1)
                .collect();
            metrics::counter!(OCCURRENCES_GENERATED).increment(spans.len() as u64);
            if spans.len() > MAX_OCCURRENCES_PER_SERIES {
                return Err(SchedulingError::validation(format!(
                    "too many occurrences: a series is limited to {MAX_OCCURRENCES_PER_SERIES}."
                )));
            }
            if spans.is_empty() {
                return Err(SchedulingError::validation(
                    "No occurrences generated. Check Count/Until settings.",
                ));
            }

            let guard = self.lock_venue(req.venue_id).await?;
            if let Some(conflict) = find_conflict(&guard, &spans, None) {
                let (occurrence, with) = match conflict {
                    Conflict::Existing { index, with } => (index, Some(with)),
                    Conflict::Internal { index, .. } => (index, None),
                };
                warn!(
                    "venue {}: series rejected, occurrence {occurrence} conflicts ({with:?})",
                    req.venue_id
                );
                return Err(SchedulingError::SeriesConflict { occurrence, with });
            }

            let series = SeriesRecord {
                id: self.store().allocate_series_id(),
                venue_id: req.venue_id,
                title: req.title,
                description: req.description,
                seed,
                frequency: rule.frequency,
                interval,
                termination,
                weekdays: rule.weekdays,
            };
            let rows: Vec<BookingRecord> = spans
                .iter()
                .map(|span| BookingRecord {
                    id: self.store().allocate_booking_id(),
                    venue_id: series.venue_id,
                    series_id: Some(series.id),
                    title: series.title.clone(),
                    description: series.description.clone(),
                    span: *span,
                    version: Ulid::new(),
                })
                .collect();
            enforce_rows(self, &guard, &rows, None, StorageFailure::CreateSeries)?;

            let id = series.id;
            let ids: Vec<BookingId> = rows.iter().map(|r| r.id).collect();
            let event = Event::SeriesCreated {
                series,
                occurrences: rows,
            };
            self.commit(vec![guard], event, StorageFailure::CreateSeries).await?;
            info!(
                "{} created series {id} with {} occurrences in venue {}",
                admin.name(),
                ids.len(),
                req.venue_id
            );
            Ok(SeriesOutcome::Series { id, occurrences: ids })
        })
        .await
    }

    /// Rewrite the mutable fields of a booking, possibly moving it to another venue.
    pub async fn update_booking(
        &self,
        admin: &Admin,
        id: BookingId,
        req: BookingUpdate,
    ) -> Result<(), SchedulingError> {
        timed("update_booking", async {
            check_booking_text(&req.title, req.description.as_deref())?;
            let span = normalize_span(req.start, req.end)?;

            loop {
                let current = self
                    .store()
                    .venue_for_booking(id)
                    .ok_or(SchedulingError::NotFound(Entity::Booking, id))?;
                let guards = self.lock_venues(&[current, req.venue_id]).await?;
                let (Some(from), Some(to)) = (
                    guards.iter().position(|g| g.venue.id == current),
                    guards.iter().position(|g| g.venue.id == req.venue_id),
                ) else {
                    return Err(SchedulingError::NotFound(Entity::Venue, req.venue_id));
                };
                let Some(existing) = guards[from].get_booking(id).cloned() else {
                    // Moved while we waited for the locks
                    if self.store().venue_for_booking(id) == Some(current) {
                        return Err(SchedulingError::NotFound(Entity::Booking, id));
                    }
                    continue;
                };

                if let Some(expected) = req.expected_version
                    && expected != existing.version
                {
                    warn!("booking {id}: stale version from {}", admin.name());
                    return Err(SchedulingError::ConcurrentModification(Entity::Booking, id));
                }
                if let Some(Conflict::Existing { with, .. }) = find_conflict(&guards[to], &[span], Some(id)) {
                    warn!("booking {id}: move to [{}, {}) overlaps {with}", span.start, span.end);
                    return Err(SchedulingError::SlotTaken(with));
                }

                let booking = BookingRecord {
                    id,
                    venue_id: req.venue_id,
                    series_id: existing.series_id,
                    title: req.title,
                    description: req.description,
                    span,
                    version: Ulid::new(),
                };
                enforce_rows(
                    self,
                    &guards[to],
                    std::slice::from_ref(&booking),
                    Some(id),
                    StorageFailure::UpdateBooking,
                )?;
                let event = Event::BookingUpdated {
                    previous_venue_id: current,
                    booking,
                };
                self.commit(guards, event, StorageFailure::UpdateBooking).await?;
                info!("{} updated booking {id}", admin.name());
                return Ok(());
            }
        })
        .await
    }

    pub async fn delete_booking(&self, admin: &Admin, id: BookingId) -> Result<(), SchedulingError> {
        timed("delete_booking", async {
            loop {
                let venue_id = self
                    .store()
                    .venue_for_booking(id)
                    .ok_or(SchedulingError::NotFound(Entity::Booking, id))?;
                let guard = self.lock_venue(venue_id).await?;
                if guard.get_booking(id).is_none() {
                    if self.store().venue_for_booking(id) == Some(venue_id) {
                        return Err(SchedulingError::NotFound(Entity::Booking, id));
                    }
                    continue;
                }
                self.commit(vec![guard], Event::BookingDeleted { id, venue_id }, StorageFailure::DeleteBooking)
                    .await?;
                info!("{} deleted booking {id}", admin.name());
                return Ok(());
            }
        })
        .await
    }

    /// Remove a series and every remaining occurrence. Returns how many were removed.
    pub async fn delete_series(&self, admin: &Admin, id: SeriesId) -> Result<usize, SchedulingError> {
        timed("delete_series", async {
            loop {
                let series = self
                    .store()
                    .get_series(id)
                    .ok_or(SchedulingError::NotFound(Entity::Series, id))?;
                let venue_ids = self.series_venue_ids(&series);
                let guards = self.lock_venues(&venue_ids).await?;
                if self.store().get_series(id).is_none() {
                    return Err(SchedulingError::NotFound(Entity::Series, id));
                }
                // Occurrences may have moved between venues while we waited.
                if self.series_venue_ids(&series) != venue_ids {
                    continue;
                }

                let removed = self.store().series_booking_ids(id).len();
                let event = Event::SeriesDeleted { id, venue_ids };
                self.commit(guards, event, StorageFailure::DeleteSeries).await?;
                info!("{} deleted series {id} ({removed} occurrences)", admin.name());
                return Ok(removed);
            }
        })
        .await
    }

    /// The series venue plus every venue an occurrence currently sits in, ascending.
    fn series_venue_ids(&self, series: &SeriesRecord) -> Vec<VenueId> {
        let mut ids: Vec<VenueId> = self
            .store()
            .series_booking_ids(series.id)
            .into_iter()
            .filter_map(|bid| self.store().venue_for_booking(bid))
            .chain(std::iter::once(series.venue_id))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}
