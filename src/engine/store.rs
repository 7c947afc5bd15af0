use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::model::*;

use super::conflict::{Conflict, find_conflict};
use super::SharedVenueState;

/// In-memory tables rebuilt from the WAL. Bookings live inside their venue's
/// state; everything else here is an index over them.
pub struct Store {
    venues: DashMap<VenueId, SharedVenueState>,
    booking_to_venue: DashMap<BookingId, VenueId>,
    series: DashMap<SeriesId, SeriesRecord>,
    /// Series → occurrence ids, for cascade delete.
    series_bookings: DashMap<SeriesId, Vec<BookingId>>,
    next_venue_id: AtomicI64,
    next_booking_id: AtomicI64,
    next_series_id: AtomicI64,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            venues: DashMap::new(),
            booking_to_venue: DashMap::new(),
            series: DashMap::new(),
            series_bookings: DashMap::new(),
            next_venue_id: AtomicI64::new(1),
            next_booking_id: AtomicI64::new(1),
            next_series_id: AtomicI64::new(1),
        }
    }

    // ── Sequences ────────────────────────────────────────────

    pub fn allocate_venue_id(&self) -> VenueId {
        self.next_venue_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn allocate_booking_id(&self) -> BookingId {
        self.next_booking_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn allocate_series_id(&self) -> SeriesId {
        self.next_series_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Keep sequences ahead of ids seen during replay.
    fn observe_ids(&self, event: &Event) {
        let bump = |seq: &AtomicI64, id: i64| {
            seq.fetch_max(id + 1, Ordering::Relaxed);
        };
        match event {
            Event::VenueCreated { venue } => bump(&self.next_venue_id, venue.id),
            Event::BookingCreated { booking } | Event::BookingUpdated { booking, .. } => {
                bump(&self.next_booking_id, booking.id)
            }
            Event::SeriesCreated { series, occurrences } => {
                bump(&self.next_series_id, series.id);
                for o in occurrences {
                    bump(&self.next_booking_id, o.id);
                }
            }
            Event::SequencesObserved {
                venue,
                booking,
                series,
            } => {
                bump(&self.next_venue_id, *venue);
                bump(&self.next_booking_id, *booking);
                bump(&self.next_series_id, *series);
            }
            _ => {}
        }
    }

    // ── Venues ───────────────────────────────────────────────

    pub fn venue_count(&self) -> usize {
        self.venues.len()
    }

    pub fn contains_venue(&self, id: VenueId) -> bool {
        self.venues.contains_key(&id)
    }

    pub fn get_venue(&self, id: VenueId) -> Option<SharedVenueState> {
        self.venues.get(&id).map(|e| e.value().clone())
    }

    pub fn venue_ids(&self) -> Vec<VenueId> {
        let mut ids: Vec<VenueId> = self.venues.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    // ── Bookings & series ────────────────────────────────────

    pub fn booking_count(&self) -> usize {
        self.booking_to_venue.len()
    }

    pub fn venue_for_booking(&self, id: BookingId) -> Option<VenueId> {
        self.booking_to_venue.get(&id).map(|e| *e.value())
    }

    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    pub fn get_series(&self, id: SeriesId) -> Option<SeriesRecord> {
        self.series.get(&id).map(|e| e.value().clone())
    }

    pub fn series_booking_ids(&self, id: SeriesId) -> Vec<BookingId> {
        self.series_bookings
            .get(&id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub fn venue_has_series(&self, venue_id: VenueId) -> bool {
        self.series.iter().any(|s| s.value().venue_id == venue_id)
    }

    /// Row constraints enforced right before commit: `start < end`, unique
    /// `(venue, start, end)`, and no overlap with another stored booking.
    /// `rows` must all belong to `vs`; `replacing` is the row being rewritten.
    pub fn check_row_constraints(
        &self,
        vs: &VenueState,
        rows: &[BookingRecord],
        replacing: Option<BookingId>,
    ) -> Result<(), &'static str> {
        for row in rows {
            if row.span.start >= row.span.end {
                return Err("check constraint: start < end");
            }
            if row.venue_id != vs.venue.id {
                return Err("row written to the wrong venue");
            }
            if vs
                .bookings
                .iter()
                .any(|b| b.span == row.span && Some(b.id) != replacing)
            {
                return Err("unique constraint: (venue, start, end)");
            }
        }
        let spans: Vec<Span> = rows.iter().map(|r| r.span).collect();
        match find_conflict(vs, &spans, replacing) {
            None => Ok(()),
            Some(Conflict::Existing { .. }) => Err("exclusion constraint: overlapping booking"),
            Some(Conflict::Internal { .. }) => Err("exclusion constraint: overlapping rows in one write"),
        }
    }

    // ── Event application ────────────────────────────────────

    /// Apply a committed event. `guards` holds every venue the event touches;
    /// venue rows and the series tables are updated at map level.
    pub fn apply_committed(&self, guards: &mut [&mut VenueState], event: &Event) {
        match event {
            Event::VenueCreated { venue } => {
                self.venues
                    .insert(venue.id, Arc::new(RwLock::new(VenueState::new(venue.clone()))));
            }
            Event::VenueDeleted { id } => {
                self.venues.remove(id);
            }
            other => {
                for vs in guards.iter_mut() {
                    self.apply_event(vs, other);
                }
            }
        }
        match event {
            Event::SeriesCreated {
                series,
                occurrences,
            } => {
                self.series_bookings
                    .insert(series.id, occurrences.iter().map(|o| o.id).collect());
                self.series.insert(series.id, series.clone());
            }
            Event::SeriesDeleted { id, .. } => {
                self.series_bookings.remove(id);
                self.series.remove(id);
            }
            _ => {}
        }
        self.observe_ids(event);
    }

    /// Apply the booking-level part of an event to one venue. Events spanning
    /// several venues are applied to each in turn.
    fn apply_event(&self, vs: &mut VenueState, event: &Event) {
        match event {
            Event::VenueUpdated { venue } => {
                vs.venue = venue.clone();
            }
            Event::BookingCreated { booking } => {
                self.booking_to_venue.insert(booking.id, booking.venue_id);
                vs.insert_booking(booking.clone());
            }
            Event::BookingUpdated {
                previous_venue_id,
                booking,
            } => {
                if vs.venue.id == *previous_venue_id {
                    vs.remove_booking(booking.id);
                }
                if vs.venue.id == booking.venue_id {
                    vs.remove_booking(booking.id);
                    vs.insert_booking(booking.clone());
                    self.booking_to_venue.insert(booking.id, booking.venue_id);
                }
            }
            Event::BookingDeleted { id, .. } => {
                if let Some(removed) = vs.remove_booking(*id) {
                    self.booking_to_venue.remove(id);
                    if let Some(sid) = removed.series_id
                        && let Some(mut ids) = self.series_bookings.get_mut(&sid)
                    {
                        ids.retain(|b| b != id);
                    }
                }
            }
            Event::SeriesCreated { occurrences, .. } => {
                let vid = vs.venue.id;
                for o in occurrences.iter().filter(|o| o.venue_id == vid) {
                    self.booking_to_venue.insert(o.id, o.venue_id);
                    vs.insert_booking(o.clone());
                }
            }
            Event::SeriesDeleted { id, .. } => {
                for bid in self.series_booking_ids(*id) {
                    if vs.remove_booking(bid).is_some() {
                        self.booking_to_venue.remove(&bid);
                    }
                }
            }
            Event::VenueCreated { .. }
            | Event::VenueDeleted { .. }
            | Event::SequencesObserved { .. } => {}
        }
    }

    /// Rebuild from replayed events. We are the sole owner of every lock here,
    /// so `try_write` always succeeds.
    pub fn replay(&self, events: &[Event]) {
        for event in events {
            let mut owned = Vec::new();
            for vid in event_venue_ids(event) {
                if let Some(rs) = self.get_venue(vid)
                    && let Ok(guard) = rs.try_write_owned()
                {
                    owned.push(guard);
                }
            }
            let mut guards: Vec<&mut VenueState> = owned.iter_mut().map(|g| &mut **g).collect();
            self.apply_committed(&mut guards, event);
        }
    }
}

/// Venues whose booking lists an event changes, ascending.
pub fn event_venue_ids(event: &Event) -> Vec<VenueId> {
    let mut ids = match event {
        Event::VenueUpdated { venue } => vec![venue.id],
        Event::BookingCreated { booking } => vec![booking.venue_id],
        Event::BookingUpdated {
            previous_venue_id,
            booking,
        } => vec![*previous_venue_id, booking.venue_id],
        Event::BookingDeleted { venue_id, .. } => vec![*venue_id],
        Event::SeriesCreated {
            series,
            occurrences,
        } => std::iter::once(series.venue_id)
            .chain(occurrences.iter().map(|o| o.venue_id))
            .collect(),
        Event::SeriesDeleted { venue_ids, .. } => venue_ids.clone(),
        Event::VenueCreated { .. } | Event::VenueDeleted { .. } | Event::SequencesObserved { .. } => {
            Vec::new()
        }
    };
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// Fold a log into the minimal event list recreating the same state:
/// the id high-water marks, venues, then each series with its surviving
/// occurrences, then standalone bookings.
pub fn compact_events(events: &[Event]) -> Vec<Event> {
    let mut venues: BTreeMap<VenueId, VenueRecord> = BTreeMap::new();
    let mut series: BTreeMap<SeriesId, SeriesRecord> = BTreeMap::new();
    let mut bookings: BTreeMap<BookingId, BookingRecord> = BTreeMap::new();
    let (mut max_venue, mut max_booking, mut max_series) = (0, 0, 0);

    for event in events {
        match event {
            Event::VenueCreated { venue } => {
                max_venue = max_venue.max(venue.id);
                venues.insert(venue.id, venue.clone());
            }
            Event::VenueUpdated { venue } => {
                venues.insert(venue.id, venue.clone());
            }
            Event::VenueDeleted { id } => {
                venues.remove(id);
            }
            Event::BookingCreated { booking } | Event::BookingUpdated { booking, .. } => {
                max_booking = max_booking.max(booking.id);
                bookings.insert(booking.id, booking.clone());
            }
            Event::BookingDeleted { id, .. } => {
                bookings.remove(id);
            }
            Event::SeriesCreated {
                series: s,
                occurrences,
            } => {
                max_series = max_series.max(s.id);
                series.insert(s.id, s.clone());
                for o in occurrences {
                    max_booking = max_booking.max(o.id);
                    bookings.insert(o.id, o.clone());
                }
            }
            Event::SeriesDeleted { id, .. } => {
                series.remove(id);
                bookings.retain(|_, b| b.series_id != Some(*id));
            }
            Event::SequencesObserved {
                venue,
                booking,
                series,
            } => {
                max_venue = max_venue.max(*venue);
                max_booking = max_booking.max(*booking);
                max_series = max_series.max(*series);
            }
        }
    }

    let mut out = Vec::new();
    if max_venue > 0 || max_booking > 0 || max_series > 0 {
        out.push(Event::SequencesObserved {
            venue: max_venue,
            booking: max_booking,
            series: max_series,
        });
    }
    out.extend(venues.into_values().map(|venue| Event::VenueCreated { venue }));
    for s in series.into_values() {
        let occurrences: Vec<BookingRecord> = bookings
            .values()
            .filter(|b| b.series_id == Some(s.id))
            .cloned()
            .collect();
        out.push(Event::SeriesCreated {
            series: s,
            occurrences,
        });
    }
    out.extend(
        bookings
            .into_values()
            .filter(|b| b.series_id.is_none())
            .map(|booking| Event::BookingCreated { booking }),
    );
    out
}
