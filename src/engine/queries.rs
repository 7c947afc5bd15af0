use chrono::NaiveDate;

use crate::model::*;
use crate::observability::timed;

use super::{Engine, SchedulingError};

fn sort_views(views: &mut [BookingView]) {
    views.sort_by_key(|v| (v.start, v.id));
}

impl Engine {
    /// Bookings ordered by start, then id.
    ///
    /// `date` keeps bookings whose start falls on that UTC day. A booking that
    /// started the evening before and runs past midnight is not included.
    pub async fn list_bookings(
        &self,
        venue_id: Option<VenueId>,
        date: Option<NaiveDate>,
    ) -> Vec<BookingView> {
        let result = timed("list_bookings", async {
            let window = date.map(day_window);
            let venue_ids = match venue_id {
                Some(id) => vec![id],
                None => self.store().venue_ids(),
            };

            let mut out = Vec::new();
            for vid in venue_ids {
                let Some(rs) = self.store().get_venue(vid) else {
                    continue;
                };
                let guard = rs.read().await;
                let name = guard.venue.name.as_str();
                out.extend(
                    guard
                        .bookings
                        .iter()
                        .filter(|b| match window {
                            Some((lo, hi)) => lo <= b.span.start && b.span.start <= hi,
                            None => true,
                        })
                        .map(|b| BookingView::new(b, name)),
                );
            }
            sort_views(&mut out);
            Ok::<_, SchedulingError>(out)
        })
        .await;
        result.unwrap_or_default()
    }

    pub async fn get_booking(&self, id: BookingId) -> Option<BookingView> {
        loop {
            let vid = self.store().venue_for_booking(id)?;
            let rs = self.store().get_venue(vid)?;
            let guard = rs.read().await;
            if let Some(b) = guard.get_booking(id) {
                return Some(BookingView::new(b, &guard.venue.name));
            }
            // Gone, or moved to another venue while we waited
            if self.store().venue_for_booking(id) == Some(vid) {
                return None;
            }
        }
    }

    pub fn get_series(&self, id: SeriesId) -> Option<SeriesInfo> {
        let series = self.store().get_series(id)?;
        let occurrence_count = self.store().series_booking_ids(id).len();
        Some(SeriesInfo {
            series,
            occurrence_count,
        })
    }

    /// Remaining occurrences of a series, ordered by start.
    pub async fn series_occurrences(&self, id: SeriesId) -> Vec<BookingView> {
        let mut out = Vec::new();
        for bid in self.store().series_booking_ids(id) {
            if let Some(view) = self.get_booking(bid).await {
                out.push(view);
            }
        }
        sort_views(&mut out);
        out
    }

    pub async fn get_venue(&self, id: VenueId) -> Option<VenueRecord> {
        let rs = self.store().get_venue(id)?;
        let guard = rs.read().await;
        Some(guard.venue.clone())
    }

    /// All venues, ordered by name (ties by id).
    pub async fn list_venues(&self) -> Vec<VenueRecord> {
        let mut venues = Vec::new();
        for id in self.store().venue_ids() {
            if let Some(venue) = self.get_venue(id).await {
                venues.push(venue);
            }
        }
        venues.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        venues
    }
}
