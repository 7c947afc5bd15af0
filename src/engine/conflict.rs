use tracing::debug;

use crate::model::*;

/// Why a set of candidate spans cannot be booked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conflict {
    /// Candidate `index` overlaps the stored booking `with`.
    Existing { index: usize, with: BookingId },
    /// Candidates `index` and `other` overlap each other.
    Internal { index: usize, other: usize },
}

/// Check every candidate against the venue's stored bookings and against each other.
///
/// Stored bookings are fetched once for the bounding range of all candidates.
/// `exclude` is the booking being updated; it never conflicts with itself.
/// Overlap is half-open: touching endpoints are fine.
pub fn find_conflict(
    vs: &VenueState,
    candidates: &[Span],
    exclude: Option<BookingId>,
) -> Option<Conflict> {
    let bounds = Span::bounding(candidates)?;
    let existing: Vec<&BookingRecord> = vs
        .overlapping(&bounds)
        .filter(|b| Some(b.id) != exclude)
        .collect();

    for (index, candidate) in candidates.iter().enumerate() {
        // `existing` is sorted by start; nothing at or past `right` can reach this candidate.
        let right = existing.partition_point(|b| b.span.start < candidate.end);
        if let Some(hit) = existing[..right].iter().find(|b| b.span.end > candidate.start) {
            debug!(
                "venue {}: candidate {index} [{}, {}) overlaps booking {}",
                vs.venue.id, candidate.start, candidate.end, hit.id
            );
            return Some(Conflict::Existing { index, with: hit.id });
        }
    }

    // Sorted by start, any overlap shows up between neighbours.
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by_key(|&i| (candidates[i].start, i));
    for pair in order.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if candidates[a].overlaps(&candidates[b]) {
            debug!("venue {}: candidates {a} and {b} overlap", vs.venue.id);
            return Some(Conflict::Internal {
                index: a.max(b),
                other: a.min(b),
            });
        }
    }
    None
}

pub fn conflicts(vs: &VenueState, candidates: &[Span], exclude: Option<BookingId>) -> bool {
    find_conflict(vs, candidates, exclude).is_some()
}
