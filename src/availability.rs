//! Date-range overlap checks for candidate bookings.
//!
//! Comparison is date-only and closed on both ends: two ranges that merely
//! touch on a boundary day count as conflicting. Every existing booking of the
//! item participates regardless of its status; whether rejected or returned
//! bookings should be excluded is an unresolved product question, so callers
//! pass the full list.

use crate::model::DateRange;

/// Closed-interval overlap test on date precision:
/// `a.from <= b.till && a.till >= b.from`.
pub fn overlaps(a: &DateRange, b: &DateRange) -> bool {
    a.from.date() <= b.till.date() && a.till.date() >= b.from.date()
}

/// True when the candidate range conflicts with none of the existing ranges.
pub fn is_available(existing: &[DateRange], candidate: &DateRange) -> bool {
    !existing.iter().any(|range| overlaps(range, candidate))
}
