use std::ops::Range;

use crate::types::{Margin, Segment};

/// Effective margins for `segment` given the configured `margin`.
///
/// The outer edge of the first and last segment keeps its outputs. At least
/// one position always survives: when both margins together would cover the
/// whole segment, the `length - 1` positions that may be dropped are split
/// between the two sides in proportion to the requested margins.
pub fn mask(segment: &Segment, margin: usize) -> Margin {
    if segment.length == 0 {
        return Margin::default();
    }
    let left = if segment.is_first { 0 } else { margin };
    let right = if segment.is_last { 0 } else { margin };

    let budget = segment.length - 1;
    let requested = left.saturating_add(right);
    if requested <= budget {
        return Margin { left, right };
    }
    // u128 keeps `left * budget` from overflowing for absurd margins.
    let left = (left as u128 * budget as u128 / requested as u128) as usize;
    Margin {
        left,
        right: budget - left,
    }
}

/// Query-level token indices whose outputs from `segment` are kept.
pub fn unmasked_range(segment: &Segment, margin: Margin) -> Range<usize> {
    let start = segment.start_offset + margin.left.min(segment.length);
    let end = segment.end_offset().saturating_sub(margin.right).max(start);
    start..end
}
