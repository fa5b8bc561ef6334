//! Weighted slot allocation for a new cluster.
//!
//! All functions in this module are pure, side-effect free, and fully testable.

use serde::Serialize;

use crate::error::{Result, TribError};

/// Total number of hash slots in a cluster.
pub const TOTAL_SLOTS: u16 = 16384;

/// A contiguous range of hash slots [start, end] inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlotRange {
    /// Start of the slot range (inclusive).
    pub start: u16,
    /// End of the slot range (inclusive).
    pub end: u16,
}

impl SlotRange {
    /// Create a new slot range.
    ///
    /// # Panics
    /// Debug-only assertions check that start <= end and end < TOTAL_SLOTS.
    pub fn new(start: u16, end: u16) -> Self {
        debug_assert!(start <= end, "start ({}) must be <= end ({})", start, end);
        debug_assert!(
            end < TOTAL_SLOTS,
            "end ({}) must be < TOTAL_SLOTS ({})",
            end,
            TOTAL_SLOTS
        );
        Self { start, end }
    }

    /// Create a single-slot range.
    pub fn single(slot: u16) -> Self {
        Self {
            start: slot,
            end: slot,
        }
    }

    /// Get the number of slots in this range.
    pub fn count(&self) -> u16 {
        self.end - self.start + 1
    }

    /// Iterate over all slots in this range.
    pub fn iter(&self) -> impl Iterator<Item = u16> {
        self.start..=self.end
    }
}

impl std::fmt::Display for SlotRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// Collapse slots into sorted, maximal ranges.
///
/// ```
/// use valkey_trib::slots::distribution::{compact_ranges, SlotRange};
///
/// let ranges = compact_ranges([5, 1, 2, 3, 9, 2]);
/// assert_eq!(ranges, vec![SlotRange::new(1, 3), SlotRange::single(5), SlotRange::single(9)]);
/// ```
pub fn compact_ranges(slots: impl IntoIterator<Item = u16>) -> Vec<SlotRange> {
    let mut sorted: Vec<u16> = slots.into_iter().collect();
    sorted.sort_unstable();
    sorted.dedup();

    let mut ranges: Vec<SlotRange> = Vec::new();
    for slot in sorted {
        match ranges.last_mut() {
            Some(last) if last.end.checked_add(1) == Some(slot) => last.end = slot,
            _ => ranges.push(SlotRange::single(slot)),
        }
    }
    ranges
}

/// Format ranges as `0-10,12,20-30`.
pub fn format_ranges(ranges: &[SlotRange]) -> String {
    ranges
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Slots assigned to one node by [`allocate_slots`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotAllocation {
    /// Weight the share was computed from.
    pub weight: u64,
    /// Assigned range, `None` when the share rounds to zero slots.
    pub range: Option<SlotRange>,
}

impl SlotAllocation {
    /// Number of slots assigned.
    pub fn count(&self) -> usize {
        self.range.map_or(0, |r| usize::from(r.count()))
    }

    /// Assigned slots in ascending order.
    pub fn slots(&self) -> Vec<u16> {
        self.range.map(|r| r.iter().collect()).unwrap_or_default()
    }
}

/// Split the slot space into contiguous ranges proportional to `weights`.
///
/// Nodes are walked in input order starting at slot 0. Each node's upper
/// boundary is the rounded cumulative share `16384 / Σw × Σw_so_far`, so a node
/// receives `round(16384 × w / Σw)` slots give or take one slot of carried
/// rounding, and the ranges always cover exactly 16384 slots without overlap.
/// If every weight is zero the nodes are weighted equally.
///
/// ```
/// use valkey_trib::slots::distribution::{allocate_slots, SlotRange};
///
/// let alloc = allocate_slots(&[100, 200, 100]).unwrap();
/// assert_eq!(alloc[0].range, Some(SlotRange::new(0, 4095)));
/// assert_eq!(alloc[1].range, Some(SlotRange::new(4096, 12287)));
/// assert_eq!(alloc[2].range, Some(SlotRange::new(12288, 16383)));
/// ```
pub fn allocate_slots(weights: &[u64]) -> Result<Vec<SlotAllocation>> {
    if weights.is_empty() {
        return Err(TribError::Preflight(
            "No masters to allocate slots to".to_string(),
        ));
    }

    let total: u128 = weights.iter().map(|w| u128::from(*w)).sum();
    let effective: Vec<u64> = if total == 0 {
        vec![1; weights.len()]
    } else {
        weights.to_vec()
    };
    let total: f64 = effective.iter().map(|w| *w as f64).sum();
    let per_slot_weight = f64::from(TOTAL_SLOTS) / total;

    let mut allocations = Vec::with_capacity(weights.len());
    let mut cumulative = 0f64;
    let mut start: u32 = 0;

    for (idx, (weight, effective)) in weights.iter().zip(&effective).enumerate() {
        cumulative += *effective as f64;
        let boundary = if idx + 1 == weights.len() {
            u32::from(TOTAL_SLOTS)
        } else {
            ((per_slot_weight * cumulative).round() as u32).clamp(start, u32::from(TOTAL_SLOTS))
        };

        let range = if boundary > start {
            Some(SlotRange::new(start as u16, (boundary - 1) as u16))
        } else {
            None
        };
        allocations.push(SlotAllocation {
            weight: *weight,
            range,
        });
        start = boundary;
    }

    Ok(allocations)
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::get_unwrap
)]
mod tests {
    use super::*;

    fn assert_full_coverage(alloc: &[SlotAllocation]) {
        let total: usize = alloc.iter().map(SlotAllocation::count).sum();
        assert_eq!(total, usize::from(TOTAL_SLOTS));

        let ranges: Vec<SlotRange> = alloc.iter().filter_map(|a| a.range).collect();
        assert_eq!(ranges.first().unwrap().start, 0);
        assert_eq!(ranges.last().unwrap().end, TOTAL_SLOTS - 1);
        for pair in ranges.windows(2) {
            assert_eq!(pair[1].start, pair[0].end + 1);
        }
    }

    #[test]
    fn test_slot_range_count() {
        assert_eq!(SlotRange::new(0, 5461).count(), 5462);
        assert_eq!(SlotRange::single(100).count(), 1);
        assert_eq!(SlotRange::new(0, 16383).count(), 16384);
    }

    #[test]
    fn test_slot_range_display() {
        assert_eq!(format!("{}", SlotRange::new(0, 5461)), "0-5461");
        assert_eq!(format!("{}", SlotRange::single(100)), "100");
    }

    #[test]
    fn test_compact_ranges() {
        assert!(compact_ranges(Vec::<u16>::new()).is_empty());
        assert_eq!(
            compact_ranges([0, 1, 2, 3, 10, 12, 13, 16383]),
            vec![
                SlotRange::new(0, 3),
                SlotRange::single(10),
                SlotRange::new(12, 13),
                SlotRange::single(16383),
            ]
        );
        assert_eq!(
            format_ranges(&compact_ranges([4, 3, 7])),
            "3-4,7".to_string()
        );
    }

    #[test]
    fn test_allocate_equal_weights() {
        let alloc = allocate_slots(&[1, 1, 1]).unwrap();
        assert_eq!(alloc.len(), 3);
        assert_eq!(alloc[0].range, Some(SlotRange::new(0, 5460)));
        assert_eq!(alloc[1].range, Some(SlotRange::new(5461, 10922)));
        assert_eq!(alloc[2].range, Some(SlotRange::new(10923, 16383)));
        assert_full_coverage(&alloc);
    }

    #[test]
    fn test_allocate_weighted() {
        let gb = 1024 * 1024 * 1024;
        let alloc = allocate_slots(&[gb, 3 * gb]).unwrap();
        assert_eq!(alloc[0].count(), 4096);
        assert_eq!(alloc[1].count(), 12288);
        assert_full_coverage(&alloc);
    }

    #[test]
    fn test_allocate_single_node() {
        let alloc = allocate_slots(&[42]).unwrap();
        assert_eq!(alloc[0].range, Some(SlotRange::new(0, 16383)));
    }

    #[test]
    fn test_allocate_zero_weights_fall_back_to_equal() {
        let alloc = allocate_slots(&[0, 0]).unwrap();
        assert_eq!(alloc[0].count(), 8192);
        assert_eq!(alloc[1].count(), 8192);
        assert_eq!(alloc[0].weight, 0);
    }

    #[test]
    fn test_allocate_zero_weight_node_gets_nothing() {
        let alloc = allocate_slots(&[0, 5, 5]).unwrap();
        assert_eq!(alloc[0].range, None);
        assert!(alloc[0].slots().is_empty());
        assert_full_coverage(&alloc);
    }

    #[test]
    fn test_allocate_rejects_empty() {
        assert!(matches!(allocate_slots(&[]), Err(TribError::Preflight(_))));
    }

    #[test]
    fn test_allocation_covers_all_slots() {
        for n in 2..=20u64 {
            let weights: Vec<u64> = (1..=n).map(|i| i * 7 + (i % 3)).collect();
            assert_full_coverage(&allocate_slots(&weights).unwrap());
        }
    }
}
