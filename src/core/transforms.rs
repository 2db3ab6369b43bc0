//! Coordinate transforms, range partitioning and subsampling helpers.
//!
//! The loader and the chunked clusterer both cut a sequence into contiguous
//! `[start, end)` ranges; the helpers here are shared by both so the two
//! partitions follow exactly the same rule.

use std::ops::Range;

use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;

/// Per-axis conversion from raw integer coordinates to physical units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisTransform {
    pub scale: f64,
    pub offset: f64,
}

impl AxisTransform {
    /// Transform that leaves raw values unchanged.
    pub const IDENTITY: AxisTransform = AxisTransform {
        scale: 1.0,
        offset: 0.0,
    };

    #[inline]
    pub fn new(scale: f64, offset: f64) -> Self {
        Self { scale, offset }
    }

    /// `raw * scale + offset`
    #[inline]
    pub fn apply(&self, raw: i32) -> f64 {
        f64::from(raw) * self.scale + self.offset
    }
}

impl Default for AxisTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Independent transforms for the x, y and z axes.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Transforms {
    pub x: AxisTransform,
    pub y: AxisTransform,
    pub z: AxisTransform,
}

impl Transforms {
    pub fn new(x: AxisTransform, y: AxisTransform, z: AxisTransform) -> Self {
        Self { x, y, z }
    }

    /// Apply each axis transform to its own raw component.
    #[inline]
    pub fn apply(&self, x: i32, y: i32, z: i32) -> [f64; 3] {
        [self.x.apply(x), self.y.apply(y), self.z.apply(z)]
    }
}

/// Split `[0, total)` into contiguous ranges of `size` elements.
///
/// The last range may be shorter. Ranges never overlap and are yielded in
/// increasing order. A `size` of zero is treated as one.
pub fn partition_ranges(total: usize, size: usize) -> impl Iterator<Item = Range<usize>> {
    let size = size.max(1);
    (0..total)
        .step_by(size)
        .map(move |start| start..(start + size).min(total))
}

/// Local offsets kept from a block of `len` records with the given stride.
///
/// The stride restarts at every block: offset 0 is always kept.
#[inline]
pub fn strided_offsets(len: usize, stride: usize) -> std::iter::StepBy<Range<usize>> {
    (0..len).step_by(stride.max(1))
}

/// Number of records kept by block-wise strided sampling of `total` records.
///
/// Every full block keeps `ceil(block_size / stride)` records and the final
/// partial block keeps `ceil(rem / stride)`.
pub fn selected_count(total: usize, block_size: usize, stride: usize) -> usize {
    let block_size = block_size.max(1);
    let stride = stride.max(1);
    let full_blocks = total / block_size;
    let rem = total % block_size;
    full_blocks
        .saturating_mul(block_size.div_ceil(stride))
        .saturating_add(rem.div_ceil(stride))
}

/// Randomly choose `round(fraction * n)` indices out of `0..n`.
///
/// The returned indices are sorted so callers preserve row order. A fixed
/// `seed` makes the draw reproducible. `fraction` is clamped to `[0, 1]`.
pub fn random_sample_indices(n: usize, fraction: f64, seed: Option<u64>) -> Vec<usize> {
    let fraction = fraction.clamp(0.0, 1.0);
    if fraction >= 1.0 {
        return (0..n).collect();
    }

    let amount = ((n as f64) * fraction).round() as usize;
    let amount = amount.min(n);

    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut indices = index::sample(&mut rng, n, amount).into_vec();
    indices.sort_unstable();
    indices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_transform_apply() {
        let t = AxisTransform::new(0.01, 100.0);
        assert!((t.apply(250) - 102.5).abs() < 1e-9);
        assert!((t.apply(-100) - 99.0).abs() < 1e-9);
        assert_eq!(AxisTransform::IDENTITY.apply(7), 7.0);
    }

    #[test]
    fn test_transforms_are_per_axis() {
        let t = Transforms::new(
            AxisTransform::new(1.0, 0.0),
            AxisTransform::new(0.5, 10.0),
            AxisTransform::new(0.001, -5.0),
        );
        let [x, y, z] = t.apply(4, 4, 4000);
        assert_eq!(x, 4.0);
        assert_eq!(y, 12.0);
        assert!((z - -1.0).abs() < 1e-9);
    }

    #[test]
    fn test_partition_ranges_uneven() {
        let ranges: Vec<_> = partition_ranges(10, 4).collect();
        assert_eq!(ranges, vec![0..4, 4..8, 8..10]);
    }

    #[test]
    fn test_partition_ranges_cover_exactly_once() {
        for total in 0..40 {
            for size in 1..12 {
                let mut next = 0;
                for range in partition_ranges(total, size) {
                    assert_eq!(range.start, next, "gap or overlap at {}", next);
                    assert!(range.len() <= size);
                    assert!(!range.is_empty());
                    next = range.end;
                }
                assert_eq!(next, total);
            }
        }
    }

    #[test]
    fn test_partition_ranges_empty() {
        assert_eq!(partition_ranges(0, 5).count(), 0);
    }

    #[test]
    fn test_strided_offsets() {
        let offsets: Vec<_> = strided_offsets(4, 2).collect();
        assert_eq!(offsets, vec![0, 2]);
        let offsets: Vec<_> = strided_offsets(2, 3).collect();
        assert_eq!(offsets, vec![0]);
        assert_eq!(strided_offsets(0, 3).count(), 0);
    }

    #[test]
    fn test_selected_count_matches_stride_logic() {
        // blocks [0,4) [4,8) [8,10) with stride 2 keep 2 + 2 + 1
        assert_eq!(selected_count(10, 4, 2), 5);
        // blocks [0,3) [3,6) [6,9) [9,10) keep 2 + 2 + 2 + 1
        assert_eq!(selected_count(10, 3, 2), 7);
        assert_eq!(selected_count(0, 3, 2), 0);
        assert_eq!(selected_count(7, 100, 1), 7);
    }

    #[test]
    fn test_selected_count_agrees_with_block_walk() {
        for total in 0..60 {
            for block_size in 1..13 {
                for stride in 1..7 {
                    let walked: usize = partition_ranges(total, block_size)
                        .map(|r| strided_offsets(r.len(), stride).count())
                        .sum();
                    assert_eq!(
                        selected_count(total, block_size, stride),
                        walked,
                        "total={} block_size={} stride={}",
                        total,
                        block_size,
                        stride
                    );
                }
            }
        }
    }

    #[test]
    fn test_selected_count_huge_total_returns_immediately() {
        let total = 1usize << 60;
        assert_eq!(selected_count(total, 4, 1), total);
        assert_eq!(selected_count(total, 4, 2), total / 2);
        assert_eq!(selected_count(usize::MAX, 1, 1), usize::MAX);
    }

    #[test]
    fn test_random_sample_indices_seeded() {
        let a = random_sample_indices(1000, 0.25, Some(7));
        let b = random_sample_indices(1000, 0.25, Some(7));
        assert_eq!(a, b);
        assert_eq!(a.len(), 250);
        assert!(a.windows(2).all(|w| w[0] < w[1]));
        assert!(a.iter().all(|&i| i < 1000));
    }

    #[test]
    fn test_random_sample_indices_bounds() {
        assert_eq!(random_sample_indices(5, 1.0, None), vec![0, 1, 2, 3, 4]);
        assert!(random_sample_indices(5, 0.0, Some(1)).is_empty());
        assert!(random_sample_indices(0, 0.5, Some(1)).is_empty());
    }
}
