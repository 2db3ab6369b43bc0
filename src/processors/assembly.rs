//! Pairing loaded points with their cluster labels.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::core::loaders::{ClusteredRow, PointArray, NOISE_LABEL};

/// Raised when points and labels cannot be paired row by row.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShapeError {
    #[error("label count {labels} does not match point count {points}")]
    LengthMismatch { points: usize, labels: usize },
}

/// A value usable as a cluster label.
///
/// Labels are stored as `i32`. Wider integers saturate to the `i32` range.
/// Floating point labels are truncated toward zero and non-finite values
/// become [`NOISE_LABEL`].
pub trait ClusterLabel: Copy {
    fn to_label(self) -> i32;
}

macro_rules! impl_int_label {
    ($($t:ty),*) => {
        $(
            impl ClusterLabel for $t {
                #[inline]
                fn to_label(self) -> i32 {
                    i32::try_from(self).unwrap_or(if self > 0 as $t { i32::MAX } else { i32::MIN })
                }
            }
        )*
    };
}

impl_int_label!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

macro_rules! impl_float_label {
    ($($t:ty),*) => {
        $(
            impl ClusterLabel for $t {
                #[inline]
                fn to_label(self) -> i32 {
                    if self.is_finite() {
                        // `as` saturates and truncates toward zero
                        self as i32
                    } else {
                        NOISE_LABEL
                    }
                }
            }
        )*
    };
}

impl_float_label!(f32, f64);

/// Pair row `i` of `points` with `labels[i]`.
///
/// Row order is preserved and no row is dropped, including noise rows.
///
/// # Errors
///
/// Returns [`ShapeError::LengthMismatch`] when the lengths differ.
pub fn assemble<L: ClusterLabel>(
    points: PointArray,
    labels: Vec<L>,
) -> Result<Vec<ClusteredRow>, ShapeError> {
    if points.len() != labels.len() {
        return Err(ShapeError::LengthMismatch {
            points: points.len(),
            labels: labels.len(),
        });
    }

    Ok(points
        .into_coords()
        .into_iter()
        .zip(labels)
        .map(|([x, y, z], label)| ClusteredRow {
            x,
            y,
            z,
            cluster_label: label.to_label(),
        })
        .collect())
}

/// Counts of rows per label.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterSummary {
    pub points: usize,
    pub noise: usize,
    /// Number of distinct non-noise labels
    pub clusters: usize,
    pub counts: BTreeMap<i32, usize>,
}

impl ClusterSummary {
    /// Non-noise labels ordered by descending size, ties by label.
    pub fn largest(&self, n: usize) -> Vec<(i32, usize)> {
        let mut sizes: Vec<(i32, usize)> = self
            .counts
            .iter()
            .map(|(&label, &count)| (label, count))
            .filter(|&(label, _)| label != NOISE_LABEL)
            .collect();
        sizes.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        sizes.truncate(n);
        sizes
    }
}

pub fn summarize(rows: &[ClusteredRow]) -> ClusterSummary {
    let mut counts = BTreeMap::new();
    for row in rows {
        *counts.entry(row.cluster_label).or_insert(0) += 1;
    }
    let noise = counts.get(&NOISE_LABEL).copied().unwrap_or(0);
    let clusters = counts.len() - usize::from(noise > 0);

    ClusterSummary {
        points: rows.len(),
        noise,
        clusters,
        counts,
    }
}
