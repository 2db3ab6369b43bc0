//! Chunked clustering of large point arrays.
//!
//! Chunking bounds the memory and compute of one clustering invocation.
//! Each chunk is clustered on its own and cluster ids restart in every
//! chunk: label `k` in one chunk has no relation to label `k` in another.
//! Only the noise label keeps its meaning across chunks.

use std::ops::Range;

use log::{debug, info};
use rayon::prelude::*;
use thiserror::Error;

use super::clustering::{CapabilityError, Dbscan, DbscanParams, DensityClusterer};
use crate::config::ClusteringConfig;
use crate::core::loaders::PointArray;
use crate::core::transforms::partition_ranges;

/// One cluster label per point, in point order.
pub type LabelVector = Vec<i32>;

/// Errors raised by [`ChunkedClusterer`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClusterError {
    #[error("chunk_size must be at least 1")]
    InvalidChunkSize,

    #[error("clustering failed for chunk [{start}, {end}): {source}")]
    Chunk {
        start: usize,
        end: usize,
        #[source]
        source: CapabilityError,
    },
}

/// Result type for chunked clustering.
pub type Result<T> = std::result::Result<T, ClusterError>;

/// Contiguous chunk ranges covering `[0, len)` exactly once, in order.
///
/// `None`, or a chunk size of at least `len`, yields a single range. An empty
/// input yields no ranges.
pub fn chunk_ranges(len: usize, chunk_size: Option<usize>) -> Result<Vec<Range<usize>>> {
    match chunk_size {
        Some(0) => Err(ClusterError::InvalidChunkSize),
        Some(size) if size < len => Ok(partition_ranges(len, size).collect()),
        _ if len == 0 => Ok(Vec::new()),
        _ => Ok(vec![0..len]),
    }
}

/// Runs a [`DensityClusterer`] over fixed-size chunks of a point array and
/// concatenates the per-chunk labels.
#[derive(Debug, Clone)]
pub struct ChunkedClusterer<C = Dbscan> {
    capability: C,
    params: DbscanParams,
    chunk_size: Option<usize>,
    parallel: bool,
}

impl ChunkedClusterer<Dbscan> {
    /// DBSCAN clusterer configured from a [`ClusteringConfig`].
    pub fn from_config(config: &ClusteringConfig) -> Self {
        ChunkedClusterer::new(Dbscan, DbscanParams::from(config))
            .with_chunk_size(config.chunk_size)
            .parallel(config.parallel_chunks)
    }
}

impl<C: DensityClusterer> ChunkedClusterer<C> {
    pub fn new(capability: C, params: DbscanParams) -> Self {
        Self {
            capability,
            params,
            chunk_size: None,
            parallel: false,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: Option<usize>) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Cluster chunks on the rayon pool. Output order is unchanged.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn params(&self) -> &DbscanParams {
        &self.params
    }

    pub fn chunk_size(&self) -> Option<usize> {
        self.chunk_size
    }

    /// Cluster a point array.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::InvalidChunkSize`] for a zero chunk size and
    /// [`ClusterError::Chunk`] with the failing range if the capability
    /// fails on any chunk. No labels are returned in either case.
    pub fn cluster(&self, points: &PointArray) -> Result<LabelVector> {
        self.cluster_coords(points.as_slice())
    }

    /// Cluster raw coordinates; see [`ChunkedClusterer::cluster`].
    pub fn cluster_coords(&self, coords: &[[f64; 3]]) -> Result<LabelVector> {
        let ranges = chunk_ranges(coords.len(), self.chunk_size)?;
        if ranges.len() > 1 {
            info!(
                "Clustering {} points in {} chunks of up to {} (labels restart per chunk)",
                coords.len(),
                ranges.len(),
                ranges[0].len()
            );
        }

        let per_chunk: Vec<Vec<i32>> = if self.parallel {
            ranges
                .par_iter()
                .map(|range| self.run_chunk(coords, range.clone()))
                .collect::<Result<_>>()?
        } else {
            ranges
                .iter()
                .map(|range| self.run_chunk(coords, range.clone()))
                .collect::<Result<_>>()?
        };

        let mut labels = LabelVector::with_capacity(coords.len());
        for chunk_labels in per_chunk {
            labels.extend(chunk_labels);
        }
        Ok(labels)
    }

    fn run_chunk(&self, coords: &[[f64; 3]], range: Range<usize>) -> Result<Vec<i32>> {
        let chunk_error = |source| ClusterError::Chunk {
            start: range.start,
            end: range.end,
            source,
        };

        debug!("Clustering points {} to {}...", range.start, range.end);
        let labels = self
            .capability
            .fit_predict(&coords[range.clone()], &self.params)
            .map_err(chunk_error)?;

        if labels.len() != range.len() {
            return Err(chunk_error(CapabilityError::LabelCountMismatch {
                expected: range.len(),
                actual: labels.len(),
            }));
        }
        Ok(labels)
    }
}
