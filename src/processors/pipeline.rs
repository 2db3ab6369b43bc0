//! Load, cluster and persist in one call.
//!
//! The stages run sequentially. Each stage's error is propagated unchanged
//! inside [`PipelineError`]; an empty input flows through every stage as an
//! empty result.

use std::path::{Path, PathBuf};

use log::info;
use thiserror::Error;

use super::assembly::{assemble, summarize, ClusterSummary, ShapeError};
use super::chunking::{ChunkedClusterer, ClusterError};
use crate::config::{ConfigError, OutputFormat, PipelineConfig};
use crate::core::loaders::{load_with_config, ClusteredRow, LasSource, LoadError, PointSource};
use crate::core::writers::{write_rows, WriteError};

/// Errors raised by any stage of the pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("loading failed: {0}")]
    Load(#[from] LoadError),

    #[error("clustering failed: {0}")]
    Cluster(#[from] ClusterError),

    #[error("assembly failed: {0}")]
    Shape(#[from] ShapeError),

    #[error("writing output failed: {0}")]
    Write(#[from] WriteError),
}

/// Result type for pipeline runs.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Outcome of a full pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub total_points: usize,
    pub summary: ClusterSummary,
    pub output_path: PathBuf,
    pub format: OutputFormat,
}

/// Load from `source` and cluster, returning the assembled rows.
pub fn run_with_source<S: PointSource + ?Sized>(
    source: &mut S,
    config: &PipelineConfig,
) -> Result<Vec<ClusteredRow>> {
    config.validate()?;

    let points = load_with_config(source, &config.loading)?;
    let clusterer = ChunkedClusterer::from_config(&config.clustering);
    let labels = clusterer.cluster(&points)?;
    let rows = assemble(points, labels)?;

    let summary = summarize(&rows);
    info!(
        "Clustered {} points: {} clusters, {} noise",
        summary.points, summary.clusters, summary.noise
    );
    Ok(rows)
}

/// Run the whole pipeline on a LAS file and write the rows to
/// `config.output`.
pub fn run_pipeline(input: &Path, config: &PipelineConfig) -> Result<PipelineReport> {
    let mut source = LasSource::open(input)?;
    let total_points = source.total_points();

    let rows = run_with_source(&mut source, config)?;

    let format = config.output.resolved_format();
    write_rows(&config.output.path, &rows, format)?;

    Ok(PipelineReport {
        total_points,
        summary: summarize(&rows),
        output_path: config.output.path.clone(),
        format,
    })
}
