//! Data processing modules.

pub mod assembly;
pub mod chunking;
pub mod clustering;
pub mod pipeline;

// Re-export key types for convenience
pub use assembly::{assemble, summarize, ClusterLabel, ClusterSummary, ShapeError};
pub use chunking::{chunk_ranges, ChunkedClusterer, ClusterError, LabelVector};
pub use clustering::{dbscan, CapabilityError, Dbscan, DbscanParams, DensityClusterer};
pub use pipeline::{run_pipeline, run_with_source, PipelineError, PipelineReport};
