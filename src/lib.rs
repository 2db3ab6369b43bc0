//! Bounded-memory LiDAR point cloud clustering pipeline.
//!
//! This crate provides tools for:
//! - Streaming large LAS files block by block with per-block strided subsampling
//! - Chunked, parallel DBSCAN clustering behind a pluggable capability trait
//! - Writing labeled rows to Parquet or CSV and reading them back
//! - Rendering clustered or raw clouds as 3-D scatter PNGs
//!
//! # Example
//!
//! ```no_run
//! use lidar_pipeline::config::LoadingConfig;
//! use lidar_pipeline::core::loaders::load_las;
//! use lidar_pipeline::processors::{assemble, ChunkedClusterer};
//! use lidar_pipeline::ClusteringConfig;
//!
//! let points = load_las("cloud.las", &LoadingConfig::default()).unwrap();
//! let clusterer = ChunkedClusterer::from_config(&ClusteringConfig::default());
//! let labels = clusterer.cluster(&points).unwrap();
//! let rows = assemble(points, labels).unwrap();
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod processors;
pub mod visualization;

pub use crate::config::{ClusteringConfig, LoadingConfig, OutputConfig, PipelineConfig, ViewConfig};
pub use crate::core::loaders::{ClusteredRow, PointArray, NOISE_LABEL};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
