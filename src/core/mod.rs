//! Core data types and I/O operations.

pub mod loaders;
pub mod transforms;
pub mod writers;

pub use loaders::{
    load_clustered_parquet, load_las, load_points, ClusteredRow, LasSource, LoadError,
    PointArray, PointSource,
};
pub use transforms::{AxisTransform, Transforms};
pub use writers::{write_clustered_csv, write_clustered_parquet, write_rows, WriteError};
