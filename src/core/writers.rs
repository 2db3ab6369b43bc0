//! Data writers for clustered rows.
//!
//! This module provides functions for writing clustered point data:
//! - Parquet with `x`, `y`, `z` (Float64) and `cluster_label` (Int32) columns
//! - CSV with the same four columns

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int32Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use log::info;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::errors::ParquetError;
use parquet::file::properties::WriterProperties;
use thiserror::Error;

use super::loaders::ClusteredRow;
use crate::config::OutputFormat;

/// Rows per Parquet record batch.
const PARQUET_BATCH_ROWS: usize = 1 << 20;

/// Errors that can occur during write operations.
#[derive(Error, Debug)]
pub enum WriteError {
    /// Failed to create parent directories.
    #[error("failed to create parent directories for '{path}': {source}")]
    CreateDirectory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to create or open file for writing.
    #[error("failed to create file '{path}': {source}")]
    CreateFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write data to file.
    #[error("failed to write to file '{path}': {source}")]
    WriteFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// CSV writing error.
    #[error("CSV write error for '{path}': {source}")]
    CsvError {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("Parquet write error for '{path}': {source}")]
    Parquet {
        path: String,
        #[source]
        source: ParquetError,
    },

    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),
}

/// Result type for write operations.
pub type Result<T> = std::result::Result<T, WriteError>;

/// Creates parent directories for a file path if they don't exist.
fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| WriteError::CreateDirectory {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
    }
    Ok(())
}

/// Creates a buffered writer for the given path.
fn create_buffered_writer(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).map_err(|e| WriteError::CreateFile {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(BufWriter::new(file))
}

/// Arrow schema of the clustered output.
pub fn clustered_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("x", DataType::Float64, false),
        Field::new("y", DataType::Float64, false),
        Field::new("z", DataType::Float64, false),
        Field::new("cluster_label", DataType::Int32, false),
    ]))
}

fn to_record_batch(schema: &SchemaRef, rows: &[ClusteredRow]) -> Result<RecordBatch> {
    let x = Float64Array::from_iter_values(rows.iter().map(|r| r.x));
    let y = Float64Array::from_iter_values(rows.iter().map(|r| r.y));
    let z = Float64Array::from_iter_values(rows.iter().map(|r| r.z));
    let labels = Int32Array::from_iter_values(rows.iter().map(|r| r.cluster_label));

    let columns: Vec<ArrayRef> = vec![
        Arc::new(x),
        Arc::new(y),
        Arc::new(z),
        Arc::new(labels),
    ];
    Ok(RecordBatch::try_new(schema.clone(), columns)?)
}

/// Write clustered rows to a Parquet file.
///
/// The file has one row per input row, in input order. An empty input still
/// produces a valid file with the four-column schema and zero rows.
///
/// # Errors
///
/// Returns an error if:
/// - Parent directories cannot be created
/// - File cannot be created or the Parquet encoder fails
///
/// # Example
///
/// ```no_run
/// use lidar_pipeline::core::loaders::ClusteredRow;
/// use lidar_pipeline::core::writers::write_clustered_parquet;
/// use std::path::Path;
///
/// let rows = vec![ClusteredRow { x: 1.0, y: 2.0, z: 3.0, cluster_label: 0 }];
/// write_clustered_parquet(Path::new("clustered.parquet"), &rows).unwrap();
/// ```
pub fn write_clustered_parquet(path: &Path, rows: &[ClusteredRow]) -> Result<()> {
    ensure_parent_dirs(path)?;
    let path_str = path.display().to_string();
    let parquet_error = |source| WriteError::Parquet {
        path: path_str.clone(),
        source,
    };

    let file = create_buffered_writer(path)?;
    let schema = clustered_schema();
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer =
        ArrowWriter::try_new(file, schema.clone(), Some(props)).map_err(parquet_error)?;

    for chunk in rows.chunks(PARQUET_BATCH_ROWS) {
        let batch = to_record_batch(&schema, chunk)?;
        writer.write(&batch).map_err(parquet_error)?;
    }
    writer.close().map_err(parquet_error)?;

    info!("Wrote {} rows to {}", rows.len(), path.display());
    Ok(())
}

/// Write clustered rows to CSV.
///
/// Creates a CSV file with headers "x,y,z,cluster_label" and one row per
/// input row.
///
/// # Errors
///
/// Returns an error if:
/// - Parent directories cannot be created
/// - File cannot be created or written to
pub fn write_clustered_csv(path: &Path, rows: &[ClusteredRow]) -> Result<()> {
    ensure_parent_dirs(path)?;

    let buf_writer = create_buffered_writer(path)?;
    let mut csv_writer = csv::Writer::from_writer(buf_writer);

    let path_str = path.display().to_string();

    csv_writer
        .write_record(ClusteredRow::COLUMNS)
        .map_err(|e| WriteError::CsvError {
            path: path_str.clone(),
            source: e,
        })?;

    for row in rows {
        csv_writer
            .write_record(&[
                format!("{:.6}", row.x),
                format!("{:.6}", row.y),
                format!("{:.6}", row.z),
                row.cluster_label.to_string(),
            ])
            .map_err(|e| WriteError::CsvError {
                path: path_str.clone(),
                source: e,
            })?;
    }

    csv_writer.flush().map_err(|e| WriteError::WriteFile {
        path: path_str,
        source: e,
    })?;

    info!("Wrote {} rows to {}", rows.len(), path.display());
    Ok(())
}

/// Write clustered rows in the requested format.
pub fn write_rows(path: &Path, rows: &[ClusteredRow], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Parquet => write_clustered_parquet(path, rows),
        OutputFormat::Csv => write_clustered_csv(path, rows),
    }
}
