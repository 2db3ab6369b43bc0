//! Point sources and bounded-memory loaders.
//!
//! This module provides:
//! - The [`PointSource`] abstraction over raw point records plus per-axis
//!   scale/offset constants
//! - [`LasSource`], a reader for LAS and LAZ files
//! - [`load_points`], which streams a source block by block with per-block
//!   strided subsampling
//! - [`load_clustered_parquet`], which reads back previously written results

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::{Path, PathBuf};

use arrow::array::{Array, ArrayRef, Float64Array, Int32Array};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use las::point::Format;
use las::{Transform, Vector};
use log::{debug, info};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use thiserror::Error;

use super::transforms::{
    partition_ranges, selected_count, strided_offsets, AxisTransform, Transforms,
};
use crate::config::LoadingConfig;

/// Label reserved for points that belong to no cluster.
pub const NOISE_LABEL: i32 = -1;

/// Upper bound on the output capacity reserved before any record is read.
const MAX_PREALLOCATED_POINTS: usize = 1 << 20;

/// Errors that can occur while loading point data.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("failed to open '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("LAS error: {0}")]
    Las(#[from] las::Error),

    #[error("invalid LAS header: {0}")]
    InvalidHeader(String),

    #[error("point data ends inside records {start}..{end}")]
    Truncated { start: usize, end: usize },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("missing required column: {0}")]
    MissingColumn(String),
}

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, LoadError>;

/// Ordered 3-D coordinates in physical units.
///
/// Insertion order is the subsampled source order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointArray {
    pub coords: Vec<[f64; 3]>,
}

impl PointArray {
    /// Creates a new empty point array.
    pub fn new() -> Self {
        Self { coords: Vec::new() }
    }

    /// Creates a new point array with pre-allocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            coords: Vec::with_capacity(capacity),
        }
    }

    pub fn from_coords(coords: Vec<[f64; 3]>) -> Self {
        Self { coords }
    }

    /// Returns the number of points.
    #[inline]
    pub fn len(&self) -> usize {
        self.coords.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    #[inline]
    pub fn push(&mut self, point: [f64; 3]) {
        self.coords.push(point);
    }

    #[inline]
    pub fn as_slice(&self) -> &[[f64; 3]] {
        &self.coords
    }

    /// Keep only the first `len` points.
    pub fn truncate(&mut self, len: usize) {
        self.coords.truncate(len);
    }

    pub fn into_coords(self) -> Vec<[f64; 3]> {
        self.coords
    }
}

/// One labelled point of the final output relation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusteredRow {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub cluster_label: i32,
}

impl ClusteredRow {
    /// Column names, in output order.
    pub const COLUMNS: [&'static str; 4] = ["x", "y", "z", "cluster_label"];

    #[inline]
    pub fn is_noise(&self) -> bool {
        self.cluster_label == NOISE_LABEL
    }

    #[inline]
    pub fn coords(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

/// A contiguous run of raw records `[start, start + len)` from a source.
///
/// Blocks are transient: the loader drops each one before reading the next.
#[derive(Debug, Clone, Default)]
pub struct PointBlock {
    pub start: usize,
    pub x: Vec<i32>,
    pub y: Vec<i32>,
    pub z: Vec<i32>,
}

impl PointBlock {
    pub fn with_capacity(start: usize, capacity: usize) -> Self {
        Self {
            start,
            x: Vec::with_capacity(capacity),
            y: Vec::with_capacity(capacity),
            z: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn push(&mut self, x: i32, y: i32, z: i32) {
        self.x.push(x);
        self.y.push(y);
        self.z.push(z);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.x.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Exclusive end index in the source.
    #[inline]
    pub fn end(&self) -> usize {
        self.start + self.len()
    }
}

/// A finite source of raw integer point records.
pub trait PointSource {
    /// Total number of records in the source.
    fn total_points(&self) -> usize;

    /// Scale/offset constants that map raw values to physical units.
    fn transforms(&self) -> Transforms;

    /// Read the raw records in `range`. Must return exactly `range.len()` records.
    fn read_block(&mut self, range: Range<usize>) -> Result<PointBlock>;
}

/// Raw point records held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    transforms: Transforms,
    records: Vec<[i32; 3]>,
}

impl InMemorySource {
    pub fn new(transforms: Transforms, records: Vec<[i32; 3]>) -> Self {
        Self {
            transforms,
            records,
        }
    }
}

impl PointSource for InMemorySource {
    fn total_points(&self) -> usize {
        self.records.len()
    }

    fn transforms(&self) -> Transforms {
        self.transforms
    }

    fn read_block(&mut self, range: Range<usize>) -> Result<PointBlock> {
        let records = self.records.get(range.clone()).ok_or_else(|| {
            LoadError::InvalidParameter(format!(
                "block {}..{} outside source of {} records",
                range.start,
                range.end,
                self.records.len()
            ))
        })?;

        let mut block = PointBlock::with_capacity(range.start, records.len());
        for &[x, y, z] in records {
            block.push(x, y, z);
        }
        Ok(block)
    }
}

/// Reader for LAS 1.0 - 1.4 files, plain or LAZ-compressed.
///
/// Plain files are read by seeking straight to a block's records; only the
/// X/Y/Z integers of each decoded record are kept.
pub struct LasSource {
    path: PathBuf,
    records: LasRecords,
    total_points: usize,
    transforms: Transforms,
}

enum LasRecords {
    Plain {
        reader: BufReader<File>,
        point_data_offset: u64,
        format: Format,
    },
    Compressed {
        reader: las::Reader,
        transforms: Vector<Transform>,
    },
}

impl LasSource {
    /// Open a LAS or LAZ file and parse its header.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, the header is not a
    /// valid LAS header, or a plain file is shorter than its header claims.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| LoadError::Open {
            path: path.to_path_buf(),
            source: e,
        })?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let header = las::raw::Header::read_from(&mut reader)?;

        if &header.file_signature != b"LASF" {
            return Err(LoadError::InvalidHeader(format!(
                "{} does not start with the LASF signature",
                path.display()
            )));
        }

        let transforms = Transforms::new(
            axis_transform("x", header.x_scale_factor, header.x_offset)?,
            axis_transform("y", header.y_scale_factor, header.y_offset)?,
            axis_transform("z", header.z_scale_factor, header.z_offset)?,
        );

        let format = Format::new(header.point_data_record_format)?;
        let compressed = format.is_compressed;
        let (records, total_points) = if compressed {
            reader.rewind()?;
            let reader = las::Reader::new(reader)?;
            let total_points = point_count(reader.header().number_of_points())?;
            let transforms = *reader.header().transforms();
            (LasRecords::Compressed { reader, transforms }, total_points)
        } else {
            let format = record_format(format, header.point_data_record_length)?;
            let total_points = point_count(match header.large_file {
                Some(ref large) if header.number_of_point_records == 0 => {
                    large.number_of_point_records
                }
                _ => u64::from(header.number_of_point_records),
            })?;
            let point_data_offset = u64::from(header.offset_to_point_data);
            check_point_data_fits(
                file_len,
                point_data_offset,
                header.point_data_record_length,
                total_points,
            )?;
            let records = LasRecords::Plain {
                reader,
                point_data_offset,
                format,
            };
            (records, total_points)
        };

        info!(
            "{}: LAS {}.{}, format {}{}, {} points",
            path.display(),
            header.version.major,
            header.version.minor,
            header.point_data_record_format & 0x3F,
            if compressed { " (LAZ)" } else { "" },
            total_points
        );

        Ok(Self {
            path: path.to_path_buf(),
            records,
            total_points,
            transforms,
        })
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the point data is LAZ-compressed.
    pub fn is_compressed(&self) -> bool {
        matches!(self.records, LasRecords::Compressed { .. })
    }
}

fn axis_transform(axis: &str, scale: f64, offset: f64) -> Result<AxisTransform> {
    if !scale.is_finite() || scale == 0.0 || !offset.is_finite() {
        return Err(LoadError::InvalidHeader(format!(
            "invalid {} scale/offset: {} / {}",
            axis, scale, offset
        )));
    }
    Ok(AxisTransform::new(scale, offset))
}

fn point_count(count: u64) -> Result<usize> {
    usize::try_from(count)
        .map_err(|_| LoadError::InvalidHeader(format!("point count {} exceeds usize", count)))
}

/// Widen the header's point format so it spans the full record, treating any
/// bytes past the standard fields as extra bytes.
fn record_format(mut format: Format, record_length: u16) -> Result<Format> {
    let base = format.len();
    if record_length < base {
        return Err(LoadError::InvalidHeader(format!(
            "point record length {} is shorter than the {} bytes of its format",
            record_length, base
        )));
    }
    format.extra_bytes = record_length - base;
    Ok(format)
}

/// The header's record count must fit in the bytes after the point data
/// offset.
fn check_point_data_fits(
    file_len: u64,
    point_data_offset: u64,
    record_length: u16,
    total_points: usize,
) -> Result<()> {
    let record_length = u64::from(record_length);
    let needed = (total_points as u64)
        .checked_mul(record_length)
        .and_then(|bytes| bytes.checked_add(point_data_offset));

    match needed {
        Some(needed) if needed <= file_len => Ok(()),
        _ => {
            let available = file_len.saturating_sub(point_data_offset) / record_length.max(1);
            Err(LoadError::Truncated {
                start: usize::try_from(available).unwrap_or(usize::MAX).min(total_points),
                end: total_points,
            })
        }
    }
}

impl PointSource for LasSource {
    fn total_points(&self) -> usize {
        self.total_points
    }

    fn transforms(&self) -> Transforms {
        self.transforms
    }

    fn read_block(&mut self, range: Range<usize>) -> Result<PointBlock> {
        if range.end > self.total_points {
            return Err(LoadError::InvalidParameter(format!(
                "block {}..{} outside source of {} records",
                range.start, range.end, self.total_points
            )));
        }

        let truncated = || LoadError::Truncated {
            start: range.start,
            end: range.end,
        };
        let mut block =
            PointBlock::with_capacity(range.start, range.len().min(MAX_PREALLOCATED_POINTS));

        match &mut self.records {
            LasRecords::Plain {
                reader,
                point_data_offset,
                format,
            } => {
                let record_length = usize::from(format.len());
                let offset = *point_data_offset + range.start as u64 * record_length as u64;
                reader.seek(SeekFrom::Start(offset))?;

                // The byte buffer lives only for this call.
                let mut raw = vec![0u8; range.len() * record_length];
                reader.read_exact(&mut raw).map_err(|e| match e.kind() {
                    ErrorKind::UnexpectedEof => truncated(),
                    _ => LoadError::Io(e),
                })?;

                for record in raw.chunks_exact(record_length) {
                    let point = las::raw::Point::read_from(record, format)?;
                    block.push(point.x, point.y, point.z);
                }
            }
            LasRecords::Compressed { reader, transforms } => {
                reader.seek(range.start as u64)?;
                let mut points = Vec::new();
                let read = reader.read_points_into(range.len() as u64, &mut points)?;
                if read != range.len() as u64 {
                    return Err(truncated());
                }
                for point in points {
                    block.push(
                        transforms.x.inverse(point.x)?,
                        transforms.y.inverse(point.y)?,
                        transforms.z.inverse(point.z)?,
                    );
                }
            }
        }

        Ok(block)
    }
}

/// Stream a source into a [`PointArray`] block by block.
///
/// For every block `[start, end)` the absolute indices `start + k * sampling_factor`
/// below `end` are kept, transformed to physical units and appended in order.
/// Each block is dropped before the next one is read, so peak memory is
/// bounded by `block_size` raw records plus the accumulated output.
///
/// # Errors
///
/// Returns an error if a parameter is zero or any block read fails. No
/// partially loaded array is returned on error.
pub fn load_points<S: PointSource + ?Sized>(
    source: &mut S,
    block_size: usize,
    sampling_factor: usize,
) -> Result<PointArray> {
    if block_size == 0 {
        return Err(LoadError::InvalidParameter("block_size must be > 0".into()));
    }
    if sampling_factor == 0 {
        return Err(LoadError::InvalidParameter(
            "sampling_factor must be >= 1".into(),
        ));
    }

    let total = source.total_points();
    let transforms = source.transforms();
    let expected = selected_count(total, block_size, sampling_factor);
    let mut points = PointArray::with_capacity(expected.min(MAX_PREALLOCATED_POINTS));

    for range in partition_ranges(total, block_size) {
        debug!("Loading points {} to {}...", range.start, range.end);

        let block = source.read_block(range.clone())?;
        if block.start != range.start || block.len() != range.len() {
            return Err(LoadError::InvalidParameter(format!(
                "source returned records {}..{} for block {}..{}",
                block.start,
                block.end(),
                range.start,
                range.end
            )));
        }

        for local in strided_offsets(block.len(), sampling_factor) {
            points.push(transforms.apply(block.x[local], block.y[local], block.z[local]));
        }
    }

    info!(
        "Loaded {} of {} points (block_size={}, sampling_factor={})",
        points.len(),
        total,
        block_size,
        sampling_factor
    );

    Ok(points)
}

/// Load a source using a [`LoadingConfig`], applying its `max_points` cap.
pub fn load_with_config<S: PointSource + ?Sized>(
    source: &mut S,
    config: &LoadingConfig,
) -> Result<PointArray> {
    let mut points = load_points(source, config.block_size, config.sampling_factor)?;
    if let Some(max_points) = config.max_points {
        if points.len() > max_points {
            info!("Keeping the first {} of {} points", max_points, points.len());
            points.truncate(max_points);
        }
    }
    Ok(points)
}

/// Open a LAS file and load it with the given configuration.
pub fn load_las<P: AsRef<Path>>(path: P, config: &LoadingConfig) -> Result<PointArray> {
    let mut source = LasSource::open(path)?;
    load_with_config(&mut source, config)
}

/// Load clustered rows from a Parquet file with `x`, `y`, `z` and
/// `cluster_label` columns.
///
/// Coordinate columns may be any numeric type and are widened to `f64`; the
/// label column is cast to `i32`, with nulls read as noise.
///
/// # Errors
///
/// Returns an error if the file cannot be read or lacks a required column.
pub fn load_clustered_parquet<P: AsRef<Path>>(path: P) -> Result<Vec<ClusteredRow>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| LoadError::Open {
        path: path.to_path_buf(),
        source: e,
    })?;

    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    for column in ClusteredRow::COLUMNS {
        if builder.schema().field_with_name(column).is_err() {
            return Err(LoadError::MissingColumn(column.to_string()));
        }
    }

    let reader = builder.build()?;
    let mut rows = Vec::new();

    for batch in reader {
        let batch = batch?;
        let x = column_as(&batch, "x", &DataType::Float64)?;
        let y = column_as(&batch, "y", &DataType::Float64)?;
        let z = column_as(&batch, "z", &DataType::Float64)?;
        let labels = column_as(&batch, "cluster_label", &DataType::Int32)?;

        let x = as_f64(&x, "x")?;
        let y = as_f64(&y, "y")?;
        let z = as_f64(&z, "z")?;
        let labels = labels
            .as_any()
            .downcast_ref::<Int32Array>()
            .ok_or_else(|| LoadError::MissingColumn("cluster_label".into()))?;

        rows.reserve(batch.num_rows());
        for i in 0..batch.num_rows() {
            let cluster_label = if labels.is_null(i) {
                NOISE_LABEL
            } else {
                labels.value(i)
            };
            rows.push(ClusteredRow {
                x: x.value(i),
                y: y.value(i),
                z: z.value(i),
                cluster_label,
            });
        }
    }

    info!("{}: read {} clustered rows", path.display(), rows.len());
    Ok(rows)
}

fn column_as(batch: &RecordBatch, name: &str, data_type: &DataType) -> Result<ArrayRef> {
    let column = batch
        .column_by_name(name)
        .ok_or_else(|| LoadError::MissingColumn(name.to_string()))?;
    Ok(cast(column, data_type)?)
}

fn as_f64<'a>(array: &'a ArrayRef, name: &str) -> Result<&'a Float64Array> {
    array
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| LoadError::MissingColumn(name.to_string()))
}
