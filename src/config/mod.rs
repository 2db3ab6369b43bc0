//! Configuration types for the LiDAR pipeline.
//!
//! Every stage receives its parameters through one of these structs; nothing
//! in the library reads the process environment.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while reading, writing or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Configuration for block-wise LAS loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadingConfig {
    /// Maximum number of source records decoded per block
    #[serde(default = "default_block_size")]
    pub block_size: usize,

    /// Keep every Nth record within each block
    #[serde(default = "default_sampling_factor")]
    pub sampling_factor: usize,

    /// Keep only the first N loaded points (after subsampling)
    #[serde(default)]
    pub max_points: Option<usize>,
}

fn default_block_size() -> usize {
    1_000_000
}

fn default_sampling_factor() -> usize {
    10
}

impl Default for LoadingConfig {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
            sampling_factor: default_sampling_factor(),
            max_points: None,
        }
    }
}

/// Configuration for chunked DBSCAN clustering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringConfig {
    /// Neighbourhood radius
    #[serde(default = "default_eps")]
    pub eps: f64,

    /// Minimum neighbourhood size (the point itself included) for a core point
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,

    /// Points per independently clustered chunk; `None` clusters everything at once
    #[serde(default)]
    pub chunk_size: Option<usize>,

    /// Memory cap for one neighbour-query batch, in megabytes
    #[serde(default)]
    pub max_mbytes_per_batch: Option<usize>,

    /// Cluster chunks on the rayon pool
    #[serde(default)]
    pub parallel_chunks: bool,
}

fn default_eps() -> f64 {
    0.5
}

fn default_min_samples() -> usize {
    6
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            eps: default_eps(),
            min_samples: default_min_samples(),
            chunk_size: None,
            max_mbytes_per_batch: None,
            parallel_chunks: false,
        }
    }
}

/// Serialization format of the clustered rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Parquet,
    Csv,
}

impl OutputFormat {
    /// Guess the format from a file extension, defaulting to Parquet.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("csv") => OutputFormat::Csv,
            _ => OutputFormat::Parquet,
        }
    }
}

/// Where the clustered rows are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_path")]
    pub path: PathBuf,

    /// Explicit format; inferred from `path` when absent
    #[serde(default)]
    pub format: Option<OutputFormat>,
}

fn default_output_path() -> PathBuf {
    PathBuf::from("data/clustered_points.parquet")
}

impl OutputConfig {
    pub fn resolved_format(&self) -> OutputFormat {
        self.format
            .unwrap_or_else(|| OutputFormat::from_path(&self.path))
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: default_output_path(),
            format: None,
        }
    }
}

/// A single color: a CSS-style name, `#rrggbb`, or RGB floats in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColorSpec {
    Name(String),
    Rgb([f64; 3]),
}

/// How cluster labels are mapped to colors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColorScheme {
    /// Named continuous palette sampled over the label range
    Palette(String),
    /// Explicit colors, cycled by label
    Colors(Vec<ColorSpec>),
    /// Explicit label to color mapping
    Custom(BTreeMap<i32, ColorSpec>),
}

impl Default for ColorScheme {
    fn default() -> Self {
        ColorScheme::Palette("viridis".to_string())
    }
}

/// Rendering options for the 3-D scatter output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewConfig {
    /// Marker radius in pixels
    #[serde(default = "default_point_size")]
    pub point_size: u32,

    /// Fraction of rows drawn, in `[0, 1]`
    #[serde(default = "default_sampling_fraction")]
    pub sampling_fraction: f64,

    /// Draw rows labelled as noise
    #[serde(default)]
    pub show_noise: bool,

    #[serde(default)]
    pub color_scheme: ColorScheme,

    #[serde(default = "default_background")]
    pub background: ColorSpec,

    #[serde(default = "default_show_grid")]
    pub show_grid: bool,

    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    /// Projection yaw in radians
    #[serde(default = "default_yaw")]
    pub yaw: f64,

    /// Projection pitch in radians
    #[serde(default = "default_pitch")]
    pub pitch: f64,

    /// Seed for the random row sample; unseeded when absent
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_point_size() -> u32 {
    2
}

fn default_sampling_fraction() -> f64 {
    1.0
}

fn default_background() -> ColorSpec {
    ColorSpec::Name("gray".to_string())
}

fn default_show_grid() -> bool {
    true
}

fn default_width() -> u32 {
    1920
}

fn default_height() -> u32 {
    1080
}

fn default_yaw() -> f64 {
    0.5
}

fn default_pitch() -> f64 {
    0.3
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            point_size: default_point_size(),
            sampling_fraction: default_sampling_fraction(),
            show_noise: false,
            color_scheme: ColorScheme::default(),
            background: default_background(),
            show_grid: default_show_grid(),
            width: default_width(),
            height: default_height(),
            yaw: default_yaw(),
            pitch: default_pitch(),
            seed: None,
        }
    }
}

/// Main pipeline configuration combining all sub-configs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub loading: LoadingConfig,

    #[serde(default)]
    pub clustering: ClusteringConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub view: ViewConfig,
}

impl PipelineConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check the numeric constraints every stage relies on.
    pub fn validate(&self) -> Result<()> {
        if self.loading.block_size == 0 {
            return Err(ConfigError::Invalid("block_size must be > 0".into()));
        }
        if self.loading.sampling_factor == 0 {
            return Err(ConfigError::Invalid("sampling_factor must be >= 1".into()));
        }
        if !(self.clustering.eps.is_finite() && self.clustering.eps > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "eps must be a positive number, got {}",
                self.clustering.eps
            )));
        }
        if self.clustering.min_samples == 0 {
            return Err(ConfigError::Invalid("min_samples must be > 0".into()));
        }
        if self.clustering.chunk_size == Some(0) {
            return Err(ConfigError::Invalid("chunk_size must be > 0".into()));
        }
        if self.clustering.max_mbytes_per_batch == Some(0) {
            return Err(ConfigError::Invalid("max_mbytes_per_batch must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.view.sampling_fraction) {
            return Err(ConfigError::Invalid(format!(
                "sampling_fraction must be within [0, 1], got {}",
                self.view.sampling_fraction
            )));
        }
        Ok(())
    }
}
