//! Command-line interface for the LiDAR pipeline.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::{ColorScheme, ColorSpec, OutputFormat};
use crate::core::loaders::{self, ClusteredRow, LasSource, PointSource};
use crate::core::writers;
use crate::processors::assembly::{assemble, summarize, ClusterSummary};
use crate::processors::chunking::ChunkedClusterer;
use crate::visualization;
use crate::PipelineConfig;

#[derive(Parser)]
#[command(name = "lidar-pipeline")]
#[command(about = "Bounded-memory LAS loading and chunked DBSCAN clustering", version)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Loading flags shared by `load` and `cluster`.
#[derive(clap::Args)]
struct LoadArgs {
    /// Input LAS file
    #[arg(env = "LAS_FILE_PATH")]
    input: PathBuf,
    /// Source records decoded per block
    #[arg(long)]
    block_size: Option<usize>,
    /// Keep every Nth record within each block
    #[arg(short, long)]
    sampling_factor: Option<usize>,
    /// Keep only the first N loaded points
    #[arg(long)]
    max_points: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a LAS file and report what was read
    Load {
        #[command(flatten)]
        load: LoadArgs,
        /// Render the loaded points to this PNG, colored by elevation
        #[arg(long)]
        preview: Option<PathBuf>,
    },

    /// Load, cluster with chunked DBSCAN and write the labeled rows
    Cluster {
        #[command(flatten)]
        load: LoadArgs,
        /// Output file (.parquet or .csv)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Output format, inferred from the extension when omitted
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
        /// Neighbourhood radius
        #[arg(long)]
        eps: Option<f64>,
        /// Minimum neighbourhood size for a core point
        #[arg(long)]
        min_samples: Option<usize>,
        /// Points per independently clustered chunk
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Memory cap for one neighbour-query batch, in megabytes
        #[arg(long)]
        max_mbytes_per_batch: Option<usize>,
        /// Cluster chunks in parallel
        #[arg(long)]
        parallel: bool,
        /// Number of leading rows to print
        #[arg(long, default_value_t = 5)]
        head: usize,
    },

    /// Render a clustered Parquet file as a 3-D scatter (PNG)
    View {
        /// Clustered Parquet file
        parquet_file: PathBuf,
        /// Output PNG file path (defaults to same name as input with .png extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Draw points labeled as noise
        #[arg(long)]
        show_noise: bool,
        /// Fraction of rows to draw (0.0 to 1.0)
        #[arg(long)]
        sampling_fraction: Option<f64>,
        /// Named palette (viridis, magma, plasma, inferno, ylorrd, tab)
        #[arg(long, conflicts_with = "colors")]
        palette: Option<String>,
        /// Explicit colors cycled by label, e.g. red,#00ff00,blue
        #[arg(long, value_delimiter = ',')]
        colors: Vec<String>,
        /// Marker radius in pixels
        #[arg(long)]
        point_size: Option<u32>,
        /// Seed for the row sample
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Write the default configuration as YAML
    InitConfig {
        /// Destination file
        #[arg(default_value = "config.yaml")]
        path: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Create a spinner for indeterminate operations
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Print a summary box
fn print_summary(title: &str, items: &[(&str, String)]) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ {:<62} ║", title);
    println!("╠══════════════════════════════════════════════════════════════╣");
    for (key, value) in items {
        let display_value = if value.chars().count() > 39 {
            format!("{}...", value.chars().take(36).collect::<String>())
        } else {
            value.clone()
        };
        println!("║ {:<20}: {:<39} ║", key, display_value);
    }
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}

fn print_head(rows: &[ClusteredRow], n: usize) {
    if n == 0 || rows.is_empty() {
        return;
    }
    println!("{:>14} {:>14} {:>12} {:>14}", "x", "y", "z", "cluster_label");
    for row in rows.iter().take(n) {
        println!(
            "{:>14.3} {:>14.3} {:>12.3} {:>14}",
            row.x, row.y, row.z, row.cluster_label
        );
    }
}

fn summary_items(summary: &ClusterSummary) -> Vec<(&'static str, String)> {
    let largest = summary
        .largest(3)
        .iter()
        .map(|(label, count)| format!("{}:{}", label, count))
        .collect::<Vec<_>>()
        .join(" ");
    vec![
        ("Rows", summary.points.to_string()),
        ("Clusters", summary.clusters.to_string()),
        ("Noise points", summary.noise.to_string()),
        ("Largest clusters", largest),
    ]
}

pub fn run() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity (must come first)
    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .format_timestamp_secs()
        .init();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Load { load, preview } => cmd_load(load, preview, config),
        Commands::Cluster {
            load,
            output,
            format,
            eps,
            min_samples,
            chunk_size,
            max_mbytes_per_batch,
            parallel,
            head,
        } => {
            let mut config = config;
            if let Some(output) = output {
                config.output.path = output;
            }
            config.output.format = format.or(config.output.format);
            config.clustering.eps = eps.unwrap_or(config.clustering.eps);
            config.clustering.min_samples = min_samples.unwrap_or(config.clustering.min_samples);
            config.clustering.chunk_size = chunk_size.or(config.clustering.chunk_size);
            config.clustering.max_mbytes_per_batch =
                max_mbytes_per_batch.or(config.clustering.max_mbytes_per_batch);
            config.clustering.parallel_chunks |= parallel;
            cmd_cluster(load, head, config)
        }
        Commands::View {
            parquet_file,
            output,
            show_noise,
            sampling_fraction,
            palette,
            colors,
            point_size,
            seed,
        } => {
            let mut config = config;
            let view = &mut config.view;
            view.show_noise |= show_noise;
            view.sampling_fraction = sampling_fraction.unwrap_or(view.sampling_fraction);
            view.point_size = point_size.unwrap_or(view.point_size);
            view.seed = seed.or(view.seed);
            if let Some(palette) = palette {
                view.color_scheme = ColorScheme::Palette(palette);
            } else if !colors.is_empty() {
                view.color_scheme =
                    ColorScheme::Colors(colors.into_iter().map(ColorSpec::Name).collect());
            }
            cmd_view(&parquet_file, output, config)
        }
        Commands::InitConfig { path, force } => cmd_init_config(&path, force),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

/// Read the `--config` file, or fall back to defaults when none is given.
///
/// A config file that cannot be read, parsed or validated is an error.
fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => {
            let config = PipelineConfig::from_yaml(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?;
            info!("Loaded config from: {}", path.display());
            Ok(config)
        }
        None => Ok(PipelineConfig::default()),
    }
}

/// Apply loading flag overrides and validate the result.
fn resolve_loading(load: &LoadArgs, mut config: PipelineConfig) -> Result<PipelineConfig> {
    config.loading.block_size = load.block_size.unwrap_or(config.loading.block_size);
    config.loading.sampling_factor = load.sampling_factor.unwrap_or(config.loading.sampling_factor);
    config.loading.max_points = load.max_points.or(config.loading.max_points);
    config.validate().context("invalid parameters")?;
    Ok(config)
}

fn cmd_load(load: LoadArgs, preview: Option<PathBuf>, config: PipelineConfig) -> Result<()> {
    let start = Instant::now();
    let config = resolve_loading(&load, config)?;

    println!("Loading LAS file...");
    println!("Input: {}", load.input.display());
    println!("Block size: {}", config.loading.block_size);
    println!("Sampling factor: {}", config.loading.sampling_factor);

    let spinner = create_spinner("Reading point blocks...");
    let loaded = LasSource::open(&load.input).and_then(|mut source| {
        let total = source.total_points();
        loaders::load_with_config(&mut source, &config.loading).map(|points| (total, points))
    });
    spinner.finish_and_clear();
    let (total, points) =
        loaded.with_context(|| format!("failed to load {}", load.input.display()))?;

    let mut items = vec![
        ("Input file", load.input.display().to_string()),
        ("Points in file", total.to_string()),
        ("Points loaded", points.len().to_string()),
    ];

    if let Some(preview_path) = preview {
        let spinner = create_spinner("Rendering preview...");
        let drawn = visualization::plot_points(&preview_path, &points, &config.view);
        spinner.finish_and_clear();
        let drawn = drawn.context("preview rendering failed")?;
        items.push(("Preview PNG", preview_path.display().to_string()));
        items.push(("Points drawn", drawn.to_string()));
    }

    items.push(("Duration", format!("{:.2?}", start.elapsed())));
    print_summary("Load Complete", &items);
    Ok(())
}

fn cmd_cluster(load: LoadArgs, head: usize, config: PipelineConfig) -> Result<()> {
    let start = Instant::now();
    let config = resolve_loading(&load, config)?;
    let format = config.output.resolved_format();

    println!("Running chunked DBSCAN clustering...");
    println!("Input: {}", load.input.display());
    println!("Output: {} ({:?})", config.output.path.display(), format);
    println!("Parameters:");
    println!("  eps: {}", config.clustering.eps);
    println!("  min_samples: {}", config.clustering.min_samples);
    match config.clustering.chunk_size {
        Some(size) => println!("  chunk_size: {}", size),
        None => println!("  chunk_size: whole array"),
    }

    let spinner = create_spinner("Loading point blocks...");
    let loaded = LasSource::open(&load.input)
        .and_then(|mut source| loaders::load_with_config(&mut source, &config.loading));
    let points = match loaded {
        Ok(points) => points,
        Err(e) => {
            spinner.finish_and_clear();
            return Err(e).with_context(|| format!("failed to load {}", load.input.display()));
        }
    };
    let n_points = points.len();

    spinner.set_message(format!("Clustering {} points...", n_points));
    let clusterer = ChunkedClusterer::from_config(&config.clustering);
    let labels = match clusterer.cluster(&points) {
        Ok(labels) => labels,
        Err(e) => {
            spinner.finish_and_clear();
            return Err(e).context("clustering failed");
        }
    };

    spinner.set_message("Writing output...");
    let rows = assemble(points, labels).context("label assembly failed")?;
    let written = writers::write_rows(&config.output.path, &rows, format);
    spinner.finish_and_clear();
    written.with_context(|| format!("failed to write {}", config.output.path.display()))?;

    print_head(&rows, head);

    let summary = summarize(&rows);
    let mut items = vec![
        ("Input file", load.input.display().to_string()),
        ("Output file", config.output.path.display().to_string()),
    ];
    items.extend(summary_items(&summary));
    items.push(("eps", config.clustering.eps.to_string()));
    items.push(("min_samples", config.clustering.min_samples.to_string()));
    items.push(("Duration", format!("{:.2?}", start.elapsed())));
    print_summary("Clustering Complete", &items);
    Ok(())
}

fn cmd_view(parquet_file: &Path, output: Option<PathBuf>, config: PipelineConfig) -> Result<()> {
    let start = Instant::now();
    config.validate().context("invalid view options")?;

    // Default output path: same name as input with .png extension
    let output_path = output.unwrap_or_else(|| parquet_file.with_extension("png"));

    println!("Visualizing clustered points...");
    println!("Input: {}", parquet_file.display());
    println!("Output: {}", output_path.display());

    let spinner = create_spinner("Loading Parquet file...");
    let rows = match loaders::load_clustered_parquet(parquet_file) {
        Ok(rows) => rows,
        Err(e) => {
            spinner.finish_and_clear();
            return Err(e).with_context(|| format!("failed to read {}", parquet_file.display()));
        }
    };

    spinner.set_message("Generating plot...");
    let drawn = visualization::plot_clustered_rows(&output_path, &rows, &config.view);
    spinner.finish_and_clear();
    let drawn = drawn.context("visualization failed")?;

    print_summary(
        "Visualization Complete",
        &[
            ("Input file", parquet_file.display().to_string()),
            ("Output PNG", output_path.display().to_string()),
            ("Rows in file", rows.len().to_string()),
            ("Points drawn", drawn.to_string()),
            ("Show noise", config.view.show_noise.to_string()),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
    Ok(())
}

fn cmd_init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    PipelineConfig::default()
        .to_yaml(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}
