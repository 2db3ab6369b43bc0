//! Visualization tools for clustered point data.
//!
//! This module renders 3-D scatter plots of point clouds to PNG using the
//! plotters library. Clustered rows are colored by label through a
//! [`ColorScheme`]; unlabeled clouds are colored by elevation.

use std::collections::BTreeSet;
use std::path::Path;

use log::{debug, info};
use plotters::prelude::*;
use plotters_bitmap::BitMapBackend;
use thiserror::Error;

use crate::config::{ColorScheme, ColorSpec, ViewConfig};
use crate::core::loaders::{ClusteredRow, PointArray, NOISE_LABEL};
use crate::core::transforms::random_sample_indices;

/// Errors that can occur during visualization.
#[derive(Error, Debug)]
pub enum VisualizationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Plotting error: {0}")]
    PlottingError(String),

    #[error("unknown palette '{0}' (expected viridis, magma, plasma, inferno, ylorrd or tab)")]
    UnknownPalette(String),

    #[error("unknown color '{0}'")]
    UnknownColor(String),

    #[error("sampling fraction must be within [0, 1], got {0}")]
    InvalidSamplingFraction(f64),
}

/// Result type for visualization operations.
pub type Result<T> = std::result::Result<T, VisualizationError>;

/// Color palette for cluster visualization.
const CLUSTER_COLORS: &[(u8, u8, u8)] = &[
    (228, 26, 28),   // Red
    (55, 126, 184),  // Blue
    (77, 175, 74),   // Green
    (152, 78, 163),  // Purple
    (255, 127, 0),   // Orange
    (255, 255, 51),  // Yellow
    (166, 86, 40),   // Brown
    (247, 129, 191), // Pink
    (153, 153, 153), // Gray
    (0, 206, 209),   // Turquoise
    (138, 43, 226),  // Blue Violet
    (50, 205, 50),   // Lime Green
    (255, 20, 147),  // Deep Pink
    (0, 191, 255),   // Deep Sky Blue
    (255, 215, 0),   // Gold
];

/// Noise color (gray) for unclustered points (label = -1).
const NOISE_COLOR: (u8, u8, u8) = (128, 128, 128);

// Evenly spaced stops of the continuous palettes.
const VIRIDIS: &[(u8, u8, u8)] = &[(68, 1, 84), (59, 82, 139), (33, 145, 140), (94, 201, 98), (253, 231, 37)];
const MAGMA: &[(u8, u8, u8)] = &[(0, 0, 4), (81, 18, 124), (183, 55, 121), (252, 137, 97), (252, 253, 191)];
const PLASMA: &[(u8, u8, u8)] = &[(13, 8, 135), (126, 3, 168), (204, 71, 120), (248, 149, 64), (240, 249, 33)];
const INFERNO: &[(u8, u8, u8)] = &[(0, 0, 4), (87, 16, 110), (188, 55, 84), (249, 142, 9), (252, 255, 164)];
const YLORRD: &[(u8, u8, u8)] = &[(255, 255, 204), (254, 217, 118), (253, 141, 60), (227, 26, 28), (128, 0, 38)];

const NAMED_COLORS: &[(&str, (u8, u8, u8))] = &[
    ("black", (0, 0, 0)),
    ("white", (255, 255, 255)),
    ("gray", (128, 128, 128)),
    ("grey", (128, 128, 128)),
    ("darkgray", (169, 169, 169)),
    ("lightgray", (211, 211, 211)),
    ("silver", (192, 192, 192)),
    ("red", (255, 0, 0)),
    ("maroon", (128, 0, 0)),
    ("green", (0, 128, 0)),
    ("lime", (0, 255, 0)),
    ("blue", (0, 0, 255)),
    ("navy", (0, 0, 128)),
    ("yellow", (255, 255, 0)),
    ("gold", (255, 215, 0)),
    ("olive", (128, 128, 0)),
    ("cyan", (0, 255, 255)),
    ("teal", (0, 128, 128)),
    ("magenta", (255, 0, 255)),
    ("purple", (128, 0, 128)),
    ("orange", (255, 165, 0)),
    ("brown", (165, 42, 42)),
    ("pink", (255, 192, 203)),
];

fn rgb((r, g, b): (u8, u8, u8)) -> RGBColor {
    RGBColor(r, g, b)
}

/// Resolve a color name, `#rrggbb` string or `[r, g, b]` float triple.
pub fn resolve_color(spec: &ColorSpec) -> Result<RGBColor> {
    match spec {
        ColorSpec::Name(name) => parse_color_name(name),
        ColorSpec::Rgb(channels) => {
            if channels.iter().any(|c| !(0.0..=1.0).contains(c)) {
                return Err(VisualizationError::UnknownColor(format!("{:?}", channels)));
            }
            let [r, g, b] = channels.map(|c| (c * 255.0).round() as u8);
            Ok(RGBColor(r, g, b))
        }
    }
}

fn parse_color_name(name: &str) -> Result<RGBColor> {
    let unknown = || VisualizationError::UnknownColor(name.to_string());
    let trimmed = name.trim();

    if let Some(hex) = trimmed.strip_prefix('#') {
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(unknown());
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| unknown());
        return Ok(RGBColor(channel(0)?, channel(2)?, channel(4)?));
    }

    let lower = trimmed.to_ascii_lowercase();
    NAMED_COLORS
        .iter()
        .find(|(n, _)| *n == lower)
        .map(|&(_, c)| rgb(c))
        .ok_or_else(unknown)
}

/// Sample a color-stop table at `t` in `[0, 1]` with linear interpolation.
fn interpolate(stops: &[(u8, u8, u8)], t: f64) -> RGBColor {
    let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
    let scaled = t * (stops.len() - 1) as f64;
    let i = (scaled.floor() as usize).min(stops.len() - 2);
    let frac = scaled - i as f64;
    let lerp = |a: u8, b: u8| (f64::from(a) + (f64::from(b) - f64::from(a)) * frac).round() as u8;
    let (a, b) = (stops[i], stops[i + 1]);
    RGBColor(lerp(a.0, b.0), lerp(a.1, b.1), lerp(a.2, b.2))
}

#[derive(Debug, Clone, Copy)]
enum Palette {
    Continuous(&'static [(u8, u8, u8)]),
    Qualitative,
}

fn palette_by_name(name: &str) -> Result<Palette> {
    match name.to_ascii_lowercase().as_str() {
        "viridis" => Ok(Palette::Continuous(VIRIDIS)),
        "magma" => Ok(Palette::Continuous(MAGMA)),
        "plasma" => Ok(Palette::Continuous(PLASMA)),
        "inferno" => Ok(Palette::Continuous(INFERNO)),
        "ylorrd" => Ok(Palette::Continuous(YLORRD)),
        "tab" => Ok(Palette::Qualitative),
        _ => Err(VisualizationError::UnknownPalette(name.to_string())),
    }
}

fn qualitative(label: i32) -> RGBColor {
    if label < 0 {
        rgb(NOISE_COLOR)
    } else {
        rgb(CLUSTER_COLORS[label as usize % CLUSTER_COLORS.len()])
    }
}

/// Label to color mapping resolved from a [`ColorScheme`].
#[derive(Debug, Clone)]
pub enum LabelColors {
    /// Continuous palette spread over `[min, max]` of the drawn labels
    Continuous {
        stops: &'static [(u8, u8, u8)],
        min: i32,
        max: i32,
    },
    Qualitative,
    /// Colors cycled by label
    Cycle(Vec<RGBColor>),
    /// Explicit mapping; labels missing from it are drawn in gray
    Map(Vec<(i32, RGBColor)>),
}

impl LabelColors {
    /// Resolve `scheme` for the given set of labels.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown palette or an unparseable color.
    pub fn new(scheme: &ColorScheme, labels: &BTreeSet<i32>) -> Result<Self> {
        match scheme {
            ColorScheme::Palette(name) => match palette_by_name(name)? {
                Palette::Continuous(stops) => Ok(LabelColors::Continuous {
                    stops,
                    min: labels.first().copied().unwrap_or(0),
                    max: labels.last().copied().unwrap_or(0),
                }),
                Palette::Qualitative => Ok(LabelColors::Qualitative),
            },
            ColorScheme::Colors(specs) => {
                let colors = specs.iter().map(resolve_color).collect::<Result<Vec<_>>>()?;
                if colors.is_empty() {
                    return Ok(LabelColors::Qualitative);
                }
                Ok(LabelColors::Cycle(colors))
            }
            ColorScheme::Custom(map) => {
                let entries = map
                    .iter()
                    .map(|(&label, spec)| Ok((label, resolve_color(spec)?)))
                    .collect::<Result<Vec<_>>>()?;
                Ok(LabelColors::Map(entries))
            }
        }
    }

    pub fn color(&self, label: i32) -> RGBColor {
        match self {
            LabelColors::Continuous { stops, min, max } => {
                let span = f64::from(*max) - f64::from(*min);
                let t = if span > 0.0 {
                    (f64::from(label) - f64::from(*min)) / span
                } else {
                    0.0
                };
                interpolate(stops, t)
            }
            LabelColors::Qualitative => qualitative(label),
            LabelColors::Cycle(colors) => {
                colors[label.rem_euclid(colors.len() as i32) as usize]
            }
            LabelColors::Map(entries) => entries
                .iter()
                .find(|(l, _)| *l == label)
                .map(|&(_, c)| c)
                .unwrap_or_else(|| rgb(NOISE_COLOR)),
        }
    }
}

/// Apply the noise filter and random row sampling of `options`.
///
/// Noise rows are dropped unless `show_noise` is set. Then
/// `round(sampling_fraction * n)` rows are kept at random, in their original
/// order.
pub fn prepare_rows(rows: &[ClusteredRow], options: &ViewConfig) -> Result<Vec<ClusteredRow>> {
    let fraction = options.sampling_fraction;
    if !(0.0..=1.0).contains(&fraction) {
        return Err(VisualizationError::InvalidSamplingFraction(fraction));
    }

    let visible: Vec<ClusteredRow> = rows
        .iter()
        .filter(|r| options.show_noise || !r.is_noise())
        .copied()
        .collect();

    if fraction >= 1.0 {
        return Ok(visible);
    }

    Ok(random_sample_indices(visible.len(), fraction, options.seed)
        .into_iter()
        .map(|i| visible[i])
        .collect())
}

/// Render clustered rows as a 3-D scatter PNG.
///
/// Returns the number of points drawn. An empty row set still produces an
/// image containing only the background and grid.
///
/// # Arguments
///
/// * `output_path` - Path to save the PNG image
/// * `rows` - Clustered rows, typically read back from Parquet
/// * `options` - Noise toggle, sampling, colors, marker size and projection
pub fn plot_clustered_rows(
    output_path: &Path,
    rows: &[ClusteredRow],
    options: &ViewConfig,
) -> Result<usize> {
    let rows = prepare_rows(rows, options)?;
    let labels: BTreeSet<i32> = rows.iter().map(|r| r.cluster_label).collect();
    let colors = LabelColors::new(&options.color_scheme, &labels)?;
    debug!(
        "Drawing {} rows with {} distinct labels ({} noise shown)",
        rows.len(),
        labels.len(),
        if labels.contains(&NOISE_LABEL) { "with" } else { "no" }
    );

    let points: Vec<([f64; 3], RGBColor)> = rows
        .iter()
        .map(|r| (r.coords(), colors.color(r.cluster_label)))
        .collect();

    render_scatter(output_path, &points, options)?;
    info!("Rendered {} points to {}", points.len(), output_path.display());
    Ok(points.len())
}

/// Render an unlabeled point array as a 3-D scatter PNG colored by elevation.
///
/// Uses the continuous palette named in `options` (viridis when the scheme is
/// not a continuous palette). Noise filtering does not apply; row sampling
/// does.
pub fn plot_points(output_path: &Path, points: &PointArray, options: &ViewConfig) -> Result<usize> {
    let fraction = options.sampling_fraction;
    if !(0.0..=1.0).contains(&fraction) {
        return Err(VisualizationError::InvalidSamplingFraction(fraction));
    }

    let stops = match &options.color_scheme {
        ColorScheme::Palette(name) => match palette_by_name(name)? {
            Palette::Continuous(stops) => stops,
            Palette::Qualitative => VIRIDIS,
        },
        _ => VIRIDIS,
    };

    let coords = points.as_slice();
    let indices = random_sample_indices(coords.len(), fraction, options.seed);
    let (z_min, z_max) = indices.iter().fold((f64::MAX, f64::MIN), |(lo, hi), &i| {
        (lo.min(coords[i][2]), hi.max(coords[i][2]))
    });
    let span = z_max - z_min;

    let colored: Vec<([f64; 3], RGBColor)> = indices
        .iter()
        .map(|&i| {
            let t = if span > 0.0 { (coords[i][2] - z_min) / span } else { 0.0 };
            (coords[i], interpolate(stops, t))
        })
        .collect();

    render_scatter(output_path, &colored, options)?;
    info!("Rendered {} points to {}", colored.len(), output_path.display());
    Ok(colored.len())
}

fn render_scatter(
    output_path: &Path,
    points: &[([f64; 3], RGBColor)],
    options: &ViewConfig,
) -> Result<()> {
    let background = resolve_color(&options.background)?;
    let (x_range, y_range, z_range) = compute_bounds(points);

    let root = BitMapBackend::new(output_path, (options.width, options.height)).into_drawing_area();

    root.fill(&background)
        .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    // plotters' 3-D y axis is vertical, so elevation goes there
    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .build_cartesian_3d(x_range, z_range, y_range)
        .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    let (yaw, pitch) = (options.yaw, options.pitch);
    chart.with_projection(|mut pb| {
        pb.yaw = yaw;
        pb.pitch = pitch;
        pb.scale = 0.9;
        pb.into_matrix()
    });

    if options.show_grid {
        // no tick labels: font rendering is not available everywhere
        chart
            .configure_axes()
            .x_labels(0)
            .y_labels(0)
            .z_labels(0)
            .light_grid_style(BLACK.mix(0.15))
            .max_light_lines(4)
            .draw()
            .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;
    }

    let size = options.point_size.max(1);
    chart
        .draw_series(
            points
                .iter()
                .map(|&([x, y, z], color)| Circle::new((x, z, y), size, color.filled())),
        )
        .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    root.present()
        .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    Ok(())
}

type AxisRange = std::ops::Range<f64>;

/// Compute padded per-axis ranges of the points.
fn compute_bounds(points: &[([f64; 3], RGBColor)]) -> (AxisRange, AxisRange, AxisRange) {
    let mut min = [f64::MAX; 3];
    let mut max = [f64::MIN; 3];

    for (p, _) in points {
        for axis in 0..3 {
            if p[axis] < min[axis] { min[axis] = p[axis]; }
            if p[axis] > max[axis] { max[axis] = p[axis]; }
        }
    }

    let range = |axis: usize| {
        if points.is_empty() {
            return -1.0..1.0;
        }
        let (mut lo, mut hi) = (min[axis], max[axis]);
        if (hi - lo).abs() < f64::EPSILON {
            lo -= 1.0;
            hi += 1.0;
        }
        let padding = (hi - lo) * 0.05;
        (lo - padding)..(hi + padding)
    };

    (range(0), range(1), range(2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn row(x: f64, label: i32) -> ClusteredRow {
        ClusteredRow { x, y: x * 2.0, z: x * 0.5, cluster_label: label }
    }

    fn test_rows() -> Vec<ClusteredRow> {
        vec![row(0.0, 0), row(1.0, -1), row(2.0, 1), row(3.0, 0), row(4.0, -1), row(5.0, 2)]
    }

    fn small_view() -> ViewConfig {
        ViewConfig {
            width: 320,
            height: 240,
            show_grid: false,
            ..ViewConfig::default()
        }
    }

    #[test]
    fn test_resolve_named_and_hex_colors() {
        let red = resolve_color(&ColorSpec::Name("Red".into())).unwrap();
        assert_eq!(red, RGBColor(255, 0, 0));
        let hex = resolve_color(&ColorSpec::Name("#1a2B3c".into())).unwrap();
        assert_eq!(hex, RGBColor(0x1a, 0x2b, 0x3c));
        let floats = resolve_color(&ColorSpec::Rgb([1.0, 0.5, 0.2])).unwrap();
        assert_eq!(floats, RGBColor(255, 128, 51));
    }

    #[test]
    fn test_resolve_invalid_colors() {
        for bad in ["chartreuse-ish", "#12345", "#gg0000"] {
            assert!(matches!(
                resolve_color(&ColorSpec::Name(bad.into())),
                Err(VisualizationError::UnknownColor(_))
            ));
        }
        assert!(resolve_color(&ColorSpec::Rgb([1.5, 0.0, 0.0])).is_err());
    }

    #[test]
    fn test_palette_endpoints() {
        assert_eq!(interpolate(VIRIDIS, 0.0), RGBColor(68, 1, 84));
        assert_eq!(interpolate(VIRIDIS, 1.0), RGBColor(253, 231, 37));
        assert_eq!(interpolate(YLORRD, 0.5), RGBColor(253, 141, 60));
        // out of range is clamped
        assert_eq!(interpolate(MAGMA, 7.0), interpolate(MAGMA, 1.0));
    }

    #[test]
    fn test_unknown_palette() {
        let labels = BTreeSet::from([0, 1]);
        let err = LabelColors::new(&ColorScheme::Palette("rainbow".into()), &labels).unwrap_err();
        assert!(matches!(err, VisualizationError::UnknownPalette(name) if name == "rainbow"));
    }

    #[test]
    fn test_continuous_palette_spans_labels() {
        let labels = BTreeSet::from([-1, 0, 3]);
        let colors = LabelColors::new(&ColorScheme::Palette("YlOrRd".into()), &labels).unwrap();
        assert_eq!(colors.color(-1), interpolate(YLORRD, 0.0));
        assert_eq!(colors.color(3), interpolate(YLORRD, 1.0));
    }

    #[test]
    fn test_color_list_cycles_by_label() {
        let scheme = ColorScheme::Colors(vec![
            ColorSpec::Name("red".into()),
            ColorSpec::Name("green".into()),
        ]);
        let colors = LabelColors::new(&scheme, &BTreeSet::new()).unwrap();
        assert_eq!(colors.color(0), RGBColor(255, 0, 0));
        assert_eq!(colors.color(1), RGBColor(0, 128, 0));
        assert_eq!(colors.color(2), RGBColor(255, 0, 0));
        assert_eq!(colors.color(-1), RGBColor(0, 128, 0));
    }

    #[test]
    fn test_custom_mapping() {
        let mut map = BTreeMap::new();
        map.insert(-1, ColorSpec::Name("gray".into()));
        map.insert(3, ColorSpec::Rgb([1.0, 0.5, 0.2]));
        let colors = LabelColors::new(&ColorScheme::Custom(map), &BTreeSet::new()).unwrap();
        assert_eq!(colors.color(3), RGBColor(255, 128, 51));
        assert_eq!(colors.color(-1), RGBColor(128, 128, 128));
        assert_eq!(colors.color(7), rgb(NOISE_COLOR));
    }

    #[test]
    fn test_tab_palette_uses_cluster_colors() {
        let colors = LabelColors::new(&ColorScheme::Palette("tab".into()), &BTreeSet::new()).unwrap();
        assert_eq!(colors.color(0), RGBColor(228, 26, 28));
        assert_eq!(colors.color(15), RGBColor(228, 26, 28));
        assert_eq!(colors.color(-1), rgb(NOISE_COLOR));
    }

    #[test]
    fn test_prepare_rows_filters_noise() {
        let rows = prepare_rows(&test_rows(), &ViewConfig::default()).unwrap();
        assert_eq!(rows.len(), 4);
        assert!(rows.iter().all(|r| !r.is_noise()));

        let with_noise = ViewConfig { show_noise: true, ..ViewConfig::default() };
        assert_eq!(prepare_rows(&test_rows(), &with_noise).unwrap().len(), 6);
    }

    #[test]
    fn test_prepare_rows_sampling() {
        let options = ViewConfig {
            show_noise: true,
            sampling_fraction: 0.5,
            seed: Some(42),
            ..ViewConfig::default()
        };
        let sampled = prepare_rows(&test_rows(), &options).unwrap();
        assert_eq!(sampled.len(), 3);
        // original order is kept
        assert!(sampled.windows(2).all(|w| w[0].x < w[1].x));
        assert_eq!(sampled, prepare_rows(&test_rows(), &options).unwrap());

        let none = ViewConfig { sampling_fraction: 0.0, ..ViewConfig::default() };
        assert!(prepare_rows(&test_rows(), &none).unwrap().is_empty());
    }

    #[test]
    fn test_prepare_rows_rejects_bad_fraction() {
        let options = ViewConfig { sampling_fraction: 1.5, ..ViewConfig::default() };
        assert!(matches!(
            prepare_rows(&test_rows(), &options),
            Err(VisualizationError::InvalidSamplingFraction(_))
        ));
    }

    #[test]
    fn test_compute_bounds_pads_flat_axes() {
        let points = vec![([1.0, 2.0, 3.0], RGBColor(0, 0, 0)), ([1.0, 4.0, 3.0], RGBColor(0, 0, 0))];
        let (x, y, z) = compute_bounds(&points);
        assert!(x.start < 0.0 && x.end > 2.0);
        assert!(y.start < 2.0 && y.end > 4.0);
        assert!(z.start < 2.0 && z.end > 4.0);
        assert_eq!(compute_bounds(&[]).0, -1.0..1.0);
    }

    #[test]
    fn test_plot_clustered_rows_writes_png() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clusters.png");

        let drawn = plot_clustered_rows(&path, &test_rows(), &small_view()).unwrap();

        assert_eq!(drawn, 4);
        assert!(path.exists());
    }

    #[test]
    fn test_plot_empty_rows_is_not_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.png");

        assert_eq!(plot_clustered_rows(&path, &[], &small_view()).unwrap(), 0);
        assert!(path.exists());
    }

    #[test]
    fn test_plot_points_by_elevation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("preview.png");
        let points = PointArray::from_coords(vec![[0.0, 0.0, 0.0], [1.0, 1.0, 5.0], [2.0, 0.5, 2.5]]);

        assert_eq!(plot_points(&path, &points, &small_view()).unwrap(), 3);
        assert!(path.exists());
    }
}
