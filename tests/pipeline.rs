//! End-to-end tests: LAS file in, labeled Parquet/CSV out.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use lidar_pipeline::config::{ClusteringConfig, LoadingConfig, OutputConfig, OutputFormat};
use lidar_pipeline::core::loaders::{load_clustered_parquet, load_las, InMemorySource};
use lidar_pipeline::core::transforms::Transforms;
use lidar_pipeline::processors::{
    assemble, run_pipeline, run_with_source, ChunkedClusterer, ClusterError, PipelineError,
};
use lidar_pipeline::{PipelineConfig, NOISE_LABEL};
use tempfile::tempdir;

/// Write an uncompressed LAS 1.2 file with point format 1 (28-byte records).
fn write_las(path: &Path, scale: f64, offset: f64, records: &[[i32; 3]]) {
    let header = las::raw::Header {
        version: las::Version::new(1, 2),
        header_size: 227,
        offset_to_point_data: 227,
        point_data_record_format: 1,
        point_data_record_length: 28,
        number_of_point_records: records.len() as u32,
        x_scale_factor: scale,
        y_scale_factor: scale,
        z_scale_factor: scale,
        x_offset: offset,
        y_offset: offset,
        z_offset: offset,
        ..Default::default()
    };

    let format = las::point::Format::new(1).unwrap();
    let mut file = File::create(path).unwrap();
    header.write_to(&mut file).unwrap();
    for &[x, y, z] in records {
        let point = las::raw::Point {
            x,
            y,
            z,
            gps_time: Some(0.0),
            ..Default::default()
        };
        point.write_to(&mut file, &format).unwrap();
    }
    file.flush().unwrap();
}

/// Two tight groups of 20 records each plus one far outlier, in raw units.
fn grouped_records() -> Vec<[i32; 3]> {
    let mut records = Vec::new();
    for i in 0..20 {
        records.push([i % 5, i / 5, 0]);
    }
    records.push([100_000, 100_000, 100_000]);
    for i in 0..20 {
        records.push([5_000 + i % 5, 5_000 + i / 5, 10]);
    }
    records
}

fn pipeline_config(output: &Path, chunk_size: Option<usize>) -> PipelineConfig {
    PipelineConfig {
        loading: LoadingConfig {
            block_size: 8,
            sampling_factor: 1,
            max_points: None,
        },
        clustering: ClusteringConfig {
            eps: 1.5,
            min_samples: 3,
            chunk_size,
            ..ClusteringConfig::default()
        },
        output: OutputConfig {
            path: output.to_path_buf(),
            format: None,
        },
        ..PipelineConfig::default()
    }
}

#[test]
fn las_to_parquet_end_to_end() {
    let dir = tempdir().unwrap();
    let las_path = dir.path().join("cloud.las");
    let out_path = dir.path().join("out").join("clustered.parquet");
    write_las(&las_path, 1.0, 0.0, &grouped_records());

    let report = run_pipeline(&las_path, &pipeline_config(&out_path, None)).unwrap();

    assert_eq!(report.total_points, 41);
    assert_eq!(report.format, OutputFormat::Parquet);
    assert_eq!(report.summary.points, 41);
    assert_eq!(report.summary.clusters, 2);
    assert_eq!(report.summary.noise, 1);

    let rows = load_clustered_parquet(&out_path).unwrap();
    assert_eq!(rows.len(), 41);
    assert!(rows[..20].iter().all(|r| r.cluster_label == 0));
    assert_eq!(rows[20].cluster_label, NOISE_LABEL);
    assert_eq!(rows[20].x, 100_000.0);
    assert!(rows[21..].iter().all(|r| r.cluster_label == 1));
}

#[test]
fn las_to_csv_by_extension() {
    let dir = tempdir().unwrap();
    let las_path = dir.path().join("cloud.las");
    let out_path = dir.path().join("clustered.csv");
    write_las(&las_path, 0.5, 10.0, &grouped_records());

    let mut config = pipeline_config(&out_path, None);
    config.clustering.eps = 0.8;
    let report = run_pipeline(&las_path, &config).unwrap();
    assert_eq!(report.format, OutputFormat::Csv);

    let content = std::fs::read_to_string(&out_path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines[0], "x,y,z,cluster_label");
    assert_eq!(lines.len(), 42);
    // raw (0, 0, 0) scaled by 0.5 and offset by 10
    assert_eq!(lines[1], "10.000000,10.000000,10.000000,0");
}

#[test]
fn chunked_run_resets_labels_but_keeps_noise() {
    let dir = tempdir().unwrap();
    let las_path = dir.path().join("cloud.las");
    let out_path = dir.path().join("clustered.parquet");
    write_las(&las_path, 1.0, 0.0, &grouped_records());

    // chunks [0,21) and [21,41): the outlier is the last point of chunk one
    let config = pipeline_config(&out_path, Some(21));
    run_pipeline(&las_path, &config).unwrap();

    let labels: Vec<i32> = load_clustered_parquet(&out_path)
        .unwrap()
        .iter()
        .map(|r| r.cluster_label)
        .collect();
    assert!(labels[..20].iter().all(|&l| l == 0));
    assert_eq!(labels[20], NOISE_LABEL);
    // the second group restarts at 0 inside its own chunk
    assert!(labels[21..].iter().all(|&l| l == 0));
}

#[test]
fn ten_points_in_two_chunks_are_all_zero() {
    let records: Vec<[i32; 3]> = (0..10).map(|i| [i, 0, 0]).collect();
    let mut source = InMemorySource::new(Transforms::default(), records);
    let mut config = pipeline_config(Path::new("unused.parquet"), Some(5));
    config.clustering.min_samples = 2;

    let rows = run_with_source(&mut source, &config).unwrap();

    assert_eq!(rows.len(), 10);
    assert!(rows.iter().all(|r| r.cluster_label == 0));
}

#[test]
fn block_stride_selects_expected_indices() {
    let dir = tempdir().unwrap();
    let las_path = dir.path().join("line.las");
    let records: Vec<[i32; 3]> = (0..10).map(|i| [i, 2 * i, 3 * i]).collect();
    write_las(&las_path, 1.0, 0.0, &records);

    let loading = LoadingConfig {
        block_size: 4,
        sampling_factor: 2,
        max_points: None,
    };
    let points = load_las(&las_path, &loading).unwrap();

    let xs: Vec<f64> = points.coords.iter().map(|p| p[0]).collect();
    assert_eq!(xs, vec![0.0, 2.0, 4.0, 6.0, 8.0]);
    assert_eq!(points.coords[2], [4.0, 8.0, 12.0]);
}

#[test]
fn empty_las_flows_through_every_stage() {
    let dir = tempdir().unwrap();
    let las_path = dir.path().join("empty.las");
    let out_path = dir.path().join("empty.parquet");
    write_las(&las_path, 0.01, 0.0, &[]);

    let points = load_las(&las_path, &LoadingConfig::default()).unwrap();
    assert!(points.is_empty());

    let labels = ChunkedClusterer::from_config(&ClusteringConfig::default())
        .cluster(&points)
        .unwrap();
    assert!(labels.is_empty());

    let rows = assemble(points, labels).unwrap();
    assert!(rows.is_empty());

    let report = run_pipeline(&las_path, &pipeline_config(&out_path, Some(3))).unwrap();
    assert_eq!(report.summary.points, 0);
    assert!(load_clustered_parquet(&out_path).unwrap().is_empty());
}

#[test]
fn zero_chunk_size_fails_without_output() {
    let dir = tempdir().unwrap();
    let las_path = dir.path().join("cloud.las");
    let out_path = dir.path().join("never.parquet");
    write_las(&las_path, 1.0, 0.0, &grouped_records());

    let points = load_las(&las_path, &LoadingConfig::default()).unwrap();
    let clusterer = ChunkedClusterer::from_config(&ClusteringConfig {
        chunk_size: Some(0),
        ..ClusteringConfig::default()
    });
    assert_eq!(clusterer.cluster(&points), Err(ClusterError::InvalidChunkSize));

    let result = run_pipeline(&las_path, &pipeline_config(&out_path, Some(0)));
    assert!(matches!(result, Err(PipelineError::Config(_))));
    assert!(!out_path.exists());
}
