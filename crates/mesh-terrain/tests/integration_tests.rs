//! End-to-end integration tests for mesh-terrain.
//!
//! These tests exercise the full pipeline from PLY decode -> classify ->
//! planes -> resample -> simplify -> smooth -> triangulate -> PLY write.

use std::path::Path;

use mesh_terrain::{
    ErrorKind, MeshingParams, PlyPointCloud, PointCloudSource, TerrainPipeline, inspect_cloud,
};
use tempfile::TempDir;

// =============================================================================
// Point cloud fixtures
// =============================================================================

const FULL_HEADER: &[&str] = &[
    "float x",
    "float y",
    "float z",
    "float nx",
    "float ny",
    "float nz",
    "uchar classification",
    "float heightaboveground",
];

fn write_ply(path: &Path, properties: &[&str], rows: &[String]) {
    let mut text = String::from("ply\nformat ascii 1.0\n");
    text.push_str(&format!("element vertex {}\n", rows.len()));
    for p in properties {
        text.push_str(&format!("property {}\n", p));
    }
    text.push_str("end_header\n");
    for row in rows {
        text.push_str(row);
        text.push('\n');
    }
    std::fs::write(path, text).unwrap();
}

fn row(x: f64, y: f64, z: f64, class: u8, hag: f64) -> String {
    format!("{} {} {} 0 0 1 {} {}", x, y, z, class, hag)
}

/// `n` x `n` ground points with unit spacing at height `z`.
fn ground_rows(n: usize, z: f64) -> Vec<String> {
    let mut rows = Vec::new();
    for i in 0..n {
        for j in 0..n {
            rows.push(row(i as f64, j as f64, z, 2, 0.0));
        }
    }
    rows
}

fn read_face_lines(path: &Path) -> (usize, usize, Vec<[u32; 3]>) {
    let text = std::fs::read_to_string(path).unwrap();
    let mut lines = text.lines();
    let mut vertices = 0;
    let mut faces = 0;
    for line in lines.by_ref() {
        if let Some(n) = line.strip_prefix("element vertex ") {
            vertices = n.parse().unwrap();
        } else if let Some(n) = line.strip_prefix("element face ") {
            faces = n.parse().unwrap();
        } else if line == "end_header" {
            break;
        }
    }
    let face_list = lines
        .skip(vertices)
        .map(|l| {
            let v: Vec<u32> = l.split_whitespace().map(|t| t.parse().unwrap()).collect();
            assert_eq!(v[0], 3);
            [v[1], v[2], v[3]]
        })
        .collect();
    (vertices, faces, face_list)
}

// =============================================================================
// End-to-end scenarios
// =============================================================================

#[test]
fn test_flat_grid_end_to_end() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("points.ply");
    let output = dir.path().join("odm_25dmesh.ply");
    write_ply(&input, FULL_HEADER, &ground_rows(11, 0.0));

    let outcome = TerrainPipeline::new(MeshingParams::default())
        .run_file(&input, &output)
        .unwrap();

    assert!(outcome.mesh.face_count() >= 1);
    assert!(outcome.mesh.vertices.iter().all(|v| v.z.abs() < 1e-6));
    assert!(outcome.mesh.validate_indices().is_ok());
    assert_eq!(outcome.report.classification.ground, 121);
    assert_eq!(outcome.report.classification.dropped, 0);

    let (vertices, faces, face_list) = read_face_lines(&output);
    assert_eq!(vertices, outcome.mesh.vertex_count());
    assert_eq!(faces, outcome.mesh.face_count());
    assert_eq!(face_list, outcome.mesh.faces);
}

#[test]
fn test_two_points_is_insufficient_data() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("points.ply");
    let output = dir.path().join("out.ply");
    write_ply(
        &input,
        FULL_HEADER,
        &[row(0.0, 0.0, 0.0, 2, 0.0), row(1.0, 0.0, 0.0, 2, 0.0)],
    );

    let err = TerrainPipeline::default()
        .run_file(&input, &output)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientData);
    assert!(!output.exists(), "no mesh is written on failure");
}

#[test]
fn test_missing_x_is_input_error() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("points.ply");
    write_ply(
        &input,
        &["float y", "float z", "float nx", "float ny", "float nz"],
        &["0 0 0 0 1".to_string(), "1 0 0 0 1".to_string()],
    );

    let err = TerrainPipeline::default()
        .run_file(&input, dir.path().join("out.ply"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Input);
}

#[test]
fn test_flip_faces_reverses_winding() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("points.ply");
    // Level ground: when several points share a grid cell the first one is
    // kept in both modes, so both runs see the same vertices.
    write_ply(&input, FULL_HEADER, &ground_rows(12, 0.5));

    let plain = TerrainPipeline::new(MeshingParams::default())
        .run_file(&input, dir.path().join("plain.ply"))
        .unwrap();
    let flipped = TerrainPipeline::new(MeshingParams {
        flip_faces: true,
        ..Default::default()
    })
    .run_file(&input, dir.path().join("flipped.ply"))
    .unwrap();

    assert_eq!(plain.report.grid, flipped.report.grid);
    assert_eq!(plain.mesh.vertices, flipped.mesh.vertices);
    assert_eq!(plain.mesh.face_count(), flipped.mesh.face_count());
    for (a, b) in plain.mesh.faces.iter().zip(&flipped.mesh.faces) {
        assert_eq!([a[2], a[1], a[0]], *b);
    }
}

#[test]
fn test_missing_optional_fields_treat_all_as_ground() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("points.ply");
    let rows: Vec<String> = (0..8)
        .flat_map(|i| (0..8).map(move |j| format!("{} {} 1.5 0 0 1", i, j)))
        .collect();
    write_ply(
        &input,
        &["float x", "float y", "float z", "float nx", "float ny", "float nz"],
        &rows,
    );

    let outcome = TerrainPipeline::default()
        .run_file(&input, dir.path().join("out.ply"))
        .unwrap();
    assert_eq!(outcome.report.classification.ground, 64);
    assert!(!outcome.report.classification.used_classification);
    assert!(outcome.report.warnings().count() >= 2);
    assert!(
        outcome
            .mesh
            .vertices
            .iter()
            .all(|v| (v.z - 1.5).abs() < 1e-6)
    );
}

#[test]
fn test_roof_is_promoted_to_ground() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("points.ply");
    let mut rows = ground_rows(40, 0.0);
    for i in 0..25 {
        for j in 0..25 {
            rows.push(row(8.0 + i as f64, 8.0 + j as f64, 5.0, 6, 5.0));
        }
    }
    write_ply(&input, FULL_HEADER, &rows);

    let outcome = TerrainPipeline::default()
        .run_file(&input, dir.path().join("out.ply"))
        .unwrap();

    assert_eq!(outcome.report.classification.non_ground, 625);
    assert_eq!(outcome.report.planes.planes.len(), 1);
    assert!(outcome.report.planes.promoted >= 500);
    let top = outcome
        .mesh
        .vertices
        .iter()
        .map(|v| v.z)
        .fold(f64::NEG_INFINITY, f64::max);
    assert!(top > 4.0, "roof elevation lost: {}", top);
}

#[test]
fn test_vertex_budget_caps_output() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("points.ply");
    write_ply(&input, FULL_HEADER, &ground_rows(20, 0.0));

    let outcome = TerrainPipeline::new(MeshingParams {
        max_vertex_count: 50,
        wlop_iterations: 3,
        ..Default::default()
    })
    .run_file(&input, dir.path().join("out.ply"))
    .unwrap();
    assert!(outcome.mesh.vertex_count() <= 50);
    assert_eq!(outcome.report.simplification.output, outcome.mesh.vertex_count());
}

#[test]
fn test_unwritable_output_is_output_error() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("points.ply");
    write_ply(&input, FULL_HEADER, &ground_rows(8, 0.0));

    let err = TerrainPipeline::default()
        .run_file(&input, dir.path().join("missing").join("out.ply"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Output);
}

// =============================================================================
// Inspection and configuration
// =============================================================================

#[test]
fn test_inspect_reports_fields_and_counts() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("points.ply");
    let mut rows = ground_rows(4, 0.0);
    rows.push(row(10.0, 10.0, 3.0, 5, 3.0));
    rows.push(row(11.0, 10.0, 0.5, 5, 0.5));
    write_ply(&input, FULL_HEADER, &rows);

    let cloud = PlyPointCloud::new(&input).decode().unwrap();
    let summary = inspect_cloud(&cloud).unwrap();
    assert_eq!(summary.points, 18);
    assert_eq!(summary.classification.ground, 16);
    assert_eq!(summary.classification.non_ground, 1);
    assert_eq!(summary.classification.dropped, 1);
    assert_eq!(summary.bounds, Some([[0.0, 0.0, 0.0], [11.0, 10.0, 3.0]]));
}

#[test]
fn test_params_from_toml_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("terrain.toml");
    std::fs::write(
        &path,
        "max_vertex_count = 2500\nwlop_iterations = 4000\nflip_faces = true\n",
    )
    .unwrap();

    let params = MeshingParams::from_toml_file(&path).unwrap();
    assert_eq!(params.max_vertex_count, 2500);
    assert!(params.flip_faces);
    assert_eq!(params.normalized().wlop_iterations, 1000);

    let err = MeshingParams::from_toml_file(dir.path().join("absent.toml")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}
