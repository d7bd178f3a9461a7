//! 2.5D terrain mesh reconstruction from classified, oriented point clouds.
//!
//! Takes a dense point cloud (typically photogrammetry output with
//! per-point normals, ground classification and height above ground) and
//! produces a height-field triangle mesh suitable as a digital surface
//! model.
//!
//! # Pipeline
//!
//! - **Classify**: split points into ground (class 2 below 1 m above
//!   ground) and non-ground (1 m or more above ground). Without the
//!   optional fields every point counts as ground.
//! - **Detect planes**: find planar clusters among non-ground points
//!   (roofs, decks) and promote them to ground; the rest is dropped.
//! - **Resample**: rasterise onto a grid at half the average spacing,
//!   keeping the highest point per cell (lowest when faces are flipped),
//!   and replace elevation outliers by their neighbourhood mean.
//! - **Simplify**: WLOP toward the vertex budget.
//! - **Smooth**: five passes of jet smoothing.
//! - **Triangulate**: Delaunay triangulation of the xy projection.
//!
//! # Coordinate System
//!
//! Right-handed with Z up. Faces wind counter-clockwise seen from +Z, or
//! clockwise with `flip_faces`.
//!
//! # Quick Start
//!
//! ```no_run
//! use mesh_terrain::{MeshingParams, TerrainPipeline};
//!
//! let pipeline = TerrainPipeline::new(MeshingParams::default());
//! let outcome = pipeline.run_file("points.ply", "odm_25dmesh.ply").unwrap();
//!
//! println!(
//!     "{} vertices, {} faces",
//!     outcome.report.vertices, outcome.report.faces
//! );
//! for warning in outcome.report.warnings() {
//!     eprintln!("{}", warning.message);
//! }
//! ```
//!
//! # Custom stages
//!
//! ```
//! use mesh_terrain::{MeshingParams, TerrainPipeline};
//! use mesh_terrain::planes::{EfficientRansac, RansacParams};
//!
//! let detector = EfficientRansac::new(7).with_params(RansacParams {
//!     min_points: 200,
//!     ..Default::default()
//! });
//! let pipeline = TerrainPipeline::new(MeshingParams::default()).with_plane_detector(detector);
//! assert_eq!(pipeline.params().wlop_iterations, 10);
//! ```

mod error;
mod pipeline;
mod types;

pub mod classify;
pub mod context;
pub mod grid;
pub mod io;
pub mod planes;
pub mod pointcloud;
pub mod record;
pub mod simplify;
pub mod smooth;
pub mod tracing_ext;
pub mod triangulate;

pub use error::{ErrorCode, ErrorKind, RecoverySuggestion, TerrainError, TerrainResult};
pub use types::{PointSet, TerrainMesh, TerrainPoint, bounds_of};

pub use pipeline::{
    CloudSummary, DEFAULT_MAX_VERTEX_COUNT, DEFAULT_SEED, DEFAULT_WLOP_ITERATIONS,
    MAX_WLOP_ITERATIONS, MeshingOutcome, MeshingParams, MeshingReport, TerrainPipeline,
    inspect_cloud,
};

pub use classify::{ClassificationReport, PointClassifier};
pub use context::{EventLevel, MeshingContext, Stage, StageEvent, StageTiming};
pub use grid::{GridResampleReport, GridResampler};
pub use io::{DEFAULT_OUTPUT, MeshSink, PlyMeshWriter, PlyPointCloud, save_mesh_ply, write_mesh_ply};
pub use planes::{EfficientRansac, PlaneDetection, PlaneDetectionReport};
pub use record::{DecodedCloud, FieldSchema, FieldWidth, PointCloudSource, RawPointRecord};
pub use simplify::{PointSimplification, SimplificationReport, WlopSimplifier};
pub use smooth::{JetSmoother, SurfaceSmoothing};
pub use triangulate::{DelaunayTriangulator, Triangulation};
