//! End-to-end terrain meshing.
//!
//! [`TerrainPipeline`] runs the stages strictly in order:
//!
//! 1. classification into ground / non-ground
//! 2. plane detection, promoting planar non-ground clusters to ground
//! 3. grid resampling with outlier correction
//! 4. WLOP simplification toward the vertex budget
//! 5. jet smoothing
//! 6. Delaunay triangulation
//!
//! Plane detection, simplification, smoothing and triangulation are trait
//! objects and can be swapped through the builder setters.
//!
//! # Example
//!
//! ```no_run
//! use mesh_terrain::{MeshingParams, TerrainPipeline};
//!
//! let params = MeshingParams {
//!     max_vertex_count: 50_000,
//!     ..Default::default()
//! };
//! let outcome = TerrainPipeline::new(params)
//!     .run_file("points.ply", "odm_25dmesh.ply")
//!     .unwrap();
//! println!("{} faces", outcome.mesh.face_count());
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::classify::{ClassificationReport, ClassifiedPoints, PointClassifier};
use crate::context::{MeshingContext, Stage, StageEvent, StageTiming};
use crate::error::{TerrainError, TerrainResult};
use crate::grid::{GridResampleReport, GridResampler};
use crate::io::{MeshSink, PlyMeshWriter, PlyPointCloud};
use crate::planes::{EfficientRansac, PlaneDetection, PlaneDetectionReport, promote_planar_points};
use crate::record::{DecodedCloud, FieldSchema, PointCloudSource};
use crate::simplify::{
    PointSimplification, SimplificationReport, SimplificationRequest, WlopSimplifier,
    retain_percentage,
};
use crate::smooth::{JetSmoother, SurfaceSmoothing};
use crate::tracing_ext::{log_mesh_stats, log_point_set_stats};
use crate::triangulate::{DelaunayTriangulator, Triangulation};
use crate::types::{TerrainMesh, bounds_of};

/// Default simplification target.
pub const DEFAULT_MAX_VERTEX_COUNT: usize = 100_000;

/// Default WLOP rounds.
pub const DEFAULT_WLOP_ITERATIONS: u32 = 10;

/// Upper bound on WLOP rounds.
pub const MAX_WLOP_ITERATIONS: u32 = 1000;

/// Default sampling seed.
pub const DEFAULT_SEED: u64 = 0;

/// Parameters of a meshing run.
///
/// Deserialises from TOML with every field optional:
///
/// ```toml
/// max_vertex_count = 50000
/// wlop_iterations = 20
/// flip_faces = true
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MeshingParams {
    /// Upper bound on output vertices.
    pub max_vertex_count: usize,
    /// WLOP rounds, clamped to `[1, 1000]`.
    pub wlop_iterations: u32,
    /// Reverse triangle winding and keep the lowest point per grid cell.
    pub flip_faces: bool,
    /// Seed for plane sampling and the initial WLOP subset.
    pub seed: u64,
}

impl Default for MeshingParams {
    fn default() -> Self {
        Self {
            max_vertex_count: DEFAULT_MAX_VERTEX_COUNT,
            wlop_iterations: DEFAULT_WLOP_ITERATIONS,
            flip_faces: false,
            seed: DEFAULT_SEED,
        }
    }
}

impl MeshingParams {
    /// Copy with every field clamped into its valid range.
    #[must_use]
    pub fn normalized(self) -> Self {
        Self {
            wlop_iterations: self.wlop_iterations.clamp(1, MAX_WLOP_ITERATIONS),
            ..self
        }
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> TerrainResult<Self> {
        toml::from_str(toml_str)
            .map_err(|e| TerrainError::configuration(format!("invalid meshing config: {}", e)))
    }

    /// Load from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> TerrainResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            TerrainError::configuration(format!("cannot read config {:?}: {}", path, e))
        })?;
        Self::from_toml(&contents)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> TerrainResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| TerrainError::configuration(format!("cannot serialize config: {}", e)))
    }

    /// Parse from a JSON string.
    pub fn from_json(json_str: &str) -> TerrainResult<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| TerrainError::configuration(format!("invalid meshing config: {}", e)))
    }

    /// Serialize to a JSON string.
    pub fn to_json(&self) -> TerrainResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| TerrainError::configuration(format!("cannot serialize config: {}", e)))
    }
}

/// Everything a run reports besides the mesh.
#[derive(Debug, Clone, Serialize)]
pub struct MeshingReport {
    /// Parameters after clamping.
    pub params: MeshingParams,
    pub classification: ClassificationReport,
    pub planes: PlaneDetectionReport,
    pub grid: GridResampleReport,
    pub simplification: SimplificationReport,
    pub vertices: usize,
    pub faces: usize,
    pub events: Vec<StageEvent>,
    pub timings: Vec<StageTiming>,
}

impl MeshingReport {
    /// Warning messages recorded during the run.
    pub fn warnings(&self) -> impl Iterator<Item = &StageEvent> {
        self.events
            .iter()
            .filter(|e| e.level == crate::context::EventLevel::Warning)
    }

    /// Total time across recorded stages.
    pub fn total_ms(&self) -> f64 {
        self.timings.iter().map(|t| t.elapsed_ms).sum()
    }
}

/// A finished run.
#[derive(Debug, Clone)]
pub struct MeshingOutcome {
    pub mesh: TerrainMesh,
    pub report: MeshingReport,
}

struct StageReports {
    classification: ClassificationReport,
    planes: PlaneDetectionReport,
    grid: GridResampleReport,
    simplification: SimplificationReport,
}

/// The meshing pipeline.
pub struct TerrainPipeline {
    params: MeshingParams,
    plane_detector: Box<dyn PlaneDetection>,
    simplifier: Box<dyn PointSimplification>,
    smoother: Box<dyn SurfaceSmoothing>,
    triangulator: Box<dyn Triangulation>,
}

impl Default for TerrainPipeline {
    fn default() -> Self {
        Self::new(MeshingParams::default())
    }
}

impl TerrainPipeline {
    /// Pipeline with the shipped stage implementations.
    pub fn new(params: MeshingParams) -> Self {
        Self {
            params,
            plane_detector: Box::new(EfficientRansac::new(params.seed)),
            simplifier: Box::new(WlopSimplifier::new()),
            smoother: Box::new(JetSmoother::new()),
            triangulator: Box::new(DelaunayTriangulator::new()),
        }
    }

    /// Parameters as given.
    pub fn params(&self) -> &MeshingParams {
        &self.params
    }

    /// Replace the plane detector.
    #[must_use]
    pub fn with_plane_detector(mut self, detector: impl PlaneDetection + 'static) -> Self {
        self.plane_detector = Box::new(detector);
        self
    }

    /// Replace the simplifier.
    #[must_use]
    pub fn with_simplifier(mut self, simplifier: impl PointSimplification + 'static) -> Self {
        self.simplifier = Box::new(simplifier);
        self
    }

    /// Replace the smoother.
    #[must_use]
    pub fn with_smoother(mut self, smoother: impl SurfaceSmoothing + 'static) -> Self {
        self.smoother = Box::new(smoother);
        self
    }

    /// Replace the triangulator.
    #[must_use]
    pub fn with_triangulator(mut self, triangulator: impl Triangulation + 'static) -> Self {
        self.triangulator = Box::new(triangulator);
        self
    }

    /// Mesh an already decoded cloud.
    pub fn run(&self, cloud: DecodedCloud) -> TerrainResult<MeshingOutcome> {
        let mut ctx = MeshingContext::new();
        let (mesh, stages) = self.execute(&cloud, &mut ctx)?;
        drop(cloud);
        Ok(self.finish(mesh, stages, ctx))
    }

    /// Decode from `source`, mesh, and hand the result to `sink`.
    pub fn run_source(
        &self,
        source: &dyn PointCloudSource,
        sink: &mut dyn MeshSink,
    ) -> TerrainResult<MeshingOutcome> {
        let mut ctx = MeshingContext::new();
        let cloud = ctx.timed(Stage::Load, |_| source.decode())?;
        ctx.info(Stage::Load, format!("Decoded {} points", cloud.len()));

        let (mesh, stages) = self.execute(&cloud, &mut ctx)?;
        drop(cloud);

        ctx.timed(Stage::Write, |_| sink.write_mesh(&mesh))?;
        Ok(self.finish(mesh, stages, ctx))
    }

    /// Read a PLY point cloud from `input` and write the mesh as PLY to `output`.
    pub fn run_file(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
    ) -> TerrainResult<MeshingOutcome> {
        let source = PlyPointCloud::new(input.as_ref());
        let mut sink = PlyMeshWriter::new(output.as_ref());
        self.run_source(&source, &mut sink)
    }

    fn execute(
        &self,
        cloud: &DecodedCloud,
        ctx: &mut MeshingContext,
    ) -> TerrainResult<(TerrainMesh, StageReports)> {
        let params = self.params.normalized();

        let ClassifiedPoints {
            mut ground,
            non_ground,
            report: classification,
        } = ctx.timed(Stage::Classify, |ctx| PointClassifier::new().classify(cloud, ctx))?;

        let planes = ctx.timed(Stage::DetectPlanes, |ctx| {
            promote_planar_points(self.plane_detector.as_ref(), &mut ground, non_ground, ctx)
        })?;
        log_point_set_stats(&ground, "ground after plane detection");

        let (resampled, grid) = ctx.timed(Stage::Resample, |ctx| {
            GridResampler::new(params.flip_faces).resample(ground, ctx)
        })?;
        log_point_set_stats(&resampled, "grid resampled");

        let request = SimplificationRequest {
            max_vertex_count: params.max_vertex_count,
            iterations: params.wlop_iterations,
            seed: params.seed,
        };
        let mut points = ctx.timed(Stage::Simplify, |ctx| {
            self.simplifier.simplify(&resampled, &request, ctx)
        })?;
        if points.len() < 3 {
            return Err(TerrainError::insufficient_data("simplify", 3, points.len()));
        }
        let simplification = SimplificationReport {
            input: resampled.len(),
            output: points.len(),
            retain_percentage: retain_percentage(params.max_vertex_count, resampled.len()),
            iterations: params.wlop_iterations,
        };
        drop(resampled);
        log_point_set_stats(&points, "simplified");

        ctx.timed(Stage::Smooth, |ctx| self.smoother.smooth(&mut points, ctx))?;

        let mesh = ctx.timed(Stage::Triangulate, |ctx| {
            self.triangulator.triangulate(&points, params.flip_faces, ctx)
        })?;
        log_mesh_stats(&mesh, "triangulated");

        Ok((
            mesh,
            StageReports {
                classification,
                planes,
                grid,
                simplification,
            },
        ))
    }

    fn finish(&self, mesh: TerrainMesh, stages: StageReports, ctx: MeshingContext) -> MeshingOutcome {
        let (events, timings) = ctx.into_parts();
        let report = MeshingReport {
            params: self.params.normalized(),
            classification: stages.classification,
            planes: stages.planes,
            grid: stages.grid,
            simplification: stages.simplification,
            vertices: mesh.vertex_count(),
            faces: mesh.face_count(),
            events,
            timings,
        };
        MeshingOutcome { mesh, report }
    }
}

/// What `inspect` reports about a point cloud without meshing it.
#[derive(Debug, Clone, Serialize)]
pub struct CloudSummary {
    pub points: usize,
    pub schema: FieldSchema,
    pub classification: ClassificationReport,
    /// `[min, max]` corners of the bounding box.
    pub bounds: Option<[[f64; 3]; 2]>,
    pub warnings: Vec<String>,
}

/// Validate and classify a cloud and summarise it.
pub fn inspect_cloud(cloud: &DecodedCloud) -> TerrainResult<CloudSummary> {
    let mut ctx = MeshingContext::new();
    let classified = PointClassifier::new().classify(cloud, &mut ctx)?;

    let positions: Vec<nalgebra::Point3<f64>> = cloud
        .records
        .iter()
        .map(|r| nalgebra::Point3::from(r.position))
        .collect();
    let bounds = bounds_of(positions.iter())
        .map(|(min, max)| [[min.x, min.y, min.z], [max.x, max.y, max.z]]);

    Ok(CloudSummary {
        points: cloud.len(),
        schema: cloud.schema.clone(),
        classification: classified.report,
        bounds,
        warnings: ctx.warnings().map(|e| e.message.clone()).collect(),
    })
}
