//! Ground / non-ground split.

use nalgebra::{Point3, Vector3};
use serde::Serialize;
use tracing::debug;

use crate::context::{MeshingContext, Stage};
use crate::error::TerrainResult;
use crate::record::{DecodedCloud, RawPointRecord, ResolvedFields};
use crate::types::{CLASS_GROUND, PointSet, TerrainPoint};

/// Points with height above ground below this are near the terrain.
pub const HAG_THRESHOLD: f64 = 1.0;

/// Counts produced by classification. `ground + non_ground + dropped == input`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClassificationReport {
    pub input: usize,
    pub ground: usize,
    pub non_ground: usize,
    pub dropped: usize,
    /// Whether the classification field was usable.
    pub used_classification: bool,
    /// Whether the height-above-ground field was usable.
    pub used_height_above_ground: bool,
}

/// The two disjoint sets produced by classification.
#[derive(Debug, Clone, Default)]
pub struct ClassifiedPoints {
    pub ground: PointSet,
    pub non_ground: PointSet,
    pub report: ClassificationReport,
}

/// Where a single point ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointClass {
    Ground,
    NonGround,
    Dropped,
}

/// Decide the class of a point from its classification code and height.
///
/// Ground-coded points below the threshold are ground. Everything else is
/// non-ground when at or above the threshold, and dropped otherwise: only
/// non-ground-coded points below the threshold are ever dropped.
#[inline]
pub fn classify_point(classification: u8, height_above_ground: f64) -> PointClass {
    if classification == CLASS_GROUND && height_above_ground < HAG_THRESHOLD {
        PointClass::Ground
    } else if height_above_ground >= HAG_THRESHOLD {
        PointClass::NonGround
    } else {
        PointClass::Dropped
    }
}

/// Splits decoded points into ground and non-ground sets.
#[derive(Debug, Clone, Copy, Default)]
pub struct PointClassifier;

impl PointClassifier {
    /// Create a classifier.
    pub fn new() -> Self {
        Self
    }

    /// Validate the schema, then classify every record.
    ///
    /// Fails with an input error when position or normal fields are missing
    /// or badly typed. Missing optional fields only produce warnings.
    pub fn classify(
        &self,
        cloud: &DecodedCloud,
        ctx: &mut MeshingContext,
    ) -> TerrainResult<ClassifiedPoints> {
        let fields = cloud.schema.resolve(ctx)?;
        self.classify_records(&cloud.records, fields, ctx)
    }

    /// Classify records whose usable optional fields are already known.
    pub fn classify_records(
        &self,
        records: &[RawPointRecord],
        fields: ResolvedFields,
        ctx: &mut MeshingContext,
    ) -> TerrainResult<ClassifiedPoints> {
        let mut ground = PointSet::try_with_capacity(records.len(), "ground points")?;
        let mut non_ground = PointSet::new();
        let mut dropped = 0usize;

        for record in records {
            let point = to_terrain_point(record, fields);
            match classify_point(point.classification, point.height_above_ground) {
                PointClass::Ground => ground.push(point),
                PointClass::NonGround => non_ground.push(point),
                PointClass::Dropped => dropped += 1,
            }
        }

        let report = ClassificationReport {
            input: records.len(),
            ground: ground.len(),
            non_ground: non_ground.len(),
            dropped,
            used_classification: fields.classification,
            used_height_above_ground: fields.height_above_ground,
        };

        debug!(
            target: "mesh_terrain::stage",
            input = report.input,
            dropped = report.dropped,
            "Classification counts"
        );
        ctx.info(
            Stage::Classify,
            format!(
                "Loaded {} ground points and {} non-ground points ({} dropped)",
                report.ground, report.non_ground, report.dropped
            ),
        );

        Ok(ClassifiedPoints {
            ground,
            non_ground,
            report,
        })
    }
}

fn to_terrain_point(record: &RawPointRecord, fields: ResolvedFields) -> TerrainPoint {
    let [x, y, z] = record.position;
    let [nx, ny, nz] = record.normal;
    let normal = Vector3::new(nx, ny, nz);

    let classification = if fields.classification {
        record.classification.unwrap_or(CLASS_GROUND)
    } else {
        CLASS_GROUND
    };
    let height_above_ground = if fields.height_above_ground {
        record.height_above_ground.unwrap_or(0.0)
    } else {
        0.0
    };

    TerrainPoint::new(Point3::new(x, y, z), normal.try_normalize(1e-12).unwrap_or(normal))
        .with_classification(classification)
        .with_height_above_ground(height_above_ground)
}
