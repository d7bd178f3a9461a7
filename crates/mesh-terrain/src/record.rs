//! Typed boundary between point-cloud decoders and the pipeline.
//!
//! Decoders describe which fields they found and how wide each one is
//! ([`FieldSchema`]) and hand over already-converted [`RawPointRecord`]s.
//! The pipeline never sees byte offsets or raw layouts.

use serde::Serialize;

use crate::context::{MeshingContext, Stage};
use crate::error::{TerrainError, TerrainResult};

/// Declared numeric width of a decoded field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FieldWidth {
    /// 32-bit float.
    F32,
    /// 64-bit float.
    F64,
    /// 8-bit unsigned integer.
    U8,
    /// Anything else, named as the decoder reported it.
    Other(String),
}

impl FieldWidth {
    /// True for the two float widths positions, normals and heights may use.
    #[inline]
    pub fn is_float(&self) -> bool {
        matches!(self, FieldWidth::F32 | FieldWidth::F64)
    }
}

impl std::fmt::Display for FieldWidth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldWidth::F32 => f.write_str("float32"),
            FieldWidth::F64 => f.write_str("float64"),
            FieldWidth::U8 => f.write_str("uint8"),
            FieldWidth::Other(name) => f.write_str(name),
        }
    }
}

/// Names under which each logical field is recognised.
pub mod field_names {
    pub const POSITION: [&str; 3] = ["x", "y", "z"];
    pub const NORMAL: [&str; 3] = ["normal_x", "normal_y", "normal_z"];
    pub const NORMAL_SHORT: [&str; 3] = ["nx", "ny", "nz"];
    pub const CLASSIFICATION: &str = "classification";
    pub const HEIGHT_ABOVE_GROUND: &str = "heightaboveground";
}

/// Which logical fields a decoder found, with their declared widths.
///
/// A vector field (position, normal) counts as present only when all three
/// components are. Its width is the first component width that is not a
/// float, or the width of the first component when all are floats.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldSchema {
    pub position: Option<FieldWidth>,
    pub normal: Option<FieldWidth>,
    pub classification: Option<FieldWidth>,
    pub height_above_ground: Option<FieldWidth>,
}

/// Optional fields that passed validation and will be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ResolvedFields {
    pub classification: bool,
    pub height_above_ground: bool,
}

impl FieldSchema {
    /// Build a schema from `(name, width)` pairs as listed by a decoder.
    ///
    /// Unknown names are ignored. Recognised names are logged at debug level.
    pub fn scan<'a>(fields: impl IntoIterator<Item = (&'a str, FieldWidth)>) -> Self {
        let mut position: [Option<FieldWidth>; 3] = Default::default();
        let mut normal: [Option<FieldWidth>; 3] = Default::default();
        let mut schema = FieldSchema::default();

        for (name, width) in fields {
            let slot = if let Some(i) = field_names::POSITION.iter().position(|n| *n == name) {
                &mut position[i]
            } else if let Some(i) = field_names::NORMAL
                .iter()
                .position(|n| *n == name)
                .or_else(|| field_names::NORMAL_SHORT.iter().position(|n| *n == name))
            {
                &mut normal[i]
            } else if name == field_names::CLASSIFICATION {
                &mut schema.classification
            } else if name == field_names::HEIGHT_ABOVE_GROUND {
                &mut schema.height_above_ground
            } else {
                continue;
            };
            tracing::debug!(target: "mesh_terrain::stage", field = name, width = %width, "Scanned field");
            *slot = Some(width);
        }

        schema.position = combine_components(position);
        schema.normal = combine_components(normal);
        schema
    }

    /// Check the required fields.
    ///
    /// Order: position presence, normal presence, position width, normal
    /// width. Fails with an input error on the first problem.
    pub fn check_required(&self) -> TerrainResult<()> {
        let position = self
            .position
            .as_ref()
            .ok_or_else(|| TerrainError::missing_field("position", "x, y, z"))?;
        let normal = self.normal.as_ref().ok_or_else(|| {
            TerrainError::missing_field("normal", "normal_x, normal_y, normal_z")
        })?;

        if !position.is_float() {
            return Err(TerrainError::unsupported_width("position", position));
        }
        if !normal.is_float() {
            return Err(TerrainError::unsupported_width("normal", normal));
        }
        Ok(())
    }

    /// Validate the schema and decide which optional fields are usable.
    ///
    /// Classification absent and classification present with a width other
    /// than `uint8` are reported differently, but both fall back to treating
    /// every point as ground. A missing or non-float height above ground
    /// falls back to 0.
    pub fn resolve(&self, ctx: &mut MeshingContext) -> TerrainResult<ResolvedFields> {
        self.check_required()?;

        let classification = match &self.classification {
            Some(FieldWidth::U8) => true,
            Some(other) => {
                ctx.warn(
                    Stage::Classify,
                    format!(
                        "Classification attribute has unsupported type {}. Will treat all points as ground.",
                        other
                    ),
                );
                false
            }
            None => {
                ctx.warn(
                    Stage::Classify,
                    "Classification attribute missing. Will treat all points as ground.",
                );
                false
            }
        };

        let height_above_ground = match &self.height_above_ground {
            Some(width) if width.is_float() => true,
            Some(other) => {
                ctx.warn(
                    Stage::Classify,
                    format!(
                        "heightaboveground attribute has unsupported type {}. Resulting mesh might have more artifacts.",
                        other
                    ),
                );
                false
            }
            None => {
                ctx.warn(
                    Stage::Classify,
                    "heightaboveground attribute missing. Resulting mesh might have more artifacts.",
                );
                false
            }
        };

        Ok(ResolvedFields {
            classification,
            height_above_ground,
        })
    }
}

fn combine_components(components: [Option<FieldWidth>; 3]) -> Option<FieldWidth> {
    let [a, b, c] = components;
    let (a, b, c) = (a?, b?, c?);
    if !a.is_float() {
        Some(a)
    } else if !b.is_float() {
        Some(b)
    } else if !c.is_float() {
        Some(c)
    } else {
        Some(a)
    }
}

/// One decoded point, already converted to `f64`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawPointRecord {
    pub position: [f64; 3],
    pub normal: [f64; 3],
    /// Present only when the decoder found a `uint8` classification.
    pub classification: Option<u8>,
    /// Present only when the decoder found a float height above ground.
    pub height_above_ground: Option<f64>,
}

impl RawPointRecord {
    /// Record with position and normal only.
    pub fn new(position: [f64; 3], normal: [f64; 3]) -> Self {
        Self {
            position,
            normal,
            classification: None,
            height_above_ground: None,
        }
    }

    /// Set the classification.
    pub fn with_classification(mut self, classification: u8) -> Self {
        self.classification = Some(classification);
        self
    }

    /// Set the height above ground.
    pub fn with_height_above_ground(mut self, hag: f64) -> Self {
        self.height_above_ground = Some(hag);
        self
    }
}

/// Output of a point-cloud decoder.
#[derive(Debug, Clone, Default)]
pub struct DecodedCloud {
    pub schema: FieldSchema,
    pub records: Vec<RawPointRecord>,
}

impl DecodedCloud {
    /// Number of decoded records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if no records were decoded.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Anything that can produce decoded point records.
pub trait PointCloudSource {
    /// Decode the point cloud.
    ///
    /// Implementations must fail with an input error when position or normal
    /// fields are missing or have an unsupported width.
    fn decode(&self) -> TerrainResult<DecodedCloud>;
}

impl PointCloudSource for DecodedCloud {
    fn decode(&self) -> TerrainResult<DecodedCloud> {
        self.schema.check_required()?;
        Ok(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn full_schema() -> Vec<(&'static str, FieldWidth)> {
        vec![
            ("x", FieldWidth::F64),
            ("y", FieldWidth::F64),
            ("z", FieldWidth::F64),
            ("nx", FieldWidth::F32),
            ("ny", FieldWidth::F32),
            ("nz", FieldWidth::F32),
            ("classification", FieldWidth::U8),
            ("heightaboveground", FieldWidth::F32),
            ("red", FieldWidth::U8),
        ]
    }

    #[test]
    fn test_scan_recognises_fields() {
        let schema = FieldSchema::scan(full_schema());
        assert_eq!(schema.position, Some(FieldWidth::F64));
        assert_eq!(schema.normal, Some(FieldWidth::F32));
        assert_eq!(schema.classification, Some(FieldWidth::U8));
        assert_eq!(schema.height_above_ground, Some(FieldWidth::F32));
    }

    #[test]
    fn test_scan_long_normal_names() {
        let schema = FieldSchema::scan(vec![
            ("normal_x", FieldWidth::F64),
            ("normal_y", FieldWidth::F64),
            ("normal_z", FieldWidth::F64),
        ]);
        assert_eq!(schema.normal, Some(FieldWidth::F64));
        assert!(schema.position.is_none());
    }

    #[test]
    fn test_partial_vector_is_absent() {
        let schema = FieldSchema::scan(vec![("y", FieldWidth::F32), ("z", FieldWidth::F32)]);
        assert!(schema.position.is_none());
    }

    #[test]
    fn test_mixed_component_width_reports_bad_one() {
        let schema = FieldSchema::scan(vec![
            ("x", FieldWidth::F32),
            ("y", FieldWidth::Other("int32".into())),
            ("z", FieldWidth::F32),
        ]);
        assert_eq!(schema.position, Some(FieldWidth::Other("int32".into())));
    }

    #[test]
    fn test_missing_position_reported_first() {
        let schema = FieldSchema::default();
        let err = schema.check_required().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Input);
        assert!(matches!(
            err,
            TerrainError::MissingField {
                field: "position",
                ..
            }
        ));
    }

    #[test]
    fn test_missing_normal() {
        let schema = FieldSchema {
            position: Some(FieldWidth::F32),
            ..Default::default()
        };
        assert!(matches!(
            schema.check_required().unwrap_err(),
            TerrainError::MissingField { field: "normal", .. }
        ));
    }

    #[test]
    fn test_presence_checked_before_width() {
        // Bad position width, but normals absent: absence wins.
        let schema = FieldSchema {
            position: Some(FieldWidth::U8),
            ..Default::default()
        };
        assert!(matches!(
            schema.check_required().unwrap_err(),
            TerrainError::MissingField { field: "normal", .. }
        ));
    }

    #[test]
    fn test_unsupported_normal_width() {
        let schema = FieldSchema {
            position: Some(FieldWidth::F32),
            normal: Some(FieldWidth::Other("int16".into())),
            ..Default::default()
        };
        assert!(matches!(
            schema.check_required().unwrap_err(),
            TerrainError::UnsupportedFieldWidth { field: "normal", .. }
        ));
    }

    #[test]
    fn test_resolve_full_schema_no_warnings() {
        let mut ctx = MeshingContext::new();
        let resolved = FieldSchema::scan(full_schema()).resolve(&mut ctx).unwrap();
        assert!(resolved.classification);
        assert!(resolved.height_above_ground);
        assert_eq!(ctx.warnings().count(), 0);
    }

    #[test]
    fn test_resolve_absent_vs_wrong_width_classification() {
        let base = FieldSchema {
            position: Some(FieldWidth::F32),
            normal: Some(FieldWidth::F32),
            height_above_ground: Some(FieldWidth::F64),
            ..Default::default()
        };

        let mut ctx = MeshingContext::new();
        let resolved = base.resolve(&mut ctx).unwrap();
        assert!(!resolved.classification);
        let absent: Vec<_> = ctx.warnings().map(|e| e.message.clone()).collect();
        assert_eq!(absent.len(), 1);
        assert!(absent[0].contains("missing"));

        let wrong = FieldSchema {
            classification: Some(FieldWidth::Other("uint16".into())),
            ..base
        };
        let mut ctx = MeshingContext::new();
        let resolved = wrong.resolve(&mut ctx).unwrap();
        assert!(!resolved.classification);
        let msgs: Vec<_> = ctx.warnings().map(|e| e.message.clone()).collect();
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].contains("uint16"));
    }

    #[test]
    fn test_resolve_missing_height() {
        let schema = FieldSchema {
            position: Some(FieldWidth::F32),
            normal: Some(FieldWidth::F32),
            classification: Some(FieldWidth::U8),
            height_above_ground: None,
        };
        let mut ctx = MeshingContext::new();
        let resolved = schema.resolve(&mut ctx).unwrap();
        assert!(resolved.classification);
        assert!(!resolved.height_above_ground);
        assert_eq!(ctx.warnings().count(), 1);
    }

    #[test]
    fn test_decoded_cloud_source_checks_schema() {
        let cloud = DecodedCloud::default();
        assert!(cloud.decode().is_err());
    }
}
