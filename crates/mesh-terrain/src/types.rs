//! Core point and mesh data types.

use std::path::Path;

use nalgebra::{Point3, Vector3};

use crate::error::{TerrainError, TerrainResult, try_reserve};

/// ASPRS classification code for ground points.
pub const CLASS_GROUND: u8 = 2;

/// A classified, oriented point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TerrainPoint {
    /// 3D position.
    pub position: Point3<f64>,

    /// Unit surface normal.
    pub normal: Vector3<f64>,

    /// Classification code ([`CLASS_GROUND`] for terrain).
    pub classification: u8,

    /// Distance above the terrain surface, 0 when unknown.
    pub height_above_ground: f64,
}

impl TerrainPoint {
    /// Create a ground point with the given position and normal.
    #[inline]
    pub fn new(position: Point3<f64>, normal: Vector3<f64>) -> Self {
        Self {
            position,
            normal,
            classification: CLASS_GROUND,
            height_above_ground: 0.0,
        }
    }

    /// Create an upward-facing ground point from raw coordinates.
    #[inline]
    pub fn from_coords(x: f64, y: f64, z: f64) -> Self {
        Self::new(Point3::new(x, y, z), Vector3::z())
    }

    /// Set the classification code.
    #[inline]
    pub fn with_classification(mut self, classification: u8) -> Self {
        self.classification = classification;
        self
    }

    /// Set the height above ground.
    #[inline]
    pub fn with_height_above_ground(mut self, hag: f64) -> Self {
        self.height_above_ground = hag;
        self
    }

    /// Set the normal.
    #[inline]
    pub fn with_normal(mut self, normal: Vector3<f64>) -> Self {
        self.normal = normal;
        self
    }

    /// Position as a plain array, the form spatial indices take.
    #[inline]
    pub fn xyz(&self) -> [f64; 3] {
        [self.position.x, self.position.y, self.position.z]
    }
}

/// An ordered collection of points.
///
/// Order carries no meaning after classification; stages that need a
/// reproducible order establish one themselves.
#[derive(Debug, Clone, Default)]
pub struct PointSet {
    /// The points in the set.
    pub points: Vec<TerrainPoint>,
}

impl PointSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self { points: Vec::new() }
    }

    /// Create a set with pre-allocated capacity, reporting allocation failure.
    pub fn try_with_capacity(capacity: usize, what: &'static str) -> TerrainResult<Self> {
        let mut points = Vec::new();
        try_reserve(&mut points, capacity, what)?;
        Ok(Self { points })
    }

    /// Wrap an existing vector of points.
    pub fn from_points(points: Vec<TerrainPoint>) -> Self {
        Self { points }
    }

    /// Number of points.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check if the set is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Add a point.
    #[inline]
    pub fn push(&mut self, point: TerrainPoint) {
        self.points.push(point);
    }

    /// Move every point of `other` into this set.
    pub fn append(&mut self, other: &mut PointSet) {
        self.points.append(&mut other.points);
    }

    /// Iterate over the points.
    pub fn iter(&self) -> std::slice::Iter<'_, TerrainPoint> {
        self.points.iter()
    }

    /// Positions of all points, in set order.
    pub fn positions(&self) -> Vec<Point3<f64>> {
        self.points.iter().map(|p| p.position).collect()
    }

    /// Compute the axis-aligned bounding box.
    pub fn bounds(&self) -> Option<(Point3<f64>, Point3<f64>)> {
        bounds_of(self.points.iter().map(|p| &p.position))
    }
}

impl FromIterator<TerrainPoint> for PointSet {
    fn from_iter<I: IntoIterator<Item = TerrainPoint>>(iter: I) -> Self {
        Self {
            points: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for PointSet {
    type Item = TerrainPoint;
    type IntoIter = std::vec::IntoIter<TerrainPoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.into_iter()
    }
}

impl<'a> IntoIterator for &'a PointSet {
    type Item = &'a TerrainPoint;
    type IntoIter = std::slice::Iter<'a, TerrainPoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

/// Bounding box over an iterator of positions.
pub fn bounds_of<'a>(
    mut positions: impl Iterator<Item = &'a Point3<f64>>,
) -> Option<(Point3<f64>, Point3<f64>)> {
    let first = positions.next()?;
    let mut min = *first;
    let mut max = *first;

    for p in positions {
        min.x = min.x.min(p.x);
        min.y = min.y.min(p.y);
        min.z = min.z.min(p.z);
        max.x = max.x.max(p.x);
        max.y = max.y.max(p.y);
        max.z = max.z.max(p.z);
    }

    Some((min, max))
}

/// The reconstructed 2.5D surface.
///
/// Faces index into `vertices`; winding is counter-clockwise seen from +Z
/// unless the mesh was built with flipped faces.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TerrainMesh {
    /// Vertex positions.
    pub vertices: Vec<Point3<f64>>,

    /// Triangles as vertex index triples.
    pub faces: Vec<[u32; 3]>,
}

impl TerrainMesh {
    /// Create an empty mesh.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of vertices.
    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Number of triangles.
    #[inline]
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Check if the mesh has no faces.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Compute the axis-aligned bounding box.
    pub fn bounds(&self) -> Option<(Point3<f64>, Point3<f64>)> {
        bounds_of(self.vertices.iter())
    }

    /// Check that every face references an existing vertex.
    pub fn validate_indices(&self) -> TerrainResult<()> {
        let count = self.vertices.len();
        for (face_index, face) in self.faces.iter().enumerate() {
            if let Some(&bad) = face.iter().find(|&&i| i as usize >= count) {
                return Err(TerrainError::empty_mesh(format!(
                    "face {} references vertex {}, but mesh only has {} vertices",
                    face_index, bad, count
                )));
            }
        }
        Ok(())
    }

    /// Save the mesh as ASCII PLY.
    pub fn save(&self, path: impl AsRef<Path>) -> TerrainResult<()> {
        crate::io::save_mesh_ply(self, path.as_ref())
    }
}
