//! 2.5D Delaunay triangulation.

use tracing::debug;

use crate::context::{MeshingContext, Stage};
use crate::error::{TerrainError, TerrainResult, try_reserve};
use crate::types::{PointSet, TerrainMesh};

/// Builds a mesh over a point set.
pub trait Triangulation: Send + Sync {
    /// Triangulate `points`. Vertices keep the input order. With
    /// `flip_faces` every triangle's winding is reversed.
    fn triangulate(
        &self,
        points: &PointSet,
        flip_faces: bool,
        ctx: &mut MeshingContext,
    ) -> TerrainResult<TerrainMesh>;
}

/// Delaunay triangulation of the xy projection, lifted back to 3D.
#[derive(Debug, Clone, Copy, Default)]
pub struct DelaunayTriangulator;

impl DelaunayTriangulator {
    /// Create a triangulator.
    pub fn new() -> Self {
        Self
    }
}

impl Triangulation for DelaunayTriangulator {
    fn triangulate(
        &self,
        points: &PointSet,
        flip_faces: bool,
        ctx: &mut MeshingContext,
    ) -> TerrainResult<TerrainMesh> {
        let mut mesh = TerrainMesh::new();
        try_reserve(&mut mesh.vertices, points.len(), "mesh vertices")?;
        mesh.vertices.extend(points.iter().map(|p| p.position));

        let projected: Vec<delaunator::Point> = points
            .iter()
            .map(|p| delaunator::Point {
                x: p.position.x,
                y: p.position.y,
            })
            .collect();
        let triangulation = delaunator::triangulate(&projected);

        try_reserve(&mut mesh.faces, triangulation.triangles.len() / 3, "mesh faces")?;
        for tri in triangulation.triangles.chunks_exact(3) {
            let [a, mut b, mut c] = [tri[0], tri[1], tri[2]];
            if signed_area(&projected, a, b, c) < 0.0 {
                std::mem::swap(&mut b, &mut c);
            }
            let face = if flip_faces { [c, b, a] } else { [a, b, c] };
            mesh.faces.push([to_index(face[0])?, to_index(face[1])?, to_index(face[2])?]);
        }

        if mesh.faces.is_empty() {
            return Err(TerrainError::empty_mesh(format!(
                "triangulation of {} points produced no faces",
                points.len()
            )));
        }

        debug!(
            target: "mesh_terrain::stage",
            vertices = mesh.vertex_count(),
            faces = mesh.face_count(),
            flip_faces,
            "Delaunay triangulation"
        );
        ctx.info(
            Stage::Triangulate,
            format!(
                "Triangulated {} vertices into {} faces",
                mesh.vertex_count(),
                mesh.face_count()
            ),
        );
        Ok(mesh)
    }
}

fn signed_area(points: &[delaunator::Point], a: usize, b: usize, c: usize) -> f64 {
    let (pa, pb, pc) = (&points[a], &points[b], &points[c]);
    (pb.x - pa.x) * (pc.y - pa.y) - (pb.y - pa.y) * (pc.x - pa.x)
}

fn to_index(i: usize) -> TerrainResult<u32> {
    u32::try_from(i).map_err(|_| TerrainError::out_of_memory("mesh vertex index", i))
}
