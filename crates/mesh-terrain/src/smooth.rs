//! Jet smoothing.
//!
//! Each point is projected onto a quadratic height field fitted to its
//! nearest neighbours in their principal frame. The pass is repeated a
//! fixed number of times.

use nalgebra::{DMatrix, DVector, Point3, Vector3};
use rayon::prelude::*;
use tracing::debug;

use crate::context::{MeshingContext, Stage};
use crate::error::TerrainResult;
use crate::pointcloud::{LocalFrame, SpatialIndex};
use crate::types::PointSet;

/// Neighbours per local fit.
pub const JET_NEIGHBORS: usize = 24;

/// Smoothing passes.
pub const JET_ITERATIONS: usize = 5;

/// Moves points onto locally fitted smooth surfaces.
pub trait SurfaceSmoothing: Send + Sync {
    /// Smooth in place. The number of points never changes.
    fn smooth(&self, points: &mut PointSet, ctx: &mut MeshingContext) -> TerrainResult<()>;
}

/// Degree-2 jet fitting smoother.
#[derive(Debug, Clone, Copy)]
pub struct JetSmoother {
    pub neighbors: usize,
    pub iterations: usize,
}

impl Default for JetSmoother {
    fn default() -> Self {
        Self {
            neighbors: JET_NEIGHBORS,
            iterations: JET_ITERATIONS,
        }
    }
}

impl JetSmoother {
    /// Smoother with 24 neighbours and 5 passes.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SurfaceSmoothing for JetSmoother {
    fn smooth(&self, points: &mut PointSet, ctx: &mut MeshingContext) -> TerrainResult<()> {
        if points.len() < 3 {
            ctx.warn(
                Stage::Smooth,
                format!("Skipping jet smoothing of {} points", points.len()),
            );
            return Ok(());
        }

        for pass in 0..self.iterations {
            let positions = points.positions();
            let index = SpatialIndex::from_positions(&positions);

            let smoothed: Vec<Option<Point3<f64>>> = positions
                .par_iter()
                .map(|p| {
                    let neighborhood: Vec<Point3<f64>> = index
                        .k_nearest([p.x, p.y, p.z], self.neighbors)
                        .into_iter()
                        .map(|(i, _)| positions[i])
                        .collect();
                    jet_project(p, &neighborhood)
                })
                .collect();

            let mut unchanged = 0usize;
            for (point, new_position) in points.points.iter_mut().zip(smoothed) {
                match new_position {
                    Some(q) => point.position = q,
                    None => unchanged += 1,
                }
            }
            debug!(target: "mesh_terrain::stage", pass, unchanged, "Jet smoothing pass");
        }

        ctx.info(
            Stage::Smooth,
            format!("Jet smoothed {} points ({} passes)", points.len(), self.iterations),
        );
        Ok(())
    }
}

/// Project `p` onto the jet fitted to `neighborhood`.
///
/// Uses a quadratic with six or more neighbours and a plane with three to
/// five. `None` when the neighbourhood is degenerate.
pub fn jet_project(p: &Point3<f64>, neighborhood: &[Point3<f64>]) -> Option<Point3<f64>> {
    let frame = LocalFrame::fit(neighborhood)?;
    let local: Vec<Vector3<f64>> = neighborhood.iter().map(|q| frame.to_local(q)).collect();

    let scale = local
        .iter()
        .map(|l| l.x.abs().max(l.y.abs()))
        .fold(0.0f64, f64::max);
    if scale <= 0.0 || !scale.is_finite() {
        return None;
    }

    let columns = if local.len() >= 6 { 6 } else { 3 };
    let design = DMatrix::from_fn(local.len(), columns, |r, c| {
        monomial(local[r].x / scale, local[r].y / scale, c)
    });
    let heights = DVector::from_iterator(local.len(), local.iter().map(|l| l.z));

    let svd = design.svd(true, true);
    if svd.rank(1e-10) < columns {
        return None;
    }
    let coefficients = svd.solve(&heights, 1e-12).ok()?;

    let target = frame.to_local(p);
    let (u, v) = (target.x / scale, target.y / scale);
    let height: f64 = (0..columns).map(|c| coefficients[c] * monomial(u, v, c)).sum();
    if !height.is_finite() {
        return None;
    }

    Some(frame.to_world(&Vector3::new(target.x, target.y, height)))
}

#[inline]
fn monomial(u: f64, v: f64, index: usize) -> f64 {
    match index {
        0 => 1.0,
        1 => u,
        2 => v,
        3 => u * u,
        4 => u * v,
        _ => v * v,
    }
}
