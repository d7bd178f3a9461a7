//! Weighted locally optimal projection (WLOP) simplification.
//!
//! A random subset of the input is taken as the initial sample and then
//! iteratively pulled toward the local weighted median of the input
//! (attraction) while being pushed away from other samples (repulsion).
//! The result is a smaller, evenly distributed point set that follows the
//! input surface.

use nalgebra::{Point3, Vector3};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index;
use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::context::{MeshingContext, Stage};
use crate::error::{TerrainError, TerrainResult};
use crate::pointcloud::{SPACING_NEIGHBORS, SpatialIndex, average_spacing};
use crate::tracing_ext::log_progress;
use crate::types::{PointSet, TerrainPoint};

/// Largest share of points simplification may retain, in percent.
pub const MAX_RETAIN_PERCENTAGE: f64 = 80.0;

/// Neighbourhood radius as a multiple of the average spacing.
pub const RADIUS_SPACING_FACTOR: f64 = 8.0;

/// Weight of the repulsion term.
pub const REPULSION_MU: f64 = 0.45;

// Coincident pairs carry no direction and an unbounded 1/d weight.
const MIN_DISTANCE: f64 = 1e-10;

/// Percentage of `point_count` points to keep so that at most
/// `max_vertex_count` remain, capped at [`MAX_RETAIN_PERCENTAGE`].
pub fn retain_percentage(max_vertex_count: usize, point_count: usize) -> f64 {
    if point_count == 0 {
        return 0.0;
    }
    (100.0 * max_vertex_count as f64 / point_count as f64).min(MAX_RETAIN_PERCENTAGE)
}

/// What a simplifier is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SimplificationRequest {
    pub max_vertex_count: usize,
    pub iterations: u32,
    pub seed: u64,
}

/// Summary of the simplification stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SimplificationReport {
    pub input: usize,
    pub output: usize,
    pub retain_percentage: f64,
    pub iterations: u32,
}

/// Reduces a point set toward a vertex budget.
pub trait PointSimplification: Send + Sync {
    /// Simplify `points`. The result never has more points than the input.
    fn simplify(
        &self,
        points: &PointSet,
        request: &SimplificationRequest,
        ctx: &mut MeshingContext,
    ) -> TerrainResult<PointSet>;
}

/// WLOP simplifier with density-weighted attraction.
#[derive(Debug, Clone)]
pub struct WlopSimplifier {
    /// Fixed neighbourhood radius. `None` uses 8x the average spacing.
    pub radius: Option<f64>,
    /// Weight attraction by the inverse local density of the input.
    pub density_weights: bool,
}

impl Default for WlopSimplifier {
    fn default() -> Self {
        Self {
            radius: None,
            density_weights: true,
        }
    }
}

impl WlopSimplifier {
    /// Simplifier with automatic radius and density weighting.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a fixed neighbourhood radius.
    #[must_use]
    pub fn with_radius(mut self, radius: f64) -> Self {
        self.radius = Some(radius);
        self
    }
}

impl PointSimplification for WlopSimplifier {
    fn simplify(
        &self,
        points: &PointSet,
        request: &SimplificationRequest,
        ctx: &mut MeshingContext,
    ) -> TerrainResult<PointSet> {
        let n = points.len();
        if n < 3 {
            return Err(TerrainError::insufficient_data("simplify", 3, n));
        }

        let percentage = retain_percentage(request.max_vertex_count, n);
        let sample_count = (n as f64 * percentage / 100.0) as usize;
        if sample_count < 3 {
            return Err(TerrainError::insufficient_data("simplify", 3, sample_count));
        }

        let originals: Vec<Point3<f64>> = points.positions();
        let radius = match self.radius {
            Some(r) => r,
            None => RADIUS_SPACING_FACTOR * average_spacing(&points.points, SPACING_NEIGHBORS),
        };
        ctx.info(
            Stage::Simplify,
            format!(
                "Performing weighted locally optimal projection simplification and regularization (retain: {:.2}%, iterate: {})",
                percentage, request.iterations
            ),
        );
        debug!(target: "mesh_terrain::stage", radius, samples = sample_count, "WLOP setup");

        let mut rng = StdRng::seed_from_u64(request.seed);
        let mut chosen = index::sample(&mut rng, n, sample_count).into_vec();
        chosen.sort_unstable();
        let mut samples: Vec<Point3<f64>> = chosen.iter().map(|&i| originals[i]).collect();

        if !radius.is_finite() || radius <= 0.0 {
            ctx.warn(
                Stage::Simplify,
                format!("Neighbourhood radius is {}, keeping the initial sample", radius),
            );
            return Ok(to_point_set(samples));
        }

        let original_index = SpatialIndex::from_positions(&originals);
        let original_weights = if self.density_weights {
            inverse_densities(&originals, &original_index, radius)
        } else {
            vec![1.0; n]
        };

        let iterations = request.iterations.max(1);
        for iteration in 0..iterations {
            samples = wlop_step(&samples, &originals, &original_index, &original_weights, radius);
            log_progress("wlop", iteration as usize + 1, iterations as usize);
        }

        Ok(to_point_set(samples))
    }
}

fn to_point_set(samples: Vec<Point3<f64>>) -> PointSet {
    samples
        .into_iter()
        .map(|p| TerrainPoint::new(p, Vector3::z()))
        .collect()
}

#[inline]
fn theta(d2: f64, radius: f64) -> f64 {
    (-16.0 * d2 / (radius * radius)).exp()
}

/// `1 / (1 + sum theta)` over each point's neighbourhood.
fn inverse_densities(points: &[Point3<f64>], index: &SpatialIndex, radius: f64) -> Vec<f64> {
    points
        .par_iter()
        .enumerate()
        .map(|(i, p)| {
            let density: f64 = index
                .within_radius([p.x, p.y, p.z], radius)
                .into_iter()
                .filter(|&j| j != i)
                .map(|j| theta((points[j] - p).norm_squared(), radius))
                .sum();
            1.0 / (1.0 + density)
        })
        .collect()
}

fn wlop_step(
    samples: &[Point3<f64>],
    originals: &[Point3<f64>],
    original_index: &SpatialIndex,
    original_weights: &[f64],
    radius: f64,
) -> Vec<Point3<f64>> {
    let sample_index = SpatialIndex::from_positions(samples);
    let sample_densities: Vec<f64> = samples
        .par_iter()
        .enumerate()
        .map(|(i, s)| {
            1.0 + sample_index
                .within_radius([s.x, s.y, s.z], radius)
                .into_iter()
                .filter(|&j| j != i)
                .map(|j| theta((samples[j] - s).norm_squared(), radius))
                .sum::<f64>()
        })
        .collect();

    samples
        .par_iter()
        .enumerate()
        .map(|(i, x)| {
            let query = [x.x, x.y, x.z];

            let mut attraction = Vector3::zeros();
            let mut attraction_weight = 0.0;
            for j in original_index.within_radius(query, radius) {
                let d2 = (originals[j] - x).norm_squared();
                let d = d2.sqrt();
                if d < MIN_DISTANCE {
                    continue;
                }
                let w = theta(d2, radius) / d * original_weights[j];
                attraction += originals[j].coords * w;
                attraction_weight += w;
            }
            if attraction_weight <= 0.0 {
                return *x;
            }
            let attracted = attraction / attraction_weight;

            let mut repulsion = Vector3::zeros();
            let mut repulsion_weight = 0.0;
            for j in sample_index.within_radius(query, radius) {
                if j == i {
                    continue;
                }
                let diff = x - samples[j];
                let d2 = diff.norm_squared();
                let d = d2.sqrt();
                if d < MIN_DISTANCE {
                    continue;
                }
                let w = theta(d2, radius) / d * sample_densities[j];
                repulsion += diff * w;
                repulsion_weight += w;
            }
            if repulsion_weight > 0.0 {
                repulsion /= repulsion_weight;
            }

            Point3::from(attracted + REPULSION_MU * repulsion)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn plane(n: usize) -> PointSet {
        let mut points = Vec::new();
        for i in 0..n {
            for j in 0..n {
                points.push(TerrainPoint::from_coords(i as f64, j as f64, 2.0));
            }
        }
        PointSet::from_points(points)
    }

    fn request(max_vertex_count: usize) -> SimplificationRequest {
        SimplificationRequest {
            max_vertex_count,
            iterations: 3,
            seed: 7,
        }
    }

    #[test]
    fn test_retain_percentage() {
        assert_eq!(retain_percentage(100_000, 1000), 80.0);
        assert_eq!(retain_percentage(50, 100), 50.0);
        assert_eq!(retain_percentage(0, 100), 0.0);
        assert_eq!(retain_percentage(10, 0), 0.0);
    }

    #[test]
    fn test_reduces_to_retained_share() {
        let input = plane(10);
        let mut ctx = MeshingContext::new();
        let out = WlopSimplifier::new()
            .simplify(&input, &request(100_000), &mut ctx)
            .unwrap();
        assert_eq!(out.len(), 80);
    }

    #[test]
    fn test_respects_vertex_budget() {
        let input = plane(10);
        let mut ctx = MeshingContext::new();
        let out = WlopSimplifier::new()
            .simplify(&input, &request(25), &mut ctx)
            .unwrap();
        assert_eq!(out.len(), 25);
    }

    #[test]
    fn test_stays_on_plane_and_in_bounds() {
        let input = plane(8);
        let mut ctx = MeshingContext::new();
        let out = WlopSimplifier::new()
            .simplify(&input, &request(100_000), &mut ctx)
            .unwrap();
        for p in out.iter() {
            assert!((p.position.z - 2.0).abs() < 1e-9);
            assert!(p.position.x > -3.0 && p.position.x < 10.0);
            assert!(p.position.y > -3.0 && p.position.y < 10.0);
        }
    }

    #[test]
    fn test_deterministic_for_seed() {
        let input = plane(8);
        let mut ctx = MeshingContext::new();
        let a = WlopSimplifier::new()
            .simplify(&input, &request(30), &mut ctx)
            .unwrap();
        let b = WlopSimplifier::new()
            .simplify(&input, &request(30), &mut ctx)
            .unwrap();
        assert_eq!(a.positions(), b.positions());
    }

    #[test]
    fn test_too_few_points() {
        let input = PointSet::from_points(vec![
            TerrainPoint::from_coords(0.0, 0.0, 0.0),
            TerrainPoint::from_coords(1.0, 0.0, 0.0),
        ]);
        let mut ctx = MeshingContext::new();
        let err = WlopSimplifier::new()
            .simplify(&input, &request(100), &mut ctx)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientData);
    }

    #[test]
    fn test_zero_budget_is_insufficient() {
        let mut ctx = MeshingContext::new();
        let err = WlopSimplifier::new()
            .simplify(&plane(5), &request(0), &mut ctx)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientData);
    }
}
