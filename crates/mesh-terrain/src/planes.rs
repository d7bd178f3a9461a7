//! Planar structure recovery from non-ground points.
//!
//! Roofs and other flat structures are classified as non-ground by the
//! upstream classifier but still belong in a surface model. This stage
//! finds planar clusters among the non-ground points and moves their
//! members into the ground set; everything else is discarded.
//!
//! [`EfficientRansac`] follows the efficient-RANSAC scheme: candidates are
//! built from localized minimal samples, scored by support, and the best one
//! is accepted once the probability of having missed a larger plane drops
//! below the configured threshold.

use nalgebra::{Point3, Vector3};
use rand::prelude::*;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, trace};

use crate::context::{MeshingContext, Stage};
use crate::error::{TerrainResult, try_reserve};
use crate::pointcloud::{LocalFrame, SPACING_NEIGHBORS, SpatialIndex, average_spacing};
use crate::types::{PointSet, TerrainPoint};

/// Smallest cluster accepted as a plane.
pub const PLANE_MIN_POINTS: usize = 500;

/// Minimum `|dot(point normal, plane normal)|` for a point to support a plane.
pub const NORMAL_THRESHOLD: f64 = 0.90;

/// Target probability of missing the largest remaining plane.
pub const MISS_PROBABILITY: f64 = 0.05;

/// A plane `normal . p + offset = 0` with the indices of its member points.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaneShape {
    pub normal: Vector3<f64>,
    pub offset: f64,
    /// Indices into the slice the shape was detected in, ascending.
    pub members: Vec<usize>,
}

/// Summary of one detected plane.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectedPlane {
    pub normal: [f64; 3],
    pub offset: f64,
    pub members: usize,
}

/// Outcome of the plane detection stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlaneDetectionReport {
    /// Non-ground points entering the stage.
    pub input: usize,
    pub planes: Vec<DetectedPlane>,
    /// Points moved into the ground set.
    pub promoted: usize,
    /// Points that joined no plane and were discarded.
    pub unassigned: usize,
    /// Set when there were too few points to search.
    pub skipped: bool,
}

/// Finds planar clusters in a point set.
pub trait PlaneDetection: Send + Sync {
    /// Detect planes. Each point belongs to at most one returned shape.
    /// Finding nothing is not an error.
    fn detect(
        &self,
        points: &[TerrainPoint],
        ctx: &mut MeshingContext,
    ) -> TerrainResult<Vec<PlaneShape>>;
}

/// Tuning for [`EfficientRansac`].
#[derive(Debug, Clone)]
pub struct RansacParams {
    /// Smallest connected support accepted as a plane.
    pub min_points: usize,
    /// Minimum normal agreement between a point and a plane.
    pub normal_threshold: f64,
    /// Acceptable probability of missing the largest plane.
    pub probability: f64,
    /// Neighbours used for the spacing estimate that sets the tolerances.
    pub spacing_neighbors: usize,
    /// Neighbourhood size the second and third sample points are drawn from.
    pub sample_neighbors: usize,
    /// Candidates generated and scored together.
    pub batch_size: usize,
    /// Upper bound on candidates per extracted plane.
    pub max_trials: usize,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            min_points: PLANE_MIN_POINTS,
            normal_threshold: NORMAL_THRESHOLD,
            probability: MISS_PROBABILITY,
            spacing_neighbors: SPACING_NEIGHBORS,
            sample_neighbors: 32,
            batch_size: 16,
            max_trials: 2000,
        }
    }
}

/// Efficient-RANSAC plane detector with a seeded sampler.
#[derive(Debug, Clone, Default)]
pub struct EfficientRansac {
    params: RansacParams,
    seed: u64,
}

impl EfficientRansac {
    /// Detector with default parameters and the given sampling seed.
    pub fn new(seed: u64) -> Self {
        Self {
            params: RansacParams::default(),
            seed,
        }
    }

    /// Replace the tuning parameters.
    #[must_use]
    pub fn with_params(mut self, params: RansacParams) -> Self {
        self.params = params;
        self
    }
}

impl PlaneDetection for EfficientRansac {
    fn detect(
        &self,
        points: &[TerrainPoint],
        ctx: &mut MeshingContext,
    ) -> TerrainResult<Vec<PlaneShape>> {
        if points.len() < 3 {
            return Ok(Vec::new());
        }

        let spacing = average_spacing(points, self.params.spacing_neighbors);
        if !spacing.is_finite() || spacing <= 0.0 {
            ctx.warn(
                Stage::DetectPlanes,
                format!("Non-ground average spacing is {}, skipping plane search", spacing),
            );
            return Ok(Vec::new());
        }

        // Tolerances are half the spacing. Points count as connected when
        // they could fall in adjacent cells of a cluster_epsilon raster.
        let epsilon = spacing / 2.0;
        let cluster_epsilon = spacing / 2.0;
        debug!(
            target: "mesh_terrain::stage",
            spacing, epsilon, cluster_epsilon, "Plane search tolerances"
        );

        let index = SpatialIndex::from_points(points);
        let search = PlaneSearch {
            points,
            index: &index,
            params: &self.params,
            epsilon,
            link_radius: 2.0 * cluster_epsilon,
        };

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut active = vec![true; points.len()];
        let mut shapes = Vec::new();

        loop {
            let remaining: Vec<usize> = (0..points.len()).filter(|&i| active[i]).collect();
            if remaining.len() < self.params.min_points.max(3) {
                break;
            }
            let outcome = search.best_shape(&remaining, &active, &mut rng);
            let Some(shape) = outcome.shape else {
                debug!(
                    target: "mesh_terrain::stage",
                    trials = outcome.trials,
                    remaining = remaining.len(),
                    "No further plane"
                );
                break;
            };
            if !outcome.confident {
                ctx.info(
                    Stage::DetectPlanes,
                    format!(
                        "Accepted a {}-point plane at the {}-trial cap before the miss probability reached {}",
                        shape.members.len(),
                        outcome.trials,
                        self.params.probability
                    ),
                );
            }
            for &i in &shape.members {
                active[i] = false;
            }
            debug!(
                target: "mesh_terrain::stage",
                members = shape.members.len(),
                remaining = remaining.len() - shape.members.len(),
                "Accepted plane"
            );
            shapes.push(shape);
        }

        Ok(shapes)
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    normal: Vector3<f64>,
    offset: f64,
}

/// Result of one [`PlaneSearch::best_shape`] run.
struct SearchOutcome {
    shape: Option<PlaneShape>,
    trials: usize,
    /// False when the trial cap ended the search.
    confident: bool,
}

struct PlaneSearch<'a> {
    points: &'a [TerrainPoint],
    index: &'a SpatialIndex,
    params: &'a RansacParams,
    epsilon: f64,
    link_radius: f64,
}

impl PlaneSearch<'_> {
    /// Run trials until the best plane is trusted or the trial budget is spent.
    fn best_shape(
        &self,
        remaining: &[usize],
        active: &[bool],
        rng: &mut StdRng,
    ) -> SearchOutcome {
        let total = remaining.len() as f64;
        let batch_size = self.params.batch_size.max(1);
        let mut best: Option<PlaneShape> = None;
        let mut trials = 0usize;

        while trials < self.params.max_trials {
            let batch: Vec<Candidate> = (0..batch_size)
                .filter_map(|_| self.sample_candidate(remaining, active, rng))
                .collect();
            trials += batch_size;

            let mut scored: Vec<(Candidate, Vec<usize>)> = batch
                .into_par_iter()
                .map(|c| {
                    let support = self.support(&c, remaining);
                    (c, support)
                })
                .collect();
            scored.sort_by(|a, b| b.1.len().cmp(&a.1.len()));

            // Support bounds the connected component from above, so stop at
            // the first candidate that cannot beat the current best.
            for (candidate, support) in scored {
                let best_len = best.as_ref().map_or(0, |b| b.members.len());
                if support.len() <= best_len || support.len() < self.params.min_points {
                    break;
                }
                let component = self.largest_component(&support);
                if component.len() > best_len && component.len() >= self.params.min_points {
                    best = Some(self.refine(candidate, component));
                }
            }

            if let Some(shape) = &best {
                let ratio = shape.members.len() as f64 / total;
                let miss = (1.0 - ratio.powi(3)).powf(trials as f64);
                trace!(
                    target: "mesh_terrain::stage",
                    trials, best = shape.members.len(), miss, "Plane search progress"
                );
                if miss <= self.params.probability {
                    return SearchOutcome {
                        shape: best,
                        trials,
                        confident: true,
                    };
                }
            }
        }

        SearchOutcome {
            shape: best,
            trials,
            confident: false,
        }
    }

    /// Draw one point at random and two more from its neighbourhood.
    fn sample_candidate(
        &self,
        remaining: &[usize],
        active: &[bool],
        rng: &mut StdRng,
    ) -> Option<Candidate> {
        let first = remaining[rng.gen_range(0..remaining.len())];
        let neighbors: Vec<usize> = self
            .index
            .k_nearest(self.points[first].xyz(), self.params.sample_neighbors)
            .into_iter()
            .map(|(i, _)| i)
            .filter(|&i| i != first && active[i])
            .collect();
        if neighbors.len() < 2 {
            return None;
        }

        let a = rng.gen_range(0..neighbors.len());
        let mut b = rng.gen_range(0..neighbors.len() - 1);
        if b >= a {
            b += 1;
        }
        let sample = [first, neighbors[a], neighbors[b]];

        let p0 = self.points[sample[0]].position;
        let p1 = self.points[sample[1]].position;
        let p2 = self.points[sample[2]].position;
        let normal = (p1 - p0).cross(&(p2 - p0)).try_normalize(1e-12)?;

        if sample
            .iter()
            .any(|&i| self.points[i].normal.dot(&normal).abs() < self.params.normal_threshold)
        {
            return None;
        }

        Some(Candidate {
            normal,
            offset: -normal.dot(&p0.coords),
        })
    }

    /// Remaining points close to the plane whose normals agree with it.
    fn support(&self, candidate: &Candidate, remaining: &[usize]) -> Vec<usize> {
        remaining
            .iter()
            .copied()
            .filter(|&i| {
                let p = &self.points[i];
                (candidate.normal.dot(&p.position.coords) + candidate.offset).abs() <= self.epsilon
                    && p.normal.dot(&candidate.normal).abs() >= self.params.normal_threshold
            })
            .collect()
    }

    /// Largest connected subset of `support`, ascending.
    fn largest_component(&self, support: &[usize]) -> Vec<usize> {
        let n = self.points.len();
        let mut in_support = vec![false; n];
        for &i in support {
            in_support[i] = true;
        }
        let mut visited = vec![false; n];
        let mut largest: Vec<usize> = Vec::new();
        let mut stack = Vec::new();

        for &seed in support {
            if visited[seed] {
                continue;
            }
            visited[seed] = true;
            stack.push(seed);
            let mut component = Vec::new();

            while let Some(i) = stack.pop() {
                component.push(i);
                for j in self.index.within_radius(self.points[i].xyz(), self.link_radius) {
                    if in_support[j] && !visited[j] {
                        visited[j] = true;
                        stack.push(j);
                    }
                }
            }

            if component.len() > largest.len() {
                largest = component;
            }
        }

        largest.sort_unstable();
        largest
    }

    /// Least-squares refit over the accepted members.
    fn refine(&self, candidate: Candidate, members: Vec<usize>) -> PlaneShape {
        let positions: Vec<Point3<f64>> = members.iter().map(|&i| self.points[i].position).collect();
        let (mut normal, origin) = match LocalFrame::fit(&positions) {
            Some(frame) => (frame.w, frame.origin.coords),
            None => (candidate.normal, -candidate.normal * candidate.offset),
        };
        if normal.z < 0.0 {
            normal = -normal;
        }

        PlaneShape {
            normal,
            offset: -normal.dot(&origin),
            members,
        }
    }
}

/// Run `detector` on the non-ground points and move plane members to `ground`.
///
/// Fewer than three non-ground points skips the search; those points are
/// discarded like any other unassigned point.
pub fn promote_planar_points(
    detector: &dyn PlaneDetection,
    ground: &mut PointSet,
    non_ground: PointSet,
    ctx: &mut MeshingContext,
) -> TerrainResult<PlaneDetectionReport> {
    let input = non_ground.len();
    if input < 3 {
        ctx.info(
            Stage::DetectPlanes,
            format!("Skipping plane detection: {} non-ground points", input),
        );
        return Ok(PlaneDetectionReport {
            input,
            unassigned: input,
            skipped: true,
            ..Default::default()
        });
    }

    let shapes = detector.detect(&non_ground.points, ctx)?;

    let member_total: usize = shapes.iter().map(|s| s.members.len()).sum();
    try_reserve(&mut ground.points, member_total, "promoted plane points")?;

    let mut assigned = vec![false; input];
    let mut planes = Vec::with_capacity(shapes.len());
    for shape in &shapes {
        for &i in &shape.members {
            if i < input && !assigned[i] {
                assigned[i] = true;
                ground.push(non_ground.points[i]);
            }
        }
        planes.push(DetectedPlane {
            normal: [shape.normal.x, shape.normal.y, shape.normal.z],
            offset: shape.offset,
            members: shape.members.len(),
        });
    }

    let promoted = assigned.iter().filter(|&&a| a).count();
    let report = PlaneDetectionReport {
        input,
        planes,
        promoted,
        unassigned: input - promoted,
        skipped: false,
    };

    for (i, plane) in report.planes.iter().enumerate() {
        debug!(
            target: "mesh_terrain::stage",
            plane = i,
            nx = plane.normal[0],
            ny = plane.normal[1],
            nz = plane.normal[2],
            offset = plane.offset,
            members = plane.members,
            "Detected plane"
        );
    }
    ctx.info(
        Stage::DetectPlanes,
        format!(
            "Detected {} planes, promoted {} points, {} unassigned",
            report.planes.len(),
            report.promoted,
            report.unassigned
        ),
    );

    Ok(report)
}
