//! Grid resampling with local outlier correction.
//!
//! Ground points are binned onto a regular xy grid whose step is half the
//! average point spacing. Each cell keeps its extremal-elevation point, then
//! cells whose elevation strays too far from their neighbours get the
//! neighbourhood mean instead.

use hashbrown::HashMap;
use nalgebra::Point3;
use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::context::{MeshingContext, Stage};
use crate::error::{TerrainError, TerrainResult};
use crate::pointcloud::{SPACING_NEIGHBORS, average_spacing};
use crate::types::{PointSet, TerrainPoint};

/// Minimum occupied neighbours for a cell to be checked as an outlier.
pub const MIN_OCCUPIED_NEIGHBORS: usize = 5;

/// Deviation, in mean absolute deviations, at which a cell is corrected.
pub const OUTLIER_MAD_FACTOR: f64 = 3.0;

/// Outcome of grid resampling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct GridResampleReport {
    pub grid_step: f64,
    pub width: usize,
    pub height: usize,
    pub occupied_cells: usize,
    /// Points merged away because another point won their cell.
    pub sampled_out: usize,
    /// Cells whose elevation was replaced by the neighbourhood mean.
    pub smoothed: usize,
    /// Set when the input was returned unchanged.
    pub passthrough: bool,
}

/// Sparse xy grid holding one representative point per occupied cell.
#[derive(Debug, Clone)]
pub struct ElevationGrid {
    origin: [f64; 2],
    step: f64,
    width: usize,
    height: usize,
    prefer_low: bool,
    cells: HashMap<usize, TerrainPoint>,
}

impl ElevationGrid {
    /// Grid covering `[min, max]` in xy with the given step.
    ///
    /// Dimensions per axis are `ceil(extent / step) + 1`. With `prefer_low`
    /// each cell keeps its lowest point instead of its highest.
    pub fn new(
        min: Point3<f64>,
        max: Point3<f64>,
        step: f64,
        prefer_low: bool,
    ) -> TerrainResult<Self> {
        if !step.is_finite() || step <= 0.0 {
            return Err(TerrainError::configuration(format!(
                "grid step must be positive and finite, got {}",
                step
            )));
        }

        let width = axis_cells(max.x - min.x, step)?;
        let height = axis_cells(max.y - min.y, step)?;
        if width.checked_mul(height).is_none() {
            return Err(TerrainError::out_of_memory("elevation grid keys", usize::MAX));
        }

        Ok(Self {
            origin: [min.x, min.y],
            step,
            width,
            height,
            prefer_low,
            cells: HashMap::new(),
        })
    }

    /// Cells along x.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Cells along y.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Cell size.
    pub fn step(&self) -> f64 {
        self.step
    }

    /// Number of occupied cells.
    pub fn occupied(&self) -> usize {
        self.cells.len()
    }

    /// Unique key of cell `(i, j)`.
    #[inline]
    pub fn key(&self, i: usize, j: usize) -> usize {
        i * self.height + j
    }

    /// Cell containing `p`, or `None` if it falls outside the grid.
    pub fn cell_of(&self, p: &Point3<f64>) -> Option<(usize, usize)> {
        let fi = ((p.x - self.origin[0]) / self.step).round();
        let fj = ((p.y - self.origin[1]) / self.step).round();
        if fi.is_nan() || fj.is_nan() || fi < 0.0 || fj < 0.0 {
            return None;
        }
        let (i, j) = (fi as usize, fj as usize);
        (i < self.width && j < self.height).then_some((i, j))
    }

    /// Representative point of cell `(i, j)`.
    pub fn get(&self, i: usize, j: usize) -> Option<&TerrainPoint> {
        if i >= self.width || j >= self.height {
            return None;
        }
        self.cells.get(&self.key(i, j))
    }

    /// Offer a point to its cell. Returns false if it fell outside the grid.
    pub fn insert(&mut self, point: TerrainPoint) -> bool {
        let Some((i, j)) = self.cell_of(&point.position) else {
            return false;
        };
        let key = self.key(i, j);
        let prefer_low = self.prefer_low;
        self.cells
            .entry(key)
            .and_modify(|kept| {
                let wins = if prefer_low {
                    point.position.z < kept.position.z
                } else {
                    point.position.z > kept.position.z
                };
                if wins {
                    *kept = point;
                }
            })
            .or_insert(point);
        true
    }

    /// Replace outlier elevations with their neighbourhood mean.
    ///
    /// Only interior cells with at least [`MIN_OCCUPIED_NEIGHBORS`] occupied
    /// neighbours are checked. Statistics are taken from the elevations as
    /// they were before this call. Returns the number of corrected cells;
    /// a cell already at the mean is not counted.
    pub fn smooth_outliers(&mut self) -> usize {
        if self.width < 3 || self.height < 3 {
            return 0;
        }

        let mut keys: Vec<usize> = self.cells.keys().copied().collect();
        keys.sort_unstable();

        let snapshot = &*self;
        let updates: Vec<(usize, f64)> = keys
            .par_iter()
            .filter_map(|&key| snapshot.corrected_elevation(key).map(|z| (key, z)))
            .collect();

        for &(key, z) in &updates {
            if let Some(point) = self.cells.get_mut(&key) {
                point.position.z = z;
            }
        }
        updates.len()
    }

    fn corrected_elevation(&self, key: usize) -> Option<f64> {
        let (i, j) = (key / self.height, key % self.height);
        if i == 0 || j == 0 || i + 1 >= self.width || j + 1 >= self.height {
            return None;
        }
        let z = self.cells.get(&key)?.position.z;

        let mut bucket = [0.0f64; 8];
        let mut count = 0;
        for ni in i - 1..=i + 1 {
            for nj in j - 1..=j + 1 {
                if ni == i && nj == j {
                    continue;
                }
                if let Some(p) = self.cells.get(&self.key(ni, nj)) {
                    bucket[count] = p.position.z;
                    count += 1;
                }
            }
        }
        if count < MIN_OCCUPIED_NEIGHBORS {
            return None;
        }

        let neighbors = &bucket[..count];
        let mean = neighbors.iter().sum::<f64>() / count as f64;
        let mad = neighbors.iter().map(|v| (v - mean).abs()).sum::<f64>() / count as f64;
        let deviation = (z - mean).abs();
        (deviation > 0.0 && deviation >= OUTLIER_MAD_FACTOR * mad).then_some(mean)
    }

    /// Retained points in ascending cell-key order.
    pub fn into_points(self) -> Vec<TerrainPoint> {
        let mut cells: Vec<(usize, TerrainPoint)> = self.cells.into_iter().collect();
        cells.sort_unstable_by_key(|(key, _)| *key);
        cells.into_iter().map(|(_, p)| p).collect()
    }
}

fn axis_cells(extent: f64, step: f64) -> TerrainResult<usize> {
    let cells = (extent / step).ceil() + 1.0;
    if !cells.is_finite() || cells >= usize::MAX as f64 {
        return Err(TerrainError::out_of_memory("elevation grid axis", usize::MAX));
    }
    Ok(cells.max(1.0) as usize)
}

/// Bins ground points onto an elevation grid and corrects outliers.
#[derive(Debug, Clone, Copy)]
pub struct GridResampler {
    flip_faces: bool,
    spacing_neighbors: usize,
}

impl Default for GridResampler {
    fn default() -> Self {
        Self::new(false)
    }
}

impl GridResampler {
    /// Resampler keeping the highest point per cell, or the lowest when
    /// `flip_faces` is set.
    pub fn new(flip_faces: bool) -> Self {
        Self {
            flip_faces,
            spacing_neighbors: SPACING_NEIGHBORS,
        }
    }

    /// Resample with a step of half the average spacing.
    pub fn resample(
        &self,
        points: PointSet,
        ctx: &mut MeshingContext,
    ) -> TerrainResult<(PointSet, GridResampleReport)> {
        if points.len() < 2 {
            return Ok(self.passthrough(points, 0.0, ctx));
        }
        let spacing = average_spacing(&points.points, self.spacing_neighbors);
        debug!(target: "mesh_terrain::stage", spacing, "Ground average spacing");
        self.resample_with_step(points, spacing / 2.0, ctx)
    }

    /// Resample with an explicit grid step.
    pub fn resample_with_step(
        &self,
        points: PointSet,
        grid_step: f64,
        ctx: &mut MeshingContext,
    ) -> TerrainResult<(PointSet, GridResampleReport)> {
        let Some((min, max)) = points.bounds() else {
            return Ok(self.passthrough(points, grid_step, ctx));
        };
        if points.len() < 2 || !grid_step.is_finite() || grid_step <= 0.0 {
            return Ok(self.passthrough(points, grid_step, ctx));
        }

        let input = points.len();
        let mut grid = ElevationGrid::new(min, max, grid_step, self.flip_faces)?;
        for point in points {
            grid.insert(point);
        }

        let occupied = grid.occupied();
        let smoothed = grid.smooth_outliers();
        let report = GridResampleReport {
            grid_step,
            width: grid.width(),
            height: grid.height(),
            occupied_cells: occupied,
            sampled_out: input - occupied,
            smoothed,
            passthrough: false,
        };

        debug!(
            target: "mesh_terrain::stage",
            grid_step,
            width = report.width,
            height = report.height,
            "Elevation grid"
        );
        ctx.info(
            Stage::Resample,
            format!(
                "Smoothed {} points, sampled {} points",
                report.smoothed, report.sampled_out
            ),
        );

        Ok((PointSet::from_points(grid.into_points()), report))
    }

    fn passthrough(
        &self,
        points: PointSet,
        grid_step: f64,
        ctx: &mut MeshingContext,
    ) -> (PointSet, GridResampleReport) {
        ctx.warn(
            Stage::Resample,
            format!(
                "Cannot build elevation grid from {} points with step {}, keeping points as is",
                points.len(),
                grid_step
            ),
        );
        let report = GridResampleReport {
            grid_step,
            occupied_cells: points.len(),
            passthrough: true,
            ..Default::default()
        };
        (points, report)
    }
}
