//! Spatial queries over point sets.
//!
//! Every stage that needs neighbourhoods (spacing estimation, RANSAC
//! clustering, WLOP, jet fitting) goes through [`SpatialIndex`], an R*-tree
//! of positions tagged with their index in the source slice.

use nalgebra::{Matrix3, Point3, Vector3};
use rayon::prelude::*;
use rstar::RTree;
use rstar::primitives::GeomWithData;

use crate::types::TerrainPoint;

/// Neighbour count used for average-spacing estimates.
pub const SPACING_NEIGHBORS: usize = 24;

type IndexedPosition = GeomWithData<[f64; 3], usize>;

/// Nearest-neighbour and radius queries over a fixed set of positions.
pub struct SpatialIndex {
    tree: RTree<IndexedPosition>,
}

impl SpatialIndex {
    /// Bulk-load an index over raw positions. Each entry remembers its slice index.
    pub fn from_positions(positions: &[Point3<f64>]) -> Self {
        let entries = positions
            .iter()
            .enumerate()
            .map(|(i, p)| GeomWithData::new([p.x, p.y, p.z], i))
            .collect();
        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    /// Bulk-load an index over point positions.
    pub fn from_points(points: &[TerrainPoint]) -> Self {
        let entries = points
            .iter()
            .enumerate()
            .map(|(i, p)| GeomWithData::new(p.xyz(), i))
            .collect();
        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    /// Number of indexed positions.
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    /// Check if the index is empty.
    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// The `k` nearest entries to `query` as `(index, squared distance)`,
    /// closest first. Includes an entry at the query position itself.
    pub fn k_nearest(&self, query: [f64; 3], k: usize) -> Vec<(usize, f64)> {
        self.tree
            .nearest_neighbor_iter_with_distance_2(&query)
            .take(k)
            .map(|(entry, d2)| (entry.data, d2))
            .collect()
    }

    /// The `k` nearest entries to the indexed point `index`, excluding itself.
    pub fn k_nearest_excluding(&self, index: usize, query: [f64; 3], k: usize) -> Vec<(usize, f64)> {
        self.tree
            .nearest_neighbor_iter_with_distance_2(&query)
            .filter(|(entry, _)| entry.data != index)
            .take(k)
            .map(|(entry, d2)| (entry.data, d2))
            .collect()
    }

    /// Indices of every entry within `radius` of `query`, in ascending index order.
    pub fn within_radius(&self, query: [f64; 3], radius: f64) -> Vec<usize> {
        let mut found: Vec<usize> = self
            .tree
            .locate_within_distance(query, radius * radius)
            .map(|entry| entry.data)
            .collect();
        found.sort_unstable();
        found
    }
}

/// Mean distance from each point to its `k` nearest neighbours, averaged
/// over the set. Returns 0 for fewer than two points.
pub fn average_spacing(points: &[TerrainPoint], k: usize) -> f64 {
    if points.len() < 2 || k == 0 {
        return 0.0;
    }

    let index = SpatialIndex::from_points(points);
    // Summed sequentially so the result does not depend on thread scheduling.
    let per_point: Vec<f64> = points
        .par_iter()
        .enumerate()
        .map(|(i, p)| {
            let neighbors = index.k_nearest_excluding(i, p.xyz(), k);
            if neighbors.is_empty() {
                return 0.0;
            }
            let sum: f64 = neighbors.iter().map(|(_, d2)| d2.sqrt()).sum();
            sum / neighbors.len() as f64
        })
        .collect();

    per_point.iter().sum::<f64>() / points.len() as f64
}

/// Principal frame of a neighbourhood.
#[derive(Debug, Clone, Copy)]
pub struct LocalFrame {
    /// Centroid of the neighbourhood.
    pub origin: Point3<f64>,
    /// Direction of largest spread.
    pub u: Vector3<f64>,
    /// Direction of second largest spread.
    pub v: Vector3<f64>,
    /// Direction of least spread (the fitted normal).
    pub w: Vector3<f64>,
    /// Eigenvalues along `u`, `v`, `w`.
    pub spread: [f64; 3],
}

impl LocalFrame {
    /// Fit a frame to a neighbourhood by PCA. `None` for fewer than three
    /// positions or a degenerate covariance.
    pub fn fit(positions: &[Point3<f64>]) -> Option<Self> {
        if positions.len() < 3 {
            return None;
        }

        let n = positions.len() as f64;
        let centroid = positions
            .iter()
            .fold(Vector3::zeros(), |acc, p| acc + p.coords)
            / n;

        let mut cov = Matrix3::zeros();
        for p in positions {
            let d = p.coords - centroid;
            cov += d * d.transpose();
        }
        cov /= n;

        let eig = cov.symmetric_eigen();
        let mut order = [0usize, 1, 2];
        order.sort_by(|&a, &b| eig.eigenvalues[b].total_cmp(&eig.eigenvalues[a]));

        let u = eig.eigenvectors.column(order[0]).into_owned();
        let v = eig.eigenvectors.column(order[1]).into_owned();
        let (largest, second) = (eig.eigenvalues[order[0]], eig.eigenvalues[order[1]]);
        if largest.is_nan() || largest <= 0.0 || second <= largest * 1e-10 {
            return None;
        }
        let w = u.cross(&v).try_normalize(1e-12)?;

        Some(Self {
            origin: Point3::from(centroid),
            u,
            v,
            w,
            spread: [
                eig.eigenvalues[order[0]],
                eig.eigenvalues[order[1]],
                eig.eigenvalues[order[2]],
            ],
        })
    }

    /// Coordinates of `p` in this frame.
    #[inline]
    pub fn to_local(&self, p: &Point3<f64>) -> Vector3<f64> {
        let d = p - self.origin;
        Vector3::new(d.dot(&self.u), d.dot(&self.v), d.dot(&self.w))
    }

    /// World position of local coordinates.
    #[inline]
    pub fn to_world(&self, local: &Vector3<f64>) -> Point3<f64> {
        self.origin + self.u * local.x + self.v * local.y + self.w * local.z
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(n: usize, step: f64) -> Vec<TerrainPoint> {
        let mut points = Vec::new();
        for i in 0..n {
            for j in 0..n {
                points.push(TerrainPoint::from_coords(i as f64 * step, j as f64 * step, 0.0));
            }
        }
        points
    }

    #[test]
    fn test_k_nearest_includes_self() {
        let points = grid(3, 1.0);
        let index = SpatialIndex::from_points(&points);
        let nearest = index.k_nearest([0.0, 0.0, 0.0], 1);
        assert_eq!(nearest, vec![(0, 0.0)]);
        assert_eq!(index.len(), 9);
    }

    #[test]
    fn test_k_nearest_excluding_skips_self() {
        let points = grid(3, 1.0);
        let index = SpatialIndex::from_points(&points);
        let nearest = index.k_nearest_excluding(4, points[4].xyz(), 4);
        assert_eq!(nearest.len(), 4);
        assert!(nearest.iter().all(|&(i, d2)| i != 4 && (d2 - 1.0).abs() < 1e-12));
    }

    #[test]
    fn test_within_radius_sorted() {
        let points = grid(3, 1.0);
        let index = SpatialIndex::from_points(&points);
        let found = index.within_radius([1.0, 1.0, 0.0], 1.01);
        assert_eq!(found, vec![1, 3, 4, 5, 7]);
    }

    #[test]
    fn test_index_tolerates_identical_coordinates() {
        // Flat terrain: every z identical, many duplicate x and y values.
        let points = grid(11, 1.0);
        let index = SpatialIndex::from_points(&points);
        assert_eq!(index.len(), 121);
        assert_eq!(index.k_nearest([5.0, 5.0, 0.0], 5).len(), 5);
    }

    #[test]
    fn test_average_spacing_unit_grid() {
        let points = grid(10, 2.0);
        let spacing = average_spacing(&points, 4);
        // Interior points see four neighbours at distance 2; edges pull the mean up.
        assert!(spacing >= 2.0 && spacing < 2.5, "spacing {}", spacing);
    }

    #[test]
    fn test_average_spacing_degenerate() {
        assert_eq!(average_spacing(&[], 24), 0.0);
        assert_eq!(average_spacing(&[TerrainPoint::from_coords(1.0, 1.0, 1.0)], 24), 0.0);
    }

    #[test]
    fn test_local_frame_of_plane() {
        let positions: Vec<Point3<f64>> = grid(4, 1.0)
            .iter()
            .map(|p| Point3::new(p.position.x, p.position.y * 2.0, 3.0))
            .collect();
        let frame = LocalFrame::fit(&positions).unwrap();
        assert!(frame.w.z.abs() > 0.999);
        assert!(frame.spread[2].abs() < 1e-12);

        let p = Point3::new(1.0, 2.0, 3.0);
        let back = frame.to_world(&frame.to_local(&p));
        assert!((back - p).norm() < 1e-9);
    }

    #[test]
    fn test_local_frame_rejects_colinear() {
        let positions: Vec<Point3<f64>> =
            (0..5).map(|i| Point3::new(i as f64, 0.0, 0.0)).collect();
        assert!(LocalFrame::fit(&positions).is_none());
    }
}
