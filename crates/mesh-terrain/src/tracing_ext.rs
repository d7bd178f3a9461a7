//! Tracing extensions for terrain meshing.
//!
//! Structured logging and timing helpers used by the pipeline stages.
//!
//! # Usage
//!
//! Enable tracing by initializing a subscriber in your application:
//!
//! ```rust
//! use tracing_subscriber::{EnvFilter, fmt, prelude::*};
//!
//! // Or EnvFilter::from_default_env() with RUST_LOG=mesh_terrain=debug
//! tracing_subscriber::registry()
//!     .with(fmt::layer())
//!     .with(EnvFilter::new("mesh_terrain=debug"))
//!     .init();
//!
//! tracing::debug!(target: "mesh_terrain::stage", "Subscriber ready");
//! ```
//!
//! # Log Levels
//!
//! - **WARN**: degraded optional fields, skipped stages
//! - **INFO**: stage summaries, timing
//! - **DEBUG**: intermediate values (spacing, grid size, retained percentage)
//! - **TRACE**: per-iteration detail

use std::time::Instant;
use tracing::{Span, debug, info, trace};

use crate::types::{PointSet, TerrainMesh};

/// A performance timer that logs duration on drop.
///
/// # Example
///
/// ```rust
/// use mesh_terrain::tracing_ext::OperationTimer;
///
/// fn expensive_operation() -> f64 {
///     let timer = OperationTimer::new("expensive_operation");
///     let _entered = timer.span().enter();
///     (0..1000).map(|i| i as f64).sum()
/// } // Timer logs duration when dropped
///
/// tracing_subscriber::fmt().with_env_filter("mesh_terrain=info").init();
/// assert_eq!(expensive_operation(), 499500.0);
/// ```
pub struct OperationTimer {
    name: &'static str,
    start: Instant,
    span: Span,
}

impl OperationTimer {
    /// Create a new operation timer.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::info_span!("terrain_stage", stage = name);
        debug!(target: "mesh_terrain::timing", stage = name, "Starting stage");
        Self {
            name,
            start: Instant::now(),
            span,
        }
    }

    /// Get the elapsed time.
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Get the span for this timer.
    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        let elapsed_ms = self.elapsed_ms();
        info!(
            target: "mesh_terrain::timing",
            stage = self.name,
            elapsed_ms = format!("{:.2}", elapsed_ms),
            "Stage completed"
        );
    }
}

/// Log point set statistics at debug level.
pub fn log_point_set_stats(points: &PointSet, context: &str) {
    let Some((min, max)) = points.bounds() else {
        debug!(target: "mesh_terrain::state", context = context, points = 0, "Point set state");
        return;
    };
    let dims = max - min;

    debug!(
        target: "mesh_terrain::state",
        context = context,
        points = points.len(),
        extent = format!("{:.2} x {:.2} x {:.2}", dims.x, dims.y, dims.z),
        "Point set state"
    );
}

/// Log mesh statistics at debug level.
pub fn log_mesh_stats(mesh: &TerrainMesh, context: &str) {
    let (min, max) = mesh.bounds().unwrap_or_default();
    let dims = max - min;

    debug!(
        target: "mesh_terrain::state",
        context = context,
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        extent = format!("{:.2} x {:.2} x {:.2}", dims.x, dims.y, dims.z),
        "Mesh state"
    );
}

/// Log progress for an iterative stage.
pub fn log_progress(operation: &str, current: usize, total: usize) {
    let percent = if total > 0 {
        (current as f64 / total as f64 * 100.0) as u32
    } else {
        0
    };

    trace!(
        target: "mesh_terrain::progress",
        operation = operation,
        current = current,
        total = total,
        percent = percent,
        "Progress update"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TerrainPoint;

    #[test]
    fn test_operation_timer() {
        let timer = OperationTimer::new("test_stage");
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(timer.elapsed_ms() >= 10.0);
    }

    #[test]
    fn test_log_helpers_handle_empty_inputs() {
        log_point_set_stats(&PointSet::new(), "empty");
        log_mesh_stats(&TerrainMesh::new(), "empty");
        log_progress("nothing", 0, 0);
    }

    #[test]
    fn test_timer_logs_under_scoped_subscriber() {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter("mesh_terrain=trace")
            .with_test_writer()
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            let timer = OperationTimer::new("scoped");
            let _entered = timer.span().enter();
            log_progress("scoped", 1, 2);
            assert!(timer.elapsed_ms() >= 0.0);
        });
    }

    #[test]
    fn test_log_point_set_stats() {
        let set = PointSet::from_points(vec![
            TerrainPoint::from_coords(0.0, 0.0, 0.0),
            TerrainPoint::from_coords(1.0, 2.0, 3.0),
        ]);
        log_point_set_stats(&set, "two points");
    }
}
