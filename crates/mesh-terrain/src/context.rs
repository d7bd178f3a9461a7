//! Per-run diagnostics context.
//!
//! A [`MeshingContext`] is threaded by `&mut` through every pipeline stage.
//! Stages record notable events (warnings about degraded optional fields,
//! skipped steps, summary counts) here instead of writing to a shared log;
//! every event is mirrored to `tracing` as it is recorded, and the collected
//! events and stage timings are handed back to the caller in the run report.

use serde::Serialize;
use tracing::{info, warn};

use crate::tracing_ext::OperationTimer;

/// Pipeline stage identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Decoding and field scanning.
    Load,
    /// Ground / non-ground split.
    Classify,
    /// Planar cluster recovery from non-ground points.
    DetectPlanes,
    /// Grid binning and outlier smoothing.
    Resample,
    /// WLOP simplification.
    Simplify,
    /// Jet smoothing.
    Smooth,
    /// Delaunay triangulation.
    Triangulate,
    /// Mesh persistence.
    Write,
}

impl Stage {
    /// Stable lowercase name, used in logs and JSON output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Load => "load",
            Stage::Classify => "classify",
            Stage::DetectPlanes => "detect_planes",
            Stage::Resample => "resample",
            Stage::Simplify => "simplify",
            Stage::Smooth => "smooth",
            Stage::Triangulate => "triangulate",
            Stage::Write => "write",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a recorded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    Info,
    Warning,
}

/// A single diagnostic event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageEvent {
    pub stage: Stage,
    pub level: EventLevel,
    pub message: String,
}

/// Wall-clock time spent in one stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StageTiming {
    pub stage: Stage,
    pub elapsed_ms: f64,
}

/// Diagnostics sink for one pipeline run.
#[derive(Debug, Default)]
pub struct MeshingContext {
    events: Vec<StageEvent>,
    timings: Vec<StageTiming>,
}

impl MeshingContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an informational event.
    pub fn info(&mut self, stage: Stage, message: impl Into<String>) {
        let message = message.into();
        info!(target: "mesh_terrain::stage", stage = stage.as_str(), "{}", message);
        self.events.push(StageEvent {
            stage,
            level: EventLevel::Info,
            message,
        });
    }

    /// Record a warning. The run continues.
    pub fn warn(&mut self, stage: Stage, message: impl Into<String>) {
        let message = message.into();
        warn!(target: "mesh_terrain::stage", stage = stage.as_str(), "{}", message);
        self.events.push(StageEvent {
            stage,
            level: EventLevel::Warning,
            message,
        });
    }

    /// Run `f` as `stage`, recording how long it took.
    ///
    /// The timing is recorded whether or not `f` fails.
    pub fn timed<T>(&mut self, stage: Stage, f: impl FnOnce(&mut Self) -> T) -> T {
        let timer = OperationTimer::new(stage.as_str());
        let out = {
            let _entered = timer.span().enter();
            f(self)
        };
        self.timings.push(StageTiming {
            stage,
            elapsed_ms: timer.elapsed_ms(),
        });
        out
    }

    /// All events recorded so far, in order.
    pub fn events(&self) -> &[StageEvent] {
        &self.events
    }

    /// Only the warnings.
    pub fn warnings(&self) -> impl Iterator<Item = &StageEvent> {
        self.events
            .iter()
            .filter(|e| e.level == EventLevel::Warning)
    }

    /// Stage timings recorded so far.
    pub fn timings(&self) -> &[StageTiming] {
        &self.timings
    }

    /// Consume the context, returning events and timings.
    pub fn into_parts(self) -> (Vec<StageEvent>, Vec<StageTiming>) {
        (self.events, self.timings)
    }
}
