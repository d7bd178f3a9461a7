//! mesh25d build command - point cloud to 2.5D mesh.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use mesh_terrain::{
    DEFAULT_OUTPUT, MAX_WLOP_ITERATIONS, MeshingParams, MeshingReport, TerrainError,
    TerrainPipeline,
};
use serde::Serialize;
use tracing::info;

use crate::{Cli, OutputFormat, output};

#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    /// Input point cloud (PLY with x/y/z and normals)
    pub input: PathBuf,

    /// Output mesh path
    #[arg(short, long, default_value = DEFAULT_OUTPUT)]
    pub output: PathBuf,

    /// Upper bound on output vertices (negative values count as 0)
    #[arg(long, allow_negative_numbers = true)]
    pub max_vertex_count: Option<i64>,

    /// WLOP simplification rounds, clamped to 1..=1000
    #[arg(long, allow_negative_numbers = true)]
    pub wlop_iterations: Option<i64>,

    /// Reverse face winding and keep the lowest point per grid cell
    #[arg(long, overrides_with = "no_flip_faces")]
    pub flip_faces: bool,

    /// Keep the default winding even if the config file sets flip_faces
    #[arg(long, overrides_with = "flip_faces")]
    pub no_flip_faces: bool,

    /// Seed for plane sampling and simplification
    #[arg(long)]
    pub seed: Option<u64>,

    /// TOML file with meshing parameters; flags override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Write the full run report as JSON to this file
    #[arg(long)]
    pub report: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct BuildSummary<'a> {
    input: String,
    output: String,
    report: &'a MeshingReport,
}

/// Merge the config file (if any) with command-line overrides.
pub fn resolve_params(args: &BuildArgs) -> Result<MeshingParams> {
    let mut params = match &args.config {
        Some(path) => MeshingParams::from_toml_file(path)?,
        None => MeshingParams::default(),
    };

    if let Some(count) = args.max_vertex_count {
        params.max_vertex_count = usize::try_from(count.max(0)).unwrap_or(usize::MAX);
    }
    if let Some(iterations) = args.wlop_iterations {
        params.wlop_iterations = iterations.clamp(1, i64::from(MAX_WLOP_ITERATIONS)) as u32;
    }
    if args.flip_faces {
        params.flip_faces = true;
    } else if args.no_flip_faces {
        params.flip_faces = false;
    }
    if let Some(seed) = args.seed {
        params.seed = seed;
    }
    Ok(params.normalized())
}

/// Fail early on paths the pipeline could only reject after doing the work.
pub fn check_paths(input: &Path, output: &Path) -> Result<(), TerrainError> {
    if !input.is_file() {
        return Err(TerrainError::configuration(format!(
            "input point cloud {:?} does not exist",
            input
        )));
    }
    if let Err(e) = std::fs::File::open(input) {
        return Err(TerrainError::configuration(format!(
            "input point cloud {:?} cannot be opened: {}",
            input, e
        )));
    }

    let parent = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let writable = std::fs::metadata(parent)
        .map(|m| m.is_dir() && !m.permissions().readonly())
        .unwrap_or(false);
    if !writable {
        return Err(TerrainError::configuration(format!(
            "output directory {:?} is missing or not writable",
            parent
        )));
    }
    if output.is_dir() {
        return Err(TerrainError::configuration(format!(
            "output path {:?} is a directory",
            output
        )));
    }
    Ok(())
}

pub fn run(args: &BuildArgs, cli: &Cli) -> Result<()> {
    let params = resolve_params(args)?;
    check_paths(&args.input, &args.output)?;

    info!(
        input = ?args.input,
        output = ?args.output,
        max_vertex_count = params.max_vertex_count,
        wlop_iterations = params.wlop_iterations,
        flip_faces = params.flip_faces,
        "Building 2.5D mesh"
    );

    let outcome = TerrainPipeline::new(params).run_file(&args.input, &args.output)?;
    let report = &outcome.report;

    if let Some(path) = &args.report {
        let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report to {:?}", path))?;
    }

    match cli.format {
        OutputFormat::Json => {
            let summary = BuildSummary {
                input: args.input.display().to_string(),
                output: args.output.display().to_string(),
                report,
            };
            output::print(&summary, cli.format, cli.quiet);
        }
        OutputFormat::Text => {
            if !cli.quiet {
                print_text(args, report);
            }
        }
    }

    Ok(())
}

fn print_text(args: &BuildArgs, report: &MeshingReport) {
    println!("{}", "2.5D Mesh".bold().underline());
    output::field("Input", args.input.display());
    output::field("Output", args.output.display());
    output::field(
        "Points",
        format!(
            "{} ground, {} non-ground, {} dropped",
            report.classification.ground,
            report.classification.non_ground,
            report.classification.dropped
        ),
    );
    output::field(
        "Planes",
        format!(
            "{} detected, {} points promoted",
            report.planes.planes.len(),
            report.planes.promoted
        ),
    );
    output::field(
        "Grid",
        format!(
            "step {:.4}, {} cells, {} smoothed",
            report.grid.grid_step, report.grid.occupied_cells, report.grid.smoothed
        ),
    );
    output::field(
        "Simplified",
        format!(
            "{} -> {} points ({:.2}%)",
            report.simplification.input,
            report.simplification.output,
            report.simplification.retain_percentage
        ),
    );
    output::field("Vertices", report.vertices);
    output::field("Faces", report.faces);

    println!();
    println!("{}", "Timing".bold());
    for timing in &report.timings {
        output::field(timing.stage.as_str(), output::format_ms(timing.elapsed_ms));
    }
    output::field("Total", output::format_ms(report.total_ms()));

    let warnings: Vec<_> = report.warnings().collect();
    if !warnings.is_empty() {
        println!();
        println!("{}", "Warnings".yellow().bold());
        for warning in warnings {
            println!("  {} {}", "!".yellow(), warning.message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_terrain::ErrorKind;
    use tempfile::TempDir;

    fn args(input: PathBuf) -> BuildArgs {
        BuildArgs {
            input,
            output: PathBuf::from(DEFAULT_OUTPUT),
            max_vertex_count: None,
            wlop_iterations: None,
            flip_faces: false,
            no_flip_faces: false,
            seed: None,
            config: None,
            report: None,
        }
    }

    #[test]
    fn test_flags_override_config() {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join("terrain.toml");
        std::fs::write(&config, "max_vertex_count = 500\nwlop_iterations = 20\n").unwrap();

        let mut a = args(dir.path().join("in.ply"));
        a.config = Some(config);
        a.wlop_iterations = Some(3);
        let params = resolve_params(&a).unwrap();
        assert_eq!(params.max_vertex_count, 500);
        assert_eq!(params.wlop_iterations, 3);
    }

    #[test]
    fn test_no_flip_faces_overrides_config() {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join("terrain.toml");
        std::fs::write(&config, "flip_faces = true\n").unwrap();

        let mut a = args(dir.path().join("in.ply"));
        a.config = Some(config);
        assert!(resolve_params(&a).unwrap().flip_faces);

        a.no_flip_faces = true;
        assert!(!resolve_params(&a).unwrap().flip_faces);
    }

    #[test]
    fn test_last_flip_flag_wins() {
        use clap::Parser;

        let cli = Cli::try_parse_from([
            "mesh25d",
            "build",
            "in.ply",
            "--flip-faces",
            "--no-flip-faces",
        ])
        .unwrap();
        let crate::Commands::Build(a) = cli.command else {
            panic!("expected build command");
        };
        assert!(!a.flip_faces);
        assert!(a.no_flip_faces);
        assert!(!resolve_params(&a).unwrap().flip_faces);

        let cli = Cli::try_parse_from([
            "mesh25d",
            "build",
            "in.ply",
            "--no-flip-faces",
            "--flip-faces",
        ])
        .unwrap();
        let crate::Commands::Build(a) = cli.command else {
            panic!("expected build command");
        };
        assert!(resolve_params(&a).unwrap().flip_faces);
    }

    #[test]
    fn test_out_of_range_flags_are_clamped() {
        let mut a = args(PathBuf::from("in.ply"));
        a.max_vertex_count = Some(-10);
        a.wlop_iterations = Some(100_000);
        let params = resolve_params(&a).unwrap();
        assert_eq!(params.max_vertex_count, 0);
        assert_eq!(params.wlop_iterations, 1000);

        a.wlop_iterations = Some(-1);
        assert_eq!(resolve_params(&a).unwrap().wlop_iterations, 1);
    }

    #[test]
    fn test_missing_input_is_configuration_error() {
        let dir = TempDir::new().unwrap();
        let err = check_paths(&dir.path().join("absent.ply"), &dir.path().join("out.ply"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_missing_output_directory_is_configuration_error() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.ply");
        std::fs::write(&input, "ply\n").unwrap();
        let err = check_paths(&input, &dir.path().join("nope").join("out.ply")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        assert!(check_paths(&input, &dir.path().join("out.ply")).is_ok());
    }
}
