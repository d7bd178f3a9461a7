//! mesh25d: Command-line interface for 2.5D terrain meshing.
//!
//! Builds a height-field mesh from a classified, oriented PLY point cloud
//! and inspects point clouds before meshing.
//!
//! # Logging
//!
//! Set the `RUST_LOG` environment variable to control log output:
//! - `RUST_LOG=mesh_terrain=info` - Stage messages
//! - `RUST_LOG=mesh_terrain=debug` - Per-stage statistics
//! - `RUST_LOG=mesh_terrain::timing=debug` - Performance timing
//! - `RUST_LOG=debug` - All debug output
//!
//! `--log-file` additionally writes the same events to a file.
//!
//! # Example
//!
//! ```bash
//! # Mesh with the default budget
//! mesh25d build points.ply -o odm_25dmesh.ply
//!
//! # Smaller mesh, inverted winding, JSON summary
//! mesh25d --format json build points.ply --max-vertex-count 20000 --flip-faces
//!
//! # Check which fields a point cloud carries
//! mesh25d inspect points.ply
//! ```

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod commands;
mod output;

use commands::{build, inspect};

/// mesh25d - Build 2.5D terrain meshes from point clouds.
///
/// Classifies ground, promotes roof planes, resamples, simplifies and
/// smooths the points, then triangulates them into a height-field mesh.
#[derive(Parser)]
#[command(name = "mesh25d")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format for results
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Suppress all non-error output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Increase output verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Also write log events to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a 2.5D mesh from a PLY point cloud
    Build(build::BuildArgs),

    /// Report the fields, classification and extent of a PLY point cloud
    Inspect {
        /// Input point cloud
        input: PathBuf,
    },
}

fn env_filter(verbose: u8) -> EnvFilter {
    // RUST_LOG wins over -v flags
    if std::env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }
    let level = match verbose {
        0 => "warn",
        1 => "mesh_terrain=info,mesh25d=info",
        2 => "mesh_terrain=debug,mesh25d=debug",
        _ => "trace",
    };
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"))
}

/// Initialize the tracing subscriber based on verbosity level.
///
/// `--quiet` silences the terminal but not the log file.
fn init_tracing(verbose: u8, quiet: bool, log_file: Option<&Path>) -> Result<()> {
    let stderr_layer = (!quiet).then(|| fmt::layer().with_writer(std::io::stderr).compact());

    let file_layer = match log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create log file {:?}", path))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    if stderr_layer.is_none() && file_layer.is_none() {
        return Ok(());
    }

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .with(env_filter(verbose))
        .init();
    Ok(())
}

fn report_error(e: &anyhow::Error) {
    // Terrain errors carry a stable code and a recovery hint
    if let Some(terrain_err) = e.downcast_ref::<mesh_terrain::TerrainError>() {
        eprintln!("{}: {}", "Error".red().bold(), terrain_err);
        eprintln!("  {}: {}", "Code".cyan(), terrain_err.code());
        eprintln!(
            "  {}: {}",
            "Suggestion".green(),
            terrain_err.recovery_suggestion()
        );
        if let Some(path) = terrain_err.path() {
            eprintln!("  {}: {}", "File".yellow(), path.display());
        }
    } else {
        eprintln!("{}: {}", "Error".red().bold(), e);
        for cause in e.chain().skip(1) {
            eprintln!("  {}: {}", "Caused by".yellow(), cause);
        }
    }
}

fn main() -> Result<()> {
    // Install miette's panic hook for better error display
    #[cfg(debug_assertions)]
    miette::set_panic_hook();

    let cli = Cli::parse();

    let result = init_tracing(cli.verbose, cli.quiet, cli.log_file.as_deref()).and_then(|()| {
        match &cli.command {
            Commands::Build(args) => build::run(args, &cli),
            Commands::Inspect { input } => inspect::run(input, &cli),
        }
    });

    if let Err(e) = &result {
        // Errors are reported even with --quiet
        report_error(e);
        std::process::exit(1);
    }

    Ok(())
}
