//! mesh25d inspect command - point cloud fields and classification.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;
use mesh_terrain::record::FieldWidth;
use mesh_terrain::{PlyPointCloud, PointCloudSource, inspect_cloud};

use crate::{Cli, OutputFormat, output};

fn describe(width: &Option<FieldWidth>) -> String {
    match width {
        Some(w) => w.to_string(),
        None => "absent".to_string(),
    }
}

pub fn run(input: &Path, cli: &Cli) -> Result<()> {
    let cloud = PlyPointCloud::new(input).decode()?;
    let summary = inspect_cloud(&cloud)?;

    match cli.format {
        OutputFormat::Json => output::print(&summary, cli.format, cli.quiet),
        OutputFormat::Text => {
            if cli.quiet {
                return Ok(());
            }
            println!("{}", "Point Cloud".bold().underline());
            output::field("File", input.display());
            output::field("Points", summary.points);

            println!();
            println!("{}", "Fields".bold());
            output::field("Position", describe(&summary.schema.position));
            output::field("Normal", describe(&summary.schema.normal));
            output::field("Classification", describe(&summary.schema.classification));
            output::field(
                "Height above ground",
                describe(&summary.schema.height_above_ground),
            );

            println!();
            println!("{}", "Classification".bold());
            let c = &summary.classification;
            output::field("Ground", c.ground);
            output::field("Non-ground", c.non_ground);
            output::field("Dropped", c.dropped);

            if let Some([min, max]) = summary.bounds {
                println!();
                println!("{}", "Extent".bold());
                output::field(
                    "Min",
                    format!("({:.3}, {:.3}, {:.3})", min[0], min[1], min[2]),
                );
                output::field(
                    "Max",
                    format!("({:.3}, {:.3}, {:.3})", max[0], max[1], max[2]),
                );
            }

            if !summary.warnings.is_empty() {
                println!();
                println!("{}", "Warnings".yellow().bold());
                for warning in &summary.warnings {
                    println!("  {} {}", "!".yellow(), warning);
                }
            }
        }
    }

    Ok(())
}
