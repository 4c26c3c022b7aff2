#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line runner for the hydro map pipeline.
//!
//! `hydro_map run --config pipeline.toml` loads, harmonizes, joins,
//! fetches, renders and exports as the file describes. `hydro_map layers
//! <container>` lists what an exported container holds.
//!
//! Uses `indicatif-log-bridge` (via [`hydro_map_cli_utils::init_logger`])
//! so log lines and progress bars never fight for the terminal.

mod config;
mod pipeline;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use hydro_map_cli_utils::IndicatifProgress;
use hydro_map_network::NldiClient;

use crate::config::PipelineConfig;

#[derive(Parser)]
#[command(name = "hydro_map", about = "Hydrologic station mapping pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every stage of a pipeline file
    Run {
        /// Path to the pipeline TOML
        #[arg(long, short)]
        config: PathBuf,
    },
    /// List the layers of an exported container
    Layers {
        /// Path to the `DuckDB` container
        container: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = hydro_map_cli_utils::init_logger();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => {
            let config = PipelineConfig::load(&config)?;
            let endpoints = config
                .network
                .as_ref()
                .map(|n| n.endpoints.clone())
                .unwrap_or_default();
            let client = NldiClient::new(endpoints)?;

            let steps =
                IndicatifProgress::steps_bar(&multi, "Pipeline", pipeline::step_count(&config));
            let fetch = IndicatifProgress::fetch_bar(&multi, "Network");

            let summary = pipeline::run(&config, &client, &steps, &fetch).await?;

            println!();
            println!("{:<32} FEATURES", "LAYER");
            println!("{}", "-".repeat(42));
            for (name, count) in &summary.layers {
                println!("{name:<32} {count}");
            }
            if summary.series_rows > 0 {
                println!("\n{} normalized series rows", summary.series_rows);
            }
            for path in &summary.outputs {
                println!("wrote {}", path.display());
            }

            if summary.failure_count() > 0 {
                println!("\n{} failure(s):", summary.failure_count());
                for failure in &summary.record_failures {
                    println!("  {failure}");
                }
                for failure in &summary.fetch_failures {
                    println!("  {failure}");
                }
                for failure in &summary.export_failures {
                    println!("  {failure}");
                }
            }
        }
        Commands::Layers { container } => {
            let layers = hydro_map_export::list_layers(&container)?;
            println!(
                "{:<32} {:>10} {:<12} GEOMETRY",
                "LAYER", "FEATURES", "CRS"
            );
            println!("{}", "-".repeat(72));
            for layer in &layers {
                println!(
                    "{:<32} {:>10} {:<12} {}",
                    layer.name,
                    layer.feature_count,
                    layer.crs,
                    layer.geometry_types.join(",")
                );
            }
        }
    }

    Ok(())
}
