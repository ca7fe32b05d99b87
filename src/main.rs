//! DRC Engine CLI
//!
//! Command-line interface for chunked dynamic range compression.

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use drc_engine::cli::{commands, Cli, Commands};
use drc_engine::config::EngineConfig;
use drc_engine::engine::ExportFormat;
use drc_engine::jobs::JobOrchestrator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "drc_engine=debug" } else { "drc_engine=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(std::io::stderr)
        .init();

    info!("DRC Engine v{}", env!("CARGO_PKG_VERSION"));

    let config = match &cli.config {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let config = cli.apply_overrides(config);
    let engine = JobOrchestrator::new(config).context("starting the job orchestrator")?;

    match &cli.command {
        Commands::Process {
            input,
            output,
            compress,
        } => {
            let output = output
                .clone()
                .unwrap_or_else(|| commands::default_output_path(input, None));
            let snapshot = commands::process_file(
                &engine,
                input,
                &output,
                compress.params(),
                ExportFormat::new(compress.bit_depth),
            )
            .await?;
            println!("Wrote {}", output.display());
            if let Some(factor) = snapshot.realtime_factor() {
                println!("Processed at {:.1}x real time on the {} backend", factor, snapshot.backend);
            }
        }
        Commands::Batch { dir, out_dir, compress } => {
            let failures = commands::process_dir(
                &engine,
                dir,
                out_dir.as_deref(),
                compress.params(),
                ExportFormat::new(compress.bit_depth),
            )
            .await?;
            if failures > 0 {
                anyhow::bail!("{} file(s) failed", failures);
            }
        }
        Commands::Probe => commands::probe(&engine)?,
    }

    Ok(())
}
