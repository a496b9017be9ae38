mod aggregate;
mod analysis;
mod config;
mod merge;
mod model;
mod pipeline;
mod provider_hospital;
mod provider_liberal;
mod sheet;

use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use log::info;

use crate::analysis::Summary;
use crate::config::PipelineConfig;

/// Merge yearly CCAM procedure counts from hospital and private-practice exports.
#[derive(Debug, Parser)]
#[command(name = "ccam-normalize", version, about)]
struct Cli {
    /// JSON configuration file; missing fields take the reference values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Read every export from, and write the output to, this directory
    #[arg(long)]
    base_dir: Option<PathBuf>,

    /// Output workbook path
    #[arg(long)]
    output: Option<PathBuf>,

    /// Also write the summary views as JSON to this path
    #[arg(long)]
    summary: Option<PathBuf>,

    /// Skip ingestion and summarize the existing output workbook
    #[arg(long, requires = "summary")]
    from_merged: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(dir) = &cli.base_dir {
        config = config.rebased(dir);
    }
    if let Some(output) = cli.output {
        config.output_path = output;
    }

    let summary = if cli.from_merged {
        let dataset = merge::read_xlsx(&config.output_path)
            .with_context(|| format!("reading {}", config.output_path.display()))?;
        info!("loaded {} rows from {}", dataset.len(), config.output_path.display());
        Summary::from_dataset(&dataset, Utc::now())
    } else {
        let report = pipeline::run(&config).context("pipeline run failed")?;
        info!(
            "{} of {} rows written to {} ({} dropped by the whitelist)",
            report.dataset.len(),
            report.rows_before_filter,
            report.output_path.display(),
            report.dropped_rows
        );
        Summary::from_dataset(&report.dataset, report.generated_at).with_sources(report.sources)
    };

    if let Some(path) = &cli.summary {
        summary
            .write_json(path)
            .with_context(|| format!("writing summary to {}", path.display()))?;
        info!("summary written to {}", path.display());
    }

    Ok(())
}
