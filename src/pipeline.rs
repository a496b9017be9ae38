use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::config::PipelineConfig;
use crate::merge::{self, MergedDataset};
use crate::model::{NormalizationError, NormalizedRecord, Provider, Year};
use crate::{provider_hospital, provider_liberal};

pub struct PipelineReport {
    pub dataset: MergedDataset,
    pub rows_before_filter: usize,
    pub dropped_rows: usize,
    pub output_path: PathBuf,
    pub generated_at: DateTime<Utc>,
    pub sources: Vec<BTreeMap<String, String>>,
}

pub fn run_provider(provider: &mut dyn Provider, year: &Year) -> Result<Vec<NormalizedRecord>, NormalizationError> {
    provider.read(year)?;
    provider.validate()?;
    provider.convert()
}

/// Reads every configured year from both sources, merges, filters and writes the
/// output. Any failure aborts before the output is touched.
pub fn run(config: &PipelineConfig) -> Result<PipelineReport, NormalizationError> {
    config.validate()?;
    let years = config.years()?;

    let mut hospital = provider_hospital::ProviderHandler::new(&config.hospital_dir);
    let mut liberal = provider_liberal::ProviderHandler::new(&config.liberal_dir);
    let providers: [&mut dyn Provider; 2] = [&mut hospital, &mut liberal];

    let mut tables = Vec::with_capacity(years.len() * providers.len());
    let mut sources = Vec::with_capacity(tables.capacity());
    for provider in providers {
        for year in &years {
            let records = run_provider(provider, year)?;
            let metadata = provider.get_metadata();
            debug!("{:?}", metadata);
            info!(
                "{} {}: {} normalized rows",
                metadata.get("sourceProvider").map(String::as_str).unwrap_or("?"),
                year,
                records.len()
            );
            tables.push(records);
            sources.push(metadata);
        }
    }

    let merged = merge::merge(tables);
    let rows_before_filter = merged.len();
    let filtered = merged.retain_codes(&config.whitelist);
    info!(
        "kept {} of {} rows, {} outside the procedure whitelist",
        filtered.dataset.len(),
        rows_before_filter,
        filtered.dropped
    );
    if filtered.dataset.is_empty() {
        warn!("no row matched the procedure whitelist {:?}", config.whitelist);
    }

    merge::write_xlsx(&filtered.dataset, &config.output_path)?;

    Ok(PipelineReport {
        dataset: filtered.dataset,
        rows_before_filter,
        dropped_rows: filtered.dropped,
        output_path: config.output_path.clone(),
        generated_at: Utc::now(),
        sources,
    })
}
