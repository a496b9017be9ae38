use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::aggregate::sum_grouped;
use crate::merge::MergedDataset;
use crate::model::NormalizationError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CodeTotal {
    pub procedure_code: String,
    pub count: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct YearCodeTotal {
    pub year: String,
    pub procedure_code: String,
    pub count: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct YearTotal {
    pub year: String,
    pub count: u64,
}

/// Collapses year and origin.
pub fn totals_by_code(dataset: &MergedDataset) -> Vec<CodeTotal> {
    sum_grouped(&dataset.records, |r| r.procedure_code.clone())
        .into_iter()
        .map(|(procedure_code, count)| CodeTotal { procedure_code, count })
        .collect()
}

/// Collapses origin only.
pub fn totals_by_year_and_code(dataset: &MergedDataset) -> Vec<YearCodeTotal> {
    sum_grouped(&dataset.records, |r| (r.year.clone(), r.procedure_code.clone()))
        .into_iter()
        .map(|((year, procedure_code), count)| YearCodeTotal {
            year,
            procedure_code,
            count,
        })
        .collect()
}

pub fn totals_by_year(dataset: &MergedDataset) -> Vec<YearTotal> {
    sum_grouped(&dataset.records, |r| r.year.clone())
        .into_iter()
        .map(|(year, count)| YearTotal { year, count })
        .collect()
}

/// Everything the chart renderer reads, serialized as one JSON document.
#[derive(Clone, Debug, Serialize)]
pub struct Summary {
    pub generated_at: DateTime<Utc>,
    pub rows: usize,
    pub by_code: Vec<CodeTotal>,
    pub by_year: Vec<YearTotal>,
    pub by_year_and_code: Vec<YearCodeTotal>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<BTreeMap<String, String>>,
}

impl Summary {
    pub fn from_dataset(dataset: &MergedDataset, generated_at: DateTime<Utc>) -> Self {
        Self {
            generated_at,
            rows: dataset.len(),
            by_code: totals_by_code(dataset),
            by_year: totals_by_year(dataset),
            by_year_and_code: totals_by_year_and_code(dataset),
            sources: Vec::new(),
        }
    }

    pub fn with_sources(mut self, sources: Vec<BTreeMap<String, String>>) -> Self {
        self.sources = sources;
        self
    }

    pub fn write_json(&self, path: &Path) -> Result<(), NormalizationError> {
        let io_error = |source: std::io::Error| NormalizationError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut writer = BufWriter::new(File::create(path).map_err(io_error)?);
        serde_json::to_writer_pretty(&mut writer, self).map_err(|err| io_error(err.into()))?;
        writer.flush().map_err(io_error)
    }
}
