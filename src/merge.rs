use log::{debug, info};
use rust_xlsxwriter::Workbook;
use std::collections::HashSet;
use std::path::Path;

use crate::model::{NormalizationError, NormalizedRecord, Origin, COLUMNS, MAX_EXACT_FLOAT_COUNT};
use crate::sheet;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergedDataset {
    pub records: Vec<NormalizedRecord>,
}

/// Result of applying the code whitelist. Dropped rows are expected, not errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Filtered {
    pub dataset: MergedDataset,
    pub dropped: usize,
}

impl MergedDataset {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn retain_codes(&self, whitelist: &[String]) -> Filtered {
        let keep: HashSet<&str> = whitelist.iter().map(|code| code.trim()).collect();
        let records: Vec<NormalizedRecord> = self
            .records
            .iter()
            .filter(|record| keep.contains(record.procedure_code.as_str()))
            .cloned()
            .collect();
        let dropped = self.records.len() - records.len();
        debug!("whitelist kept {} rows, dropped {}", records.len(), dropped);
        Filtered {
            dataset: MergedDataset { records },
            dropped,
        }
    }
}

/// Concatenates per-year, per-origin tables in order. No aggregation across tables.
pub fn merge(tables: Vec<Vec<NormalizedRecord>>) -> MergedDataset {
    MergedDataset {
        records: tables.into_iter().flatten().collect(),
    }
}

/// Writes the dataset as a single-sheet workbook, replacing any existing file.
pub fn write_xlsx(dataset: &MergedDataset, path: &Path) -> Result<(), NormalizationError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| NormalizationError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    for (col, name) in COLUMNS.iter().enumerate() {
        worksheet.write_string(0, col as u16, *name)?;
    }
    for (index, record) in dataset.records.iter().enumerate() {
        let row = (index + 1) as u32;
        worksheet.write_string(row, 0, &record.procedure_code)?;
        // Counts a float cannot hold exactly are stored as text; read_xlsx parses both.
        if record.count <= MAX_EXACT_FLOAT_COUNT {
            worksheet.write_number(row, 1, record.count as f64)?;
        } else {
            worksheet.write_string(row, 1, record.count.to_string())?;
        }
        worksheet.write_string(row, 2, &record.year)?;
        worksheet.write_string(row, 3, record.origin.as_str())?;
    }
    workbook.save(path)?;

    info!("wrote {} rows to {}", dataset.len(), path.display());
    Ok(())
}

/// Reads back a dataset written by [`write_xlsx`].
pub fn read_xlsx(path: &Path) -> Result<MergedDataset, NormalizationError> {
    let (headers, rows) = sheet::read_sheet(path, 0)?;
    for column in COLUMNS {
        if !headers.iter().any(|header| header == column) {
            return Err(NormalizationError::MissingExpectedColumn {
                table: path.display().to_string(),
                column: column.to_string(),
                available: headers.clone(),
            });
        }
    }

    let mut records = Vec::with_capacity(rows.len());
    for (index, row) in rows.iter().enumerate() {
        let count = &row["count"];
        let count = count.parse::<u64>().map_err(|_| NormalizationError::InvalidCount {
            row: index + 2,
            column: "count".to_string(),
            value: count.clone(),
        })?;
        records.push(NormalizedRecord {
            procedure_code: row["procedure_code"].clone(),
            count,
            year: row["year"].clone(),
            origin: row["origin"].parse::<Origin>()?,
        });
    }

    Ok(MergedDataset { records })
}
