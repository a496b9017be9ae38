use chrono::Utc;
use log::{debug, warn};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::model::{parse_count, NormalizationError, NormalizedRecord, Origin, Provider, RawTable, Year};
use crate::sheet;

const FILE_PREFIX: &str = "20";
const FILE_STEM: &str = "_actes-techniques-ccam_serie-annuelle";
const PRIMARY_EXTENSION: &str = "xlsx";
const FALLBACK_EXTENSION: &str = "xls";

/// The per-code counts live on the second sheet; the first one is a notice.
const SHEET_INDEX: usize = 1;

const CODE_COLUMN: &str = "Code Acte";
/// The count header carries the year ("Quantité d'actes 2015"), so it is found by this
/// fragment, compared case-insensitively. Exactly one header must match. The fragment
/// stops before the accent so precomposed, decomposed (NFD) and unaccented spellings
/// all match.
const COUNT_FRAGMENT: &str = "quantit";
/// Source codes lack the trailing phase digit of the hospital coding.
const PHASE_SUFFIX: &str = "0";

pub fn source_paths(dir: &Path, year: &Year) -> (PathBuf, PathBuf) {
    let stem = format!("{}{}{}", FILE_PREFIX, year.suffix(), FILE_STEM);
    (
        dir.join(format!("{stem}.{PRIMARY_EXTENSION}")),
        dir.join(format!("{stem}.{FALLBACK_EXTENSION}")),
    )
}

fn load(path: &Path, year: &Year) -> Result<RawTable, NormalizationError> {
    let (headers, rows) = sheet::read_sheet(path, SHEET_INDEX)?;
    Ok(RawTable {
        year: year.clone(),
        origin: Origin::Liberal,
        source: path.to_path_buf(),
        headers,
        rows,
    })
}

struct Columns {
    code: String,
    count: String,
}

fn resolve(table: &RawTable) -> Result<Columns, NormalizationError> {
    if !table.has_column(CODE_COLUMN) {
        return Err(NormalizationError::MissingExpectedColumn {
            table: table.label(),
            column: CODE_COLUMN.to_string(),
            available: table.headers.clone(),
        });
    }

    let candidates: Vec<&String> = table
        .headers
        .iter()
        .filter(|header| header.to_lowercase().contains(COUNT_FRAGMENT))
        .collect();
    match candidates.as_slice() {
        [count] => Ok(Columns {
            code: CODE_COLUMN.to_string(),
            count: count.to_string(),
        }),
        [] => Err(NormalizationError::MissingExpectedColumn {
            table: table.label(),
            column: format!("*{COUNT_FRAGMENT}*"),
            available: table.headers.clone(),
        }),
        _ => Err(NormalizationError::AmbiguousColumn {
            table: table.label(),
            fragment: COUNT_FRAGMENT.to_string(),
            candidates: candidates.iter().map(|candidate| candidate.to_string()).collect(),
        }),
    }
}

pub struct ProviderHandler {
    pub source_dir: PathBuf,
    pub table: Option<RawTable>,
}

impl ProviderHandler {
    pub fn new(source_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            table: None,
        }
    }

    fn table(&self) -> Result<&RawTable, NormalizationError> {
        self.table.as_ref().ok_or(NormalizationError::NotLoaded { origin: Origin::Liberal })
    }
}

impl Provider for ProviderHandler {
    fn get_metadata(&self) -> BTreeMap<String, String> {
        let mut metadata = BTreeMap::from([
            ("sourceProvider".to_string(), Origin::Liberal.to_string()),
            ("sourceFormat".to_string(), "spreadsheet".to_string()),
            ("ingestedAt".to_string(), Utc::now().to_rfc3339()),
            ("version".to_string(), "1.0".to_string()),
        ]);
        if let Some(table) = &self.table {
            metadata.insert("sourcePath".to_string(), table.source.display().to_string());
            metadata.insert("year".to_string(), table.year.full());
            metadata.insert("rows".to_string(), table.rows.len().to_string());
        }
        metadata
    }

    fn read(&mut self, year: &Year) -> Result<(), NormalizationError> {
        let (primary, secondary) = source_paths(&self.source_dir, year);
        debug!("reading private-practice export {}", primary.display());
        let table = match load(&primary, year) {
            Ok(table) => table,
            Err(err) => {
                warn!("could not read {} ({}), trying {}", primary.display(), err, secondary.display());
                load(&secondary, year).map_err(|source| NormalizationError::FormatFallbackExhausted {
                    primary: primary.clone(),
                    secondary: secondary.clone(),
                    source: Box::new(source),
                })?
            }
        };
        self.table = Some(table);
        Ok(())
    }

    fn validate(&self) -> Result<(), NormalizationError> {
        resolve(self.table()?).map(|_| ())
    }

    fn convert(&self) -> Result<Vec<NormalizedRecord>, NormalizationError> {
        let table = self.table()?;
        let columns = resolve(table)?;

        // The export is one row per code; a repeat would break the per-key invariant.
        let mut seen: HashMap<&str, usize> = HashMap::new();
        let mut records = Vec::with_capacity(table.rows.len());
        for (index, row) in table.rows.iter().enumerate() {
            let code = row.get(&columns.code).map(|code| code.trim()).unwrap_or("");
            if code.is_empty() {
                debug!("{}: skipping row {} without a procedure code", table.label(), index + 2);
                continue;
            }
            if let Some(first_row) = seen.insert(code, index + 2) {
                return Err(NormalizationError::DuplicateCode {
                    table: table.label(),
                    code: code.to_string(),
                    first_row,
                    row: index + 2,
                });
            }
            let count = row.get(&columns.count).map(String::as_str).unwrap_or("");
            let count = parse_count(count, index + 2, &columns.count)?;
            records.push(NormalizedRecord::new(
                format!("{code}{PHASE_SUFFIX}"),
                count,
                &table.year,
                Origin::Liberal,
            ));
        }

        Ok(records)
    }
}
