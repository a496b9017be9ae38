use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Canonical column order of every normalized table and of the persisted output.
pub const COLUMNS: [&str; 4] = ["procedure_code", "count", "year", "origin"];

/// Placeholder used by the hospital exports for suppressed counts.
pub const SENTINEL: &str = ".";

/// Largest whole number a spreadsheet float holds exactly (2^53).
pub const MAX_EXACT_FLOAT_COUNT: u64 = 1 << 53;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Hospital,
    Liberal,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Hospital => "hospital",
            Origin::Liberal => "liberal",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Origin {
    type Err = NormalizationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "hospital" => Ok(Origin::Hospital),
            "liberal" => Ok(Origin::Liberal),
            other => Err(NormalizationError::UnknownOrigin(other.to_string())),
        }
    }
}

/// A configured year, held as its two-digit suffix (`"15"` for 2015).
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Year {
    suffix: String,
}

impl Year {
    pub fn from_suffix(suffix: &str) -> Result<Self, NormalizationError> {
        let suffix = suffix.trim();
        if suffix.len() != 2 || !suffix.bytes().all(|b| b.is_ascii_digit()) {
            return Err(NormalizationError::Config(format!(
                "year suffix must be two digits, got '{}'",
                suffix
            )));
        }
        Ok(Self { suffix: suffix.to_string() })
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Four-digit form written into the `year` column.
    pub fn full(&self) -> String {
        format!("20{}", self.suffix)
    }
}

impl fmt::Display for Year {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "20{}", self.suffix)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub procedure_code: String,
    pub count: u64,
    pub year: String,
    pub origin: Origin,
}

impl NormalizedRecord {
    /// Builds a record from a parsed count. A suppressed count (`None`) becomes 0 here and
    /// nowhere else.
    pub fn new(procedure_code: impl Into<String>, count: Option<u64>, year: &Year, origin: Origin) -> Self {
        Self {
            procedure_code: procedure_code.into(),
            count: count.unwrap_or(0),
            year: year.full(),
            origin,
        }
    }
}

/// One source file as delivered, before any column reconciliation.
#[derive(Clone, Debug)]
pub struct RawTable {
    pub year: Year,
    pub origin: Origin,
    pub source: PathBuf,
    pub headers: Vec<String>,
    pub rows: Vec<BTreeMap<String, String>>,
}

impl RawTable {
    pub fn has_column(&self, name: &str) -> bool {
        self.headers.iter().any(|header| header == name)
    }

    /// Label used in error messages, e.g. `liberal 2015`.
    pub fn label(&self) -> String {
        format!("{} {}", self.origin, self.year)
    }
}

/// Typed count parse. The sentinel and empty cells are `None`; anything that is not a
/// non-negative whole number is an error.
pub fn parse_count(value: &str, row: usize, column: &str) -> Result<Option<u64>, NormalizationError> {
    let value = value.trim();
    if value.is_empty() || value == SENTINEL {
        return Ok(None);
    }
    if let Ok(count) = value.parse::<u64>() {
        return Ok(Some(count));
    }
    match value.parse::<f64>() {
        Ok(float)
            if float.is_finite()
                && float >= 0.0
                && float.fract() == 0.0
                && float <= MAX_EXACT_FLOAT_COUNT as f64 =>
        {
            Ok(Some(float as u64))
        }
        _ => Err(NormalizationError::InvalidCount {
            row,
            column: column.to_string(),
            value: value.to_string(),
        }),
    }
}

#[derive(Debug, Error)]
pub enum NormalizationError {
    #[error("no {origin} source file at {}", .path.display())]
    MissingSourceFile { origin: Origin, path: PathBuf },

    #[error("could not read {} or its fallback {}", .primary.display(), .secondary.display())]
    FormatFallbackExhausted {
        primary: PathBuf,
        secondary: PathBuf,
        #[source]
        source: Box<NormalizationError>,
    },

    #[error("{table}: missing column '{column}' (found: {})", .available.join(", "))]
    MissingExpectedColumn {
        table: String,
        column: String,
        available: Vec<String>,
    },

    #[error("{table}: several columns match '{fragment}': {}", .candidates.join(", "))]
    AmbiguousColumn {
        table: String,
        fragment: String,
        candidates: Vec<String>,
    },

    #[error("{table}: procedure code '{code}' appears on rows {first_row} and {row}")]
    DuplicateCode {
        table: String,
        code: String,
        first_row: usize,
        row: usize,
    },

    #[error("row {row}, column '{column}': '{value}' is not a count")]
    InvalidCount { row: usize, column: String, value: String },

    #[error("{} has no sheet at index {index}", .path.display())]
    MissingSheet { path: PathBuf, index: usize },

    #[error("unknown origin '{0}'")]
    UnknownOrigin(String),

    #[error("{origin} provider has no table loaded")]
    NotLoaded { origin: Origin },

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid CSV in {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("invalid spreadsheet {}: {source}", .path.display())]
    Spreadsheet {
        path: PathBuf,
        #[source]
        source: calamine::Error,
    },

    #[error("failed to write output: {0}")]
    Persist(#[from] rust_xlsxwriter::XlsxError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid configuration file {}: {source}", .path.display())]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Maps an open failure to `MissingSourceFile` when the file is simply absent.
pub fn read_error(origin: Origin, path: PathBuf, source: std::io::Error) -> NormalizationError {
    if source.kind() == std::io::ErrorKind::NotFound {
        NormalizationError::MissingSourceFile { origin, path }
    } else {
        NormalizationError::Io { path, source }
    }
}

/// One source kind. `read` loads a year's file, `validate` checks that the canonical
/// columns can be resolved, `convert` produces the normalized rows.
pub trait Provider {
    fn get_metadata(&self) -> BTreeMap<String, String>;
    fn read(&mut self, year: &Year) -> Result<(), NormalizationError>;
    fn validate(&self) -> Result<(), NormalizationError>;
    fn convert(&self) -> Result<Vec<NormalizedRecord>, NormalizationError>;
}
