//! Pipeline configuration: where the exports live, which years to ingest, which
//! procedure codes to keep.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::model::{NormalizationError, Year};

pub const REFERENCE_YEARS: [&str; 9] = ["15", "16", "17", "18", "19", "20", "21", "22", "23"];
pub const REFERENCE_WHITELIST: [&str; 4] = ["JPHJ0010", "JPHJ0020", "JPHB0010", "JPHB0020"];
pub const OUTPUT_FILE: &str = "merged_data.xlsx";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory holding `open_ccam_{YY}_reg.csv`
    pub hospital_dir: PathBuf,
    /// Directory holding `20{YY}_actes-techniques-ccam_serie-annuelle.xlsx` (or `.xls`)
    pub liberal_dir: PathBuf,
    pub output_path: PathBuf,
    /// Two-digit year suffixes, ingested in this order
    pub years: Vec<String>,
    pub whitelist: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::with_base_dir("./data")
    }
}

impl PipelineConfig {
    /// Reference years and codes with every file directly under `dir`.
    pub fn with_base_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            hospital_dir: dir.to_path_buf(),
            liberal_dir: dir.to_path_buf(),
            output_path: dir.join(OUTPUT_FILE),
            years: REFERENCE_YEARS.iter().map(|year| year.to_string()).collect(),
            whitelist: REFERENCE_WHITELIST.iter().map(|code| code.to_string()).collect(),
        }
    }

    /// Keeps years and whitelist, moves every path under `dir`.
    pub fn rebased(self, dir: impl AsRef<Path>) -> Self {
        Self {
            years: self.years,
            whitelist: self.whitelist,
            ..Self::with_base_dir(dir)
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self, NormalizationError> {
        let data = std::fs::read_to_string(path).map_err(|source| NormalizationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = serde_json::from_str(&data).map_err(|source| NormalizationError::ConfigFile {
            path: path.to_path_buf(),
            source,
        })?;
        config.whitelist = config
            .whitelist
            .iter()
            .map(|code| code.trim())
            .filter(|code| !code.is_empty())
            .map(String::from)
            .collect();
        Ok(config)
    }

    pub fn years(&self) -> Result<Vec<Year>, NormalizationError> {
        self.years.iter().map(|suffix| Year::from_suffix(suffix)).collect()
    }

    pub fn validate(&self) -> Result<(), NormalizationError> {
        if self.years.is_empty() {
            return Err(NormalizationError::Config("no years configured".into()));
        }
        if self.whitelist.iter().all(|code| code.trim().is_empty()) {
            return Err(NormalizationError::Config("procedure code whitelist is empty".into()));
        }
        self.years().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_reference_layout() {
        let config = PipelineConfig::default();
        assert_eq!(config.output_path, Path::new("./data").join("merged_data.xlsx"));
        assert_eq!(config.years.len(), 9);
        assert_eq!(config.whitelist, REFERENCE_WHITELIST);
        assert!(config.validate().is_ok());
        assert_eq!(config.years().unwrap()[0].full(), "2015");
    }

    #[test]
    fn partial_json_takes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(&path, r#"{"years": ["22", "23"], "hospital_dir": "exports/hopital"}"#).unwrap();

        let config = PipelineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.years, vec!["22", "23"]);
        assert_eq!(config.hospital_dir, PathBuf::from("exports/hopital"));
        assert_eq!(config.liberal_dir, PathBuf::from("./data"));
        assert_eq!(config.whitelist.len(), 4);
    }

    #[test]
    fn whitelist_from_file_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(&path, r#"{"whitelist": [" JPHJ0010", "JPHB0020 ", "  "]}"#).unwrap();

        let config = PipelineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.whitelist, vec!["JPHJ0010", "JPHB0020"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn malformed_json_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(&path, "{ years: ").unwrap();

        match PipelineConfig::from_json_file(&path) {
            Err(NormalizationError::ConfigFile { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("expected ConfigFile error, got {other:?}"),
        }
    }

    #[test]
    fn rebased_keeps_selection() {
        let mut config = PipelineConfig::default();
        config.years = vec!["20".into()];
        let config = config.rebased("/tmp/ccam");
        assert_eq!(config.years, vec!["20"]);
        assert_eq!(config.liberal_dir, PathBuf::from("/tmp/ccam"));
        assert_eq!(config.output_path, PathBuf::from("/tmp/ccam/merged_data.xlsx"));
    }

    #[test]
    fn bad_selections_are_rejected() {
        let mut config = PipelineConfig::default();
        config.years = vec!["2015".into()];
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.years.clear();
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.whitelist.clear();
        assert!(config.validate().is_err());
    }
}
