use chrono::Utc;
use log::debug;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::aggregate;
use crate::model::{
    parse_count, read_error, NormalizationError, NormalizedRecord, Origin, Provider, RawTable, Year,
};

const FILE_PREFIX: &str = "open_ccam_";
const FILE_SUFFIX: &str = "_reg.csv";

const CODE_COLUMN: &str = "acte";
const COUNT_COLUMN: &str = "nb_actes";

/// Header spellings that changed across years, mapped to the name used downstream.
/// `dms_globale` is the average length of stay; it is renamed but never projected.
const COLUMN_ALIASES: [(&str, &str); 2] = [("Acte CCAM + phase", CODE_COLUMN), ("dms_globale", "dms")];

fn canonical_name(header: &str) -> &str {
    COLUMN_ALIASES
        .iter()
        .find(|(alias, _)| *alias == header)
        .map(|(_, name)| *name)
        .unwrap_or(header)
}

pub fn source_path(dir: &Path, year: &Year) -> PathBuf {
    dir.join(format!("{}{}{}", FILE_PREFIX, year.suffix(), FILE_SUFFIX))
}

/// The exports are UTF-8 in recent years and Windows-1252 in older ones.
fn decode(bytes: &[u8]) -> Cow<'_, str> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => encoding_rs::WINDOWS_1252.decode(bytes).0,
    }
}

fn parse_csv(data: &str, path: &Path, year: &Year) -> Result<RawTable, NormalizationError> {
    let csv_error = |source: csv::Error| NormalizationError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(data.as_bytes());

    let headers: Vec<String> = rdr.headers().map_err(csv_error)?.iter().map(String::from).collect();
    let mut rows = Vec::new();
    for record in rdr.records() {
        let record = record.map_err(csv_error)?;
        rows.push(headers.iter().cloned().zip(record.iter().map(String::from)).collect());
    }

    Ok(RawTable {
        year: year.clone(),
        origin: Origin::Hospital,
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
    let find = |wanted: &str| {
        table
            .headers
            .iter()
            .find(|header| canonical_name(header) == wanted)
            .cloned()
            .ok_or_else(|| NormalizationError::MissingExpectedColumn {
                table: table.label(),
                column: wanted.to_string(),
                available: table.headers.clone(),
            })
    };
    Ok(Columns {
        code: find(CODE_COLUMN)?,
        count: find(COUNT_COLUMN)?,
    })
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
        self.table.as_ref().ok_or(NormalizationError::NotLoaded { origin: Origin::Hospital })
    }
}

impl Provider for ProviderHandler {
    fn get_metadata(&self) -> BTreeMap<String, String> {
        let mut metadata = BTreeMap::from([
            ("sourceProvider".to_string(), Origin::Hospital.to_string()),
            ("sourceFormat".to_string(), "csv".to_string()),
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
        let path = source_path(&self.source_dir, year);
        debug!("reading hospital export {}", path.display());
        let bytes = std::fs::read(&path).map_err(|source| read_error(Origin::Hospital, path.clone(), source))?;
        self.table = Some(parse_csv(&decode(&bytes), &path, year)?);
        Ok(())
    }

    fn validate(&self) -> Result<(), NormalizationError> {
        resolve(self.table()?).map(|_| ())
    }

    fn convert(&self) -> Result<Vec<NormalizedRecord>, NormalizationError> {
        let table = self.table()?;
        let columns = resolve(table)?;

        let mut records = Vec::with_capacity(table.rows.len());
        for (index, row) in table.rows.iter().enumerate() {
            let code = row.get(&columns.code).map(String::as_str).unwrap_or("");
            if code.is_empty() {
                debug!("{}: skipping line {} without a procedure code", table.label(), index + 2);
                continue;
            }
            let count = row.get(&columns.count).map(String::as_str).unwrap_or("");
            let count = parse_count(count, index + 2, &columns.count)?;
            records.push(NormalizedRecord::new(code, count, &table.year, Origin::Hospital));
        }

        Ok(aggregate::sum_by_key(&records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn year(suffix: &str) -> Year {
        Year::from_suffix(suffix).unwrap()
    }

    fn handler_for(csv: &str, suffix: &str) -> ProviderHandler {
        let path = PathBuf::from(format!("open_ccam_{suffix}_reg.csv"));
        let mut handler = ProviderHandler::new(".");
        handler.table = Some(parse_csv(csv, &path, &year(suffix)).unwrap());
        handler
    }

    #[test]
    fn placeholder_rows_are_summed_into_one() {
        let handler = handler_for("acte;nb_actes;reg\nJPHJ0010;.;1\nJPHJ0010;5;2\n", "15");
        assert!(handler.validate().is_ok());
        let converted = handler.convert().unwrap();
        assert_eq!(
            converted,
            vec![NormalizedRecord {
                procedure_code: "JPHJ0010".into(),
                count: 5,
                year: "2015".into(),
                origin: Origin::Hospital,
            }]
        );
    }

    #[test]
    fn phase_column_alias_is_accepted() {
        let handler = handler_for(
            "reg;Acte CCAM + phase;nb_actes;dms_globale\n11;JPHB0020;12;.\n84;JPHB0020;8;3.2\n93;JPHJ0020;4;.\n",
            "18",
        );
        let converted = handler.convert().unwrap();
        assert_eq!(converted.len(), 2);
        assert_eq!(converted[0].procedure_code, "JPHB0020");
        assert_eq!(converted[0].count, 20);
        assert_eq!(converted[1].count, 4);
    }

    #[test]
    fn output_has_unique_keys() {
        let handler = handler_for(
            "acte;nb_actes;reg\nA;1;1\nB;2;1\nA;3;2\nB;.;2\nC;4;1\nA;.;3\n",
            "20",
        );
        let converted = handler.convert().unwrap();
        let keys: HashSet<_> = converted
            .iter()
            .map(|r| (r.procedure_code.clone(), r.year.clone(), r.origin))
            .collect();
        assert_eq!(keys.len(), converted.len());
        assert_eq!(converted.len(), 3);
    }

    #[test]
    fn missing_count_column_is_reported() {
        let handler = handler_for("acte;volume\nJPHJ0010;3\n", "16");
        match handler.validate() {
            Err(NormalizationError::MissingExpectedColumn { column, available, .. }) => {
                assert_eq!(column, "nb_actes");
                assert_eq!(available, vec!["acte", "volume"]);
            }
            other => panic!("expected MissingExpectedColumn, got {other:?}"),
        }
        assert!(handler.convert().is_err());
    }

    #[test]
    fn ragged_rows_fail_to_parse() {
        let path = PathBuf::from("open_ccam_15_reg.csv");
        let result = parse_csv("acte;nb_actes\nJPHJ0010;1;extra\n", &path, &year("15"));
        assert!(matches!(result, Err(NormalizationError::Csv { .. })));
    }

    #[test]
    fn reads_latin1_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = b"acte;nb_actes;libell".to_vec();
        bytes.push(0xE9);
        bytes.extend_from_slice(b"\nJPHJ0010;9;r\xE9duction\n");
        std::fs::write(dir.path().join("open_ccam_17_reg.csv"), bytes).unwrap();

        let mut handler = ProviderHandler::new(dir.path());
        handler.read(&year("17")).unwrap();
        let table = handler.table.as_ref().unwrap();
        assert!(table.has_column("libellé"));
        assert_eq!(handler.convert().unwrap()[0].count, 9);
        assert_eq!(handler.get_metadata()["year"], "2017");
    }

    #[test]
    fn absent_file_is_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let mut handler = ProviderHandler::new(dir.path());
        match handler.read(&year("19")) {
            Err(NormalizationError::MissingSourceFile { origin, path }) => {
                assert_eq!(origin, Origin::Hospital);
                assert!(path.ends_with("open_ccam_19_reg.csv"));
            }
            other => panic!("expected MissingSourceFile, got {other:?}"),
        }
    }
}
