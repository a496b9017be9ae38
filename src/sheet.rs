use calamine::{Data, Reader};
use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::Path;

use crate::model::NormalizationError;

pub type Rows = Vec<BTreeMap<String, String>>;

/// Reads one worksheet as a header row plus `header -> cell text` rows.
///
/// The workbook format (xlsx, xls, ...) is detected from the file content rather than
/// its extension.
pub fn read_sheet(path: &Path, index: usize) -> Result<(Vec<String>, Rows), NormalizationError> {
    let bytes = std::fs::read(path).map_err(|source| NormalizationError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let spreadsheet_error = |source: calamine::Error| NormalizationError::Spreadsheet {
        path: path.to_path_buf(),
        source,
    };

    let mut workbook = calamine::open_workbook_auto_from_rs(Cursor::new(bytes)).map_err(spreadsheet_error)?;
    let range = workbook
        .worksheet_range_at(index)
        .ok_or_else(|| NormalizationError::MissingSheet {
            path: path.to_path_buf(),
            index,
        })?
        .map_err(spreadsheet_error)?;

    let mut rows = range.rows();
    let headers: Vec<String> = match rows.next() {
        Some(row) => row.iter().map(cell_text).collect(),
        None => Vec::new(),
    };
    let rows = rows
        .map(|row| headers.iter().cloned().zip(row.iter().map(cell_text)).collect())
        .collect();

    Ok((headers, rows))
}

pub fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(text) => text.trim().to_string(),
        Data::Int(value) => value.to_string(),
        Data::Float(value) => value.to_string(),
        other => other.to_string(),
    }
}


#[cfg(test)]
mod tests {
    use super::testing::write_workbook;
    use super::*;

    #[test]
    fn reads_requested_sheet_with_headers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.xlsx");
        write_workbook(
            &path,
            &[
                vec![vec!["notes"]],
                vec![vec!["Code Acte", "Quantité"], vec!["JPHJ001", "42"], vec!["JPHB002", ""]],
            ],
        );

        let (headers, rows) = read_sheet(&path, 1).unwrap();
        assert_eq!(headers, vec!["Code Acte", "Quantité"]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["Code Acte"], "JPHJ001");
        assert_eq!(rows[0]["Quantité"], "42");
        assert_eq!(rows[1]["Quantité"], "");
    }

    #[test]
    fn missing_sheet_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.xlsx");
        write_workbook(&path, &[vec![vec!["only"]]]);

        match read_sheet(&path, 1) {
            Err(NormalizationError::MissingSheet { index, .. }) => assert_eq!(index, 1),
            other => panic!("expected MissingSheet, got {other:?}"),
        }
    }

    #[test]
    fn garbage_is_a_spreadsheet_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.xlsx");
        std::fs::write(&path, b"not a workbook").unwrap();

        assert!(matches!(read_sheet(&path, 0), Err(NormalizationError::Spreadsheet { .. })));
    }
}
