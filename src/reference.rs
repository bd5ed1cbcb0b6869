//! Header-addressed reads of the delimited reference tables
//! (PatentsView TSVs, GCPD, OECD green classes).

use anyhow::{anyhow, Context, Result};
use csv::ReaderBuilder;
use std::path::Path;
use tracing::debug;

/// Reads the named columns from every row of a delimited file. Cells are
/// trimmed and empty cells come back as `None`.
pub fn read_columns(
    path: &Path,
    delimiter: u8,
    columns: &[&str],
) -> Result<Vec<Vec<Option<String>>>> {
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("opening reference table {}", path.display()))?;

    let headers = reader
        .headers()
        .with_context(|| format!("reading header of {}", path.display()))?
        .clone();

    let indices = columns
        .iter()
        .map(|column| {
            headers
                .iter()
                .position(|h| h.trim() == *column)
                .ok_or_else(|| anyhow!("column '{}' not found in {}", column, path.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.with_context(|| {
            format!("reading row {} of {}", line + 2, path.display())
        })?;
        let row = indices
            .iter()
            .map(|&idx| {
                record
                    .get(idx)
                    .map(str::trim)
                    .filter(|cell| !cell.is_empty())
                    .map(str::to_string)
            })
            .collect();
        rows.push(row);
    }

    debug!("Read {} rows from {}", rows.len(), path.display());
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn reads_selected_columns_by_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("table.tsv");
        fs::write(
            &path,
            "patent_id\tcpc_section\tcpc_group\n\"7000001\"\tH\tH01L21/00\n7000002\tY\t \n7000003\n",
        )
        .unwrap();

        let rows = read_columns(&path, b'\t', &["cpc_group", "patent_id"]).unwrap();
        assert_eq!(
            rows,
            vec![
                vec![Some("H01L21/00".to_string()), Some("7000001".to_string())],
                vec![None, Some("7000002".to_string())],
                vec![None, Some("7000003".to_string())],
            ]
        );
    }

    #[test]
    fn missing_column_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gcpd.txt");
        fs::write(&path, "assg_name,year\nacme,2001\n").unwrap();

        let err = read_columns(&path, b',', &["assg_name", "gvkey"]).unwrap_err();
        assert!(err.to_string().contains("gvkey"));
    }
}
