//! Delimited phenotype/covariate table reader.
//!
//! Reads tab/space-delimited files with a designated sample-ID column.
//! All other columns are kept raw; the modelling layer decides whether
//! a column is numeric or categorical. Missing tokens (NA, ., empty)
//! are preserved as missing, not silently coerced.

use std::path::Path;

use anyhow::{bail, Context, Result};

/// A phenotype table: one row per observation, keyed by sample ID.
///
/// IDs need not be unique; repeated rows are repeated measures of the
/// same individual.
#[derive(Debug, Clone)]
pub struct PhenoTable {
    /// Sample ID per row, in file order.
    ids: Vec<String>,
    /// Column name -> raw cell values (None = missing).
    columns: Vec<(String, Vec<Option<String>>)>,
}

impl PhenoTable {
    /// Parse a delimited file. The delimiter is auto-detected from the
    /// header line (tab if present, otherwise whitespace).
    pub fn read(path: &Path, id_col: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read phenotype file: {}", path.display()))?;

        let mut lines = contents.lines();
        let header_line = lines
            .next()
            .ok_or_else(|| anyhow::anyhow!("Empty phenotype file: {}", path.display()))?;

        let delim = if header_line.contains('\t') { '\t' } else { ' ' };
        let headers: Vec<&str> = header_line
            .split(delim)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect();

        let id_idx = headers.iter().position(|&h| h == id_col).ok_or_else(|| {
            anyhow::anyhow!(
                "Sample ID column '{}' not found in header (columns: {})",
                id_col,
                headers.join(", ")
            )
        })?;

        let mut ids = Vec::new();
        let mut columns: Vec<(String, Vec<Option<String>>)> = headers
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != id_idx)
            .map(|(_, h)| (h.to_string(), Vec::new()))
            .collect();

        for (line_num, line) in lines.enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line
                .split(delim)
                .map(|s| s.trim())
                .filter(|s| !s.is_empty() || delim == '\t')
                .collect();
            if fields.len() != headers.len() {
                bail!(
                    "Line {} has {} fields, header has {}",
                    line_num + 2,
                    fields.len(),
                    headers.len()
                );
            }
            ids.push(fields[id_idx].to_string());
            let mut col_cursor = 0;
            for (i, &field) in fields.iter().enumerate() {
                if i == id_idx {
                    continue;
                }
                columns[col_cursor].1.push(parse_cell(field));
                col_cursor += 1;
            }
        }

        Ok(Self { ids, columns })
    }

    /// Build a table in memory. Test and API convenience.
    pub fn from_columns(ids: Vec<String>, columns: Vec<(String, Vec<Option<String>>)>) -> Self {
        for (name, vals) in &columns {
            assert_eq!(
                vals.len(),
                ids.len(),
                "column '{}' length does not match id count",
                name
            );
        }
        Self { ids, columns }
    }

    /// Number of rows (observations).
    pub fn n_rows(&self) -> usize {
        self.ids.len()
    }

    /// Sample ID per row.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Column names, excluding the ID column.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Raw cells of a column, or None if the column does not exist.
    pub fn raw(&self, name: &str) -> Option<&[Option<String>]> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }

    /// Parse a column to f64, with NaN for missing cells. Returns None
    /// if any non-missing cell fails to parse (i.e. the column is
    /// categorical).
    pub fn numeric(&self, name: &str) -> Option<Vec<f64>> {
        let raw = self.raw(name)?;
        let mut out = Vec::with_capacity(raw.len());
        for cell in raw {
            match cell {
                None => out.push(f64::NAN),
                Some(s) => match s.parse::<f64>() {
                    Ok(v) => out.push(v),
                    Err(_) => return None,
                },
            }
        }
        Some(out)
    }

    /// Row indices whose cell in `name` is non-missing.
    pub fn rows_with_value(&self, name: &str) -> Option<Vec<usize>> {
        let raw = self.raw(name)?;
        Some(
            raw.iter()
                .enumerate()
                .filter(|(_, c)| c.is_some())
                .map(|(i, _)| i)
                .collect(),
        )
    }

    /// New table containing the given rows, in the given order.
    pub fn subset_rows(&self, rows: &[usize]) -> Self {
        let ids = rows.iter().map(|&i| self.ids[i].clone()).collect();
        let columns = self
            .columns
            .iter()
            .map(|(n, v)| {
                (
                    n.clone(),
                    rows.iter().map(|&i| v[i].clone()).collect::<Vec<_>>(),
                )
            })
            .collect();
        Self { ids, columns }
    }
}

/// Missing tokens become None; everything else is kept verbatim.
fn parse_cell(s: &str) -> Option<String> {
    match s {
        "NA" | "na" | "Na" | "." | "" | "-" | "NaN" | "nan" => None,
        _ => Some(s.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_cell() {
        assert_eq!(parse_cell("1.5"), Some("1.5".to_string()));
        assert_eq!(parse_cell("NA"), None);
        assert_eq!(parse_cell("."), None);
        assert_eq!(parse_cell("low"), Some("low".to_string()));
    }

    #[test]
    fn test_read_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pheno.tsv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "id\ty\tage\tsite").unwrap();
        writeln!(f, "S1\t1.5\t45\tnorth").unwrap();
        writeln!(f, "S2\t0.2\t50\tsouth").unwrap();
        writeln!(f, "S1\tNA\t55\tnorth").unwrap();

        let table = PhenoTable::read(&path, "id").unwrap();
        assert_eq!(table.n_rows(), 3);
        assert_eq!(table.ids(), &["S1", "S2", "S1"]);
        assert_eq!(table.column_names(), vec!["y", "age", "site"]);

        let y = table.numeric("y").unwrap();
        assert_eq!(y[0], 1.5);
        assert!(y[2].is_nan());

        // site is categorical
        assert!(table.numeric("site").is_none());
        assert_eq!(table.rows_with_value("y").unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_missing_id_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pheno.tsv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "iid\ty").unwrap();
        writeln!(f, "S1\t1.0").unwrap();
        let err = PhenoTable::read(&path, "id").unwrap_err();
        assert!(err.to_string().contains("'id'"));
    }

    #[test]
    fn test_subset_rows_keeps_order() {
        let table = PhenoTable::from_columns(
            vec!["a".into(), "b".into(), "c".into()],
            vec![(
                "y".into(),
                vec![Some("1".into()), Some("2".into()), Some("3".into())],
            )],
        );
        let sub = table.subset_rows(&[2, 0]);
        assert_eq!(sub.ids(), &["c", "a"]);
        assert_eq!(sub.numeric("y").unwrap(), vec![3.0, 1.0]);
    }
}
