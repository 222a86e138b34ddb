use super::{parse_number, split_fields};
use crate::error::{CalibrationError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Headerless `metric,value[,...]` summary written by the simulator
#[derive(Clone, Debug)]
pub struct Stats {
    path: PathBuf,
    rows: Vec<Vec<String>>,
    /// 1-based source line of each row
    lines: Vec<usize>,
}

impl Stats {
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| CalibrationError::io(path, e))?;
        Ok(Self::parse(path, &content))
    }

    pub fn parse(path: impl Into<PathBuf>, content: &str) -> Self {
        let (lines, rows) = content
            .lines()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty())
            .map(|(n, l)| {
                let fields = split_fields(l)
                    .into_iter()
                    .map(|f| f.trim().trim_matches('"').to_string())
                    .collect();
                (n + 1, fields)
            })
            .unzip();
        Self {
            path: path.into(),
            rows,
            lines,
        }
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// Metric names in file order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rows
            .iter()
            .filter_map(|r| r.first().map(String::as_str))
    }

    /// Value of the first row whose first column is `name`
    pub fn get(&self, name: &str) -> Result<f64> {
        let row = self
            .rows
            .iter()
            .position(|r| r.first().is_some_and(|n| n == name))
            .ok_or_else(|| {
                CalibrationError::Objective(format!(
                    "metric '{}' not found in {}",
                    name,
                    self.path.display()
                ))
            })?;
        self.cell(row, 1)
    }

    /// Numeric value at a 0-based (row, column) position
    pub fn cell(&self, row: usize, column: usize) -> Result<f64> {
        let raw = self
            .rows
            .get(row)
            .and_then(|r| r.get(column))
            .ok_or_else(|| {
                CalibrationError::Objective(format!(
                    "no cell ({}, {}) in {} ({} rows)",
                    row,
                    column,
                    self.path.display(),
                    self.rows.len()
                ))
            })?;
        parse_number(raw).ok_or_else(|| {
            CalibrationError::parse(
                &self.path,
                self.lines[row],
                format!("not a number: '{}'", raw),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATS: &str = "\
Jsc_f,21.3
Voc_f,1.05
FF_f,0.78
efficiency_f,17.4

Jsc_r,21.5
Voc_r,1.07
FF_r,0.80
efficiency_r,18.4
Voc_r_ratio,0.98
";

    #[test]
    fn lookup_by_name_and_position() {
        let stats = Stats::parse("stats.csv", STATS);
        assert_eq!(stats.num_rows(), 9);
        assert_eq!(stats.get("Voc_r").unwrap(), 1.07);
        assert_eq!(stats.get("efficiency_r").unwrap(), 18.4);
        assert_eq!(stats.cell(8, 1).unwrap(), 0.98);
        assert_eq!(stats.names().next(), Some("Jsc_f"));
    }

    #[test]
    fn missing_entries_are_errors() {
        let stats = Stats::parse("stats.csv", STATS);
        assert!(stats.get("PCE").is_err());
        assert!(stats.cell(20, 1).is_err());
        assert!(matches!(stats.cell(0, 0), Err(CalibrationError::Parse { line: 1, .. })));
    }

    #[test]
    fn parse_errors_point_at_the_source_line() {
        // Row 4 sits after a blank line, on line 6
        let stats = Stats::parse("stats.csv", STATS);
        match stats.cell(4, 0) {
            Err(CalibrationError::Parse { line, .. }) => assert_eq!(line, 6),
            other => panic!("unexpected {:?}", other),
        }
        let padded = Stats::parse("stats.csv", "\n\nJsc_r,n/a\n");
        let err = padded.get("Jsc_r").unwrap_err();
        assert!(matches!(err, CalibrationError::Parse { line: 3, .. }), "{err}");
    }
}
