use super::{parse_number, split_fields};
use crate::core::{CellRef, Parameter};
use crate::error::{CalibrationError, Result};
use indexmap::IndexMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Device description CSV: one header line, then one row per layer.
///
/// Cells are kept as raw text so unmodified cells are written back unchanged.
#[derive(Clone, Debug)]
pub struct DeviceTable {
    path: PathBuf,
    header: Vec<String>,
    columns: IndexMap<String, usize>,
    rows: Vec<Vec<String>>,
}

impl DeviceTable {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| CalibrationError::io(path, e))?;
        Self::parse(path, &content)
    }

    /// Parse table text; `path` is only used for error messages and as the default save location
    pub fn parse(path: impl Into<PathBuf>, content: &str) -> Result<Self> {
        let path = path.into();
        let mut lines = content.lines().map(|l| l.strip_suffix('\r').unwrap_or(l));

        let header_line = lines
            .next()
            .filter(|l| !l.trim().is_empty())
            .ok_or_else(|| CalibrationError::parse(&path, 1, "missing header line"))?;
        let header = split_fields(header_line);

        let mut columns = IndexMap::with_capacity(header.len());
        for (idx, name) in header.iter().enumerate() {
            let key = name.trim().trim_matches('"').to_string();
            if key.is_empty() {
                continue;
            }
            // First occurrence wins, like pandas' label lookup on the leftmost column
            columns.entry(key).or_insert(idx);
        }

        let mut rows: Vec<Vec<String>> = lines.map(split_fields).collect();
        // Trailing blank lines are not layers
        while rows
            .last()
            .is_some_and(|r| r.len() == 1 && r[0].trim().is_empty())
        {
            rows.pop();
        }

        Ok(Self {
            path,
            header,
            columns,
            rows,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of data rows (layers), header excluded
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    fn column_index(&self, column: &str) -> Result<usize> {
        self.columns
            .get(column)
            .copied()
            .ok_or_else(|| CalibrationError::UnknownColumn {
                path: self.path.clone(),
                column: column.to_string(),
            })
    }

    fn check_row(&self, row: usize) -> Result<()> {
        if row >= self.rows.len() {
            return Err(CalibrationError::RowOutOfRange {
                path: self.path.clone(),
                row,
                rows: self.rows.len(),
            });
        }
        Ok(())
    }

    /// Fail if `cell` does not address an existing row and column
    pub fn check_cell(&self, cell: &CellRef) -> Result<()> {
        self.column_index(&cell.column)?;
        self.check_row(cell.row)
    }

    pub fn get(&self, cell: &CellRef) -> Option<&str> {
        let col = self.columns.get(&cell.column)?;
        self.rows.get(cell.row)?.get(*col).map(String::as_str)
    }

    pub fn get_f64(&self, cell: &CellRef) -> Result<f64> {
        self.check_cell(cell)?;
        let raw = self.get(cell).unwrap_or("");
        parse_number(raw).ok_or_else(|| {
            // +2: one for the header, one for 1-based line numbers
            CalibrationError::parse(
                &self.path,
                cell.row + 2,
                format!("cell {} is not a number: '{}'", cell, raw),
            )
        })
    }

    /// Overwrite a cell with `value` in scientific notation
    pub fn set(&mut self, cell: &CellRef, value: f64) -> Result<()> {
        let col = self.column_index(&cell.column)?;
        self.check_row(cell.row)?;

        let row = &mut self.rows[cell.row];
        if row.len() <= col {
            row.resize(col + 1, String::new());
        }
        row[col] = format!("{:e}", value);
        Ok(())
    }

    /// Write every parameter's physical value into all of its cells
    pub fn apply(&mut self, parameters: &[Parameter], values: &[f64]) -> Result<()> {
        if parameters.len() != values.len() {
            return Err(CalibrationError::Config(format!(
                "{} values given for {} parameters",
                values.len(),
                parameters.len()
            )));
        }
        for (param, &x) in parameters.iter().zip(values) {
            let physical = param.physical(x);
            for cell in &param.cells {
                self.set(cell, physical)?;
            }
        }
        Ok(())
    }

    /// Render the table, padding every row to the header width
    pub fn to_csv_string(&self) -> String {
        let width = self.header.len();
        let mut out = String::new();
        out.push_str(&self.header.join(","));
        out.push('\n');
        for row in &self.rows {
            out.push_str(&row.join(","));
            for _ in row.len()..width {
                out.push(',');
            }
            out.push('\n');
        }
        out
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Ok(metadata) = fs::metadata(path) {
            if metadata.permissions().readonly() {
                return Err(CalibrationError::ReadOnly(path.to_path_buf()));
            }
        }
        fs::write(path, self.to_csv_string()).map_err(|e| CalibrationError::io(path, e))
    }

    /// Save back to the file the table was loaded from
    pub fn save_in_place(&self) -> Result<()> {
        self.save(&self.path)
    }
}
