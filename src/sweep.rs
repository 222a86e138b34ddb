//! One-at-a-time parameter grid: set the same value into a group of cells,
//! run the simulator, keep its stats and archive its JV curve

use crate::core::CellRef;
use crate::device::{DeviceTable, Stats};
use crate::error::{CalibrationError, Result};
use crate::simulation::{expand_home, OutputFiles, SimulationContext, Simulator};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

fn default_archive_prefix() -> String {
    "JV-".to_string()
}

fn default_metrics() -> Vec<String> {
    ["Jsc_r", "Voc_r", "FF_r", "efficiency_r"]
        .into_iter()
        .map(String::from)
        .collect()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Cells that all receive the current sweep value
    pub cells: Vec<CellRef>,
    pub values: Vec<f64>,
    /// Where JV curves are moved after each step (default: the working directory)
    #[serde(default)]
    pub archive_dir: Option<String>,
    #[serde(default = "default_archive_prefix")]
    pub archive_prefix: String,
    /// Added to the step index in archive file names
    #[serde(default)]
    pub index_offset: usize,
    #[serde(default = "default_metrics")]
    pub metrics: Vec<String>,
    /// Summary CSV, relative to the working directory unless absolute
    #[serde(default)]
    pub summary: String,
}

impl SweepConfig {
    pub fn validate(&self) -> Result<()> {
        if self.cells.is_empty() {
            return Err(CalibrationError::Config("sweep needs at least one cell".into()));
        }
        if self.values.is_empty() {
            return Err(CalibrationError::Config("sweep needs at least one value".into()));
        }
        if let Some(v) = self.values.iter().find(|v| !v.is_finite()) {
            return Err(CalibrationError::Config(format!(
                "sweep value {} is not finite",
                v
            )));
        }
        if self.metrics.is_empty() {
            return Err(CalibrationError::Config("sweep needs at least one metric".into()));
        }
        if self.summary.trim().is_empty() {
            return Err(CalibrationError::Config("sweep summary path is not set".into()));
        }
        Ok(())
    }

    pub fn archive_dir(&self, workdir: &Path) -> PathBuf {
        match &self.archive_dir {
            Some(dir) => workdir.join(expand_home(dir)),
            None => workdir.to_path_buf(),
        }
    }

    pub fn summary_path(&self, workdir: &Path) -> PathBuf {
        workdir.join(expand_home(&self.summary))
    }

    fn archive_path(&self, workdir: &Path, index: usize) -> PathBuf {
        self.archive_dir(workdir).join(format!(
            "{}{}.csv",
            self.archive_prefix,
            index + self.index_offset
        ))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SweepRow {
    pub index: usize,
    pub value: f64,
    /// One entry per configured metric, in order
    pub metrics: Vec<f64>,
    pub archived: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    pub metrics: Vec<String>,
    pub rows: Vec<SweepRow>,
    pub summary: PathBuf,
}

impl SweepReport {
    /// Header line, then one line per step
    pub fn to_csv_string(&self) -> String {
        let mut out = String::from("value");
        for name in &self.metrics {
            out.push(',');
            out.push_str(name);
        }
        out.push('\n');

        for row in &self.rows {
            out.push_str(&row.value.to_string());
            for v in &row.metrics {
                out.push(',');
                out.push_str(&v.to_string());
            }
            out.push('\n');
        }
        out
    }
}

/// Move `from` to `to`, copying when the rename crosses filesystems
fn move_file(from: &Path, to: &Path) -> Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to).map_err(|e| CalibrationError::io(from, e))?;
    fs::remove_file(from).map_err(|e| CalibrationError::io(from, e))
}

pub fn run_sweep<S: Simulator + ?Sized>(
    config: &SweepConfig,
    context: &SimulationContext,
    outputs: &OutputFiles,
    simulator: &mut S,
) -> Result<SweepReport> {
    config.validate()?;

    let table = DeviceTable::load(&context.device_file)?;
    for cell in &config.cells {
        table.check_cell(cell)?;
    }

    let archive_dir = config.archive_dir(&context.workdir);
    fs::create_dir_all(&archive_dir).map_err(|e| CalibrationError::io(&archive_dir, e))?;

    let jv_path = outputs.jv_path(&context.workdir);
    let stats_path = outputs.stats_path(&context.workdir);
    let mut rows = Vec::with_capacity(config.values.len());

    for (index, &value) in config.values.iter().enumerate() {
        let mut table = DeviceTable::load(&context.device_file)?;
        for cell in &config.cells {
            table.set(cell, value)?;
        }
        table.save_in_place()?;

        for path in [&jv_path, &stats_path] {
            match fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "removed previous output"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(CalibrationError::io(path, e)),
            }
        }

        let output = simulator.run(context)?;
        debug!(stdout = %output.stdout.trim_end(), "simulator output");

        let stats = Stats::read(&stats_path)?;
        let metrics = config
            .metrics
            .iter()
            .map(|name| stats.get(name))
            .collect::<Result<Vec<_>>>()?;

        let archived = config.archive_path(&context.workdir, index);
        move_file(&jv_path, &archived)?;

        info!(
            step = index + 1,
            total = config.values.len(),
            value,
            archived = %archived.display(),
            "sweep step done"
        );
        rows.push(SweepRow {
            index,
            value,
            metrics,
            archived,
        });
    }

    let report = SweepReport {
        metrics: config.metrics.clone(),
        rows,
        summary: config.summary_path(&context.workdir),
    };
    fs::write(&report.summary, report.to_csv_string())
        .map_err(|e| CalibrationError::io(&report.summary, e))?;
    info!(summary = %report.summary.display(), "sweep summary written");

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SweepConfig {
        serde_json::from_str(
            r#"{
                "cells": [{"row": 3, "column": "Ncat"}, {"row": 3, "column": "Nani"}],
                "values": [1e17, 1e18],
                "summary": "4stats.csv"
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn defaults_match_grid_tool() {
        let cfg = config();
        assert_eq!(cfg.archive_prefix, "JV-");
        assert_eq!(cfg.index_offset, 0);
        assert_eq!(cfg.metrics, vec!["Jsc_r", "Voc_r", "FF_r", "efficiency_r"]);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn archive_names_use_offset() {
        let mut cfg = config();
        cfg.archive_prefix = "JV3-".into();
        cfg.index_offset = 32;
        cfg.archive_dir = Some("runs".into());
        assert_eq!(
            cfg.archive_path(Path::new("/sim"), 1),
            PathBuf::from("/sim/runs/JV3-33.csv")
        );
    }

    #[test]
    fn validate_requires_summary() {
        let mut cfg = config();
        cfg.summary = String::new();
        assert!(cfg.validate().is_err());

        let mut cfg = config();
        cfg.values.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn summary_has_header_and_row_per_step() {
        let report = SweepReport {
            metrics: vec!["Jsc_r".into(), "Voc_r".into()],
            rows: vec![
                SweepRow {
                    index: 0,
                    value: 1e17,
                    metrics: vec![20.5, 1.05],
                    archived: PathBuf::from("JV-0.csv"),
                },
                SweepRow {
                    index: 1,
                    value: 1e18,
                    metrics: vec![21.0, 1.1],
                    archived: PathBuf::from("JV-1.csv"),
                },
            ],
            summary: PathBuf::from("4stats.csv"),
        };
        let csv = report.to_csv_string();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "value,Jsc_r,Voc_r");
        assert_eq!(lines.len(), 3);
        assert!(lines[1].ends_with(",20.5,1.05"));
    }
}
