//! Shared fixtures: a device directory on disk and an in-process simulator
//! that turns the device table into `JV.csv` / `stats.csv`.

#![allow(dead_code)]

use jvfit::{
    CalibrationConfig, CalibrationError, CellRef, DeviceTable, Result, SimulationContext,
    SimulationOutput, Simulator,
};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const DEVICE: &str = "\
layer,material,d,taun,taup,Ncat,Nani
ETL,SnO2,0.05,1e-9,1e-9,0,0
absorber,MAPI,0.3,3.1622776601683794e-8,3.1622776601683794e-8,1e17,1e17
HTL,spiro,0.2,1e-9,1e-9,0,0
";

/// Target the reference curve was generated from
pub const TARGET_LOG_TAUN: f64 = -7.0;
pub const TARGET_D: f64 = 0.2;

/// Slope term of the synthetic curve
pub fn k1(taun: f64) -> f64 {
    taun.log10() + 10.0
}

/// Curvature term of the synthetic curve
pub fn k2(d: f64) -> f64 {
    10.0 * d
}

pub fn voltages() -> Vec<f64> {
    (0..=24).map(|i| i as f64 * 0.05).collect()
}

pub fn current(k1: f64, k2: f64, v: f64) -> f64 {
    k1 * (1.0 - v) + k2 * v * v
}

/// Deterministic stand-in for the drift-diffusion solver
#[derive(Default)]
pub struct FakeSimulator {
    pub runs: usize,
    /// Fail like a non-converging solver when `k1` exceeds this
    pub fail_above: Option<f64>,
    /// Exit cleanly without writing any output
    pub silent: bool,
}

impl FakeSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_above(limit: f64) -> Self {
        Self {
            fail_above: Some(limit),
            ..Self::default()
        }
    }
}

impl Simulator for FakeSimulator {
    fn name(&self) -> &str {
        "fake"
    }

    fn run(&mut self, context: &SimulationContext) -> Result<SimulationOutput> {
        self.runs += 1;
        if self.silent {
            return Ok(SimulationOutput::default());
        }

        let table = DeviceTable::load(&context.device_file)?;
        let k1 = k1(table.get_f64(&CellRef::new(1, "taun"))?);
        let k2 = k2(table.get_f64(&CellRef::new(1, "d"))?);
        if self.fail_above.is_some_and(|limit| k1 > limit) {
            return Err(CalibrationError::SimulatorFailed {
                status: "exit status: 1".into(),
                stderr: "Newton iteration did not converge".into(),
            });
        }

        let mut jv = String::new();
        for v in voltages() {
            let j = current(k1, k2, v);
            jv.push_str(&format!("{},{},{}\n", v, j, 0.98 * j));
        }
        write(&context.workdir.join("JV.csv"), &jv);

        let stats = format!(
            "Jsc_r,{}\nVoc_r,{}\nFF_r,{}\nefficiency_r,{}\n",
            k1,
            1.0 + 0.1 * k2,
            0.8,
            k1 * k2
        );
        write(&context.workdir.join("stats.csv"), &stats);

        Ok(SimulationOutput {
            stdout: format!("run {} done", self.runs),
        })
    }
}

fn write(path: &Path, content: &str) {
    fs::write(path, content).unwrap();
}

/// Temporary job directory with a device table, a reference curve and `job.json`
pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sim")).unwrap();
        write(&dir.path().join("sim/device.csv"), DEVICE);

        let mut reference = String::from("V,J\n");
        let (k1, k2) = (k1(10f64.powf(TARGET_LOG_TAUN)), k2(TARGET_D));
        for v in voltages() {
            reference.push_str(&format!("{},{}\n", v, current(k1, k2, v)));
        }
        write(&dir.path().join("reference.csv"), &reference);

        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn workdir(&self) -> PathBuf {
        self.path().join("sim")
    }

    pub fn device_file(&self) -> PathBuf {
        self.workdir().join("device.csv")
    }

    pub fn device(&self) -> DeviceTable {
        DeviceTable::load(self.device_file()).unwrap()
    }

    /// Base job: lifetime (log10, shared by taun/taup) and absorber thickness
    pub fn job(&self) -> Value {
        json!({
            "workdir": "sim",
            "device_file": "device.csv",
            "simulator": {
                "kind": "command",
                "program": "octave",
                "args": ["--no-gui", "--eval", "cd {workdir}; demo_ms_pin('{device}')"]
            },
            "parameters": [
                {
                    "name": "tau",
                    "initial": -7.5, "min": -9.0, "max": -5.0,
                    "scale": "log10",
                    "cells": [{"row": 1, "column": "taun"}, {"row": 1, "column": "taup"}]
                },
                {
                    "name": "d_absorber",
                    "initial": 0.3, "min": 0.1, "max": 0.6,
                    "cells": [{"row": 1, "column": "d"}]
                }
            ],
            "objective": {"kind": "curve", "reference": "reference.csv", "loss": "mse"}
        })
    }

    pub fn write_job(&self, job: &Value) -> CalibrationConfig {
        let path = self.path().join("job.json");
        write(&path, &serde_json::to_string_pretty(job).unwrap());
        CalibrationConfig::load(&path).unwrap()
    }
}
