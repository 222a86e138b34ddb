//! Calibrate device-simulator parameters against measured JV curves.
//!
//! Each evaluation writes candidate values into the simulator's device table,
//! runs the external simulator, and scores its output against a reference.

pub mod calibrator;
pub mod config;
pub mod core;
pub mod device;
pub mod error;
pub mod objective;
pub mod optimization;
pub mod simulation;
pub mod sweep;

pub use calibrator::{CalibrationRun, Calibrator};
pub use config::CalibrationConfig;
pub use crate::core::*;
pub use device::{DeviceTable, JvCurve, Stats, Sweep};
pub use error::{CalibrationError, Result};
pub use objective::{CurveLoss, CurveObjective, Objective, ObjectiveConfig, StatObjective};
pub use optimization::*;
pub use simulation::{
    CommandSimulator, OutputFiles, SessionSimulator, SimulationContext, SimulationOutput,
    Simulator, SimulatorConfig,
};
pub use sweep::{run_sweep, SweepConfig, SweepReport, SweepRow};
