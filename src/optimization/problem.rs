use super::solvers::traits::{clamp_to_bounds, Problem};
use crate::core::Parameter;
use crate::device::DeviceTable;
use crate::error::{CalibrationError, Result};
use crate::objective::Objective;
use crate::simulation::{OutputFiles, SimulationContext, Simulator};
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

pub const DEFAULT_FAILURE_PENALTY: f64 = 1e10;

/// Format duration in seconds to human-readable string (e.g., "2m 30s", "1h 15m")
pub(crate) fn format_duration(secs: f64) -> String {
    if secs < 60.0 {
        format!("{:.0}s", secs)
    } else if secs < 3600.0 {
        let mins = (secs / 60.0).floor();
        let secs_remaining = secs % 60.0;
        format!("{}m {:.0}s", mins, secs_remaining)
    } else {
        let hours = (secs / 3600.0).floor();
        let mins_remaining = ((secs % 3600.0) / 60.0).floor();
        format!("{}h {}m", hours, mins_remaining)
    }
}

/// Calibration problem: write parameters into the device file, run the
/// simulator, score its output against the objective
pub struct CalibrationProblem<S: Simulator> {
    parameters: Vec<Parameter>,
    initial: Vec<f64>,
    bounds: Vec<(f64, f64)>,

    context: SimulationContext,
    outputs: OutputFiles,
    objective: Objective,
    simulator: RefCell<S>,

    failure_penalty: f64,
    clear_outputs: bool,
}

impl<S: Simulator> CalibrationProblem<S> {
    pub fn new(
        parameters: Vec<Parameter>,
        context: SimulationContext,
        outputs: OutputFiles,
        objective: Objective,
        simulator: S,
    ) -> Result<Self> {
        crate::core::validate_parameters(&parameters)?;

        // Fail before the first simulator run if any cell is missing
        let table = DeviceTable::load(&context.device_file)?;
        for param in &parameters {
            for cell in &param.cells {
                table.check_cell(cell)?;
            }
        }

        let initial = parameters.iter().map(|p| p.initial).collect();
        let bounds = parameters.iter().map(|p| (p.min, p.max)).collect();

        info!(
            parameters = parameters.len(),
            device = %context.device_file.display(),
            simulator = simulator.name(),
            "calibration problem ready"
        );

        Ok(Self {
            parameters,
            initial,
            bounds,
            context,
            outputs,
            objective,
            simulator: RefCell::new(simulator),
            failure_penalty: DEFAULT_FAILURE_PENALTY,
            clear_outputs: true,
        })
    }

    pub fn with_failure_penalty(mut self, penalty: f64) -> Self {
        self.failure_penalty = penalty;
        self
    }

    /// Delete the previous run's output files before each run (default: on)
    pub fn with_clear_outputs(mut self, clear: bool) -> Self {
        self.clear_outputs = clear;
        self
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn param_names(&self) -> Vec<String> {
        self.parameters.iter().map(|p| p.name.clone()).collect()
    }

    pub fn device_file(&self) -> &Path {
        &self.context.device_file
    }

    pub fn workdir(&self) -> &Path {
        &self.context.workdir
    }

    /// Write the candidate into the device file
    pub fn update_parameters(&self, params: &[f64]) -> Result<()> {
        let mut table = DeviceTable::load(&self.context.device_file)?;
        table.apply(&self.parameters, params)?;
        table.save_in_place()
    }

    fn stale_outputs(&self) -> [PathBuf; 2] {
        [
            self.outputs.jv_path(&self.context.workdir),
            self.outputs.stats_path(&self.context.workdir),
        ]
    }

    /// Run the simulator on the current device file and score the result
    pub fn simulate(&self) -> Result<f64> {
        if self.clear_outputs {
            for path in self.stale_outputs() {
                match fs::remove_file(&path) {
                    Ok(()) => debug!(path = %path.display(), "removed previous output"),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(CalibrationError::io(path, e)),
                }
            }
        }

        self.simulator.borrow_mut().run(&self.context)?;
        self.objective
            .evaluate(&self.context.workdir, &self.outputs)
    }

    /// Physical values as logged next to each evaluation
    fn describe(&self, params: &[f64]) -> String {
        self.parameters
            .iter()
            .zip(params)
            .map(|(p, &x)| format!("{}={:.4e}", p.name, p.physical(x)))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl<S: Simulator> Problem for CalibrationProblem<S> {
    fn cost(&self, params: &[f64]) -> Result<f64> {
        let start = Instant::now();
        let mut x = params.to_vec();
        clamp_to_bounds(&mut x, &self.bounds);
        let params = x.as_slice();
        self.update_parameters(params)?;

        let cost = match self.simulate() {
            Ok(loss) => loss,
            Err(e) if e.is_evaluation_failure() => {
                warn!(
                    error = %e,
                    penalty = self.failure_penalty,
                    "evaluation failed with parameters: {}",
                    self.describe(params)
                );
                self.failure_penalty
            }
            Err(e) => return Err(e),
        };

        info!(
            cost,
            elapsed = %format_duration(start.elapsed().as_secs_f64()),
            "{}",
            self.describe(params)
        );
        Ok(cost)
    }

    fn num_params(&self) -> usize {
        self.parameters.len()
    }

    fn initial_params(&self) -> &[f64] {
        &self.initial
    }

    fn bounds(&self) -> &[(f64, f64)] {
        &self.bounds
    }

    fn failure_penalty(&self) -> Option<f64> {
        Some(self.failure_penalty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_are_human_readable() {
        assert_eq!(format_duration(42.4), "42s");
        assert_eq!(format_duration(150.0), "2m 30s");
        assert_eq!(format_duration(4500.0), "1h 15m");
    }
}
