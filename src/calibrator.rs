use crate::config::CalibrationConfig;
use crate::core::{FittedParameter, OptimizationResult};
use crate::error::{CalibrationError, Result};
use crate::optimization::{
    select_solver, CalibrationCallback, CalibrationProblem, Problem, Solver,
};
use crate::simulation::Simulator;
use crate::sweep::{run_sweep, SweepReport};
use std::io::{self, Write};
use tracing::info;

/// Outcome of a calibration: the result plus the evaluation history behind it
pub struct CalibrationRun {
    pub result: OptimizationResult,
    pub callback: CalibrationCallback,
}

impl CalibrationRun {
    pub fn write_summary<W: Write>(&self, out: &mut W) -> io::Result<()> {
        self.callback
            .write_summary(out, self.result.success, &self.result.message)
    }
}

/// Drives the jobs a [`CalibrationConfig`] describes
pub struct Calibrator {
    config: CalibrationConfig,
}

impl Calibrator {
    pub fn new(config: CalibrationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    fn problem<S: Simulator>(&self, simulator: S) -> Result<CalibrationProblem<S>> {
        self.config.validate()?;
        let objective = self.config.objective()?;
        Ok(CalibrationProblem::new(
            self.config.parameters.clone(),
            self.config.context(),
            self.config.outputs.clone(),
            objective,
            simulator,
        )?
        .with_failure_penalty(self.config.failure_penalty)
        .with_clear_outputs(self.config.clear_outputs))
    }

    /// Run the configured optimizer with the configured simulator
    pub fn calibrate(&self) -> Result<CalibrationRun> {
        self.calibrate_with(self.config.simulator.build())
    }

    pub fn calibrate_with<S: Simulator>(&self, simulator: S) -> Result<CalibrationRun> {
        let problem = self.problem(simulator)?;

        let (mut solver, reason) = select_solver(&self.config.optimizer, problem.num_params());
        info!(solver = solver.name(), "{}", reason);

        let mut callback = CalibrationCallback::new(
            self.config.parameters.clone(),
            self.config.max_evaluations,
        );
        let result = solver.solve(&problem, &mut callback)?;

        info!(
            success = result.success,
            cost = result.cost,
            iterations = result.iterations,
            cost_evals = result.cost_evals,
            grad_evals = result.grad_evals,
            "{}",
            result.message
        );

        // Leave the device file at the optimum rather than at the last probe
        problem.update_parameters(&result.params)?;

        let parameters = self
            .config
            .parameters
            .iter()
            .zip(result.params.iter())
            .map(|(def, &value)| FittedParameter {
                name: def.name.clone(),
                value,
                physical: def.physical(value),
            })
            .collect();

        Ok(CalibrationRun {
            result: OptimizationResult {
                success: result.success,
                cost: result.cost,
                iterations: result.iterations,
                evaluations: result.cost_evals,
                message: result.message,
                solver: solver.name().to_string(),
                parameters,
            },
            callback,
        })
    }

    /// One simulator run at `at`, or at the initial guess
    pub fn evaluate(&self, at: Option<&[f64]>) -> Result<f64> {
        self.evaluate_with(self.config.simulator.build(), at)
    }

    pub fn evaluate_with<S: Simulator>(&self, simulator: S, at: Option<&[f64]>) -> Result<f64> {
        let problem = self.problem(simulator)?;
        let x = match at {
            Some(x) if x.len() != problem.num_params() => {
                return Err(CalibrationError::Config(format!(
                    "expected {} values, got {}",
                    problem.num_params(),
                    x.len()
                )))
            }
            Some(x) => x.to_vec(),
            None => problem.initial_params().to_vec(),
        };
        problem.cost(&x)
    }

    pub fn sweep(&self) -> Result<SweepReport> {
        let mut simulator = self.config.simulator.build();
        self.sweep_with(&mut simulator)
    }

    pub fn sweep_with<S: Simulator + ?Sized>(&self, simulator: &mut S) -> Result<SweepReport> {
        let sweep = self.config.sweep_config()?;
        run_sweep(
            sweep,
            &self.config.context(),
            &self.config.outputs,
            simulator,
        )
    }
}
