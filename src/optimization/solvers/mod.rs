mod bayesian;
mod lbfgs;
mod tracker;
pub mod traits;

pub use bayesian::BayesianSolver;
pub use lbfgs::LbfgsSolver;
pub use traits::{NoopCallback, OptimizationCallback, Problem, Solver, SolverResult};

use crate::error::{CalibrationError, Result};
use serde::{Deserialize, Serialize};

fn default_max_iterations() -> u32 {
    20
}
fn default_step() -> f64 {
    1e-2
}
fn default_memory() -> usize {
    7
}
fn default_tolerance_grad() -> f64 {
    1e-5
}
fn default_tolerance_cost() -> f64 {
    f64::EPSILON
}
fn default_n_calls() -> usize {
    20
}
fn default_n_initial() -> usize {
    10
}
fn default_n_candidates() -> usize {
    2000
}
fn default_xi() -> f64 {
    0.01
}
fn default_seed() -> u64 {
    42
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptimizerConfig {
    /// Local, gradient-based (finite differences)
    Lbfgs {
        #[serde(default = "default_max_iterations")]
        max_iterations: u32,
        /// Finite-difference step in optimizer units
        #[serde(default = "default_step")]
        step: f64,
        #[serde(default = "default_memory")]
        memory: usize,
        #[serde(default = "default_tolerance_grad")]
        tolerance_grad: f64,
        #[serde(default = "default_tolerance_cost")]
        tolerance_cost: f64,
    },
    /// Global, Gaussian process with Expected Improvement
    Bayesian {
        #[serde(default = "default_n_calls")]
        n_calls: usize,
        #[serde(default = "default_n_initial")]
        n_initial: usize,
        #[serde(default = "default_n_candidates")]
        n_candidates: usize,
        #[serde(default = "default_xi")]
        xi: f64,
        #[serde(default = "default_seed")]
        seed: u64,
    },
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::Lbfgs {
            max_iterations: default_max_iterations(),
            step: default_step(),
            memory: default_memory(),
            tolerance_grad: default_tolerance_grad(),
            tolerance_cost: default_tolerance_cost(),
        }
    }
}

impl OptimizerConfig {
    pub fn validate(&self) -> Result<()> {
        let problem = match self {
            Self::Lbfgs {
                max_iterations,
                step,
                memory,
                tolerance_grad,
                tolerance_cost,
            } => {
                if *max_iterations == 0 {
                    Some("max_iterations must be at least 1")
                } else if !(step.is_finite() && *step > 0.0) {
                    Some("step must be a positive number")
                } else if *memory == 0 {
                    Some("memory must be at least 1")
                } else if *tolerance_grad < 0.0 || *tolerance_cost < 0.0 {
                    Some("tolerances must not be negative")
                } else {
                    None
                }
            }
            Self::Bayesian {
                n_calls,
                n_initial,
                n_candidates,
                xi,
                ..
            } => {
                if *n_calls == 0 {
                    Some("n_calls must be at least 1")
                } else if *n_initial == 0 {
                    Some("n_initial must be at least 1")
                } else if *n_candidates == 0 {
                    Some("n_candidates must be at least 1")
                } else if !xi.is_finite() {
                    Some("xi must be finite")
                } else {
                    None
                }
            }
        };
        match problem {
            Some(msg) => Err(CalibrationError::Config(msg.into())),
            None => Ok(()),
        }
    }
}

/// Build the configured solver; the string describes the choice for logging
pub fn select_solver(config: &OptimizerConfig, num_params: usize) -> (Box<dyn Solver>, String) {
    match config {
        OptimizerConfig::Lbfgs {
            max_iterations,
            step,
            memory,
            tolerance_grad,
            tolerance_cost,
        } => (
            Box::new(
                LbfgsSolver::new(*max_iterations, *step)
                    .with_memory(*memory)
                    .with_tolerances(*tolerance_grad, *tolerance_cost),
            ),
            format!(
                "L-BFGS ({} params, max {} iterations, step {:e})",
                num_params, max_iterations, step
            ),
        ),
        OptimizerConfig::Bayesian {
            n_calls,
            n_initial,
            n_candidates,
            xi,
            seed,
        } => {
            let reason = if n_calls <= n_initial {
                format!(
                    "GP-EI ({} params, {} calls, all random since n_initial = {})",
                    num_params, n_calls, n_initial
                )
            } else {
                format!(
                    "GP-EI ({} params, {} calls, {} initial, seed {})",
                    num_params, n_calls, n_initial, seed
                )
            };
            (
                Box::new(
                    BayesianSolver::new(*n_calls, *seed)
                        .with_initial_points(*n_initial)
                        .with_candidates(*n_candidates)
                        .with_xi(*xi),
                ),
                reason,
            )
        }
    }
}
