use super::tracker::EvaluationTracker;
use super::traits::{clamp_to_bounds, OptimizationCallback, Problem, Solver, SolverResult};
use crate::error::{CalibrationError, Result};
use argmin::core::observers::{Observe, ObserverMode};
use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason, KV};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
#[error("evaluation budget exhausted")]
struct BudgetExhausted;

/// Bound-projected L-BFGS on top of argmin, with forward finite-difference gradients
pub struct LbfgsSolver {
    max_iter: u32,
    step: f64,
    memory: usize,
    tolerance_grad: f64,
    tolerance_cost: f64,
}

impl LbfgsSolver {
    pub fn new(max_iter: u32, step: f64) -> Self {
        Self {
            max_iter,
            step,
            memory: 7,
            tolerance_grad: 1e-5,
            tolerance_cost: f64::EPSILON,
        }
    }

    /// Number of correction pairs kept (default: 7)
    pub fn with_memory(mut self, memory: usize) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_tolerances(mut self, tolerance_grad: f64, tolerance_cost: f64) -> Self {
        self.tolerance_grad = tolerance_grad;
        self.tolerance_cost = tolerance_cost;
        self
    }
}

/// argmin view of the calibration problem.
///
/// argmin asks for cost and gradient at the same point separately, so the last
/// evaluation is cached to avoid running the simulator twice.
struct ArgminProblem<'t, 'a> {
    tracker: &'t EvaluationTracker<'a>,
    step: f64,
    last: RefCell<Option<(Vec<f64>, f64)>>,
    grad_evals: &'t Cell<usize>,
}

impl ArgminProblem<'_, '_> {
    fn bounds(&self) -> &[(f64, f64)] {
        self.tracker.problem().bounds()
    }

    fn projected(&self, params: &[f64]) -> Vec<f64> {
        let mut x = params.to_vec();
        clamp_to_bounds(&mut x, self.bounds());
        x
    }

    fn eval(&self, x: &[f64]) -> std::result::Result<f64, argmin::core::Error> {
        if let Some((cached_x, cost)) = self.last.borrow().as_ref() {
            if cached_x.as_slice() == x {
                return Ok(*cost);
            }
        }
        if self.tracker.should_stop() {
            return Err(BudgetExhausted.into());
        }

        let cost = self.tracker.evaluate(x)?;
        *self.last.borrow_mut() = Some((x.to_vec(), cost));
        Ok(cost)
    }
}

impl CostFunction for ArgminProblem<'_, '_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, param: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        let x = self.projected(param);
        self.eval(&x)
    }
}

impl Gradient for ArgminProblem<'_, '_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(
        &self,
        param: &Self::Param,
    ) -> std::result::Result<Self::Gradient, argmin::core::Error> {
        let x = self.projected(param);
        let f0 = self.eval(&x)?;
        let bounds = self.bounds().to_vec();

        let mut grad = vec![0.0; x.len()];
        for i in 0..x.len() {
            let (min, max) = bounds[i];
            // Step backwards when a forward step would leave the box
            let h = if x[i] + self.step > max {
                -self.step
            } else {
                self.step
            };
            let mut probe = x.clone();
            probe[i] += h;
            clamp_to_bounds(&mut probe, &bounds);
            let actual = probe[i] - x[i];
            if actual == 0.0 {
                continue;
            }

            let fi = self.eval(&probe)?;
            grad[i] = (fi - f0) / actual;

            // Zero components that push an active bound outward
            if (x[i] <= min && grad[i] > 0.0) || (x[i] >= max && grad[i] < 0.0) {
                grad[i] = 0.0;
            }
        }

        self.grad_evals.set(self.grad_evals.get() + 1);
        debug!(?grad, "finite-difference gradient");
        Ok(grad)
    }
}

/// Counts completed argmin iterations, including runs that end in an error
#[derive(Clone, Default)]
struct IterationCounter(Arc<AtomicU32>);

impl IterationCounter {
    fn get(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }
}

impl<I> Observe<I> for IterationCounter {
    fn observe_iter(&mut self, _state: &I, _kv: &KV) -> std::result::Result<(), argmin::core::Error> {
        self.0.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

fn optimizer_error(e: argmin::core::Error) -> CalibrationError {
    CalibrationError::Optimizer(e.to_string())
}

impl Solver for LbfgsSolver {
    fn name(&self) -> &str {
        "L-BFGS"
    }

    fn solve(
        &mut self,
        problem: &dyn Problem,
        callback: &mut dyn OptimizationCallback,
    ) -> Result<SolverResult> {
        let tracker = EvaluationTracker::new(problem, callback);
        let mut initial = problem.initial_params().to_vec();
        clamp_to_bounds(&mut initial, problem.bounds());

        let grad_evals = Cell::new(0);
        let adapter = ArgminProblem {
            tracker: &tracker,
            step: self.step,
            last: RefCell::new(None),
            grad_evals: &grad_evals,
        };

        let linesearch = MoreThuenteLineSearch::new();
        let solver = LBFGS::new(linesearch, self.memory)
            .with_tolerance_grad(self.tolerance_grad)
            .map_err(optimizer_error)?
            .with_tolerance_cost(self.tolerance_cost)
            .map_err(optimizer_error)?;

        let max_iter = u64::from(self.max_iter);
        let counter = IterationCounter::default();
        let outcome = Executor::new(adapter, solver)
            .configure(|state| state.param(initial).max_iters(max_iter))
            .add_observer(counter.clone(), ObserverMode::Always)
            .run();

        let (success, iterations, message) = match outcome {
            Ok(res) => {
                let state = res.state();
                let iterations = u32::try_from(state.get_iter()).unwrap_or(u32::MAX);
                let (success, message) = match state.get_termination_reason() {
                    Some(TerminationReason::SolverConverged) => (true, "Converged".to_string()),
                    Some(TerminationReason::TargetCostReached) => {
                        (true, "Target cost reached".to_string())
                    }
                    Some(TerminationReason::MaxItersReached) => {
                        (false, "Max iterations reached".to_string())
                    }
                    Some(other) => (false, format!("{:?}", other)),
                    None => (false, "Not terminated".to_string()),
                };
                (success, iterations, message)
            }
            Err(e) if e.downcast_ref::<BudgetExhausted>().is_some() => (
                false,
                counter.get(),
                "Evaluation budget exhausted".to_string(),
            ),
            Err(e) => match e.downcast::<CalibrationError>() {
                Ok(calibration) => return Err(calibration),
                // Line-search breakdowns end the run but keep the best point found
                Err(other) => {
                    info!(error = %other, "L-BFGS stopped early");
                    (false, counter.get(), format!("Stopped: {}", other))
                }
            },
        };

        // A flat penalty surface has a zero gradient and looks converged
        let all_failed = tracker
            .best()
            .is_none_or(|(_, cost)| tracker.is_failure(cost));
        let (success, message) = if all_failed {
            (false, "Every evaluation failed".to_string())
        } else {
            (success, message)
        };

        info!(iterations, %message, "L-BFGS finished");
        Ok(tracker.result(success, iterations, message, grad_evals.get()))
    }
}
