use super::traits::{clamp_to_bounds, OptimizationCallback, Problem, SolverResult};
use crate::error::Result;
use std::cell::{Cell, RefCell};

/// Shared bookkeeping for solvers: clamps candidates, counts evaluations,
/// remembers the best point and forwards every evaluation to the callback.
pub(crate) struct EvaluationTracker<'a> {
    problem: &'a dyn Problem,
    callback: RefCell<&'a mut dyn OptimizationCallback>,
    evaluations: Cell<usize>,
    best: RefCell<Option<(Vec<f64>, f64)>>,
}

impl<'a> EvaluationTracker<'a> {
    pub fn new(problem: &'a dyn Problem, callback: &'a mut dyn OptimizationCallback) -> Self {
        Self {
            problem,
            callback: RefCell::new(callback),
            evaluations: Cell::new(0),
            best: RefCell::new(None),
        }
    }

    pub fn problem(&self) -> &dyn Problem {
        self.problem
    }

    /// Clamp `params` to the bounds and evaluate there
    pub fn evaluate(&self, params: &[f64]) -> Result<f64> {
        let mut x = params.to_vec();
        clamp_to_bounds(&mut x, self.problem.bounds());

        let cost = self.problem.cost(&x)?;
        let count = self.evaluations.get() + 1;
        self.evaluations.set(count);

        {
            let mut best = self.best.borrow_mut();
            let improved = best.as_ref().is_none_or(|(_, c)| cost < *c);
            if improved {
                *best = Some((x.clone(), cost));
            }
        }

        self.callback.borrow_mut().on_evaluation(count, &x, cost)?;
        Ok(cost)
    }

    pub fn should_stop(&self) -> bool {
        self.callback.borrow().should_stop()
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations.get()
    }

    pub fn best(&self) -> Option<(Vec<f64>, f64)> {
        self.best.borrow().clone()
    }

    /// Whether `cost` is the failure penalty rather than a real loss
    pub fn is_failure(&self, cost: f64) -> bool {
        self.problem
            .failure_penalty()
            .is_some_and(|penalty| cost >= penalty)
    }

    /// Result built from the best point seen so far
    pub fn result(
        &self,
        success: bool,
        iterations: u32,
        message: impl Into<String>,
        grad_evals: usize,
    ) -> SolverResult {
        let (params, cost) = self.best().unwrap_or_else(|| {
            let mut x = self.problem.initial_params().to_vec();
            clamp_to_bounds(&mut x, self.problem.bounds());
            (x, f64::INFINITY)
        });
        SolverResult {
            success,
            cost,
            iterations,
            message: message.into(),
            params,
            cost_evals: self.evaluations(),
            grad_evals,
        }
    }
}
