use crate::error::Result;

#[derive(Clone, Debug)]
pub struct SolverResult {
    pub success: bool,
    pub cost: f64,
    pub iterations: u32,
    pub message: String,
    pub params: Vec<f64>,
    pub cost_evals: usize,
    pub grad_evals: usize,
}

/// Callback interface for optimization progress
pub trait OptimizationCallback {
    /// Called after every cost evaluation (1-based count) with the evaluated point
    fn on_evaluation(&mut self, evaluation: usize, params: &[f64], cost: f64) -> Result<()>;

    /// Check if optimization should stop early
    fn should_stop(&self) -> bool {
        false
    }
}

/// Callback that records nothing and never stops
pub struct NoopCallback;

impl OptimizationCallback for NoopCallback {
    fn on_evaluation(&mut self, _evaluation: usize, _params: &[f64], _cost: f64) -> Result<()> {
        Ok(())
    }
}

/// Core problem definition - just the essentials
pub trait Problem {
    /// Evaluate cost for given parameters (runs the simulator)
    fn cost(&self, params: &[f64]) -> Result<f64>;

    /// Number of parameters
    fn num_params(&self) -> usize;

    /// Initial parameter values
    fn initial_params(&self) -> &[f64];

    /// Parameter bounds (min, max) for each parameter
    fn bounds(&self) -> &[(f64, f64)];

    /// Cost reported for candidates the simulator could not evaluate
    fn failure_penalty(&self) -> Option<f64> {
        None
    }
}

/// Solver interface - takes problem and callback
pub trait Solver {
    fn name(&self) -> &str;

    /// Solve the optimization problem with callback for progress tracking
    fn solve(
        &mut self,
        problem: &dyn Problem,
        callback: &mut dyn OptimizationCallback,
    ) -> Result<SolverResult>;
}

#[inline]
pub fn clamp_to_bounds(params: &mut [f64], bounds: &[(f64, f64)]) {
    for (p, &(min, max)) in params.iter_mut().zip(bounds) {
        *p = p.clamp(min, max);
    }
}
