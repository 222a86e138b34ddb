pub mod callback;
pub mod problem;
pub mod solvers;

pub use callback::{CalibrationCallback, IterationResult};
pub use problem::{CalibrationProblem, DEFAULT_FAILURE_PENALTY};
pub use solvers::{select_solver, BayesianSolver, LbfgsSolver, OptimizerConfig};
pub use solvers::{NoopCallback, OptimizationCallback, Problem, Solver, SolverResult};
