use super::tracker::EvaluationTracker;
use super::traits::{clamp_to_bounds, OptimizationCallback, Problem, Solver, SolverResult};
use crate::error::{CalibrationError, Result};
use nalgebra::linalg::Cholesky;
use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use statrs::distribution::{Continuous, ContinuousCDF, Normal as StatNormal};
use tracing::{debug, info};

const LENGTH_SCALES: [f64; 8] = [0.05, 0.1, 0.2, 0.3, 0.5, 0.8, 1.2, 2.0];
const NOISE: f64 = 1e-6;
const LOCAL_SIGMA: f64 = 0.1;

/// Gaussian-process Bayesian optimization with Expected Improvement.
///
/// The first point is the initial guess, followed by `n_initial - 1` uniform
/// random points; every further point maximises EI over random candidates.
pub struct BayesianSolver {
    n_calls: usize,
    n_initial: usize,
    n_candidates: usize,
    xi: f64,
    seed: u64,
}

impl BayesianSolver {
    pub fn new(n_calls: usize, seed: u64) -> Self {
        Self {
            n_calls,
            n_initial: 10,
            n_candidates: 2000,
            xi: 0.01,
            seed,
        }
    }

    pub fn with_initial_points(mut self, n_initial: usize) -> Self {
        self.n_initial = n_initial.max(1);
        self
    }

    pub fn with_candidates(mut self, n_candidates: usize) -> Self {
        self.n_candidates = n_candidates.max(1);
        self
    }

    /// Exploration offset for Expected Improvement (default: 0.01)
    pub fn with_xi(mut self, xi: f64) -> Self {
        self.xi = xi;
        self
    }
}

fn to_unit(x: &[f64], bounds: &[(f64, f64)]) -> Vec<f64> {
    x.iter()
        .zip(bounds)
        .map(|(&v, &(min, max))| {
            if max > min {
                ((v - min) / (max - min)).clamp(0.0, 1.0)
            } else {
                0.0
            }
        })
        .collect()
}

fn from_unit(u: &[f64], bounds: &[(f64, f64)]) -> Vec<f64> {
    u.iter()
        .zip(bounds)
        .map(|(&t, &(min, max))| min + t * (max - min))
        .collect()
}

fn matern52(a: &[f64], b: &[f64], length_scale: f64) -> f64 {
    let d2: f64 = a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum();
    let r = d2.sqrt() / length_scale;
    let s5r = 5f64.sqrt() * r;
    (1.0 + s5r + 5.0 * r * r / 3.0) * (-s5r).exp()
}

/// Zero-mean GP on standardised targets with unit signal variance
struct GaussianProcess {
    x: Vec<Vec<f64>>,
    l: DMatrix<f64>,
    alpha: DVector<f64>,
    length_scale: f64,
    log_marginal_likelihood: f64,
}

impl GaussianProcess {
    fn fit(x: &[Vec<f64>], y: &[f64], length_scale: f64) -> Option<Self> {
        let n = x.len();
        let k = DMatrix::from_fn(n, n, |i, j| matern52(&x[i], &x[j], length_scale));

        // Grow the jitter until the kernel matrix factorises
        let mut jitter = NOISE;
        let chol = loop {
            let mut kj = k.clone();
            for i in 0..n {
                kj[(i, i)] += jitter;
            }
            if let Some(chol) = Cholesky::new(kj) {
                break chol;
            }
            jitter *= 10.0;
            if jitter > 1e-1 {
                return None;
            }
        };

        let y = DVector::from_column_slice(y);
        let alpha = chol.solve(&y);
        let l = chol.l();
        let data_fit = y.dot(&alpha);
        let log_det: f64 = l.diagonal().iter().map(|d| d.ln()).sum();
        let log_marginal_likelihood = -0.5 * data_fit
            - log_det
            - 0.5 * n as f64 * (2.0 * std::f64::consts::PI).ln();

        Some(Self {
            x: x.to_vec(),
            l,
            alpha,
            length_scale,
            log_marginal_likelihood,
        })
    }

    /// Fit every length scale on the grid and keep the most likely model
    fn fit_best(x: &[Vec<f64>], y: &[f64]) -> Option<Self> {
        LENGTH_SCALES
            .iter()
            .filter_map(|&l| Self::fit(x, y, l))
            .max_by(|a, b| {
                a.log_marginal_likelihood
                    .total_cmp(&b.log_marginal_likelihood)
            })
    }

    /// Posterior mean and standard deviation at `u`
    fn predict(&self, u: &[f64]) -> (f64, f64) {
        let k_star = DVector::from_iterator(
            self.x.len(),
            self.x.iter().map(|xi| matern52(xi, u, self.length_scale)),
        );
        let mean = k_star.dot(&self.alpha);
        let var = match self.l.solve_lower_triangular(&k_star) {
            Some(v) => 1.0 - v.norm_squared(),
            None => 0.0,
        };
        (mean, var.max(0.0).sqrt())
    }
}

/// Expected Improvement below `best` for minimisation
fn expected_improvement(mean: f64, sigma: f64, best: f64, xi: f64) -> f64 {
    let improvement = best - mean - xi;
    if sigma < 1e-12 {
        return improvement.max(0.0);
    }
    let z = improvement / sigma;
    let normal = StatNormal::standard();
    improvement * normal.cdf(z) + sigma * normal.pdf(z)
}

/// Standardise observations, replacing failed ones with the worst real loss
fn surrogate_targets(costs: &[f64], failed: &[bool]) -> Vec<f64> {
    let worst = costs
        .iter()
        .zip(failed)
        .filter(|(_, f)| !**f)
        .map(|(c, _)| *c)
        .fold(f64::NEG_INFINITY, f64::max);
    let fill = if worst.is_finite() { worst } else { 0.0 };

    let y: Vec<f64> = costs
        .iter()
        .zip(failed)
        .map(|(&c, &f)| if f { fill } else { c })
        .collect();

    let n = y.len() as f64;
    let mean = y.iter().sum::<f64>() / n;
    let var = y.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std = if var > 0.0 { var.sqrt() } else { 1.0 };
    y.iter().map(|v| (v - mean) / std).collect()
}

impl BayesianSolver {
    /// Maximise EI over random candidates: half uniform, half around the incumbent
    fn propose(
        &self,
        gp: &GaussianProcess,
        best_unit: &[f64],
        best_y: f64,
        rng: &mut StdRng,
        dims: usize,
    ) -> Result<(Vec<f64>, f64)> {
        let local = Normal::new(0.0, LOCAL_SIGMA)
            .map_err(|e| CalibrationError::Optimizer(e.to_string()))?;

        // Draw sequentially so the seed fixes the candidate set, score in parallel
        let candidates: Vec<Vec<f64>> = (0..self.n_candidates)
            .map(|c| {
                if c % 2 == 0 {
                    (0..dims).map(|_| rng.gen_range(0.0..=1.0)).collect()
                } else {
                    best_unit
                        .iter()
                        .map(|&b| (b + local.sample(rng)).clamp(0.0, 1.0))
                        .collect()
                }
            })
            .collect();
        let scores: Vec<f64> = candidates
            .par_iter()
            .map(|candidate| {
                let (mean, sigma) = gp.predict(candidate);
                expected_improvement(mean, sigma, best_y, self.xi)
            })
            .collect();

        let mut best: Option<(Vec<f64>, f64)> = None;
        for (candidate, ei) in candidates.into_iter().zip(scores) {
            if best.as_ref().is_none_or(|(_, e)| ei > *e) {
                best = Some((candidate, ei));
            }
        }
        best.ok_or_else(|| CalibrationError::Optimizer("no candidates generated".into()))
    }
}

fn too_close(candidate: &[f64], samples: &[Vec<f64>]) -> bool {
    samples.iter().any(|s| {
        s.iter()
            .zip(candidate)
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            < 1e-18
    })
}

impl Solver for BayesianSolver {
    fn name(&self) -> &str {
        "GP-EI"
    }

    fn solve(
        &mut self,
        problem: &dyn Problem,
        callback: &mut dyn OptimizationCallback,
    ) -> Result<SolverResult> {
        let n = problem.num_params();
        let bounds = problem.bounds();
        let mut rng = StdRng::seed_from_u64(self.seed);
        let tracker = EvaluationTracker::new(problem, callback);

        let mut samples: Vec<Vec<f64>> = Vec::with_capacity(self.n_calls);
        let mut costs: Vec<f64> = Vec::with_capacity(self.n_calls);
        let mut failed: Vec<bool> = Vec::with_capacity(self.n_calls);

        for call in 0..self.n_calls {
            if tracker.should_stop() {
                return Ok(tracker.result(
                    false,
                    call as u32,
                    "Evaluation budget exhausted",
                    0,
                ));
            }

            if call == 0 {
                // Evaluate the initial guess as given, not via the unit cube
                let mut x0 = problem.initial_params().to_vec();
                clamp_to_bounds(&mut x0, bounds);
                let cost = tracker.evaluate(&x0)?;
                samples.push(to_unit(&x0, bounds));
                costs.push(cost);
                failed.push(tracker.is_failure(cost) || !cost.is_finite());
                continue;
            }

            let unit = if call < self.n_initial || failed.iter().all(|f| *f) {
                (0..n).map(|_| rng.gen_range(0.0..=1.0)).collect()
            } else {
                let y = surrogate_targets(&costs, &failed);
                let (best_idx, best_y) = y
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| !failed[*i])
                    .map(|(i, v)| (i, *v))
                    .min_by(|a, b| a.1.total_cmp(&b.1))
                    .unwrap_or((0, 0.0));

                match GaussianProcess::fit_best(&samples, &y) {
                    Some(gp) => {
                        let (candidate, ei) =
                            self.propose(&gp, &samples[best_idx], best_y, &mut rng, n)?;
                        debug!(
                            length_scale = gp.length_scale,
                            ei,
                            "expected improvement maximised"
                        );
                        if too_close(&candidate, &samples) {
                            (0..n).map(|_| rng.gen_range(0.0..=1.0)).collect()
                        } else {
                            candidate
                        }
                    }
                    None => (0..n).map(|_| rng.gen_range(0.0..=1.0)).collect(),
                }
            };

            let x = from_unit(&unit, bounds);
            let cost = tracker.evaluate(&x)?;
            samples.push(unit);
            costs.push(cost);
            failed.push(tracker.is_failure(cost) || !cost.is_finite());
        }

        let success = failed.iter().any(|f| !*f);
        let message = if success {
            format!("Completed {} evaluations", self.n_calls)
        } else {
            "Every evaluation failed".to_string()
        };
        info!(evaluations = tracker.evaluations(), "Bayesian optimization finished");
        Ok(tracker.result(success, self.n_calls as u32, message, 0))
    }
}
