use super::solvers::traits::OptimizationCallback;
use crate::core::Parameter;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use tracing::{debug, info};

/// Evaluation record for tracking optimization progress
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationResult {
    pub evaluation: usize,
    pub params: Vec<f64>,
    pub cost: f64,
}

/// Callback for tracking and reporting calibration progress
pub struct CalibrationCallback {
    max_evaluations: Option<usize>,
    evaluation_count: usize,
    history: Vec<IterationResult>,
    best: Option<usize>,
    parameters: Vec<Parameter>,
}

impl CalibrationCallback {
    pub fn new(parameters: Vec<Parameter>, max_evaluations: Option<usize>) -> Self {
        Self {
            max_evaluations,
            evaluation_count: 0,
            history: Vec::new(),
            best: None,
            parameters,
        }
    }

    /// Get evaluation history
    pub fn history(&self) -> &[IterationResult] {
        &self.history
    }

    pub fn best(&self) -> Option<&IterationResult> {
        self.best.map(|i| &self.history[i])
    }

    /// Write the human-readable run summary
    pub fn write_summary<W: Write>(
        &self,
        out: &mut W,
        success: bool,
        stop_reason: &str,
    ) -> io::Result<()> {
        writeln!(out, "\n{}", "=".repeat(80))?;
        writeln!(out, "CALIBRATION SUMMARY")?;
        writeln!(out, "{}", "=".repeat(80))?;

        writeln!(
            out,
            "\nStatus: {}",
            if success { "✓ SUCCESS" } else { "✗ FAILED" }
        )?;
        writeln!(out, "Stop Reason: {}", stop_reason)?;
        writeln!(out, "Total Evaluations: {}", self.history.len())?;

        if let Some(best) = self.best() {
            writeln!(
                out,
                "\nBest Cost: {:.6e} (evaluation {})",
                best.cost, best.evaluation
            )?;
            writeln!(out, "\nOptimal Parameters:")?;
            for (param, &value) in self.parameters.iter().zip(best.params.iter()) {
                writeln!(
                    out,
                    "  {:<16} = {:>12.6e}  (written as {:.6e})",
                    param.name,
                    value,
                    param.physical(value)
                )?;
            }
        }

        writeln!(out, "\nEvaluation History:")?;
        writeln!(out, "{:<8} {:<20}", "Eval", "Cost")?;
        writeln!(out, "{}", "-".repeat(30))?;
        for result in &self.history {
            let marker = if Some(result.evaluation) == self.best().map(|b| b.evaluation) {
                " *"
            } else {
                ""
            };
            writeln!(out, "{:<8} {:<20.6e}{}", result.evaluation, result.cost, marker)?;
        }

        writeln!(out, "\n{}\n", "=".repeat(80))
    }
}

impl OptimizationCallback for CalibrationCallback {
    fn on_evaluation(&mut self, evaluation: usize, params: &[f64], cost: f64) -> Result<()> {
        self.evaluation_count = evaluation;
        self.history.push(IterationResult {
            evaluation,
            params: params.to_vec(),
            cost,
        });

        let improved = self
            .best()
            .is_none_or(|best| cost < best.cost);
        if improved {
            self.best = Some(self.history.len() - 1);
            info!(evaluation, cost, "new best");
        } else {
            debug!(evaluation, cost, "evaluation recorded");
        }

        Ok(())
    }

    fn should_stop(&self) -> bool {
        self.max_evaluations
            .is_some_and(|max| self.evaluation_count >= max)
    }
}
