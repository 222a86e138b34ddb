//! Scalar discrepancy between a simulator run and the calibration target

use crate::device::{JvCurve, Stats, Sweep};
use crate::error::{CalibrationError, Result};
use crate::simulation::{expand_home, OutputFiles};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_voltage_limit() -> f64 {
    1.1
}

/// Curve-to-curve loss
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurveLoss {
    /// Integral absolute error: trapezoidal integral of `|y - y_ref|` over voltage
    #[default]
    Iae,
    /// Mean squared error
    Mse,
}

impl CurveLoss {
    /// `x` ascending, all slices the same length
    pub fn evaluate(self, x: &[f64], y: &[f64], y_ref: &[f64]) -> f64 {
        match self {
            Self::Iae => {
                let abs: Vec<f64> = y.iter().zip(y_ref).map(|(a, b)| (a - b).abs()).collect();
                trapezoid(&abs, x)
            }
            Self::Mse => {
                let n = y.len().max(1) as f64;
                y.iter()
                    .zip(y_ref)
                    .map(|(a, b)| (a - b).powi(2))
                    .sum::<f64>()
                    / n
            }
        }
    }
}

/// Trapezoidal rule, `numpy.trapezoid(y, x)`
pub fn trapezoid(y: &[f64], x: &[f64]) -> f64 {
    x.windows(2)
        .zip(y.windows(2))
        .map(|(xw, yw)| (xw[1] - xw[0]) * (yw[0] + yw[1]) / 2.0)
        .sum()
}

/// Fit the simulated JV curve to a measured one
#[derive(Clone, Debug)]
pub struct CurveObjective {
    reference: JvCurve,
    voltage_limit: f64,
    sweep: Sweep,
    loss: CurveLoss,
}

impl CurveObjective {
    /// Fails unless at least two reference points lie below `voltage_limit`
    pub fn new(
        reference: JvCurve,
        voltage_limit: f64,
        sweep: Sweep,
        loss: CurveLoss,
    ) -> Result<Self> {
        let reference = reference
            .below(voltage_limit)
            .into_ascending_reported("reference curve");
        if reference.len() < 2 {
            return Err(CalibrationError::Config(format!(
                "reference curve has {} points below the {} V limit, need at least 2",
                reference.len(),
                voltage_limit
            )));
        }
        Ok(Self {
            reference,
            voltage_limit,
            sweep,
            loss,
        })
    }

    pub fn from_file(
        path: impl AsRef<Path>,
        voltage_limit: f64,
        sweep: Sweep,
        loss: CurveLoss,
    ) -> Result<Self> {
        let reference = JvCurve::read_reference(path)?;
        Self::new(reference, voltage_limit, sweep, loss)
    }

    /// Reference restricted to the fitted voltage range, ascending
    pub fn reference(&self) -> &JvCurve {
        &self.reference
    }

    /// Score an already-loaded simulated curve
    pub fn score(&self, simulated: &JvCurve) -> Result<f64> {
        let simulated = simulated.below(self.voltage_limit).into_ascending();
        if simulated.len() < 2 {
            return Err(CalibrationError::Objective(format!(
                "simulated curve has {} points below {} V",
                simulated.len(),
                self.voltage_limit
            )));
        }
        let x = simulated.voltage();
        let y_ref = self.reference.interpolate(x)?;
        Ok(self.loss.evaluate(x, simulated.current(), &y_ref))
    }

    pub fn evaluate(&self, workdir: &Path, outputs: &OutputFiles) -> Result<f64> {
        let simulated = JvCurve::read_simulated(outputs.jv_path(workdir), self.sweep)?;
        self.score(&simulated)
    }
}

/// Which entry of the stats file to score
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatSelector {
    Position { row: usize, column: usize },
    Named { metric: String },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatTransform {
    #[default]
    Identity,
    Negate,
    /// `-v²`: drives the metric's magnitude up
    NegSquare,
}

impl StatTransform {
    pub fn apply(self, v: f64) -> f64 {
        match self {
            Self::Identity => v,
            Self::Negate => -v,
            Self::NegSquare => -(v * v),
        }
    }
}

/// Score one figure of merit from the stats file
#[derive(Clone, Debug, PartialEq)]
pub struct StatObjective {
    pub selector: StatSelector,
    pub transform: StatTransform,
}

impl StatObjective {
    pub fn score(&self, stats: &Stats) -> Result<f64> {
        let value = match &self.selector {
            StatSelector::Position { row, column } => stats.cell(*row, *column)?,
            StatSelector::Named { metric } => stats.get(metric)?,
        };
        Ok(self.transform.apply(value))
    }

    pub fn evaluate(&self, workdir: &Path, outputs: &OutputFiles) -> Result<f64> {
        let stats = Stats::read(outputs.stats_path(workdir))?;
        self.score(&stats)
    }
}

#[derive(Clone, Debug)]
pub enum Objective {
    Curve(CurveObjective),
    Stat(StatObjective),
}

impl Objective {
    pub fn evaluate(&self, workdir: &Path, outputs: &OutputFiles) -> Result<f64> {
        let loss = match self {
            Self::Curve(c) => c.evaluate(workdir, outputs)?,
            Self::Stat(s) => s.evaluate(workdir, outputs)?,
        };
        if loss.is_nan() {
            return Err(CalibrationError::Objective("loss is NaN".into()));
        }
        Ok(loss)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObjectiveConfig {
    Curve {
        reference: String,
        #[serde(default = "default_voltage_limit")]
        voltage_limit: f64,
        #[serde(default)]
        sweep: Sweep,
        #[serde(default)]
        loss: CurveLoss,
    },
    Stat {
        #[serde(flatten)]
        selector: StatSelector,
        #[serde(default)]
        transform: StatTransform,
    },
}

impl ObjectiveConfig {
    /// Reference path resolved against `base` when relative
    pub fn reference_path(&self, base: &Path) -> Option<PathBuf> {
        match self {
            Self::Curve { reference, .. } => Some(base.join(expand_home(reference))),
            Self::Stat { .. } => None,
        }
    }

    /// Load the reference data; relative paths resolve against `base`
    pub fn build(&self, base: &Path) -> Result<Objective> {
        match self {
            Self::Curve {
                voltage_limit,
                sweep,
                loss,
                ..
            } => {
                let path = self.reference_path(base).unwrap_or_default();
                Ok(Objective::Curve(CurveObjective::from_file(
                    path,
                    *voltage_limit,
                    *sweep,
                    *loss,
                )?))
            }
            Self::Stat {
                selector,
                transform,
            } => Ok(Objective::Stat(StatObjective {
                selector: selector.clone(),
                transform: *transform,
            })),
        }
    }
}
