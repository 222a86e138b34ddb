use crate::error::{CalibrationError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ===== ENUMS =====

/// How an optimizer coordinate maps onto the value stored in the device table
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scale {
    #[default]
    Linear,
    /// Optimizer works on the exponent, the table gets `10^x`
    Log10,
}

impl Scale {
    pub fn to_physical(self, x: f64) -> f64 {
        match self {
            Self::Linear => x,
            Self::Log10 => 10f64.powf(x),
        }
    }
}

// ===== CORE DATA TYPES =====

/// A cell of the device table: 0-based data row (header excluded) and column name
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellRef {
    pub row: usize,
    pub column: String,
}

impl CellRef {
    pub fn new(row: usize, column: impl Into<String>) -> Self {
        Self {
            row,
            column: column.into(),
        }
    }
}

impl std::fmt::Display for CellRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]", self.column, self.row)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub initial: f64,
    pub min: f64,
    pub max: f64,
    #[serde(default)]
    pub scale: Scale,
    /// Every cell receives the same physical value
    pub cells: Vec<CellRef>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, initial: f64, min: f64, max: f64) -> Self {
        Self {
            name: name.into(),
            initial,
            min,
            max,
            scale: Scale::Linear,
            cells: Vec::new(),
        }
    }

    pub fn with_scale(mut self, scale: Scale) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_cell(mut self, row: usize, column: impl Into<String>) -> Self {
        self.cells.push(CellRef::new(row, column));
        self
    }

    /// Value written to the device table for optimizer value `x`
    pub fn physical(&self, x: f64) -> f64 {
        self.scale.to_physical(x)
    }

    pub fn clamp(&self, x: f64) -> f64 {
        x.clamp(self.min, self.max)
    }

    pub fn is_within_bounds(&self, x: f64) -> bool {
        x >= self.min && x <= self.max
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CalibrationError::Config(
                "parameter name must not be empty".into(),
            ));
        }
        if !self.min.is_finite() || !self.max.is_finite() {
            return Err(CalibrationError::Config(format!(
                "parameter '{}' has non-finite bounds",
                self.name
            )));
        }
        if self.min > self.max {
            return Err(CalibrationError::Config(format!(
                "parameter '{}' has min {} > max {}",
                self.name, self.min, self.max
            )));
        }
        if !self.is_within_bounds(self.initial) {
            return Err(CalibrationError::Config(format!(
                "parameter '{}' initial value {} outside [{}, {}]",
                self.name, self.initial, self.min, self.max
            )));
        }
        if self.cells.is_empty() {
            return Err(CalibrationError::Config(format!(
                "parameter '{}' does not write to any cell",
                self.name
            )));
        }
        Ok(())
    }
}

/// Check a parameter set: each parameter valid, at least one, names unique
pub fn validate_parameters(parameters: &[Parameter]) -> Result<()> {
    if parameters.is_empty() {
        return Err(CalibrationError::Config(
            "at least one parameter is required".into(),
        ));
    }

    let mut seen = HashSet::new();
    for param in parameters {
        param.validate()?;
        if !seen.insert(param.name.as_str()) {
            return Err(CalibrationError::Config(format!(
                "duplicate parameter name '{}'",
                param.name
            )));
        }
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FittedParameter {
    pub name: String,
    /// Optimizer-space value
    pub value: f64,
    /// Value written to the device table
    pub physical: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub success: bool,
    pub cost: f64,
    pub iterations: u32,
    pub evaluations: usize,
    pub message: String,
    pub solver: String,
    pub parameters: Vec<FittedParameter>,
}

impl OptimizationResult {
    pub fn get_parameter(&self, name: &str) -> Option<&FittedParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Optimizer-space values in parameter order
    pub fn values(&self) -> Vec<f64> {
        self.parameters.iter().map(|p| p.value).collect()
    }
}
