use super::{parse_number, split_fields};
use crate::error::{CalibrationError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::warn;

/// Which current column of the simulator's `JV.csv` to use
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sweep {
    /// Column 1
    #[default]
    Reverse,
    /// Column 2
    Forward,
}

impl Sweep {
    fn column(self) -> usize {
        match self {
            Self::Reverse => 1,
            Self::Forward => 2,
        }
    }
}

/// Current–voltage curve as `(voltage, current)` points
#[derive(Clone, Debug, Default, PartialEq)]
pub struct JvCurve {
    voltage: Vec<f64>,
    current: Vec<f64>,
}

impl JvCurve {
    pub fn new(voltage: Vec<f64>, current: Vec<f64>) -> Result<Self> {
        if voltage.len() != current.len() {
            return Err(CalibrationError::Objective(format!(
                "curve has {} voltages but {} currents",
                voltage.len(),
                current.len()
            )));
        }
        Ok(Self { voltage, current })
    }

    /// Read the simulator's headerless JV output
    pub fn read_simulated(path: impl AsRef<Path>, sweep: Sweep) -> Result<Self> {
        read_columns(path.as_ref(), 0, sweep.column(), false)
    }

    /// Read a measured curve: header line, then voltage and current in the first two columns
    pub fn read_reference(path: impl AsRef<Path>) -> Result<Self> {
        read_columns(path.as_ref(), 0, 1, true)
    }

    pub fn len(&self) -> usize {
        self.voltage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voltage.is_empty()
    }

    pub fn voltage(&self) -> &[f64] {
        &self.voltage
    }

    pub fn current(&self) -> &[f64] {
        &self.current
    }

    /// Keep only points strictly below `limit` volts
    pub fn below(&self, limit: f64) -> Self {
        let (voltage, current) = self
            .voltage
            .iter()
            .zip(&self.current)
            .filter(|(v, _)| **v < limit)
            .map(|(&v, &i)| (v, i))
            .unzip();
        Self { voltage, current }
    }

    pub fn is_ascending(&self) -> bool {
        self.voltage.windows(2).all(|w| w[0] <= w[1])
    }

    fn is_descending(&self) -> bool {
        self.voltage.windows(2).all(|w| w[0] >= w[1])
    }

    /// Return the curve in increasing voltage order
    pub fn into_ascending(mut self) -> Self {
        if self.is_ascending() {
            return self;
        }
        if self.is_descending() {
            self.voltage.reverse();
            self.current.reverse();
            return self;
        }

        let mut points: Vec<(f64, f64)> = self.voltage.into_iter().zip(self.current).collect();
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        let (voltage, current) = points.into_iter().unzip();
        Self { voltage, current }
    }

    /// Like [`into_ascending`](Self::into_ascending), but warns when the input was reversed
    pub fn into_ascending_reported(self, label: &str) -> Self {
        if self.len() > 1 && !self.is_ascending() {
            warn!("{} is not increasing in voltage, reordering it", label);
        }
        self.into_ascending()
    }

    /// Piecewise-linear interpolation at `xs`, clamped to the end values outside the curve.
    ///
    /// The curve must be ascending.
    pub fn interpolate(&self, xs: &[f64]) -> Result<Vec<f64>> {
        if self.is_empty() {
            return Err(CalibrationError::Objective(
                "cannot interpolate an empty curve".into(),
            ));
        }
        if let Some(x) = xs.iter().find(|x| !x.is_finite()) {
            return Err(CalibrationError::Objective(format!(
                "cannot interpolate at non-finite voltage {}",
                x
            )));
        }
        let v = &self.voltage;
        let i = &self.current;
        let last = v.len() - 1;

        Ok(xs
            .iter()
            .map(|&x| {
                if x <= v[0] {
                    return i[0];
                }
                if x >= v[last] {
                    return i[last];
                }
                // First index with v[k] > x; 1 <= k <= last
                let k = v.partition_point(|&vk| vk <= x);
                let (x0, x1) = (v[k - 1], v[k]);
                let (y0, y1) = (i[k - 1], i[k]);
                if x1 == x0 {
                    y0
                } else {
                    y0 + (y1 - y0) * (x - x0) / (x1 - x0)
                }
            })
            .collect())
    }
}

fn read_columns(path: &Path, x_col: usize, y_col: usize, has_header: bool) -> Result<JvCurve> {
    let content = fs::read_to_string(path).map_err(|e| CalibrationError::io(path, e))?;
    let mut voltage = Vec::new();
    let mut current = Vec::new();

    let skip = usize::from(has_header);
    for (idx, line) in content.lines().enumerate().skip(skip) {
        let line_no = idx + 1;
        if line.trim().is_empty() {
            continue;
        }
        let fields = split_fields(line);
        let field = |col: usize| -> Result<f64> {
            let raw = fields.get(col).ok_or_else(|| {
                CalibrationError::parse(path, line_no, format!("missing column {}", col))
            })?;
            parse_number(raw).ok_or_else(|| {
                CalibrationError::parse(path, line_no, format!("not a number: '{}'", raw.trim()))
            })
        };
        voltage.push(field(x_col)?);
        current.push(field(y_col)?);
    }

    Ok(JvCurve { voltage, current })
}
