//! JSON job description for a calibration or sweep

use crate::core::{validate_parameters, Parameter};
use crate::device::DeviceTable;
use crate::error::{CalibrationError, Result};
use crate::objective::{Objective, ObjectiveConfig};
use crate::optimization::{OptimizerConfig, DEFAULT_FAILURE_PENALTY};
use crate::simulation::{expand_home, OutputFiles, SimulationContext, SimulatorConfig};
use crate::sweep::SweepConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

fn default_failure_penalty() -> f64 {
    DEFAULT_FAILURE_PENALTY
}

fn default_clear_outputs() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Simulator working directory; relative paths resolve against the config file
    pub workdir: String,
    /// Device table, relative to `workdir` unless absolute
    pub device_file: String,
    pub simulator: SimulatorConfig,
    #[serde(default)]
    pub outputs: OutputFiles,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub objective: Option<ObjectiveConfig>,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default = "default_failure_penalty")]
    pub failure_penalty: f64,
    /// Hard cap on simulator runs across the whole optimization
    #[serde(default)]
    pub max_evaluations: Option<usize>,
    /// Extra `{name}` substitutions for the simulator templates
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
    #[serde(default = "default_clear_outputs")]
    pub clear_outputs: bool,
    #[serde(default)]
    pub sweep: Option<SweepConfig>,

    /// Directory of the config file
    #[serde(skip)]
    base_dir: PathBuf,
}

impl CalibrationConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| CalibrationError::io(path, e))?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self::from_json(path, &content, base_dir)
    }

    /// Parse `content`; `origin` only labels errors
    pub fn from_json(origin: &Path, content: &str, base_dir: impl Into<PathBuf>) -> Result<Self> {
        let mut config: Self =
            serde_json::from_str(content).map_err(|source| CalibrationError::Json {
                path: origin.to_path_buf(),
                source,
            })?;
        config.base_dir = base_dir.into();
        debug!(workdir = %config.workdir().display(), "configuration loaded");
        Ok(config)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn workdir(&self) -> PathBuf {
        self.base_dir.join(expand_home(&self.workdir))
    }

    pub fn device_path(&self) -> PathBuf {
        self.workdir().join(expand_home(&self.device_file))
    }

    pub fn context(&self) -> SimulationContext {
        SimulationContext::new(self.workdir(), self.device_path()).with_vars(self.vars.clone())
    }

    /// Everything a calibration needs, without touching the filesystem
    pub fn validate(&self) -> Result<()> {
        validate_parameters(&self.parameters)?;
        if self.objective.is_none() {
            return Err(CalibrationError::Config("no objective configured".into()));
        }
        self.optimizer.validate()?;
        if !self.failure_penalty.is_finite() {
            return Err(CalibrationError::Config(
                "failure_penalty must be finite".into(),
            ));
        }
        if self.max_evaluations == Some(0) {
            return Err(CalibrationError::Config(
                "max_evaluations must be at least 1".into(),
            ));
        }
        if let Some(sweep) = &self.sweep {
            sweep.validate()?;
        }
        self.check_templates()
    }

    pub fn sweep_config(&self) -> Result<&SweepConfig> {
        let sweep = self
            .sweep
            .as_ref()
            .ok_or_else(|| CalibrationError::Config("no sweep configured".into()))?;
        sweep.validate()?;
        self.check_templates()?;
        Ok(sweep)
    }

    /// Every simulator template renders with the variables of this job
    fn check_templates(&self) -> Result<()> {
        let vars = self.context().variables();
        for template in self.simulator.templates() {
            template.render(&vars)?;
        }
        Ok(())
    }

    /// Load the reference data the objective compares against
    pub fn objective(&self) -> Result<Objective> {
        self.objective
            .as_ref()
            .ok_or_else(|| CalibrationError::Config("no objective configured".into()))?
            .build(&self.base_dir)
    }

    /// Validate, then confirm every referenced cell exists and the reference parses
    pub fn check(&self) -> Result<()> {
        self.validate()?;

        let table = DeviceTable::load(self.device_path())?;
        for param in &self.parameters {
            for cell in &param.cells {
                table.check_cell(cell)?;
            }
        }
        if let Some(sweep) = &self.sweep {
            for cell in &sweep.cells {
                table.check_cell(cell)?;
            }
        }

        self.objective()?;
        Ok(())
    }
}
