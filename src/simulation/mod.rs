//! Running the external device simulator

mod command;
mod session;
mod template;

pub use command::CommandSimulator;
pub use session::SessionSimulator;
pub use template::CommandTemplate;

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What a simulator run needs to know about the job
#[derive(Clone, Debug)]
pub struct SimulationContext {
    pub workdir: PathBuf,
    pub device_file: PathBuf,
    /// Extra template variables from the config
    pub vars: BTreeMap<String, String>,
}

impl SimulationContext {
    pub fn new(workdir: impl Into<PathBuf>, device_file: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            device_file: device_file.into(),
            vars: BTreeMap::new(),
        }
    }

    pub fn with_vars(mut self, vars: BTreeMap<String, String>) -> Self {
        self.vars = vars;
        self
    }

    /// Template variables: `workdir`, `device`, then the configured extras
    pub fn variables(&self) -> BTreeMap<String, String> {
        let mut vars = self.vars.clone();
        vars.insert("workdir".into(), self.workdir.display().to_string());
        vars.insert("device".into(), self.device_file.display().to_string());
        vars
    }
}

#[derive(Clone, Debug, Default)]
pub struct SimulationOutput {
    pub stdout: String,
}

/// External program that turns the device file into `JV.csv` / `stats.csv`
pub trait Simulator {
    fn name(&self) -> &str;

    fn run(&mut self, context: &SimulationContext) -> Result<SimulationOutput>;
}

impl<S: Simulator + ?Sized> Simulator for &mut S {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn run(&mut self, context: &SimulationContext) -> Result<SimulationOutput> {
        (**self).run(context)
    }
}

impl<S: Simulator + ?Sized> Simulator for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn run(&mut self, context: &SimulationContext) -> Result<SimulationOutput> {
        (**self).run(context)
    }
}

/// Files the simulator leaves in its working directory
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFiles {
    #[serde(default = "default_jv")]
    pub jv: PathBuf,
    #[serde(default = "default_stats")]
    pub stats: PathBuf,
}

fn default_jv() -> PathBuf {
    PathBuf::from("JV.csv")
}

fn default_stats() -> PathBuf {
    PathBuf::from("stats.csv")
}

impl Default for OutputFiles {
    fn default() -> Self {
        Self {
            jv: default_jv(),
            stats: default_stats(),
        }
    }
}

impl OutputFiles {
    pub fn jv_path(&self, workdir: &Path) -> PathBuf {
        workdir.join(&self.jv)
    }

    pub fn stats_path(&self, workdir: &Path) -> PathBuf {
        workdir.join(&self.stats)
    }
}

fn default_timeout_secs() -> u64 {
    600
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SimulatorConfig {
    /// Start the program once per evaluation
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// Keep one interpreter alive and feed it `script` for every evaluation
    Session {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        script: String,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
        /// Wraps `{script}` so the interpreter prints `{ok}` or `{err} <message>` when done
        #[serde(default)]
        wrapper: Option<String>,
    },
}

impl SimulatorConfig {
    pub fn build(&self) -> Box<dyn Simulator> {
        match self {
            Self::Command { program, args } => Box::new(CommandSimulator::new(
                expand_home(program).display().to_string(),
                args.iter().map(CommandTemplate::new).collect(),
            )),
            Self::Session {
                program,
                args,
                script,
                timeout_secs,
                wrapper,
            } => {
                let mut session = SessionSimulator::new(
                    expand_home(program).display().to_string(),
                    args.clone(),
                    CommandTemplate::new(script),
                    Duration::from_secs(*timeout_secs),
                );
                if let Some(wrapper) = wrapper {
                    session = session.with_wrapper(CommandTemplate::new(wrapper));
                }
                Box::new(session)
            }
        }
    }

    /// Every template the simulator renders per run
    pub fn templates(&self) -> Vec<CommandTemplate> {
        match self {
            Self::Command { args, .. } => args.iter().map(CommandTemplate::new).collect(),
            Self::Session { script, .. } => vec![CommandTemplate::new(script)],
        }
    }
}

/// Expand a leading `~` from `$HOME`
pub fn expand_home(path: &str) -> PathBuf {
    let home = std::env::var_os("HOME");
    match (path, home) {
        ("~", Some(home)) => PathBuf::from(home),
        (p, Some(home)) if p.starts_with("~/") => PathBuf::from(home).join(&p[2..]),
        (p, _) => PathBuf::from(p),
    }
}
