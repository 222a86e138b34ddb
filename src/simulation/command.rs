use super::{CommandTemplate, SimulationContext, SimulationOutput, Simulator};
use crate::error::{CalibrationError, Result};
use std::process::Command;
use tracing::debug;

/// Runs the simulator as a fresh process for every evaluation, e.g.
/// `matlab -batch "run('…/fast_test.m')"` or `flatpak run org.octave.Octave --eval …`
pub struct CommandSimulator {
    program: String,
    args: Vec<CommandTemplate>,
}

impl CommandSimulator {
    pub fn new(program: impl Into<String>, args: Vec<CommandTemplate>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn render_args(&self, context: &SimulationContext) -> Result<Vec<String>> {
        let vars = context.variables();
        self.args.iter().map(|a| a.render(&vars)).collect()
    }
}

impl Simulator for CommandSimulator {
    fn name(&self) -> &str {
        &self.program
    }

    fn run(&mut self, context: &SimulationContext) -> Result<SimulationOutput> {
        let args = self.render_args(context)?;
        debug!(program = %self.program, ?args, "starting simulator");

        let output = Command::new(&self.program)
            .args(&args)
            .current_dir(&context.workdir)
            .output()
            .map_err(|source| CalibrationError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            return Err(CalibrationError::SimulatorFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        if !stdout.is_empty() {
            debug!("simulator output:\n{}", stdout.trim_end());
        }
        Ok(SimulationOutput { stdout })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn context(dir: &std::path::Path) -> SimulationContext {
        SimulationContext::new(dir, dir.join("device.csv"))
    }

    #[test]
    fn runs_in_workdir_with_rendered_args() {
        let dir = tempfile::tempdir().unwrap();
        let mut sim = CommandSimulator::new(
            "sh",
            vec![
                CommandTemplate::new("-c"),
                CommandTemplate::new("echo \"$0\" > JV.csv; pwd"),
                CommandTemplate::new("{device}"),
            ],
        );

        let out = sim.run(&context(dir.path())).unwrap();
        let written = std::fs::read_to_string(dir.path().join("JV.csv")).unwrap();
        assert_eq!(written.trim(), dir.path().join("device.csv").display().to_string());
        assert!(!out.stdout.trim().is_empty());
    }

    #[test]
    fn non_zero_exit_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let mut sim = CommandSimulator::new(
            "sh",
            vec![
                CommandTemplate::new("-c"),
                CommandTemplate::new("echo 'error: singular matrix' >&2; exit 3"),
            ],
        );
        match sim.run(&context(dir.path())) {
            Err(CalibrationError::SimulatorFailed { stderr, .. }) => {
                assert_eq!(stderr, "error: singular matrix")
            }
            other => panic!("expected SimulatorFailed, got {:?}", other),
        }
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut sim = CommandSimulator::new("jvfit-no-such-simulator", Vec::new());
        assert!(matches!(
            sim.run(&context(dir.path())),
            Err(CalibrationError::Spawn { .. })
        ));
    }
}
