use super::{CommandTemplate, SimulationContext, SimulationOutput, Simulator};
use crate::error::{CalibrationError, Result};
use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use std::collections::{BTreeMap, VecDeque};
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const OK_MARKER: &str = "__jvfit_ok__";
/// Lines of interpreter stderr kept for error reports
const STDERR_TAIL: usize = 50;
const ERR_MARKER: &str = "__jvfit_error__";

/// Works in both MATLAB and Octave
const MATLAB_WRAPPER: &str =
    "try\n{script}\ndisp('{ok}');\ncatch err\ndisp(['{err} ' err.message]);\nend";

/// A running interpreter process with its stdout forwarded line by line
struct Session {
    child: Child,
    stdin: Option<ChildStdin>,
    lines: Receiver<String>,
    stderr: Arc<Mutex<VecDeque<String>>>,
    // Not joined on drop: a grandchild can hold stdout open after the interpreter exits
    _reader: JoinHandle<()>,
    stderr_reader: JoinHandle<()>,
}

impl Session {
    fn spawn(program: &str, args: &[String], workdir: &std::path::Path) -> Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .current_dir(workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| CalibrationError::Spawn {
                program: program.to_string(),
                source,
            })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take().ok_or_else(|| CalibrationError::Spawn {
            program: program.to_string(),
            source: std::io::Error::other("stdout not captured"),
        })?;

        let stderr_pipe = child.stderr.take().ok_or_else(|| CalibrationError::Spawn {
            program: program.to_string(),
            source: std::io::Error::other("stderr not captured"),
        })?;

        let (tx, rx) = channel::unbounded();
        let reader = thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });

        let stderr = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL)));
        let tail = Arc::clone(&stderr);
        let stderr_reader = thread::spawn(move || {
            for line in BufReader::new(stderr_pipe).lines() {
                let Ok(line) = line else { break };
                debug!(target: "jvfit::simulator", "stderr: {}", line);
                let Ok(mut tail) = tail.lock() else { break };
                if tail.len() == STDERR_TAIL {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        });

        Ok(Self {
            child,
            stdin,
            lines: rx,
            stderr,
            _reader: reader,
            stderr_reader,
        })
    }

    /// Recent stderr lines, after giving the reader a moment to drain the pipe
    fn stderr_tail(&self) -> String {
        let deadline = Instant::now() + Duration::from_millis(500);
        while !self.stderr_reader.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        match self.stderr.lock() {
            Ok(tail) => tail.iter().map(String::as_str).collect::<Vec<_>>().join("\n"),
            Err(_) => String::new(),
        }
    }

    fn send(&mut self, text: &str) -> std::io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::BrokenPipe))?;
        stdin.write_all(text.as_bytes())?;
        stdin.write_all(b"\n")?;
        stdin.flush()
    }

    fn kill(&mut self) {
        self.stdin = None;
        let _ = self.child.kill();
        let _ = self.child.wait();
    }

    fn exit_status(&mut self) -> String {
        match self.child.try_wait() {
            Ok(Some(status)) => status.to_string(),
            _ => "interpreter closed its output".to_string(),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.write_all(b"exit\n");
            let _ = stdin.flush();
        }

        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            match self.child.try_wait() {
                Ok(Some(_)) => break,
                Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(20)),
                _ => {
                    let _ = self.child.kill();
                    let _ = self.child.wait();
                    break;
                }
            }
        }
    }
}

/// Keeps one MATLAB/Octave interpreter alive across evaluations.
///
/// Each run sends the rendered script wrapped so that the interpreter prints a
/// completion marker; output is read until that marker or the timeout. A session
/// that timed out or died is discarded and respawned on the next run.
pub struct SessionSimulator {
    program: String,
    args: Vec<String>,
    script: CommandTemplate,
    wrapper: CommandTemplate,
    timeout: Duration,
    session: Option<Session>,
}

impl SessionSimulator {
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        script: CommandTemplate,
        timeout: Duration,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            script,
            wrapper: CommandTemplate::new(MATLAB_WRAPPER),
            timeout,
            session: None,
        }
    }

    /// Replace the MATLAB-style wrapper; it must use `{script}`, `{ok}` and `{err}`
    pub fn with_wrapper(mut self, wrapper: CommandTemplate) -> Self {
        self.wrapper = wrapper;
        self
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    fn wrap(&self, context: &SimulationContext) -> Result<String> {
        let script = self.script.render(&context.variables())?;
        let vars = BTreeMap::from([
            ("script".to_string(), script),
            ("ok".to_string(), OK_MARKER.to_string()),
            ("err".to_string(), ERR_MARKER.to_string()),
        ]);
        self.wrapper.render(&vars)
    }

    fn session(&mut self, context: &SimulationContext) -> Result<&mut Session> {
        if self.session.is_none() {
            info!(program = %self.program, "starting simulator session");
            self.session = Some(Session::spawn(&self.program, &self.args, &context.workdir)?);
        }
        self.session.as_mut().ok_or_else(|| CalibrationError::Spawn {
            program: self.program.clone(),
            source: std::io::Error::other("session unavailable"),
        })
    }
}

impl Simulator for SessionSimulator {
    fn name(&self) -> &str {
        &self.program
    }

    fn run(&mut self, context: &SimulationContext) -> Result<SimulationOutput> {
        let command = self.wrap(context)?;
        let timeout = self.timeout;
        debug!("session command:\n{}", command);

        let session = self.session(context)?;
        if let Err(e) = session.send(&command) {
            let status = session.exit_status();
            let tail = session.stderr_tail();
            self.session = None;
            return Err(CalibrationError::SimulatorFailed {
                status,
                stderr: format!("failed to send command: {}\n{}", e, tail)
                    .trim_end()
                    .to_string(),
            });
        }

        let deadline = Instant::now() + timeout;
        let mut stdout = String::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match session.lines.recv_timeout(remaining) {
                Ok(line) => {
                    // MATLAB without a desktop echoes its prompt in front of output
                    let text = line.trim().trim_start_matches(">>").trim();
                    if text == OK_MARKER {
                        if !stdout.is_empty() {
                            debug!("simulator output:\n{}", stdout.trim_end());
                        }
                        return Ok(SimulationOutput { stdout });
                    }
                    if let Some(message) = text.strip_prefix(ERR_MARKER) {
                        return Err(CalibrationError::SimulatorFailed {
                            status: "script error".into(),
                            stderr: message.trim().to_string(),
                        });
                    }
                    stdout.push_str(&line);
                    stdout.push('\n');
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(?timeout, "simulator session timed out, restarting on next run");
                    session.kill();
                    self.session = None;
                    return Err(CalibrationError::SimulatorTimeout(timeout));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    let status = session.exit_status();
                    let tail = session.stderr_tail();
                    self.session = None;
                    // Fall back to stdout when the interpreter reported nothing on stderr
                    let stderr = if tail.trim().is_empty() {
                        stdout.trim().to_string()
                    } else {
                        tail
                    };
                    return Err(CalibrationError::SimulatorFailed { status, stderr });
                }
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    const SH_WRAPPER: &str = "if {script}; then echo {ok}; else echo {err} exit $?; fi";

    fn sh_session(script: &str, timeout: Duration) -> SessionSimulator {
        SessionSimulator::new("sh", Vec::new(), CommandTemplate::new(script), timeout)
            .with_wrapper(CommandTemplate::new(SH_WRAPPER))
    }

    #[test]
    fn matlab_wrapper_contains_markers() {
        let sim = SessionSimulator::new(
            "octave",
            Vec::new(),
            CommandTemplate::new("run('{workdir}/fast_test.m')"),
            Duration::from_secs(1),
        );
        let wrapped = sim.wrap(&SimulationContext::new("/sim", "/sim/d.csv")).unwrap();
        assert!(wrapped.starts_with("try\nrun('/sim/fast_test.m')\n"));
        assert!(wrapped.contains(&format!("disp('{}')", OK_MARKER)));
        assert!(wrapped.contains(ERR_MARKER));
    }

    #[test]
    fn session_survives_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = SimulationContext::new(dir.path(), dir.path().join("d.csv"));
        let mut sim = sh_session("echo run >> log.txt", Duration::from_secs(10));

        sim.run(&ctx).unwrap();
        assert!(sim.is_running());
        sim.run(&ctx).unwrap();

        let log = std::fs::read_to_string(dir.path().join("log.txt")).unwrap();
        assert_eq!(log.lines().count(), 2);
    }

    #[test]
    fn collects_output_before_marker() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = SimulationContext::new(dir.path(), dir.path().join("d.csv"));
        let mut sim = sh_session("echo converged", Duration::from_secs(10));
        let out = sim.run(&ctx).unwrap();
        assert_eq!(out.stdout, "converged\n");
    }

    #[test]
    fn script_failure_keeps_session() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = SimulationContext::new(dir.path(), dir.path().join("d.csv"));
        let mut sim = sh_session("false", Duration::from_secs(10));
        assert!(matches!(
            sim.run(&ctx),
            Err(CalibrationError::SimulatorFailed { .. })
        ));
        assert!(sim.is_running());
    }

    #[test]
    fn timeout_discards_session() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = SimulationContext::new(dir.path(), dir.path().join("d.csv"));
        let mut sim = sh_session("sleep 2", Duration::from_millis(200));
        assert!(matches!(
            sim.run(&ctx),
            Err(CalibrationError::SimulatorTimeout(_))
        ));
        assert!(!sim.is_running());
    }

    #[test]
    fn next_run_after_timeout_respawns() {
        let dir = tempfile::tempdir().unwrap();
        let slow = SimulationContext::new(dir.path(), dir.path().join("d.csv"))
            .with_vars(BTreeMap::from([("step".to_string(), "sleep 2".to_string())]));
        let quick = SimulationContext::new(dir.path(), dir.path().join("d.csv"))
            .with_vars(BTreeMap::from([("step".to_string(), "true".to_string())]));
        let mut sim = sh_session("{step}", Duration::from_millis(200));

        assert!(matches!(
            sim.run(&slow),
            Err(CalibrationError::SimulatorTimeout(_))
        ));
        assert!(!sim.is_running());

        sim.run(&quick).unwrap();
        assert!(sim.is_running());
    }

    #[test]
    fn dead_interpreter_reports_its_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = SimulationContext::new(dir.path(), dir.path().join("d.csv"));
        let mut sim = sh_session(
            "echo partial; echo 'license checkout failed' >&2; exit 3",
            Duration::from_secs(10),
        );

        match sim.run(&ctx) {
            Err(CalibrationError::SimulatorFailed { stderr, .. }) => {
                assert!(stderr.contains("license checkout failed"), "{stderr}");
                assert!(!stderr.contains("partial"), "{stderr}");
            }
            other => panic!("unexpected {:?}", other.map(|o| o.stdout)),
        }
        assert!(!sim.is_running());
    }
}
