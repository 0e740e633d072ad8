use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::config::EngineConfig;
use crate::grid::InitialConditions;
use crate::history::EvolutionOutcome;

/// Seam between the orchestration code and the external physics. The real
/// engine is a subprocess; tests script outcomes directly.
pub trait EvolutionEngine {
    fn evolve(&self, binary: &InitialConditions, alpha_ce: f64) -> Result<EvolutionOutcome>;
}

/// Request handed to the engine on stdin, one JSON object per invocation.
#[derive(Debug, Serialize)]
struct EngineRequest<'a> {
    #[serde(flatten)]
    initial: &'a InitialConditions,
    alpha_ce: f64,
}

/// Adapter over the external binary-evolution command. Per binary: write
/// the initial conditions as JSON to stdin, read the outcome JSON from
/// stdout, enforce the wall-clock timeout.
pub struct ExternalEngine {
    config: EngineConfig,
}

impl ExternalEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }
}

impl EvolutionEngine for ExternalEngine {
    fn evolve(&self, binary: &InitialConditions, alpha_ce: f64) -> Result<EvolutionOutcome> {
        let request = serde_json::to_string(&EngineRequest {
            initial: binary,
            alpha_ce,
        })
        .context("failed to serialize engine request")?;

        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let output = match run_with_timeout(command, Some(&request), timeout)? {
            RunOutcome::Completed(output) => output,
            RunOutcome::TimedOut => bail!(
                "engine '{}' timed out after {}s",
                self.config.command,
                self.config.timeout_secs
            ),
        };

        if output.status_code != Some(0) {
            bail!(
                "engine '{}' exited with {:?}: {}",
                self.config.command,
                output.status_code,
                output.stderr.trim()
            );
        }

        serde_json::from_str(&output.stdout).with_context(|| {
            format!(
                "engine '{}' produced malformed outcome JSON",
                self.config.command
            )
        })
    }
}

/// Captured result of a finished subprocess.
#[derive(Debug)]
pub struct ProcessOutput {
    pub status_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed(ProcessOutput),
    TimedOut,
}

/// Spawn the command, optionally write `stdin_payload`, and poll until exit
/// or the deadline. On timeout the child is killed and reaped.
///
/// stdout and stderr are drained on reader threads while the child runs; a
/// child producing more than the OS pipe buffer would otherwise block on a
/// full pipe and never exit.
pub fn run_with_timeout(
    mut command: Command,
    stdin_payload: Option<&str>,
    timeout: Duration,
) -> Result<RunOutcome> {
    command.stdout(Stdio::piped()).stderr(Stdio::piped());
    if stdin_payload.is_some() {
        command.stdin(Stdio::piped());
    }

    let start = Instant::now();
    let mut child = command
        .spawn()
        .with_context(|| format!("failed to spawn {:?}", command.get_program()))?;

    let stdout_reader = spawn_reader(child.stdout.take());
    let stderr_reader = spawn_reader(child.stderr.take());

    if let Some(payload) = stdin_payload {
        let mut stdin = child
            .stdin
            .take()
            .context("child stdin not captured")?;
        stdin
            .write_all(payload.as_bytes())
            .context("failed to write engine request to stdin")?;
        // Closing stdin signals end of request.
        drop(stdin);
    }

    let deadline = start + timeout;
    loop {
        match child.try_wait().context("failed to poll child process")? {
            Some(status) => {
                let stdout = join_reader(stdout_reader).context("failed to read child stdout")?;
                let stderr = join_reader(stderr_reader).context("failed to read child stderr")?;
                return Ok(RunOutcome::Completed(ProcessOutput {
                    status_code: status.code(),
                    stdout,
                    stderr,
                    elapsed: start.elapsed(),
                }));
            }
            None if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                // Readers see EOF once the child is reaped.
                let _ = stdout_reader.join();
                let _ = stderr_reader.join();
                return Ok(RunOutcome::TimedOut);
            }
            None => std::thread::sleep(Duration::from_millis(50)),
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<std::io::Result<String>> {
    std::thread::spawn(move || {
        let mut buf = String::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_string(&mut buf)?;
        }
        Ok(buf)
    })
}

fn join_reader(handle: JoinHandle<std::io::Result<String>>) -> Result<String> {
    handle
        .join()
        .map_err(|_| anyhow!("pipe reader thread panicked"))?
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_command_captures_stdout() {
        let mut command = Command::new("echo");
        command.arg("hello");
        let outcome = run_with_timeout(command, None, Duration::from_secs(5)).unwrap();
        match outcome {
            RunOutcome::Completed(output) => {
                assert_eq!(output.status_code, Some(0));
                assert_eq!(output.stdout.trim(), "hello");
            }
            RunOutcome::TimedOut => panic!("echo should not time out"),
        }
    }

    #[test]
    fn slow_command_times_out() {
        let mut command = Command::new("sleep");
        command.arg("5");
        let outcome = run_with_timeout(command, None, Duration::from_millis(200)).unwrap();
        assert!(matches!(outcome, RunOutcome::TimedOut));
    }

    #[test]
    fn bulky_stdout_is_drained_while_the_child_runs() {
        // More than a pipe buffer's worth of output; the child must still
        // exit promptly instead of blocking on a full pipe.
        let mut command = Command::new("sh");
        command.arg("-c").arg("head -c 1000000 /dev/zero | tr '\\0' 'a'");
        let outcome = run_with_timeout(command, None, Duration::from_secs(3)).unwrap();
        match outcome {
            RunOutcome::Completed(output) => {
                assert_eq!(output.status_code, Some(0));
                assert_eq!(output.stdout.len(), 1_000_000);
            }
            RunOutcome::TimedOut => panic!("child stalled on a full stdout pipe"),
        }
    }

    #[test]
    fn stdin_payload_reaches_the_child() {
        let command = Command::new("cat");
        let outcome =
            run_with_timeout(command, Some("{\"m1\":12.0}"), Duration::from_secs(5)).unwrap();
        match outcome {
            RunOutcome::Completed(output) => assert_eq!(output.stdout, "{\"m1\":12.0}"),
            RunOutcome::TimedOut => panic!("cat should not time out"),
        }
    }

    #[test]
    fn nonzero_exit_surfaces_as_engine_error() {
        let engine = ExternalEngine::new(EngineConfig {
            command: "false".to_string(),
            args: vec![],
            timeout_secs: 5,
        });
        let ic = InitialConditions {
            m1: 12.0,
            m2: 9.0,
            p_orb: 100.0,
            z: 0.014,
            q: 0.75,
        };
        assert!(engine.evolve(&ic, 1.0).is_err());
    }
}
