//! External command runner with captured output and a hard timeout.
//!
//! Service reloads and status probes shell out to the process manager. A
//! hung child must not hang the caller, so every invocation is bounded: the
//! child is polled until a deadline and killed if it is still running.

use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{ProvisionError, ProvisionResult};

/// Default per-invocation timeout.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Captured result of a finished child process.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// True if the child exited with status zero.
    pub success: bool,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

/// Runs external commands with a bounded runtime.
#[derive(Debug, Clone)]
pub struct ToolRunner {
    timeout: Duration,
}

impl Default for ToolRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRunner {
    /// Creates a runner with the default timeout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    /// Overrides the per-invocation timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Runs `program` with `args`, returning the captured output whatever
    /// the exit status.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::ExternalTool`] if the child cannot be
    /// spawned or outlives the timeout (in which case it is killed).
    pub fn run_raw(&self, program: &str, args: &[&str]) -> ProvisionResult<ToolOutput> {
        let command_line = command_line(program, args);
        debug!(command = %command_line, "running external tool");

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ProvisionError::external_tool(&command_line, e.to_string()))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_reader = std::thread::spawn(move || drain(stdout));
        let stderr_reader = std::thread::spawn(move || drain(stderr));

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if Instant::now() >= deadline {
                        // Kill errors are moot: either way the child is gone
                        // or unkillable, and the caller gets a timeout.
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(ProvisionError::external_tool(
                            &command_line,
                            format!("timed out after {:?}", self.timeout),
                        ));
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    return Err(ProvisionError::external_tool(&command_line, e.to_string()));
                }
            }
        };

        let stdout = join_reader(stdout_reader);
        let stderr = join_reader(stderr_reader);
        Ok(ToolOutput {
            success: status.success(),
            stdout,
            stderr,
        })
    }

    /// Runs `program` with `args`, requiring a zero exit status.
    ///
    /// # Errors
    ///
    /// In addition to the [`Self::run_raw`] failures, a non-zero exit status
    /// is an [`ProvisionError::ExternalTool`] carrying the captured stderr.
    pub fn run(&self, program: &str, args: &[&str]) -> ProvisionResult<String> {
        let output = self.run_raw(program, args)?;
        if output.success {
            Ok(output.stdout)
        } else {
            let detail = if output.stderr.trim().is_empty() {
                "exited with non-zero status".to_string()
            } else {
                output.stderr.trim().to_string()
            };
            Err(ProvisionError::external_tool(
                command_line(program, args),
                detail,
            ))
        }
    }
}

fn command_line(program: &str, args: &[&str]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

fn drain(pipe: Option<impl Read>) -> String {
    let mut buffer = String::new();
    if let Some(mut pipe) = pipe {
        // Read errors on a killed child's pipe are expected; partial output
        // is still returned.
        let _ = pipe.read_to_string(&mut buffer);
    }
    buffer
}

fn join_reader(handle: std::thread::JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}
