//! Driver subprocess runner.
//!
//! Drivers are separate executables speaking a line-oriented JSON protocol:
//! a JSON request arrives on stdin, progress records and exactly one terminal
//! response leave on stdout, free-form diagnostics leave on stderr. The
//! runner multiplexes all three pipes, relays progress to a sink, and honors
//! cancellation by signalling or killing the child depending on what its
//! `--info` probe advertised.

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde_json::Value;
use servo_protocol::defaults;
use servo_protocol::{DriverInfo, DriverResponse, ProgressRecord};
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::config::{Config, StderrMode};
use crate::error::DriverError;
use crate::progress::ProgressSink;

/// Cap on the offending line quoted inside a decode error.
const DECODE_SNIPPET: usize = 160;

/// What a driver invocation consumes: a query flag with no stdin, or a JSON
/// request fed on stdin. The two are mutually exclusive by construction.
#[derive(Debug, Clone)]
pub enum DriverInput {
    Query(&'static str),
    Request(Value),
}

/// Output accumulated while the child's pipes drain.
#[derive(Default)]
struct Multiplexed {
    response: Option<DriverResponse>,
    stderr: Vec<u8>,
    stderr_total: usize,
}

enum PipeEvent {
    Stdout(std::io::Result<Option<String>>),
    Stderr(std::io::Result<usize>),
}

pub struct DriverRunner {
    io_timeout: Option<Duration>,
    stderr_mode: StderrMode,
}

impl DriverRunner {
    pub fn new(config: &Config) -> Self {
        Self {
            io_timeout: config.io_timeout,
            stderr_mode: config.stderr_mode,
        }
    }

    /// Run `driver --info <app_id>` to completion and parse its metadata.
    pub async fn probe(&self, driver: &Path, app_id: &str) -> Result<DriverInfo, DriverError> {
        let output = Command::new(driver)
            .arg("--info")
            .arg(app_id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| DriverError::Spawn {
                driver: driver.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(DriverError::InfoProbe {
                driver: driver.display().to_string(),
                message: format!(
                    "exit {}: {}",
                    output.status.code().unwrap_or(-1),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        serde_json::from_slice(&output.stdout).map_err(|err| DriverError::InfoProbe {
            driver: driver.display().to_string(),
            message: format!("bad info JSON: {err}"),
        })
    }

    /// Run a driver to completion and return its terminal response.
    ///
    /// Progress records go to `sink` as they arrive; a `CancelRequested`
    /// return raises cancellation into the child (SIGUSR1 when supported,
    /// kill otherwise) while reading continues to EOF so no output is lost.
    pub async fn run(
        &self,
        driver: &Path,
        app_id: &str,
        input: DriverInput,
        sink: &mut dyn ProgressSink,
    ) -> Result<DriverResponse, DriverError> {
        let info = self.probe(driver, app_id).await?;

        let request_bytes = match &input {
            DriverInput::Request(value) => Some(serde_json::to_vec(value).map_err(|err| {
                DriverError::Io {
                    stream: "stdin",
                    source: std::io::Error::new(std::io::ErrorKind::InvalidData, err),
                }
            })?),
            DriverInput::Query(_) => None,
        };

        let mut command = Command::new(driver);
        if let DriverInput::Query(flag) = &input {
            command.arg(flag);
        }
        command
            .arg(app_id)
            .stdin(if request_bytes.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| DriverError::Spawn {
            driver: driver.display().to_string(),
            source,
        })?;

        let writer = match request_bytes {
            Some(bytes) => {
                let stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
                Some(spawn_stdin_writer(stdin, bytes))
            }
            None => None,
        };
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;

        let mut streams = Multiplexed::default();
        let multiplexed = self
            .multiplex(&mut child, stdout, stderr, sink, info.has_cancel, &mut streams)
            .await;

        let result = match multiplexed {
            Ok(()) => {
                let status = self.reap(driver, &mut child).await?;
                Ok(self.finish(streams, status))
            }
            Err(err) => {
                let _ = child.kill().await;
                if !streams.stderr.is_empty() {
                    error!(
                        driver = %driver.display(),
                        "driver stderr before failure:\n{}",
                        String::from_utf8_lossy(&streams.stderr).trim()
                    );
                }
                Err(err)
            }
        };

        // The pipe is certainly broken by now, so this cannot hang.
        if let Some(handle) = writer {
            if let Ok(Err(err)) = handle.await {
                if err.kind() != std::io::ErrorKind::BrokenPipe {
                    warn!("stdin write to driver failed: {err}");
                }
            }
        }

        result
    }

    /// Drain stdout and stderr until both reach EOF, dispatching progress
    /// records along the way.
    async fn multiplex(
        &self,
        child: &mut Child,
        stdout: ChildStdout,
        stderr: ChildStderr,
        sink: &mut dyn ProgressSink,
        has_cancel: bool,
        out: &mut Multiplexed,
    ) -> Result<(), DriverError> {
        let mut lines = BufReader::new(stdout).lines();
        let mut stderr = stderr;
        let mut chunk = [0u8; 8192];
        let mut stdout_done = false;
        let mut stderr_done = false;
        let mut cancelled = false;

        while !stdout_done || !stderr_done {
            let wait = async {
                tokio::select! {
                    line = lines.next_line(), if !stdout_done => PipeEvent::Stdout(line),
                    read = stderr.read(&mut chunk), if !stderr_done => PipeEvent::Stderr(read),
                }
            };
            let event = match self.io_timeout {
                Some(limit) => tokio::time::timeout(limit, wait)
                    .await
                    .map_err(|_| DriverError::Timeout(limit))?,
                None => wait.await,
            };

            match event {
                PipeEvent::Stdout(Ok(Some(line))) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    let value = serde_json::from_str::<Value>(trimmed)
                        .ok()
                        .filter(Value::is_object)
                        .ok_or_else(|| DriverError::Decode {
                            line: clip(trimmed, DECODE_SNIPPET),
                        })?;

                    match ProgressRecord::from_value(&value) {
                        Some(record) => {
                            if !cancelled && sink.report(&record).await.is_err() {
                                cancelled = true;
                                cancel_child(child, has_cancel);
                            }
                        }
                        None => {
                            if out.response.is_some() {
                                debug!("driver emitted more than one terminal line; keeping the last");
                            }
                            out.response = Some(DriverResponse::new(value));
                        }
                    }
                }
                PipeEvent::Stdout(Ok(None)) => stdout_done = true,
                PipeEvent::Stdout(Err(source)) => {
                    return Err(DriverError::Io {
                        stream: "stdout",
                        source,
                    })
                }
                PipeEvent::Stderr(Ok(0)) => stderr_done = true,
                PipeEvent::Stderr(Ok(n)) => {
                    out.stderr_total += n;
                    let room = defaults::MAX_STDERR_BYTES.saturating_sub(out.stderr.len());
                    out.stderr.extend_from_slice(&chunk[..n.min(room)]);
                }
                PipeEvent::Stderr(Err(source)) => {
                    return Err(DriverError::Io {
                        stream: "stderr",
                        source,
                    })
                }
            }
        }

        Ok(())
    }

    /// Wait for the child to exit after its pipes closed; kill it when it
    /// lingers past the exit timeout.
    async fn reap(&self, driver: &Path, child: &mut Child) -> Result<ExitStatus, DriverError> {
        match tokio::time::timeout(defaults::DRIVER_EXIT_TIMEOUT, child.wait()).await {
            Ok(waited) => waited.map_err(|source| DriverError::Io {
                stream: "child",
                source,
            }),
            Err(_) => {
                warn!(
                    driver = %driver.display(),
                    "driver still running {:?} after closing its pipes; killing it",
                    defaults::DRIVER_EXIT_TIMEOUT
                );
                child.kill().await.map_err(|source| DriverError::Io {
                    stream: "child",
                    source,
                })?;
                child.wait().await.map_err(|source| DriverError::Io {
                    stream: "child",
                    source,
                })
            }
        }
    }

    /// Fold the exit status into the terminal response: a non-zero exit
    /// defaults the status to `failed` and appends captured stderr. A
    /// response claiming `ok` while the exit code says otherwise is
    /// downgraded; the exit code wins.
    fn finish(&self, streams: Multiplexed, status: ExitStatus) -> DriverResponse {
        let mut response = streams.response.unwrap_or_else(DriverResponse::empty);
        if !status.success() {
            if !response.has_status() || response.is_ok() {
                response.set_status("failed");
            }
            if let Some(block) =
                format_stderr(&streams.stderr, streams.stderr_total, self.stderr_mode)
            {
                response.append_message(&block);
            }
        }
        response
    }
}

/// Raise cancellation into the child: cooperative SIGUSR1 when the driver
/// advertised `has_cancel`, otherwise an outright kill. Reading continues
/// until EOF in both cases.
fn cancel_child(child: &mut Child, has_cancel: bool) {
    if has_cancel {
        if let Some(pid) = child.id() {
            debug!(pid, "sending SIGUSR1 to driver");
            if let Err(err) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGUSR1) {
                warn!("failed to signal driver ({err}); killing it");
                let _ = child.start_kill();
            }
            return;
        }
    }
    if let Err(err) = child.start_kill() {
        warn!("failed to kill driver: {err}");
    }
}

/// Feed the request to the child in writes no larger than the atomic pipe
/// write size, then close its stdin.
fn spawn_stdin_writer(
    mut stdin: tokio::process::ChildStdin,
    bytes: Vec<u8>,
) -> JoinHandle<std::io::Result<()>> {
    tokio::spawn(async move {
        for chunk in bytes.chunks(defaults::STDIN_CHUNK_SIZE) {
            stdin.write_all(chunk).await?;
        }
        stdin.shutdown().await?;
        Ok(())
    })
}

fn format_stderr(buffer: &[u8], total: usize, mode: StderrMode) -> Option<String> {
    if buffer.is_empty() {
        return None;
    }
    let text = String::from_utf8_lossy(buffer);
    let body = match mode {
        StderrMode::None => return None,
        StderrMode::Minimal => text.lines().take(2).collect::<Vec<_>>().join("\n"),
        StderrMode::All => {
            let mut body = text.into_owned();
            if total > buffer.len() {
                body.push_str(defaults::STDERR_TRUNCATION_MARKER);
            }
            body
        }
    };
    if body.is_empty() {
        None
    } else {
        Some(format!("\nstderr: {body}"))
    }
}

fn clip(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

fn missing_pipe(stream: &'static str) -> DriverError {
    DriverError::Io {
        stream,
        source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe not captured"),
    }
}
