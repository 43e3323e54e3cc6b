//! External command execution with live line streaming

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::errors::ManagerError;
use crate::events::LogKind;

/// Default combined stdout+stderr limit (10 MiB)
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// A program with its arguments. Arguments are passed to the process
/// directly, never through a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Stream a line was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStream {
    Stdout,
    Stderr,
}

/// One non-blank output line, delivered as it arrives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: LineStream,
    pub text: String,
}

impl OutputLine {
    /// Best-effort classification for display. Stdout is always `output`;
    /// stderr lines mentioning "error" (any case) are flagged as `error`.
    /// Nothing depends on this for control flow: success and failure are
    /// decided by the exit code alone.
    pub fn kind(&self) -> LogKind {
        match self.stream {
            LineStream::Stderr if self.text.to_ascii_lowercase().contains("error") => LogKind::Error,
            _ => LogKind::Output,
        }
    }
}

/// Per-line callback
pub type LineSink<'a> = &'a (dyn Fn(OutputLine) + Send + Sync);

/// Output of a command that exited with code 0
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs external commands. Implementations never retry.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        command: &CommandLine,
        on_line: Option<LineSink<'_>>,
    ) -> Result<CommandOutput, ManagerError>;
}

/// Production runner backed by `tokio::process`
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    max_output_bytes: usize,
}

impl ProcessRunner {
    pub fn new(max_output_bytes: usize) -> Self {
        Self { max_output_bytes }
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_OUTPUT_BYTES)
    }
}

enum PumpError {
    Overflow,
    Read(LineStream, std::io::Error),
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        command: &CommandLine,
        on_line: Option<LineSink<'_>>,
    ) -> Result<CommandOutput, ManagerError> {
        debug!("Running command: {}", command);

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &command.current_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| ManagerError::Internal(format!("Failed to spawn `{}`: {}", command, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ManagerError::Internal("stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ManagerError::Internal("stderr was not captured".to_string()))?;

        let total = AtomicUsize::new(0);
        let limit = self.max_output_bytes;
        let pumped = tokio::try_join!(
            pump(stdout, LineStream::Stdout, &total, limit, on_line),
            pump(stderr, LineStream::Stderr, &total, limit, on_line),
        );

        let (stdout, stderr) = match pumped {
            Ok(streams) => streams,
            Err(PumpError::Overflow) => {
                warn!("Command `{}` exceeded {} bytes of output, killing it", command, limit);
                let _ = child.kill().await;
                return Err(ManagerError::OutputLimit {
                    command: command.to_string(),
                    limit,
                });
            }
            Err(PumpError::Read(stream, e)) => {
                warn!("Error reading {:?} of `{}`, killing it: {}", stream, command, e);
                let _ = child.kill().await;
                return Err(ManagerError::IoError(e));
            }
        };

        let status = child.wait().await?;
        if status.success() {
            Ok(CommandOutput { stdout, stderr })
        } else {
            debug!("Command `{}` exited with {:?}", command, status.code());
            Err(ManagerError::ExternalCommand {
                command: command.to_string(),
                code: status.code(),
                stdout,
                stderr,
            })
        }
    }
}

/// Drain one stream, forwarding each non-blank line to `on_line`.
///
/// Reads chunk by chunk and charges every chunk against the shared budget
/// before keeping it, so a stream without newlines is bounded too.
async fn pump<R: AsyncRead + Unpin>(
    reader: R,
    stream: LineStream,
    total: &AtomicUsize,
    limit: usize,
    on_line: Option<LineSink<'_>>,
) -> Result<String, PumpError> {
    let mut reader = BufReader::new(reader);
    let mut collected = Vec::new();
    let mut line_start = 0;

    let emit = |line: &[u8]| {
        let Some(sink) = on_line else { return };
        let text = String::from_utf8_lossy(line);
        let text = text.trim_end_matches(['\n', '\r']);
        if !text.trim().is_empty() {
            sink(OutputLine {
                stream,
                text: text.to_string(),
            });
        }
    };

    loop {
        let chunk = reader.fill_buf().await.map_err(|e| PumpError::Read(stream, e))?;
        if chunk.is_empty() {
            break;
        }
        let read = chunk.len();
        if total.fetch_add(read, Ordering::SeqCst) + read > limit {
            return Err(PumpError::Overflow);
        }
        collected.extend_from_slice(chunk);
        reader.consume(read);

        while let Some(pos) = collected[line_start..].iter().position(|&b| b == b'\n') {
            let end = line_start + pos + 1;
            emit(&collected[line_start..end]);
            line_start = end;
        }
    }
    if line_start < collected.len() {
        emit(&collected[line_start..]);
    }

    Ok(String::from_utf8_lossy(&collected).into_owned())
}
