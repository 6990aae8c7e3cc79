// Trainer launcher - runs one stage of the external Python trainer
//
// Each launch blocks (awaits) until the subprocess exits. stdout goes straight
// to the terminal; stderr is echoed chunk by chunk and its tail kept for reports.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;

use super::stage::Stage;
use crate::config::Config;
use crate::errors::{StageError, StageExit};

/// Default number of stderr lines kept for failure reports
pub const DEFAULT_STDERR_TAIL_LINES: usize = 20;

/// Longest stderr line kept in the tail, in bytes
pub const MAX_TAIL_LINE_BYTES: usize = 512;

/// Python packages the symbolic trainer imports
const TRAINER_IMPORTS: &str = "import torch, datasets; print('OK')";

/// Result of a single trainer invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchStatus {
    pub exit: StageExit,
    /// Last lines the trainer wrote to stderr
    pub stderr_tail: Vec<String>,
}

impl LaunchStatus {
    pub fn success(&self) -> bool {
        self.exit.success()
    }
}

/// Runs the external trainer for one stage
///
/// Implementations must not return before the trainer has exited.
#[async_trait]
pub trait TrainerLauncher: Send + Sync {
    /// Run `stage` with `args` to completion
    async fn launch(&self, stage: &Stage, args: &[OsString]) -> Result<LaunchStatus, StageError>;

    /// Shell-style command line for `args` (dry runs and logs)
    fn command_line(&self, args: &[OsString]) -> String;

    /// Where a path passed to the trainer resolves from the runner's point of view
    fn resolve_path(&self, path: &Path) -> PathBuf {
        path.to_path_buf()
    }
}

/// Launches `<python> <script> <args...>`
#[derive(Debug, Clone)]
pub struct PythonLauncher {
    python: PathBuf,
    script: PathBuf,
    workdir: Option<PathBuf>,
    stderr_tail_lines: usize,
}

impl PythonLauncher {
    pub fn new(python: impl Into<PathBuf>, script: impl Into<PathBuf>) -> Self {
        Self {
            python: python.into(),
            script: script.into(),
            workdir: None,
            stderr_tail_lines: DEFAULT_STDERR_TAIL_LINES,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            python: config.python.clone(),
            script: config.script.clone(),
            workdir: config.workdir.clone(),
            stderr_tail_lines: config.stderr_tail_lines,
        }
    }

    /// Run the trainer from `dir` instead of the current directory
    pub fn with_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    pub fn with_stderr_tail_lines(mut self, lines: usize) -> Self {
        self.stderr_tail_lines = lines;
        self
    }

    pub fn python(&self) -> &Path {
        &self.python
    }

    /// Script path as the trainer's working directory sees it
    pub fn resolved_script(&self) -> PathBuf {
        self.resolve_path(&self.script)
    }

    /// Check if the trainer's Python dependencies are installed
    pub async fn check_dependencies(&self) -> Result<bool> {
        let mut cmd = Command::new(&self.python);
        cmd.arg("-c").arg(TRAINER_IMPORTS);
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }

        let output = cmd
            .output()
            .await
            .with_context(|| format!("Failed to execute {}", self.python.display()))?;

        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            Ok(stdout.trim() == "OK")
        } else {
            tracing::debug!(
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "Dependency import check failed"
            );
            Ok(false)
        }
    }

    fn build_command(&self, args: &[OsString]) -> Command {
        let mut cmd = Command::new(&self.python);
        cmd.arg(&self.script)
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }

        cmd
    }
}

#[async_trait]
impl TrainerLauncher for PythonLauncher {
    async fn launch(&self, stage: &Stage, args: &[OsString]) -> Result<LaunchStatus, StageError> {
        let number = stage.number;
        let mut child = self
            .build_command(args)
            .spawn()
            .map_err(|source| StageError::Spawn {
                stage: number,
                program: self.python.display().to_string(),
                source,
            })?;

        tracing::debug!(stage = number, pid = ?child.id(), "Trainer subprocess spawned");

        let stderr_tail = match child.stderr.take() {
            Some(stderr) => {
                drain_stderr(number, stderr, tokio::io::stderr(), self.stderr_tail_lines).await
            }
            None => Vec::new(),
        };

        let status = child
            .wait()
            .await
            .map_err(|source| StageError::Io { stage: number, source })?;

        Ok(LaunchStatus {
            exit: status.into(),
            stderr_tail,
        })
    }

    fn command_line(&self, args: &[OsString]) -> String {
        std::iter::once(self.python.as_os_str())
            .chain(std::iter::once(self.script.as_os_str()))
            .chain(args.iter().map(|a| a.as_os_str()))
            .map(|part| shell_quote(&part.to_string_lossy()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        match &self.workdir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }
}

/// Last lines of a byte stream, split on `\n` and `\r`
///
/// Progress bars redraw with bare `\r`, so each redraw counts as a line.
/// Lines longer than [`MAX_TAIL_LINE_BYTES`] are cut and marked with `…`.
#[derive(Debug)]
pub struct StderrTail {
    capacity: usize,
    lines: VecDeque<String>,
    current: Vec<u8>,
    truncated: bool,
}

impl StderrTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            lines: VecDeque::with_capacity(capacity),
            current: Vec::new(),
            truncated: false,
        }
    }

    /// Feed the next chunk; lines may span chunks
    pub fn push(&mut self, chunk: &[u8]) {
        if self.capacity == 0 {
            return;
        }
        for &byte in chunk {
            match byte {
                b'\n' | b'\r' => self.end_line(),
                _ if self.current.len() < MAX_TAIL_LINE_BYTES => self.current.push(byte),
                _ => self.truncated = true,
            }
        }
    }

    fn end_line(&mut self) {
        if self.current.is_empty() {
            return;
        }
        let mut line = String::from_utf8_lossy(&self.current).into_owned();
        if self.truncated {
            line.push('…');
        }
        self.current.clear();
        self.truncated = false;

        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    /// Retained lines, including an unterminated last line
    pub fn finish(mut self) -> Vec<String> {
        self.end_line();
        self.lines.into_iter().collect()
    }
}

/// Copy `reader` to `echo` as it arrives and return its tail
///
/// A failing echo (closed terminal, broken pipe) stops echoing but the
/// stream is still drained so the trainer never blocks on a full pipe.
async fn drain_stderr<R, W>(stage: usize, mut reader: R, mut echo: W, tail_lines: usize) -> Vec<String>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut tail = StderrTail::new(tail_lines);
    let mut buf = [0u8; 8192];
    let mut echoing = true;

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!(stage, error = %e, "Lost trainer stderr");
                break;
            }
        };
        let chunk = &buf[..n];

        if echoing {
            let echoed = match echo.write_all(chunk).await {
                Ok(()) => echo.flush().await,
                Err(e) => Err(e),
            };
            if let Err(e) = echoed {
                tracing::warn!(stage, error = %e, "Cannot echo trainer stderr, keeping tail only");
                echoing = false;
            }
        }

        tail.push(chunk);
    }

    tail.finish()
}

/// Quote a word for display in a POSIX shell
fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}
