//! Streaming subprocess execution for stage tools.
//!
//! Unlike a run-to-completion executor, [`run_streaming`] forwards every
//! line the child writes (stdout and stderr) while it is still running, so
//! the worker can turn progress output into job updates as it appears.
//! Lines are split on both `\n` and `\r` so carriage-return progress bars
//! arrive one redraw at a time.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;

/// Number of trailing stderr lines kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// Read buffer size per stream.
const READ_CHUNK_BYTES: usize = 8 * 1024;

/// A fully resolved tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub working_dir: Option<PathBuf>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            working_dir: None,
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

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One line of child output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub text: String,
}

/// How the child finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolExit {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stderr_tail: String,
}

impl ToolExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Spawn `command` and stream its output into `lines` until it exits.
///
/// `lines` is dropped when both output streams are exhausted, which ends
/// the consumer's receive loop. Spawn failures are returned before any
/// line is sent.
pub async fn run_streaming(
    command: &ToolCommand,
    lines: mpsc::UnboundedSender<OutputLine>,
) -> Result<ToolExit, std::io::Error> {
    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    for (key, value) in &command.env {
        cmd.env(key, value);
    }
    if let Some(dir) = &command.working_dir {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn()?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let stdout_lines = lines.clone();
    let stdout_task = tokio::spawn(async move {
        read_lines(stdout, OutputStream::Stdout, stdout_lines).await
    });
    let stderr_task = tokio::spawn(async move {
        read_lines(stderr, OutputStream::Stderr, lines).await
    });

    let status = child.wait().await?;

    let _ = stdout_task.await;
    let stderr_tail = stderr_task.await.unwrap_or_default();

    Ok(ToolExit {
        code: status.code(),
        stderr_tail,
    })
}

/// Forward every line of `handle` and return the last
/// [`STDERR_TAIL_LINES`] of it joined by newlines.
async fn read_lines<R: AsyncRead + Unpin>(
    handle: Option<R>,
    stream: OutputStream,
    lines: mpsc::UnboundedSender<OutputLine>,
) -> String {
    let Some(mut handle) = handle else {
        return String::new();
    };

    let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut pending: Vec<u8> = Vec::new();
    let mut buf = vec![0u8; READ_CHUNK_BYTES];

    let mut emit = |bytes: &mut Vec<u8>| {
        if bytes.is_empty() {
            return;
        }
        let text = String::from_utf8_lossy(bytes).trim_end().to_string();
        bytes.clear();
        if text.is_empty() {
            return;
        }
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(text.clone());
        // The receiver going away only means nobody is watching progress.
        let _ = lines.send(OutputLine { stream, text });
    };

    loop {
        match handle.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                for &byte in &buf[..n] {
                    if byte == b'\n' || byte == b'\r' {
                        emit(&mut pending);
                    } else {
                        pending.push(byte);
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, ?stream, "Failed to read tool output");
                break;
            }
        }
    }
    emit(&mut pending);

    Vec::from(tail).join("\n")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
