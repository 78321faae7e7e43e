//! External process harness
//!
//! Runs one tool invocation for a stage: spawn, drain stdout and stderr
//! concurrently line by line, and race process exit against cancellation.
//!
//! ```text
//!   stdout reader ──┐
//!                   ├──> mpsc ──> select! { cancel | line | exit } ──> LineSink
//!   stderr reader ──┘
//! ```
//!
//! Lines keep their order per stream; the interleaving of the two streams is
//! whatever order the readers delivered them in. A cancelled run kills the child
//! and reaps it before returning, so the process is gone once
//! [`ProcessError::Cancelled`] is observed.

use crate::runtime::IgnoredLines;
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Cooperative cancellation signal shared between a caller and running stages
#[derive(Debug, Clone)]
pub struct CancellationToken {
    sender: Arc<watch::Sender<bool>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolves once [`CancellationToken::cancel`] has been called.
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel
        let _ = receiver.wait_for(|&cancelled| cancelled).await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// Receives every line that is not ignored, in per-stream order
pub trait LineSink: Send {
    fn on_line(&mut self, stream: StreamKind, line: String);
}

/// Collects lines as-is; handy for tools whose output is parsed afterwards
#[derive(Debug, Default)]
pub struct CollectedLines {
    pub lines: Vec<(StreamKind, String)>,
}

impl LineSink for CollectedLines {
    fn on_line(&mut self, stream: StreamKind, line: String) {
        self.lines.push((stream, line));
    }
}

/// A fully resolved tool invocation
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Set on this child only
    pub env: BTreeMap<String, String>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
            env: BTreeMap::new(),
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

    pub fn env(mut self, env: &BTreeMap<String, String>) -> Self {
        self.env.extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Shell-quoted command line that reproduces this invocation.
    pub fn command_line(&self) -> String {
        let words: Vec<&str> = std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect();
        shlex::try_join(words.iter().copied()).unwrap_or_else(|_| words.join(" "))
    }
}

#[derive(Debug)]
pub enum ProcessError {
    /// The token fired before or while the process ran
    Cancelled,
    /// The program could not be started
    Spawn(io::Error),
    /// Waiting on the running process failed
    Wait(io::Error),
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessError::Cancelled => write!(f, "process was cancelled"),
            ProcessError::Spawn(err) => write!(f, "failed to start process: {}", err),
            ProcessError::Wait(err) => write!(f, "failed to wait for process: {}", err),
        }
    }
}

impl std::error::Error for ProcessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProcessError::Cancelled => None,
            ProcessError::Spawn(err) | ProcessError::Wait(err) => Some(err),
        }
    }
}

/// Run `spec` to completion, feeding every non-ignored output line to `sink`.
pub async fn run_process(
    spec: &ProcessSpec,
    ignored: &IgnoredLines,
    sink: &mut dyn LineSink,
    cancel: &CancellationToken,
) -> Result<ExitStatus, ProcessError> {
    if cancel.is_cancelled() {
        return Err(ProcessError::Cancelled);
    }

    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .current_dir(&spec.working_dir)
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|err| {
        warn!(program = %spec.program, error = %err, "failed to spawn");
        ProcessError::Spawn(err)
    })?;
    info!(command = %spec.command_line(), pid = ?child.id(), "spawned");

    let (sender, mut lines) = mpsc::unbounded_channel();
    let mut readers: Vec<JoinHandle<()>> = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(tokio::spawn(forward_lines(stdout, StreamKind::Stdout, sender.clone())));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(tokio::spawn(forward_lines(stderr, StreamKind::Stderr, sender.clone())));
    }
    drop(sender);

    let mut status = None;
    let mut streams_open = true;

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                if let Err(err) = child.kill().await {
                    warn!(error = %err, "failed to kill cancelled process");
                }
                for reader in &readers {
                    reader.abort();
                }
                warn!(program = %spec.program, "cancelled");
                return Err(ProcessError::Cancelled);
            }

            line = lines.recv(), if streams_open => match line {
                Some((stream, line)) => {
                    if ignored.matches(&line) {
                        debug!(?stream, %line, "ignored");
                    } else {
                        sink.on_line(stream, line);
                    }
                }
                None => streams_open = false,
            },

            exit = child.wait(), if status.is_none() => {
                let exit = exit.map_err(ProcessError::Wait)?;
                debug!(%exit, "process exited");
                status = Some(exit);
            }
        }

        if let (Some(exit), false) = (status, streams_open) {
            info!(program = %spec.program, %exit, "finished");
            return Ok(exit);
        }
    }
}

async fn forward_lines<R>(
    reader: R,
    stream: StreamKind,
    sender: mpsc::UnboundedSender<(StreamKind, String)>,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buffer = Vec::new();
    loop {
        buffer.clear();
        match reader.read_until(b'\n', &mut buffer).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buffer);
                let line = line.trim_end_matches(['\r', '\n']).to_string();
                if sender.send((stream, line)).is_err() {
                    break;
                }
            }
            Err(err) => {
                debug!(?stream, error = %err, "stream read failed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_quotes_arguments() {
        let spec = ProcessSpec::new("java", "/tmp")
            .args(["-jar", "antlr complete.jar"])
            .arg("Expr.g4");
        assert_eq!(spec.command_line(), "java -jar 'antlr complete.jar' Expr.g4");
    }

    #[test]
    fn test_cancellation_token_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_resolves_after_cancel() {
        let token = CancellationToken::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };
        token.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(5), waiter)
            .await
            .expect("cancelled() to resolve")
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_before_spawn_never_starts() {
        let token = CancellationToken::new();
        token.cancel();
        let spec = ProcessSpec::new("definitely-not-a-real-program", ".");
        let mut sink = CollectedLines::default();
        let result = run_process(&spec, &IgnoredLines::default(), &mut sink, &token).await;
        assert!(matches!(result, Err(ProcessError::Cancelled)));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let spec = ProcessSpec::new("definitely-not-a-real-program", ".");
        let mut sink = CollectedLines::default();
        let result = run_process(
            &spec,
            &IgnoredLines::default(),
            &mut sink,
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(ProcessError::Spawn(_))));
    }
}
