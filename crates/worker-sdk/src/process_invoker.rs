use crate::trace::TraceWriter;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

/// Which pipe a line of output was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One line of child-process output.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub stream: OutputStream,
    pub data: String,
}

/// Everything needed to start a child process.
#[derive(Debug, Clone, Default)]
pub struct ProcessStartInfo {
    /// Executable to run.
    pub file_name: String,
    /// Arguments passed verbatim (no shell splitting).
    pub arguments: Vec<String>,
    /// Working directory; the parent's directory is used when `None`.
    pub working_directory: Option<PathBuf>,
    /// Variables added on top of the inherited environment.
    pub environment: HashMap<String, String>,
    /// Written to the child's stdin followed by a newline, then stdin is closed.
    pub stdin: Option<String>,
}

impl ProcessStartInfo {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.arguments.push(arg.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn stdin(mut self, payload: impl Into<String>) -> Self {
        self.stdin = Some(payload.into());
        self
    }
}

/// Spawns a child process and streams stdout/stderr line by line to a channel.
pub struct ProcessInvoker {
    trace: Arc<dyn TraceWriter>,
}

impl ProcessInvoker {
    pub fn new(trace: Arc<dyn TraceWriter>) -> Self {
        Self { trace }
    }

    /// Run the process described by `start` to completion.
    ///
    /// Every output line is sent to `output`; the sender (and all clones held by
    /// the reader tasks) is dropped before this returns, so a consumer looping
    /// on the receiver terminates once the process is done.
    ///
    /// Returns the exit code (`-1` when the process was killed by a signal).
    pub async fn execute(
        &self,
        start: ProcessStartInfo,
        output: mpsc::UnboundedSender<ProcessOutput>,
    ) -> Result<i32> {
        anyhow::ensure!(!start.file_name.is_empty(), "file_name must not be empty");

        let arguments = start.arguments.join(" ");
        self.trace.info("Starting process:");
        self.trace.info(&format!("  File name: '{}'", start.file_name));
        self.trace.info(&format!("  Arguments: '{arguments}'"));
        if let Some(ref dir) = start.working_directory {
            self.trace
                .info(&format!("  Working directory: '{}'", dir.display()));
        }

        let mut cmd = Command::new(&start.file_name);
        cmd.args(&start.arguments);
        if let Some(ref dir) = start.working_directory {
            cmd.current_dir(dir);
        }
        cmd.envs(&start.environment);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.stdin(if start.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let started = std::time::Instant::now();
        let mut child = cmd.spawn().with_context(|| {
            format!(
                "Failed to start process '{}' with arguments '{arguments}'",
                start.file_name
            )
        })?;

        let pid = child.id().unwrap_or(0);
        self.trace
            .info(&format!("Process started with process id {pid}, waiting for process exit."));

        let stdout_task = spawn_reader(
            child.stdout.take(),
            OutputStream::Stdout,
            output.clone(),
            self.trace.clone(),
        );
        let stderr_task = spawn_reader(
            child.stderr.take(),
            OutputStream::Stderr,
            output,
            self.trace.clone(),
        );

        if let Some(payload) = start.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                // A child that never reads stdin may close it early; that is not our failure.
                if let Err(e) = stdin.write_all(payload.as_bytes()).await {
                    self.trace.verbose(&format!("Writing stdin failed: {e}"));
                } else {
                    let _ = stdin.write_all(b"\n").await;
                }
            }
        }

        let status = child.wait().await.context("Failed to wait for process");

        let _ = stdout_task.await;
        let _ = stderr_task.await;

        let exit_code = status?.code().unwrap_or(-1);
        let elapsed = started.elapsed();
        self.trace.info(&format!(
            "Finished process {pid} with exit code {exit_code}, and elapsed time {elapsed:.2?}."
        ));

        Ok(exit_code)
    }
}

/// Strip the line terminator (`\n` or `\r\n`) and decode, replacing invalid UTF-8.
fn decode_line(buf: &[u8]) -> (String, bool) {
    let line = buf.strip_suffix(b"\n").unwrap_or(buf);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    match std::str::from_utf8(line) {
        Ok(text) => (text.to_string(), true),
        Err(_) => (String::from_utf8_lossy(line).into_owned(), false),
    }
}

/// Forward every line of `pipe` until EOF. The pipe is always drained so
/// the child never blocks on a full pipe.
fn spawn_reader<R>(
    pipe: Option<R>,
    stream: OutputStream,
    output: mpsc::UnboundedSender<ProcessOutput>,
    trace: Arc<dyn TraceWriter>,
) -> tokio::task::JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(pipe) = pipe else {
            return;
        };
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        let mut reported = false;
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let (data, valid) = decode_line(&buf);
                    if !valid && !reported {
                        trace.verbose(&format!(
                            "{stream:?} contains invalid UTF-8, replacing undecodable bytes"
                        ));
                        reported = true;
                    }
                    let _ = output.send(ProcessOutput { stream, data });
                }
                Err(e) => {
                    trace.error(&format!("Reading {stream:?} failed: {e}"));
                    break;
                }
            }
        }
    })
}
