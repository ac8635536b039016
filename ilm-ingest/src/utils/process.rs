//! External process runner
//!
//! Executes an external binary with arguments, an optional timeout and a
//! bound on captured output. Every pipeline stage that shells out (downloader,
//! transcoder, tempo tool) goes through the `CommandRunner` trait so tests can
//! script the tools.
//!
//! Spawned children are killed when their future is dropped or their timeout
//! fires; they are never left running detached from a caller.

use async_trait::async_trait;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::debug;

/// Default bound on captured stdout/stderr (per stream)
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// External process errors
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Binary could not be started (missing, not executable, ...)
    #[error("{program} could not be started: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Process did not finish within its timeout
    #[error("{program} timed out after {}s", secs(.timeout))]
    Timeout { program: String, timeout: Duration },

    /// Process wrote more than the configured output bound
    #[error("{program} produced more than {limit} bytes of output")]
    OutputLimitExceeded { program: String, limit: usize },

    /// Process exited unsuccessfully
    #[error("{program} exited with code {}: {}", exit_code_label(.code), trimmed(.stderr))]
    NonZeroExit {
        program: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    /// Pipe I/O failed while collecting output
    #[error("I/O error while running {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
}

fn secs(duration: &Duration) -> u64 {
    duration.as_secs()
}

fn exit_code_label(code: &Option<i32>) -> String {
    code.map(|c| c.to_string()).unwrap_or_else(|| "none".to_string())
}

fn trimmed(text: &str) -> &str {
    text.trim()
}

impl ProcessError {
    /// Program name this error refers to
    pub fn program(&self) -> &str {
        match self {
            ProcessError::Spawn { program, .. }
            | ProcessError::Timeout { program, .. }
            | ProcessError::OutputLimitExceeded { program, .. }
            | ProcessError::NonZeroExit { program, .. }
            | ProcessError::Io { program, .. } => program,
        }
    }

    /// The program, if the failure was that it does not exist
    pub fn missing_program(&self) -> Option<&str> {
        match self {
            ProcessError::Spawn { program, source } if source.kind() == io::ErrorKind::NotFound => {
                Some(program)
            }
            _ => None,
        }
    }

    /// Whether retrying the same invocation could succeed
    ///
    /// Timeouts and interrupted spawns are transient. Missing binaries and
    /// non-zero exits are not.
    pub fn is_transient(&self) -> bool {
        match self {
            ProcessError::Timeout { .. } => true,
            ProcessError::Spawn { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }

    /// Case-insensitive search of the error text and any captured output
    pub fn mentions(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        if self.to_string().to_lowercase().contains(&needle) {
            return true;
        }
        match self {
            ProcessError::NonZeroExit { stdout, stderr, .. } => {
                stdout.to_lowercase().contains(&needle) || stderr.to_lowercase().contains(&needle)
            }
            _ => false,
        }
    }
}

/// One invocation of an external program
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub timeout: Option<Duration>,
    pub max_output_bytes: usize,
}

impl ProcessSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: None,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_output_bytes(mut self, limit: usize) -> Self {
        self.max_output_bytes = limit;
        self
    }

    /// Program name for logs and errors (file name only)
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    /// Argument at `index` as lossy UTF-8
    pub fn arg_str(&self, index: usize) -> Option<String> {
        self.args.get(index).map(|a| a.to_string_lossy().to_string())
    }

    /// Last argument as a path (output file for most transcoder invocations)
    pub fn last_arg_path(&self) -> Option<&Path> {
        self.args.last().map(Path::new)
    }

    /// Whether any argument equals `needle`
    pub fn has_arg(&self, needle: &str) -> bool {
        self.args.iter().any(|a| a == needle)
    }
}

/// Captured output of a successful run
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    /// stdout followed by stderr
    pub fn combined(&self) -> String {
        let mut text = String::with_capacity(self.stdout.len() + self.stderr.len() + 1);
        text.push_str(&self.stdout);
        if !self.stdout.is_empty() && !self.stderr.is_empty() && !self.stdout.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&self.stderr);
        text
    }
}

/// Executes external programs
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion; non-zero exit is an error
    async fn run(&self, spec: &ProcessSpec) -> Result<ProcessOutput, ProcessError>;
}

/// `CommandRunner` backed by `tokio::process`
#[derive(Debug, Default, Clone)]
pub struct TokioCommandRunner;

impl TokioCommandRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, spec: &ProcessSpec) -> Result<ProcessOutput, ProcessError> {
        let program = spec.program_name();
        let started = Instant::now();

        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: program.clone(),
                source,
            })?;

        let collected = match spec.timeout {
            Some(limit) => {
                let outcome =
                    tokio::time::timeout(limit, collect(&mut child, spec.max_output_bytes)).await;
                match outcome {
                    Ok(result) => result,
                    Err(_) => {
                        let _ = child.start_kill();
                        return Err(ProcessError::Timeout {
                            program,
                            timeout: limit,
                        });
                    }
                }
            }
            None => collect(&mut child, spec.max_output_bytes).await,
        };

        let collected = collected.map_err(|source| ProcessError::Io {
            program: program.clone(),
            source,
        })?;

        let (status, stdout, stderr) = match collected {
            Collected::Finished { status, stdout, stderr } => (status, stdout, stderr),
            Collected::Overflow => {
                let _ = child.start_kill();
                return Err(ProcessError::OutputLimitExceeded {
                    program,
                    limit: spec.max_output_bytes,
                });
            }
        };

        debug!(
            program = %program,
            code = ?status.code(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            stdout_bytes = stdout.len(),
            stderr_bytes = stderr.len(),
            "Process finished"
        );

        let stdout = String::from_utf8_lossy(&stdout).to_string();
        let stderr = String::from_utf8_lossy(&stderr).to_string();

        if !status.success() {
            return Err(ProcessError::NonZeroExit {
                program,
                code: status.code(),
                stdout,
                stderr,
            });
        }

        Ok(ProcessOutput { stdout, stderr })
    }
}

enum Collected {
    Finished {
        status: ExitStatus,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },
    Overflow,
}

/// Drain both pipes concurrently, then wait for exit
///
/// Stops reading as soon as either stream exceeds `limit`.
async fn collect(child: &mut Child, limit: usize) -> io::Result<Collected> {
    let stdout_fut = read_bounded(child.stdout.take(), limit);
    let stderr_fut = read_bounded(child.stderr.take(), limit);
    tokio::pin!(stdout_fut, stderr_fut);

    let mut stdout = None;
    let mut stderr = None;

    while stdout.is_none() || stderr.is_none() {
        tokio::select! {
            read = &mut stdout_fut, if stdout.is_none() => match read? {
                Some(bytes) => stdout = Some(bytes),
                None => return Ok(Collected::Overflow),
            },
            read = &mut stderr_fut, if stderr.is_none() => match read? {
                Some(bytes) => stderr = Some(bytes),
                None => return Ok(Collected::Overflow),
            },
        }
    }

    let status = child.wait().await?;
    Ok(Collected::Finished {
        status,
        stdout: stdout.unwrap_or_default(),
        stderr: stderr.unwrap_or_default(),
    })
}

/// Read up to `limit` bytes; `None` if the stream has more
async fn read_bounded<R>(reader: Option<R>, limit: usize) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return Ok(Some(Vec::new()));
    };

    let mut buf = Vec::new();
    let mut limited = reader.take(limit as u64 + 1);
    limited.read_to_end(&mut buf).await?;

    if buf.len() > limit {
        Ok(None)
    } else {
        Ok(Some(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_builder() {
        let spec = ProcessSpec::new("/usr/bin/ffmpeg")
            .args(["-i", "in.mp3"])
            .arg("out.wav")
            .timeout(Duration::from_secs(60))
            .max_output_bytes(1024);

        assert_eq!(spec.program_name(), "ffmpeg");
        assert_eq!(spec.arg_str(0).as_deref(), Some("-i"));
        assert_eq!(spec.last_arg_path(), Some(Path::new("out.wav")));
        assert!(spec.has_arg("in.mp3"));
        assert_eq!(spec.timeout, Some(Duration::from_secs(60)));
        assert_eq!(spec.max_output_bytes, 1024);
    }

    #[test]
    fn test_combined_output_order() {
        let output = ProcessOutput {
            stdout: "120.00".to_string(),
            stderr: "done".to_string(),
        };
        assert_eq!(output.combined(), "120.00\ndone");
    }

    #[test]
    fn test_error_classification() {
        let missing = ProcessError::Spawn {
            program: "aubio".to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "missing"),
        };
        assert_eq!(missing.missing_program(), Some("aubio"));
        assert!(!missing.is_transient());

        let timeout = ProcessError::Timeout {
            program: "aubio".to_string(),
            timeout: Duration::from_secs(120),
        };
        assert!(timeout.is_transient());
        assert!(timeout.to_string().contains("120s"));
    }

    #[test]
    fn test_mentions_searches_stderr() {
        let err = ProcessError::NonZeroExit {
            program: "yt-dlp".to_string(),
            code: Some(1),
            stdout: String::new(),
            stderr: "ERROR: ffprobe/avprobe and ffmpeg/avconv not found".to_string(),
        };
        assert!(err.mentions("FFMPEG"));
        assert!(!err.mentions("aubio"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_captures_stdout() {
        let runner = TokioCommandRunner::new();
        let spec = ProcessSpec::new("sh").args(["-c", "echo 120.00; echo warn >&2"]);

        let output = runner.run(&spec).await.unwrap();
        assert_eq!(output.stdout.trim(), "120.00");
        assert_eq!(output.stderr.trim(), "warn");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_nonzero_exit() {
        let runner = TokioCommandRunner::new();
        let spec = ProcessSpec::new("sh").args(["-c", "echo boom >&2; exit 3"]);

        match runner.run(&spec).await {
            Err(ProcessError::NonZeroExit { code, stderr, .. }) => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr.trim(), "boom");
            }
            other => panic!("expected NonZeroExit, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_timeout() {
        let runner = TokioCommandRunner::new();
        let spec = ProcessSpec::new("sh")
            .args(["-c", "sleep 5"])
            .timeout(Duration::from_millis(100));

        let result = runner.run(&spec).await;
        assert!(matches!(result, Err(ProcessError::Timeout { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_output_bound() {
        let runner = TokioCommandRunner::new();
        let spec = ProcessSpec::new("sh")
            .args(["-c", "yes | head -c 5000"])
            .max_output_bytes(100);

        let result = runner.run(&spec).await;
        assert!(matches!(result, Err(ProcessError::OutputLimitExceeded { limit: 100, .. })));
    }

    #[tokio::test]
    async fn test_run_missing_binary() {
        let runner = TokioCommandRunner::new();
        let spec = ProcessSpec::new("/nonexistent/ilm-tool");

        let err = runner.run(&spec).await.unwrap_err();
        assert_eq!(err.missing_program(), Some("ilm-tool"));
    }
}
