//! Bounded execution of external tools.
//!
//! Every tool runs with stdin closed, stdout read line by line as it is
//! produced, a wall-clock timeout and a cancellation token. The child is
//! killed when either fires.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::{ToolError, ToolResult};

const STDERR_TAIL_LINES: usize = 20;

/// Reject program paths containing shell metacharacters.
pub fn validate_program(program: &str) -> ToolResult<()> {
    let dangerous_chars = [';', '|', '&', '$', '`', '(', ')', '<', '>', '\n', '\r'];
    if program.is_empty() || program.chars().any(|c| dangerous_chars.contains(&c)) {
        return Err(ToolError::InvalidInput(format!(
            "program path contains dangerous characters: {}",
            program.escape_debug()
        )));
    }
    Ok(())
}

/// Resolve `program` the way the OS would: a path is checked directly, a bare
/// name is searched on `PATH`.
pub fn locate_program(program: &str) -> Option<PathBuf> {
    if program.contains('/') {
        let path = PathBuf::from(program);
        return path.is_file().then_some(path);
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout_lines: Vec<String>,
    /// Last lines of stderr, for error reporting
    pub stderr_tail: String,
}

impl ToolOutput {
    pub fn stdout(&self) -> String {
        self.stdout_lines.join("\n")
    }
}

#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: String,
    args: Vec<OsString>,
    timeout: Duration,
}

enum Outcome {
    Finished(std::io::Result<(Vec<String>, String, std::process::ExitStatus)>),
    TimedOut,
    Cancelled,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>, timeout: Duration) -> ToolResult<Self> {
        let program = program.into();
        validate_program(&program)?;
        Ok(Self {
            program,
            args: Vec::new(),
            timeout,
        })
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.as_os_str().to_os_string())
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    fn tool_name(&self) -> String {
        Path::new(&self.program)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.clone())
    }

    /// Run to completion. A non-zero exit is an error carrying the stderr tail.
    #[tracing::instrument(skip(self, cancel), fields(process.executable.name = %self.tool_name()))]
    pub async fn run(self, cancel: &CancellationToken) -> ToolResult<ToolOutput> {
        let tool = self.tool_name();
        let start = std::time::Instant::now();

        if cancel.is_cancelled() {
            return Err(ToolError::Cancelled { tool });
        }

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => ToolError::NotInstalled(tool.clone()),
                _ => ToolError::Io(e),
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ToolError::InvalidInput("stdout not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ToolError::InvalidInput("stderr not captured".into()))?;

        let read_stdout = async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut collected = Vec::new();
            while let Some(line) = lines.next_line().await? {
                collected.push(line);
            }
            Ok::<_, std::io::Error>(collected)
        };
        let read_stderr = async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            while let Some(line) = lines.next_line().await? {
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Ok::<_, std::io::Error>(Vec::from(tail).join("\n"))
        };

        let outcome = tokio::select! {
            res = async { tokio::try_join!(read_stdout, read_stderr, child.wait()) } => Outcome::Finished(res),
            _ = tokio::time::sleep(self.timeout) => Outcome::TimedOut,
            _ = cancel.cancelled() => Outcome::Cancelled,
        };

        let (stdout_lines, stderr_tail, status) = match outcome {
            Outcome::Finished(res) => res?,
            Outcome::TimedOut => {
                let _ = child.kill().await;
                tracing::warn!(timeout_secs = self.timeout.as_secs(), "Tool timed out");
                return Err(ToolError::Timeout {
                    tool,
                    timeout: self.timeout,
                });
            }
            Outcome::Cancelled => {
                let _ = child.kill().await;
                tracing::info!("Tool cancelled");
                return Err(ToolError::Cancelled { tool });
            }
        };

        if !status.success() {
            return Err(ToolError::Failed {
                tool,
                status: status.to_string(),
                stderr: stderr_tail,
            });
        }

        tracing::debug!(
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            stdout_lines = stdout_lines.len(),
            "Tool completed"
        );

        Ok(ToolOutput {
            stdout_lines,
            stderr_tail,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_validate_program() {
        assert!(validate_program("/usr/bin/ffmpeg").is_ok());
        assert!(validate_program("ffprobe").is_ok());
        assert!(validate_program("ffmpeg; rm -rf /").is_err());
        assert!(validate_program("$(whoami)").is_err());
        assert!(validate_program("").is_err());
    }

    #[tokio::test]
    async fn test_stdout_lines_collected() {
        let out = ToolCommand::new("sh", Duration::from_secs(5))
            .unwrap()
            .args(["-c", "printf 'one\\ntwo\\n'"])
            .run(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.stdout_lines, vec!["one", "two"]);
        assert_eq!(out.stdout(), "one\ntwo");
    }

    #[tokio::test]
    async fn test_nonzero_exit_reports_stderr() {
        let err = ToolCommand::new("sh", Duration::from_secs(5))
            .unwrap()
            .args(["-c", "echo broken >&2; exit 3"])
            .run(&CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            ToolError::Failed { tool, stderr, .. } => {
                assert_eq!(tool, "sh");
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let err = ToolCommand::new("sleep", Duration::from_millis(100))
            .unwrap()
            .arg("10")
            .run(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_cancellation() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let err = ToolCommand::new("sleep", Duration::from_secs(10))
            .unwrap()
            .arg("10")
            .run(&cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_missing_program() {
        let err = ToolCommand::new("tessera-no-such-tool", Duration::from_secs(1))
            .unwrap()
            .run(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotInstalled(_)));
        assert!(locate_program("tessera-no-such-tool").is_none());
    }
}
