//! Spawning external conversion binaries.

use std::collections::VecDeque;
use std::io;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, trace, warn};

use crate::error::ToolError;
use crate::types::Tool;

/// How many trailing stderr lines are kept for the failure message.
const STDERR_TAIL_LINES: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Kills a tool's whole process group on drop, so helpers it forked (LibreOffice
/// runs `soffice.bin` under `soffice`) do not outlive it.
struct GroupKill {
    pgid: Option<i32>,
}

impl GroupKill {
    fn new(pid: Option<u32>) -> Self {
        Self {
            pgid: pid.and_then(|pid| i32::try_from(pid).ok()),
        }
    }

    fn kill(&mut self) {
        #[cfg(unix)]
        if let Some(pgid) = self.pgid.take() {
            // SAFETY: killpg only sends a signal; an empty group yields ESRCH.
            unsafe {
                libc::killpg(pgid, libc::SIGKILL);
            }
        }
    }

    /// The leader exited and was reaped; its id may be reused.
    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for GroupKill {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Run `command` to completion, feeding every output line to `on_line`.
///
/// The tool runs in its own process group. The group is killed when `limit`
/// elapses or when the returned future is dropped (job cancellation aborts
/// the task driving it). A non-zero exit becomes
/// [`ToolError::ProcessFailed`] carrying the last stderr lines.
pub async fn run_tool<F>(
    tool: Tool,
    mut command: Command,
    limit: Duration,
    mut on_line: F,
) -> Result<(), ToolError>
where
    F: FnMut(Stream, &str) + Send,
{
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    debug!(%tool, command = ?command.as_std(), "spawning tool");

    let mut child = command.spawn().map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            ToolError::ToolUnavailable { tool, source: e }
        } else {
            ToolError::Io(e)
        }
    })?;
    let mut group = GroupKill::new(child.id());

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("stdout not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::other("stderr not captured"))?;

    let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);

    let drive = async {
        let mut out_lines = BufReader::new(stdout).lines();
        let mut err_lines = BufReader::new(stderr).lines();
        let (mut out_open, mut err_open) = (true, true);

        while out_open || err_open {
            tokio::select! {
                line = out_lines.next_line(), if out_open => match line? {
                    Some(line) => on_line(Stream::Stdout, &line),
                    None => out_open = false,
                },
                line = err_lines.next_line(), if err_open => match line? {
                    Some(line) => {
                        trace!(%tool, line = %line, "tool stderr");
                        on_line(Stream::Stderr, &line);
                        if tail.len() == STDERR_TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    }
                    None => err_open = false,
                },
            }
        }
        child.wait().await
    };

    let status = match tokio::time::timeout(limit, drive).await {
        Ok(status) => {
            group.disarm();
            status?
        }
        Err(_) => {
            warn!(%tool, limit_secs = limit.as_secs(), "tool timed out; killing");
            group.kill();
            if let Err(e) = child.kill().await {
                warn!(%tool, error = %e, "failed to kill timed-out tool");
            }
            return Err(ToolError::Timeout {
                tool,
                secs: limit.as_secs(),
            });
        }
    };

    if status.success() {
        debug!(%tool, "tool finished");
        Ok(())
    } else {
        let stderr = tail.into_iter().collect::<Vec<_>>().join("\n");
        Err(ToolError::ProcessFailed {
            tool,
            code: status.code(),
            stderr,
        })
    }
}
