//! X11 clipboard provider: read/write via `xclip`.
//!
//! Reads list `TARGETS` first so that non-text clipboards (images,
//! rich content) are snapshotted as bytes instead of being lost. Writes
//! pipe content to `xclip -selection clipboard`, which forks to serve
//! the selection and exits once stdin is consumed.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{ClipboardContent, ClipboardError, ClipboardProvider};

/// Text targets in preference order.
const TEXT_TARGETS: &[&str] = &[
    "UTF8_STRING",
    "text/plain;charset=utf-8",
    "STRING",
    "TEXT",
    "text/plain",
];

/// Targets every owner advertises that carry no content.
const META_TARGETS: &[&str] = &["TARGETS", "TIMESTAMP", "MULTIPLE", "SAVE_TARGETS", "DELETE"];

/// An unresponsive selection owner makes `xclip -o` block forever.
const XCLIP_TIMEOUT: Duration = Duration::from_secs(3);

/// Which target to read for a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target<'a> {
    Text(&'a str),
    Binary(&'a str),
}

/// X11 implementation of `ClipboardProvider` via `xclip`.
#[derive(Default)]
pub struct XclipProvider;

impl XclipProvider {
    pub fn new() -> Self {
        Self
    }

    async fn output(args: &[&str]) -> Result<std::process::Output, ClipboardError> {
        let output = Command::new("xclip")
            .args(["-selection", "clipboard"])
            .args(args)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output();
        bounded(XCLIP_TIMEOUT, output)
            .await?
            .map_err(spawn_error)
    }
}

#[async_trait::async_trait]
impl ClipboardProvider for XclipProvider {
    async fn read(&self) -> Result<ClipboardContent, ClipboardError> {
        let listing = Self::output(&["-o", "-t", "TARGETS"]).await?;
        if !listing.status.success() {
            // No selection owner.
            return Ok(ClipboardContent::Empty);
        }

        let listing = String::from_utf8_lossy(&listing.stdout);
        let targets: Vec<&str> = listing.lines().map(str::trim).collect();

        let Some(target) = pick_target(&targets) else {
            return Ok(ClipboardContent::Empty);
        };

        let name = match target {
            Target::Text(t) | Target::Binary(t) => t,
        };
        let out = Self::output(&["-o", "-t", name]).await?;
        if !out.status.success() {
            return Err(ClipboardError::Denied(format!(
                "xclip -o -t {name} exited with status {}",
                out.status
            )));
        }

        Ok(match target {
            Target::Text(_) => {
                ClipboardContent::Text(String::from_utf8_lossy(&out.stdout).into_owned())
            }
            Target::Binary(format) => ClipboardContent::Binary {
                format: format.to_string(),
                bytes: out.stdout,
            },
        })
    }

    async fn write(&self, content: &ClipboardContent) -> Result<(), ClipboardError> {
        let (target, bytes): (Option<&str>, &[u8]) = match content {
            ClipboardContent::Empty => (None, b"".as_slice()),
            ClipboardContent::Text(t) => (None, t.as_bytes()),
            ClipboardContent::Binary { format, bytes } => (Some(format.as_str()), bytes.as_slice()),
        };

        let mut cmd = Command::new("xclip");
        cmd.args(["-selection", "clipboard"]);
        if let Some(t) = target {
            cmd.args(["-t", t]);
        }

        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        let status = bounded(XCLIP_TIMEOUT, async {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(bytes)
                    .await
                    .map_err(|e| ClipboardError::Denied(format!("failed to write to xclip: {e}")))?;
                // Drop stdin to close the pipe so xclip can finish.
            }
            child
                .wait()
                .await
                .map_err(|e| ClipboardError::Denied(format!("failed to wait for xclip: {e}")))
        })
        .await??;

        if status.success() {
            Ok(())
        } else {
            Err(ClipboardError::Denied(format!(
                "xclip exited with status {status}"
            )))
        }
    }

    fn name(&self) -> &'static str {
        "xclip"
    }
}

/// Run `fut`, giving up after `limit`. Dropping the future kills the
/// child spawned with `kill_on_drop`.
async fn bounded<T>(
    limit: Duration,
    fut: impl std::future::Future<Output = T>,
) -> Result<T, ClipboardError> {
    tokio::time::timeout(limit, fut).await.map_err(|_| {
        ClipboardError::Unavailable(format!(
            "xclip did not respond within {}s",
            limit.as_secs()
        ))
    })
}

fn spawn_error(e: std::io::Error) -> ClipboardError {
    if e.kind() == std::io::ErrorKind::NotFound {
        ClipboardError::Unavailable("xclip not found in PATH".into())
    } else {
        ClipboardError::Unavailable(format!("failed to spawn xclip: {e}"))
    }
}

/// Pick the target to snapshot: a text target if any is offered,
/// otherwise the first MIME-typed target.
fn pick_target<'a>(targets: &[&'a str]) -> Option<Target<'a>> {
    for preferred in TEXT_TARGETS {
        if let Some(t) = targets
            .iter()
            .copied()
            .find(|t| t.eq_ignore_ascii_case(preferred))
        {
            return Some(Target::Text(t));
        }
    }

    targets
        .iter()
        .copied()
        .find(|t| !META_TARGETS.iter().any(|m| m == t) && t.contains('/'))
        .map(Target::Binary)
}
