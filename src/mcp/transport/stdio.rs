// ABOUTME: Stdio transport - runs the upstream as a child process speaking line-delimited JSON-RPC.
// ABOUTME: Stdout feeds the pending-reply table; stderr is forwarded to tracing under the upstream name.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Transport;
use super::pending::PendingReplies;
use crate::error::McpError;
use crate::mcp::{McpNotification, McpRequest, McpResponse};

/// How long a child gets to exit after its stdin closes before it is killed.
const EXIT_GRACE: Duration = Duration::from_millis(500);

pub struct StdioTransport {
    upstream: String,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    pending: Arc<PendingReplies>,
    readers: CancellationToken,
    timeout: Duration,
}

impl StdioTransport {
    /// Spawn `command` and start reading its output.
    pub async fn connect(
        upstream: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<Self, McpError> {
        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| McpError::Connection(format!("failed to spawn {}: {}", command, e)))?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(McpError::Connection(format!(
                "{} started without piped stdio",
                command
            )));
        };
        info!(upstream = %upstream, command = %command, pid = ?child.id(), "Spawned upstream process");

        let pending = Arc::new(PendingReplies::new());
        let readers = CancellationToken::new();
        tokio::spawn(read_replies(
            upstream.to_string(),
            stdout,
            pending.clone(),
            readers.clone(),
        ));
        tokio::spawn(forward_stderr(upstream.to_string(), stderr, readers.clone()));

        Ok(Self {
            upstream: upstream.to_string(),
            child: Mutex::new(Some(child)),
            stdin: Mutex::new(Some(stdin)),
            pending,
            readers,
            timeout,
        })
    }

    async fn write_line(&self, line: String) -> Result<(), McpError> {
        let mut stdin = self.stdin.lock().await;
        let stdin = stdin
            .as_mut()
            .ok_or_else(|| McpError::Connection(format!("{} has been shut down", self.upstream)))?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }
}

async fn read_replies(
    upstream: String,
    stdout: impl AsyncRead + Unpin,
    pending: Arc<PendingReplies>,
    cancel: CancellationToken,
) {
    let mut reader = BufReader::new(stdout);
    let mut line = Vec::new();
    loop {
        line.clear();
        tokio::select! {
            _ = cancel.cancelled() => break,
            read = reader.read_until(b'\n', &mut line) => match read {
                Ok(0) => {
                    warn!(upstream = %upstream, "Upstream process closed stdout");
                    break;
                }
                Ok(_) => match std::str::from_utf8(&line) {
                    Ok(text) if text.trim().is_empty() => {}
                    Ok(text) => pending.deliver(&upstream, text.trim_end()),
                    Err(e) => {
                        warn!(upstream = %upstream, error = %e, "Skipping non-UTF-8 line on upstream stdout")
                    }
                },
                Err(e) => {
                    warn!(upstream = %upstream, error = %e, "Failed reading upstream stdout");
                    break;
                }
            },
        }
    }
    pending.close();
}

async fn forward_stderr(upstream: String, stderr: impl AsyncRead + Unpin, cancel: CancellationToken) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = lines.next_line() => match next {
                Ok(Some(line)) => debug!(upstream = %upstream, line = %line, "Upstream stderr"),
                _ => break,
            },
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&self, request: McpRequest) -> Result<McpResponse, McpError> {
        let id = request.id;
        let line = serde_json::to_string(&request)?;
        let rx = self.pending.register(id)?;
        if let Err(e) = self.write_line(line).await {
            self.pending.forget(id);
            return Err(e);
        }
        self.pending.wait(id, rx, self.timeout).await
    }

    async fn notify(&self, notification: McpNotification) -> Result<(), McpError> {
        self.write_line(serde_json::to_string(&notification)?).await
    }

    /// Close stdin, give the child a moment to exit, then kill it.
    async fn shutdown(&self) -> Result<(), McpError> {
        self.stdin.lock().await.take();
        self.readers.cancel();
        self.pending.close();

        if let Some(mut child) = self.child.lock().await.take() {
            match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
                Ok(Ok(status)) => debug!(upstream = %self.upstream, status = %status, "Upstream process exited"),
                _ => {
                    warn!(upstream = %self.upstream, "Upstream process did not exit, killing it");
                    let _ = child.kill().await;
                }
            }
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.pending.is_closed()
    }
}
