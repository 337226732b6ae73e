//! Bridge-subprocess browser driver.
//!
//! Speaks a line protocol with an external bridge process (typically a
//! small Node script wrapping a headless browser): one JSON action per
//! line on stdin, one JSON reply per line on stdout. The bridge owns the
//! browser; this driver owns sequencing, timeouts, and evidence
//! accumulation.

use crate::diagnostics::action::BrowserAction;
use crate::diagnostics::capture::{
    BrowserDriver, ConsoleMessage, DiagnosticCapture, NetworkRequest,
};
use crate::util::truncate_chars;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;

pub const DEFAULT_ACTION_TIMEOUT_SECS: u64 = 30;

/// One reply line from the bridge.
#[derive(Debug, Deserialize)]
struct BridgeReply {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    console: Vec<ConsoleMessage>,
    #[serde(default)]
    network: Vec<NetworkRequest>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    screenshot: Option<String>,
}

/// [`BrowserDriver`] backed by a bridge subprocess.
pub struct BridgeDriver {
    command: String,
    action_timeout: Duration,
    error_screenshot: bool,
}

impl BridgeDriver {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            action_timeout: Duration::from_secs(DEFAULT_ACTION_TIMEOUT_SECS),
            error_screenshot: true,
        }
    }

    pub fn with_action_timeout_secs(mut self, secs: u64) -> Self {
        self.action_timeout = Duration::from_secs(secs);
        self
    }

    /// Whether a failing sequence ends with a best-effort screenshot.
    pub fn with_error_screenshot(mut self, enabled: bool) -> Self {
        self.error_screenshot = enabled;
        self
    }

    async fn send_action(
        &self,
        stdin: &mut tokio::process::ChildStdin,
        lines: &mut tokio::io::Lines<BufReader<tokio::process::ChildStdout>>,
        action: &BrowserAction,
    ) -> Result<BridgeReply, String> {
        let request = serde_json::to_string(action)
            .map_err(|e| format!("failed to encode action: {}", e))?;
        stdin
            .write_all(request.as_bytes())
            .await
            .map_err(|e| format!("failed to write to bridge: {}", e))?;
        stdin
            .write_all(b"\n")
            .await
            .map_err(|e| format!("failed to write to bridge: {}", e))?;
        stdin
            .flush()
            .await
            .map_err(|e| format!("failed to flush bridge stdin: {}", e))?;

        let line = match timeout(self.action_timeout, lines.next_line()).await {
            Ok(Ok(Some(line))) => line,
            Ok(Ok(None)) => return Err("bridge closed its stdout".to_string()),
            Ok(Err(e)) => return Err(format!("failed reading bridge reply: {}", e)),
            Err(_) => {
                return Err(format!(
                    "bridge did not reply within {}s",
                    self.action_timeout.as_secs()
                ));
            }
        };

        serde_json::from_str(&line)
            .map_err(|_| format!("bridge reply was not valid JSON: {}", truncate_chars(&line, 120)))
    }
}

#[async_trait]
impl BrowserDriver for BridgeDriver {
    async fn run(
        &self,
        url: &str,
        actions: &[BrowserAction],
        screenshot_dir: &Path,
    ) -> DiagnosticCapture {
        let started = Instant::now();
        let mut capture = DiagnosticCapture::passed();

        let mut child = match Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                let mut failed =
                    DiagnosticCapture::failed(&format!("failed to spawn bridge: {}", e));
                failed.duration_ms = started.elapsed().as_millis() as u64;
                return failed;
            }
        };

        let (Some(mut stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill().await;
            return DiagnosticCapture::failed("bridge pipes unavailable");
        };
        let mut lines = BufReader::new(stdout).lines();

        // The bridge starts on about:blank; open the target first unless
        // the sequence already begins with its own navigation.
        let mut sequence: Vec<BrowserAction> = Vec::with_capacity(actions.len() + 1);
        if !matches!(actions.first(), Some(BrowserAction::Navigate { .. })) {
            sequence.push(BrowserAction::Navigate {
                url: url.to_string(),
            });
        }
        for action in actions {
            // Screenshots land in the run's artifact area, not wherever
            // the bridge process happens to run.
            if let BrowserAction::Screenshot { filename } = action {
                sequence.push(BrowserAction::Screenshot {
                    filename: screenshot_dir.join(filename).to_string_lossy().into_owned(),
                });
            } else {
                sequence.push(action.clone());
            }
        }

        for action in &sequence {
            tracing::debug!(action = %action, "bridge action");
            match self.send_action(&mut stdin, &mut lines, action).await {
                Ok(reply) => {
                    for message in reply.console {
                        capture.record_console(message);
                    }
                    capture.network.extend(reply.network);
                    if let Some(path) = reply.screenshot {
                        capture.screenshots.push(path.into());
                    }
                    if let Some(current) = reply.url {
                        capture.final_url = Some(current);
                    }
                    if !reply.ok {
                        let error = reply
                            .error
                            .unwrap_or_else(|| format!("action failed: {}", action));
                        tracing::debug!(action = %action, error = %error, "bridge action failed");
                        capture.success = false;
                        capture.error = Some(error);
                        break;
                    }
                }
                Err(error) => {
                    capture.success = false;
                    capture.error = Some(error);
                    break;
                }
            }
        }

        if !capture.success && self.error_screenshot {
            let filename = screenshot_dir
                .join(format!("error-{}.png", chrono::Utc::now().timestamp_millis()))
                .to_string_lossy()
                .into_owned();
            // Best effort; the bridge may already be gone.
            if let Ok(reply) = self
                .send_action(
                    &mut stdin,
                    &mut lines,
                    &BrowserAction::Screenshot { filename },
                )
                .await
                && let Some(path) = reply.screenshot
            {
                capture.screenshots.push(path.into());
            }
        }

        let _ = child.kill().await;
        capture.duration_ms = started.elapsed().as_millis() as u64;
        capture
    }
}
