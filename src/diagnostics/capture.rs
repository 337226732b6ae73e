//! Capture payloads and the browser driver seam.

use crate::diagnostics::action::BrowserAction;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Console message severity as reported by the browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Log,
    Info,
    Warning,
    Error,
}

impl ConsoleLevel {
    pub fn is_error(&self) -> bool {
        matches!(self, ConsoleLevel::Error)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleMessage {
    pub level: ConsoleLevel,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkRequest {
    pub method: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Evidence from one scripted browser session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiagnosticCapture {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub console: Vec<ConsoleMessage>,
    /// Texts of the error-level console messages, in arrival order.
    #[serde(default)]
    pub console_errors: Vec<String>,
    #[serde(default)]
    pub network: Vec<NetworkRequest>,
    #[serde(default)]
    pub screenshots: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

impl DiagnosticCapture {
    pub fn passed() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn failed(error: &str) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            ..Default::default()
        }
    }

    /// Append a console message, keeping the error subset in sync.
    pub fn record_console(&mut self, message: ConsoleMessage) {
        if message.level.is_error() {
            self.console_errors.push(message.text.clone());
        }
        self.console.push(message);
    }

    /// Up to `max` console-error texts for prompt building.
    pub fn error_summaries(&self, max: usize) -> Vec<String> {
        self.console_errors.iter().take(max).cloned().collect()
    }
}

/// Capability seam for driving a browser session.
///
/// Failures never propagate as errors; a broken session comes back as a
/// failed capture with the causing error text. Selected at configuration
/// time: [`NoopDriver`] when diagnostics have no backing browser,
/// [`super::BridgeDriver`] for a real bridge subprocess.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn run(
        &self,
        url: &str,
        actions: &[BrowserAction],
        screenshot_dir: &Path,
    ) -> DiagnosticCapture;
}

/// Driver used when no browser backend is configured. Reports a passing
/// capture with no evidence so diagnostics-enabled steps are not failed
/// by the absence of a browser.
pub struct NoopDriver;

#[async_trait]
impl BrowserDriver for NoopDriver {
    async fn run(
        &self,
        url: &str,
        _actions: &[BrowserAction],
        _screenshot_dir: &Path,
    ) -> DiagnosticCapture {
        let mut capture = DiagnosticCapture::passed();
        capture.final_url = Some(url.to_string());
        capture
            .extra
            .insert("driver".to_string(), serde_json::json!("noop"));
        capture
    }
}
