//! The repair loop: re-run, test, diagnose, bounded.

use crate::agent::{Agent, AgentContext, AgentResult};
use crate::diagnostics::analyzer::{MetaAnalysis, MetaAnalyzer};
use crate::diagnostics::capture::{BrowserDriver, DiagnosticCapture};
use crate::diagnostics::monitor::IterationMonitor;
use crate::workflow::WorkflowStep;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

pub const DEFAULT_MAX_ITERATIONS: u32 = 5;

/// What the repair loop did for one step, merged into the step result's
/// metadata by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsReport {
    /// False when no target URL or actions were configured and the loop
    /// was skipped entirely.
    pub captured: bool,
    pub passed: bool,
    pub iterations: u32,
    /// The most recent capture.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture: Option<DiagnosticCapture>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<MetaAnalysis>,
    pub max_iterations_reached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl DiagnosticsReport {
    pub fn not_captured() -> Self {
        Self {
            captured: false,
            passed: false,
            iterations: 0,
            capture: None,
            analysis: None,
            max_iterations_reached: false,
            note: Some("not captured".to_string()),
        }
    }
}

/// Bounded re-run/test/diagnose cycle around one step.
pub struct RepairLoop {
    driver: Arc<dyn BrowserDriver>,
    analyzer: MetaAnalyzer,
    monitor: IterationMonitor,
    max_iterations: u32,
}

impl RepairLoop {
    pub fn new(driver: Arc<dyn BrowserDriver>, analyzer: MetaAnalyzer) -> Self {
        Self {
            driver,
            analyzer,
            monitor: IterationMonitor::default(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_failure_threshold(mut self, threshold: usize) -> Self {
        self.monitor = IterationMonitor::new(threshold);
        self
    }

    /// Run the cycle for `step`. Returns the agent result of the last
    /// attempt (when any attempt ran) and the report to merge into the
    /// step's metadata. Never errors; a hopeless step comes back as a
    /// failed report.
    pub async fn run(
        &mut self,
        step: &WorkflowStep,
        agent: &dyn Agent,
        input: &str,
        context: &AgentContext,
        screenshot_dir: &Path,
    ) -> (Option<AgentResult>, DiagnosticsReport) {
        let config = match &step.diagnostics {
            Some(config) if config.is_runnable() => config,
            _ => {
                tracing::debug!(step_id = %step.id, "diagnostics not configured, skipping repair loop");
                return (None, DiagnosticsReport::not_captured());
            }
        };
        let url = config.test_url.clone().unwrap_or_default();
        let actions = &config.actions;

        self.monitor.start_step(&step.id);
        let mut last_result: Option<AgentResult> = None;
        let mut last_capture: Option<DiagnosticCapture> = None;
        let mut analysis: Option<MetaAnalysis> = None;
        let mut completed = 0;

        for iteration in 1..=self.max_iterations {
            completed = iteration;
            let attempt_input =
                build_attempt_input(input, iteration, last_capture.as_ref(), analysis.as_ref());

            // Fresh context per invocation, same discipline as the
            // orchestrator's own agent calls.
            let result = match agent.execute(&attempt_input, &context.clone()).await {
                Ok(result) => result,
                Err(e) => AgentResult::failed(&format!("agent error during repair: {}", e)),
            };

            let capture = self.driver.run(&url, actions, screenshot_dir).await;
            let passed = capture.success;
            let error_text = capture.error.clone().unwrap_or_else(|| {
                if passed {
                    String::new()
                } else {
                    "check failed".to_string()
                }
            });
            tracing::info!(
                step_id = %step.id,
                iteration,
                passed,
                "diagnostic iteration finished"
            );
            self.monitor
                .record(&error_text, &result.output, passed, Some(capture.clone()));

            last_capture = Some(capture);
            last_result = Some(result);

            if passed {
                return (
                    last_result,
                    DiagnosticsReport {
                        captured: true,
                        passed: true,
                        iterations: iteration,
                        capture: last_capture,
                        analysis,
                        max_iterations_reached: false,
                        note: None,
                    },
                );
            }

            if self.monitor.should_trigger_meta_analysis() {
                analysis = Some(
                    self.analyzer
                        .analyze(&step.id, self.monitor.current_history())
                        .await,
                );
            }
        }

        tracing::warn!(step_id = %step.id, iterations = completed, "repair loop exhausted");
        (
            last_result,
            DiagnosticsReport {
                captured: true,
                passed: false,
                iterations: completed,
                capture: last_capture,
                analysis,
                max_iterations_reached: true,
                note: Some("max iterations reached".to_string()),
            },
        )
    }
}

/// First attempt gets the original input; later attempts get the prior
/// failure evidence and, once present, the meta-analysis suggestions.
fn build_attempt_input(
    input: &str,
    iteration: u32,
    capture: Option<&DiagnosticCapture>,
    analysis: Option<&MetaAnalysis>,
) -> String {
    if iteration == 1 {
        return input.to_string();
    }
    let mut text = format!("{}\n\nYour previous attempt did not pass the live check.", input);
    if let Some(capture) = capture {
        if let Some(error) = &capture.error {
            text.push_str(&format!("\nCheck failure: {}", error));
        }
        for err in capture.error_summaries(3) {
            text.push_str(&format!("\nConsole error: {}", err));
        }
    }
    if let Some(analysis) = analysis {
        text.push_str(&format!("\nDiagnosis: {}", analysis.pattern));
        if !analysis.suggestions.is_empty() {
            text.push_str("\nTry instead:");
            for suggestion in analysis.suggestions.iter().take(3) {
                text.push_str(&format!("\n- {}", suggestion));
            }
        }
    }
    text.push_str("\nRevise the work so the check passes.");
    text
}
