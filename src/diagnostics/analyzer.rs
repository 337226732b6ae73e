//! Failure-pattern meta-analysis.
//!
//! One structured LLM request over the iteration history, degrading to a
//! deterministic low-confidence analysis when the call or the parse goes
//! wrong. Callers always get an analysis back, never an error.

use crate::agent::LlmExecutor;
use crate::diagnostics::monitor::IterationRecord;
use crate::util::extract_json_object;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const FALLBACK_CONFIDENCE: f64 = 0.3;

/// Console errors quoted per iteration in the analysis prompt.
const CONSOLE_ERRORS_PER_ITERATION: usize = 3;

/// Structured diagnosis of a repeating failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaAnalysis {
    /// One-two sentence description of the repeating pattern.
    pub pattern: String,
    pub root_cause: String,
    /// Ordered alternative approaches, most promising first.
    pub suggestions: Vec<String>,
    /// Always within [0, 1].
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    pub failure_count: usize,
    pub fallback: bool,
}

#[derive(Debug, Deserialize)]
struct AnalysisReply {
    pattern: String,
    root_cause: String,
    suggestions: Vec<String>,
    confidence: f64,
    #[serde(default)]
    reasoning: String,
}

/// Turns an iteration history into a [`MetaAnalysis`].
pub struct MetaAnalyzer {
    llm: Option<Arc<dyn LlmExecutor>>,
}

impl MetaAnalyzer {
    pub fn new(llm: Arc<dyn LlmExecutor>) -> Self {
        Self { llm: Some(llm) }
    }

    /// Analyzer with no LLM behind it; every analysis is the fallback.
    pub fn without_llm() -> Self {
        Self { llm: None }
    }

    pub async fn analyze(&self, step_id: &str, history: &[IterationRecord]) -> MetaAnalysis {
        let failure_count = history.iter().filter(|r| !r.passed).count();

        let Some(llm) = &self.llm else {
            return self.fallback(step_id, history, failure_count);
        };

        let prompt = build_prompt(step_id, history);
        let reply = match llm.execute(&prompt).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(step_id, error = %e, "meta-analysis LLM call failed, using fallback");
                return self.fallback(step_id, history, failure_count);
            }
        };

        match parse_reply(&reply) {
            Some(parsed) if !parsed.suggestions.is_empty() => MetaAnalysis {
                pattern: parsed.pattern,
                root_cause: parsed.root_cause,
                suggestions: parsed.suggestions.into_iter().take(5).collect(),
                confidence: parsed.confidence.clamp(0.0, 1.0),
                reasoning: parsed.reasoning,
                failure_count,
                fallback: false,
            },
            _ => {
                tracing::warn!(step_id, "meta-analysis reply unparseable, using fallback");
                self.fallback(step_id, history, failure_count)
            }
        }
    }

    fn fallback(
        &self,
        step_id: &str,
        history: &[IterationRecord],
        failure_count: usize,
    ) -> MetaAnalysis {
        let last_error = history
            .iter()
            .rev()
            .find(|r| !r.passed)
            .map(|r| r.error.clone())
            .unwrap_or_else(|| "unknown error".to_string());
        MetaAnalysis {
            pattern: format!(
                "Step '{}' keeps failing the same way across {} attempts; blind retries are not converging.",
                step_id, failure_count
            ),
            root_cause: format!("Unconfirmed; the latest failure was: {}", last_error),
            suggestions: vec![
                "Check that the selectors in the action sequence still match the rendered page"
                    .to_string(),
                "Inspect the captured network requests for failing or missing resources"
                    .to_string(),
                "Add explicit waits before interacting with late-rendering elements".to_string(),
                "Reduce the step to the smallest change that should make the check pass"
                    .to_string(),
            ],
            confidence: FALLBACK_CONFIDENCE,
            reasoning: String::new(),
            failure_count,
            fallback: true,
        }
    }
}

fn build_prompt(step_id: &str, history: &[IterationRecord]) -> String {
    let mut prompt = format!(
        "A workflow step ('{}') has repeatedly failed an automated browser check.\n\
         Iteration history, oldest first:\n\n",
        step_id
    );
    for record in history {
        prompt.push_str(&format!(
            "Iteration {}: {}\n  error: {}\n  fix attempted: {}\n",
            record.iteration,
            if record.passed { "PASS" } else { "FAIL" },
            record.error,
            record.fix_description,
        ));
        if let Some(capture) = &record.capture {
            for err in capture.error_summaries(CONSOLE_ERRORS_PER_ITERATION) {
                prompt.push_str(&format!("  console error: {}\n", err));
            }
        }
        prompt.push('\n');
    }
    prompt.push_str(
        "Analyze the failure pattern. Respond with a single JSON object:\n\
         {\n\
           \"pattern\": \"one-two sentence description of the repeating pattern\",\n\
           \"root_cause\": \"most likely root cause\",\n\
           \"suggestions\": [\"3-5 concrete alternative approaches, best first\"],\n\
           \"confidence\": 0.0,\n\
           \"reasoning\": \"brief reasoning\"\n\
         }",
    );
    prompt
}

fn parse_reply(reply: &str) -> Option<AnalysisReply> {
    let json = extract_json_object(reply)?;
    serde_json::from_str(&json).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::Utc;

    struct ScriptedLlm {
        reply: Result<String, String>,
    }

    #[async_trait]
    impl LlmExecutor for ScriptedLlm {
        async fn execute(&self, _prompt: &str) -> Result<String> {
            match &self.reply {
                Ok(s) => Ok(s.clone()),
                Err(e) => anyhow::bail!("{}", e),
            }
        }
    }

    fn failing_history(n: usize, error: &str) -> Vec<IterationRecord> {
        (1..=n as u32)
            .map(|i| IterationRecord {
                iteration: i,
                error: error.to_string(),
                fix_description: format!("attempt {}", i),
                passed: false,
                capture: None,
                timestamp: Utc::now(),
            })
            .collect()
    }

    fn analyzer_replying(reply: &str) -> MetaAnalyzer {
        MetaAnalyzer::new(Arc::new(ScriptedLlm {
            reply: Ok(reply.to_string()),
        }))
    }

    #[tokio::test]
    async fn test_parses_plain_json_reply() {
        let analyzer = analyzer_replying(
            r#"{"pattern": "selector drift", "root_cause": "renamed id",
                "suggestions": ["use data-testid", "wait for hydration", "query by role"],
                "confidence": 0.85, "reasoning": "same selector fails each time"}"#,
        );
        let analysis = analyzer
            .analyze("login", &failing_history(3, "no element #submit"))
            .await;

        assert!(!analysis.fallback);
        assert_eq!(analysis.pattern, "selector drift");
        assert_eq!(analysis.suggestions.len(), 3);
        assert_eq!(analysis.failure_count, 3);
        assert!(analysis.confidence > FALLBACK_CONFIDENCE);
    }

    #[tokio::test]
    async fn test_parses_fenced_json_reply() {
        let analyzer = analyzer_replying(
            "Here you go:\n```json\n{\"pattern\": \"p\", \"root_cause\": \"r\",\n \"suggestions\": [\"a\", \"b\", \"c\"], \"confidence\": 0.6}\n```",
        );
        let analysis = analyzer.analyze("s", &failing_history(3, "e")).await;
        assert!(!analysis.fallback);
        assert_eq!(analysis.confidence, 0.6);
    }

    #[tokio::test]
    async fn test_confidence_clamped_into_range() {
        let analyzer = analyzer_replying(
            r#"{"pattern": "p", "root_cause": "r", "suggestions": ["a"], "confidence": 7.5}"#,
        );
        let analysis = analyzer.analyze("s", &failing_history(3, "e")).await;
        assert_eq!(analysis.confidence, 1.0);
    }

    #[tokio::test]
    async fn test_llm_error_degrades_to_fallback() {
        let analyzer = MetaAnalyzer::new(Arc::new(ScriptedLlm {
            reply: Err("connection refused".to_string()),
        }));
        let analysis = analyzer.analyze("s", &failing_history(3, "e")).await;

        assert!(analysis.fallback);
        assert_eq!(analysis.confidence, FALLBACK_CONFIDENCE);
        assert!(analysis.suggestions.len() >= 3);
    }

    #[tokio::test]
    async fn test_unparseable_reply_degrades_to_fallback() {
        let analyzer = analyzer_replying("I think the selector is wrong, maybe.");
        let analysis = analyzer.analyze("s", &failing_history(3, "e")).await;
        assert!(analysis.fallback);
        assert!(analysis.suggestions.len() >= 3);
    }

    #[tokio::test]
    async fn test_empty_suggestions_degrade_to_fallback() {
        let analyzer = analyzer_replying(
            r#"{"pattern": "p", "root_cause": "r", "suggestions": [], "confidence": 0.9}"#,
        );
        let analysis = analyzer.analyze("s", &failing_history(3, "e")).await;
        assert!(analysis.fallback);
    }

    #[tokio::test]
    async fn test_without_llm_always_falls_back() {
        let analyzer = MetaAnalyzer::without_llm();
        let analysis = analyzer.analyze("s", &failing_history(2, "e")).await;
        assert!(analysis.fallback);
        assert_eq!(analysis.failure_count, 2);
    }

    #[tokio::test]
    async fn test_fallback_mentions_latest_error() {
        let analyzer = MetaAnalyzer::without_llm();
        let analysis = analyzer
            .analyze("s", &failing_history(3, "no element #submit"))
            .await;
        assert!(analysis.root_cause.contains("no element #submit"));
    }

    #[tokio::test]
    async fn test_suggestions_capped_at_five() {
        let analyzer = analyzer_replying(
            r#"{"pattern": "p", "root_cause": "r",
                "suggestions": ["1", "2", "3", "4", "5", "6", "7"], "confidence": 0.5}"#,
        );
        let analysis = analyzer.analyze("s", &failing_history(3, "e")).await;
        assert_eq!(analysis.suggestions.len(), 5);
    }

    #[test]
    fn test_prompt_includes_history_and_console_errors() {
        let mut history = failing_history(2, "timeout waiting for .done");
        let mut capture = crate::diagnostics::DiagnosticCapture::failed("timeout");
        for i in 0..5 {
            capture.record_console(crate::diagnostics::ConsoleMessage {
                level: crate::diagnostics::ConsoleLevel::Error,
                text: format!("console err {}", i),
                location: None,
            });
        }
        history[1].capture = Some(capture);

        let prompt = build_prompt("checkout", &history);
        assert!(prompt.contains("Iteration 1: FAIL"));
        assert!(prompt.contains("timeout waiting for .done"));
        assert!(prompt.contains("console err 2"));
        // only the first three console errors are quoted
        assert!(!prompt.contains("console err 3"));
    }
}
