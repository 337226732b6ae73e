//! Agent interface for step execution and verification.
//!
//! The orchestrator never talks to an LLM directly; it dispatches each step
//! to the [`Agent`] bound to the step's role and hands the result to an
//! optional verifier agent for cross-checking. Real implementation:
//! [`CliAgent`]. Test doubles live in the consuming test modules.

pub mod cli;

pub use cli::{CliAgent, CliLlm, LlmExecutor};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Invocation-scoped context. The orchestrator constructs a fresh one for
/// every agent call, so no conversational state leaks between invocations.
#[derive(Debug, Clone, Default)]
pub struct AgentContext {
    pub run_id: String,
    pub step_id: String,
    /// Directory the agent works in (the run's output dir).
    pub workdir: PathBuf,
    /// Extra key/value pairs the caller wants the agent to see.
    pub vars: HashMap<String, String>,
}

impl AgentContext {
    pub fn new(run_id: &str, step_id: &str, workdir: PathBuf) -> Self {
        Self {
            run_id: run_id.to_string(),
            step_id: step_id.to_string(),
            workdir,
            vars: HashMap::new(),
        }
    }
}

/// Outcome of one agent invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub success: bool,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl AgentResult {
    pub fn ok(output: &str) -> Self {
        Self {
            success: true,
            output: output.to_string(),
            error: None,
            metadata: HashMap::new(),
        }
    }

    pub fn failed(error: &str) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.to_string()),
            metadata: HashMap::new(),
        }
    }
}

/// Verifier verdict over an agent result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verification {
    pub passed: bool,
    pub reasoning: String,
}

impl Verification {
    pub fn passed(reasoning: &str) -> Self {
        Self {
            passed: true,
            reasoning: reasoning.to_string(),
        }
    }

    pub fn failed(reasoning: &str) -> Self {
        Self {
            passed: false,
            reasoning: reasoning.to_string(),
        }
    }
}

/// A task executor bound to one role.
#[async_trait]
pub trait Agent: Send + Sync {
    /// The role this agent serves (matched against `WorkflowStep.role`).
    fn role(&self) -> &str;

    /// Execute a rendered step input. Errors are treated by the caller
    /// exactly like a failed result: they consume a retry.
    async fn execute(&self, input: &str, context: &AgentContext) -> anyhow::Result<AgentResult>;

    /// Cross-check another agent's result against the step expectation.
    async fn verify(
        &self,
        result: &AgentResult,
        expectation: &str,
    ) -> anyhow::Result<Verification>;
}
