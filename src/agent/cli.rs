//! CLI-backed agent implementation.
//!
//! Wraps an LLM command-line tool (default: `claude`): the prompt goes in on
//! stdin, the completion comes back on stdout. The same [`LlmExecutor`] seam
//! feeds the diagnostics meta-analyzer, so tests can substitute a scripted
//! executor anywhere an LLM call happens.

use crate::agent::{Agent, AgentContext, AgentResult, Verification};
use crate::util::{extract_json_object, truncate_chars};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

/// Upper bound on how much agent output is quoted back in a verify prompt.
const VERIFY_OUTPUT_LIMIT: usize = 8_000;

/// One-shot LLM completion seam.
#[async_trait]
pub trait LlmExecutor: Send + Sync {
    async fn execute(&self, prompt: &str) -> Result<String>;
}

/// [`LlmExecutor`] that shells out to an LLM CLI.
pub struct CliLlm {
    command: String,
    args: Vec<String>,
    timeout: Duration,
    workdir: Option<PathBuf>,
}

impl CliLlm {
    pub fn new(command: &str, args: &[String], timeout_secs: u64) -> Self {
        Self {
            command: command.to_string(),
            args: args.to_vec(),
            timeout: Duration::from_secs(timeout_secs),
            workdir: None,
        }
    }

    pub fn with_workdir(mut self, workdir: PathBuf) -> Self {
        self.workdir = Some(workdir);
        self
    }
}

#[async_trait]
impl LlmExecutor for CliLlm {
    async fn execute(&self, prompt: &str) -> Result<String> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }

        tracing::debug!(command = %self.command, "spawning LLM CLI");

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn LLM command: {}", self.command))?;

        if let Some(mut stdin) = child.stdin.take() {
            // The child may exit without reading stdin; a closed pipe here
            // surfaces through the exit status instead.
            let _ = stdin.write_all(prompt.as_bytes()).await;
            // stdin is dropped here, closing the pipe
        }

        // Read stdout/stderr concurrently so the child cannot block on a
        // full pipe while we wait on its exit status.
        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();
        let stdout_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(pipe) = stdout_pipe.as_mut() {
                let _ = pipe.read_to_string(&mut buf).await;
            }
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_string(&mut buf).await;
            }
            buf
        });

        let status = match timeout(self.timeout, child.wait()).await {
            Ok(result) => result.context("Failed to wait for LLM command")?,
            Err(_) => {
                let _ = child.kill().await;
                anyhow::bail!(
                    "LLM command '{}' timed out after {}s",
                    self.command,
                    self.timeout.as_secs()
                );
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            let code = status.code().unwrap_or(-1);
            if stderr.trim().is_empty() {
                anyhow::bail!("LLM command '{}' exited with code {}", self.command, code);
            }
            anyhow::bail!(
                "LLM command '{}' exited with code {}: {}",
                self.command,
                code,
                stderr.trim()
            );
        }

        Ok(stdout)
    }
}

/// Shape a verifier reply must take. `reasoning` is optional on the wire so
/// a bare `{"passed": true}` still counts as a verdict.
#[derive(Debug, Deserialize)]
struct VerdictReply {
    passed: bool,
    #[serde(default)]
    reasoning: String,
}

/// An [`Agent`] that forwards work to an LLM CLI under a role persona.
pub struct CliAgent {
    role: String,
    llm: Arc<dyn LlmExecutor>,
    persona: Option<String>,
}

impl CliAgent {
    pub fn new(role: &str, llm: Arc<dyn LlmExecutor>) -> Self {
        Self {
            role: role.to_string(),
            llm,
            persona: None,
        }
    }

    /// Extra instructions prepended to every prompt for this role.
    pub fn with_persona(mut self, persona: &str) -> Self {
        self.persona = Some(persona.to_string());
        self
    }

    fn build_prompt(&self, input: &str) -> String {
        let mut prompt = format!("You are the '{}' agent on a software team.\n", self.role);
        if let Some(persona) = &self.persona {
            prompt.push_str(persona);
            prompt.push('\n');
        }
        prompt.push('\n');
        prompt.push_str(input);
        prompt
    }

    fn build_verify_prompt(&self, result: &AgentResult, expectation: &str) -> String {
        format!(
            "You are the '{}' agent reviewing another agent's work.\n\n\
             Expectation:\n{}\n\n\
             Result to review:\n{}\n\n\
             Respond with a single JSON object, nothing else:\n\
             {{\"passed\": true|false, \"reasoning\": \"one or two sentences\"}}",
            self.role,
            expectation,
            truncate_chars(&result.output, VERIFY_OUTPUT_LIMIT)
        )
    }
}

#[async_trait]
impl Agent for CliAgent {
    fn role(&self) -> &str {
        &self.role
    }

    async fn execute(&self, input: &str, context: &AgentContext) -> Result<AgentResult> {
        tracing::debug!(step_id = %context.step_id, role = %self.role, "dispatching agent prompt");
        let output = self.llm.execute(&self.build_prompt(input)).await?;
        let trimmed = output.trim();
        if trimmed.is_empty() {
            return Ok(AgentResult::failed("agent produced no output"));
        }
        Ok(AgentResult::ok(trimmed))
    }

    async fn verify(&self, result: &AgentResult, expectation: &str) -> Result<Verification> {
        let reply = self
            .llm
            .execute(&self.build_verify_prompt(result, expectation))
            .await?;

        // A reply that cannot be read as a verdict fails the check rather
        // than passing it.
        let Some(json) = extract_json_object(&reply) else {
            return Ok(Verification::failed(&format!(
                "verifier reply contained no JSON verdict: {}",
                truncate_chars(reply.trim(), 200)
            )));
        };
        match serde_json::from_str::<VerdictReply>(&json) {
            Ok(verdict) => Ok(Verification {
                passed: verdict.passed,
                reasoning: if verdict.reasoning.is_empty() {
                    "no reasoning given".to_string()
                } else {
                    verdict.reasoning
                },
            }),
            Err(e) => Ok(Verification::failed(&format!(
                "verifier reply was not a valid verdict ({}): {}",
                e,
                truncate_chars(reply.trim(), 200)
            ))),
        }
    }
}
