//! Interactive approval prompts for steps and gated commands.

use crate::gate::CommandApprover;
use crate::ui::icons::{ALERT, SHIELD};
use crate::util::truncate_chars;
use crate::workflow::orchestrator::{EscalationHandler, StepApprover};
use crate::workflow::step::StepResult;
use async_trait::async_trait;
use console::style;
use dialoguer::{Select, theme::ColorfulTheme};
use std::path::Path;

/// Prompts the operator before a `requires_approval` step completes.
/// A failed prompt counts as a rejection.
pub struct InteractiveStepApprover;

impl InteractiveStepApprover {
    fn prompt(&self, result: &StepResult) -> bool {
        println!();
        println!(
            "{} Step {} requests approval",
            SHIELD,
            style(&result.step.id).yellow().bold()
        );
        if let Some(verification) = &result.verification {
            println!(
                "  {} {}",
                style("Verifier:").dim(),
                verification.reasoning
            );
        }
        if let Some(output) = result.output() {
            println!(
                "  {} {}",
                style("Output:").dim(),
                truncate_chars(output, 400)
            );
        }

        let options = &["Approve and continue", "Reject and fail this step"];
        match Select::with_theme(&ColorfulTheme::default())
            .with_prompt("Approve this step?")
            .items(options)
            .default(0)
            .interact()
        {
            Ok(0) => true,
            Ok(_) => false,
            Err(e) => {
                tracing::warn!(error = %e, "approval prompt failed, rejecting step");
                false
            }
        }
    }
}

#[async_trait]
impl StepApprover for InteractiveStepApprover {
    async fn approve(&self, result: &StepResult) -> bool {
        self.prompt(result)
    }
}

/// Prompts the operator for commands the gate will not auto-approve.
pub struct InteractiveCommandApprover;

#[async_trait]
impl CommandApprover for InteractiveCommandApprover {
    async fn approve(&self, command: &str, workdir: &Path) -> bool {
        println!();
        println!(
            "{} Command requires approval: {}",
            SHIELD,
            style(command).yellow()
        );
        println!("  {} {}", style("Workdir:").dim(), workdir.display());

        let options = &["Run the command", "Refuse it"];
        match Select::with_theme(&ColorfulTheme::default())
            .with_prompt("Run this command?")
            .items(options)
            .default(1)
            .interact()
        {
            Ok(0) => true,
            Ok(_) => false,
            Err(e) => {
                tracing::warn!(error = %e, "approval prompt failed, refusing command");
                false
            }
        }
    }
}

/// Prints escalated step failures so an operator can intervene.
pub struct TerminalEscalation;

#[async_trait]
impl EscalationHandler for TerminalEscalation {
    async fn escalate(&self, result: &StepResult) {
        eprintln!(
            "{} {}",
            ALERT,
            style(format!(
                "Step '{}' failed and was escalated: {}",
                result.step.id,
                result.error.as_deref().unwrap_or("no error recorded")
            ))
            .red()
            .bold()
        );
    }
}
