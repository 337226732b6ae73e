//! Workflow definitions and the team orchestrator.
//!
//! This module provides:
//! - `step` — the step/result data model (`WorkflowStep`, `StepResult`, `TeamResult`)
//! - `template` — strict `{{marker}}` substitution for step inputs
//! - `loader` — YAML workflow definitions with validation and content hashing
//! - `orchestrator` — the sequential step state machine

pub mod loader;
pub mod orchestrator;
pub mod step;
pub mod template;

pub use loader::{Workflow, load_workflow};
pub use orchestrator::{
    EscalationHandler, StepApprover, StepObserver, StopHandle, TeamOrchestrator,
};
pub use step::{
    DiagnosticsStepConfig, ExecutionMetadata, OnFail, StepResult, StepStatus, TeamResult,
    WorkflowStep,
};
pub use template::render_template;
