//! Typed error hierarchy for the conductor orchestrator.
//!
//! Three top-level enums cover the three subsystems:
//! - `OrchestratorError` — workflow run and per-step failures
//! - `TemplateError` — step input formatting failures
//! - `GateError` — command gate policy and execution failures

use thiserror::Error;

/// Errors from the workflow orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Step {step_id} references unknown role '{role}' with no bound agent")]
    UnknownRole { step_id: String, role: String },

    #[error("Step {step_id} timed out after {timeout_secs}s")]
    StepTimeout { step_id: String, timeout_secs: u64 },

    #[error("Run deadline of {deadline_secs}s exceeded before step {step_id}")]
    DeadlineExceeded { step_id: String, deadline_secs: u64 },

    #[error("Run stopped before step {step_id}")]
    Stopped { step_id: String },

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from step input template formatting.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Template references '{{{{{key}}}}}' but no value named '{key}' is available")]
    MissingKey { key: String },

    #[error("Template contains an unclosed or malformed marker near '{found}'")]
    UnclosedMarker { found: String },
}

/// Errors from the command gate.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("Command denied by policy (matched '{pattern}'): {command}")]
    Denied { command: String, pattern: String },

    #[error("Command requires approval but no approver is configured: {command}")]
    ApproverUnavailable { command: String },

    #[error("Command denied by approver: {command}")]
    ApproverDenied { command: String },

    #[error("Command timed out after {timeout_secs}s: {command}")]
    Timeout { command: String, timeout_secs: u64 },

    #[error("Failed to spawn command '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orchestrator_error_unknown_role_is_matchable() {
        let err = OrchestratorError::UnknownRole {
            step_id: "implement".to_string(),
            role: "coder".to_string(),
        };
        match &err {
            OrchestratorError::UnknownRole { step_id, role } => {
                assert_eq!(step_id, "implement");
                assert_eq!(role, "coder");
            }
            _ => panic!("Expected UnknownRole variant"),
        }
        assert!(err.to_string().contains("coder"));
    }

    #[test]
    fn orchestrator_error_step_timeout_carries_duration() {
        let err = OrchestratorError::StepTimeout {
            step_id: "deploy".to_string(),
            timeout_secs: 120,
        };
        match &err {
            OrchestratorError::StepTimeout { timeout_secs, .. } => {
                assert_eq!(*timeout_secs, 120);
            }
            _ => panic!("Expected StepTimeout"),
        }
        assert!(err.to_string().contains("120"));
    }

    #[test]
    fn orchestrator_error_converts_from_template_error() {
        let inner = TemplateError::MissingKey {
            key: "step_outputs.design".to_string(),
        };
        let err: OrchestratorError = inner.into();
        match &err {
            OrchestratorError::Template(TemplateError::MissingKey { key }) => {
                assert_eq!(key, "step_outputs.design");
            }
            _ => panic!("Expected Template(MissingKey)"),
        }
    }

    #[test]
    fn template_error_missing_key_names_the_key() {
        let err = TemplateError::MissingKey {
            key: "task".to_string(),
        };
        assert!(err.to_string().contains("{{task}}"));
    }

    #[test]
    fn gate_error_denied_carries_pattern() {
        let err = GateError::Denied {
            command: "rm -rf /tmp/x".to_string(),
            pattern: "rm -rf /".to_string(),
        };
        match &err {
            GateError::Denied { pattern, .. } => assert_eq!(pattern, "rm -rf /"),
            _ => panic!("Expected Denied"),
        }
    }

    #[test]
    fn gate_error_approval_variants_are_distinct() {
        let unavailable = GateError::ApproverUnavailable {
            command: "deploy.sh".to_string(),
        };
        let denied = GateError::ApproverDenied {
            command: "deploy.sh".to_string(),
        };
        assert!(matches!(unavailable, GateError::ApproverUnavailable { .. }));
        assert!(matches!(denied, GateError::ApproverDenied { .. }));
        assert!(!matches!(unavailable, GateError::ApproverDenied { .. }));
    }

    #[test]
    fn gate_error_spawn_preserves_io_source() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "sh not found");
        let err = GateError::Spawn {
            command: "true".to_string(),
            source: io_err,
        };
        match &err {
            GateError::Spawn { source, .. } => {
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            _ => panic!("Expected Spawn"),
        }
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        let orch = OrchestratorError::Stopped {
            step_id: "x".into(),
        };
        assert_std_error(&orch);
        let tmpl = TemplateError::MissingKey { key: "x".into() };
        assert_std_error(&tmpl);
        let gate = GateError::ApproverUnavailable {
            command: "x".into(),
        };
        assert_std_error(&gate);
    }
}
