//! YAML workflow definitions.
//!
//! A workflow file declares an id, a name, and the ordered step list.
//! Loading validates the definition and records a content hash so run
//! records can be traced back to the exact definition that produced them.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::Path;

use super::step::WorkflowStep;

/// An ordered pipeline of steps executed by the team orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<WorkflowStep>,
    /// SHA-256 of the definition file, set at load time.
    #[serde(default, skip_deserializing)]
    pub source_hash: Option<String>,
}

impl Workflow {
    pub fn new(id: &str, name: &str, steps: Vec<WorkflowStep>) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            steps,
            source_hash: None,
        }
    }

    /// Load a workflow from a YAML file, validate it, and record the
    /// content hash.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read workflow file: {}", path.display()))?;

        let mut workflow: Workflow = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse workflow YAML: {}", path.display()))?;

        workflow.validate()?;
        workflow.source_hash = Some(compute_content_hash(&content));
        Ok(workflow)
    }

    /// Save the workflow definition to a YAML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_yaml::to_string(self).context("Failed to serialize workflow to YAML")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write workflow file: {}", path.display()))?;
        Ok(())
    }

    /// Check structural invariants: nonempty id and step list, unique step
    /// ids, nonempty roles.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            bail!("Workflow id must not be empty");
        }
        if self.steps.is_empty() {
            bail!("Workflow '{}' declares no steps", self.id);
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.id.trim().is_empty() {
                bail!("Workflow '{}' contains a step with an empty id", self.id);
            }
            if step.role.trim().is_empty() {
                bail!("Step '{}' has an empty role", step.id);
            }
            if !seen.insert(step.id.as_str()) {
                bail!("Duplicate step id '{}' in workflow '{}'", step.id, self.id);
            }
        }
        Ok(())
    }

    /// Every role the workflow dispatches to, verifier roles included.
    pub fn roles(&self) -> Vec<String> {
        let mut roles = Vec::new();
        for step in &self.steps {
            if !roles.contains(&step.role) {
                roles.push(step.role.clone());
            }
            if let Some(verifier) = &step.verifier
                && !roles.contains(verifier)
            {
                roles.push(verifier.clone());
            }
        }
        roles
    }
}

/// Load and validate a workflow definition from a YAML file.
pub fn load_workflow(path: &Path) -> Result<Workflow> {
    Workflow::load(path)
}

/// Hex-encoded SHA-256 of the definition content, truncated to 12
/// characters for run records.
pub fn compute_content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::step::OnFail;
    use std::fs;
    use tempfile::tempdir;

    fn sample_workflow_yaml() -> &'static str {
        r#"
id: feature-pipeline
name: Feature pipeline
description: Design, implement, verify
steps:
  - id: design
    role: architect
    input: "Design a solution for {{task}}"
    expectation: "A concrete design document"
  - id: implement
    role: coder
    input: "Implement this design: {{step_outputs.design}}"
    verifier: reviewer
    max_retries: 3
    on_fail: abort
"#
    }

    #[test]
    fn test_load_workflow() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("feature.yaml");
        fs::write(&path, sample_workflow_yaml()).unwrap();

        let workflow = Workflow::load(&path).unwrap();
        assert_eq!(workflow.id, "feature-pipeline");
        assert_eq!(workflow.steps.len(), 2);
        assert_eq!(workflow.steps[1].on_fail, OnFail::Abort);
        assert_eq!(workflow.steps[1].verifier.as_deref(), Some("reviewer"));
        assert!(workflow.source_hash.is_some());
        assert_eq!(workflow.source_hash.as_ref().unwrap().len(), 12);
    }

    #[test]
    fn test_load_workflow_not_found() {
        let result = Workflow::load(Path::new("/nonexistent/workflow.yaml"));
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read workflow file")
        );
    }

    #[test]
    fn test_load_workflow_invalid_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        fs::write(&path, "steps: [{ id: 3 ]").unwrap();

        let result = Workflow::load(&path);
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to parse workflow YAML")
        );
    }

    #[test]
    fn test_validate_rejects_duplicate_step_ids() {
        let workflow = Workflow::new(
            "wf",
            "Workflow",
            vec![
                WorkflowStep::new("a", "coder", "x"),
                WorkflowStep::new("a", "coder", "y"),
            ],
        );
        let err = workflow.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate step id 'a'"));
    }

    #[test]
    fn test_validate_rejects_empty_steps() {
        let workflow = Workflow::new("wf", "Workflow", vec![]);
        assert!(workflow.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_role() {
        let workflow = Workflow::new("wf", "Workflow", vec![WorkflowStep::new("a", " ", "x")]);
        let err = workflow.validate().unwrap_err();
        assert!(err.to_string().contains("empty role"));
    }

    #[test]
    fn test_roles_include_verifiers_once() {
        let workflow = Workflow::new(
            "wf",
            "Workflow",
            vec![
                WorkflowStep::new("a", "coder", "x").with_verifier("reviewer"),
                WorkflowStep::new("b", "coder", "y").with_verifier("reviewer"),
            ],
        );
        assert_eq!(workflow.roles(), vec!["coder", "reviewer"]);
    }

    #[test]
    fn test_save_and_reload_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wf.yaml");

        let workflow = Workflow::new(
            "wf",
            "Workflow",
            vec![WorkflowStep::new("a", "coder", "do {{task}}")],
        );
        workflow.save(&path).unwrap();

        let loaded = Workflow::load(&path).unwrap();
        assert_eq!(loaded.id, "wf");
        assert_eq!(loaded.steps.len(), 1);
    }

    #[test]
    fn test_content_hash_is_stable() {
        let a = compute_content_hash("same content");
        let b = compute_content_hash("same content");
        let c = compute_content_hash("different content");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 12);
    }
}
