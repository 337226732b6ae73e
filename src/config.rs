//! Configuration for conductor, read from `conductor.toml`.
//!
//! Every section and field is optional; an absent file yields a fully
//! working default configuration. Layering is file → environment
//! (`CONDUCTOR_LLM_CMD`) → built-in default.
//!
//! # Configuration File Format
//!
//! ```toml
//! [llm]
//! command = "claude"
//! args = ["-p"]
//! timeout_secs = 300
//!
//! [gate]
//! timeout_secs = 60
//! max_output_bytes = 16384
//! auto_approve = ["make test", "just check"]
//! deny = ["terraform destroy"]
//!
//! [diagnostics]
//! bridge_command = "conductor-bridge"
//! max_iterations = 5
//! failure_threshold = 3
//! action_timeout_secs = 30
//! error_screenshot = true
//!
//! [recorder]
//! enabled = true
//! capacity = 32
//! # archive_dir defaults to ~/.conductor/runs
//!
//! [run]
//! output_dir = ".conductor"
//! deadline_secs = 3600
//! ```

use crate::gate::{CommandGate, CommandPolicy};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "conductor.toml";

/// LLM CLI settings backing the agents and the meta-analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Executable to invoke (default: "claude", or `CONDUCTOR_LLM_CMD`).
    #[serde(default)]
    pub command: Option<String>,
    /// Arguments placed before the prompt.
    #[serde(default)]
    pub args: Vec<String>,
    /// Wall-clock bound on a single LLM invocation.
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_llm_timeout_secs() -> u64 {
    300
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

/// Command gate tuning plus extra policy table entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateSection {
    #[serde(default = "default_gate_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    /// Commands added to the policy table as auto-approve.
    #[serde(default)]
    pub auto_approve: Vec<String>,
    /// Commands added to the policy table as deny. A command listed in
    /// both lists ends up denied.
    #[serde(default)]
    pub deny: Vec<String>,
}

fn default_gate_timeout_secs() -> u64 {
    crate::gate::DEFAULT_COMMAND_TIMEOUT_SECS
}

fn default_max_output_bytes() -> usize {
    crate::gate::DEFAULT_MAX_OUTPUT_BYTES
}

impl Default for GateSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_gate_timeout_secs(),
            max_output_bytes: default_max_output_bytes(),
            auto_approve: Vec::new(),
            deny: Vec::new(),
        }
    }
}

/// Diagnostic repair loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsSection {
    /// Bridge subprocess that drives the browser. Absent means the noop
    /// driver, which passes every capture.
    #[serde(default)]
    pub bridge_command: Option<String>,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Consecutive failures before the one-shot meta-analysis fires.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: usize,
    #[serde(default = "default_action_timeout_secs")]
    pub action_timeout_secs: u64,
    /// Capture a screenshot when an action sequence fails.
    #[serde(default = "default_error_screenshot")]
    pub error_screenshot: bool,
}

fn default_max_iterations() -> u32 {
    crate::diagnostics::DEFAULT_MAX_ITERATIONS
}

fn default_failure_threshold() -> usize {
    crate::diagnostics::DEFAULT_FAILURE_THRESHOLD
}

fn default_action_timeout_secs() -> u64 {
    crate::diagnostics::bridge::DEFAULT_ACTION_TIMEOUT_SECS
}

fn default_error_screenshot() -> bool {
    true
}

impl Default for DiagnosticsSection {
    fn default() -> Self {
        Self {
            bridge_command: None,
            max_iterations: default_max_iterations(),
            failure_threshold: default_failure_threshold(),
            action_timeout_secs: default_action_timeout_secs(),
            error_screenshot: default_error_screenshot(),
        }
    }
}

/// Run recording settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderSection {
    #[serde(default = "default_recorder_enabled")]
    pub enabled: bool,
    /// Queue capacity; a full queue drops records.
    #[serde(default = "default_recorder_capacity")]
    pub capacity: usize,
    /// Archive directory; absent means `~/.conductor/runs`.
    #[serde(default)]
    pub archive_dir: Option<PathBuf>,
}

fn default_recorder_enabled() -> bool {
    true
}

fn default_recorder_capacity() -> usize {
    crate::record::DEFAULT_QUEUE_CAPACITY
}

impl Default for RecorderSection {
    fn default() -> Self {
        Self {
            enabled: default_recorder_enabled(),
            capacity: default_recorder_capacity(),
            archive_dir: None,
        }
    }
}

/// Run-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSection {
    /// Where run directories (artifacts, screenshots) are created.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Wall-clock bound on a whole run, checked at step boundaries.
    #[serde(default)]
    pub deadline_secs: Option<u64>,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".conductor")
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            deadline_secs: None,
        }
    }
}

/// The complete conductor.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConductorToml {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub gate: GateSection,
    #[serde(default)]
    pub diagnostics: DiagnosticsSection,
    #[serde(default)]
    pub recorder: RecorderSection,
    #[serde(default)]
    pub run: RunSection,
}

impl ConductorToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse conductor.toml")
    }

    /// Load `conductor.toml` from a directory, falling back to defaults
    /// when the file does not exist.
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize conductor.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// The LLM command, with fallback to the environment.
    pub fn llm_command(&self) -> String {
        self.llm
            .command
            .clone()
            .or_else(|| std::env::var("CONDUCTOR_LLM_CMD").ok())
            .unwrap_or_else(|| "claude".to_string())
    }

    /// A command gate configured from the `[gate]` section. The caller
    /// attaches an approver separately.
    pub fn build_gate(&self) -> CommandGate {
        let mut gate = CommandGate::new()
            .with_timeout_secs(self.gate.timeout_secs)
            .with_max_output_bytes(self.gate.max_output_bytes);
        for command in &self.gate.auto_approve {
            gate.set_policy(command, CommandPolicy::AutoApprove);
        }
        // Deny entries land last so a conflicting entry stays denied.
        for command in &self.gate.deny {
            gate.set_policy(command, CommandPolicy::Deny);
        }
        gate
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if let Some(command) = &self.llm.command
            && command.trim().is_empty()
        {
            warnings.push("llm.command is empty; agents cannot be dispatched".to_string());
        }
        if self.llm.timeout_secs == 0 {
            warnings.push("llm.timeout_secs is 0; every agent call would time out".to_string());
        }
        if self.gate.timeout_secs == 0 {
            warnings.push("gate.timeout_secs is 0; every command would time out".to_string());
        }
        for command in &self.gate.auto_approve {
            if self.gate.deny.contains(command) {
                warnings.push(format!(
                    "Command '{}' is listed in both gate.auto_approve and gate.deny; deny wins",
                    command
                ));
            }
        }
        if self.diagnostics.max_iterations == 0 {
            warnings.push(
                "diagnostics.max_iterations is 0; the repair loop clamps this to 1".to_string(),
            );
        }
        if self.recorder.capacity == 0 {
            warnings.push("recorder.capacity is 0; the queue clamps this to 1".to_string());
        }
        if self.run.output_dir.as_os_str().is_empty() {
            warnings
                .push("run.output_dir is empty; runs would land in the working directory".to_string());
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::tempdir;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    // =========================================
    // Parsing and defaults
    // =========================================

    #[test]
    fn test_empty_document_is_default() {
        let config = ConductorToml::parse("").unwrap();
        assert_eq!(config.llm.timeout_secs, 300);
        assert_eq!(config.gate.timeout_secs, 60);
        assert_eq!(config.gate.max_output_bytes, 16_384);
        assert_eq!(config.diagnostics.max_iterations, 5);
        assert_eq!(config.diagnostics.failure_threshold, 3);
        assert!(config.diagnostics.bridge_command.is_none());
        assert!(config.recorder.enabled);
        assert_eq!(config.recorder.capacity, 32);
        assert_eq!(config.run.output_dir, PathBuf::from(".conductor"));
        assert!(config.run.deadline_secs.is_none());
    }

    #[test]
    fn test_parse_full_document() {
        let content = r#"
[llm]
command = "my-llm"
args = ["-p", "--json"]
timeout_secs = 120

[gate]
timeout_secs = 30
max_output_bytes = 4096
auto_approve = ["make test"]
deny = ["terraform destroy"]

[diagnostics]
bridge_command = "conductor-bridge"
max_iterations = 7
failure_threshold = 2
action_timeout_secs = 10
error_screenshot = false

[recorder]
enabled = false
capacity = 4
archive_dir = "/tmp/archive"

[run]
output_dir = "out"
deadline_secs = 900
"#;
        let config = ConductorToml::parse(content).unwrap();
        assert_eq!(config.llm.command.as_deref(), Some("my-llm"));
        assert_eq!(config.llm.args, vec!["-p", "--json"]);
        assert_eq!(config.llm.timeout_secs, 120);
        assert_eq!(config.gate.timeout_secs, 30);
        assert_eq!(config.gate.auto_approve, vec!["make test"]);
        assert_eq!(config.gate.deny, vec!["terraform destroy"]);
        assert_eq!(
            config.diagnostics.bridge_command.as_deref(),
            Some("conductor-bridge")
        );
        assert_eq!(config.diagnostics.max_iterations, 7);
        assert!(!config.diagnostics.error_screenshot);
        assert!(!config.recorder.enabled);
        assert_eq!(
            config.recorder.archive_dir,
            Some(PathBuf::from("/tmp/archive"))
        );
        assert_eq!(config.run.output_dir, PathBuf::from("out"));
        assert_eq!(config.run.deadline_secs, Some(900));
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let content = r#"
[gate]
timeout_secs = 5
"#;
        let config = ConductorToml::parse(content).unwrap();
        assert_eq!(config.gate.timeout_secs, 5);
        assert_eq!(config.gate.max_output_bytes, 16_384);
        assert_eq!(config.llm.timeout_secs, 300);
    }

    #[test]
    fn test_parse_invalid_toml_errors() {
        let result = ConductorToml::parse("not [valid toml");
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to parse conductor.toml")
        );
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = tempdir().unwrap();
        let config = ConductorToml::load_or_default(dir.path()).unwrap();
        assert_eq!(config.gate.timeout_secs, 60);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);

        let mut config = ConductorToml::default();
        config.llm.command = Some("my-llm".to_string());
        config.gate.auto_approve.push("make test".to_string());
        config.run.deadline_secs = Some(600);
        config.save(&path).unwrap();

        let loaded = ConductorToml::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded.llm.command.as_deref(), Some("my-llm"));
        assert_eq!(loaded.gate.auto_approve, vec!["make test"]);
        assert_eq!(loaded.run.deadline_secs, Some(600));
    }

    // =========================================
    // LLM command resolution
    // =========================================

    #[test]
    fn test_llm_command_priority() {
        let _guard = ENV_MUTEX.lock().unwrap();

        // Save and clear CONDUCTOR_LLM_CMD to isolate from other tests
        let saved = std::env::var("CONDUCTOR_LLM_CMD").ok();
        unsafe { std::env::remove_var("CONDUCTOR_LLM_CMD") };

        let config = ConductorToml::default();
        assert_eq!(config.llm_command(), "claude");

        unsafe { std::env::set_var("CONDUCTOR_LLM_CMD", "env-llm") };
        assert_eq!(config.llm_command(), "env-llm");

        // The file setting takes precedence over the environment
        let config = ConductorToml::parse("[llm]\ncommand = \"file-llm\"\n").unwrap();
        assert_eq!(config.llm_command(), "file-llm");

        unsafe { std::env::remove_var("CONDUCTOR_LLM_CMD") };
        if let Some(val) = saved {
            unsafe { std::env::set_var("CONDUCTOR_LLM_CMD", val) };
        }
    }

    // =========================================
    // Gate construction
    // =========================================

    #[test]
    fn test_build_gate_applies_table_entries() {
        let content = r#"
[gate]
auto_approve = ["make test"]
deny = ["terraform destroy"]
"#;
        let config = ConductorToml::parse(content).unwrap();
        let gate = config.build_gate();
        assert_eq!(
            gate.resolve_policy("make test"),
            CommandPolicy::AutoApprove
        );
        assert_eq!(
            gate.resolve_policy("terraform destroy -auto-approve"),
            CommandPolicy::Deny
        );
    }

    #[test]
    fn test_build_gate_conflict_prefers_deny() {
        let content = r#"
[gate]
auto_approve = ["make deploy"]
deny = ["make deploy"]
"#;
        let config = ConductorToml::parse(content).unwrap();
        let gate = config.build_gate();
        assert_eq!(gate.resolve_policy("make deploy"), CommandPolicy::Deny);
    }

    // =========================================
    // Validation
    // =========================================

    #[test]
    fn test_validate_default_is_clean() {
        assert!(ConductorToml::default().validate().is_empty());
    }

    #[test]
    fn test_validate_flags_policy_conflict() {
        let content = r#"
[gate]
auto_approve = ["make deploy"]
deny = ["make deploy"]
"#;
        let config = ConductorToml::parse(content).unwrap();
        let warnings = config.validate();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("make deploy"));
        assert!(warnings[0].contains("deny wins"));
    }

    #[test]
    fn test_validate_flags_zero_bounds() {
        let content = r#"
[llm]
timeout_secs = 0

[gate]
timeout_secs = 0

[recorder]
capacity = 0
"#;
        let config = ConductorToml::parse(content).unwrap();
        let warnings = config.validate();
        assert_eq!(warnings.len(), 3);
        assert!(warnings.iter().any(|w| w.contains("llm.timeout_secs")));
        assert!(warnings.iter().any(|w| w.contains("gate.timeout_secs")));
        assert!(warnings.iter().any(|w| w.contains("recorder.capacity")));
    }

    #[test]
    fn test_validate_flags_empty_llm_command() {
        let config = ConductorToml::parse("[llm]\ncommand = \"  \"\n").unwrap();
        let warnings = config.validate();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("llm.command is empty"));
    }
}
