//! Artifact extraction and persistence.
//!
//! Agents return plain text; anything worth keeping rides in fenced code
//! blocks. The store scans those blocks out (the info line may carry a
//! filename after the language), groups them per step, and writes them
//! under the run's output directory with a JSON manifest.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

static FENCE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^```([A-Za-z0-9_+#.-]*)[ \t]*([^\n]*)\n((?s:.*?))^```[ \t]*$")
        .unwrap()
});

/// One extracted fenced block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    /// Relative path to save under, from the fence info line when given.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub content: String,
}

/// Artifacts extracted from one step's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactCollection {
    pub run_id: String,
    pub step_id: String,
    pub artifacts: Vec<Artifact>,
    pub created_at: DateTime<Utc>,
}

impl ArtifactCollection {
    pub fn new(run_id: &str, step_id: &str, artifacts: Vec<Artifact>) -> Self {
        Self {
            run_id: run_id.to_string(),
            step_id: step_id.to_string(),
            artifacts,
            created_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

/// Filesystem-backed artifact storage rooted at an output directory.
pub struct ArtifactStore {
    output_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
        }
    }

    /// Directory everything for a run lands under.
    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.output_dir.join("runs").join(run_id)
    }

    /// Scan fenced code blocks out of agent output.
    pub fn extract_from_text(&self, text: &str, run_id: &str) -> Vec<Artifact> {
        let run_prefix: String = run_id.chars().take(8).collect();
        let mut artifacts = Vec::new();
        for (index, captures) in FENCE_REGEX.captures_iter(text).enumerate() {
            let language = captures
                .get(1)
                .map(|m| m.as_str().trim())
                .filter(|s| !s.is_empty())
                .map(str::to_lowercase);
            let info_name = captures
                .get(2)
                .map(|m| m.as_str().trim())
                .filter(|s| !s.is_empty());
            let content = captures.get(3).map(|m| m.as_str()).unwrap_or_default();

            let name = match info_name {
                Some(name) => name.to_string(),
                None => format!(
                    "artifact-{}.{}",
                    index + 1,
                    extension_for(language.as_deref())
                ),
            };
            artifacts.push(Artifact {
                id: format!("{}-{}", run_prefix, index + 1),
                name,
                language,
                content: content.to_string(),
            });
        }
        tracing::debug!(run_id, count = artifacts.len(), "extracted artifacts");
        artifacts
    }

    /// Write a collection to disk and return the directory it landed in.
    pub fn save_collection(&self, collection: &ArtifactCollection) -> Result<PathBuf> {
        let dir = self
            .run_dir(&collection.run_id)
            .join("artifacts")
            .join(&collection.step_id);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create artifact dir: {}", dir.display()))?;

        for artifact in &collection.artifacts {
            let relative = sanitize_relative(&artifact.name);
            let path = dir.join(&relative);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create artifact subdir: {}", parent.display())
                })?;
            }
            fs::write(&path, &artifact.content)
                .with_context(|| format!("Failed to write artifact: {}", path.display()))?;
        }

        let manifest = serde_json::to_string_pretty(collection)
            .context("Failed to serialize artifact manifest")?;
        fs::write(dir.join("manifest.json"), manifest)
            .context("Failed to write artifact manifest")?;

        Ok(dir)
    }
}

/// Strip anything that could escape the artifact directory: absolute
/// roots, drive prefixes, and parent components.
fn sanitize_relative(name: &str) -> PathBuf {
    let mut clean = PathBuf::new();
    for component in Path::new(name).components() {
        if let Component::Normal(part) = component {
            clean.push(part);
        }
    }
    if clean.as_os_str().is_empty() {
        clean.push("artifact.txt");
    }
    clean
}

fn extension_for(language: Option<&str>) -> &'static str {
    match language {
        Some("rust") => "rs",
        Some("python") => "py",
        Some("javascript") | Some("jsx") => "js",
        Some("typescript") | Some("tsx") => "ts",
        Some("html") => "html",
        Some("css") => "css",
        Some("json") => "json",
        Some("yaml") | Some("yml") => "yaml",
        Some("toml") => "toml",
        Some("sql") => "sql",
        Some("bash") | Some("sh") | Some("shell") => "sh",
        _ => "txt",
    }
}
