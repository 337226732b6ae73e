//! Workflow definition listing, the `conductor workflows` subcommand.

use anyhow::{Context, Result};
use console::style;
use std::path::{Path, PathBuf};

use conductor::ui::icons::{CHECK, CROSS};
use conductor::workflow::Workflow;

/// List every workflow definition under `dir`, validating each one.
pub fn cmd_workflows(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        anyhow::bail!("Workflow directory not found: {}", dir.display());
    }

    let paths = workflow_files(dir)?;
    if paths.is_empty() {
        println!("No workflow definitions in {}", dir.display());
        return Ok(());
    }

    for path in paths {
        match Workflow::load(&path) {
            Ok(workflow) => {
                println!(
                    "{} {} ({} step(s), roles: {})",
                    CHECK,
                    style(&workflow.id).bold(),
                    workflow.steps.len(),
                    workflow.roles().join(", ")
                );
                if !workflow.description.is_empty() {
                    println!("    {}", style(&workflow.description).dim());
                }
                println!("    {}", style(path.display()).dim());
            }
            Err(e) => {
                println!("{} {}", CROSS, style(path.display()).bold());
                println!("    {}", style(format!("{e:#}")).red());
            }
        }
    }
    Ok(())
}

/// YAML files under `dir`, sorted for stable output.
fn workflow_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read workflow directory: {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| is_workflow_file(path))
        .collect();
    paths.sort();
    Ok(paths)
}

fn is_workflow_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn is_workflow_file_accepts_yaml_extensions() {
        assert!(is_workflow_file(Path::new("a.yaml")));
        assert!(is_workflow_file(Path::new("a.yml")));
        assert!(is_workflow_file(Path::new("a.YAML")));
        assert!(!is_workflow_file(Path::new("a.toml")));
        assert!(!is_workflow_file(Path::new("yaml")));
    }

    #[test]
    fn workflow_files_sorts_and_filters() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b.yaml"), "").unwrap();
        fs::write(dir.path().join("a.yml"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();

        let paths = workflow_files(dir.path()).unwrap();
        let names: Vec<_> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.yml", "b.yaml"]);
    }

    #[test]
    fn cmd_workflows_reports_valid_and_broken_definitions() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("good.yaml"),
            r#"
id: pipeline
name: Pipeline
steps:
  - id: design
    role: architect
    input: "Design {{task}}"
"#,
        )
        .unwrap();
        fs::write(dir.path().join("broken.yaml"), "steps: [{ id: 3 ]").unwrap();

        cmd_workflows(dir.path()).unwrap();
    }

    #[test]
    fn cmd_workflows_rejects_missing_directory() {
        let err = cmd_workflows(Path::new("/nonexistent/workflows")).unwrap_err();
        assert!(err.to_string().contains("Workflow directory not found"));
    }
}
