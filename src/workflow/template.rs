//! Strict `{{marker}}` substitution for step input templates.
//!
//! Markers take three forms: `{{task}}`, `{{name}}` for a caller-context
//! value or a prior step output, and `{{step_outputs.name}}` for a prior
//! step output explicitly. A marker with no value behind it is a hard
//! error; rendering never leaves a marker in the output.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::errors::TemplateError;
use crate::util::truncate_chars;

static MARKER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_][A-Za-z0-9_.-]*)\s*\}\}").unwrap());

/// Assemble the substitution map for one step invocation.
///
/// Prior outputs are reachable both as `{{name}}` and `{{step_outputs.name}}`.
/// Caller context overrides a same-named prior output; the task text always
/// wins for `{{task}}`.
pub fn build_vars(
    task: &str,
    context: &HashMap<String, String>,
    outputs: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    for (id, output) in outputs {
        vars.insert(id.clone(), output.clone());
        vars.insert(format!("step_outputs.{}", id), output.clone());
    }
    for (key, value) in context {
        vars.insert(key.clone(), value.clone());
    }
    vars.insert("task".to_string(), task.to_string());
    vars
}

/// Substitute every `{{marker}}` in `template` from `vars`.
///
/// A marker whose name is absent from `vars` fails with
/// [`TemplateError::MissingKey`]; leftover brace pairs (malformed markers)
/// fail with [`TemplateError::UnclosedMarker`]. Substitution is a single
/// pass, so values containing marker syntax are not re-expanded.
pub fn render_template(
    template: &str,
    vars: &HashMap<String, String>,
) -> Result<String, TemplateError> {
    let mut missing: Option<String> = None;
    let rendered = MARKER_REGEX.replace_all(template, |caps: &regex::Captures<'_>| {
        let key = &caps[1];
        match vars.get(key) {
            Some(value) => value.clone(),
            None => {
                if missing.is_none() {
                    missing = Some(key.to_string());
                }
                String::new()
            }
        }
    });

    if let Some(key) = missing {
        return Err(TemplateError::MissingKey { key });
    }

    let rendered = rendered.into_owned();
    if let Some(pos) = rendered.find("{{").or_else(|| rendered.find("}}")) {
        return Err(TemplateError::UnclosedMarker {
            found: truncate_chars(&rendered[pos..], 24),
        });
    }

    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_render_task_marker() {
        let out = render_template("Do: {{task}}", &vars(&[("task", "ship it")])).unwrap();
        assert_eq!(out, "Do: ship it");
    }

    #[test]
    fn test_render_step_output_markers() {
        let v = vars(&[
            ("task", "t"),
            ("design", "the schema"),
            ("step_outputs.design", "the schema"),
        ]);
        let out = render_template("Use {{design}} and {{step_outputs.design}}", &v).unwrap();
        assert_eq!(out, "Use the schema and the schema");
    }

    #[test]
    fn test_render_tolerates_marker_whitespace() {
        let out = render_template("{{ task }}", &vars(&[("task", "x")])).unwrap();
        assert_eq!(out, "x");
    }

    #[test]
    fn test_render_missing_key_is_hard_error() {
        let err = render_template("Use {{step_outputs.design}}", &vars(&[("task", "t")]))
            .unwrap_err();
        match err {
            TemplateError::MissingKey { key } => assert_eq!(key, "step_outputs.design"),
            other => panic!("Expected MissingKey, got {:?}", other),
        }
    }

    #[test]
    fn test_render_malformed_marker_is_error() {
        let err = render_template("broken {{task", &vars(&[("task", "t")])).unwrap_err();
        assert!(matches!(err, TemplateError::UnclosedMarker { .. }));
    }

    #[test]
    fn test_render_leaves_no_braces() {
        let v = vars(&[("task", "build"), ("design", "schema")]);
        let out = render_template("{{task}} with {{design}}", &v).unwrap();
        assert!(!out.contains("{{"));
        assert!(!out.contains("}}"));
    }

    #[test]
    fn test_render_idempotent_on_substituted_text() {
        let v = vars(&[("task", "build"), ("design", "schema")]);
        let once = render_template("{{task}} with {{design}}", &v).unwrap();
        let twice = render_template(&once, &v).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_render_single_pass_does_not_reexpand_values() {
        // A value containing marker syntax is rejected by the leftover-brace
        // check rather than expanded a second time.
        let v = vars(&[("task", "see {{design}}"), ("design", "schema")]);
        let err = render_template("{{task}}", &v).unwrap_err();
        assert!(matches!(err, TemplateError::UnclosedMarker { .. }));
    }

    #[test]
    fn test_build_vars_precedence() {
        let mut outputs = HashMap::new();
        outputs.insert("design".to_string(), "from step".to_string());
        let mut context = HashMap::new();
        context.insert("design".to_string(), "from caller".to_string());
        context.insert("task".to_string(), "shadowed".to_string());

        let v = build_vars("the real task", &context, &outputs);
        assert_eq!(v["design"], "from caller");
        assert_eq!(v["step_outputs.design"], "from step");
        assert_eq!(v["task"], "the real task");
    }

    #[test]
    fn test_two_step_output_flows_into_next_input() {
        let mut outputs = HashMap::new();
        outputs.insert("step1".to_string(), "X".to_string());
        let v = build_vars("t", &HashMap::new(), &outputs);
        let out = render_template("Previous: {{step_outputs.step1}}", &v).unwrap();
        assert!(out.contains('X'));
        assert!(!out.contains("step_outputs"));
    }
}
