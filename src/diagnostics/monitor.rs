//! Per-step iteration history and the meta-analysis trigger.

use crate::diagnostics::capture::DiagnosticCapture;
use crate::util::truncate_chars;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_FAILURE_THRESHOLD: usize = 3;

/// Cap on records kept per step; oldest entries roll off first.
const MAX_ITERATION_HISTORY: usize = 50;

/// Cap on the stored fix description.
const FIX_DESCRIPTION_LIMIT: usize = 200;

/// One recorded repair attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    /// 1-indexed, scoped to the step it was recorded under.
    pub iteration: u32,
    pub error: String,
    pub fix_description: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture: Option<DiagnosticCapture>,
    pub timestamp: DateTime<Utc>,
}

/// Tracks repair attempts per step and decides when blind retrying has
/// stopped working. Histories are per-instance; `start_step` for an id
/// resets that id's history.
pub struct IterationMonitor {
    threshold: usize,
    histories: HashMap<String, Vec<IterationRecord>>,
    current: Option<String>,
}

impl IterationMonitor {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
            histories: HashMap::new(),
            current: None,
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Begin (or restart) tracking a step.
    pub fn start_step(&mut self, step_id: &str) {
        self.histories.insert(step_id.to_string(), Vec::new());
        self.current = Some(step_id.to_string());
    }

    /// Record one attempt for the current step.
    pub fn record(
        &mut self,
        error: &str,
        fix_description: &str,
        passed: bool,
        capture: Option<DiagnosticCapture>,
    ) {
        let Some(step_id) = self.current.clone() else {
            tracing::warn!("iteration recorded with no active step");
            return;
        };
        let history = self.histories.entry(step_id).or_default();
        let iteration = history.last().map(|r| r.iteration).unwrap_or(0) + 1;
        history.push(IterationRecord {
            iteration,
            error: error.to_string(),
            fix_description: truncate_chars(fix_description, FIX_DESCRIPTION_LIMIT),
            passed,
            capture,
            timestamp: Utc::now(),
        });
        if history.len() > MAX_ITERATION_HISTORY {
            history.remove(0);
        }
    }

    /// True iff the most recent `threshold` attempts for the current step
    /// all failed. Fewer attempts than the threshold never triggers.
    pub fn should_trigger_meta_analysis(&self) -> bool {
        let history = self.current_history();
        if history.len() < self.threshold {
            return false;
        }
        history[history.len() - self.threshold..]
            .iter()
            .all(|r| !r.passed)
    }

    pub fn current_history(&self) -> &[IterationRecord] {
        self.current
            .as_ref()
            .and_then(|id| self.histories.get(id))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn history(&self, step_id: &str) -> &[IterationRecord] {
        self.histories
            .get(step_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Failed attempts recorded for the current step.
    pub fn failure_count(&self) -> usize {
        self.current_history().iter().filter(|r| !r.passed).count()
    }
}

impl Default for IterationMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor_with(failures: &[bool], threshold: usize) -> IterationMonitor {
        let mut monitor = IterationMonitor::new(threshold);
        monitor.start_step("step");
        for &passed in failures {
            monitor.record("err", "fix", passed, None);
        }
        monitor
    }

    #[test]
    fn test_no_trigger_below_threshold() {
        let monitor = monitor_with(&[false, false], 3);
        assert!(!monitor.should_trigger_meta_analysis());
    }

    #[test]
    fn test_trigger_when_last_n_all_failed() {
        let monitor = monitor_with(&[false, false, false], 3);
        assert!(monitor.should_trigger_meta_analysis());
    }

    #[test]
    fn test_pass_among_last_n_blocks_trigger() {
        let monitor = monitor_with(&[false, true, false], 3);
        assert!(!monitor.should_trigger_meta_analysis());
    }

    #[test]
    fn test_old_pass_outside_window_still_triggers() {
        let monitor = monitor_with(&[true, false, false, false], 3);
        assert!(monitor.should_trigger_meta_analysis());
    }

    #[test]
    fn test_start_step_resets_history() {
        let mut monitor = monitor_with(&[false, false, false], 3);
        assert!(monitor.should_trigger_meta_analysis());

        monitor.start_step("step");
        assert!(monitor.current_history().is_empty());
        assert!(!monitor.should_trigger_meta_analysis());
    }

    #[test]
    fn test_histories_are_per_step() {
        let mut monitor = IterationMonitor::new(2);
        monitor.start_step("a");
        monitor.record("err", "fix", false, None);
        monitor.start_step("b");
        monitor.record("err", "fix", false, None);
        monitor.record("err", "fix", false, None);

        assert_eq!(monitor.history("a").len(), 1);
        assert_eq!(monitor.history("b").len(), 2);
        // current step is b, which has two straight failures
        assert!(monitor.should_trigger_meta_analysis());
    }

    #[test]
    fn test_iterations_are_one_indexed() {
        let monitor = monitor_with(&[false, false], 3);
        let history = monitor.current_history();
        assert_eq!(history[0].iteration, 1);
        assert_eq!(history[1].iteration, 2);
    }

    #[test]
    fn test_fix_description_is_truncated() {
        let mut monitor = IterationMonitor::new(3);
        monitor.start_step("step");
        monitor.record("err", &"x".repeat(500), false, None);
        assert!(monitor.current_history()[0].fix_description.len() <= 200);
        assert!(monitor.current_history()[0]
            .fix_description
            .ends_with("..."));
    }

    #[test]
    fn test_history_is_bounded() {
        let mut monitor = IterationMonitor::new(3);
        monitor.start_step("step");
        for _ in 0..60 {
            monitor.record("err", "fix", false, None);
        }
        assert_eq!(monitor.current_history().len(), 50);
        // numbering keeps counting even after old records roll off
        assert_eq!(monitor.current_history().last().unwrap().iteration, 60);
    }

    #[test]
    fn test_failure_count_ignores_passes() {
        let monitor = monitor_with(&[false, true, false], 3);
        assert_eq!(monitor.failure_count(), 2);
    }

    #[test]
    fn test_record_without_start_is_ignored() {
        let mut monitor = IterationMonitor::new(3);
        monitor.record("err", "fix", false, None);
        assert!(monitor.current_history().is_empty());
    }
}
