use crate::ui::icons::{CHECK, CROSS, FOLDER, SCOPE, SKIP, SPARKLE};
use crate::util::truncate_chars;
use crate::workflow::orchestrator::StepObserver;
use crate::workflow::step::{StepResult, StepStatus, TeamResult, WorkflowStep};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

/// Terminal UI for a workflow run, rendered via `indicatif` progress bars.
///
/// Two bars are stacked vertically:
/// - Step bar — tracks how many steps have finished
/// - Status bar — spinner naming the step currently executing
///
/// All methods coordinate output via `indicatif`'s `MultiProgress`, so the
/// struct doubles as the run loop's [`StepObserver`].
pub struct RunUI {
    multi: MultiProgress,
    step_bar: ProgressBar,
    status_bar: ProgressBar,
    verbose: bool,
}

impl RunUI {
    /// Create the UI and add both progress bars to the multiplex renderer.
    ///
    /// # Arguments
    /// * `total_steps` — step count of the workflow, sizes the step bar
    /// * `verbose` — when `true`, agent output previews are printed per step
    pub fn new(total_steps: u64, verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let step_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");

        let step_bar = multi.add(ProgressBar::new(total_steps));
        step_bar.set_style(step_style);
        step_bar.set_prefix("Steps");

        let status_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");

        let status_bar = multi.add(ProgressBar::new_spinner());
        status_bar.set_style(status_style);
        status_bar.set_prefix(" Step");

        Self {
            multi,
            step_bar,
            status_bar,
            verbose,
        }
    }

    /// Print a line via `MultiProgress`, falling back to `eprintln!` if the
    /// rich UI fails. Keeps failure banners visible on dumb terminals.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    /// Print a full-width cyan separator line.
    pub fn print_separator(&self) {
        self.print_line(format!("{}", style("═".repeat(70)).cyan()));
    }

    /// Print the banner block before the first step executes.
    pub fn print_run_header(&self, workflow_name: &str, task: &str, total_steps: usize) {
        self.print_line("");
        self.print_separator();
        self.print_line(format!(
            "{} Workflow: {}",
            style("▶").green().bold(),
            style(workflow_name).yellow().bold()
        ));
        self.print_separator();
        self.print_line("");
        self.print_line(format!("{}  {}", style("Task:").dim(), task));
        self.print_line(format!("{}  {} steps", style("Plan:").dim(), total_steps));
        self.print_line("");
    }

    /// Print the closing banner once the run has finished.
    pub fn print_run_summary(&self, result: &TeamResult) {
        self.step_bar.finish_and_clear();
        self.status_bar.finish_and_clear();

        self.print_line("");
        self.print_separator();
        if result.success {
            self.print_line(format!(
                "{} Run complete: {}/{} steps in {}",
                SPARKLE,
                style(result.completed_steps()).green().bold(),
                result.steps.len(),
                format_duration_ms(result.duration_ms())
            ));
        } else {
            self.print_line(format!(
                "{} Run failed: {}/{} steps completed",
                CROSS,
                style(result.completed_steps()).red().bold(),
                result.steps.len()
            ));
            if let Some(error) = &result.error {
                self.print_line(format!("   {} {}", style("Error:").dim(), error));
            }
        }
        self.print_separator();
    }

    fn step_started(&self, step: &WorkflowStep, index: usize, total: usize) {
        self.status_bar.set_message(format!(
            "{}/{} {} {}",
            index + 1,
            total,
            style(&step.id).yellow(),
            style(format!("({})", step.role)).dim()
        ));
        self.status_bar
            .enable_steady_tick(Duration::from_millis(100));
    }

    fn step_finished(&self, result: &StepResult) {
        self.status_bar.disable_steady_tick();
        let id = &result.step.id;
        match result.status {
            StepStatus::Completed => {
                self.step_bar.inc(1);
                let retries = if result.retries > 0 {
                    format!(" after {} retries", result.retries)
                } else {
                    String::new()
                };
                self.print_line(format!(
                    "{} Step {} complete{} ({})",
                    CHECK,
                    style(id).green().bold(),
                    retries,
                    format_duration_ms(result.duration_ms())
                ));
            }
            StepStatus::Skipped => {
                self.step_bar.inc(1);
                self.print_line(format!(
                    "{} Step {} skipped: {}",
                    SKIP,
                    style(id).yellow().bold(),
                    result.error.as_deref().unwrap_or("step failed")
                ));
            }
            _ => {
                self.print_line(format!(
                    "{} Step {} failed: {}",
                    CROSS,
                    style(id).red().bold(),
                    result.error.as_deref().unwrap_or("unknown error")
                ));
            }
        }

        if let Some(dir) = &result.metadata.artifact_dir {
            self.print_line(format!(
                "   {}{}",
                FOLDER,
                style(dir.display()).dim()
            ));
        }
        if let Some(command) = &result.metadata.command {
            let status = if command.success() {
                style("ok").green()
            } else {
                style("failed").red()
            };
            self.print_line(format!(
                "   {} post command `{}` {}",
                style("$").dim(),
                command.command,
                status
            ));
        }
        if let Some(report) = &result.metadata.diagnostics {
            let verdict = if report.passed {
                style("passed").green()
            } else {
                style("failing").red()
            };
            self.print_line(format!(
                "   {}live check {} after {} iteration(s)",
                SCOPE, verdict, report.iterations
            ));
        }
        if self.verbose
            && let Some(output) = result.output()
        {
            self.print_line(format!(
                "   {} {}",
                style("→").dim(),
                style(truncate_chars(output, 400)).dim()
            ));
        }
    }
}

impl StepObserver for RunUI {
    fn on_step_started(&self, step: &WorkflowStep, index: usize, total: usize) {
        self.step_started(step, index, total);
    }

    fn on_step_finished(&self, result: &StepResult) {
        self.step_finished(result);
    }
}

/// `Xs` below a minute, `Xm Ys` from there on.
fn format_duration_ms(ms: i64) -> String {
    let secs = ms.max(0) / 1000;
    if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}
