//! Diagnostic auto-repair loop.
//!
//! When a step's output must additionally pass a live check (a page that
//! renders, a flow that completes), the repair loop re-runs the step,
//! drives a browser through a scripted action sequence, and records the
//! evidence. Consecutive failures past a threshold trigger a one-shot
//! LLM meta-analysis of the failure pattern; iteration caps keep the
//! whole thing bounded.

pub mod action;
pub mod analyzer;
pub mod bridge;
pub mod capture;
pub mod monitor;
pub mod repair;

pub use action::BrowserAction;
pub use analyzer::{MetaAnalysis, MetaAnalyzer};
pub use bridge::BridgeDriver;
pub use capture::{
    BrowserDriver, ConsoleLevel, ConsoleMessage, DiagnosticCapture, NetworkRequest, NoopDriver,
};
pub use monitor::{IterationMonitor, IterationRecord, DEFAULT_FAILURE_THRESHOLD};
pub use repair::{DiagnosticsReport, RepairLoop, DEFAULT_MAX_ITERATIONS};
