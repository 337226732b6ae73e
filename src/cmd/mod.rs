//! CLI command implementations.
//!
//! Each submodule owns one `Commands` variant:
//!
//! | Module      | Command handled |
//! |-------------|-----------------|
//! | `run`       | `Run`           |
//! | `check`     | `Check`         |
//! | `workflows` | `Workflows`     |

pub mod check;
pub mod run;
pub mod workflows;

pub use check::cmd_check;
pub use run::run_workflow;
pub use workflows::cmd_workflows;
