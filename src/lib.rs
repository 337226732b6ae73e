pub mod agent;
pub mod artifacts;
pub mod config;
pub mod diagnostics;
pub mod errors;
pub mod gate;
pub mod record;
pub mod ui;
pub mod util;
pub mod workflow;
