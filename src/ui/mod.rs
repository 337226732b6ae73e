pub mod approval;
pub mod icons;
pub mod progress;

pub use approval::{InteractiveCommandApprover, InteractiveStepApprover, TerminalEscalation};
pub use progress::RunUI;
