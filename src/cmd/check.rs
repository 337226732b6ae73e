//! Gate policy inspection, the `conductor check` subcommand.

use anyhow::Result;
use console::style;
use std::path::Path;

use conductor::config::ConductorToml;
use conductor::gate::CommandPolicy;
use conductor::ui::icons::SHIELD;

/// Show how the configured gate would treat `command` without running it.
pub fn cmd_check(project_dir: &Path, command: &str) -> Result<()> {
    let config = ConductorToml::load_or_default(project_dir)?;
    let gate = config.build_gate();
    let policy = gate.resolve_policy(command);

    let verdict = match policy {
        CommandPolicy::AutoApprove => style("auto-approved").green().bold(),
        CommandPolicy::RequireApproval => style("requires approval").yellow().bold(),
        CommandPolicy::Deny => style("denied").red().bold(),
    };
    println!("{} {} is {}", SHIELD, style(command).cyan(), verdict);

    match policy {
        CommandPolicy::AutoApprove => {
            println!("  The gate runs this command without prompting.");
        }
        CommandPolicy::RequireApproval => {
            println!("  The gate prompts before running this command.");
            println!("  With no approver available it is refused.");
        }
        CommandPolicy::Deny => {
            println!("  The gate refuses this command outright.");
        }
    }
    Ok(())
}
