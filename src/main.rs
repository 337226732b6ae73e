use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "conductor")]
#[command(version, about = "LLM agent team coordinator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Approve every step and command prompt without asking
    #[arg(long, global = true)]
    pub yes: bool,

    /// Project directory holding conductor.toml and run output
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a workflow definition against a task
    Run {
        /// Path to the workflow YAML definition
        workflow: PathBuf,

        /// Task substituted for {{task}} in step inputs
        #[arg(short, long)]
        task: String,

        /// Extra template context as KEY=VALUE pairs
        #[arg(short = 'c', long = "context", value_name = "KEY=VALUE")]
        context: Vec<String>,

        /// Mark the run record for later self-improvement analysis
        #[arg(long)]
        self_improve: bool,

        /// Abort the run once this many seconds have elapsed
        #[arg(long)]
        deadline_secs: Option<u64>,
    },
    /// Show how the command gate would treat a command
    Check {
        /// The command line to classify
        command: String,
    },
    /// List and validate workflow definitions in a directory
    Workflows {
        /// Directory to scan for YAML definitions
        #[arg(long, default_value = "workflows")]
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(if cli.verbose {
            "conductor=debug"
        } else {
            "conductor=warn"
        })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Run {
            workflow,
            task,
            context,
            self_improve,
            deadline_secs,
        } => {
            let success = cmd::run_workflow(
                &cli,
                project_dir,
                workflow,
                task,
                context,
                *self_improve,
                *deadline_secs,
            )
            .await?;
            if !success {
                std::process::exit(1);
            }
        }
        Commands::Check { command } => {
            cmd::cmd_check(&project_dir, command)?;
        }
        Commands::Workflows { dir } => {
            cmd::cmd_workflows(dir)?;
        }
    }

    Ok(())
}
