//! `reviewloop` CLI: run a Worker/Manager review loop for one prompt.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use reviewloop::core::budget::IterationBudget;
use reviewloop::core::classifier::classify;
use reviewloop::core::status::StatusCode;
use reviewloop::core::types::TerminationReason;
use reviewloop::exit_codes;
use reviewloop::io::config::{DEFAULT_CONFIG_FILE, WorkflowConfig, load_config, write_config};
use reviewloop::io::executor::CommandTaskExecutor;
use reviewloop::io::generator::CommandTextGenerator;
use reviewloop::logging;
use reviewloop::workflow::{LoopStop, WorkflowController, WorkflowOutcome};

#[derive(Parser)]
#[command(
    name = "reviewloop",
    version,
    about = "Worker/Manager review loop for agent tasks"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
    /// Run the loop until the Manager accepts a result or the budget runs out.
    Run(RunArgs),
    /// Print the status code a Manager verdict classifies as.
    Classify {
        verdict: String,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Task prompt.
    #[arg(long, conflicts_with = "prompt_file", required_unless_present = "prompt_file")]
    prompt: Option<String>,
    /// Read the task prompt from a file.
    #[arg(long)]
    prompt_file: Option<PathBuf>,
    /// Override `max_iterations` from config.
    #[arg(long)]
    max_iterations: Option<u32>,
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Print the outcome as JSON instead of the final text.
    #[arg(long)]
    json: bool,
}

/// JSON shape printed by `run --json`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunReport<'a> {
    run_id: &'a str,
    final_text: &'a str,
    iterations_used: u32,
    termination_reason: TerminationReason,
    last_status: StatusCode,
    stop: &'a LoopStop,
}

impl<'a> From<&'a WorkflowOutcome> for RunReport<'a> {
    fn from(outcome: &'a WorkflowOutcome) -> Self {
        Self {
            run_id: &outcome.run_id,
            final_text: &outcome.final_text,
            iterations_used: outcome.iterations_used,
            termination_reason: outcome.termination_reason(),
            last_status: outcome.last_status,
            stop: &outcome.stop,
        }
    }
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force, config } => cmd_init(&config, force),
        Command::Run(args) => cmd_run(&args),
        Command::Classify { verdict } => {
            println!("{}", classify(&verdict));
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if !force && path.exists() {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &WorkflowConfig::default())
        .with_context(|| format!("write {}", path.display()))?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_run(args: &RunArgs) -> Result<i32> {
    let config = load_config(&args.config)?;
    let prompt = read_prompt(args)?;
    let budget = IterationBudget::new(args.max_iterations.unwrap_or(config.max_iterations));

    let controller = WorkflowController::from_config(
        CommandTaskExecutor::new(&config.executor),
        CommandTextGenerator::new(&config.generator),
        &config,
    );
    let outcome = controller.run(&prompt, budget, &CancellationToken::new(), |record| {
        eprintln!("iteration {}: {}", record.index + 1, record.status);
    });

    if args.json {
        let mut payload = serde_json::to_string_pretty(&RunReport::from(&outcome))
            .context("serialize outcome")?;
        payload.push('\n');
        print!("{payload}");
    } else {
        if let LoopStop::Fatal { stage, message } = &outcome.stop {
            eprintln!("{stage} stage failed: {message}");
        }
        println!("{}", outcome.final_text);
    }
    Ok(exit_codes::for_termination(outcome.termination_reason()))
}

fn read_prompt(args: &RunArgs) -> Result<String> {
    let prompt = match (&args.prompt, &args.prompt_file) {
        (Some(prompt), _) => prompt.clone(),
        (None, Some(path)) => {
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?
        }
        (None, None) => bail!("either --prompt or --prompt-file is required"),
    };
    if prompt.trim().is_empty() {
        bail!("prompt must not be empty");
    }
    Ok(prompt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init() {
        let cli = Cli::parse_from(["reviewloop", "init"]);
        assert!(matches!(cli.command, Command::Init { force: false, .. }));
    }

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["reviewloop", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true, .. }));
    }

    #[test]
    fn parse_run_with_overrides() {
        let cli = Cli::parse_from([
            "reviewloop",
            "run",
            "--prompt",
            "Capture the portal",
            "--max-iterations",
            "3",
            "--json",
        ]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.prompt.as_deref(), Some("Capture the portal"));
        assert_eq!(args.max_iterations, Some(3));
        assert!(args.json);
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_FILE));
    }

    #[test]
    fn run_requires_a_prompt_source() {
        assert!(Cli::try_parse_from(["reviewloop", "run"]).is_err());
        assert!(
            Cli::try_parse_from(["reviewloop", "run", "--prompt", "a", "--prompt-file", "b"])
                .is_err()
        );
    }

    #[test]
    fn blank_prompt_is_rejected() {
        let cli = Cli::parse_from(["reviewloop", "run", "--prompt", "  \n"]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(read_prompt(&args).is_err());
    }
}
