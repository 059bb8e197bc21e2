mod cmd_feedback;
mod cmd_init;
mod cmd_preprocess;
mod cmd_review;
mod cmd_run;
mod cmd_runs;
mod logging;
mod workspace;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "aloe", version, about = "Cluster, triage and follow up on error logs")]
struct Cli {
    /// Debug-level diagnostics (overrides ALOE_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,
    /// Emit diagnostics as JSON lines on stderr
    #[arg(long, global = true)]
    json_logs: bool,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Initialize a new .aloe/ workspace
    Init,
    /// Fetch logs, normalize and cluster them without calling any service
    Preprocess {
        /// Maximum clusters to print
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Output clusters as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run the full pipeline: cluster, triage, plan and execute actions
    Run {
        /// Who decides which actions run (defaults to plan.mode in config)
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,
        /// Also print run events as JSON lines on stdout
        #[arg(long)]
        json_events: bool,
    },
    /// Review the ticket drafts of a run
    Review {
        /// Run id (default: latest run)
        #[arg(long)]
        run: Option<String>,
    },
    /// Inspect recorded review decisions
    Feedback {
        #[command(subcommand)]
        cmd: FeedbackCmd,
    },
    /// List past runs
    Runs {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum FeedbackCmd {
    /// Latest decision per cluster signature
    List {
        #[arg(long)]
        json: bool,
    },
    /// Full decision history of one signature
    Show { signature: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Orchestrator,
    Baseline,
}

impl From<ModeArg> for aloe_core::config::PlanMode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Orchestrator => Self::Orchestrator,
            ModeArg::Baseline => Self::Baseline,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.json_logs);
    let cwd = std::env::current_dir()?;

    match cli.cmd {
        Command::Init => cmd_init::execute(&cwd),
        Command::Preprocess { limit, json } => {
            cmd_preprocess::execute(&workspace::Workspace::open(&cwd)?, limit, json)
        }
        Command::Run { mode, json_events } => cmd_run::execute(
            &workspace::Workspace::open(&cwd)?,
            mode.map(Into::into),
            json_events,
        ),
        Command::Review { run } => {
            cmd_review::execute(&workspace::Workspace::open(&cwd)?, run.as_deref())
        }
        Command::Feedback { cmd } => {
            let ws = workspace::Workspace::open(&cwd)?;
            match cmd {
                FeedbackCmd::List { json } => cmd_feedback::list(&ws, json),
                FeedbackCmd::Show { signature } => cmd_feedback::show(&ws, &signature),
            }
        }
        Command::Runs { json } => cmd_runs::execute(&workspace::Workspace::open(&cwd)?, json),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_flags() {
        let cli = Cli::try_parse_from(["aloe", "run", "--mode", "baseline", "--json-events", "-v"]).unwrap();
        assert!(cli.verbose);
        match cli.cmd {
            Command::Run { mode, json_events } => {
                assert!(matches!(mode, Some(ModeArg::Baseline)));
                assert!(json_events);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn parses_feedback_show() {
        let cli = Cli::try_parse_from(["aloe", "feedback", "show", "0123abcd"]).unwrap();
        assert!(matches!(
            cli.cmd,
            Command::Feedback { cmd: FeedbackCmd::Show { ref signature } } if signature == "0123abcd"
        ));
        assert!(Cli::try_parse_from(["aloe", "run", "--mode", "yolo"]).is_err());
    }
}
