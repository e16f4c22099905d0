use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// ralph-tui — orchestrates AI coding agents against a task tracker, one
/// working directory at a time.
#[derive(Parser, Debug)]
#[command(name = "ralph-tui", version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scaffold `ralph.toml` and `.ralph-tui/` in the current directory
    Init(InitArgs),
    /// Check local environment health (agents, auth, git, disk)
    Doctor(DoctorArgs),
    /// Drive the sequential engine (or, with --parallel, the parallel executor)
    Run(RunArgs),
    /// Resume a previously interrupted session after crash reconciliation
    Resume(ResumeArgs),
    /// Show the current session's status without acquiring the lock
    Status(StatusArgs),
    /// Stream logs for the current session
    Logs(LogsArgs),
    /// Send a cancellation signal to the locked process
    Stop(StopArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Tracker backend to use (only "file" ships as a default implementation)
    #[arg(long, default_value = "file")]
    pub tracker: String,

    /// Agent to use (claude, codex, gemini, opencode)
    #[arg(long, default_value = "codex")]
    pub agent: String,

    /// Model override passed to the agent binary
    #[arg(long)]
    pub model: Option<String>,

    /// Maximum number of iterations before stopping (0 = unlimited)
    #[arg(long, default_value = "20")]
    pub max_iterations: u32,

    /// Per-iteration timeout in seconds (0 = infinite)
    #[arg(long, default_value = "600")]
    pub timeout: u64,

    /// Kill agent if it produces no output for this many seconds
    #[arg(long, default_value = "120")]
    pub stall_timeout: u64,

    /// Maximum consecutive failures before circuit-breaking
    #[arg(long, default_value = "3")]
    pub max_failures: u32,

    /// Run every task in its own git worktree, without fan-out
    #[arg(long, conflicts_with = "parallel")]
    pub worktree: bool,

    /// Run tasks in parallel, N workers at a time, through the Parallel Executor
    #[arg(long)]
    pub parallel: Option<usize>,

    /// Project directory (defaults to current directory)
    #[arg(long)]
    pub workdir: Option<PathBuf>,

    /// Webhook URL to POST lifecycle events to
    #[arg(long)]
    pub hook_url: Option<String>,

    /// Bearer token for webhook authentication
    #[arg(long)]
    pub hook_token: Option<String>,

    /// Stream agent output to the terminal in real time
    #[arg(long, short)]
    pub verbose: bool,
}

#[derive(Args, Debug)]
pub struct ResumeArgs {
    /// Project directory (defaults to current directory)
    #[arg(long)]
    pub workdir: Option<PathBuf>,

    /// Webhook URL to POST lifecycle events to
    #[arg(long)]
    pub hook_url: Option<String>,

    /// Bearer token for webhook authentication
    #[arg(long)]
    pub hook_token: Option<String>,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Project directory to check (defaults to current directory)
    #[arg(long)]
    pub workdir: Option<PathBuf>,

    /// Emit machine-readable JSON instead of a human summary
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Follow (tail) the active log in real time
    #[arg(long, short)]
    pub follow: bool,

    /// Project directory (defaults to current directory)
    #[arg(long)]
    pub workdir: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct StopArgs {
    /// Stop every ralph-tui session found under workdir (currently: the one session per cwd)
    #[arg(long)]
    pub all: bool,

    /// Project directory holding the lock file (defaults to current directory)
    #[arg(long)]
    pub workdir: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct InitArgs {}

#[derive(Args, Debug)]
pub struct DoctorArgs {
    /// Directory to check (defaults to current directory)
    #[arg(long)]
    pub workdir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::{Cli, Commands};
    use clap::Parser;
    use std::path::PathBuf;

    #[test]
    fn run_subcommand_parses_with_defaults() {
        let cli = Cli::try_parse_from(["ralph-tui", "run"]).expect("parse should succeed");
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.agent, "codex");
                assert_eq!(args.tracker, "file");
                assert_eq!(args.max_iterations, 20);
                assert!(args.parallel.is_none());
                assert!(!args.worktree);
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn run_subcommand_parses_parallel_flag() {
        let cli = Cli::try_parse_from(["ralph-tui", "run", "--parallel", "3"]).expect("parse should succeed");
        match cli.command {
            Commands::Run(args) => assert_eq!(args.parallel, Some(3)),
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn run_rejects_worktree_and_parallel_together() {
        let err = Cli::try_parse_from(["ralph-tui", "run", "--worktree", "--parallel", "2"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn init_subcommand_parses_without_args() {
        let cli = Cli::try_parse_from(["ralph-tui", "init"]).expect("parse should succeed");
        assert!(matches!(cli.command, Commands::Init(_)));
    }

    #[test]
    fn doctor_subcommand_parses_without_args() {
        let cli = Cli::try_parse_from(["ralph-tui", "doctor"]).expect("parse should succeed");
        match cli.command {
            Commands::Doctor(args) => assert!(args.workdir.is_none()),
            _ => panic!("expected doctor command"),
        }
    }

    #[test]
    fn status_subcommand_parses_json_flag() {
        let cli = Cli::try_parse_from(["ralph-tui", "status", "--json"]).expect("parse should succeed");
        match cli.command {
            Commands::Status(args) => assert!(args.json),
            _ => panic!("expected status command"),
        }
    }

    #[test]
    fn stop_subcommand_parses_all_flag() {
        let cli = Cli::try_parse_from(["ralph-tui", "stop", "--all"]).expect("parse should succeed");
        match cli.command {
            Commands::Stop(args) => assert!(args.all),
            _ => panic!("expected stop command"),
        }
    }

    #[test]
    fn resume_subcommand_parses_workdir() {
        let cli = Cli::try_parse_from(["ralph-tui", "resume", "--workdir", "/tmp/proj"]).expect("parse should succeed");
        match cli.command {
            Commands::Resume(args) => assert_eq!(args.workdir, Some(PathBuf::from("/tmp/proj"))),
            _ => panic!("expected resume command"),
        }
    }

    #[test]
    fn unknown_flags_produce_helpful_errors() {
        let err = match Cli::try_parse_from(["ralph-tui", "run", "--bogus"]) {
            Ok(_) => panic!("unknown flag should fail"),
            Err(err) => err,
        };
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
        let rendered = err.to_string();
        assert!(rendered.contains("--bogus"));
    }
}
