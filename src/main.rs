use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::parser::ValueSource;
use clap::{CommandFactory, Parser};

use ralph_tui::cli::{self, Cli, Commands};
use ralph_tui::config;
use ralph_tui::doctor;
use ralph_tui::engine::{Engine, EngineConfig, ErrorPolicy};
use ralph_tui::events::EventBus;
use ralph_tui::executor::{ExecutorConfig, ParallelExecutor};
use ralph_tui::hooks::{self, HookConfig};
use ralph_tui::journal::{self, SessionJournal};
use ralph_tui::lock::{AcquireOutcome, SessionLock};
use ralph_tui::logs;
use ralph_tui::model::SessionState;
use ralph_tui::progress::ProgressLog;
use ralph_tui::status_cmd;
use ralph_tui::stop;
use ralph_tui::tracker::{FileTracker, Tracker};

#[tokio::main]
async fn main() -> Result<()> {
    let verbose = std::env::args().any(|a| a == "-v" || a == "--verbose");
    ralph_tui::telemetry::init(verbose);

    let argv: Vec<std::ffi::OsString> = std::env::args_os().collect();
    let cli = Cli::parse_from(argv.clone());
    let matches = Cli::command().get_matches_from(argv);
    let config = config::load_config()?;

    match cli.command {
        Commands::Init(args) => init_project(args).await?,
        Commands::Doctor(args) => doctor::run_doctor(args).await?,
        Commands::Run(mut args) => {
            if let Some(run_matches) = matches.subcommand_matches("run") {
                apply_run_config(&mut args, config.as_ref(), run_matches);
            }
            let exit_code = run_session(args, config.as_ref()).await?;
            std::process::exit(exit_code);
        }
        Commands::Resume(args) => {
            let exit_code = resume_session(args).await?;
            std::process::exit(exit_code);
        }
        Commands::Status(args) => status_cmd::show_status(args).await?,
        Commands::Logs(args) => logs::show_logs(args).await?,
        Commands::Stop(args) => stop::stop_loops(args).await?,
    }

    Ok(())
}

async fn init_project(_args: cli::InitArgs) -> Result<()> {
    let workdir = std::env::current_dir().context("Cannot resolve current directory")?;

    let ralph_toml = workdir.join("ralph.toml");
    if !ralph_toml.exists() {
        std::fs::write(&ralph_toml, DEFAULT_RALPH_TOML).with_context(|| format!("Failed to write {}", ralph_toml.display()))?;
        println!("Created {}", ralph_toml.display());
    } else {
        println!("{} already exists, leaving it as-is", ralph_toml.display());
    }

    let journal = SessionJournal::new(&workdir)?;
    println!("Initialized session directory at {}", journal.ralph_dir().display());

    Ok(())
}

const DEFAULT_RALPH_TOML: &str = r#"[defaults]
agent = "codex"
max_iterations = 20
timeout = 600
stall_timeout = 120
max_failures = 3
"#;

async fn run_session(args: cli::RunArgs, file_config: Option<&config::RalphConfig>) -> Result<i32> {
    let workdir = args.workdir.clone().unwrap_or_else(|| PathBuf::from(".")).canonicalize().context("Cannot resolve workdir — does it exist?")?;

    let journal = SessionJournal::new(&workdir)?;
    let lock = SessionLock::new(journal.ralph_dir());
    match lock.acquire().context("acquiring session lock")? {
        AcquireOutcome::Acquired => {}
        AcquireOutcome::Locked(record) => {
            anyhow::bail!("a ralph-tui session is already running in {} (pid {})", workdir.display(), record.pid);
        }
    }
    let _guard = LockGuard(&lock);

    let tracker_path = journal.ralph_dir().to_path_buf();
    let tracker: Arc<dyn Tracker> = Arc::new(FileTracker::new(&tracker_path));
    tracker.initialize().await.context("initializing tracker")?;

    let events = EventBus::new();
    if let Some(url) = args.hook_url.clone() {
        hooks::register(&events, HookConfig::new(url, args.hook_token.clone()));
    }

    let exit_code = if let Some(workers) = args.parallel {
        run_parallel(&args, workdir, tracker, events, workers, file_config).await?
    } else if args.worktree {
        run_parallel(&args, workdir, tracker, events, 1, file_config).await?
    } else {
        run_sequential(&args, &workdir, journal, tracker, events, file_config).await?
    };

    Ok(exit_code)
}

async fn run_sequential(
    args: &cli::RunArgs,
    workdir: &std::path::Path,
    journal: SessionJournal,
    tracker: Arc<dyn Tracker>,
    events: EventBus,
    file_config: Option<&config::RalphConfig>,
) -> Result<i32> {
    let progress = ProgressLog::new(journal.progress_path.clone());

    let mut state = match journal.load().context("loading session journal")? {
        Some(mut state) => {
            let reconciliation = SessionJournal::reconcile(&mut state);
            if reconciliation.reconciled {
                for task_id in &reconciliation.reopened_task_ids {
                    let _ = tracker.update_task_status(task_id, ralph_tui::model::TaskStatus::Open).await;
                }
            }
            state
        }
        None => SessionState::new(workdir.display().to_string(), args.tracker.clone(), args.agent.clone(), args.max_iterations),
    };
    state.model = args.model.clone();

    let mut config = EngineConfig { max_iterations: args.max_iterations, ..EngineConfig::default() };
    config.timeout_ms = args.timeout.saturating_mul(1000);
    config.stall_timeout_ms = args.stall_timeout.saturating_mul(1000);
    config.max_consecutive_failures = args.max_failures;
    config.error_policy = ErrorPolicy::Retry;
    if let Some(defaults) = file_config.and_then(|c| c.defaults.as_ref()) {
        if let Some(order) = &defaults.fallback_order {
            if !order.is_empty() {
                config.fallback_order = order.clone();
            }
        }
        if let Some(cooldown) = defaults.rate_limit_cooldown {
            config.rate_limit_cooldown_ms = cooldown.saturating_mul(1000);
        }
    }
    if let Some(pos) = config.fallback_order.iter().position(|id| *id == args.agent) {
        config.fallback_order.rotate_left(pos);
    }
    config.model = args.model.clone();

    let engine = Engine::new(tracker, journal, progress, events, config);
    let cancel_handle = engine.cancel_handle();
    install_cancel_listener(move || cancel_handle.request_stop());

    let reason = engine.run(&mut state).await?;
    println!("stopped: {reason:?}");

    Ok(journal::exit_code_for(Some(&state)))
}

async fn run_parallel(
    args: &cli::RunArgs,
    workdir: PathBuf,
    tracker: Arc<dyn Tracker>,
    events: EventBus,
    workers: usize,
    file_config: Option<&config::RalphConfig>,
) -> Result<i32> {
    let journal = Arc::new(SessionJournal::new(&workdir)?);

    let mut config = ExecutorConfig { max_parallel_workers: workers.max(1), agent_id: args.agent.clone(), model: args.model.clone(), timeout_ms: args.timeout.saturating_mul(1000), stall_timeout_ms: args.stall_timeout.saturating_mul(1000), ..ExecutorConfig::default() };
    if let Some(worktree) = file_config.and_then(|c| c.worktree.as_ref()) {
        if let Some(max_worktrees) = worktree.max_worktrees {
            config.max_worktrees = max_worktrees;
        }
        if let Some(min_free_disk_mb) = worktree.min_free_disk_mb {
            config.min_free_disk_bytes = min_free_disk_mb.saturating_mul(1024 * 1024);
        }
    }
    if let Some(merge) = file_config.and_then(|c| c.merge.as_ref()) {
        if let Some(max_requeue_count) = merge.max_requeue_count {
            config.max_requeue_count = max_requeue_count;
        }
    }

    let executor = ParallelExecutor::new(tracker, journal, events, workdir, config);
    let cancel_handle = executor.cancel_handle();
    install_cancel_listener(move || cancel_handle.request_stop());

    let state = executor.run().await?;

    if state.failed_task_ids.is_empty() {
        Ok(0)
    } else {
        Ok(1)
    }
}

async fn resume_session(args: cli::ResumeArgs) -> Result<i32> {
    let workdir = args.workdir.unwrap_or_else(|| PathBuf::from(".")).canonicalize().context("Cannot resolve workdir — does it exist?")?;
    let journal = SessionJournal::new(&workdir)?;

    let Some(state) = journal.load().context("loading session journal")? else {
        anyhow::bail!("no session found in {}", workdir.display());
    };
    if !state.is_resumable() {
        anyhow::bail!("session {} is not resumable (status {:?})", state.session_id, state.status);
    }

    let run_args = cli::RunArgs {
        tracker: state.tracker_name.clone(),
        agent: state.agent_name.clone(),
        model: state.model.clone(),
        max_iterations: state.max_iterations,
        timeout: 600,
        stall_timeout: 120,
        max_failures: 3,
        worktree: false,
        parallel: None,
        workdir: Some(workdir),
        hook_url: args.hook_url,
        hook_token: args.hook_token,
        verbose: false,
    };
    let file_config = config::load_config()?;
    run_session(run_args, file_config.as_ref()).await
}

/// Installs Ctrl+C / SIGTERM listeners adapted from the teacher's
/// `watch/mod.rs` signal-handling pair, generalized from a single shared
/// cancel flag to an arbitrary `on_stop` trigger so both the sequential
/// engine and the parallel executor can reuse it. A second interrupt within
/// 1s of the first force-quits (§5 Cancellation double-cancel behavior)
/// instead of waiting on graceful shutdown.
fn install_cancel_listener<F>(on_stop: F)
where
    F: Fn() + Send + Sync + 'static,
{
    let last_cancel: Arc<std::sync::Mutex<Option<std::time::Instant>>> = Arc::new(std::sync::Mutex::new(None));
    let trigger: Arc<dyn Fn() + Send + Sync> = Arc::new(move || {
        let now = std::time::Instant::now();
        let mut guard = last_cancel.lock().unwrap();
        let within_grace = matches!(*guard, Some(prev) if now.duration_since(prev) < std::time::Duration::from_secs(1));
        *guard = Some(now);
        drop(guard);

        if within_grace {
            eprintln!("\nsecond interrupt within 1s — forcing exit");
            std::process::exit(130);
        }
        eprintln!("\ninterrupt received — stopping…");
        on_stop();
    });

    {
        let trigger = trigger.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                trigger();
            }
        });
    }

    #[cfg(unix)]
    {
        let trigger = trigger.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            let Ok(mut stream) = signal(SignalKind::terminate()) else { return };
            loop {
                stream.recv().await;
                trigger();
            }
        });
    }
}

struct LockGuard<'a>(&'a SessionLock);

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

fn apply_run_config(args: &mut cli::RunArgs, config: Option<&config::RalphConfig>, matches: &clap::ArgMatches) {
    let Some(config) = config else { return };

    if let Some(defaults) = &config.defaults {
        if !was_provided_by_cli(matches, "agent") {
            if let Some(agent) = &defaults.agent {
                args.agent = agent.clone();
            }
        }
        if !was_provided_by_cli(matches, "max_iterations") {
            if let Some(value) = defaults.max_iterations {
                args.max_iterations = value;
            }
        }
        if !was_provided_by_cli(matches, "timeout") {
            if let Some(value) = defaults.timeout {
                args.timeout = value;
            }
        }
        if !was_provided_by_cli(matches, "stall_timeout") {
            if let Some(value) = defaults.stall_timeout {
                args.stall_timeout = value;
            }
        }
        if !was_provided_by_cli(matches, "max_failures") {
            if let Some(value) = defaults.max_failures {
                args.max_failures = value;
            }
        }
    }

    if let Some(hooks) = &config.hooks {
        if !was_provided_by_cli(matches, "hook_url") {
            if let Some(url) = &hooks.url {
                args.hook_url = Some(url.clone());
            }
        }
        if !was_provided_by_cli(matches, "hook_token") {
            if let Some(token) = &hooks.token {
                args.hook_token = Some(token.clone());
            }
        }
    }
}

fn was_provided_by_cli(matches: &clap::ArgMatches, arg_id: &str) -> bool {
    matches.value_source(arg_id) == Some(ValueSource::CommandLine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use ralph_tui::config::{DefaultsConfig, HooksConfig, RalphConfig};

    #[test]
    fn run_uses_config_defaults_when_flags_not_set() {
        let argv = ["ralph-tui", "run"];
        let cli = Cli::parse_from(argv);
        let matches = Cli::command().try_get_matches_from(argv).expect("matches should parse");
        let run_matches = matches.subcommand_matches("run").expect("run subcommand matches");

        let mut args = match cli.command {
            Commands::Run(args) => args,
            _ => panic!("expected run command"),
        };

        let config = RalphConfig {
            defaults: Some(DefaultsConfig {
                agent: Some("claude".to_string()),
                max_iterations: Some(33),
                timeout: Some(700),
                stall_timeout: Some(99),
                max_failures: Some(4),
                fallback_order: None,
                rate_limit_cooldown: None,
            }),
            hooks: Some(HooksConfig { url: Some("https://hooks.example/ralph".to_string()), token: Some("token-abc".to_string()) }),
            worktree: None,
            merge: None,
        };

        apply_run_config(&mut args, Some(&config), run_matches);

        assert_eq!(args.agent, "claude");
        assert_eq!(args.max_iterations, 33);
        assert_eq!(args.timeout, 700);
        assert_eq!(args.stall_timeout, 99);
        assert_eq!(args.max_failures, 4);
        assert_eq!(args.hook_url.as_deref(), Some("https://hooks.example/ralph"));
        assert_eq!(args.hook_token.as_deref(), Some("token-abc"));
    }

    #[test]
    fn run_cli_flags_override_config_values() {
        let argv = ["ralph-tui", "run", "--agent", "gemini", "--max-iterations", "5", "--hook-url", "https://cli.example/hook"];
        let cli = Cli::parse_from(argv);
        let matches = Cli::command().try_get_matches_from(argv).expect("matches should parse");
        let run_matches = matches.subcommand_matches("run").expect("run subcommand matches");

        let mut args = match cli.command {
            Commands::Run(args) => args,
            _ => panic!("expected run command"),
        };

        let config = RalphConfig {
            defaults: Some(DefaultsConfig {
                agent: Some("codex".to_string()),
                max_iterations: Some(33),
                timeout: Some(700),
                stall_timeout: Some(99),
                max_failures: Some(4),
                fallback_order: None,
                rate_limit_cooldown: None,
            }),
            hooks: Some(HooksConfig { url: Some("https://config.example/hook".to_string()), token: Some("token-from-config".to_string()) }),
            worktree: None,
            merge: None,
        };

        apply_run_config(&mut args, Some(&config), run_matches);

        assert_eq!(args.agent, "gemini");
        assert_eq!(args.max_iterations, 5);
        assert_eq!(args.timeout, 700);
        assert_eq!(args.hook_url.as_deref(), Some("https://cli.example/hook"));
        assert_eq!(args.hook_token.as_deref(), Some("token-from-config"));
    }
}

/// Shared test lock for tests that mutate process-global state (PATH, env vars).
#[cfg(test)]
pub(crate) fn global_env_lock() -> &'static std::sync::Mutex<()> {
    static LOCK: std::sync::OnceLock<std::sync::Mutex<()>> = std::sync::OnceLock::new();
    LOCK.get_or_init(|| std::sync::Mutex::new(()))
}
