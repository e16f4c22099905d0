//! Structured logging setup. Replaces the teacher's bare `println!`/`eprintln!`
//! calls with `tracing` spans around iterations, merges, and worktree operations.

use tracing_subscriber::EnvFilter;

/// Initialize the global `tracing` subscriber.
///
/// Honors `RUST_LOG`; defaults to `info` for this crate and `warn` elsewhere
/// so a plain `ralph-tui run` doesn't drown the operator in dependency noise.
pub fn init(verbose: bool) {
    let default_directive = if verbose {
        "ralph_tui=debug,info"
    } else {
        "ralph_tui=info,warn"
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
