//! `ralph.toml` / `~/.config/ralph-tui/config.toml` loader. Extends the
//! teacher's `defaults`/`hooks` sections with the worktree, merge, and
//! fallback-order knobs the engine and parallel executor need, while
//! keeping the teacher's local-before-global precedence.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RalphConfig {
    pub defaults: Option<DefaultsConfig>,
    pub hooks: Option<HooksConfig>,
    pub worktree: Option<WorktreeConfig>,
    pub merge: Option<MergeConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DefaultsConfig {
    pub agent: Option<String>,
    pub max_iterations: Option<u32>,
    pub timeout: Option<u64>,
    pub stall_timeout: Option<u64>,
    pub max_failures: Option<u32>,
    /// Agent ids tried in order when the current agent rate-limits (§4.5).
    pub fallback_order: Option<Vec<String>>,
    pub rate_limit_cooldown: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HooksConfig {
    pub url: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorktreeConfig {
    pub max_worktrees: Option<usize>,
    pub min_free_disk_mb: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MergeConfig {
    pub max_requeue_count: Option<u32>,
}

pub fn load_config() -> Result<Option<RalphConfig>> {
    let cwd = std::env::current_dir().context("Cannot resolve current directory")?;
    load_config_from(&cwd, home_dir().as_deref())
}

fn load_config_from(cwd: &Path, home_dir: Option<&Path>) -> Result<Option<RalphConfig>> {
    let Some(path) = find_config_path(cwd, home_dir) else {
        return Ok(None);
    };

    let raw = std::fs::read_to_string(&path).with_context(|| format!("Failed to read config file {}", path.display()))?;
    let parsed = toml::from_str::<RalphConfig>(&raw).with_context(|| format!("Failed to parse TOML config {}", path.display()))?;
    Ok(Some(parsed))
}

fn find_config_path(cwd: &Path, home_dir: Option<&Path>) -> Option<PathBuf> {
    let local = cwd.join("ralph.toml");
    if local.is_file() {
        return Some(local);
    }

    let home = home_dir?;
    let global = home.join(".config").join("ralph-tui").join("config.toml");
    if global.is_file() {
        return Some(global);
    }

    None
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}
