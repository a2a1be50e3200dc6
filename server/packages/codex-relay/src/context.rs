use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::config::RelayConfig;

static WORKDIR_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Working directory:\s*(.+)").expect("working directory marker regex")
});

/// Per-request execution parameters derived from config and prompt text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    pub working_dir: PathBuf,
    /// `None` disables the hard cutoff.
    pub hard_cutoff: Option<Duration>,
    pub idle_cutoff: Duration,
}

impl ExecutionContext {
    pub fn resolve(config: &RelayConfig, prompt: &str) -> Self {
        Self {
            working_dir: resolve_working_dir(prompt, config.workdir.as_deref()),
            hard_cutoff: config.max_run,
            idle_cutoff: config.idle_after_turn,
        }
    }
}

/// Picks the agent's working directory: a `Working directory: <path>` line in
/// the prompt, then the configured default, then the relay's own directory.
/// Candidates that are not existing directories are skipped.
pub fn resolve_working_dir(prompt: &str, configured: Option<&Path>) -> PathBuf {
    if let Some(candidate) = working_dir_from_prompt(prompt) {
        if candidate.is_dir() {
            return candidate;
        }
        tracing::debug!(path = %candidate.display(), "prompt working directory does not exist");
    }

    if let Some(configured) = configured {
        if configured.is_dir() {
            return configured.to_path_buf();
        }
        tracing::debug!(path = %configured.display(), "configured working directory does not exist");
    }

    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

pub fn working_dir_from_prompt(prompt: &str) -> Option<PathBuf> {
    let captured = WORKDIR_MARKER.captures(prompt)?.get(1)?.as_str();
    let cleaned = captured.trim().trim_matches('"').trim_matches('\'');
    if cleaned.is_empty() {
        return None;
    }
    Some(PathBuf::from(cleaned))
}
