use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::translate::TranslateMode;

pub const CODEX_WORKDIR: &str = "CODEX_WORKDIR";
pub const CODEX_MAX_RUN_SEC: &str = "CODEX_MAX_RUN_SEC";
pub const CODEX_IDLE_AFTER_TURN_SEC: &str = "CODEX_IDLE_AFTER_TURN_SEC";
pub const RELAY_PRETTY_LOG: &str = "RELAY_PRETTY_LOG";
pub const CODEX_BIN: &str = "CODEX_BIN";

const DEFAULT_MAX_RUN_SEC: i64 = 0;
const DEFAULT_IDLE_AFTER_TURN_SEC: i64 = 10;
const DEFAULT_AGENT_PROGRAM: &str = "codex";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },
}

/// Settings loaded once at startup and shared read-only by every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    entries: BTreeMap<String, String>,
    pub workdir: Option<PathBuf>,
    /// `None` disables the hard cutoff.
    pub max_run: Option<Duration>,
    pub idle_after_turn: Duration,
    pub pretty: bool,
    pub agent_program: PathBuf,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::from_entries(default_entries())
    }
}

impl RelayConfig {
    /// Reads `KEY=VALUE` overrides from `path`. A missing file keeps every default.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.is_file() {
            tracing::info!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let read_error = |source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        };
        let mut overrides = Vec::new();
        for item in dotenvy::from_path_iter(path).map_err(read_error)? {
            match item {
                Ok(pair) => overrides.push(pair),
                Err(dotenvy::Error::LineParse(line, index)) => {
                    tracing::warn!(
                        path = %path.display(),
                        line = %line,
                        index = index,
                        "skipping unparsable config line"
                    );
                }
                Err(err) => return Err(read_error(err)),
            }
        }

        tracing::info!(
            path = %path.display(),
            keys = overrides.len(),
            "loaded relay config overrides"
        );
        Ok(Self::from_overrides(overrides))
    }

    pub fn from_overrides<I>(overrides: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut entries = default_entries();
        for (key, value) in overrides {
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            entries.insert(key.to_string(), value.trim().to_string());
        }
        Self::from_entries(entries)
    }

    fn from_entries(entries: BTreeMap<String, String>) -> Self {
        let workdir = entries
            .get(CODEX_WORKDIR)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);

        let max_run_sec = parse_seconds(&entries, CODEX_MAX_RUN_SEC, DEFAULT_MAX_RUN_SEC).max(0);
        let max_run = (max_run_sec > 0).then(|| Duration::from_secs(max_run_sec as u64));

        let idle_sec =
            parse_seconds(&entries, CODEX_IDLE_AFTER_TURN_SEC, DEFAULT_IDLE_AFTER_TURN_SEC).max(1);

        let pretty = entries
            .get(RELAY_PRETTY_LOG)
            .map(|value| value.trim() == "1")
            .unwrap_or(true);

        let agent_program = entries
            .get(CODEX_BIN)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_AGENT_PROGRAM)
            .into();

        Self {
            entries,
            workdir,
            max_run,
            idle_after_turn: Duration::from_secs(idle_sec as u64),
            pretty,
            agent_program,
        }
    }

    /// Every effective key, defaults included. Reported by `/health`.
    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.entries
    }

    pub fn translate_mode(&self) -> TranslateMode {
        if self.pretty {
            TranslateMode::Pretty
        } else {
            TranslateMode::Raw
        }
    }
}

fn default_entries() -> BTreeMap<String, String> {
    BTreeMap::from([
        (CODEX_WORKDIR.to_string(), String::new()),
        (CODEX_MAX_RUN_SEC.to_string(), DEFAULT_MAX_RUN_SEC.to_string()),
        (
            CODEX_IDLE_AFTER_TURN_SEC.to_string(),
            DEFAULT_IDLE_AFTER_TURN_SEC.to_string(),
        ),
        (RELAY_PRETTY_LOG.to_string(), "1".to_string()),
    ])
}

fn parse_seconds(entries: &BTreeMap<String, String>, key: &str, default: i64) -> i64 {
    let Some(raw) = entries.get(key).map(|value| value.trim()) else {
        return default;
    };
    if raw.is_empty() {
        return default;
    }
    match raw.parse::<i64>() {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(key = key, value = raw, error = %err, "invalid number in config, using default");
            default
        }
    }
}
