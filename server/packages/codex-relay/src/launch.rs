use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Arguments that put the Codex CLI in non-interactive JSON mode reading the
/// prompt from stdin.
pub const CODEX_EXEC_ARGS: &[&str] = &["exec", "--json", "-", "--skip-git-repo-check"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

impl LaunchSpec {
    pub fn codex(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: CODEX_EXEC_ARGS.iter().map(|arg| arg.to_string()).collect(),
            env: HashMap::new(),
        }
    }

    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: HashMap::new(),
        }
    }

    pub fn display(&self) -> String {
        format_command_for_display(&self.program, &self.args)
    }
}

fn format_command_for_display(program: &Path, args: &[String]) -> String {
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(shell_quote(program.to_string_lossy().as_ref()));
    for arg in args {
        parts.push(shell_quote(arg));
    }
    parts.join(" ")
}

fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || "-_./=:".contains(ch))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', "'\\''"))
}
