use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Value};

pub const DEFAULT_RELAY_URL: &str = "http://127.0.0.1:9001";
const GLM_BASE_URL: &str = "https://api.z.ai/api/anthropic";
const GLM_API_KEY_PLACEHOLDER: &str = "your_zai_api_key_here";
const RELAY_AUTH_TOKEN: &str = "local-dev";

/// Keys owned by the switcher. They are cleared before any profile is applied.
pub const MANAGED_ENV_KEYS: &[&str] = &[
    "ANTHROPIC_AUTH_TOKEN",
    "ANTHROPIC_BASE_URL",
    "API_TIMEOUT_MS",
    "ANTHROPIC_DEFAULT_HAIKU_MODEL",
    "ANTHROPIC_DEFAULT_SONNET_MODEL",
    "ANTHROPIC_DEFAULT_OPUS_MODEL",
    "ZAI_API_KEY",
    "GLM_API_KEY",
    "CLAUDE_CODE_API_KEY_HELPER_COMMAND",
    "CLAUDE_CODE_API_KEY_HELPER_TTL_MS",
];

const CLAUDE_MODELS: [(&str, &str); 3] = [
    ("ANTHROPIC_DEFAULT_HAIKU_MODEL", "claude-haiku-4-5"),
    ("ANTHROPIC_DEFAULT_SONNET_MODEL", "claude-sonnet-4-5"),
    ("ANTHROPIC_DEFAULT_OPUS_MODEL", "claude-opus-4-1"),
];

const GLM_MODELS: [(&str, &str); 3] = [
    ("ANTHROPIC_DEFAULT_HAIKU_MODEL", "glm-4.5-air"),
    ("ANTHROPIC_DEFAULT_SONNET_MODEL", "glm-4.6"),
    ("ANTHROPIC_DEFAULT_OPUS_MODEL", "glm-4.6"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Profile {
    /// Native Anthropic subscription.
    Claude,
    /// z.ai GLM models behind an Anthropic-compatible endpoint.
    Glm { api_key: Option<String> },
    /// A local codex-relay.
    Relay { base_url: String },
}

impl Profile {
    /// Value recorded under `meta.current_profile`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Glm { .. } => "glm_zai",
            Self::Relay { .. } => "gpt_code_via_relay",
        }
    }

    /// Rewrites a settings `env` map for this profile. `extra` pairs are
    /// merged after the managed keys are cleared.
    pub fn apply_env(&self, env: &mut Map<String, Value>, extra: &BTreeMap<String, String>) {
        for key in MANAGED_ENV_KEYS {
            env.remove(*key);
        }
        for (key, value) in extra {
            env.insert(key.clone(), Value::String(value.clone()));
        }

        match self {
            Self::Claude => {
                for (key, model) in CLAUDE_MODELS {
                    env.entry(key)
                        .or_insert_with(|| Value::String(model.to_string()));
                }
            }
            Self::Glm { api_key } => {
                let key = extra
                    .get("ZAI_API_KEY")
                    .or_else(|| extra.get("GLM_API_KEY"))
                    .cloned()
                    .or_else(|| api_key.clone())
                    .unwrap_or_else(|| GLM_API_KEY_PLACEHOLDER.to_string());
                set(env, "ANTHROPIC_AUTH_TOKEN", &key);
                set(env, "ANTHROPIC_BASE_URL", GLM_BASE_URL);
                set(env, "API_TIMEOUT_MS", "3000000");
                for (key, model) in GLM_MODELS {
                    set(env, key, model);
                }
            }
            Self::Relay { base_url } => {
                set(env, "ANTHROPIC_BASE_URL", base_url);
                set(env, "ANTHROPIC_AUTH_TOKEN", RELAY_AUTH_TOKEN);
                for (key, model) in CLAUDE_MODELS {
                    set(env, key, model);
                }
            }
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn set(env: &mut Map<String, Value>, key: &str, value: &str) {
    env.insert(key.to_string(), Value::String(value.to_string()));
}
