use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::profile::Profile;
use crate::ProfileError;

/// Where Claude Code keeps its settings files.
#[derive(Debug, Clone)]
pub struct SettingsLocations {
    pub project_dir: PathBuf,
    pub home_dir: PathBuf,
}

impl SettingsLocations {
    pub fn discover() -> Result<Self, ProfileError> {
        let home_dir = dirs::home_dir().ok_or(ProfileError::NoHomeDir)?;
        let project_dir = std::env::current_dir()?;
        Ok(Self {
            project_dir,
            home_dir,
        })
    }

    pub fn global_settings(&self) -> PathBuf {
        self.home_dir.join(".claude").join("settings.json")
    }

    /// Candidate files, most specific first.
    pub fn candidates(&self) -> Vec<PathBuf> {
        let project = self.project_dir.join(".claude");
        let global = self.home_dir.join(".claude");
        vec![
            project.join("settings.local.json"),
            project.join("settings.json"),
            global.join("settings.local.json"),
            global.join("settings.json"),
        ]
    }

    /// Existing candidates, or the global settings file when none exist yet.
    pub fn targets(&self) -> Vec<PathBuf> {
        let existing: Vec<PathBuf> = self
            .candidates()
            .into_iter()
            .filter(|path| path.exists())
            .collect();
        if existing.is_empty() {
            vec![self.global_settings()]
        } else {
            existing
        }
    }
}

/// Applies `profile` to every target settings file and returns the files written.
pub fn apply_profile(
    locations: &SettingsLocations,
    profile: &Profile,
    extra_env: &BTreeMap<String, String>,
) -> Result<Vec<PathBuf>, ProfileError> {
    let mut updated = Vec::new();
    for path in locations.targets() {
        let mut settings = load_settings(&path);

        let mut env = match settings.remove("env") {
            Some(Value::Object(env)) => env,
            _ => Map::new(),
        };
        profile.apply_env(&mut env, extra_env);
        settings.insert("env".to_string(), Value::Object(env));

        let mut meta = match settings.remove("meta") {
            Some(Value::Object(meta)) => meta,
            _ => Map::new(),
        };
        meta.insert(
            "current_profile".to_string(),
            Value::String(profile.name().to_string()),
        );
        settings.insert("meta".to_string(), Value::Object(meta));

        save_settings(&path, &settings)?;
        tracing::debug!(path = %path.display(), profile = %profile, "settings updated");
        updated.push(path);
    }
    Ok(updated)
}

/// Missing, unreadable, or non-object files all read as `{}`.
pub fn load_settings(path: &Path) -> Map<String, Value> {
    let Ok(text) = fs::read_to_string(path) else {
        return Map::new();
    };
    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(map)) => map,
        Ok(_) => Map::new(),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "ignoring invalid settings file");
            Map::new()
        }
    }
}

fn save_settings(path: &Path, settings: &Map<String, Value>) -> Result<(), ProfileError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let text = serde_json::to_string_pretty(settings)?;
    fs::write(path, text)?;
    Ok(())
}
