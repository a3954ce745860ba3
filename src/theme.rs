//! Theme preference
//!
//! The only locally persisted state: a single theme key stored through
//! a minimal preference-storage abstraction (the embedding environment
//! decides where it lives: a file on desktop, local storage on web).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::warn;

const THEME_KEY: &str = "habitflow-theme";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Theme {
    Light,
    Dark,
    /// Follow the platform appearance.
    #[default]
    System,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
            Theme::System => "system",
        }
    }

    fn parse(value: &str) -> Option<Theme> {
        match value {
            "light" => Some(Theme::Light),
            "dark" => Some(Theme::Dark),
            "system" => Some(Theme::System),
            _ => None,
        }
    }
}

/// Single-key/value persistence for user preferences.
pub trait PreferenceStorage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
}

/// In-memory storage, used in tests and throwaway sessions.
#[derive(Default)]
pub struct MemoryPreferences {
    values: RwLock<HashMap<String, String>>,
}

impl PreferenceStorage for MemoryPreferences {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.values
            .write()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }
}

/// File-backed storage: a small JSON object on disk. Read/write errors
/// lose the preference, nothing more, so they are logged and swallowed.
pub struct FilePreferences {
    path: PathBuf,
}

impl FilePreferences {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_all(&self) -> HashMap<String, String> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_default(),
            Err(_) => HashMap::new(),
        }
    }
}

impl PreferenceStorage for FilePreferences {
    fn get(&self, key: &str) -> Option<String> {
        self.read_all().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let mut values = self.read_all();
        values.insert(key.to_string(), value.to_string());
        match serde_json::to_string_pretty(&values) {
            Ok(serialized) => {
                if let Err(err) = std::fs::write(&self.path, serialized) {
                    warn!("failed to persist preferences: {}", err);
                }
            }
            Err(err) => warn!("failed to serialize preferences: {}", err),
        }
    }
}

pub struct ThemeStore {
    storage: Arc<dyn PreferenceStorage>,
}

impl ThemeStore {
    pub fn new(storage: Arc<dyn PreferenceStorage>) -> Self {
        Self { storage }
    }

    /// Stored preference, defaulting to following the system.
    pub fn current(&self) -> Theme {
        self.storage
            .get(THEME_KEY)
            .and_then(|value| Theme::parse(&value))
            .unwrap_or_default()
    }

    pub fn set_theme(&self, theme: Theme) {
        self.storage.set(THEME_KEY, theme.as_str());
    }
}
