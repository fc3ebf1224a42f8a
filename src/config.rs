//! Application-level configuration loading, including the category catalog.

use std::{env, fs, io::ErrorKind, path::PathBuf};

use serde::Deserialize;
use tracing::{info, warn};

use crate::dao::models::SessionSettings;
use crate::state::machine::MIN_SESSION_CATEGORIES;

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "BASTA_BACK_CONFIG_PATH";

/// Session rules applied when a host creates a session without overrides.
const DEFAULT_SETTINGS: SessionSettings = SessionSettings {
    max_rounds: 5,
    round_time_limit_secs: 60,
    stop_countdown_secs: 10,
};
/// How many catalog categories a session plays when the host picks none.
const DEFAULT_CATEGORY_COUNT: usize = 5;

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    categories: Vec<String>,
    default_settings: SessionSettings,
    default_category_count: usize,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to the
    /// baked-in category catalog and session rules.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    if app_config.categories.len() < MIN_SESSION_CATEGORIES {
                        warn!(
                            path = %path.display(),
                            count = app_config.categories.len(),
                            "config lists fewer categories than a session needs; using built-in defaults"
                        );
                        return Self::default();
                    }
                    info!(
                        path = %path.display(),
                        count = app_config.categories.len(),
                        "loaded category catalog from config"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Category names seeded into the catalog at store install.
    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    /// Session rules used when the host does not override them.
    pub fn default_settings(&self) -> SessionSettings {
        self.default_settings
    }

    /// Number of catalog categories a session plays when the host picks none.
    /// Never below the per-session minimum, and capped by the catalog size.
    pub fn default_category_count(&self) -> usize {
        self.default_category_count
            .max(MIN_SESSION_CATEGORIES)
            .min(self.categories.len())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            categories: default_categories(),
            default_settings: DEFAULT_SETTINGS,
            default_category_count: DEFAULT_CATEGORY_COUNT,
        }
    }
}

#[derive(Debug, Deserialize)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    categories: Vec<String>,
    default_settings: Option<RawSettings>,
    default_category_count: Option<usize>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        Self {
            categories: value.categories,
            default_settings: value
                .default_settings
                .map(Into::into)
                .unwrap_or(DEFAULT_SETTINGS),
            default_category_count: value
                .default_category_count
                .unwrap_or(DEFAULT_CATEGORY_COUNT),
        }
    }
}

#[derive(Debug, Deserialize)]
/// JSON representation of the session rules block inside the configuration file.
struct RawSettings {
    max_rounds: u32,
    round_time_limit_secs: u32,
    stop_countdown_secs: u32,
}

impl From<RawSettings> for SessionSettings {
    fn from(value: RawSettings) -> Self {
        Self {
            max_rounds: value.max_rounds,
            round_time_limit_secs: value.round_time_limit_secs,
            stop_countdown_secs: value.stop_countdown_secs,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Built-in category catalog shipped with the binary.
fn default_categories() -> Vec<String> {
    [
        "Name", "Animal", "City", "Food", "Color", "Object", "Profession", "Brand",
    ]
    .map(str::to_owned)
    .to_vec()
}
