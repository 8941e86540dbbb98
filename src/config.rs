//! Configuration management with layered loading
//!
//! Precedence (lowest to highest):
//! 1. Compiled defaults
//! 2. Global config: `$XDG_CONFIG_HOME/cadence/cadence.toml`
//! 3. Environment variables: `CADENCE_*` prefix

use std::path::PathBuf;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::application::{ApplicationError, ApplicationResult};

/// Unified configuration for cadence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Where protocol state is persisted
    pub data_file: PathBuf,
    /// Default reservation window length in minutes
    pub reservation_minutes: i64,
    /// Default task window length in minutes
    pub task_minutes: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_file: default_data_file(),
            reservation_minutes: 15,
            task_minutes: 30,
        }
    }
}

/// Default data file location (XDG data dir, falling back to cwd).
fn default_data_file() -> PathBuf {
    ProjectDirs::from("", "", "cadence")
        .map(|dirs| dirs.data_dir().join("protocol.json"))
        .unwrap_or_else(|| PathBuf::from("protocol.json"))
}

/// Path to the global config file, if a config dir can be determined.
pub fn global_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "cadence").map(|dirs| dirs.config_dir().join("cadence.toml"))
}

impl Settings {
    /// Load settings with layered precedence.
    pub fn load() -> ApplicationResult<Self> {
        let defaults = Settings::default();

        let mut builder = Config::builder()
            .set_default(
                "data_file",
                defaults.data_file.to_string_lossy().to_string(),
            )
            .map_err(config_err)?
            .set_default("reservation_minutes", defaults.reservation_minutes)
            .map_err(config_err)?
            .set_default("task_minutes", defaults.task_minutes)
            .map_err(config_err)?;

        if let Some(path) = global_config_path() {
            if path.exists() {
                builder = builder.add_source(File::from(path));
            }
        }

        builder
            .add_source(Environment::with_prefix("CADENCE"))
            .build()
            .map_err(config_err)?
            .try_deserialize()
            .map_err(config_err)
    }
}

fn config_err(e: config::ConfigError) -> ApplicationError {
    ApplicationError::Config {
        message: e.to_string(),
    }
}
