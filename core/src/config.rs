//! Desk configuration.
//!
//! Sources, highest priority first: `SAR_DESK_*` environment variables,
//! a TOML file, built-in defaults. In tests, use `DeskConfig::default_test()`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE_NAME: &str = "sar-desk.toml";

pub const ENV_DATA_PATH: &str = "SAR_DESK_DATA";
pub const ENV_MONTHLY_PATH: &str = "SAR_DESK_MONTHLY";
pub const ENV_SEED_FIXTURE_PATH: &str = "SAR_DESK_SEED_FIXTURE";
pub const ENV_DB_PATH: &str = "SAR_DESK_DB";
pub const ENV_BASE_URL: &str = "SAR_DESK_LLM_BASE_URL";
pub const ENV_MODEL: &str = "SAR_DESK_LLM_MODEL";
pub const ENV_TIMEOUT_MS: &str = "SAR_DESK_LLM_TIMEOUT_MS";
pub const ENV_TEMPERATURE: &str = "SAR_DESK_LLM_TEMPERATURE";
pub const ENV_MAX_TOKENS: &str = "SAR_DESK_LLM_MAX_TOKENS";
pub const ENV_TOP_N: &str = "SAR_DESK_TOP_N";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("read config file failed ({path}): {message}")]
    ReadConfigFile { path: String, message: String },

    #[error("parse config file failed ({path}): {message}")]
    ParseConfigFile { path: String, message: String },

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// The host page's `stateData` export.
    pub state_data:   Option<PathBuf>,
    /// The host page's `monthlyData` export.
    pub monthly_data: Option<PathBuf>,
    /// Used only when `state_data` fails to load.
    pub seed_fixture: Option<PathBuf>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            state_data:   Some(PathBuf::from("data/state_data.json")),
            monthly_data: None,
            seed_fixture: Some(PathBuf::from("data/seed_fixture.json")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file for client-local settings. ":memory:" keeps nothing.
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { db_path: "sar-desk.db".to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerativeConfig {
    pub base_url:    String,
    pub model:       String,
    pub timeout_ms:  u64,
    pub temperature: f32,
    pub max_tokens:  u32,
}

impl Default for GenerativeConfig {
    fn default() -> Self {
        Self {
            base_url:    "https://api.groq.com/openai/v1".to_string(),
            model:       "llama3-70b-8192".to_string(),
            timeout_ms:  30_000,
            temperature: 0.0,
            max_tokens:  1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Length of "top states" answers.
    pub top_n: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self { top_n: 5 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeskConfig {
    pub data:       DataConfig,
    pub storage:    StorageConfig,
    pub generative: GenerativeConfig,
    pub resolver:   ResolverConfig,
}

impl DeskConfig {
    /// `sar-desk.toml` in the working directory if present, then env.
    pub fn from_default_sources() -> Result<Self, ConfigError> {
        let path = Path::new(DEFAULT_CONFIG_FILE_NAME);
        if path.exists() {
            return Self::from_config_file(path);
        }
        Self::from_env()
    }

    pub fn from_config_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|err| ConfigError::ReadConfigFile {
            path:    path.display().to_string(),
            message: err.to_string(),
        })?;
        let mut config = Self::from_toml_str(&content).map_err(|err| match err {
            ConfigError::ParseConfigFile { message, .. } => ConfigError::ParseConfigFile {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|err| ConfigError::ParseConfigFile {
            path:    "<inline>".to_string(),
            message: err.to_string(),
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from a key lookup. Blank values are ignored.
    pub fn apply_overrides<F>(&mut self, mut getter: F) -> Result<(), ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut get = |key: &str| getter(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get(ENV_DATA_PATH) {
            self.data.state_data = Some(PathBuf::from(v));
        }
        if let Some(v) = get(ENV_MONTHLY_PATH) {
            self.data.monthly_data = Some(PathBuf::from(v));
        }
        if let Some(v) = get(ENV_SEED_FIXTURE_PATH) {
            self.data.seed_fixture = Some(PathBuf::from(v));
        }
        if let Some(v) = get(ENV_DB_PATH) {
            self.storage.db_path = v;
        }
        if let Some(v) = get(ENV_BASE_URL) {
            self.generative.base_url = v;
        }
        if let Some(v) = get(ENV_MODEL) {
            self.generative.model = v;
        }
        if let Some(v) = get(ENV_TIMEOUT_MS) {
            self.generative.timeout_ms = parse_value(ENV_TIMEOUT_MS, v)?;
        }
        if let Some(v) = get(ENV_TEMPERATURE) {
            self.generative.temperature = parse_value(ENV_TEMPERATURE, v)?;
        }
        if let Some(v) = get(ENV_MAX_TOKENS) {
            self.generative.max_tokens = parse_value(ENV_MAX_TOKENS, v)?;
        }
        if let Some(v) = get(ENV_TOP_N) {
            self.resolver.top_n = parse_value(ENV_TOP_N, v)?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resolver.top_n == 0 {
            return Err(ConfigError::InvalidValue {
                key:   "resolver.top_n",
                value: "0".into(),
            });
        }
        if !(0.0..=2.0).contains(&self.generative.temperature) {
            return Err(ConfigError::InvalidValue {
                key:   "generative.temperature",
                value: self.generative.temperature.to_string(),
            });
        }
        Ok(())
    }

    /// In-memory storage, no files, no network endpoint worth calling.
    pub fn default_test() -> Self {
        Self {
            data: DataConfig {
                state_data:   None,
                monthly_data: None,
                seed_fixture: None,
            },
            storage: StorageConfig { db_path: ":memory:".to_string() },
            generative: GenerativeConfig {
                base_url:    "http://127.0.0.1:9".to_string(),
                timeout_ms:  1_000,
                ..GenerativeConfig::default()
            },
            resolver: ResolverConfig::default(),
        }
    }
}

fn parse_value<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn toml_sections_fill_missing_fields_with_defaults() {
        let config = DeskConfig::from_toml_str(
            r#"
            [generative]
            model = "mixtral-8x7b"

            [resolver]
            top_n = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.generative.model, "mixtral-8x7b");
        assert_eq!(config.generative.max_tokens, 1024);
        assert_eq!(config.resolver.top_n, 3);
        assert_eq!(config.storage.db_path, "sar-desk.db");
    }

    #[test]
    fn overrides_take_priority_and_are_validated() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_MODEL, "override-model"),
            (ENV_TOP_N, "7"),
            (ENV_DB_PATH, "  "),
        ]);
        let mut config = DeskConfig::default();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.generative.model, "override-model");
        assert_eq!(config.resolver.top_n, 7);
        assert_eq!(config.storage.db_path, "sar-desk.db");

        let bad: HashMap<&str, &str> = HashMap::from([(ENV_TIMEOUT_MS, "soon")]);
        let err = DeskConfig::default()
            .apply_overrides(|k| bad.get(k).map(|v| v.to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: ENV_TIMEOUT_MS, .. }));
    }
}
