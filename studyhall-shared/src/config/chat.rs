use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path};
use thiserror::Error;
use tracing::debug;

/// Environment variable overriding [`ChatConfig::page_size`].
pub const ENV_PAGE_SIZE: &str = "STUDYHALL_CHAT_PAGE_SIZE";
/// Environment variable overriding [`ChatConfig::bottom_threshold_px`].
pub const ENV_BOTTOM_THRESHOLD: &str = "STUDYHALL_CHAT_BOTTOM_THRESHOLD";
/// Environment variable overriding [`ChatConfig::log_level`].
pub const ENV_LOG_LEVEL: &str = "STUDYHALL_LOG_LEVEL";

const DEFAULT_PAGE_SIZE: usize = 20;
const DEFAULT_BOTTOM_THRESHOLD_PX: f64 = 64.0;

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported configuration format '{0}'; use yaml, json or toml")]
    UnsupportedFormat(String),

    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("invalid value for {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

/// Settings for the channel chat engine.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ChatConfig {
    /// Size of the live tail window and of each backward history page
    pub page_size: usize,

    /// Distance from the bottom, in pixels, within which the viewport counts
    /// as "at the bottom" and follows new messages
    pub bottom_threshold_px: f64,

    /// Logging level
    pub log_level: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ChatConfig {
    /// Generates a default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            bottom_threshold_px: DEFAULT_BOTTOM_THRESHOLD_PX,
            log_level: "info".to_string(),
        }
    }

    /// Loads the configuration from a file, environment variables, or defaults.
    ///
    /// Values set by the file win over environment variables, which win over
    /// defaults.
    ///
    /// # Arguments
    /// * `config_path` - Optional path to a `.yaml`/`.yml`, `.json` or `.toml` file.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if the file cannot be read or parsed, an
    /// environment override is malformed, or the result fails validation.
    pub fn load_config(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match config_path {
            Some(path) => Self::from_file(path)?,
            None => Self::with_defaults(),
        };

        let defaults = Self::with_defaults();
        if config.page_size == defaults.page_size
            && let Ok(raw) = env::var(ENV_PAGE_SIZE)
        {
            config.page_size = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                field: ENV_PAGE_SIZE,
                message: format!("'{raw}' is not a positive integer"),
            })?;
        }
        if (config.bottom_threshold_px - defaults.bottom_threshold_px).abs() < f64::EPSILON
            && let Ok(raw) = env::var(ENV_BOTTOM_THRESHOLD)
        {
            config.bottom_threshold_px =
                raw.trim().parse().map_err(|_| ConfigError::Invalid {
                    field: ENV_BOTTOM_THRESHOLD,
                    message: format!("'{raw}' is not a number"),
                })?;
        }
        if config.log_level == defaults.log_level
            && let Ok(level) = env::var(ENV_LOG_LEVEL)
        {
            config.log_level = level;
        }

        config.validate()?;
        debug!(
            path = ?config_path,
            page_size = config.page_size,
            bottom_threshold_px = config.bottom_threshold_px,
            "loaded chat configuration"
        );
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();

        match extension {
            "yaml" | "yml" => {
                serde_yml::from_str(&content).map_err(|err| ConfigError::Parse(err.to_string()))
            }
            "json" => {
                serde_json::from_str(&content).map_err(|err| ConfigError::Parse(err.to_string()))
            }
            "toml" => toml::from_str(&content).map_err(|err| ConfigError::Parse(err.to_string())),
            other => Err(ConfigError::UnsupportedFormat(other.to_string())),
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::Invalid {
                field: "page_size",
                message: "must be greater than 0".to_string(),
            });
        }
        if !self.bottom_threshold_px.is_finite() || self.bottom_threshold_px < 0.0 {
            return Err(ConfigError::Invalid {
                field: "bottom_threshold_px",
                message: "must be a finite, non-negative number".to_string(),
            });
        }
        if self.log_level.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "log_level",
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Serializes the configuration in the requested format.
    ///
    /// # Errors
    /// Returns [`ConfigError::UnsupportedFormat`] for unknown formats.
    pub fn render(&self, format: &str) -> Result<String, ConfigError> {
        match format {
            "yaml" | "yml" => {
                serde_yml::to_string(self).map_err(|err| ConfigError::Parse(err.to_string()))
            }
            "json" => {
                serde_json::to_string_pretty(self).map_err(|err| ConfigError::Parse(err.to_string()))
            }
            "toml" => toml::to_string(self).map_err(|err| ConfigError::Parse(err.to_string())),
            other => Err(ConfigError::UnsupportedFormat(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::Builder;

    fn clear_env() {
        unsafe {
            env::remove_var(ENV_PAGE_SIZE);
            env::remove_var(ENV_BOTTOM_THRESHOLD);
            env::remove_var(ENV_LOG_LEVEL);
        }
    }

    fn write_config(suffix: &str, body: &str) -> tempfile::NamedTempFile {
        let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    #[serial]
    fn test_defaults_without_file_or_env() {
        clear_env();
        let config = ChatConfig::load_config(None).unwrap();
        assert_eq!(config, ChatConfig::with_defaults());
        assert_eq!(config.page_size, 20);
    }

    #[test]
    #[serial]
    fn test_env_overrides_defaults() {
        clear_env();
        unsafe {
            env::set_var(ENV_PAGE_SIZE, "50");
            env::set_var(ENV_LOG_LEVEL, "debug");
        }
        let config = ChatConfig::load_config(None).unwrap();
        clear_env();

        assert_eq!(config.page_size, 50);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    #[serial]
    fn test_file_wins_over_env() {
        clear_env();
        let file = write_config(".yaml", "page_size: 10\n");
        unsafe {
            env::set_var(ENV_PAGE_SIZE, "50");
        }
        let config = ChatConfig::load_config(Some(file.path())).unwrap();
        clear_env();

        assert_eq!(config.page_size, 10);
        assert!((config.bottom_threshold_px - 64.0).abs() < f64::EPSILON);
    }

    #[test]
    #[serial]
    fn test_json_and_toml_files() {
        clear_env();
        let json = write_config(".json", r#"{"bottom_threshold_px": 12.5}"#);
        let config = ChatConfig::load_config(Some(json.path())).unwrap();
        assert!((config.bottom_threshold_px - 12.5).abs() < f64::EPSILON);

        let toml_file = write_config(".toml", "page_size = 5\nlog_level = \"warn\"\n");
        let config = ChatConfig::load_config(Some(toml_file.path())).unwrap();
        assert_eq!(config.page_size, 5);
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    #[serial]
    fn test_unsupported_extension_is_rejected() {
        clear_env();
        let file = write_config(".ini", "page_size=5");
        let error = ChatConfig::load_config(Some(file.path())).unwrap_err();
        assert!(matches!(error, ConfigError::UnsupportedFormat(ext) if ext == "ini"));
    }

    #[test]
    #[serial]
    fn test_malformed_env_value_is_reported() {
        clear_env();
        unsafe {
            env::set_var(ENV_PAGE_SIZE, "lots");
        }
        let error = ChatConfig::load_config(None).unwrap_err();
        clear_env();
        assert!(matches!(
            error,
            ConfigError::Invalid {
                field: ENV_PAGE_SIZE,
                ..
            }
        ));
    }

    #[test]
    fn test_validation_rejects_zero_page_size() {
        let config = ChatConfig {
            page_size: 0,
            ..ChatConfig::with_defaults()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "page_size",
                ..
            })
        ));
    }

    #[test]
    fn test_validation_rejects_negative_threshold() {
        let config = ChatConfig {
            bottom_threshold_px: -1.0,
            ..ChatConfig::with_defaults()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_render_formats() {
        let config = ChatConfig::with_defaults();
        assert!(config.render("yaml").unwrap().contains("page_size: 20"));
        assert!(config.render("json").unwrap().contains("\"page_size\": 20"));
        assert!(config.render("toml").unwrap().contains("page_size = 20"));
        assert!(config.render("xml").is_err());
    }
}
