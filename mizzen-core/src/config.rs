//! Configuration management for the Mizzen pipeline

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{MizzenError, Result};

/// Upper bound for the resolution quiet period, beyond which references stay
/// visibly broken for too long after an edit.
const MAX_RESOLVE_DEBOUNCE_MS: u64 = 10_000;

/// Main system configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub editor: EditorConfig,
    pub logging: LoggingConfig,
}

/// Timing and mode settings for a content editor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Quiet period before a resolution pass runs
    pub resolve_debounce_ms: u64,
    /// Delay before an autosave fires; 0 disables autosave
    pub autosave_delay_ms: u64,
    /// How long the `saved` status is shown before reverting to `idle`
    pub saved_status_reset_ms: u64,
    /// Whether editors open in edit mode
    pub initial_edit_mode: bool,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            resolve_debounce_ms: 100,
            autosave_delay_ms: 3000,
            saved_status_reset_ms: 3000,
            initial_edit_mode: false,
        }
    }
}

impl EditorConfig {
    pub fn resolve_debounce(&self) -> Duration {
        Duration::from_millis(self.resolve_debounce_ms)
    }

    pub fn autosave_delay(&self) -> Duration {
        Duration::from_millis(self.autosave_delay_ms)
    }

    pub fn saved_status_reset(&self) -> Duration {
        Duration::from_millis(self.saved_status_reset_ms)
    }

    /// Autosave is enabled when the delay is non-zero
    pub fn autosave_enabled(&self) -> bool {
        self.autosave_delay_ms > 0
    }
}

/// Logging settings consumed by binaries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub dev_mode: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dev_mode: false,
        }
    }
}

impl Config {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| MizzenError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = serde_json::from_str(&content)
            .map_err(|e| MizzenError::Config(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| MizzenError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| MizzenError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Load configuration following the standard lookup order
    ///
    /// An explicit path must exist. Without one, the user config directory is
    /// tried and defaults are used when nothing is found. Environment
    /// overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let context = ConfigLoadContext::from_env();
        Self::load_with_context(path, &context)
    }

    /// Load configuration with an explicit override context
    pub fn load_with_context(path: Option<&Path>, context: &ConfigLoadContext) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(default_path) => {
                    tracing::debug!("Loading config from {}", default_path.display());
                    Self::from_file(&default_path)?
                }
                None => Self::default(),
            },
        };

        config.apply_overrides(&context.environment_overrides)?;
        Ok(config)
    }

    /// Default configuration file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("mizzen").join("config.json"))
    }

    /// Apply `MIZZEN_*` style overrides
    pub fn apply_overrides(&mut self, overrides: &HashMap<String, String>) -> Result<()> {
        for (key, value) in overrides {
            match key.as_str() {
                "MIZZEN_RESOLVE_DEBOUNCE_MS" => {
                    self.editor.resolve_debounce_ms = parse_override(key, value)?
                }
                "MIZZEN_AUTOSAVE_DELAY_MS" => {
                    self.editor.autosave_delay_ms = parse_override(key, value)?
                }
                "MIZZEN_SAVED_STATUS_RESET_MS" => {
                    self.editor.saved_status_reset_ms = parse_override(key, value)?
                }
                "MIZZEN_INITIAL_EDIT_MODE" => {
                    self.editor.initial_edit_mode = parse_override(key, value)?
                }
                "MIZZEN_LOG_LEVEL" => self.logging.level = value.clone(),
                _ => tracing::trace!("Ignoring unknown override {}", key),
            }
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let result = self.validate_comprehensive();
        if let Some(first) = result.errors.first() {
            return Err(MizzenError::Config(format!(
                "{}: {}",
                first.field_path, first.message
            )));
        }
        Ok(())
    }

    /// Comprehensive configuration validation with detailed results
    pub fn validate_comprehensive(&self) -> ValidationResult {
        let mut result = ValidationResult::default();
        let editor = &self.editor;

        if editor.resolve_debounce_ms > MAX_RESOLVE_DEBOUNCE_MS {
            result.errors.push(ValidationError {
                field_path: "editor.resolve_debounce_ms".to_string(),
                error_type: ValidationErrorType::InvalidValue,
                message: format!(
                    "Resolution debounce of {}ms exceeds the {}ms limit",
                    editor.resolve_debounce_ms, MAX_RESOLVE_DEBOUNCE_MS
                ),
                suggested_fix: Some("Use a value around 100ms".to_string()),
            });
        }

        if editor.saved_status_reset_ms == 0 {
            result.errors.push(ValidationError {
                field_path: "editor.saved_status_reset_ms".to_string(),
                error_type: ValidationErrorType::InvalidValue,
                message: "Saved status reset delay must be positive".to_string(),
                suggested_fix: Some("Use 3000".to_string()),
            });
        }

        if !editor.autosave_enabled() {
            result.warnings.push(ValidationWarning {
                field_path: "editor.autosave_delay_ms".to_string(),
                warning_type: ValidationWarningType::SuboptimalValue,
                message: "Autosave is disabled; edits are only saved manually".to_string(),
                suggestion: None,
            });
        } else if editor.autosave_delay_ms < editor.resolve_debounce_ms {
            result.warnings.push(ValidationWarning {
                field_path: "editor.autosave_delay_ms".to_string(),
                warning_type: ValidationWarningType::SuboptimalValue,
                message: "Autosave fires before pending references are resolved".to_string(),
                suggestion: Some(format!(
                    "Use at least {}ms",
                    editor.resolve_debounce_ms
                )),
            });
        }

        if editor.resolve_debounce_ms == 0 {
            result.warnings.push(ValidationWarning {
                field_path: "editor.resolve_debounce_ms".to_string(),
                warning_type: ValidationWarningType::SuboptimalValue,
                message: "Every keystroke triggers a resolution pass".to_string(),
                suggestion: Some("Use 100".to_string()),
            });
        }

        if self.logging.level.trim().is_empty() {
            result.errors.push(ValidationError {
                field_path: "logging.level".to_string(),
                error_type: ValidationErrorType::MissingRequired,
                message: "Log level is empty".to_string(),
                suggested_fix: Some("Use info".to_string()),
            });
        } else if !matches!(
            self.logging.level.to_ascii_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            result.errors.push(ValidationError {
                field_path: "logging.level".to_string(),
                error_type: ValidationErrorType::InvalidValue,
                message: format!("Unknown log level '{}'", self.logging.level),
                suggested_fix: Some("One of trace, debug, info, warn, error".to_string()),
            });
        }

        result.is_valid = result.errors.is_empty();
        result
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| MizzenError::Config(format!("Invalid value '{}' for {}", value, key)))
}

/// Configuration validation result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

/// Configuration validation error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationError {
    pub field_path: String,
    pub error_type: ValidationErrorType,
    pub message: String,
    pub suggested_fix: Option<String>,
}

/// Configuration validation warning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationWarning {
    pub field_path: String,
    pub warning_type: ValidationWarningType,
    pub message: String,
    pub suggestion: Option<String>,
}

/// Types of validation errors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ValidationErrorType {
    MissingRequired,
    InvalidValue,
}

/// Types of validation warnings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ValidationWarningType {
    SuboptimalValue,
}

/// Configuration loading context
#[derive(Debug, Clone, Default)]
pub struct ConfigLoadContext {
    pub environment_overrides: HashMap<String, String>,
}

impl ConfigLoadContext {
    /// Collect `MIZZEN_*` variables from the process environment
    pub fn from_env() -> Self {
        Self {
            environment_overrides: std::env::vars()
                .filter(|(key, _)| key.starts_with("MIZZEN_"))
                .collect(),
        }
    }
}
