//! Raw TOML configuration data types
//!
//! These structs represent the exact structure of the TOML config file.
//! They are deserialized directly and use domain types where appropriate.

use parley_application::EngineConfig;
use parley_domain::{DeltaConfig, TurnOptions};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration validation errors
#[derive(Debug, Error, PartialEq)]
pub enum ConfigValidationError {
    #[error("providers.{0}.command cannot be empty")]
    EmptyCommand(String),

    #[error("providers.{0}.timeout_seconds cannot be 0")]
    InvalidTimeout(String),

    #[error("streaming.{field} must be between 0 and 1 (got {value})")]
    RatioOutOfRange { field: &'static str, value: f64 },

    #[error("defaults.{field} names unknown provider '{provider}'")]
    UnknownProvider { field: &'static str, provider: String },
}

/// Raw `[defaults]` section: turn options used when the command line names none
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileDefaultsConfig {
    /// Providers asked to answer every prompt
    pub providers: Vec<String>,
    /// Provider that maps agreements and tensions
    pub mapper: Option<String>,
    /// Provider that merges the answers
    pub synthesizer: Option<String>,
    pub use_thinking: bool,
}

impl FileDefaultsConfig {
    /// Turn options seeded from these defaults.
    pub fn to_turn_options(&self) -> TurnOptions {
        TurnOptions {
            providers: self.providers.clone(),
            include_mapping: self.mapper.is_some(),
            mapper: self.mapper.clone(),
            synthesizer: self.synthesizer.clone(),
            use_thinking: self.use_thinking,
            ..Default::default()
        }
    }
}

/// Raw `[providers.<id>]` section: how to run one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileProviderConfig {
    /// Executable receiving the prompt on stdin
    pub command: String,
    pub args: Vec<String>,
    /// Arguments appended when `use_thinking` is requested
    pub thinking_args: Vec<String>,
    pub timeout_seconds: u64,
    /// Extra environment variables for the process
    pub env: BTreeMap<String, String>,
}

impl Default for FileProviderConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            thinking_args: Vec::new(),
            timeout_seconds: 300,
            env: BTreeMap::new(),
        }
    }
}

/// Raw `[engine]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileEngineConfig {
    pub concurrent_stage_steps: bool,
}

impl Default for FileEngineConfig {
    fn default() -> Self {
        Self {
            concurrent_stage_steps: true,
        }
    }
}

/// Raw `[storage]` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileStorageConfig {
    /// JSON store file. Defaults to the platform data directory.
    pub path: Option<PathBuf>,
    /// Keep everything in memory (nothing survives the process)
    pub in_memory: bool,
}

/// Raw `[logging]` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLoggingConfig {
    /// JSONL transcript of workflow events
    pub conversation_log: Option<PathBuf>,
}

/// Complete file configuration (raw TOML structure)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub defaults: FileDefaultsConfig,
    pub providers: BTreeMap<String, FileProviderConfig>,
    /// Delta thresholds for streamed partials
    pub streaming: DeltaConfig,
    pub engine: FileEngineConfig,
    pub storage: FileStorageConfig,
    pub logging: FileLoggingConfig,
}

impl FileConfig {
    /// Validate the configuration, stopping at the first problem.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        for (id, provider) in &self.providers {
            if provider.command.trim().is_empty() {
                return Err(ConfigValidationError::EmptyCommand(id.clone()));
            }
            if provider.timeout_seconds == 0 {
                return Err(ConfigValidationError::InvalidTimeout(id.clone()));
            }
        }

        for (field, value) in [
            ("append_prefix_ratio", self.streaming.append_prefix_ratio),
            ("shrink_tolerance_ratio", self.streaming.shrink_tolerance_ratio),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigValidationError::RatioOutOfRange { field, value });
            }
        }

        // Only checked once providers are declared; an empty table means the
        // commands come from elsewhere (tests, embedding).
        if !self.providers.is_empty() {
            let named = self
                .defaults
                .providers
                .iter()
                .map(|p| ("providers", p))
                .chain(self.defaults.mapper.iter().map(|p| ("mapper", p)))
                .chain(self.defaults.synthesizer.iter().map(|p| ("synthesizer", p)));
            for (field, provider) in named {
                if !self.providers.contains_key(provider) {
                    return Err(ConfigValidationError::UnknownProvider {
                        field,
                        provider: provider.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Engine parameters for the application layer.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::default()
            .with_streaming(self.streaming.clone())
            .with_concurrent_stage_steps(self.engine.concurrent_stage_steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_full_config() {
        let toml_str = r#"
[defaults]
providers = ["claude", "gemini"]
synthesizer = "claude"

[providers.claude]
command = "claude"
args = ["-p"]
timeout_seconds = 120

[providers.gemini]
command = "gemini"

[streaming]
shrink_tolerance_chars = 50

[storage]
path = "/tmp/parley.json"

[logging]
conversation_log = "/tmp/parley.jsonl"
"#;

        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.defaults.providers, vec!["claude", "gemini"]);
        assert_eq!(config.providers["claude"].args, vec!["-p"]);
        assert_eq!(config.providers["claude"].timeout_seconds, 120);
        // defaults fill the rest
        assert_eq!(config.providers["gemini"].timeout_seconds, 300);
        assert_eq!(config.streaming.shrink_tolerance_chars, 50);
        assert_eq!(config.streaming.append_prefix_ratio, 0.7);
        assert!(config.engine.concurrent_stage_steps);
        assert_eq!(config.storage.path, Some(PathBuf::from("/tmp/parley.json")));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config() {
        let config = FileConfig::default();
        assert!(config.providers.is_empty());
        assert_eq!(config.streaming, DeltaConfig::default());
        assert!(config.validate().is_ok());
        assert!(config.engine_config().concurrent_stage_steps);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = FileConfig::default();
        config
            .providers
            .insert("a".to_string(), FileProviderConfig::default());
        assert_eq!(
            config.validate(),
            Err(ConfigValidationError::EmptyCommand("a".to_string()))
        );

        config.providers.get_mut("a").unwrap().command = "echo".to_string();
        config.providers.get_mut("a").unwrap().timeout_seconds = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigValidationError::InvalidTimeout("a".to_string()))
        );

        config.providers.get_mut("a").unwrap().timeout_seconds = 10;
        config.streaming.shrink_tolerance_ratio = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::RatioOutOfRange { .. })
        ));

        config.streaming.shrink_tolerance_ratio = 0.05;
        config.defaults.synthesizer = Some("b".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::UnknownProvider { field: "synthesizer", .. })
        ));
    }

    #[test]
    fn test_defaults_to_turn_options() {
        let defaults = FileDefaultsConfig {
            providers: vec!["a".to_string()],
            mapper: Some("a".to_string()),
            synthesizer: None,
            use_thinking: true,
        };
        let options = defaults.to_turn_options();
        assert!(options.include_mapping);
        assert_eq!(options.effective_mapper(), Some("a"));
        assert!(options.use_thinking);
    }
}
