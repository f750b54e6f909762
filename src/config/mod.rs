// Required external crates for configuration management and serialization
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

/// Configuration for the weight artifact store
#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    /// Directory holding one `<slug>.xwa` artifact per architecture
    pub directory: PathBuf,
}

/// Configuration for the accelerator memory budget
#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    /// Hard ceiling on resident model weights + activations, in megabytes
    pub memory_budget_mb: usize,
}

/// Configuration for input preprocessing
#[derive(Debug, Deserialize, Clone)]
pub struct PreprocessConfig {
    /// CLAHE tile grid size (grid x grid tiles)
    pub tile_grid: usize,
    /// CLAHE clip limit, relative to the uniform histogram bin height
    pub clip_limit: f32,
}

/// Configuration for the explainability engine
#[derive(Debug, Deserialize, Clone)]
pub struct ExplainConfig {
    /// Blend weight for fusing the convolutional and attention maps of
    /// dual-branch architectures (1.0 = convolutional map only)
    pub blend_weight: f32,
}

/// Configuration for application logging
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Optional log file path
    pub file: Option<PathBuf>,
}

/// Main settings struct that contains all configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Weight store settings
    pub models: ModelConfig,
    /// Device memory settings
    pub device: DeviceConfig,
    /// Preprocessing settings
    pub preprocess: PreprocessConfig,
    /// Explainability settings
    pub explain: ExplainConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            models: ModelConfig {
                directory: PathBuf::from("models"),
            },
            device: DeviceConfig {
                memory_budget_mb: 512,
            },
            preprocess: PreprocessConfig {
                tile_grid: 8,
                clip_limit: 3.0,
            },
            explain: ExplainConfig { blend_weight: 0.5 },
            logging: LoggingConfig {
                level: "info".to_string(),
                file: None,
            },
        }
    }
}

impl Settings {
    /// Creates a new Settings instance by loading config from multiple sources
    /// in the following order of precedence (highest to lowest):
    /// 1. Environment variables prefixed with XRAI_, double underscore
    ///    between nesting levels (e.g. XRAI_DEVICE__MEMORY_BUDGET_MB) so
    ///    field names containing underscores survive the split
    /// 2. Local config file (local.toml) if present
    /// 3. Default config file (default.toml)
    pub fn new() -> Result<Self, ConfigError> {
        let config_dir = std::env::current_dir()
            .map_err(|e| ConfigError::Message(format!("Failed to get current directory: {}", e)))?
            .join("config");

        let default_config = config_dir.join("default.toml");
        if !default_config.exists() {
            return Err(ConfigError::Message(format!(
                "Default configuration file not found at: {}",
                default_config.display()
            )));
        }

        let local_config = config_dir.join("local.toml");

        let default_config_path = default_config.to_string_lossy();
        let local_config_path = local_config.to_string_lossy();

        let settings = Config::builder()
            .add_source(File::with_name(&default_config_path))
            .add_source(File::with_name(&local_config_path).required(false))
            .add_source(Environment::with_prefix("XRAI").separator("__"))
            .build()?
            .try_deserialize::<Settings>()?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.memory_budget_mb == 0 {
            return Err(ConfigError::Message(
                "device.memory_budget_mb must be greater than 0".to_string(),
            ));
        }

        if self.preprocess.tile_grid < 2 {
            return Err(ConfigError::Message(format!(
                "preprocess.tile_grid must be at least 2, got: {}",
                self.preprocess.tile_grid
            )));
        }

        if self.preprocess.clip_limit < 1.0 {
            return Err(ConfigError::Message(format!(
                "preprocess.clip_limit must be at least 1.0, got: {}",
                self.preprocess.clip_limit
            )));
        }

        if !(0.0..=1.0).contains(&self.explain.blend_weight) {
            return Err(ConfigError::Message(format!(
                "explain.blend_weight must be between 0.0 and 1.0, got: {}",
                self.explain.blend_weight
            )));
        }

        match self.logging.level.to_lowercase().as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => Ok(()),
            _ => Err(ConfigError::Message(format!(
                "Invalid logging level: {}. Must be one of: error, warn, info, debug, trace",
                self.logging.level
            ))),
        }?;

        // Create log file directory if configured and doesn't exist
        if let Some(log_file) = &self.logging.file {
            if let Some(parent) = log_file.parent() {
                if !parent.exists() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        ConfigError::Message(format!(
                            "Failed to create log directory at {}: {}",
                            parent.display(),
                            e
                        ))
                    })?;
                }
            }
        }

        Ok(())
    }

    /// Device memory budget in bytes.
    pub fn memory_budget_bytes(&self) -> usize {
        self.device.memory_budget_mb * 1024 * 1024
    }
}
