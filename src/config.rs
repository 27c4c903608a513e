use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{HarnessError, Result};
use crate::smoothing::SmoothingConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarnessConfig {
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub smoothing: SmoothingConfig,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Number of epochs to run
    pub epochs: usize,
    /// Seed for data order and model initialisation
    pub seed: u64,
    /// Use `seed` as given; otherwise a random seed is drawn at fresh start
    pub deterministic: bool,
    /// 1-based epochs that run the test passes (empty = every epoch)
    pub test_at_epochs: Vec<usize>,
    pub train: bool,
    pub test: bool,
    /// End a train pass once the smoothing estimate converged
    pub stop_on_convergence: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            epochs: 5,
            seed: 42,
            deterministic: true,
            test_at_epochs: Vec::new(),
            train: true,
            test: true,
            stop_on_convergence: false,
        }
    }
}

/// Shape of the toy Gaussian blob dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub features: usize,
    pub train_samples: usize,
    pub test_samples: usize,
    pub batch_size: usize,
    /// Distance between the two class centres
    pub separation: f64,
    pub noise: f64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            features: 4,
            train_samples: 512,
            test_samples: 128,
            batch_size: 16,
            separation: 2.0,
            noise: 1.0,
        }
    }
}

/// Optimizer settings of the toy model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub learning_rate: f64,
    pub momentum: f64,
    /// Multiplier applied to the learning rate after every epoch
    pub lr_decay: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            momentum: 0.9,
            lr_decay: 0.95,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Directory for persisted state, relative to the run directory
    pub state_dir: PathBuf,
    /// Save all state every N completed epochs (0 = only on interrupt and at the end)
    pub every_epochs: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("state"),
            every_epochs: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Directory for rolling log files; console only when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            log_dir: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl HarnessConfig {
    /// Load configuration from files and environment
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> std::result::Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/quick.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("SMOOTHING_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (SMOOTHING_RUN__EPOCHS, etc.)
            .add_source(
                Environment::with_prefix("SMOOTHING")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.run.epochs == 0 {
            errors.push("run.epochs must be at least 1".to_string());
        }
        if !self.run.train && !self.run.test {
            errors.push("run.train and run.test are both disabled".to_string());
        }
        if self.run.test_at_epochs.iter().any(|e| *e == 0 || *e > self.run.epochs) {
            errors.push(format!(
                "run.test_at_epochs entries must lie in 1..={}",
                self.run.epochs
            ));
        }

        if self.data.features == 0 {
            errors.push("data.features must be positive".to_string());
        }
        if self.data.batch_size == 0 {
            errors.push("data.batch_size must be positive".to_string());
        }
        if self.data.train_samples < self.data.batch_size {
            errors.push("data.train_samples must cover at least one batch".to_string());
        }
        if self.data.test_samples == 0 {
            errors.push("data.test_samples must be positive".to_string());
        }
        if self.data.noise < 0.0 {
            errors.push("data.noise must not be negative".to_string());
        }

        if self.model.learning_rate <= 0.0 {
            errors.push("model.learning_rate must be positive".to_string());
        }
        if !(0.0..1.0).contains(&self.model.momentum) {
            errors.push("model.momentum must be in [0, 1)".to_string());
        }
        if self.model.lr_decay <= 0.0 || self.model.lr_decay > 1.0 {
            errors.push("model.lr_decay must be in (0, 1]".to_string());
        }

        errors.extend(self.smoothing.problems());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Fail with every validation problem joined into one message
    pub fn ensure_valid(&self) -> Result<()> {
        self.validate()
            .map_err(|errors| HarnessError::InvalidConfig(errors.join("; ")))
    }

    /// Write the effective configuration as `config.toml` into `dir`
    pub fn write_to<P: AsRef<Path>>(&self, dir: P) -> Result<PathBuf> {
        let path = dir.as_ref().join("config.toml");
        std::fs::create_dir_all(dir.as_ref())?;
        std::fs::write(&path, toml::to_string_pretty(self)?)?;
        Ok(path)
    }
}
