use crate::errors::{BacktestError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub general: GeneralConfig,
    pub model: ModelConfig,
    pub environment: EnvironmentConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GeneralConfig {
    pub symbol: String,
    /// Which data split the backtest reads: "train", "valid" or "test".
    #[serde(default = "default_data_type")]
    pub data_type: String,
}

fn default_data_type() -> String {
    "test".to_string()
}

/// Model selection and the CLI-requestable architecture flags.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct ModelConfig {
    pub checkpoint_path: String,
    #[serde(default)]
    pub use_cnn: bool,
    #[serde(default)]
    pub use_lstm: bool,
    #[serde(default)]
    pub use_state_space: bool,
    #[serde(default)]
    pub use_transformer: bool,
}

impl ModelConfig {
    /// Number of exclusive architecture flags requested.
    pub fn requested_flag_count(&self) -> usize {
        [
            self.use_cnn,
            self.use_lstm,
            self.use_state_space,
            self.use_transformer,
        ]
        .iter()
        .filter(|&&f| f)
        .count()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_initial_balance")]
    pub initial_balance: f64,
    #[serde(default = "default_transaction_fee")]
    pub transaction_fee_percent: f64,
    /// JSON price-series file; when absent a deterministic series of
    /// `data_length` points is generated.
    #[serde(default)]
    pub data_file: Option<String>,
    #[serde(default = "default_data_length")]
    pub data_length: usize,
}

fn default_window_size() -> usize {
    30
}

fn default_initial_balance() -> f64 {
    10_000.0
}

fn default_transaction_fee() -> f64 {
    0.001
}

fn default_data_length() -> usize {
    252
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_results_dir")]
    pub results_dir: String,
    /// Persist the full per-step trace alongside the summary bundle.
    #[serde(default)]
    pub save_trace: bool,
    /// Treat persistence failure as a warning instead of aborting.
    #[serde(default)]
    pub skip_on_error: bool,
}

fn default_results_dir() -> String {
    "results/backtest".to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| BacktestError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)?;
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.general.data_type.as_str(), "train" | "valid" | "test") {
            return Err(BacktestError::ConfigError(
                "data_type must be 'train', 'valid' or 'test'".to_string(),
            ));
        }

        if self.model.checkpoint_path.is_empty() {
            return Err(BacktestError::ConfigError(
                "model.checkpoint_path is required".to_string(),
            ));
        }

        if self.environment.window_size == 0 {
            return Err(BacktestError::ConfigError(
                "environment.window_size must be at least 1".to_string(),
            ));
        }

        if self.environment.initial_balance <= 0.0 {
            return Err(BacktestError::ConfigError(
                "environment.initial_balance must be positive".to_string(),
            ));
        }

        if !(0.0..1.0).contains(&self.environment.transaction_fee_percent) {
            return Err(BacktestError::ConfigError(
                "environment.transaction_fee_percent must be in [0, 1)".to_string(),
            ));
        }

        if self.environment.data_file.is_none() && self.environment.data_length < 2 {
            return Err(BacktestError::ConfigError(
                "environment.data_length must be at least 2 for a generated series".to_string(),
            ));
        }

        Ok(())
    }
}
