use thiserror::Error;

#[derive(Error, Debug)]
pub enum BacktestError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Architecture conflict: {0}")]
    ArchitectureConflict(String),

    #[error("Incompatible checkpoint: {0}")]
    LoadIncompatible(String),

    #[error("Corrupt checkpoint: {0}")]
    LoadCorrupt(String),

    #[error("Simulation failure at step {step}: {reason}")]
    SimulationFailure { step: usize, reason: String },

    #[error("Insufficient trace data: {0} portfolio samples")]
    InsufficientTraceData(usize),

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("Environment error: {0}")]
    EnvironmentError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, BacktestError>;
