use std::io;

use thiserror::Error;

/// A whole ingestion run failed. Single bad lines never produce this.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("input is not valid UTF-8 near line {line}")]
    Decode { line: usize },
    #[error("ingest worker stopped unexpectedly")]
    WorkerLost,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse config file: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("malformed reference table: {0}")]
    Csv(#[from] csv::Error),
    #[error("malformed reference map: {0}")]
    Json(#[from] serde_json::Error),
}
