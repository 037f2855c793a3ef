use std::path::PathBuf;

use thiserror::Error;

/// One variant per stage that can end a run.  Nothing is retried, the first
/// error aborts the whole job.
#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Error loading private key from {}: {message}", .path.display())]
    Credential { path: PathBuf, message: String },

    #[error("Error fetching data from EIA API: {0}")]
    Fetch(String),

    #[error("Error connecting to warehouse: {0}")]
    Connect(String),

    #[error("Error loading data to warehouse: {0}")]
    Load(String),
}

impl EtlError {
    pub fn credential(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        EtlError::Credential {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

impl From<reqwest::Error> for EtlError {
    fn from(err: reqwest::Error) -> Self {
        EtlError::Fetch(err.to_string())
    }
}
