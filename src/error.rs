use std::io;

use thiserror::Error;

/// Every failure the lookup pipeline can surface. None of them is retried:
/// the run stops and the message is shown to the user.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unsupported file '{name}': expected a .csv or .xlsx file")]
    FileFormat { name: String },

    #[error("failed to parse {source_name}: {message}")]
    Parse { source_name: String, message: String },

    #[error("column '{column}' not found (available: {})", available.join(", "))]
    MissingColumn {
        column: String,
        available: Vec<String>,
    },

    #[error("cannot join on '{key}': {message}")]
    Join { key: String, message: String },

    #[error("failed to serialize {format} export: {message}")]
    Serialization {
        format: &'static str,
        message: String,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid edit '{edit}': {message}")]
    Edit { edit: String, message: String },

    #[error("I/O error on {source_name}: {error}")]
    Io {
        source_name: String,
        #[source]
        error: io::Error,
    },
}

impl PipelineError {
    pub fn parse(source_name: &str, message: impl Into<String>) -> Self {
        PipelineError::Parse {
            source_name: source_name.to_string(),
            message: message.into(),
        }
    }

    pub fn missing_column(column: &str, available: &[String]) -> Self {
        PipelineError::MissingColumn {
            column: column.to_string(),
            available: available.to_vec(),
        }
    }

    pub fn join(key: &str, message: impl Into<String>) -> Self {
        PipelineError::Join {
            key: key.to_string(),
            message: message.into(),
        }
    }

    pub fn io(source_name: &str, error: io::Error) -> Self {
        PipelineError::Io {
            source_name: source_name.to_string(),
            error,
        }
    }
}
