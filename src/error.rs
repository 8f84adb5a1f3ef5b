//! Error types for the positions/objects pipeline

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while loading, reconciling or aggregating annotations
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Malformed annotation file {path}: {message}")]
    Xml { path: PathBuf, message: String },

    #[error("Cannot read spreadsheet {path}: {message}")]
    Spreadsheet { path: PathBuf, message: String },

    #[error("Missing column '{column}' in {path}")]
    MissingColumn { path: PathBuf, column: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid millisecond value for {field}: {value}")]
    InvalidMillis { field: String, value: String },

    #[error("Negative duration for participant {participant}: start {start_ms} > end {end_ms}")]
    NegativeDuration {
        participant: String,
        start_ms: u64,
        end_ms: u64,
    },

    #[error("Overlapping '{category}' posture intervals for participant {participant}: {first:?} and {second:?}")]
    OverlappingPostures {
        participant: String,
        category: String,
        first: (u64, u64),
        second: (u64, u64),
    },

    #[error("No annotations found: {0}")]
    NoAnnotations(String),
}

impl PipelineError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn csv(path: impl AsRef<Path>, source: csv::Error) -> Self {
        PipelineError::Csv {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn xml(path: impl AsRef<Path>, message: impl std::fmt::Display) -> Self {
        PipelineError::Xml {
            path: path.as_ref().to_path_buf(),
            message: message.to_string(),
        }
    }

    pub fn spreadsheet(path: impl AsRef<Path>, message: impl std::fmt::Display) -> Self {
        PipelineError::Spreadsheet {
            path: path.as_ref().to_path_buf(),
            message: message.to_string(),
        }
    }
}
