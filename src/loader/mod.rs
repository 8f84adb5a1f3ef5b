//! Annotation loaders
//!
//! This module provides sources that read per-participant annotation
//! intervals and flatten them into posture and hand-object record sets,
//! plus the recording-length lookup used for rate normalization.

mod elan;
mod lengths;
mod tables;

pub use elan::{parse_eaf, ElanDirectorySource, EafAnnotation};
pub use lengths::RecordingLengths;
pub use tables::{write_tables, TableSource, BODY_COLUMNS, MANUAL_COLUMNS};

use crate::config::StudyConfig;
use crate::error::PipelineError;
use crate::types::AnnotationSet;

/// Trait for annotation sources
pub trait AnnotationSource {
    /// Read all participants and return intervals sorted by (participant, start)
    fn load(&self, study: &StudyConfig) -> Result<AnnotationSet, PipelineError>;
}

/// Accept either a bare integer or an integral float such as `1000.0`
pub(crate) fn parse_millis(field: &str, raw: &str) -> Result<u64, PipelineError> {
    let trimmed = raw.trim();
    if let Ok(value) = trimmed.parse::<u64>() {
        return Ok(value);
    }
    match trimmed.parse::<f64>() {
        Ok(value) => crate::types::millis_from_f64(field, value),
        Err(_) => Err(PipelineError::InvalidMillis {
            field: field.to_string(),
            value: raw.to_string(),
        }),
    }
}
