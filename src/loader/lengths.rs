//! Recording-length lookup
//!
//! Rates are normalized by the length of each participant's recording. The
//! lookup is a two-column sheet (`id`, `video_length` in ms) kept either as
//! CSV or as a spreadsheet workbook.

use crate::error::PipelineError;
use crate::types::millis_from_f64;
use calamine::{open_workbook_auto, Data, Reader};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

const ID_COLUMN: &str = "id";
const LENGTH_COLUMN: &str = "video_length";

/// Numeric ids compare as numbers, so `01234` and `1234` name the same subject
fn normalize_id(raw: &str) -> String {
    let trimmed = raw.trim();
    if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        let stripped = trimmed.trim_start_matches('0');
        if stripped.is_empty() {
            "0".to_string()
        } else {
            stripped.to_string()
        }
    } else {
        trimmed.to_string()
    }
}

/// Participant id → recording length (ms)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordingLengths {
    lengths: BTreeMap<String, u64>,
}

impl RecordingLengths {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, participant_id: &str, length_ms: u64) {
        self.lengths.insert(normalize_id(participant_id), length_ms);
    }

    pub fn get(&self, participant_id: &str) -> Option<u64> {
        self.lengths.get(&normalize_id(participant_id)).copied()
    }

    pub fn len(&self) -> usize {
        self.lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }

    /// Load from `.csv`, or from a workbook (`.xlsx`, `.xls`, `.ods`) using its first sheet
    pub fn from_path(path: &Path) -> Result<Self, PipelineError> {
        if !path.is_file() {
            return Err(PipelineError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "recording length table not found"),
            ));
        }

        let is_csv = path
            .extension()
            .map_or(false, |ext| ext.eq_ignore_ascii_case("csv"));
        let lengths = if is_csv {
            Self::from_csv(path)?
        } else {
            Self::from_workbook(path)?
        };

        info!(file = %path.display(), participants = lengths.len(), "recording lengths loaded");
        Ok(lengths)
    }

    fn from_csv(path: &Path) -> Result<Self, PipelineError> {
        let mut reader = csv::Reader::from_path(path).map_err(|e| PipelineError::csv(path, e))?;
        let headers = reader
            .headers()
            .map_err(|e| PipelineError::csv(path, e))?
            .clone();
        let id_idx = column_index(path, headers.iter(), ID_COLUMN)?;
        let length_idx = column_index(path, headers.iter(), LENGTH_COLUMN)?;

        let mut lengths = Self::new();
        for record in reader.records() {
            let record = record.map_err(|e| PipelineError::csv(path, e))?;
            let id = record.get(id_idx).unwrap_or_default();
            let raw_length = record.get(length_idx).unwrap_or_default();
            if id.trim().is_empty() || raw_length.trim().is_empty() {
                warn!(file = %path.display(), id, "skipping incomplete recording length row");
                continue;
            }
            lengths.insert(id, super::parse_millis(LENGTH_COLUMN, raw_length)?);
        }
        Ok(lengths)
    }

    fn from_workbook(path: &Path) -> Result<Self, PipelineError> {
        let mut workbook =
            open_workbook_auto(path).map_err(|e| PipelineError::spreadsheet(path, e))?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| PipelineError::spreadsheet(path, "workbook has no sheets"))?
            .map_err(|e| PipelineError::spreadsheet(path, e))?;

        let mut rows = range.rows();
        let header: Vec<String> = rows
            .next()
            .map(|cells| cells.iter().map(cell_text).collect())
            .unwrap_or_default();
        let id_idx = column_index(path, header.iter().map(String::as_str), ID_COLUMN)?;
        let length_idx = column_index(path, header.iter().map(String::as_str), LENGTH_COLUMN)?;

        let mut lengths = Self::new();
        for cells in rows {
            let id = cells.get(id_idx).map(cell_text).unwrap_or_default();
            let length = match cells.get(length_idx) {
                Some(Data::Int(value)) if *value >= 0 => Some(*value as u64),
                Some(Data::Float(value)) => Some(millis_from_f64(LENGTH_COLUMN, *value)?),
                Some(Data::String(value)) if !value.trim().is_empty() => {
                    Some(super::parse_millis(LENGTH_COLUMN, value)?)
                }
                Some(Data::Int(value)) => {
                    return Err(PipelineError::InvalidMillis {
                        field: LENGTH_COLUMN.to_string(),
                        value: value.to_string(),
                    })
                }
                _ => None,
            };

            match length {
                Some(length_ms) if !id.trim().is_empty() => lengths.insert(&id, length_ms),
                _ => warn!(file = %path.display(), id = %id, "skipping incomplete recording length row"),
            }
        }
        Ok(lengths)
    }
}

fn column_index<'a>(
    path: &Path,
    mut headers: impl Iterator<Item = &'a str>,
    column: &str,
) -> Result<usize, PipelineError> {
    headers
        .position(|h| h.trim() == column)
        .ok_or_else(|| PipelineError::MissingColumn {
            path: path.to_path_buf(),
            column: column.to_string(),
        })
}

/// Render a cell as an id; integral floats lose their fraction
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Int(value) => value.to_string(),
        Data::Float(value) if value.fract() == 0.0 => format!("{}", *value as i64),
        Data::Float(value) => value.to_string(),
        Data::String(value) => value.trim().to_string(),
        Data::Bool(value) => value.to_string(),
        _ => String::new(),
    }
}

impl FromIterator<(String, u64)> for RecordingLengths {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        let mut lengths = Self::new();
        for (id, length_ms) in iter {
            lengths.insert(&id, length_ms);
        }
        lengths
    }
}
