//! Pre-extracted annotation tables
//!
//! Parsing a directory of `.eaf` files is slow, so the flattened posture and
//! hand-object record sets can be persisted as CSV and read back instead.

use crate::config::StudyConfig;
use crate::error::PipelineError;
use crate::loader::AnnotationSource;
use crate::output::write_csv;
use crate::types::{AnnotationInterval, AnnotationSet};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

fn deserialize_millis<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    super::parse_millis("time", &raw).map_err(serde::de::Error::custom)
}

fn deserialize_opt_millis<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => super::parse_millis("Duration", value)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// One row of `body.csv`
#[derive(Debug, Serialize, Deserialize)]
struct PostureRecord {
    id: String,
    #[serde(rename = "TimePoint", default)]
    time_point: String,
    #[serde(rename = "StartTime", deserialize_with = "deserialize_millis")]
    start_ms: u64,
    #[serde(rename = "EndTime", deserialize_with = "deserialize_millis")]
    end_ms: u64,
    #[serde(rename = "Duration", default, deserialize_with = "deserialize_opt_millis")]
    duration_ms: Option<u64>,
    #[serde(rename = "Tier")]
    tier: String,
}

/// One row of `manual.csv`
#[derive(Debug, Serialize, Deserialize)]
struct HandRecord {
    id: String,
    #[serde(rename = "TimePoint", default)]
    time_point: String,
    #[serde(rename = "StartTime", deserialize_with = "deserialize_millis")]
    start_ms: u64,
    #[serde(rename = "EndTime", deserialize_with = "deserialize_millis")]
    end_ms: u64,
    #[serde(rename = "Duration", default, deserialize_with = "deserialize_opt_millis")]
    duration_ms: Option<u64>,
    #[serde(rename = "Tier")]
    tier: String,
    #[serde(rename = "Object")]
    object: String,
}

fn to_interval(
    path: &Path,
    id: String,
    time_point: String,
    start_ms: u64,
    end_ms: u64,
    stored_duration: Option<u64>,
    tier: String,
    label: Option<String>,
) -> Result<AnnotationInterval, PipelineError> {
    let time_point = if time_point.is_empty() {
        id.chars().last().map(String::from).unwrap_or_default()
    } else {
        time_point
    };
    let interval = AnnotationInterval::new(id, time_point, start_ms, end_ms, tier, label)?;

    if let Some(stored) = stored_duration {
        if stored != interval.duration_ms {
            warn!(
                file = %path.display(),
                participant = %interval.participant_id,
                start_ms,
                stored,
                computed = interval.duration_ms,
                "stored duration disagrees with EndTime - StartTime; using computed value"
            );
        }
    }
    Ok(interval)
}

/// Reads `body.csv` and `manual.csv`
#[derive(Debug, Clone)]
pub struct TableSource {
    body: PathBuf,
    manual: PathBuf,
}

impl TableSource {
    pub fn new(body: impl Into<PathBuf>, manual: impl Into<PathBuf>) -> Self {
        Self {
            body: body.into(),
            manual: manual.into(),
        }
    }

    /// Whether both tables exist on disk
    pub fn is_available(&self) -> bool {
        self.body.is_file() && self.manual.is_file()
    }

    fn read_postures(&self) -> Result<Vec<AnnotationInterval>, PipelineError> {
        let path = &self.body;
        let mut reader = csv::Reader::from_path(path).map_err(|e| PipelineError::csv(path, e))?;

        let mut postures = Vec::new();
        for record in reader.deserialize::<PostureRecord>() {
            let record = record.map_err(|e| PipelineError::csv(path, e))?;
            postures.push(to_interval(
                path,
                record.id,
                record.time_point,
                record.start_ms,
                record.end_ms,
                record.duration_ms,
                record.tier,
                None,
            )?);
        }
        Ok(postures)
    }

    fn read_hands(&self) -> Result<Vec<AnnotationInterval>, PipelineError> {
        let path = &self.manual;
        let mut reader = csv::Reader::from_path(path).map_err(|e| PipelineError::csv(path, e))?;

        let mut hands = Vec::new();
        for record in reader.deserialize::<HandRecord>() {
            let record = record.map_err(|e| PipelineError::csv(path, e))?;
            let label = Some(record.object.trim().to_string()).filter(|l| !l.is_empty());
            hands.push(to_interval(
                path,
                record.id,
                record.time_point,
                record.start_ms,
                record.end_ms,
                record.duration_ms,
                record.tier,
                label,
            )?);
        }
        Ok(hands)
    }
}

impl AnnotationSource for TableSource {
    fn load(&self, _study: &StudyConfig) -> Result<AnnotationSet, PipelineError> {
        for path in [&self.body, &self.manual] {
            if !path.is_file() {
                return Err(PipelineError::io(
                    path,
                    std::io::Error::new(std::io::ErrorKind::NotFound, "table not found"),
                ));
            }
        }

        let mut set = AnnotationSet {
            postures: self.read_postures()?,
            hands: self.read_hands()?,
        };
        set.sort();

        info!(
            body = %self.body.display(),
            manual = %self.manual.display(),
            postures = set.postures.len(),
            hands = set.hands.len(),
            "annotation tables loaded"
        );
        Ok(set)
    }
}

/// Columns of `body.csv`
pub const BODY_COLUMNS: [&str; 6] = ["id", "TimePoint", "StartTime", "EndTime", "Duration", "Tier"];

/// Columns of `manual.csv`
pub const MANUAL_COLUMNS: [&str; 7] = [
    "id",
    "TimePoint",
    "StartTime",
    "EndTime",
    "Duration",
    "Tier",
    "Object",
];

/// Persist the flattened record sets so later runs can skip `.eaf` parsing
pub fn write_tables(set: &AnnotationSet, body: &Path, manual: &Path) -> Result<(), PipelineError> {
    let postures: Vec<PostureRecord> = set
        .postures
        .iter()
        .map(|posture| PostureRecord {
            id: posture.participant_id.clone(),
            time_point: posture.time_point.clone(),
            start_ms: posture.start_ms,
            end_ms: posture.end_ms,
            duration_ms: Some(posture.duration_ms),
            tier: posture.category.clone(),
        })
        .collect();
    write_csv(body, &BODY_COLUMNS, &postures)?;

    let hands: Vec<HandRecord> = set
        .hands
        .iter()
        .map(|hand| HandRecord {
            id: hand.participant_id.clone(),
            time_point: hand.time_point.clone(),
            start_ms: hand.start_ms,
            end_ms: hand.end_ms,
            duration_ms: Some(hand.duration_ms),
            tier: hand.category.clone(),
            object: hand.label.clone().unwrap_or_default(),
        })
        .collect();
    write_csv(manual, &MANUAL_COLUMNS, &hands)?;

    info!(
        body = %body.display(),
        manual = %manual.display(),
        "annotation tables written"
    );
    Ok(())
}
