//! Output tables and run manifest
//!
//! Sampling episodes and both aggregate tables are written as CSV with the
//! analysis column names. Each run also gets a JSON manifest recording who
//! produced it, when, and how many records passed each stage.

use crate::error::PipelineError;
use crate::types::{AggregateTable, SamplingEpisode};
use crate::{PRODUCER_NAME, VERSION};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

pub const EPISODES_FILE: &str = "episodes.csv";
pub const AGGREGATE_ALL_FILE: &str = "aggregate_all.csv";
pub const AGGREGATE_NONZERO_FILE: &str = "aggregate_nonzero.csv";
pub const MANIFEST_FILE: &str = "manifest.json";

/// Columns of the sampling-episode table
pub const EPISODE_COLUMNS: [&str; 11] = [
    "id",
    "TimePoint",
    "StartTime",
    "EndTime",
    "Duration",
    "Hand",
    "Object",
    "Affordances",
    "Posture",
    "Condition",
    "Sitter",
];

/// Columns of both aggregate tables
pub const AGGREGATE_COLUMNS: [&str; 8] = [
    "id",
    "Affordances",
    "Condition",
    "count",
    "sum",
    "video_length",
    "count_per_minute",
    "time_per_minute",
];

/// Provenance and stage counts for one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    pub producer: String,
    pub version: String,
    pub computed_at_utc: String,
    pub participants: usize,
    pub posture_intervals: usize,
    pub hand_episodes: usize,
    pub reconciled_episodes: usize,
    pub aggregate_rows: usize,
    pub nonzero_rows: usize,
    pub overlap_warnings: usize,
    pub ambiguous_matches: usize,
}

impl RunManifest {
    /// Fresh manifest with a new run id and zeroed counts
    pub fn new() -> Self {
        Self::with_run_id(Uuid::new_v4().to_string())
    }

    pub fn with_run_id(run_id: String) -> Self {
        Self {
            run_id,
            producer: PRODUCER_NAME.to_string(),
            version: VERSION.to_string(),
            computed_at_utc: Utc::now().to_rfc3339(),
            participants: 0,
            posture_intervals: 0,
            hand_episodes: 0,
            reconciled_episodes: 0,
            aggregate_rows: 0,
            nonzero_rows: 0,
            overlap_warnings: 0,
            ambiguous_matches: 0,
        }
    }

    pub fn to_json(&self) -> Result<String, PipelineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Default for RunManifest {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialize rows to CSV; an empty table still gets its header line
pub fn write_csv<T: Serialize>(
    path: &Path,
    columns: &[&str],
    rows: &[T],
) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
    }

    let mut writer = csv::Writer::from_path(path).map_err(|e| PipelineError::csv(path, e))?;
    if rows.is_empty() {
        writer
            .write_record(columns)
            .map_err(|e| PipelineError::csv(path, e))?;
    }
    for row in rows {
        writer.serialize(row).map_err(|e| PipelineError::csv(path, e))?;
    }
    writer.flush().map_err(|e| PipelineError::io(path, e))?;

    debug!(path = %path.display(), rows = rows.len(), "table written");
    Ok(())
}

/// Writes the run's tables into one output directory
#[derive(Debug, Clone)]
pub struct OutputWriter {
    out_dir: PathBuf,
}

impl OutputWriter {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn write_episodes(&self, episodes: &[SamplingEpisode]) -> Result<PathBuf, PipelineError> {
        let path = self.out_dir.join(EPISODES_FILE);
        write_csv(&path, &EPISODE_COLUMNS, episodes)?;
        Ok(path)
    }

    /// Write the full grid and the non-zero subset
    pub fn write_aggregate(&self, table: &AggregateTable) -> Result<Vec<PathBuf>, PipelineError> {
        let all = self.out_dir.join(AGGREGATE_ALL_FILE);
        let nonzero = self.out_dir.join(AGGREGATE_NONZERO_FILE);
        write_csv(&all, &AGGREGATE_COLUMNS, &table.all)?;
        write_csv(&nonzero, &AGGREGATE_COLUMNS, &table.nonzero)?;
        Ok(vec![all, nonzero])
    }

    pub fn write_manifest(&self, manifest: &RunManifest) -> Result<PathBuf, PipelineError> {
        std::fs::create_dir_all(&self.out_dir).map_err(|e| PipelineError::io(&self.out_dir, e))?;
        let path = self.out_dir.join(MANIFEST_FILE);
        std::fs::write(&path, manifest.to_json()?).map_err(|e| PipelineError::io(&path, e))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AggregateRow, Condition, HandSide};
    use pretty_assertions::assert_eq;

    fn sample_episode() -> SamplingEpisode {
        SamplingEpisode {
            participant_id: "12345".to_string(),
            time_point: "3".to_string(),
            start_ms: 1000,
            end_ms: 1200,
            duration_s: 0.2,
            hand_side: HandSide::Left,
            object_label: "dino".to_string(),
            affordance: "graspable".to_string(),
            posture_category: "Sitting".to_string(),
            condition: Condition::IndependentSitting,
            sitter: true,
        }
    }

    #[test]
    fn test_episode_table_columns() {
        let dir = tempfile::tempdir().unwrap();
        let writer = OutputWriter::new(dir.path().join("out"));

        let path = writer.write_episodes(&[sample_episode()]).unwrap();
        let text = std::fs::read_to_string(path).unwrap();

        assert_eq!(
            text,
            "id,TimePoint,StartTime,EndTime,Duration,Hand,Object,Affordances,Posture,Condition,Sitter\n\
             12345,3,1000,1200,0.2,left,dino,graspable,Sitting,Independent sitting,true\n"
        );
    }

    #[test]
    fn test_empty_tables_keep_header() {
        let dir = tempfile::tempdir().unwrap();
        let writer = OutputWriter::new(dir.path());

        let paths = writer.write_aggregate(&AggregateTable::default()).unwrap();
        let text = std::fs::read_to_string(&paths[1]).unwrap();
        assert_eq!(text, format!("{}\n", AGGREGATE_COLUMNS.join(",")));
    }

    #[test]
    fn test_missing_rates_are_blank() {
        let dir = tempfile::tempdir().unwrap();
        let writer = OutputWriter::new(dir.path());
        let row = AggregateRow {
            participant_id: "12345".to_string(),
            affordance: "stationary".to_string(),
            condition: Condition::Other,
            event_count: 2,
            total_duration_s: 1.5,
            recording_length_ms: None,
            count_per_minute: None,
            time_per_minute: None,
        };
        let table = AggregateTable {
            all: vec![row.clone()],
            nonzero: vec![row],
        };

        let paths = writer.write_aggregate(&table).unwrap();
        let text = std::fs::read_to_string(&paths[0]).unwrap();
        assert_eq!(text.lines().nth(1), Some("12345,stationary,Other,2,1.5,,,"));
    }

    #[test]
    fn test_manifest_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let writer = OutputWriter::new(dir.path());
        let mut manifest = RunManifest::with_run_id("run-1".to_string());
        manifest.reconciled_episodes = 4;

        let path = writer.write_manifest(&manifest).unwrap();
        let parsed: RunManifest =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();

        assert_eq!(parsed, manifest);
        assert_eq!(parsed.producer, PRODUCER_NAME);
    }

    #[test]
    fn test_new_manifests_get_distinct_ids() {
        assert_ne!(RunManifest::new().run_id, RunManifest::new().run_id);
    }
}
