//! Reporting boundary
//!
//! Box/swarm plots are drawn by an external tool. This module prepares what
//! that tool consumes: two condition panels of (participant, affordance,
//! value) points, the y variable, affordance order, colours and icons.

use crate::error::PipelineError;
use crate::types::{AggregateRow, Condition, SamplingEpisode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Handed to the plotting tool, which drops points at or above it. Panels keep every point.
pub const DEFAULT_OUTLIER_THRESHOLD: f64 = 20.0;

/// Plot styling supplied with every request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Affordance class → hex colour
    pub colors: BTreeMap<String, String>,
    /// Affordance class → icon images drawn under its axis label
    pub icons: BTreeMap<String, Vec<PathBuf>>,
    pub outlier_threshold: f64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            colors: [("graspable", "#2bc3db"), ("stationary", "#bfd739")]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            icons: BTreeMap::new(),
            outlier_threshold: DEFAULT_OUTLIER_THRESHOLD,
        }
    }
}

/// Column plotted on the y axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum YVariable {
    #[serde(rename = "Duration")]
    Duration,
    #[serde(rename = "count_per_minute")]
    CountPerMinute,
    #[serde(rename = "time_per_minute")]
    TimePerMinute,
}

impl YVariable {
    pub fn column(&self) -> &'static str {
        match self {
            YVariable::Duration => "Duration",
            YVariable::CountPerMinute => "count_per_minute",
            YVariable::TimePerMinute => "time_per_minute",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotPoint {
    pub participant_id: String,
    pub affordance: String,
    pub condition: Condition,
    pub value: f64,
}

/// Median episode duration (s) per participant × affordance × condition
pub fn median_durations(episodes: &[SamplingEpisode]) -> Vec<PlotPoint> {
    let mut groups: BTreeMap<(&str, &str, Condition), Vec<f64>> = BTreeMap::new();
    for episode in episodes {
        groups
            .entry((
                episode.participant_id.as_str(),
                episode.affordance.as_str(),
                episode.condition,
            ))
            .or_default()
            .push(episode.duration_s);
    }

    groups
        .into_iter()
        .map(|((participant, affordance, condition), mut durations)| {
            durations.sort_by(f64::total_cmp);
            let mid = durations.len() / 2;
            let median = if durations.len() % 2 == 0 {
                (durations[mid - 1] + durations[mid]) / 2.0
            } else {
                durations[mid]
            };
            PlotPoint {
                participant_id: participant.to_string(),
                affordance: affordance.to_string(),
                condition,
                value: median,
            }
        })
        .collect()
}

/// Rate points from aggregate rows; rows without a rate are skipped
pub fn rate_points(rows: &[AggregateRow], y_var: YVariable) -> Vec<PlotPoint> {
    rows.iter()
        .filter_map(|row| {
            let value = match y_var {
                YVariable::CountPerMinute => row.count_per_minute,
                YVariable::TimePerMinute => row.time_per_minute,
                YVariable::Duration => Some(row.total_duration_s),
            }?;
            Some(PlotPoint {
                participant_id: row.participant_id.clone(),
                affordance: row.affordance.clone(),
                condition: row.condition,
                value,
            })
        })
        .collect()
}

/// Point counts for one panel, as annotated under each box
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelSummary {
    pub condition: Condition,
    pub points: usize,
    pub counts_by_affordance: BTreeMap<String, usize>,
    /// Points at or above the outlier threshold
    pub outliers: usize,
    pub outlier_pct: f64,
}

impl PanelSummary {
    fn from_points(condition: Condition, points: &[PlotPoint], threshold: f64) -> Self {
        let mut counts_by_affordance = BTreeMap::new();
        for point in points {
            *counts_by_affordance.entry(point.affordance.clone()).or_insert(0) += 1;
        }
        let outliers = points.iter().filter(|p| p.value >= threshold).count();
        let outlier_pct = if points.is_empty() {
            0.0
        } else {
            outliers as f64 * 100.0 / points.len() as f64
        };

        Self {
            condition,
            points: points.len(),
            counts_by_affordance,
            outliers,
            outlier_pct,
        }
    }
}

/// Everything the external plotting tool needs for one figure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotRequest {
    pub name: String,
    pub y_var: YVariable,
    pub affordance_order: Vec<String>,
    pub colors: BTreeMap<String, String>,
    pub icons: BTreeMap<String, Vec<PathBuf>>,
    pub outlier_threshold: f64,
    pub sitting: Vec<PlotPoint>,
    pub other: Vec<PlotPoint>,
    pub summaries: Vec<PanelSummary>,
}

impl PlotRequest {
    /// Split points into the sitting and other panels
    pub fn new(
        name: impl Into<String>,
        y_var: YVariable,
        points: Vec<PlotPoint>,
        affordance_order: Vec<String>,
        style: &ReportConfig,
    ) -> Self {
        let (sitting, other): (Vec<PlotPoint>, Vec<PlotPoint>) = points
            .into_iter()
            .partition(|p| p.condition == Condition::IndependentSitting);

        let summaries = vec![
            PanelSummary::from_points(Condition::IndependentSitting, &sitting, style.outlier_threshold),
            PanelSummary::from_points(Condition::Other, &other, style.outlier_threshold),
        ];

        Self {
            name: name.into(),
            y_var,
            affordance_order,
            colors: style.colors.clone(),
            icons: style.icons.clone(),
            outlier_threshold: style.outlier_threshold,
            sitting,
            other,
            summaries,
        }
    }
}

/// Sink that turns plot requests into figures or plot-ready files
pub trait ReportSink {
    fn render(&mut self, request: &PlotRequest) -> Result<(), PipelineError>;
}

/// Writes each panel as CSV and the full request as JSON
#[derive(Debug, Clone)]
pub struct FileReportSink {
    out_dir: PathBuf,
    written: Vec<PathBuf>,
}

impl FileReportSink {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            written: Vec::new(),
        }
    }

    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    fn write_panel(
        &mut self,
        path: PathBuf,
        y_var: YVariable,
        points: &[PlotPoint],
    ) -> Result<(), PipelineError> {
        let mut writer = csv::Writer::from_path(&path).map_err(|e| PipelineError::csv(&path, e))?;
        writer
            .write_record(["id", "Affordances", "Condition", y_var.column()])
            .map_err(|e| PipelineError::csv(&path, e))?;
        for point in points {
            let value = point.value.to_string();
            writer
                .write_record([
                    point.participant_id.as_str(),
                    point.affordance.as_str(),
                    point.condition.as_str(),
                    value.as_str(),
                ])
                .map_err(|e| PipelineError::csv(&path, e))?;
        }
        writer.flush().map_err(|e| PipelineError::io(&path, e))?;
        self.written.push(path);
        Ok(())
    }
}

impl ReportSink for FileReportSink {
    fn render(&mut self, request: &PlotRequest) -> Result<(), PipelineError> {
        let dir: &Path = &self.out_dir;
        std::fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;

        let sitting_path = dir.join(format!("{}_sitting.csv", request.name));
        let other_path = dir.join(format!("{}_other.csv", request.name));
        let request_path = dir.join(format!("{}.json", request.name));

        self.write_panel(sitting_path, request.y_var, &request.sitting)?;
        self.write_panel(other_path, request.y_var, &request.other)?;

        let json = serde_json::to_string_pretty(request)?;
        std::fs::write(&request_path, json).map_err(|e| PipelineError::io(&request_path, e))?;
        self.written.push(request_path);

        for summary in &request.summaries {
            info!(
                plot = %request.name,
                condition = %summary.condition,
                points = summary.points,
                outliers = summary.outliers,
                outlier_pct = summary.outlier_pct,
                "plot panel prepared"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HandSide;
    use pretty_assertions::assert_eq;

    fn episode(id: &str, affordance: &str, condition: Condition, duration_s: f64) -> SamplingEpisode {
        SamplingEpisode {
            participant_id: id.to_string(),
            time_point: "3".to_string(),
            start_ms: 0,
            end_ms: 0,
            duration_s,
            hand_side: HandSide::Left,
            object_label: "dino".to_string(),
            affordance: affordance.to_string(),
            posture_category: "Sitting".to_string(),
            condition,
            sitter: true,
        }
    }

    fn point(id: &str, affordance: &str, condition: Condition, value: f64) -> PlotPoint {
        PlotPoint {
            participant_id: id.to_string(),
            affordance: affordance.to_string(),
            condition,
            value,
        }
    }

    #[test]
    fn test_median_durations() {
        let medians = median_durations(&[
            episode("11111", "graspable", Condition::Other, 3.0),
            episode("11111", "graspable", Condition::Other, 1.0),
            episode("11111", "graspable", Condition::Other, 2.0),
            episode("11111", "graspable", Condition::IndependentSitting, 4.0),
            episode("11111", "graspable", Condition::IndependentSitting, 1.0),
        ]);

        assert_eq!(
            medians,
            vec![
                point("11111", "graspable", Condition::IndependentSitting, 2.5),
                point("11111", "graspable", Condition::Other, 2.0),
            ]
        );
    }

    #[test]
    fn test_plot_request_splits_and_summarizes() {
        let points = vec![
            point("11111", "graspable", Condition::IndependentSitting, 25.0),
            point("22222", "graspable", Condition::IndependentSitting, 5.0),
            point("11111", "stationary", Condition::Other, 1.0),
        ];

        let request = PlotRequest::new(
            "duration",
            YVariable::Duration,
            points,
            vec!["graspable".to_string(), "stationary".to_string()],
            &ReportConfig::default(),
        );

        assert_eq!(request.sitting.len(), 2);
        assert_eq!(request.other.len(), 1);
        // the outlier stays in its panel; the threshold travels with the request
        assert!(request.sitting.iter().any(|p| p.value == 25.0));
        assert_eq!(request.outlier_threshold, DEFAULT_OUTLIER_THRESHOLD);
        assert_eq!(request.summaries[0].outliers, 1);
        assert!((request.summaries[0].outlier_pct - 50.0).abs() < 1e-9);
        assert_eq!(request.summaries[1].counts_by_affordance.get("stationary"), Some(&1));
        assert_eq!(request.colors.get("graspable").map(String::as_str), Some("#2bc3db"));
    }

    #[test]
    fn test_rate_points_skip_missing_rates() {
        let rows = vec![
            AggregateRow {
                participant_id: "11111".to_string(),
                affordance: "graspable".to_string(),
                condition: Condition::Other,
                event_count: 2,
                total_duration_s: 3.0,
                recording_length_ms: Some(60_000),
                count_per_minute: Some(2.0),
                time_per_minute: Some(3.0),
            },
            AggregateRow {
                participant_id: "22222".to_string(),
                affordance: "graspable".to_string(),
                condition: Condition::Other,
                event_count: 1,
                total_duration_s: 1.0,
                recording_length_ms: None,
                count_per_minute: None,
                time_per_minute: None,
            },
        ];

        let points = rate_points(&rows, YVariable::CountPerMinute);
        assert_eq!(points, vec![point("11111", "graspable", Condition::Other, 2.0)]);
    }

    #[test]
    fn test_file_sink_writes_panels() {
        let dir = tempfile::tempdir().unwrap();
        let request = PlotRequest::new(
            "count_per_minute",
            YVariable::CountPerMinute,
            vec![point("11111", "graspable", Condition::IndependentSitting, 0.3)],
            vec!["graspable".to_string()],
            &ReportConfig::default(),
        );

        let mut sink = FileReportSink::new(dir.path().join("plots"));
        sink.render(&request).unwrap();

        assert_eq!(sink.written().len(), 3);
        let sitting =
            std::fs::read_to_string(dir.path().join("plots/count_per_minute_sitting.csv")).unwrap();
        assert_eq!(
            sitting,
            "id,Affordances,Condition,count_per_minute\n11111,graspable,Independent sitting,0.3\n"
        );

        let json = std::fs::read_to_string(dir.path().join("plots/count_per_minute.json")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["y_var"], "count_per_minute");
        assert_eq!(parsed["sitting"][0]["condition"], "Independent sitting");
    }
}
