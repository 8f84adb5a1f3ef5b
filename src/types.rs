//! Core types for the positions/objects pipeline
//!
//! This module defines the records that flow through each stage of the
//! pipeline: raw annotation intervals, hand episodes, reconciled episodes,
//! classified sampling episodes, and aggregate rows.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest float that still maps onto an exact integer millisecond value
const MAX_EXACT_MILLIS: f64 = 9_007_199_254_740_992.0;

/// Convert a float time value to whole milliseconds.
///
/// Tables written by other tools often carry integer times as `1000.0`.
/// Those are accepted; fractional, negative or non-finite values are not.
pub fn millis_from_f64(field: &str, value: f64) -> Result<u64, PipelineError> {
    if !value.is_finite() || value < 0.0 || value.fract() != 0.0 || value > MAX_EXACT_MILLIS {
        return Err(PipelineError::InvalidMillis {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
    Ok(value as u64)
}

/// Which hand an object-handling tier codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandSide {
    Left,
    Right,
}

impl HandSide {
    pub const ALL: [HandSide; 2] = [HandSide::Left, HandSide::Right];

    pub fn as_str(&self) -> &'static str {
        match self {
            HandSide::Left => "left",
            HandSide::Right => "right",
        }
    }
}

impl fmt::Display for HandSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One coded annotation on one tier of one participant's recording.
///
/// Posture intervals carry no label; hand-object intervals carry the held
/// object as label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationInterval {
    pub participant_id: String,
    pub time_point: String,
    pub start_ms: u64,
    pub end_ms: u64,
    pub duration_ms: u64,
    /// Tier name
    pub category: String,
    pub label: Option<String>,
}

impl AnnotationInterval {
    /// Build an interval, rejecting spans that end before they start
    pub fn new(
        participant_id: impl Into<String>,
        time_point: impl Into<String>,
        start_ms: u64,
        end_ms: u64,
        category: impl Into<String>,
        label: Option<String>,
    ) -> Result<Self, PipelineError> {
        let participant_id = participant_id.into();
        let duration_ms = end_ms
            .checked_sub(start_ms)
            .ok_or_else(|| PipelineError::NegativeDuration {
                participant: participant_id.clone(),
                start_ms,
                end_ms,
            })?;

        Ok(Self {
            participant_id,
            time_point: time_point.into(),
            start_ms,
            end_ms,
            duration_ms,
            category: category.into(),
            label,
        })
    }

    /// Half-open overlap: touching boundaries do not count
    pub fn overlaps(&self, start_ms: u64, end_ms: u64) -> bool {
        self.start_ms < end_ms && self.end_ms > start_ms
    }
}

/// Posture intervals and hand intervals extracted from a batch of recordings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationSet {
    pub postures: Vec<AnnotationInterval>,
    pub hands: Vec<AnnotationInterval>,
}

impl AnnotationSet {
    /// Sort both record sets by (participant, start time)
    pub fn sort(&mut self) {
        let key = |a: &AnnotationInterval| (a.participant_id.clone(), a.start_ms);
        self.postures.sort_by_key(key);
        self.hands.sort_by_key(key);
    }

    pub fn extend(&mut self, other: AnnotationSet) {
        self.postures.extend(other.postures);
        self.hands.extend(other.hands);
    }

    pub fn is_empty(&self) -> bool {
        self.postures.is_empty() && self.hands.is_empty()
    }
}

/// A hand-object interval on a tracked hand tier holding a tracked object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandEpisode {
    pub participant_id: String,
    pub time_point: String,
    pub start_ms: u64,
    pub end_ms: u64,
    pub side: HandSide,
    pub object: String,
}

/// The part of a hand episode that co-occurs with one posture interval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciledEpisode {
    pub participant_id: String,
    pub time_point: String,
    pub start_ms: u64,
    pub end_ms: u64,
    pub duration_ms: u64,
    pub hand_side: HandSide,
    pub object_label: String,
    pub posture_category: String,
}

/// Posture condition an episode is reported under
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Condition {
    #[serde(rename = "Independent sitting")]
    IndependentSitting,
    #[serde(rename = "Other")]
    Other,
}

impl Condition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::IndependentSitting => "Independent sitting",
            Condition::Other => "Other",
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reconciled episode with its affordance class and condition assigned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingEpisode {
    #[serde(rename = "id")]
    pub participant_id: String,
    #[serde(rename = "TimePoint")]
    pub time_point: String,
    #[serde(rename = "StartTime")]
    pub start_ms: u64,
    #[serde(rename = "EndTime")]
    pub end_ms: u64,
    /// Seconds
    #[serde(rename = "Duration")]
    pub duration_s: f64,
    #[serde(rename = "Hand")]
    pub hand_side: HandSide,
    #[serde(rename = "Object")]
    pub object_label: String,
    #[serde(rename = "Affordances")]
    pub affordance: String,
    #[serde(rename = "Posture")]
    pub posture_category: String,
    #[serde(rename = "Condition")]
    pub condition: Condition,
    /// Whether this participant has any episode under the sitting condition
    #[serde(rename = "Sitter")]
    pub sitter: bool,
}

/// Per participant × affordance × condition statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRow {
    #[serde(rename = "id")]
    pub participant_id: String,
    #[serde(rename = "Affordances")]
    pub affordance: String,
    #[serde(rename = "Condition")]
    pub condition: Condition,
    #[serde(rename = "count")]
    pub event_count: u32,
    /// Seconds
    #[serde(rename = "sum")]
    pub total_duration_s: f64,
    #[serde(rename = "video_length")]
    pub recording_length_ms: Option<u64>,
    pub count_per_minute: Option<f64>,
    pub time_per_minute: Option<f64>,
}

/// Aggregator output: every combination, and the subset with observed episodes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateTable {
    pub all: Vec<AggregateRow>,
    pub nonzero: Vec<AggregateRow>,
}
