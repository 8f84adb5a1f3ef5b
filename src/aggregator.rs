//! Per-participant aggregation
//!
//! Groups sampling episodes by participant × affordance × condition, fills
//! every unobserved combination with zeros, and normalizes counts and
//! durations by recording length.

use crate::loader::RecordingLengths;
use crate::types::{AggregateRow, AggregateTable, Condition, SamplingEpisode};
use std::collections::HashMap;
use tracing::{info, warn};

const MS_PER_MINUTE: f64 = 60_000.0;

/// Distinct values in order of first appearance
fn distinct<T: PartialEq + Clone>(values: impl Iterator<Item = T>) -> Vec<T> {
    let mut seen: Vec<T> = Vec::new();
    for value in values {
        if !seen.contains(&value) {
            seen.push(value);
        }
    }
    seen
}

/// Aggregator for sampling episodes
pub struct Aggregator;

impl Aggregator {
    /// Aggregate episodes onto the full participant × affordance × condition grid.
    ///
    /// A participant without a recording length keeps its counts but gets no rates.
    pub fn aggregate(episodes: &[SamplingEpisode], lengths: &RecordingLengths) -> AggregateTable {
        let participants = distinct(episodes.iter().map(|e| e.participant_id.as_str()));
        let affordances = distinct(episodes.iter().map(|e| e.affordance.as_str()));
        let conditions = distinct(episodes.iter().map(|e| e.condition));

        let mut groups: HashMap<(&str, &str, Condition), (u32, f64)> = HashMap::new();
        for episode in episodes {
            let entry = groups
                .entry((
                    episode.participant_id.as_str(),
                    episode.affordance.as_str(),
                    episode.condition,
                ))
                .or_insert((0, 0.0));
            entry.0 += 1;
            entry.1 += episode.duration_s;
        }

        let mut all = Vec::with_capacity(participants.len() * affordances.len() * conditions.len());
        for participant in &participants {
            let recording_length_ms = lengths.get(participant);
            if recording_length_ms.is_none() {
                warn!(participant = *participant, "no recording length; rates left empty");
            }
            let minutes = recording_length_ms
                .map(|ms| ms as f64 / MS_PER_MINUTE)
                .filter(|m| *m > 0.0);

            for affordance in &affordances {
                for condition in &conditions {
                    let (event_count, total_duration_s) = groups
                        .get(&(*participant, *affordance, *condition))
                        .copied()
                        .unwrap_or((0, 0.0));

                    all.push(AggregateRow {
                        participant_id: participant.to_string(),
                        affordance: affordance.to_string(),
                        condition: *condition,
                        event_count,
                        total_duration_s,
                        recording_length_ms,
                        count_per_minute: minutes.map(|m| event_count as f64 / m),
                        time_per_minute: minutes.map(|m| total_duration_s / m),
                    });
                }
            }
        }

        let nonzero: Vec<AggregateRow> = all.iter().filter(|r| r.event_count > 0).cloned().collect();

        info!(
            participants = participants.len(),
            affordances = affordances.len(),
            conditions = conditions.len(),
            rows = all.len(),
            nonzero = nonzero.len(),
            "aggregation complete"
        );
        AggregateTable { all, nonzero }
    }
}
