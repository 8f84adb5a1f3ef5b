//! Episode classification
//!
//! Turns reconciled episodes into sampling episodes:
//! - participant ids reduced to the subject key
//! - condition: the sitting category vs. every other posture
//! - participant-level sitter flag
//! - object label mapped to its affordance class
//! - duration in seconds

use crate::config::StudyConfig;
use crate::types::{Condition, ReconciledEpisode, SamplingEpisode};
use std::collections::HashSet;

/// Classifier for reconciled episodes
pub struct EpisodeClassifier<'a> {
    study: &'a StudyConfig,
}

impl<'a> EpisodeClassifier<'a> {
    pub fn new(study: &'a StudyConfig) -> Self {
        Self { study }
    }

    pub fn condition_for(&self, posture_category: &str) -> Condition {
        if posture_category == self.study.sitting_category {
            Condition::IndependentSitting
        } else {
            Condition::Other
        }
    }

    /// Classify all episodes; order is preserved
    pub fn classify(&self, episodes: &[ReconciledEpisode]) -> Vec<SamplingEpisode> {
        let sitters: HashSet<String> = episodes
            .iter()
            .filter(|e| self.condition_for(&e.posture_category) == Condition::IndependentSitting)
            .map(|e| self.study.subject_id(&e.participant_id))
            .collect();

        episodes
            .iter()
            .map(|episode| {
                let participant_id = self.study.subject_id(&episode.participant_id);
                SamplingEpisode {
                    sitter: sitters.contains(&participant_id),
                    participant_id,
                    time_point: episode.time_point.clone(),
                    start_ms: episode.start_ms,
                    end_ms: episode.end_ms,
                    duration_s: episode.duration_ms as f64 / 1000.0,
                    hand_side: episode.hand_side,
                    object_label: episode.object_label.clone(),
                    affordance: self.study.affordance_for(&episode.object_label),
                    posture_category: episode.posture_category.clone(),
                    condition: self.condition_for(&episode.posture_category),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HandSide;

    fn episode(id: &str, category: &str, object: &str, start: u64, end: u64) -> ReconciledEpisode {
        ReconciledEpisode {
            participant_id: id.to_string(),
            time_point: "3".to_string(),
            start_ms: start,
            end_ms: end,
            duration_ms: end - start,
            hand_side: HandSide::Left,
            object_label: object.to_string(),
            posture_category: category.to_string(),
        }
    }

    #[test]
    fn test_classify_sitting_episode() {
        let study = StudyConfig::default();
        let classified =
            EpisodeClassifier::new(&study).classify(&[episode("1234503", "Sitting", "dino", 1000, 1200)]);

        assert_eq!(classified.len(), 1);
        let e = &classified[0];
        assert_eq!(e.participant_id, "12345");
        assert_eq!(e.affordance, "graspable");
        assert_eq!(e.condition, Condition::IndependentSitting);
        assert!((e.duration_s - 0.2).abs() < 1e-9);
        assert!(e.sitter);
    }

    #[test]
    fn test_sitter_flag_is_participant_level() {
        let study = StudyConfig::default();
        let classified = EpisodeClassifier::new(&study).classify(&[
            episode("1111103", "Standing", "klickity", 0, 4000),
            episode("1111103", "Sitting", "dino", 5000, 6000),
            episode("2222203", "Prone", "spinner", 0, 1500),
        ]);

        let flags: Vec<(&str, Condition, bool)> = classified
            .iter()
            .map(|e| (e.participant_id.as_str(), e.condition, e.sitter))
            .collect();
        assert_eq!(
            flags,
            vec![
                ("11111", Condition::Other, true),
                ("11111", Condition::IndependentSitting, true),
                ("22222", Condition::Other, false),
            ]
        );
        assert_eq!(classified[0].affordance, "stationary");
    }

    #[test]
    fn test_unmapped_objects_keep_their_label() {
        let study = StudyConfig {
            tracked_objects: vec!["ball".to_string()],
            ..Default::default()
        };
        let classified =
            EpisodeClassifier::new(&study).classify(&[episode("1234503", "Sitting", "ball", 0, 10)]);
        assert_eq!(classified[0].affordance, "ball");
    }
}
