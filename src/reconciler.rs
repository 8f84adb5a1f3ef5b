//! Interval reconciliation
//!
//! For every participant, every studied posture category and every hand,
//! each tracked hand episode is clipped against the first qualifying posture
//! interval it overlaps. Participants are independent, so they are processed
//! as a fork-join over the participant list; output order is still
//! participant → posture category → hand → hand episode start.

use crate::config::StudyConfig;
use crate::error::PipelineError;
use crate::types::{AnnotationInterval, AnnotationSet, HandEpisode, HandSide, ReconciledEpisode};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Two same-category posture intervals of one participant that overlap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostureOverlap {
    pub participant_id: String,
    pub category: String,
    pub first: (u64, u64),
    pub second: (u64, u64),
}

impl PostureOverlap {
    fn into_error(self) -> PipelineError {
        PipelineError::OverlappingPostures {
            participant: self.participant_id,
            category: self.category,
            first: self.first,
            second: self.second,
        }
    }
}

/// Reconciler output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub episodes: Vec<ReconciledEpisode>,
    /// Data-quality findings on the qualifying posture intervals
    pub overlaps: Vec<PostureOverlap>,
    /// Hand episodes that overlapped more than one posture interval of a category
    pub ambiguous_matches: usize,
    pub qualifying_postures: usize,
    pub tracked_hands: usize,
}

/// Qualifying posture intervals of one participant, by category, sorted by start
type PostureGroups<'s> = BTreeMap<&'s str, Vec<&'s AnnotationInterval>>;

#[derive(Default)]
struct ParticipantResult {
    episodes: Vec<ReconciledEpisode>,
    overlaps: Vec<PostureOverlap>,
    ambiguous_matches: usize,
}

pub struct Reconciler<'a> {
    study: &'a StudyConfig,
}

impl<'a> Reconciler<'a> {
    pub fn new(study: &'a StudyConfig) -> Self {
        Self { study }
    }

    /// Posture intervals of a studied category lasting longer than the noise floor
    pub fn qualifying_postures<'s>(
        &self,
        postures: &'s [AnnotationInterval],
    ) -> Vec<&'s AnnotationInterval> {
        postures
            .iter()
            .filter(|p| p.label.is_none())
            .filter(|p| self.study.is_studied_posture(&p.category))
            .filter(|p| p.duration_ms > self.study.min_posture_duration_ms)
            .collect()
    }

    /// Hand intervals on a tracked limb tier holding a tracked object
    pub fn tracked_hands(&self, hands: &[AnnotationInterval]) -> Vec<HandEpisode> {
        let (tracked, dropped): (Vec<_>, Vec<_>) = hands
            .iter()
            .filter_map(|h| {
                let side = self.study.hand_side_for_tier(&h.category)?;
                Some((h, side))
            })
            .partition(|(h, _)| {
                h.label
                    .as_deref()
                    .map_or(false, |label| self.study.is_tracked_object(label))
            });

        if !dropped.is_empty() {
            debug!(dropped = dropped.len(), "hand episodes with untracked objects dropped");
        }

        tracked
            .into_iter()
            .map(|(h, side)| HandEpisode {
                participant_id: h.participant_id.clone(),
                time_point: h.time_point.clone(),
                start_ms: h.start_ms,
                end_ms: h.end_ms,
                side,
                object: h.label.clone().unwrap_or_default(),
            })
            .collect()
    }

    /// Run the reconciliation over a full annotation set
    pub fn reconcile(&self, set: &AnnotationSet) -> Result<Reconciliation, PipelineError> {
        let postures = self.qualifying_postures(&set.postures);
        let hands = self.tracked_hands(&set.hands);

        // Every participant with hand-object coding, in id order
        let mut participants: Vec<&str> = set.hands.iter().map(|h| h.participant_id.as_str()).collect();
        participants.sort_unstable();
        participants.dedup();

        let mut postures_by_participant =
            by_participant(postures.iter().copied(), |p| p.participant_id.as_str());
        let mut hands_by_participant = by_participant(hands.iter(), |h| h.participant_id.as_str());
        let work: Vec<(&str, PostureGroups<'_>, Vec<&HandEpisode>)> = participants
            .iter()
            .map(|participant| {
                let groups = group_postures(
                    postures_by_participant.remove(participant).unwrap_or_default(),
                );
                let participant_hands = hands_by_participant.remove(participant).unwrap_or_default();
                (*participant, groups, participant_hands)
            })
            .collect();

        let results: Vec<ParticipantResult> = work
            .par_iter()
            .map(|(participant, groups, participant_hands)| {
                self.reconcile_participant(participant, groups, participant_hands)
            })
            .collect::<Result<_, _>>()?;

        let mut reconciliation = Reconciliation {
            qualifying_postures: postures.len(),
            tracked_hands: hands.len(),
            ..Default::default()
        };
        for result in results {
            reconciliation.episodes.extend(result.episodes);
            reconciliation.overlaps.extend(result.overlaps);
            reconciliation.ambiguous_matches += result.ambiguous_matches;
        }

        if self.study.strict_posture_overlaps {
            if let Some(overlap) = reconciliation.overlaps.first().cloned() {
                return Err(overlap.into_error());
            }
        }

        info!(
            participants = participants.len(),
            qualifying_postures = reconciliation.qualifying_postures,
            tracked_hands = reconciliation.tracked_hands,
            episodes = reconciliation.episodes.len(),
            overlaps = reconciliation.overlaps.len(),
            ambiguous_matches = reconciliation.ambiguous_matches,
            "reconciliation complete"
        );
        Ok(reconciliation)
    }

    fn reconcile_participant(
        &self,
        participant: &str,
        groups: &PostureGroups<'_>,
        hands: &[&HandEpisode],
    ) -> Result<ParticipantResult, PipelineError> {
        let mut result = ParticipantResult::default();

        for (category, group) in groups {
            for overlap in overlapping_pairs(participant, category, group) {
                warn!(
                    participant,
                    category = *category,
                    first = ?overlap.first,
                    second = ?overlap.second,
                    "overlapping posture intervals; first-match resolution may hide coding errors"
                );
                result.overlaps.push(overlap);
            }

            for side in HandSide::ALL {
                for hand in hands.iter().filter(|h| h.side == side) {
                    let Some(index) = group
                        .iter()
                        .position(|p| p.overlaps(hand.start_ms, hand.end_ms))
                    else {
                        continue;
                    };

                    if group[index + 1..]
                        .iter()
                        .any(|p| p.overlaps(hand.start_ms, hand.end_ms))
                    {
                        result.ambiguous_matches += 1;
                        warn!(
                            participant,
                            category = *category,
                            hand = %side,
                            start_ms = hand.start_ms,
                            end_ms = hand.end_ms,
                            "hand episode overlaps several posture intervals; using the earliest"
                        );
                    }

                    result.episodes.push(clip(hand, group[index], category)?);
                }
            }
        }

        debug!(participant, episodes = result.episodes.len(), "participant reconciled");
        Ok(result)
    }
}

/// Split records by participant id, keeping their relative order
fn by_participant<'s, T>(
    records: impl Iterator<Item = &'s T>,
    participant_id: impl Fn(&T) -> &str,
) -> BTreeMap<&'s str, Vec<&'s T>> {
    let mut split: BTreeMap<&'s str, Vec<&'s T>> = BTreeMap::new();
    for record in records {
        split.entry(participant_id(record)).or_default().push(record);
    }
    split
}

/// Group one participant's postures by category, each group sorted by start
fn group_postures(postures: Vec<&AnnotationInterval>) -> PostureGroups<'_> {
    let mut groups: PostureGroups<'_> = BTreeMap::new();
    for posture in postures {
        groups.entry(posture.category.as_str()).or_default().push(posture);
    }
    for group in groups.values_mut() {
        group.sort_by_key(|p| p.start_ms);
    }
    groups
}

/// Clip a hand episode to a posture interval it is known to overlap
fn clip(
    hand: &HandEpisode,
    posture: &AnnotationInterval,
    category: &str,
) -> Result<ReconciledEpisode, PipelineError> {
    let start_ms = hand.start_ms.max(posture.start_ms);
    let end_ms = hand.end_ms.min(posture.end_ms);
    let duration_ms = end_ms
        .checked_sub(start_ms)
        .ok_or_else(|| PipelineError::NegativeDuration {
            participant: hand.participant_id.clone(),
            start_ms,
            end_ms,
        })?;

    Ok(ReconciledEpisode {
        participant_id: hand.participant_id.clone(),
        time_point: hand.time_point.clone(),
        start_ms,
        end_ms,
        duration_ms,
        hand_side: hand.side,
        object_label: hand.object.clone(),
        posture_category: category.to_string(),
    })
}

/// Every overlapping pair in a start-sorted group, earlier interval first
fn overlapping_pairs(
    participant: &str,
    category: &str,
    group: &[&AnnotationInterval],
) -> Vec<PostureOverlap> {
    let mut overlaps = Vec::new();

    for (i, posture) in group.iter().enumerate() {
        for earlier in &group[..i] {
            if posture.overlaps(earlier.start_ms, earlier.end_ms) {
                overlaps.push(PostureOverlap {
                    participant_id: participant.to_string(),
                    category: category.to_string(),
                    first: (earlier.start_ms, earlier.end_ms),
                    second: (posture.start_ms, posture.end_ms),
                });
            }
        }
    }
    overlaps
}

/// List overlapping same-category qualifying posture intervals without reconciling
pub fn find_posture_overlaps(set: &AnnotationSet, study: &StudyConfig) -> Vec<PostureOverlap> {
    let reconciler = Reconciler::new(study);
    let postures = reconciler.qualifying_postures(&set.postures);

    by_participant(postures.iter().copied(), |p| p.participant_id.as_str())
        .into_iter()
        .flat_map(|(participant, postures)| {
            group_postures(postures)
                .into_iter()
                .flat_map(|(category, group)| overlapping_pairs(participant, category, &group))
                .collect::<Vec<_>>()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn posture(id: &str, start: u64, end: u64, category: &str) -> AnnotationInterval {
        AnnotationInterval::new(id, "1", start, end, category, None).unwrap()
    }

    fn hand(id: &str, start: u64, end: u64, tier: &str, object: &str) -> AnnotationInterval {
        AnnotationInterval::new(id, "1", start, end, tier, Some(object.to_string())).unwrap()
    }

    const LEFT: &str = "inhand_left_child";
    const RIGHT: &str = "inhand_right_child";

    #[test]
    fn test_clips_hand_episode_to_posture() {
        let study = StudyConfig::default();
        let set = AnnotationSet {
            postures: vec![posture("1234501", 1000, 5000, "Sitting")],
            hands: vec![hand("1234501", 500, 1200, LEFT, "dino")],
        };

        let result = Reconciler::new(&study).reconcile(&set).unwrap();

        assert_eq!(
            result.episodes,
            vec![ReconciledEpisode {
                participant_id: "1234501".to_string(),
                time_point: "1".to_string(),
                start_ms: 1000,
                end_ms: 1200,
                duration_ms: 200,
                hand_side: HandSide::Left,
                object_label: "dino".to_string(),
                posture_category: "Sitting".to_string(),
            }]
        );
    }

    #[test]
    fn test_no_overlap_contributes_nothing() {
        let study = StudyConfig::default();
        let set = AnnotationSet {
            postures: vec![posture("1234501", 1000, 5000, "Sitting")],
            hands: vec![
                hand("1234501", 6000, 7000, LEFT, "dino"),
                // touching the posture end is not an overlap
                hand("1234501", 5000, 5500, RIGHT, "dino"),
            ],
        };

        let result = Reconciler::new(&study).reconcile(&set).unwrap();
        assert!(result.episodes.is_empty());
    }

    #[test]
    fn test_short_postures_and_untracked_objects_are_discarded() {
        let study = StudyConfig::default();
        let set = AnnotationSet {
            postures: vec![
                posture("1234501", 0, 3000, "Sitting"),
                posture("1234501", 10_000, 13_001, "Standing"),
            ],
            hands: vec![
                hand("1234501", 1000, 2000, LEFT, "dino"),
                hand("1234501", 11_000, 12_000, LEFT, "ball"),
                hand("1234501", 11_000, 12_000, "inhand_left_parent", "dino"),
                hand("1234501", 12_000, 14_000, RIGHT, "klickity"),
            ],
        };

        let result = Reconciler::new(&study).reconcile(&set).unwrap();

        assert_eq!(result.qualifying_postures, 1);
        assert_eq!(result.tracked_hands, 2);
        assert_eq!(result.episodes.len(), 1);
        assert_eq!(result.episodes[0].object_label, "klickity");
        assert_eq!((result.episodes[0].start_ms, result.episodes[0].end_ms), (12_000, 13_001));
    }

    #[test]
    fn test_first_match_wins_and_is_reported() {
        let study = StudyConfig::default();
        let set = AnnotationSet {
            postures: vec![
                posture("1234501", 1000, 6000, "Sitting"),
                posture("1234501", 4000, 9000, "Sitting"),
            ],
            hands: vec![hand("1234501", 5000, 8000, RIGHT, "spinner")],
        };

        let result = Reconciler::new(&study).reconcile(&set).unwrap();

        assert_eq!(result.episodes.len(), 1);
        assert_eq!((result.episodes[0].start_ms, result.episodes[0].end_ms), (5000, 6000));
        assert_eq!(result.ambiguous_matches, 1);
        assert_eq!(
            result.overlaps,
            vec![PostureOverlap {
                participant_id: "1234501".to_string(),
                category: "Sitting".to_string(),
                first: (1000, 6000),
                second: (4000, 9000),
            }]
        );
    }

    #[test]
    fn test_strict_mode_fails_on_overlapping_postures() {
        let study = StudyConfig {
            strict_posture_overlaps: true,
            ..Default::default()
        };
        let set = AnnotationSet {
            postures: vec![
                posture("1234501", 1000, 6000, "Sitting"),
                posture("1234501", 4000, 9000, "Sitting"),
            ],
            hands: vec![hand("1234501", 5000, 8000, RIGHT, "spinner")],
        };

        let result = Reconciler::new(&study).reconcile(&set);
        assert!(matches!(result, Err(PipelineError::OverlappingPostures { .. })));
    }

    #[test]
    fn test_each_category_and_hand_is_reconciled_independently() {
        let study = StudyConfig::default();
        let set = AnnotationSet {
            postures: vec![
                posture("1234501", 0, 10_000, "Sitting"),
                posture("1234501", 0, 10_000, "Supported"),
                posture("2222201", 0, 10_000, "Sitting"),
            ],
            hands: vec![
                hand("1234501", 1000, 2000, RIGHT, "dino"),
                hand("1234501", 3000, 4000, LEFT, "bubbles"),
                hand("2222201", 9000, 12_000, LEFT, "spinner"),
            ],
        };

        let result = Reconciler::new(&study).reconcile(&set).unwrap();

        let summary: Vec<(&str, &str, HandSide, &str)> = result
            .episodes
            .iter()
            .map(|e| {
                (
                    e.participant_id.as_str(),
                    e.posture_category.as_str(),
                    e.hand_side,
                    e.object_label.as_str(),
                )
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                ("1234501", "Sitting", HandSide::Left, "bubbles"),
                ("1234501", "Sitting", HandSide::Right, "dino"),
                ("1234501", "Supported", HandSide::Left, "bubbles"),
                ("1234501", "Supported", HandSide::Right, "dino"),
                ("2222201", "Sitting", HandSide::Left, "spinner"),
            ]
        );
        // same-category overlap only: different categories may overlap freely
        assert!(result.overlaps.is_empty());
    }

    #[test]
    fn test_participant_without_postures_yields_nothing() {
        let study = StudyConfig::default();
        let set = AnnotationSet {
            postures: vec![posture("1234501", 0, 10_000, "Sitting")],
            hands: vec![hand("9999901", 1000, 2000, RIGHT, "dino")],
        };

        let result = Reconciler::new(&study).reconcile(&set).unwrap();
        assert!(result.episodes.is_empty());
    }

    #[test]
    fn test_find_posture_overlaps_sees_contained_intervals() {
        let study = StudyConfig::default();
        let set = AnnotationSet {
            postures: vec![
                posture("1234501", 0, 20_000, "Sitting"),
                posture("1234501", 5000, 9000, "Sitting"),
                posture("1234501", 12_000, 16_000, "Sitting"),
                posture("1234501", 20_000, 24_000, "Sitting"),
            ],
            hands: vec![],
        };

        let overlaps = find_posture_overlaps(&set, &study);
        let pairs: Vec<((u64, u64), (u64, u64))> =
            overlaps.iter().map(|o| (o.first, o.second)).collect();
        assert_eq!(
            pairs,
            vec![((0, 20_000), (5000, 9000)), ((0, 20_000), (12_000, 16_000))]
        );
    }

    #[test]
    fn test_find_posture_overlaps_reports_every_pair() {
        let study = StudyConfig::default();
        let set = AnnotationSet {
            postures: vec![
                posture("1234501", 8000, 16_000, "Sitting"),
                posture("1234501", 0, 20_000, "Sitting"),
                posture("1234501", 5000, 12_000, "Sitting"),
            ],
            hands: vec![hand("1234501", 1000, 2000, LEFT, "dino")],
        };

        let overlaps = find_posture_overlaps(&set, &study);
        let pairs: Vec<((u64, u64), (u64, u64))> =
            overlaps.iter().map(|o| (o.first, o.second)).collect();
        assert_eq!(
            pairs,
            vec![
                ((0, 20_000), (5000, 12_000)),
                ((0, 20_000), (8000, 16_000)),
                ((5000, 12_000), (8000, 16_000)),
            ]
        );

        let result = Reconciler::new(&study).reconcile(&set).unwrap();
        assert_eq!(result.overlaps, overlaps);
    }

    #[test]
    fn test_interleaved_participants_are_kept_apart() {
        let study = StudyConfig::default();
        let set = AnnotationSet {
            postures: vec![
                posture("3333301", 0, 10_000, "Sitting"),
                posture("1234501", 20_000, 30_000, "Sitting"),
                posture("3333301", 5000, 15_000, "Sitting"),
                posture("1234501", 0, 10_000, "Prone"),
            ],
            hands: vec![
                hand("3333301", 21_000, 22_000, LEFT, "dino"),
                hand("1234501", 1000, 2000, RIGHT, "spinner"),
                hand("3333301", 1000, 2000, LEFT, "bubbles"),
                hand("1234501", 21_000, 22_000, LEFT, "dino"),
            ],
        };

        let result = Reconciler::new(&study).reconcile(&set).unwrap();

        let summary: Vec<(&str, &str, &str, u64)> = result
            .episodes
            .iter()
            .map(|e| {
                (
                    e.participant_id.as_str(),
                    e.posture_category.as_str(),
                    e.object_label.as_str(),
                    e.start_ms,
                )
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                ("1234501", "Prone", "spinner", 1000),
                ("1234501", "Sitting", "dino", 21_000),
                ("3333301", "Sitting", "bubbles", 1000),
            ]
        );
        // the other participant's Sitting interval never pairs with these
        assert_eq!(result.overlaps.len(), 1);
        assert_eq!(result.overlaps[0].participant_id, "3333301");
        assert_eq!(result.overlaps[0].first, (0, 10_000));
        assert_eq!(result.overlaps[0].second, (5000, 15_000));
    }

    fn arbitrary_set() -> impl Strategy<Value = AnnotationSet> {
        let categories = ["Sitting", "Standing", "Prone"];
        let objects = ["dino", "bubbles", "klickity", "spinner", "ball"];
        let ids = ["1111101", "2222201"];

        let postures = prop::collection::vec(
            (0usize..2, 0u64..60_000, 0u64..20_000, 0usize..3),
            0..12,
        );
        let hands = prop::collection::vec(
            (0usize..2, 0u64..60_000, 0u64..10_000, any::<bool>(), 0usize..5),
            0..20,
        );

        (postures, hands).prop_map(move |(postures, hands)| {
            let mut set = AnnotationSet {
                postures: postures
                    .into_iter()
                    .map(|(id, start, len, cat)| posture(ids[id], start, start + len, categories[cat]))
                    .collect(),
                hands: hands
                    .into_iter()
                    .map(|(id, start, len, left, obj)| {
                        let tier = if left { LEFT } else { RIGHT };
                        hand(ids[id], start, start + len, tier, objects[obj])
                    })
                    .collect(),
            };
            set.sort();
            set
        })
    }

    proptest! {
        #[test]
        fn reconciled_spans_lie_within_both_sources(set in arbitrary_set()) {
            let study = StudyConfig::default();
            let reconciler = Reconciler::new(&study);
            let result = reconciler.reconcile(&set).unwrap();
            let postures = reconciler.qualifying_postures(&set.postures);
            let hands = reconciler.tracked_hands(&set.hands);

            for e in &result.episodes {
                prop_assert!(e.end_ms >= e.start_ms);
                prop_assert_eq!(e.duration_ms, e.end_ms - e.start_ms);

                let in_hand = hands.iter().any(|h| {
                    h.participant_id == e.participant_id
                        && h.side == e.hand_side
                        && h.object == e.object_label
                        && h.start_ms <= e.start_ms
                        && e.end_ms <= h.end_ms
                });
                let in_posture = postures.iter().any(|p| {
                    p.participant_id == e.participant_id
                        && p.category == e.posture_category
                        && p.start_ms <= e.start_ms
                        && e.end_ms <= p.end_ms
                });
                prop_assert!(in_hand);
                prop_assert!(in_posture);
            }
        }

        #[test]
        fn reconciliation_is_idempotent(set in arbitrary_set()) {
            let study = StudyConfig::default();
            let reconciler = Reconciler::new(&study);

            let first = reconciler.reconcile(&set).unwrap();
            let second = reconciler.reconcile(&set).unwrap();
            prop_assert_eq!(first, second);
        }
    }
}
