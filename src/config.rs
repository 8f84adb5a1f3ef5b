//! Pipeline configuration
//!
//! Input/output locations and the study vocabulary are supplied externally,
//! either from a TOML file or programmatically. Every study field defaults
//! to the infant sitting/object-handling protocol.

use crate::error::PipelineError;
use crate::report::ReportConfig;
use crate::types::HandSide;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Posture intervals at or below this length are treated as coding noise
pub const DEFAULT_MIN_POSTURE_DURATION_MS: u64 = 3000;

/// Characters of the file name that identify a participant recording
pub const DEFAULT_PARTICIPANT_ID_LEN: usize = 7;

/// Characters of the participant id that identify the subject across time points
pub const DEFAULT_SUBJECT_ID_LEN: usize = 5;

/// Full pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub paths: PathsConfig,
    pub study: StudyConfig,
    /// Plot styling handed to the report sink
    pub report: ReportConfig,
}

impl PipelineConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, PipelineError> {
        let config: PipelineConfig =
            toml::from_str(text).map_err(|e| PipelineError::Config(e.to_string()))?;
        config.study.validate()?;
        if !config.report.outlier_threshold.is_finite() {
            return Err(PipelineError::Config(
                "report.outlier_threshold must be finite".to_string(),
            ));
        }
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_path(path: &Path) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        Self::from_toml_str(&text)
    }
}

/// Named input and output locations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory of per-participant `.eaf` files
    pub annotation_dir: Option<PathBuf>,
    /// Pre-extracted posture table
    pub body_table: Option<PathBuf>,
    /// Pre-extracted hand-object table
    pub manual_table: Option<PathBuf>,
    /// Per-participant recording lengths (CSV or XLSX)
    pub recording_lengths: Option<PathBuf>,
    /// Where output tables are written
    pub output_dir: Option<PathBuf>,
}

impl PathsConfig {
    pub fn body_table_path(&self) -> Option<PathBuf> {
        self.body_table
            .clone()
            .or_else(|| self.annotation_dir.as_ref().map(|d| d.join("body.csv")))
    }

    pub fn manual_table_path(&self) -> Option<PathBuf> {
        self.manual_table
            .clone()
            .or_else(|| self.annotation_dir.as_ref().map(|d| d.join("manual.csv")))
    }
}

/// Study vocabulary and filtering rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudyConfig {
    /// Objects whose hand episodes are retained
    pub tracked_objects: Vec<String>,
    /// Object label → affordance class; unmapped labels pass through
    pub affordances: BTreeMap<String, String>,
    pub left_hand_tier: String,
    pub right_hand_tier: String,
    /// Tiers skipped entirely when reading annotation files
    pub ignored_tiers: Vec<String>,
    /// Posture categories never studied
    pub excluded_postures: Vec<String>,
    /// Explicit posture vocabulary; when absent every observed category is used
    pub posture_categories: Option<Vec<String>>,
    /// Posture category reported as the sitting condition
    pub sitting_category: String,
    pub min_posture_duration_ms: u64,
    pub participant_id_len: usize,
    /// 0 keeps the full participant id
    pub subject_id_len: usize,
    /// Fail instead of warning when same-category posture intervals overlap
    pub strict_posture_overlaps: bool,
    /// Write body/manual tables after parsing annotation files
    pub persist_tables: bool,
}

impl Default for StudyConfig {
    fn default() -> Self {
        let affordances = [
            ("bubbles", "graspable"),
            ("dino", "graspable"),
            ("klickity", "stationary"),
            ("spinner", "stationary"),
        ]
        .into_iter()
        .map(|(object, class)| (object.to_string(), class.to_string()))
        .collect();

        Self {
            tracked_objects: ["bubbles", "dino", "klickity", "spinner"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            affordances,
            left_hand_tier: "inhand_left_child".to_string(),
            right_hand_tier: "inhand_right_child".to_string(),
            ignored_tiers: vec!["Claps".to_string()],
            excluded_postures: vec!["Claps".to_string(), "Undefined".to_string()],
            posture_categories: None,
            sitting_category: "Sitting".to_string(),
            min_posture_duration_ms: DEFAULT_MIN_POSTURE_DURATION_MS,
            participant_id_len: DEFAULT_PARTICIPANT_ID_LEN,
            subject_id_len: DEFAULT_SUBJECT_ID_LEN,
            strict_posture_overlaps: false,
            persist_tables: true,
        }
    }
}

impl StudyConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.participant_id_len == 0 {
            return Err(PipelineError::Config(
                "participant_id_len must be at least 1".to_string(),
            ));
        }
        if self.left_hand_tier == self.right_hand_tier {
            return Err(PipelineError::Config(format!(
                "left and right hand tiers must differ (both '{}')",
                self.left_hand_tier
            )));
        }
        if self.subject_id_len > self.participant_id_len {
            return Err(PipelineError::Config(format!(
                "subject_id_len {} exceeds participant_id_len {}",
                self.subject_id_len, self.participant_id_len
            )));
        }
        Ok(())
    }

    pub fn hand_tier(&self, side: HandSide) -> &str {
        match side {
            HandSide::Left => &self.left_hand_tier,
            HandSide::Right => &self.right_hand_tier,
        }
    }

    /// Which hand a tier codes, if it is one of the tracked limb tiers
    pub fn hand_side_for_tier(&self, tier: &str) -> Option<HandSide> {
        HandSide::ALL
            .into_iter()
            .find(|side| self.hand_tier(*side) == tier)
    }

    pub fn is_tracked_object(&self, label: &str) -> bool {
        self.tracked_objects.iter().any(|o| o == label)
    }

    pub fn is_ignored_tier(&self, tier: &str) -> bool {
        self.ignored_tiers.iter().any(|t| t == tier)
    }

    /// Whether a posture category takes part in reconciliation.
    ///
    /// Hand tiers are never postures, even for their unlabeled entries.
    pub fn is_studied_posture(&self, category: &str) -> bool {
        if self.hand_side_for_tier(category).is_some()
            || self.excluded_postures.iter().any(|c| c == category)
        {
            return false;
        }
        match &self.posture_categories {
            Some(vocabulary) => vocabulary.iter().any(|c| c == category),
            None => true,
        }
    }

    pub fn affordance_for(&self, object: &str) -> String {
        self.affordances
            .get(object)
            .cloned()
            .unwrap_or_else(|| object.to_string())
    }

    /// Distinct affordance classes in first-mapped order of the tracked objects
    pub fn affordance_order(&self) -> Vec<String> {
        let mut order: Vec<String> = Vec::new();
        for object in &self.tracked_objects {
            let class = self.affordance_for(object);
            if !order.contains(&class) {
                order.push(class);
            }
        }
        order
    }

    /// Subject key used to join recording lengths
    pub fn subject_id(&self, participant_id: &str) -> String {
        if self.subject_id_len == 0 {
            return participant_id.to_string();
        }
        participant_id.chars().take(self.subject_id_len).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_protocol() {
        let study = StudyConfig::default();

        assert_eq!(study.affordance_for("dino"), "graspable");
        assert_eq!(study.affordance_for("spinner"), "stationary");
        assert_eq!(study.affordance_for("ball"), "ball");
        assert_eq!(study.affordance_order(), vec!["graspable", "stationary"]);
        assert_eq!(study.hand_side_for_tier("inhand_left_child"), Some(HandSide::Left));
        assert_eq!(study.hand_side_for_tier("Sitting"), None);
    }

    #[test]
    fn test_studied_postures() {
        let mut study = StudyConfig::default();

        assert!(study.is_studied_posture("Sitting"));
        assert!(study.is_studied_posture("Prone"));
        assert!(!study.is_studied_posture("Undefined"));
        assert!(!study.is_studied_posture("inhand_right_child"));

        study.posture_categories = Some(vec!["Sitting".to_string()]);
        assert!(!study.is_studied_posture("Prone"));
    }

    #[test]
    fn test_subject_id() {
        let mut study = StudyConfig::default();
        assert_eq!(study.subject_id("1234503"), "12345");

        study.subject_id_len = 0;
        assert_eq!(study.subject_id("1234503"), "1234503");
    }

    #[test]
    fn test_from_toml() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [paths]
            annotation_dir = "data/T3"
            recording_lengths = "data/length_T3.xlsx"

            [study]
            tracked_objects = ["dino", "ball"]
            strict_posture_overlaps = true

            [report]
            outlier_threshold = 15.0
            "#,
        )
        .unwrap();

        assert_eq!(config.paths.annotation_dir, Some(PathBuf::from("data/T3")));
        assert_eq!(
            config.paths.body_table_path(),
            Some(PathBuf::from("data/T3/body.csv"))
        );
        assert_eq!(config.study.tracked_objects, vec!["dino", "ball"]);
        assert!(config.study.strict_posture_overlaps);
        assert_eq!(config.study.min_posture_duration_ms, 3000);
        assert_eq!(config.study.sitting_category, "Sitting");
        assert_eq!(config.report.outlier_threshold, 15.0);
        assert_eq!(
            config.report.colors.get("stationary").map(String::as_str),
            Some("#bfd739")
        );
    }

    #[test]
    fn test_invalid_toml_config() {
        let result = PipelineConfig::from_toml_str(
            r#"
            [study]
            left_hand_tier = "hands"
            right_hand_tier = "hands"
            "#,
        );
        assert!(matches!(result, Err(PipelineError::Config(_))));

        assert!(PipelineConfig::from_toml_str("[study\n").is_err());
    }
}
