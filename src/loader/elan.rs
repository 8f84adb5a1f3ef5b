//! ELAN `.eaf` annotation files
//!
//! An `.eaf` document stores a table of time slots and one element per tier.
//! Alignable annotations point at two time slots; reference annotations
//! borrow the span of the annotation they refer to.

use crate::config::StudyConfig;
use crate::error::PipelineError;
use crate::loader::AnnotationSource;
use crate::types::{AnnotationInterval, AnnotationSet};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Reference chains deeper than this are treated as malformed
const MAX_REF_DEPTH: usize = 16;

/// One time-resolved annotation from an `.eaf` file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EafAnnotation {
    pub tier: String,
    pub start_ms: u64,
    pub end_ms: u64,
    pub value: String,
}

#[derive(Debug, Clone)]
enum Anchor {
    Aligned { slot1: String, slot2: String },
    Reference { target: String },
}

#[derive(Debug)]
struct PendingAnnotation {
    id: String,
    tier: String,
    anchor: Anchor,
    value: String,
}

#[derive(Default)]
struct EafParser {
    slots: HashMap<String, Option<u64>>,
    anchors: HashMap<String, Anchor>,
    annotations: Vec<PendingAnnotation>,
    tier: Option<String>,
    current: Option<PendingAnnotation>,
    in_value: bool,
}

impl EafParser {
    fn open(&mut self, element: &BytesStart, path: &Path) -> Result<(), PipelineError> {
        match element.name().as_ref() {
            b"TIME_SLOT" => {
                let id = required_attribute(element, b"TIME_SLOT_ID", path)?;
                let value = match attribute(element, b"TIME_VALUE", path)? {
                    Some(raw) => Some(super::parse_millis("TIME_VALUE", &raw)?),
                    None => None,
                };
                self.slots.insert(id, value);
            }
            b"TIER" => {
                self.tier = Some(required_attribute(element, b"TIER_ID", path)?);
            }
            b"ALIGNABLE_ANNOTATION" => {
                let anchor = Anchor::Aligned {
                    slot1: required_attribute(element, b"TIME_SLOT_REF1", path)?,
                    slot2: required_attribute(element, b"TIME_SLOT_REF2", path)?,
                };
                self.begin_annotation(element, anchor, path)?;
            }
            b"REF_ANNOTATION" => {
                let anchor = Anchor::Reference {
                    target: required_attribute(element, b"ANNOTATION_REF", path)?,
                };
                self.begin_annotation(element, anchor, path)?;
            }
            b"ANNOTATION_VALUE" => self.in_value = true,
            _ => {}
        }
        Ok(())
    }

    fn begin_annotation(
        &mut self,
        element: &BytesStart,
        anchor: Anchor,
        path: &Path,
    ) -> Result<(), PipelineError> {
        let tier = self
            .tier
            .clone()
            .ok_or_else(|| PipelineError::xml(path, "annotation outside of a TIER"))?;
        let id = required_attribute(element, b"ANNOTATION_ID", path)?;
        self.anchors.insert(id.clone(), anchor.clone());
        self.current = Some(PendingAnnotation {
            id,
            tier,
            anchor,
            value: String::new(),
        });
        Ok(())
    }

    fn close(&mut self, name: &[u8]) {
        match name {
            b"ANNOTATION_VALUE" => self.in_value = false,
            b"ALIGNABLE_ANNOTATION" | b"REF_ANNOTATION" => {
                if let Some(annotation) = self.current.take() {
                    self.annotations.push(annotation);
                }
            }
            b"TIER" => self.tier = None,
            _ => {}
        }
    }

    fn resolve(&self, anchor: &Anchor, depth: usize) -> Option<(u64, u64)> {
        if depth > MAX_REF_DEPTH {
            return None;
        }
        match anchor {
            Anchor::Aligned { slot1, slot2 } => {
                let start = (*self.slots.get(slot1)?)?;
                let end = (*self.slots.get(slot2)?)?;
                Some((start, end))
            }
            Anchor::Reference { target } => self.resolve(self.anchors.get(target)?, depth + 1),
        }
    }

    fn finish(self, path: &Path) -> Result<Vec<EafAnnotation>, PipelineError> {
        let mut resolved = Vec::with_capacity(self.annotations.len());
        for annotation in &self.annotations {
            match self.resolve(&annotation.anchor, 0) {
                Some((start_ms, end_ms)) if end_ms >= start_ms => resolved.push(EafAnnotation {
                    tier: annotation.tier.clone(),
                    start_ms,
                    end_ms,
                    value: annotation.value.trim().to_string(),
                }),
                Some((start_ms, end_ms)) => {
                    return Err(PipelineError::xml(
                        path,
                        format!(
                            "annotation {} on tier '{}' ends before it starts ({} > {})",
                            annotation.id, annotation.tier, start_ms, end_ms
                        ),
                    ));
                }
                None => warn!(
                    file = %path.display(),
                    annotation = %annotation.id,
                    tier = %annotation.tier,
                    "skipping annotation without resolvable time slots"
                ),
            }
        }
        Ok(resolved)
    }
}

fn attribute(
    element: &BytesStart,
    name: &[u8],
    path: &Path,
) -> Result<Option<String>, PipelineError> {
    for attr in element.attributes() {
        let attr = attr.map_err(|e| PipelineError::xml(path, e))?;
        if attr.key.as_ref() == name {
            let value = attr
                .unescape_value()
                .map_err(|e| PipelineError::xml(path, e))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn required_attribute(
    element: &BytesStart,
    name: &[u8],
    path: &Path,
) -> Result<String, PipelineError> {
    attribute(element, name, path)?.ok_or_else(|| {
        PipelineError::xml(
            path,
            format!(
                "<{}> is missing attribute {}",
                String::from_utf8_lossy(element.name().as_ref()),
                String::from_utf8_lossy(name)
            ),
        )
    })
}

/// Parse `.eaf` XML text into time-resolved annotations, in document order.
///
/// `path` is only used for error messages.
pub fn parse_eaf(xml: &str, path: &Path) -> Result<Vec<EafAnnotation>, PipelineError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut parser = EafParser::default();

    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) => parser.open(&element, path)?,
            Ok(Event::Empty(element)) => {
                parser.open(&element, path)?;
                parser.close(element.name().as_ref());
            }
            Ok(Event::Text(text)) if parser.in_value => {
                if let Some(current) = parser.current.as_mut() {
                    let value = text.unescape().map_err(|e| PipelineError::xml(path, e))?;
                    current.value.push_str(&value);
                }
            }
            Ok(Event::CData(data)) if parser.in_value => {
                if let Some(current) = parser.current.as_mut() {
                    current.value.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Ok(Event::End(element)) => parser.close(element.name().as_ref()),
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(PipelineError::xml(
                    path,
                    format!("at byte {}: {}", reader.buffer_position(), e),
                ))
            }
            _ => {}
        }
    }

    parser.finish(path)
}

/// Reads every `.eaf` file in a directory, one file per participant recording
#[derive(Debug, Clone)]
pub struct ElanDirectorySource {
    dir: PathBuf,
}

impl ElanDirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Sorted list of `.eaf` files in the directory
    pub fn files(&self) -> Result<Vec<PathBuf>, PipelineError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| PipelineError::io(&self.dir, e))?;

        let mut files = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| PipelineError::io(&self.dir, e))?.path();
            let is_eaf = path
                .extension()
                .map_or(false, |ext| ext.eq_ignore_ascii_case("eaf"));
            if is_eaf && path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Split one file's annotations into posture and hand records
    pub fn load_file(path: &Path, study: &StudyConfig) -> Result<AnnotationSet, PipelineError> {
        let xml = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        let annotations = parse_eaf(&xml, path)?;

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let participant_id: String = stem.chars().take(study.participant_id_len).collect();
        let time_point = participant_id
            .chars()
            .last()
            .map(String::from)
            .unwrap_or_default();

        let mut set = AnnotationSet::default();
        for annotation in annotations {
            if study.is_ignored_tier(&annotation.tier) {
                continue;
            }

            if annotation.value.is_empty() {
                set.postures.push(AnnotationInterval::new(
                    participant_id.clone(),
                    time_point.clone(),
                    annotation.start_ms,
                    annotation.end_ms,
                    annotation.tier,
                    None,
                )?);
            } else if study.hand_side_for_tier(&annotation.tier).is_some() {
                set.hands.push(AnnotationInterval::new(
                    participant_id.clone(),
                    time_point.clone(),
                    annotation.start_ms,
                    annotation.end_ms,
                    annotation.tier,
                    Some(annotation.value),
                )?);
            }
        }

        set.sort();
        Ok(set)
    }
}

impl AnnotationSource for ElanDirectorySource {
    fn load(&self, study: &StudyConfig) -> Result<AnnotationSet, PipelineError> {
        let files = self.files()?;
        if files.is_empty() {
            return Err(PipelineError::NoAnnotations(format!(
                "no .eaf files in {}",
                self.dir.display()
            )));
        }

        let mut set = AnnotationSet::default();
        for file in &files {
            let participant = Self::load_file(file, study)?;
            if participant.is_empty() {
                warn!(file = %file.display(), "no qualifying tier events; participant skipped");
                continue;
            }
            debug!(
                file = %file.display(),
                postures = participant.postures.len(),
                hands = participant.hands.len(),
                "annotation file loaded"
            );
            set.extend(participant);
        }

        set.sort();
        info!(
            files = files.len(),
            postures = set.postures.len(),
            hands = set.hands.len(),
            "annotation directory loaded"
        );
        Ok(set)
    }
}
