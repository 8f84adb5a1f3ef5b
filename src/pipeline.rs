//! Pipeline orchestration
//!
//! This module provides the public API of the crate. It runs the full
//! pipeline from annotation files to aggregate tables:
//! load → reconcile → classify → aggregate, with the reporting boundary and
//! table writers hanging off the result.

use crate::aggregator::Aggregator;
use crate::classify::EpisodeClassifier;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::loader::{write_tables, AnnotationSource, ElanDirectorySource, RecordingLengths, TableSource};
use crate::output::{OutputWriter, RunManifest};
use crate::reconciler::{PostureOverlap, Reconciler};
use crate::report::{median_durations, rate_points, FileReportSink, PlotRequest, ReportSink, YVariable};
use crate::types::{AggregateTable, AnnotationSet, SamplingEpisode};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Name of the plot request built from per-participant median durations
pub const DURATION_PLOT: &str = "duration";

/// Name of the plot request built from non-zero event rates
pub const RATE_PLOT: &str = "count_per_minute";

/// Everything one run produces
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    pub episodes: Vec<SamplingEpisode>,
    pub aggregate: AggregateTable,
    pub overlaps: Vec<PostureOverlap>,
    pub manifest: RunManifest,
}

/// Runs the annotation pipeline for one study configuration
pub struct SamplingPipeline {
    config: PipelineConfig,
    reuse_tables: bool,
}

impl SamplingPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            reuse_tables: true,
        }
    }

    /// Whether existing body/manual tables replace `.eaf` parsing (default true)
    pub fn reuse_tables(mut self, reuse: bool) -> Self {
        self.reuse_tables = reuse;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Read annotations from pre-extracted tables when both exist, otherwise
    /// from the `.eaf` directory (persisting the tables when configured).
    pub fn load_annotations(&self) -> Result<AnnotationSet, PipelineError> {
        let paths = &self.config.paths;
        let study = &self.config.study;

        if let (true, Some(body), Some(manual)) =
            (self.reuse_tables, paths.body_table_path(), paths.manual_table_path())
        {
            let tables = TableSource::new(&body, &manual);
            if tables.is_available() {
                info!(body = %body.display(), manual = %manual.display(), "reading extracted tables");
                return tables.load(study);
            }
        }

        let dir = paths.annotation_dir.as_ref().ok_or_else(|| {
            PipelineError::Config(
                "no annotation_dir configured and no extracted tables found".to_string(),
            )
        })?;
        let set = ElanDirectorySource::new(dir).load(study)?;

        if study.persist_tables {
            if let (Some(body), Some(manual)) = (paths.body_table_path(), paths.manual_table_path()) {
                write_tables(&set, &body, &manual)?;
                info!(body = %body.display(), manual = %manual.display(), "extracted tables written");
            }
        }
        Ok(set)
    }

    /// Recording lengths from the configured sheet; empty when none is set
    pub fn load_lengths(&self) -> Result<RecordingLengths, PipelineError> {
        match &self.config.paths.recording_lengths {
            Some(path) => RecordingLengths::from_path(path),
            None => {
                warn!("no recording_lengths configured; rates will be empty");
                Ok(RecordingLengths::new())
            }
        }
    }

    /// Load inputs and run every stage
    pub fn run(&self) -> Result<PipelineOutput, PipelineError> {
        let set = self.load_annotations()?;
        let lengths = self.load_lengths()?;
        self.process(&set, &lengths)
    }

    /// Run the stages on already-loaded inputs
    pub fn process(
        &self,
        set: &AnnotationSet,
        lengths: &RecordingLengths,
    ) -> Result<PipelineOutput, PipelineError> {
        let study = &self.config.study;

        // Stage 1: Clip hand episodes to qualifying posture intervals
        let reconciliation = Reconciler::new(study).reconcile(set)?;

        // Stage 2: Assign condition, sitter flag and affordance
        let episodes = EpisodeClassifier::new(study).classify(&reconciliation.episodes);

        // Stage 3: Aggregate onto the participant × affordance × condition grid
        let aggregate = Aggregator::aggregate(&episodes, lengths);

        let participants: BTreeSet<&str> = set
            .postures
            .iter()
            .chain(set.hands.iter())
            .map(|a| a.participant_id.as_str())
            .collect();

        let mut manifest = RunManifest::new();
        manifest.participants = participants.len();
        manifest.posture_intervals = set.postures.len();
        manifest.hand_episodes = set.hands.len();
        manifest.reconciled_episodes = episodes.len();
        manifest.aggregate_rows = aggregate.all.len();
        manifest.nonzero_rows = aggregate.nonzero.len();
        manifest.overlap_warnings = reconciliation.overlaps.len();
        manifest.ambiguous_matches = reconciliation.ambiguous_matches;

        info!(
            run_id = %manifest.run_id,
            episodes = manifest.reconciled_episodes,
            nonzero_rows = manifest.nonzero_rows,
            "pipeline run complete"
        );

        Ok(PipelineOutput {
            episodes,
            aggregate,
            overlaps: reconciliation.overlaps,
            manifest,
        })
    }

    /// Median-duration and event-rate plot requests for a run
    pub fn plot_requests(&self, output: &PipelineOutput) -> Vec<PlotRequest> {
        let order = self.config.study.affordance_order();
        let style = &self.config.report;

        vec![
            PlotRequest::new(
                DURATION_PLOT,
                YVariable::Duration,
                median_durations(&output.episodes),
                order.clone(),
                style,
            ),
            PlotRequest::new(
                RATE_PLOT,
                YVariable::CountPerMinute,
                rate_points(&output.aggregate.nonzero, YVariable::CountPerMinute),
                order,
                style,
            ),
        ]
    }

    /// Write tables, manifest and plot panels under `out_dir`
    pub fn write_outputs(
        &self,
        output: &PipelineOutput,
        out_dir: &Path,
    ) -> Result<Vec<PathBuf>, PipelineError> {
        let writer = OutputWriter::new(out_dir);
        let mut written = vec![writer.write_episodes(&output.episodes)?];
        written.extend(writer.write_aggregate(&output.aggregate)?);
        written.push(writer.write_manifest(&output.manifest)?);

        let mut sink = FileReportSink::new(out_dir.join("plots"));
        for request in self.plot_requests(output) {
            sink.render(&request)?;
        }
        written.extend(sink.written().iter().cloned());

        info!(out_dir = %out_dir.display(), files = written.len(), "outputs written");
        Ok(written)
    }
}
