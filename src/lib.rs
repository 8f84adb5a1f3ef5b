//! Positions & Objects - infant posture and object-handling annotation pipeline
//!
//! Reconciles ELAN posture codes with hand-object codes into per-episode
//! sampling records and per-participant rates through a deterministic
//! pipeline: annotation loading → interval reconciliation → classification
//! → aggregation → plot-ready reporting.
//!
//! ## Modules
//!
//! - **Loader**: ELAN `.eaf` files, extracted CSV tables, recording lengths
//! - **Reconciler**: clip hand episodes to qualifying posture intervals
//! - **Aggregator**: full participant × affordance × condition grid with rates
//! - **Report**: condition panels for an external plotting tool

pub mod aggregator;
pub mod bins;
pub mod classify;
pub mod config;
pub mod error;
pub mod loader;
pub mod output;
pub mod pipeline;
pub mod reconciler;
pub mod report;
pub mod types;

pub use aggregator::Aggregator;
pub use bins::{assign_task_bin, minute_bins, BinAssignment, TimeBin};
pub use classify::EpisodeClassifier;
pub use config::{PipelineConfig, StudyConfig};
pub use error::PipelineError;
pub use loader::{AnnotationSource, ElanDirectorySource, RecordingLengths, TableSource};
pub use output::RunManifest;
pub use pipeline::{PipelineOutput, SamplingPipeline};
pub use reconciler::{find_posture_overlaps, Reconciler};
pub use report::{PlotRequest, ReportSink};

/// Crate version recorded in every run manifest
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name recorded in every run manifest
pub const PRODUCER_NAME: &str = "positions-objects";
