//! posobj CLI - Command-line interface for the positions/objects pipeline
//!
//! Commands:
//! - extract: Parse an ELAN directory into body/manual tables
//! - run: Full pipeline, writing episode and aggregate tables
//! - validate: Report overlapping posture codes and degenerate intervals
//! - bins: Assign time bins to an episode table
//! - doctor: Diagnose configuration and input paths
//! - schema: Print output table columns

use clap::{Parser, Subcommand, ValueEnum};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use positions_objects::bins::{assign_task_bin, minute_bins};
use positions_objects::loader::{
    write_tables, AnnotationSource, ElanDirectorySource, RecordingLengths, BODY_COLUMNS,
    MANUAL_COLUMNS,
};
use positions_objects::output::{AGGREGATE_COLUMNS, EPISODE_COLUMNS, EPISODES_FILE};
use positions_objects::reconciler::PostureOverlap;
use positions_objects::types::millis_from_f64;
use positions_objects::{
    find_posture_overlaps, PipelineConfig, PipelineError, SamplingPipeline, PRODUCER_NAME, VERSION,
};

/// posobj - Reconcile infant posture and hand-object annotations
#[derive(Parser)]
#[command(name = "posobj")]
#[command(version = VERSION)]
#[command(about = "Reconcile posture and object-handling annotations", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging (overridden by POSOBJ_LOG / RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse .eaf files into body.csv and manual.csv
    Extract {
        /// Directory of .eaf files
        #[arg(short, long)]
        annotation_dir: Option<PathBuf>,

        /// Output directory for the tables (defaults to the annotation directory)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Run the full pipeline
    Run {
        /// Directory of .eaf files
        #[arg(short, long)]
        annotation_dir: Option<PathBuf>,

        /// Recording length sheet (CSV or XLSX)
        #[arg(short, long)]
        lengths: Option<PathBuf>,

        /// Output directory
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Re-parse .eaf files even when extracted tables exist
        #[arg(long)]
        force_parse: bool,

        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Report overlapping posture intervals and zero-length codes
    Validate {
        /// Directory of .eaf files
        #[arg(short, long)]
        annotation_dir: Option<PathBuf>,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Assign coarse time bins to an episode table
    Bins {
        /// Episode table (defaults to episodes.csv in the output directory)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Events starting before this time (ms) are left undefined
        #[arg(long)]
        ini_threshold: Option<u64>,
    },

    /// Diagnose configuration and input paths
    Doctor {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print table columns
    Schema {
        /// Table to describe
        #[arg(value_enum)]
        table: TableKind,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum TableKind {
    /// Extracted posture table
    Body,
    /// Extracted hand-object table
    Manual,
    /// Reconciled sampling episodes
    Episodes,
    /// Per-participant aggregate rows
    Aggregate,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("POSOBJ_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig, PosobjCliError> {
    match path {
        Some(path) => Ok(PipelineConfig::from_path(path)?),
        None => Ok(PipelineConfig::default()),
    }
}

fn run(cli: Cli) -> Result<(), PosobjCliError> {
    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Extract {
            annotation_dir,
            output_dir,
        } => {
            if annotation_dir.is_some() {
                config.paths.annotation_dir = annotation_dir;
            }
            cmd_extract(&config, output_dir.as_deref())
        }

        Commands::Run {
            annotation_dir,
            lengths,
            output_dir,
            force_parse,
            json,
        } => {
            if annotation_dir.is_some() {
                config.paths.annotation_dir = annotation_dir;
            }
            if lengths.is_some() {
                config.paths.recording_lengths = lengths;
            }
            if output_dir.is_some() {
                config.paths.output_dir = output_dir;
            }
            cmd_run(config, !force_parse, json)
        }

        Commands::Validate {
            annotation_dir,
            json,
        } => {
            if annotation_dir.is_some() {
                config.paths.annotation_dir = annotation_dir;
            }
            cmd_validate(config, json)
        }

        Commands::Bins {
            input,
            output,
            ini_threshold,
        } => {
            let input = input
                .or_else(|| config.paths.output_dir.as_ref().map(|d| d.join(EPISODES_FILE)))
                .ok_or(PosobjCliError::MissingPath("episode table"))?;
            cmd_bins(&input, &output, ini_threshold)
        }

        Commands::Doctor { json } => cmd_doctor(&config, cli.config.as_deref(), json),

        Commands::Schema { table } => cmd_schema(table),
    }
}

fn cmd_extract(config: &PipelineConfig, output_dir: Option<&Path>) -> Result<(), PosobjCliError> {
    let dir = config
        .paths
        .annotation_dir
        .as_ref()
        .ok_or(PosobjCliError::MissingPath("annotation directory"))?;
    let set = ElanDirectorySource::new(dir).load(&config.study)?;

    let (body, manual) = match output_dir {
        Some(out) => (out.join("body.csv"), out.join("manual.csv")),
        None => (
            config
                .paths
                .body_table_path()
                .unwrap_or_else(|| dir.join("body.csv")),
            config
                .paths
                .manual_table_path()
                .unwrap_or_else(|| dir.join("manual.csv")),
        ),
    };
    write_tables(&set, &body, &manual)?;

    println!(
        "Extracted {} posture and {} hand intervals",
        set.postures.len(),
        set.hands.len()
    );
    println!("  {}", body.display());
    println!("  {}", manual.display());
    Ok(())
}

fn cmd_run(config: PipelineConfig, reuse_tables: bool, json: bool) -> Result<(), PosobjCliError> {
    let out_dir = config
        .paths
        .output_dir
        .clone()
        .ok_or(PosobjCliError::MissingPath("output directory"))?;

    let pipeline = SamplingPipeline::new(config).reuse_tables(reuse_tables);
    let output = pipeline.run()?;
    let written = pipeline.write_outputs(&output, &out_dir)?;

    if json || !atty::is(atty::Stream::Stdout) {
        let summary = RunSummary {
            manifest: &output.manifest,
            files: written,
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        let m = &output.manifest;
        println!("Run {}", m.run_id);
        println!("==========================================");
        println!("Participants:        {}", m.participants);
        println!("Posture intervals:   {}", m.posture_intervals);
        println!("Hand intervals:      {}", m.hand_episodes);
        println!("Reconciled episodes: {}", m.reconciled_episodes);
        println!("Aggregate rows:      {} ({} non-zero)", m.aggregate_rows, m.nonzero_rows);
        if m.overlap_warnings > 0 || m.ambiguous_matches > 0 {
            println!(
                "\nWarnings: {} overlapping posture pairs, {} ambiguous matches",
                m.overlap_warnings, m.ambiguous_matches
            );
            println!("Run 'posobj validate' for details");
        }
        println!("\nWrote {} files to {}", written.len(), out_dir.display());
    }
    Ok(())
}

fn cmd_validate(config: PipelineConfig, json: bool) -> Result<(), PosobjCliError> {
    let study = config.study.clone();
    let pipeline = SamplingPipeline::new(config);
    let set = pipeline.load_annotations()?;

    let overlaps = find_posture_overlaps(&set, &study);
    let zero_length = set
        .postures
        .iter()
        .chain(set.hands.iter())
        .filter(|a| a.duration_ms == 0)
        .count();

    let report = ValidationReport {
        posture_intervals: set.postures.len(),
        hand_intervals: set.hands.len(),
        zero_length_intervals: zero_length,
        overlaps,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Posture intervals:     {}", report.posture_intervals);
        println!("Hand intervals:        {}", report.hand_intervals);
        println!("Zero-length intervals: {}", report.zero_length_intervals);
        println!("Overlapping postures:  {}", report.overlaps.len());

        if !report.overlaps.is_empty() {
            println!("\nOverlaps:");
            for o in &report.overlaps {
                println!(
                    "  - {} {}: {}-{} and {}-{}",
                    o.participant_id, o.category, o.first.0, o.first.1, o.second.0, o.second.1
                );
            }
        }
    }

    let problems = report.overlaps.len() + report.zero_length_intervals;
    if problems > 0 {
        Err(PosobjCliError::ValidationFailed(problems))
    } else {
        Ok(())
    }
}

fn cmd_bins(input: &Path, output: &Path, ini_threshold: Option<u64>) -> Result<(), PosobjCliError> {
    let bins = minute_bins();
    let mut reader = csv::Reader::from_path(input).map_err(|e| PipelineError::csv(input, e))?;
    let headers = reader
        .headers()
        .map_err(|e| PipelineError::csv(input, e))?
        .clone();

    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| PipelineError::MissingColumn {
                path: input.to_path_buf(),
                column: name.to_string(),
            })
    };
    let start_col = column("StartTime")?;
    let end_col = column("EndTime")?;

    let sink: Box<dyn Write> = if output.to_string_lossy() == "-" {
        Box::new(io::stdout())
    } else {
        Box::new(std::fs::File::create(output)?)
    };
    let mut writer = csv::Writer::from_writer(sink);

    let mut out_headers = headers.clone();
    out_headers.push_field("Bin");
    writer.write_record(&out_headers).map_err(|e| PipelineError::csv(output, e))?;

    for record in reader.records() {
        let mut record = record.map_err(|e| PipelineError::csv(input, e))?;
        let start_ms = parse_cell("StartTime", record.get(start_col))?;
        let end_ms = parse_cell("EndTime", record.get(end_col))?;

        let bin = assign_task_bin(start_ms, end_ms, &bins, ini_threshold);
        record.push_field(bin.label());
        writer.write_record(&record).map_err(|e| PipelineError::csv(output, e))?;
    }
    writer.flush()?;
    Ok(())
}

fn parse_cell(field: &str, cell: Option<&str>) -> Result<u64, PipelineError> {
    let raw = cell.unwrap_or_default().trim();
    let value = raw.parse::<f64>().map_err(|_| PipelineError::InvalidMillis {
        field: field.to_string(),
        value: raw.to_string(),
    })?;
    millis_from_f64(field, value)
}

fn cmd_doctor(
    config: &PipelineConfig,
    config_path: Option<&Path>,
    json: bool,
) -> Result<(), PosobjCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "version".to_string(),
        status: CheckStatus::Ok,
        message: format!("{} {}", PRODUCER_NAME, VERSION),
    });

    checks.push(match config_path {
        Some(path) => DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Ok,
            message: format!("Loaded {}", path.display()),
        },
        None => DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Warning,
            message: "No config file; using study defaults".to_string(),
        },
    });

    let paths = &config.paths;
    checks.push(path_check("annotation_dir", paths.annotation_dir.as_deref(), true));
    checks.push(path_check("body_table", paths.body_table_path().as_deref(), false));
    checks.push(path_check("manual_table", paths.manual_table_path().as_deref(), false));
    checks.push(path_check("recording_lengths", paths.recording_lengths.as_deref(), true));

    if let Some(dir) = &paths.annotation_dir {
        if dir.is_dir() {
            match ElanDirectorySource::new(dir).files() {
                Ok(files) if files.is_empty() => checks.push(DoctorCheck {
                    name: "eaf_files".to_string(),
                    status: CheckStatus::Warning,
                    message: "No .eaf files in annotation directory".to_string(),
                }),
                Ok(files) => checks.push(DoctorCheck {
                    name: "eaf_files".to_string(),
                    status: CheckStatus::Ok,
                    message: format!("{} .eaf files", files.len()),
                }),
                Err(e) => checks.push(DoctorCheck {
                    name: "eaf_files".to_string(),
                    status: CheckStatus::Error,
                    message: e.to_string(),
                }),
            }
        }
    }

    if let Some(path) = &paths.recording_lengths {
        if path.is_file() {
            checks.push(match RecordingLengths::from_path(path) {
                Ok(lengths) => DoctorCheck {
                    name: "recording_lengths_rows".to_string(),
                    status: CheckStatus::Ok,
                    message: format!("{} participants with a recording length", lengths.len()),
                },
                Err(e) => DoctorCheck {
                    name: "recording_lengths_rows".to_string(),
                    status: CheckStatus::Error,
                    message: e.to_string(),
                },
            });
        }
    }

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("posobj Doctor Report");
        println!("====================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(PosobjCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

/// `required` paths that are configured but missing are errors; optional ones warn
fn path_check(name: &str, path: Option<&Path>, required: bool) -> DoctorCheck {
    match path {
        None => DoctorCheck {
            name: name.to_string(),
            status: CheckStatus::Warning,
            message: "Not configured".to_string(),
        },
        Some(path) if path.exists() => DoctorCheck {
            name: name.to_string(),
            status: CheckStatus::Ok,
            message: path.display().to_string(),
        },
        Some(path) => DoctorCheck {
            name: name.to_string(),
            status: if required {
                CheckStatus::Error
            } else {
                CheckStatus::Warning
            },
            message: format!("{} does not exist", path.display()),
        },
    }
}

fn cmd_schema(table: TableKind) -> Result<(), PosobjCliError> {
    let (name, columns): (&str, &[&str]) = match table {
        TableKind::Body => ("body.csv", &BODY_COLUMNS[..]),
        TableKind::Manual => ("manual.csv", &MANUAL_COLUMNS[..]),
        TableKind::Episodes => ("episodes.csv", &EPISODE_COLUMNS[..]),
        TableKind::Aggregate => ("aggregate_all.csv / aggregate_nonzero.csv", &AGGREGATE_COLUMNS[..]),
    };

    println!("{}", name);
    for column in columns {
        println!("  - {}", column);
    }
    Ok(())
}

// Error types

#[derive(Debug)]
enum PosobjCliError {
    Io(io::Error),
    Pipeline(PipelineError),
    Json(serde_json::Error),
    MissingPath(&'static str),
    ValidationFailed(usize),
    DoctorFailed,
}

impl From<io::Error> for PosobjCliError {
    fn from(e: io::Error) -> Self {
        PosobjCliError::Io(e)
    }
}

impl From<PipelineError> for PosobjCliError {
    fn from(e: PipelineError) -> Self {
        PosobjCliError::Pipeline(e)
    }
}

impl From<serde_json::Error> for PosobjCliError {
    fn from(e: serde_json::Error) -> Self {
        PosobjCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<PosobjCliError> for CliError {
    fn from(e: PosobjCliError) -> Self {
        match e {
            PosobjCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            PosobjCliError::Pipeline(e) => {
                let hint = match &e {
                    PipelineError::OverlappingPostures { .. } => {
                        "Fix the posture coding or disable strict_posture_overlaps"
                    }
                    PipelineError::Config(_) => "Check the [paths] and [study] sections of the config",
                    PipelineError::MissingColumn { .. } => "Check the table header row",
                    _ => "Run 'posobj doctor' to check inputs",
                };
                CliError {
                    code: "PIPELINE_ERROR".to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            PosobjCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            PosobjCliError::MissingPath(what) => CliError {
                code: "MISSING_PATH".to_string(),
                message: format!("No {} given", what),
                hint: Some("Pass it as a flag or set it in the config [paths] section".to_string()),
            },
            PosobjCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} annotation problems found", count),
                hint: Some("Fix the coding and retry".to_string()),
            },
            PosobjCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct RunSummary<'a> {
    manifest: &'a positions_objects::RunManifest,
    files: Vec<PathBuf>,
}

#[derive(serde::Serialize)]
struct ValidationReport {
    posture_intervals: usize,
    hand_intervals: usize,
    zero_length_intervals: usize,
    overlaps: Vec<PostureOverlap>,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
