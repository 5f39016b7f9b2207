//! HeartSync CLI - Command-line interface for HeartSync Core
//!
//! Commands:
//! - summarize: Fold stored records into a day summary (paged mode)
//! - run: Summarize batches streamed on stdin (live mode)
//! - resolve: Show how each metric resolves in one record
//! - config: Print the effective configuration
//! - doctor: Diagnose configuration and environment

use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use heartsync_core::pipeline::resolve_all;
use heartsync_core::record::{parse_array, parse_batch, parse_ndjson, Record};
use heartsync_core::session::{LiveAggregation, PagedAggregation, PassOutcome, SummarySlot};
use heartsync_core::source::MemoryPageSource;
use heartsync_core::summary::DaySummary;
use heartsync_core::{AggregateError, AggregatorConfig, HEARTSYNC_VERSION, PRODUCER_NAME};

/// HeartSync - Day summaries of heartbeat timing metrics
#[derive(Parser)]
#[command(name = "heartsync")]
#[command(version = HEARTSYNC_VERSION)]
#[command(about = "Summarize heartbeat timing metrics per day", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fold stored records into a day summary (paged mode)
    Summarize {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Owner whose records are summarized
        #[arg(long, default_value = "local")]
        owner: String,

        /// Day to summarize (YYYY-MM-DD). Defaults to the latest `day` tag in
        /// the input, or today in UTC when no record carries one
        #[arg(long)]
        day: Option<NaiveDate>,

        /// Pretty-print the summary
        #[arg(long)]
        pretty: bool,
    },

    /// Summarize record batches from stdin (live mode)
    ///
    /// Each line is a JSON array holding the full current record set.
    /// Summaries are written to stdout as NDJSON, at most once per
    /// configured interval; batches arriving faster are coalesced.
    Run {
        /// Configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Day to tag summaries with (YYYY-MM-DD)
        #[arg(long)]
        day: Option<NaiveDate>,
    },

    /// Show how each tracked metric resolves in one record
    Resolve {
        /// Record as a JSON object (reads stdin when omitted)
        record: Option<String>,

        /// Configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print the effective configuration
    Config {
        /// Configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Diagnose configuration and environment
    Doctor {
        /// Check a configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// JSON array of records
    Json,
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => return report(HeartSyncCliError::Io(e)),
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report(e),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn report(e: HeartSyncCliError) -> ExitCode {
    eprintln!(
        "{}",
        serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
    );
    ExitCode::FAILURE
}

async fn run(cli: Cli) -> Result<(), HeartSyncCliError> {
    match cli.command {
        Commands::Summarize {
            input,
            output,
            input_format,
            config,
            owner,
            day,
            pretty,
        } => {
            let config = load_config(config.as_deref())?;
            cmd_summarize(&input, &output, input_format, config, &owner, day, pretty).await
        }

        Commands::Run { config, day } => cmd_run(load_config(config.as_deref())?, day).await,

        Commands::Resolve { record, config } => {
            cmd_resolve(record, &load_config(config.as_deref())?)
        }

        Commands::Config { config } => {
            let config = load_config(config.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }

        Commands::Doctor { config, json } => cmd_doctor(config.as_deref(), json),
    }
}

/// Defaults or a config file, then environment overrides
fn load_config(path: Option<&Path>) -> Result<AggregatorConfig, HeartSyncCliError> {
    let mut config = match path {
        Some(path) => AggregatorConfig::from_json(&fs::read_to_string(path)?)?,
        None => AggregatorConfig::default(),
    };
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

fn read_input(input: &Path) -> Result<String, HeartSyncCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

async fn cmd_summarize(
    input: &Path,
    output: &Path,
    input_format: InputFormat,
    config: AggregatorConfig,
    owner: &str,
    day: Option<NaiveDate>,
    pretty: bool,
) -> Result<(), HeartSyncCliError> {
    let input_data = read_input(input)?;

    let records = match input_format {
        InputFormat::Ndjson => parse_ndjson(&input_data)?,
        InputFormat::Json => parse_array(&input_data)?,
    };

    if records.is_empty() {
        return Err(HeartSyncCliError::NoRecords);
    }

    let config = Arc::new(config);
    let source = MemoryPageSource::new(records).with_event_key(config.event_key.clone());

    let day_counts = source.day_counts();
    let day = match day {
        Some(day) => day,
        None => day_counts
            .keys()
            .next_back()
            .copied()
            .unwrap_or_else(|| Utc::now().date_naive()),
    };
    let excluded: usize = day_counts
        .iter()
        .filter(|(tagged, _)| **tagged != day)
        .map(|(_, count)| count)
        .sum();
    if excluded > 0 {
        tracing::warn!(excluded, %day, "records tagged with other days are excluded");
    }
    let slot = SummarySlot::empty(&config);
    let aggregation = PagedAggregation::new(Arc::clone(&config), Arc::new(source), slot);

    let pass = aggregation
        .refresh(owner, day, true)
        .ok_or(HeartSyncCliError::NoPass)?;

    match pass.wait().await {
        PassOutcome::Published { accepted, .. } => {
            tracing::info!(accepted, %day, "day summary computed");
        }
        PassOutcome::Failed { error, .. } => return Err(HeartSyncCliError::PassFailed(error)),
        PassOutcome::Cancelled { .. } => return Err(HeartSyncCliError::NoPass),
    }

    let summary = aggregation.slot().latest();
    let output_data = format_summary(&summary, pretty)?;

    if output.to_string_lossy() == "-" {
        println!("{}", output_data);
    } else {
        fs::write(output, output_data + "\n")?;
    }

    Ok(())
}

async fn cmd_run(
    config: AggregatorConfig,
    day: Option<NaiveDate>,
) -> Result<(), HeartSyncCliError> {
    let config = Arc::new(config);
    let slot = SummarySlot::empty(&config);
    let mut updates = slot.subscribe();
    let (feed, handle) = LiveAggregation::spawn(config, day, slot);

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        // Ends once the consumer has dropped the slot and the last summary
        // has been written
        while updates.changed().await.is_ok() {
            let summary = updates.borrow_and_update().clone();
            let mut line = serde_json::to_string(&*summary)?;
            line.push('\n');
            stdout.write_all(line.as_bytes()).await?;
            stdout.flush().await?;
        }
        Ok::<(), HeartSyncCliError>(())
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_number = 0usize;
    let read_result = loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break Ok(()),
            Err(e) => break Err(HeartSyncCliError::Io(e)),
        };
        line_number += 1;

        if line.trim().is_empty() {
            continue;
        }

        match parse_batch(&line) {
            Ok(batch) => {
                if !feed.push(batch) {
                    break Ok(());
                }
            }
            Err(e) => {
                break Err(HeartSyncCliError::ParseError(format!(
                    "line {}: {}",
                    line_number, e
                )))
            }
        }
    };
    drop(feed);

    let stats = match read_result {
        Ok(()) => handle.join().await,
        Err(_) => handle.shutdown().await,
    };
    tracing::info!(
        received = stats.received,
        processed = stats.processed,
        coalesced = stats.coalesced(),
        "live session finished"
    );

    let write_result = match writer.await {
        Ok(result) => result,
        Err(e) => Err(HeartSyncCliError::ParseError(e.to_string())),
    };
    read_result.and(write_result)
}

fn cmd_resolve(record: Option<String>, config: &AggregatorConfig) -> Result<(), HeartSyncCliError> {
    let json = match record {
        Some(json) => json,
        None => read_input(Path::new("-"))?,
    };
    let record = Record::from_json(json.trim())?;

    let report = ResolveReport {
        event: record.tag(&config.event_key).map(str::to_string),
        accepted: config.accepts(&record),
        metrics: resolve_all(&record, config),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn cmd_doctor(config: Option<&Path>, json: bool) -> Result<(), HeartSyncCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "version".to_string(),
        status: CheckStatus::Ok,
        message: format!("HeartSync Core {}", HEARTSYNC_VERSION),
    });

    // Check config file if provided
    if let Some(config_path) = config {
        if config_path.exists() {
            let check = match fs::read_to_string(config_path) {
                Ok(content) => match AggregatorConfig::from_json(&content) {
                    Ok(config) => DoctorCheck {
                        name: "config".to_string(),
                        status: CheckStatus::Ok,
                        message: format!(
                            "Config valid ({} metrics: {})",
                            config.metrics.len(),
                            config.metric_names().collect::<Vec<_>>().join(", ")
                        ),
                    },
                    Err(e) => DoctorCheck {
                        name: "config".to_string(),
                        status: CheckStatus::Error,
                        message: format!("Invalid config: {}", e),
                    },
                },
                Err(e) => DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Cannot read config file: {}", e),
                },
            };
            checks.push(check);
        } else {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Warning,
                message: "Config file does not exist".to_string(),
            });
        }
    }

    // Environment overrides must still produce a valid config
    let mut effective = AggregatorConfig::default();
    effective.apply_env_overrides();
    checks.push(match effective.validate() {
        Ok(()) => DoctorCheck {
            name: "environment".to_string(),
            status: CheckStatus::Ok,
            message: format!(
                "page_size={} live_min_interval_ms={} allowed_events=[{}]",
                effective.page_size,
                effective.live_min_interval_ms,
                effective.allowed_events.join(",")
            ),
        },
        Err(e) => DoctorCheck {
            name: "environment".to_string(),
            status: CheckStatus::Error,
            message: format!("Environment overrides invalid: {}", e),
        },
    });

    // Check stdin is available (for live mode)
    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (interactive mode)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (live mode ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: HEARTSYNC_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("HeartSync Doctor Report");
        println!("=======================");
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
        Err(HeartSyncCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn format_summary(summary: &DaySummary, pretty: bool) -> Result<String, HeartSyncCliError> {
    if pretty {
        Ok(serde_json::to_string_pretty(summary)?)
    } else {
        Ok(serde_json::to_string(summary)?)
    }
}

// Error types

#[derive(Debug)]
enum HeartSyncCliError {
    Io(io::Error),
    Aggregate(AggregateError),
    Json(serde_json::Error),
    ParseError(String),
    PassFailed(String),
    NoRecords,
    NoPass,
    DoctorFailed,
}

impl From<io::Error> for HeartSyncCliError {
    fn from(e: io::Error) -> Self {
        HeartSyncCliError::Io(e)
    }
}

impl From<AggregateError> for HeartSyncCliError {
    fn from(e: AggregateError) -> Self {
        HeartSyncCliError::Aggregate(e)
    }
}

impl From<serde_json::Error> for HeartSyncCliError {
    fn from(e: serde_json::Error) -> Self {
        HeartSyncCliError::Json(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<HeartSyncCliError> for CliError {
    fn from(e: HeartSyncCliError) -> Self {
        match e {
            HeartSyncCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            HeartSyncCliError::Aggregate(AggregateError::InvalidConfig(msg)) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: msg,
                hint: Some("Run 'heartsync doctor --config <file>' for details".to_string()),
            },
            HeartSyncCliError::Aggregate(e) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Each record must be a JSON object".to_string()),
            },
            HeartSyncCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            HeartSyncCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Each line must be a JSON array of records".to_string()),
            },
            HeartSyncCliError::PassFailed(msg) => CliError {
                code: "PASS_FAILED".to_string(),
                message: msg,
                hint: Some("The record source failed; retry the pass".to_string()),
            },
            HeartSyncCliError::NoRecords => CliError {
                code: "NO_RECORDS".to_string(),
                message: "No records found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            HeartSyncCliError::NoPass => CliError {
                code: "NO_PASS".to_string(),
                message: "Aggregation pass did not complete".to_string(),
                hint: None,
            },
            HeartSyncCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

#[derive(Serialize)]
struct ResolveReport {
    event: Option<String>,
    accepted: bool,
    metrics: std::collections::BTreeMap<String, Option<f64>>,
}

#[derive(Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
