//! CLI entry point for the congestion pricing audit.
//!
//! Runs the whole pipeline or any single stage over a data directory, and
//! publishes the finished artifacts to S3 or a local directory.

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use congestion_audit::config::AuditConfig;
use congestion_audit::layout::DataLayout;
use congestion_audit::output::print_json;
use congestion_audit::pipeline::{Pipeline, Stage, StageReport, StageStatus, all_succeeded};
use congestion_audit::publish::{
    DEFAULT_PREFIX, LocalPublisher, Publisher, S3Publisher, publish_artifacts,
};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{
    EnvFilter, Layer,
    filter::LevelFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "congestion_audit")]
#[command(about = "Audit NYC taxi trips against the congestion pricing policy", long_about = None)]
struct Cli {
    /// JSON config file (falls back to AUDIT_CONFIG, then built-in defaults)
    #[arg(short, long, global = true, env = "AUDIT_CONFIG")]
    config: Option<PathBuf>,

    /// Override the data directory from the config
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every stage in order, or a single stage
    Run {
        /// Run only this stage (unify, clean, impute, zones, analyze)
        #[arg(short, long)]
        stage: Option<Stage>,

        /// Recompute outputs that already exist
        #[arg(short, long, default_value_t = false)]
        force: bool,
    },
    /// Map raw provider files onto the canonical schema
    Unify {
        #[arg(short, long, default_value_t = false)]
        force: bool,
    },
    /// Check every unified file for the canonical columns
    Verify,
    /// Split unified trips into clean and ghost streams
    Clean {
        #[arg(short, long, default_value_t = false)]
        force: bool,
    },
    /// Synthesize daily statistics for a missing month
    Impute {
        #[arg(short, long, default_value_t = false)]
        force: bool,
    },
    /// Classify clean trips against the congestion zone
    Zones {
        #[arg(short, long, default_value_t = false)]
        force: bool,
    },
    /// Compute leakage and the provider comparison
    Analyze,
    /// Upload aggregated and imputed artifacts
    Publish {
        /// S3 bucket to upload to (e.g., "my-bucket")
        #[arg(long, conflicts_with = "output_dir")]
        s3_bucket: Option<String>,

        /// Local directory to copy into instead of S3
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Key prefix for every uploaded object
        #[arg(long, default_value = DEFAULT_PREFIX)]
        prefix: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/congestion_audit.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("congestion_audit.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(env_filter("RUST_LOG", LevelFilter::INFO));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(env_filter("RUST_LOG_JSON", LevelFilter::DEBUG));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    let mut config = AuditConfig::load_or_default(cli.config.as_deref())?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    info!(data_dir = %config.data_dir.display(), "Configuration loaded");

    match cli.command {
        Commands::Run { stage, force } => {
            let pipeline = Pipeline::new(&config, force);
            let reports = match stage {
                Some(stage) => vec![StageReport {
                    stage,
                    status: pipeline.run_stage(stage),
                }],
                None => pipeline.run_all(),
            };
            print_json(&reports)?;
            if !all_succeeded(&reports) {
                bail!("pipeline did not complete");
            }
        }
        Commands::Unify { force } => single_stage(&config, Stage::Unify, force)?,
        Commands::Verify => {
            let layout = DataLayout::new(&config.data_dir);
            let stats = congestion_audit::schema::verify_all(&layout)?;
            print_json(&stats)?;
            if !stats.failed.is_empty() {
                bail!("{} unified files failed schema verification", stats.failed.len());
            }
        }
        Commands::Clean { force } => single_stage(&config, Stage::Clean, force)?,
        Commands::Impute { force } => single_stage(&config, Stage::Impute, force)?,
        Commands::Zones { force } => single_stage(&config, Stage::Zones, force)?,
        Commands::Analyze => single_stage(&config, Stage::Analyze, false)?,
        Commands::Publish {
            s3_bucket,
            output_dir,
            prefix,
        } => {
            let publisher: Box<dyn Publisher> = match (s3_bucket, output_dir) {
                (Some(bucket), _) => {
                    let s3 = S3Publisher::from_env(bucket).await;
                    info!(bucket = %s3.bucket(), "Publishing to S3");
                    Box::new(s3)
                }
                (None, Some(dir)) => {
                    info!(dir = %dir.display(), "Publishing to local directory");
                    Box::new(LocalPublisher::new(dir))
                }
                (None, None) => bail!("publish needs --s3-bucket or --output-dir"),
            };
            let layout = DataLayout::new(&config.data_dir);
            let index = publish_artifacts(&layout, publisher.as_ref(), &prefix).await?;
            print_json(&index)?;
        }
    }

    Ok(())
}

/// `RUST_LOG`-style filter from `var`, with `default` when unset or unparsable.
fn env_filter(var: &str, default: LevelFilter) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(default.into())
        .with_env_var(var)
        .from_env_lossy()
}

fn single_stage(config: &AuditConfig, stage: Stage, force: bool) -> Result<()> {
    let status = Pipeline::new(config, force).run_stage(stage);
    print_json(&StageReport {
        stage,
        status: status.clone(),
    })?;
    if let StageStatus::Failed(reason) = status {
        bail!("stage {stage} failed: {reason}");
    }
    Ok(())
}
