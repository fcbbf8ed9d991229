//! Command-line interface
//!
//! `pipeline`, `promote`, `validate`, `serve` and `verify-audit`.

use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser, Subcommand};
use colored::*;

use crate::config::{PipelineConfig, ServeConfig, TrackingConfig, DEFAULT_MODEL_NAME};
use crate::dataset::{ValidationConfig, ValidationReport, ValidationWarning, Validator};
use crate::error::MlopsError;
use crate::pipeline::{Pipeline, PipelineOutcome};
use crate::registry::{ModelRegistry, Promotion, Stage};
use crate::server::{run_server, AuditLog};
use crate::tracking::TrackingStore;

// ─── Styling helpers ───────────────────────────────────────────────────────────

fn dim(s: &str) -> ColoredString    { s.truecolor(100, 100, 100) }
fn accent(s: &str) -> ColoredString { s.truecolor(120, 170, 255) }
fn muted(s: &str) -> ColoredString  { s.truecolor(140, 140, 140) }
fn ok(s: &str) -> ColoredString     { s.truecolor(100, 210, 120) }
fn warn(s: &str) -> ColoredString   { s.truecolor(230, 190, 90) }
fn fail(s: &str) -> ColoredString   { s.truecolor(230, 100, 100) }

fn kv(key: &str, val: &str) {
    println!("    {} {}", muted(&format!("{:<22}", key)), val.white());
}

fn step_ok(msg: &str) {
    println!("  {} {}", ok("✓"), msg);
}

fn step_warn(msg: &str) {
    println!("  {} {}", warn("!"), msg);
}

fn step_fail(msg: &str) {
    println!("  {} {}", fail("✗"), msg);
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

// ─── Command definitions ───────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "bikeshare")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Bike demand training pipeline, model registry and inference service")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download, validate, train, evaluate, check drift and register a model
    Pipeline {
        /// Use a local CSV instead of downloading the dataset
        #[arg(short, long)]
        data: Option<PathBuf>,
    },

    /// Move a model version to a stage
    Promote {
        /// Registered model name
        #[arg(short, long, default_value = DEFAULT_MODEL_NAME)]
        model: String,

        /// Target stage (Staging, Production, Archived)
        #[arg(short, long, default_value = "Staging")]
        stage: String,
    },

    /// Validate a dataset file without training
    Validate {
        /// CSV file to check
        #[arg(default_value = "data/bike_hour.csv")]
        path: PathBuf,
    },

    /// Serve predictions over HTTP
    Serve {
        /// Port to listen on (overrides PORT)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind (overrides HOST)
        #[arg(long)]
        host: Option<String>,
    },

    /// Check the hash chain of an audit log
    VerifyAudit {
        /// Audit log file (defaults to AUDIT_LOG)
        path: Option<PathBuf>,
    },
}

// ─── Commands ──────────────────────────────────────────────────────────────────

pub async fn cmd_pipeline(data: Option<&Path>) -> anyhow::Result<()> {
    let config = PipelineConfig::default();
    let pipeline = Pipeline::new(config, TrackingConfig::default());
    let start = Instant::now();

    section("Training pipeline");
    let outcome = match data {
        Some(path) => pipeline.run_local(path)?,
        None => pipeline.run().await?,
    };
    print_outcome(&outcome);
    println!();
    println!("  {}", dim(&format!("finished in {:.1}s", start.elapsed().as_secs_f64())));
    Ok(())
}

fn print_outcome(outcome: &PipelineOutcome) {
    step_ok("Dataset validated");
    print_validation(&outcome.validation);

    step_ok("Model trained and evaluated");
    for (name, value) in outcome.evaluation.metrics() {
        kv(&name, &format!("{:.4}", value));
    }

    if outcome.dataset_drift {
        step_warn("Dataset drift detected");
    } else {
        step_ok("Drift report written");
    }
    kv("drifted features", &outcome.n_drifted_features.to_string());
    kv("drift share", &format!("{:.3}", outcome.drift_share));

    step_ok("Run recorded");
    kv("run id", &outcome.run_id);
    kv("data version", &outcome.data_version);
    kv("code version", &outcome.code_version);

    step_ok(&format!(
        "Registered {} version {}",
        outcome.model_version.name.as_str().cyan(),
        outcome.model_version.version
    ));
}

fn print_validation(report: &ValidationReport) {
    kv("rows in", &report.rows_in.to_string());
    kv("rows out", &report.rows_out.to_string());
    kv("null cells", &report.null_cells.to_string());
    for warning in &report.warnings {
        match warning {
            ValidationWarning::NullsDropped { null_cells, rows } => {
                step_warn(&format!("dropped {} rows with {} null cells", rows, null_cells))
            }
            ValidationWarning::OutOfRange { column, lower, upper, count } => step_warn(&format!(
                "{} values of '{}' outside [{}, {}]",
                count, column, lower, upper
            )),
        }
    }
}

pub fn cmd_validate(path: &Path) -> anyhow::Result<()> {
    section("Data validation");
    kv("file", &path.display().to_string());

    let config = PipelineConfig::default();
    let validator = Validator::new(ValidationConfig {
        min_rows: config.min_rows,
        ..ValidationConfig::default()
    });
    match validator.validate_path(path) {
        Ok(table) => {
            print_validation(&table.report);
            step_ok("Dataset passed validation");
            Ok(())
        }
        Err(e) => {
            step_fail(&e.to_string());
            Err(e.into())
        }
    }
}

pub fn cmd_promote(model: &str, stage: &str) -> anyhow::Result<()> {
    section("Model promotion");
    let target: Stage = stage.parse()?;
    let store = TrackingStore::open(&TrackingConfig::default())?;

    match ModelRegistry::new(&store).promote(model, target) {
        Ok(promotion) => {
            print_promotion(&promotion);
            Ok(())
        }
        Err(e @ (MlopsError::UnknownModel(_) | MlopsError::NoEligibleVersion { .. })) => {
            step_warn(&e.to_string());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn print_promotion(promotion: &Promotion) {
    if promotion.is_noop() {
        step_ok(&format!(
            "{} version {} is already in {}",
            promotion.name.as_str().cyan(),
            promotion.version,
            promotion.to_stage
        ));
    } else {
        step_ok(&format!(
            "{} version {}: {} {} {}",
            promotion.name.as_str().cyan(),
            promotion.version,
            promotion.from_stage,
            accent("→"),
            promotion.to_stage
        ));
    }
    for version in &promotion.archived {
        kv("archived version", &version.to_string());
    }
}

pub async fn cmd_serve(host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let mut config = ServeConfig::from_env()?;
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }

    section("Inference service");
    kv("model", &config.model_name);
    kv("stage", config.model_stage.as_str());
    kv("address", &format!("http://{}:{}", config.host, config.port));
    kv("audit log", &config.audit_log_path.display().to_string());
    println!();

    run_server(config, TrackingConfig::default()).await
}

pub fn cmd_verify_audit(path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = match path {
        Some(path) => path,
        None => ServeConfig::from_env()?.audit_log_path,
    };

    section("Audit log");
    kv("file", &path.display().to_string());
    let check = AuditLog::verify(&path)?;
    kv("entries", &check.entries.to_string());
    if check.valid {
        step_ok(&check.message);
        Ok(())
    } else {
        let line = check.first_invalid_line.unwrap_or_default();
        step_fail(&format!("line {}: {}", line, check.message));
        anyhow::bail!("audit chain broken at line {}", line)
    }
}
