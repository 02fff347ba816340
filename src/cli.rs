use std::path::PathBuf;

use clap::builder::BoolishValueParser;
use clap::{Args, Parser, Subcommand};

use crate::engine::DEFAULT_THRESHOLD;
use crate::master::SUPPORTED_RECORD_TYPE;
use crate::oracle::{DEFAULT_CACHE_PATH, DEFAULT_ENDPOINT, DEFAULT_MODEL};
use crate::render::DEFAULT_ZOOM;

#[derive(Parser, Debug)]
#[command(
    name = "vra",
    version,
    about = "Reconcile a master difference table against a report with visual comparison"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compare every expected row, write the reconciled master and audit tables.
    Reconcile(ReconcileArgs),
    /// Print the records extracted from one document as JSON.
    Inspect(InspectArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ReconcileArgs {
    #[arg(long)]
    pub master: PathBuf,

    #[arg(long)]
    pub report: PathBuf,

    #[arg(long, default_value = SUPPORTED_RECORD_TYPE)]
    pub record_type: String,

    #[arg(long, default_value_t = DEFAULT_THRESHOLD, value_parser = parse_threshold)]
    pub threshold: f64,

    #[arg(long, default_value = "output")]
    pub output_dir: PathBuf,

    #[arg(long, default_value_t = DEFAULT_ZOOM, value_parser = parse_zoom)]
    pub zoom: f64,

    #[command(flatten)]
    pub oracle: OracleArgs,
}

#[derive(Args, Debug, Clone)]
pub struct OracleArgs {
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(long, env = "GEMINI_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    #[arg(long, env = "GEMINI_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    #[arg(long, env = "GEMINI_MIN_SECONDS_BETWEEN_CALLS", default_value_t = 0.5)]
    pub min_seconds_between_calls: f64,

    #[arg(long, env = "GEMINI_MAX_RETRIES", default_value_t = 2)]
    pub max_retries: u32,

    #[arg(long, env = "GEMINI_TIMEOUT_SECS", default_value_t = 45)]
    pub timeout_secs: u64,

    #[arg(long, env = "VLM_CACHE_PATH", default_value = DEFAULT_CACHE_PATH)]
    pub cache_path: PathBuf,

    #[arg(long, env = "VLM_CACHE_DISABLE", value_parser = BoolishValueParser::new())]
    pub no_cache: bool,
}

#[derive(Args, Debug, Clone)]
pub struct InspectArgs {
    #[arg(long, required_unless_present = "report", conflicts_with = "report")]
    pub master: Option<PathBuf>,

    #[arg(long)]
    pub report: Option<PathBuf>,

    #[arg(long, default_value = SUPPORTED_RECORD_TYPE)]
    pub record_type: String,

    /// Write JSON here instead of stdout.
    #[arg(long)]
    pub output: Option<PathBuf>,
}

fn parse_threshold(raw: &str) -> Result<f64, String> {
    let value = raw
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("'{raw}' is not a number"))?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("threshold must be within [0, 1], got {value}"))
    }
}

fn parse_zoom(raw: &str) -> Result<f64, String> {
    let value = raw
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("'{raw}' is not a number"))?;
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(format!("zoom must be positive, got {value}"))
    }
}
