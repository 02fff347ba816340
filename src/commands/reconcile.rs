use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::{info, warn};

use crate::cli::{OracleArgs, ReconcileArgs};
use crate::engine::{ReconcileSettings, Reconciler};
use crate::layout::extract_layout;
use crate::master::{build_master_records, profile_for};
use crate::model::{DecisionCounts, ReconcilePaths, ReconcileRunManifest, ToolVersions};
use crate::oracle::{ComparisonOracle, OracleClient, OracleConfig};
use crate::render::{PdftoppmRenderer, tool_version};
use crate::report::{ReportPatterns, build_report_records};
use crate::util::{ensure_directory, now_utc_string, utc_compact_string, write_json_pretty};
use crate::writeback::{apply_choice_values, write_audit_log, write_exceptions};

const RECONCILED_MASTER_FILE: &str = "master_reconciled.pdf";
const AUDIT_LOG_FILE: &str = "reconciliation_log.csv";
const EXCEPTIONS_FILE: &str = "exceptions.csv";

pub fn run(args: ReconcileArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("run-{}", utc_compact_string(started_ts));

    require_file(&args.master, "master")?;
    require_file(&args.report, "report")?;
    if !(0.0..=1.0).contains(&args.threshold) {
        bail!("threshold must be within [0, 1], got {}", args.threshold);
    }
    profile_for(&args.record_type)?;

    let output_dir = args.output_dir.clone();
    let evidence_dir = output_dir.join("evidence");
    let manifest_path = output_dir.join("manifests").join(format!(
        "reconcile_run_{}.json",
        utc_compact_string(started_ts)
    ));
    let reconciled_master_path = output_dir.join(RECONCILED_MASTER_FILE);
    let audit_log_path = output_dir.join(AUDIT_LOG_FILE);
    let exceptions_path = output_dir.join(EXCEPTIONS_FILE);

    info!(
        run_id = %run_id,
        master = %args.master.display(),
        report = %args.report.display(),
        record_type = %args.record_type,
        threshold = args.threshold,
        "starting reconciliation"
    );

    let master_layout = extract_layout(&args.master)?;
    let master_records = build_master_records(&master_layout, &args.record_type)
        .with_context(|| format!("failed to read master structure: {}", args.master.display()))?;

    let report_layout = extract_layout(&args.report)?;
    let patterns = ReportPatterns::new()?;
    let report_records = build_report_records(&report_layout, &patterns);

    ensure_directory(&output_dir)?;

    let oracle_config = oracle_config(&args.oracle);
    if !oracle_config.is_configured() {
        warn!("no oracle credential configured; compared rows will degrade to UNSET");
    }
    let model = oracle_config.model.clone();
    let cache_path = oracle_config.cache_path.clone();
    let mut oracle = OracleClient::gemini(oracle_config)?;
    let renderer = PdftoppmRenderer::new(args.zoom);

    let settings = ReconcileSettings {
        master_pdf: args.master.clone(),
        report_pdf: args.report.clone(),
        evidence_dir: evidence_dir.clone(),
        threshold: args.threshold,
    };
    let reconciliation = Reconciler::new(&settings, &renderer, &mut oracle)
        .on_progress(|completed, total, message| {
            info!(completed, total, "{message}");
        })
        .run(&master_records, &report_records);

    let writeback = apply_choice_values(
        &args.master,
        &reconciled_master_path,
        &master_records,
        &reconciliation.writeback_decisions(),
    )?;
    write_audit_log(&audit_log_path, &reconciliation.rows)?;
    write_exceptions(&exceptions_path, &reconciliation.rows)?;

    let mut warnings = reconciliation.warnings.clone();
    warnings.extend(writeback.skipped.iter().map(|skipped| {
        format!(
            "write-back skipped {} ({}): {}",
            skipped.key,
            skipped.label.as_str(),
            skipped.reason
        )
    }));

    let counts = DecisionCounts::from_rows(&reconciliation.rows);
    let oracle_stats = oracle.stats();

    let manifest = ReconcileRunManifest {
        manifest_version: 1,
        run_id: run_id.clone(),
        status: "completed".to_string(),
        started_at,
        updated_at: now_utc_string(),
        record_type: args.record_type.clone(),
        threshold: args.threshold,
        model,
        tool_versions: ToolVersions {
            pdftotext: tool_version("pdftotext"),
            pdftoppm: tool_version("pdftoppm"),
        },
        master_record_count: master_records.len(),
        report_record_count: report_records.len(),
        counts: counts.clone(),
        oracle: oracle_stats,
        fields_written: writeback.fields_written,
        paths: ReconcilePaths {
            master_path: args.master.display().to_string(),
            report_path: args.report.display().to_string(),
            output_dir: output_dir.display().to_string(),
            reconciled_master_path: reconciled_master_path.display().to_string(),
            audit_log_path: audit_log_path.display().to_string(),
            exceptions_path: exceptions_path.display().to_string(),
            evidence_dir: evidence_dir.display().to_string(),
            cache_path: cache_path.map(|path| path.display().to_string()),
        },
        warnings,
        notes: vec![
            "Only PASS and FAIL decisions are written back; N/A and UNSET rows need manual review."
                .to_string(),
        ],
    };
    write_json_pretty(&manifest_path, &manifest)?;
    info!(path = %manifest_path.display(), "wrote run manifest");

    info!(
        run_id = %run_id,
        rows = counts.total,
        pass = counts.pass,
        fail = counts.fail,
        not_applicable = counts.not_applicable,
        unset = counts.unset,
        extra = counts.extra,
        oracle_requests = oracle_stats.requests,
        cache_hits = oracle_stats.cache_hits,
        degraded = oracle_stats.degraded,
        "reconciliation completed"
    );
    info!(
        reconciled_master = %reconciled_master_path.display(),
        audit_log = %audit_log_path.display(),
        exceptions = %exceptions_path.display(),
        evidence = %evidence_dir.display(),
        "outputs written"
    );

    Ok(())
}

fn require_file(path: &Path, role: &str) -> Result<()> {
    if !path.is_file() {
        bail!("{} document not found: {}", role, path.display());
    }
    Ok(())
}

fn oracle_config(args: &OracleArgs) -> OracleConfig {
    let defaults = OracleConfig::default();
    OracleConfig {
        api_key: args
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string),
        model: args.model.trim().to_string(),
        endpoint: args.endpoint.trim().to_string(),
        min_interval: Duration::try_from_secs_f64(args.min_seconds_between_calls)
            .unwrap_or(defaults.min_interval),
        max_retries: args.max_retries,
        timeout: Duration::from_secs(args.timeout_secs),
        cache_path: (!args.no_cache).then(|| args.cache_path.clone()),
        ..defaults
    }
}
