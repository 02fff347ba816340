use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::info;

use crate::cli::InspectArgs;
use crate::layout::extract_layout;
use crate::master::{build_master_records, profile_for};
use crate::report::{ReportPatterns, build_report_records, index_report_records};
use crate::util::{now_utc_string, write_json_pretty};

#[derive(Debug, Serialize)]
struct InspectOutput<T: Serialize> {
    generated_at: String,
    kind: &'static str,
    source_path: String,
    page_count: usize,
    record_count: usize,
    warnings: Vec<String>,
    records: Vec<T>,
}

pub fn run(args: InspectArgs) -> Result<()> {
    match (&args.master, &args.report) {
        (Some(master), None) => {
            profile_for(&args.record_type)?;
            let layout = extract_layout(master)?;
            let records = build_master_records(&layout, &args.record_type)
                .with_context(|| format!("failed to read master structure: {}", master.display()))?;
            emit(
                args.output.as_deref(),
                InspectOutput {
                    generated_at: now_utc_string(),
                    kind: "master",
                    source_path: master.display().to_string(),
                    page_count: layout.page_count(),
                    record_count: records.len(),
                    warnings: Vec::new(),
                    records,
                },
            )
        }
        (None, Some(report)) => {
            let layout = extract_layout(report)?;
            let records = build_report_records(&layout, &ReportPatterns::new()?);
            let (_, warnings) = index_report_records(&records);
            emit(
                args.output.as_deref(),
                InspectOutput {
                    generated_at: now_utc_string(),
                    kind: "report",
                    source_path: report.display().to_string(),
                    page_count: layout.page_count(),
                    record_count: records.len(),
                    warnings,
                    records,
                },
            )
        }
        _ => bail!("inspect needs exactly one of --master or --report"),
    }
}

fn emit<T: Serialize>(output: Option<&Path>, value: InspectOutput<T>) -> Result<()> {
    info!(
        kind = value.kind,
        source = %value.source_path,
        records = value.record_count,
        "inspected document"
    );

    match output {
        Some(path) => {
            write_json_pretty(path, &value)?;
            info!(path = %path.display(), "wrote inspection output");
        }
        None => {
            let rendered = serde_json::to_string_pretty(&value)
                .context("failed to serialize inspection output")?;
            println!("{rendered}");
        }
    }

    Ok(())
}
