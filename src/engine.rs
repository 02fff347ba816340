//! Aligns master and report records over the expected key universe and turns
//! oracle verdicts plus structural signals into final decisions.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::model::{
    ChoiceLabel, ComparisonResult, Decision, MasterRecord, RecordKey, Rect, ReconciliationRow,
    ReportRecord,
};
use crate::oracle::{ComparisonOracle, EvidenceCrops};
use crate::render::CropRenderer;
use crate::report::{index_report_records, repeat_counts};

pub const DEFAULT_THRESHOLD: f64 = 0.90;

/// Confidence assumed when the oracle gives a verdict without one.
pub const DEFAULT_CONFIDENCE: f64 = 1.0;

pub const AUTO_PASS_REASON: &str = "auto-pass: zero differences reported for this repeat";
pub const MISSING_DIFFERENCE_REASON: &str = "missing difference in report";
pub const MISSING_MASTER_REASON: &str = "master row mapping missing; manual review required";
pub const EXTRA_DIFFERENCE_REASON: &str = "extra difference id found";

const EVIDENCE_AUTO_PASS: &str = "repeat_zero_differences";
const EVIDENCE_MISSING_DIFFERENCE: &str = "missing_difference_id";
const EVIDENCE_MISSING_MASTER: &str = "missing_master_record";
const EVIDENCE_ORACLE: &str = "oracle_compare";
const EVIDENCE_EXTRA: &str = "extra_difference_id";

#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    pub master_pdf: PathBuf,
    pub report_pdf: PathBuf,
    /// Crops land in `evidence_dir/r{R}_d{D}/`.
    pub evidence_dir: PathBuf,
    pub threshold: f64,
}

#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    pub rows: Vec<ReconciliationRow>,
    pub warnings: Vec<String>,
}

impl Reconciliation {
    /// PASS/FAIL decisions keyed for write-back. N/A and UNSET never appear.
    pub fn writeback_decisions(&self) -> BTreeMap<RecordKey, ChoiceLabel> {
        self.rows
            .iter()
            .filter_map(|row| row.decision.writeback_label().map(|label| (row.key, label)))
            .collect()
    }
}

/// Decision policy for a key that has a report record and went through the
/// oracle. Returns the decision and the reason to record.
pub fn decide(
    comparison: &ComparisonResult,
    has_master: bool,
    threshold: f64,
) -> (Decision, String) {
    if !has_master {
        return (Decision::Unset, MISSING_MASTER_REASON.to_string());
    }

    let confidence = comparison.confidence.unwrap_or(DEFAULT_CONFIDENCE);
    let decision = if comparison.matched && confidence >= threshold {
        Decision::Pass
    } else if confidence >= threshold {
        Decision::Fail
    } else {
        Decision::Unset
    };
    (decision, comparison.reason.clone())
}

type ProgressHook<'a> = dyn FnMut(usize, usize, &str) + 'a;

pub struct Reconciler<'a> {
    settings: &'a ReconcileSettings,
    renderer: &'a dyn CropRenderer,
    oracle: &'a mut dyn ComparisonOracle,
    progress: Option<Box<ProgressHook<'a>>>,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        settings: &'a ReconcileSettings,
        renderer: &'a dyn CropRenderer,
        oracle: &'a mut dyn ComparisonOracle,
    ) -> Self {
        Self {
            settings,
            renderer,
            oracle,
            progress: None,
        }
    }

    /// Called as `(completed, total, message)` after each row.
    pub fn on_progress(mut self, hook: impl FnMut(usize, usize, &str) + 'a) -> Self {
        self.progress = Some(Box::new(hook));
        self
    }

    pub fn run(mut self, masters: &[MasterRecord], reports: &[ReportRecord]) -> Reconciliation {
        let master_lookup = masters
            .iter()
            .map(|record| (record.key, record))
            .collect::<HashMap<RecordKey, &MasterRecord>>();
        let (report_lookup, mut warnings) = index_report_records(reports);
        let per_repeat = repeat_counts(reports);

        let extras = report_lookup
            .iter()
            .filter(|(key, _)| !key.is_expected())
            .map(|(_, record)| *record)
            .collect::<Vec<&ReportRecord>>();

        let universe = RecordKey::expected_universe();
        let total = universe.len() + extras.len();
        let mut rows = Vec::with_capacity(total);

        for key in universe {
            let master = master_lookup.get(&key).copied();
            let row = match report_lookup.get(&key) {
                None => synthetic_row(
                    key,
                    master,
                    per_repeat.get(&key.repeat_id).copied().unwrap_or(0),
                ),
                Some(report) => self.compared_row(key, master, report, &mut warnings),
            };
            rows.push(row);
            self.notify(&rows, total);
        }

        for report in extras {
            rows.push(ReconciliationRow {
                key: report.key,
                decision: Decision::Unset,
                matched: false,
                confidence: Some(DEFAULT_CONFIDENCE),
                reason: EXTRA_DIFFERENCE_REASON.to_string(),
                evidence: vec![EVIDENCE_EXTRA.to_string()],
                master_page: None,
                master_group: None,
                report_page: Some(report.page_index),
            });
            self.notify(&rows, total);
        }

        Reconciliation { rows, warnings }
    }

    fn notify(&mut self, rows: &[ReconciliationRow], total: usize) {
        let Some(row) = rows.last() else {
            return;
        };
        let message = format!("{}: {}", row.key, row.decision.as_str());
        debug!(completed = rows.len(), total, "{message}");
        if let Some(hook) = self.progress.as_mut() {
            hook(rows.len(), total, &message);
        }
    }

    fn compared_row(
        &mut self,
        key: RecordKey,
        master: Option<&MasterRecord>,
        report: &ReportRecord,
        warnings: &mut Vec<String>,
    ) -> ReconciliationRow {
        let crop_dir = self
            .settings
            .evidence_dir
            .join(format!("r{}_d{}", key.repeat_id, key.difference_id));

        let mut render = |document: &Path, page_index: usize, rect: Rect, name: &str| {
            self.render_soft(document, page_index, rect, &crop_dir.join(name), warnings)
        };

        let crops = EvidenceCrops {
            protocol_master: master.and_then(|record| {
                render(
                    &self.settings.master_pdf,
                    record.page_index,
                    record.master_rect,
                    "protocol_master.png",
                )
            }),
            protocol_sample: master.and_then(|record| {
                render(
                    &self.settings.master_pdf,
                    record.page_index,
                    record.sample_rect,
                    "protocol_sample.png",
                )
            }),
            report_master: render(
                &self.settings.report_pdf,
                report.page_index,
                report.master_rect,
                "report_master.png",
            ),
            report_sample: render(
                &self.settings.report_pdf,
                report.page_index,
                report.sample_rect,
                "report_sample.png",
            ),
        };

        let comparison = self.oracle.compare(&crops);
        let (decision, reason) = decide(&comparison, master.is_some(), self.settings.threshold);

        let mut evidence = vec![EVIDENCE_ORACLE.to_string()];
        evidence.extend(
            [
                &crops.protocol_master,
                &crops.protocol_sample,
                &crops.report_master,
                &crops.report_sample,
            ]
            .into_iter()
            .flatten()
            .map(|path| path.display().to_string()),
        );
        if master.is_none() {
            evidence.push(EVIDENCE_MISSING_MASTER.to_string());
        }

        ReconciliationRow {
            key,
            decision,
            matched: comparison.matched,
            confidence: comparison.confidence,
            reason,
            evidence,
            master_page: master.map(|record| record.page_index),
            master_group: master.map(|record| record.group_name.clone()),
            report_page: Some(report.page_index),
        }
    }

    fn render_soft(
        &self,
        document: &Path,
        page_index: usize,
        rect: Rect,
        out_path: &Path,
        warnings: &mut Vec<String>,
    ) -> Option<PathBuf> {
        if rect.is_empty() {
            return None;
        }
        match self
            .renderer
            .render_crop(document, page_index, rect, out_path)
        {
            Ok(path) => Some(path),
            Err(error) => {
                let message = format!("failed to render {}: {:#}", out_path.display(), error);
                warn!(
                    document = %document.display(),
                    page = page_index + 1,
                    error = %format!("{error:#}"),
                    "crop render failed; treating crop as absent"
                );
                warnings.push(message);
                None
            }
        }
    }
}

fn synthetic_row(
    key: RecordKey,
    master: Option<&MasterRecord>,
    repeat_report_count: usize,
) -> ReconciliationRow {
    let (decision, matched, reason, evidence) = if repeat_report_count == 0 {
        (
            Decision::Pass,
            true,
            AUTO_PASS_REASON,
            vec![EVIDENCE_AUTO_PASS.to_string()],
        )
    } else {
        let mut evidence = vec![EVIDENCE_MISSING_DIFFERENCE.to_string()];
        if master.is_none() {
            evidence.push(EVIDENCE_MISSING_MASTER.to_string());
        }
        (Decision::Fail, false, MISSING_DIFFERENCE_REASON, evidence)
    };

    ReconciliationRow {
        key,
        decision,
        matched,
        confidence: Some(DEFAULT_CONFIDENCE),
        reason: reason.to_string(),
        evidence,
        master_page: master.map(|record| record.page_index),
        master_group: master.map(|record| record.group_name.clone()),
        report_page: None,
    }
}
