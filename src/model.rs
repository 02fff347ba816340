use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub const EXPECTED_REPEATS: u32 = 4;
pub const DIFFERENCES_PER_REPEAT: u32 = 19;

/// Axis-aligned rectangle in page points, origin at the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl Rect {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0.0 || self.height() <= 0.0
    }

    pub fn union(&self, other: &Rect) -> Rect {
        Rect {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub repeat_id: u32,
    pub difference_id: u32,
}

impl RecordKey {
    pub fn new(repeat_id: u32, difference_id: u32) -> Self {
        Self {
            repeat_id,
            difference_id,
        }
    }

    /// Key for the `ordinal`-th record (1-based) in document order.
    pub fn from_ordinal(ordinal: u32) -> Self {
        let zero_based = ordinal.saturating_sub(1);
        Self {
            repeat_id: zero_based / DIFFERENCES_PER_REPEAT + 1,
            difference_id: zero_based % DIFFERENCES_PER_REPEAT + 1,
        }
    }

    pub fn is_expected(&self) -> bool {
        (1..=EXPECTED_REPEATS).contains(&self.repeat_id)
            && (1..=DIFFERENCES_PER_REPEAT).contains(&self.difference_id)
    }

    /// The fixed 4x19 universe in repeat-major, difference-minor order.
    pub fn expected_universe() -> Vec<RecordKey> {
        (1..=EXPECTED_REPEATS)
            .flat_map(|repeat_id| {
                (1..=DIFFERENCES_PER_REPEAT)
                    .map(move |difference_id| RecordKey::new(repeat_id, difference_id))
            })
            .collect()
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "repeat {} diff {}", self.repeat_id, self.difference_id)
    }
}

/// One of the mutually exclusive buttons offered by a master choice group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ChoiceLabel {
    #[serde(rename = "PASS")]
    Pass,
    #[serde(rename = "FAIL")]
    Fail,
    #[serde(rename = "N/A")]
    NotApplicable,
}

impl ChoiceLabel {
    /// Maps a raw appearance-state name to a label. `N#2FA` is the
    /// hex-escaped PDF name form of `N/A`.
    pub fn from_export_value(value: &str) -> Option<Self> {
        match value.trim() {
            "PASS" => Some(Self::Pass),
            "FAIL" => Some(Self::Fail),
            "N/A" | "N#2FA" | "NA" => Some(Self::NotApplicable),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::NotApplicable => "N/A",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Decision {
    #[serde(rename = "PASS")]
    Pass,
    #[serde(rename = "FAIL")]
    Fail,
    #[serde(rename = "N/A")]
    NotApplicable,
    #[serde(rename = "UNSET")]
    Unset,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::NotApplicable => "N/A",
            Self::Unset => "UNSET",
        }
    }

    /// Only PASS and FAIL are ever written back into the master document.
    pub fn writeback_label(self) -> Option<ChoiceLabel> {
        match self {
            Self::Pass => Some(ChoiceLabel::Pass),
            Self::Fail => Some(ChoiceLabel::Fail),
            Self::NotApplicable | Self::Unset => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterRecord {
    pub key: RecordKey,
    pub page_index: usize,
    pub group_name: String,
    pub choice_indices: BTreeMap<ChoiceLabel, usize>,
    pub master_rect: Rect,
    pub sample_rect: Rect,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRecord {
    pub key: RecordKey,
    pub page_index: usize,
    pub block_rect: Rect,
    pub master_rect: Rect,
    pub sample_rect: Rect,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    #[serde(rename = "match")]
    pub matched: bool,
    pub reason: String,
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl ComparisonResult {
    /// Non-matching, zero-confidence result used for every degraded path.
    pub fn degraded(reason: impl Into<String>) -> Self {
        Self {
            matched: false,
            reason: reason.into(),
            confidence: Some(0.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationRow {
    pub key: RecordKey,
    pub decision: Decision,
    pub matched: bool,
    pub confidence: Option<f64>,
    pub reason: String,
    pub evidence: Vec<String>,
    pub master_page: Option<usize>,
    pub master_group: Option<String>,
    pub report_page: Option<usize>,
}

impl ReconciliationRow {
    /// Rows that need a reviewer's attention: everything but PASS.
    pub fn is_exception(&self) -> bool {
        self.decision != Decision::Pass
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DecisionCounts {
    pub total: usize,
    pub expected: usize,
    pub extra: usize,
    pub pass: usize,
    pub fail: usize,
    pub not_applicable: usize,
    pub unset: usize,
}

impl DecisionCounts {
    pub fn from_rows(rows: &[ReconciliationRow]) -> Self {
        let mut counts = DecisionCounts {
            total: rows.len(),
            ..DecisionCounts::default()
        };
        for row in rows {
            if row.key.is_expected() {
                counts.expected += 1;
            } else {
                counts.extra += 1;
            }
            match row.decision {
                Decision::Pass => counts.pass += 1,
                Decision::Fail => counts.fail += 1,
                Decision::NotApplicable => counts.not_applicable += 1,
                Decision::Unset => counts.unset += 1,
            }
        }
        counts
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OracleStats {
    pub requests: usize,
    pub cache_hits: usize,
    pub degraded: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcilePaths {
    pub master_path: String,
    pub report_path: String,
    pub output_dir: String,
    pub reconciled_master_path: String,
    pub audit_log_path: String,
    pub exceptions_path: String,
    pub evidence_dir: String,
    pub cache_path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolVersions {
    pub pdftotext: Option<String>,
    pub pdftoppm: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub status: String,
    pub started_at: String,
    pub updated_at: String,
    pub record_type: String,
    pub threshold: f64,
    pub model: String,
    pub tool_versions: ToolVersions,
    pub master_record_count: usize,
    pub report_record_count: usize,
    pub counts: DecisionCounts,
    pub oracle: OracleStats,
    pub fields_written: usize,
    pub paths: ReconcilePaths,
    pub warnings: Vec<String>,
    pub notes: Vec<String>,
}
