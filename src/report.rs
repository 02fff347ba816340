//! Report-record builder: text-anchored difference blocks, keyed by the
//! nearest preceding repeat marker.

use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{info, warn};

use crate::layout::{DocumentLayout, PageLayout};
use crate::model::{RecordKey, Rect, ReportRecord};

const REPEAT_MARKER_PATTERN: &str = r"Repeat ID\s+(\d+)";
const DIFFERENCE_LABEL_PATTERN: &str = r"Difference ID:\s*(\d+)";

const DEFAULT_REPEAT_ID: u32 = 1;
const EVIDENCE_TOP_OFFSET: f64 = 22.0;
const EVIDENCE_BOTTOM_GAP: f64 = 8.0;
const PAGE_BOTTOM_MARGIN: f64 = 5.0;
const MIN_EVIDENCE_HEIGHT: f64 = 10.0;
const OUTER_MARGIN: f64 = 8.0;
const GUTTER: f64 = 6.0;

pub struct ReportPatterns {
    repeat_marker: Regex,
    difference_label: Regex,
}

impl ReportPatterns {
    pub fn new() -> Result<Self> {
        Ok(Self {
            repeat_marker: Regex::new(REPEAT_MARKER_PATTERN)
                .context("failed to compile repeat marker regex")?,
            difference_label: Regex::new(DIFFERENCE_LABEL_PATTERN)
                .context("failed to compile difference label regex")?,
        })
    }
}

/// All report records in page order. An empty report yields an empty list.
pub fn build_report_records(
    layout: &DocumentLayout,
    patterns: &ReportPatterns,
) -> Vec<ReportRecord> {
    let (_, records) = layout.pages.iter().fold(
        (DEFAULT_REPEAT_ID, Vec::<ReportRecord>::new()),
        |(carried_repeat, mut records), page| {
            let markers = repeat_markers(page, patterns);
            records.extend(page_records(page, patterns, carried_repeat, &markers));
            let next_repeat = markers
                .last()
                .map_or(carried_repeat, |(repeat_id, _)| *repeat_id);
            (next_repeat, records)
        },
    );

    info!(
        path = %layout.path.display(),
        records = records.len(),
        "built report records"
    );

    records
}

/// Repeat markers on a page, top to bottom.
fn repeat_markers(page: &PageLayout, patterns: &ReportPatterns) -> Vec<(u32, Rect)> {
    let mut markers = page
        .find_all(&patterns.repeat_marker)
        .into_iter()
        .filter_map(|found| {
            let repeat_id = found.group(1)?.parse::<u32>().ok()?;
            Some((repeat_id, found.rect))
        })
        .collect::<Vec<(u32, Rect)>>();
    markers.sort_by(|a, b| a.1.y0.total_cmp(&b.1.y0));
    markers
}

fn page_records(
    page: &PageLayout,
    patterns: &ReportPatterns,
    carried_repeat: u32,
    markers: &[(u32, Rect)],
) -> Vec<ReportRecord> {
    let mut anchors = page
        .find_all(&patterns.difference_label)
        .into_iter()
        .filter_map(|found| {
            let difference_id = found.group(1)?.parse::<u32>().ok()?;
            Some((difference_id, found.rect))
        })
        .collect::<Vec<(u32, Rect)>>();
    anchors.sort_by(|a, b| a.1.y0.total_cmp(&b.1.y0));

    let mid_x = page.width / 2.0;

    anchors
        .iter()
        .enumerate()
        .map(|(position, (difference_id, anchor))| {
            // Nearest marker above the label; otherwise the one carried in.
            let repeat_id = markers
                .iter()
                .rev()
                .find(|(_, marker)| marker.y0 <= anchor.y0)
                .map_or(carried_repeat, |(repeat_id, _)| *repeat_id);

            let top = (anchor.y0 + EVIDENCE_TOP_OFFSET).max(0.0);
            let next_top = anchors
                .get(position + 1)
                .map(|(_, next)| next.y0)
                .unwrap_or(page.height - PAGE_BOTTOM_MARGIN);
            let bottom = (next_top - EVIDENCE_BOTTOM_GAP).max(top + MIN_EVIDENCE_HEIGHT);

            ReportRecord {
                key: RecordKey::new(repeat_id, *difference_id),
                page_index: page.index,
                block_rect: *anchor,
                master_rect: Rect::new(OUTER_MARGIN, top, mid_x - GUTTER, bottom),
                sample_rect: Rect::new(mid_x + GUTTER, top, page.width - OUTER_MARGIN, bottom),
            }
        })
        .collect()
}

/// Keyed view of the report. A later record with an already-seen key
/// replaces the earlier one; each replaced key is returned as a warning.
pub fn index_report_records(
    records: &[ReportRecord],
) -> (BTreeMap<RecordKey, &ReportRecord>, Vec<String>) {
    let mut lookup = BTreeMap::new();
    let mut warnings = Vec::new();

    for record in records {
        if let Some(previous) = lookup.insert(record.key, record) {
            let message = format!(
                "duplicate report record for {} (page {} replaces page {})",
                record.key,
                record.page_index + 1,
                previous.page_index + 1
            );
            warn!(key = %record.key, "{message}");
            warnings.push(message);
        }
    }

    (lookup, warnings)
}

/// Number of report records per repeat id, duplicates included.
pub fn repeat_counts(records: &[ReportRecord]) -> HashMap<u32, usize> {
    let mut counts = HashMap::new();
    for record in records {
        *counts.entry(record.key.repeat_id).or_insert(0) += 1;
    }
    counts
}
