//! Master-record builder: choice groups on the master document's difference
//! table, numbered in document order.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::error::StructureError;
use crate::layout::{DocumentLayout, FieldWidget, PageLayout};
use crate::model::{ChoiceLabel, MasterRecord, RecordKey, Rect};

pub const SUPPORTED_RECORD_TYPE: &str = "4.1-6";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutProfile {
    pub record_type: &'static str,
    pub table_header: &'static str,
    pub field_token: &'static str,
    pub master_anchor: &'static str,
    pub sample_anchor: &'static str,
    pub choice_anchor: &'static str,
    /// Distance from the left edge of the master anchor to the column edge.
    pub master_anchor_offset: f64,
    /// Column bounds used when any anchor text is missing from a page.
    pub fallback_master_columns: (f64, f64),
    pub fallback_sample_columns: (f64, f64),
    pub row_margin: f64,
}

const DIFFERENCE_TABLE_PROFILE: LayoutProfile = LayoutProfile {
    record_type: SUPPORTED_RECORD_TYPE,
    table_header: "4.1-6 GRA-BAR-BRL-PQ Difference TABLE III",
    field_token: "PassFail18diff",
    master_anchor: "MASTER",
    sample_anchor: "SAMPLE",
    choice_anchor: "PASS/FAIL",
    master_anchor_offset: 65.0,
    fallback_master_columns: (90.0, 290.0),
    fallback_sample_columns: (290.0, 490.0),
    row_margin: 2.0,
};

pub fn profile_for(record_type: &str) -> Result<&'static LayoutProfile, StructureError> {
    if record_type.trim() == DIFFERENCE_TABLE_PROFILE.record_type {
        Ok(&DIFFERENCE_TABLE_PROFILE)
    } else {
        Err(StructureError::UnsupportedRecordType(record_type.to_string()))
    }
}

#[derive(Debug)]
struct RowDraft {
    top: f64,
    bottom: f64,
    sort_number: u64,
    group_name: String,
    choice_indices: BTreeMap<ChoiceLabel, usize>,
}

pub fn build_master_records(
    layout: &DocumentLayout,
    record_type: &str,
) -> Result<Vec<MasterRecord>, StructureError> {
    let profile = profile_for(record_type)?;

    let first_page = layout
        .pages
        .iter()
        .position(|page| page.contains_text(profile.table_header))
        .ok_or_else(|| StructureError::StructureNotFound {
            header: profile.table_header.to_string(),
        })?;

    let mut records = Vec::<MasterRecord>::new();
    let mut ordinal = 0u32;

    for page in &layout.pages[first_page..] {
        let mut drafts = collect_row_drafts(page, profile);
        if drafts.is_empty() {
            continue;
        }

        let (master_columns, sample_columns) = column_bounds(page, profile);
        drafts.sort_by(|a, b| {
            a.top
                .total_cmp(&b.top)
                .then(a.sort_number.cmp(&b.sort_number))
        });

        for draft in drafts {
            ordinal += 1;
            records.push(MasterRecord {
                key: RecordKey::from_ordinal(ordinal),
                page_index: page.index,
                group_name: draft.group_name,
                choice_indices: draft.choice_indices,
                master_rect: Rect::new(master_columns.0, draft.top, master_columns.1, draft.bottom),
                sample_rect: Rect::new(sample_columns.0, draft.top, sample_columns.1, draft.bottom),
            });
        }
    }

    if records.is_empty() {
        return Err(StructureError::NoRecordsFound {
            record_type: profile.record_type.to_string(),
        });
    }

    info!(
        path = %layout.path.display(),
        header_page = first_page,
        records = records.len(),
        "built master records"
    );

    Ok(records)
}

fn collect_row_drafts(page: &PageLayout, profile: &LayoutProfile) -> Vec<RowDraft> {
    let mut groups = Vec::<(String, Vec<&FieldWidget>)>::new();

    for widget in &page.fields {
        if !widget.name.contains(profile.field_token) || !widget.name.contains(profile.record_type)
        {
            continue;
        }
        match groups.iter_mut().find(|(name, _)| *name == widget.name) {
            Some((_, members)) => members.push(widget),
            None => groups.push((widget.name.clone(), vec![widget])),
        }
    }

    groups
        .into_iter()
        .map(|(group_name, members)| {
            let mut choice_indices = BTreeMap::new();
            for widget in &members {
                let Some(export_value) = widget.export_value() else {
                    continue;
                };
                match ChoiceLabel::from_export_value(export_value) {
                    Some(label) => {
                        choice_indices.insert(label, widget.index);
                    }
                    None => debug!(
                        group = %group_name,
                        export_value,
                        "ignoring unrecognized choice state"
                    ),
                }
            }

            let min_y = members
                .iter()
                .map(|widget| widget.rect.y0)
                .fold(f64::INFINITY, f64::min);
            let max_y = members
                .iter()
                .map(|widget| widget.rect.y1)
                .fold(f64::NEG_INFINITY, f64::max);

            RowDraft {
                top: (min_y - profile.row_margin).max(0.0),
                bottom: (max_y + profile.row_margin).min(page.height),
                sort_number: field_sort_number(&group_name, profile.field_token),
                group_name,
                choice_indices,
            }
        })
        .collect()
}

/// Horizontal bounds of the master and sample evidence columns on `page`.
fn column_bounds(page: &PageLayout, profile: &LayoutProfile) -> ((f64, f64), (f64, f64)) {
    let anchors = (
        page.first_match(profile.master_anchor),
        page.first_match(profile.sample_anchor),
        page.first_match(profile.choice_anchor),
    );

    let (Some(master), Some(sample), Some(choice)) = anchors else {
        debug!(
            page = page.index,
            "column anchors missing; using fallback bounds"
        );
        return (
            profile.fallback_master_columns,
            profile.fallback_sample_columns,
        );
    };

    let master_left = (master.x0 - profile.master_anchor_offset).max(0.0);
    let master_right = (master.x1 + sample.x0) / 2.0;
    let sample_right = ((sample.x1 + choice.x0) / 2.0).min(page.width);
    ((master_left, master_right), (master_right, sample_right))
}

/// Numeric suffix following `token` in a field name; names without one sort last.
fn field_sort_number(field_name: &str, token: &str) -> u64 {
    field_name
        .find(token)
        .map(|position| &field_name[position + token.len()..])
        .map(|rest| {
            rest.chars()
                .take_while(|character| character.is_ascii_digit())
                .collect::<String>()
        })
        .and_then(|digits| digits.parse::<u64>().ok())
        .unwrap_or(u64::MAX)
}
