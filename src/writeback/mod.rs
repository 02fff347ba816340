//! Applies final decisions to the master document's choice fields and writes
//! the audit tables.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::{Context, Result};
use lopdf::{Document, Object, ObjectId};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::layout::form_fields::{appearance_states, field_object_id, full_field_name, page_widgets};
use crate::model::{ChoiceLabel, MasterRecord, RecordKey};
use crate::util::ensure_parent_directory;

pub mod audit;

pub use audit::{write_audit_log, write_exceptions};

const OFF_STATE: &str = "Off";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedWrite {
    pub key: RecordKey,
    pub label: ChoiceLabel,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WritebackSummary {
    pub fields_written: usize,
    pub skipped: Vec<SkippedWrite>,
}

/// One widget of a choice group, captured before the document is mutated.
struct GroupWidget {
    widget_id: Option<ObjectId>,
    field_id: Option<ObjectId>,
    states: Vec<String>,
}

/// Loads `master_in`, selects `label` on the choice group of every decided
/// key, and saves the result to `master_out`. The input file is not touched.
pub fn apply_choice_values(
    master_in: &Path,
    master_out: &Path,
    records: &[MasterRecord],
    decisions: &BTreeMap<RecordKey, ChoiceLabel>,
) -> Result<WritebackSummary> {
    let mut document = Document::load(master_in)
        .with_context(|| format!("failed to load master document: {}", master_in.display()))?;

    let summary = set_choice_values(&mut document, records, decisions);

    ensure_parent_directory(master_out)?;
    document
        .save(master_out)
        .with_context(|| format!("failed to save reconciled master: {}", master_out.display()))?;

    info!(
        path = %master_out.display(),
        fields_written = summary.fields_written,
        skipped = summary.skipped.len(),
        "wrote reconciled master document"
    );

    Ok(summary)
}

/// In-memory part of [`apply_choice_values`].
pub fn set_choice_values(
    document: &mut Document,
    records: &[MasterRecord],
    decisions: &BTreeMap<RecordKey, ChoiceLabel>,
) -> WritebackSummary {
    let record_lookup = records
        .iter()
        .map(|record| (record.key, record))
        .collect::<HashMap<RecordKey, &MasterRecord>>();
    let page_ids = document.get_pages();
    let mut summary = WritebackSummary::default();

    for (key, label) in decisions {
        let mut skip = |reason: String| {
            debug!(key = %key, label = label.as_str(), reason = %reason, "choice not written");
            summary.skipped.push(SkippedWrite {
                key: *key,
                label: *label,
                reason,
            });
        };

        let Some(record) = record_lookup.get(key) else {
            skip("no master record for key".to_string());
            continue;
        };
        if !record.choice_indices.contains_key(label) {
            skip(format!("{} is not offered by {}", label.as_str(), record.group_name));
            continue;
        }
        let Some(page_id) = page_ids.get(&((record.page_index + 1) as u32)).copied() else {
            skip(format!("master page {} not found", record.page_index + 1));
            continue;
        };

        let widgets = group_widgets(document, page_id, &record.group_name);
        let Some(state) = widgets
            .iter()
            .flat_map(|widget| widget.states.iter())
            .find(|state| ChoiceLabel::from_export_value(state) == Some(*label))
            .cloned()
        else {
            skip(format!(
                "{} has no {} appearance state",
                record.group_name,
                label.as_str()
            ));
            continue;
        };

        if select_state(document, &widgets, &state) {
            summary.fields_written += 1;
        } else {
            skip(format!("{} has no writable field dictionary", record.group_name));
        }
    }

    if !summary.skipped.is_empty() {
        warn!(
            skipped = summary.skipped.len(),
            "some decisions could not be written back"
        );
    }

    summary
}

fn group_widgets(document: &Document, page_id: ObjectId, group_name: &str) -> Vec<GroupWidget> {
    page_widgets(document, page_id)
        .into_iter()
        .filter(|widget| full_field_name(document, widget.dict) == group_name)
        .map(|widget| GroupWidget {
            widget_id: widget.id,
            field_id: field_object_id(&widget),
            states: appearance_states(document, widget.dict),
        })
        .collect()
}

/// Sets `/V` on the field and `/AS` on each widget: `state` where the widget
/// offers it, `Off` elsewhere. Returns whether any field value was set.
fn select_state(document: &mut Document, widgets: &[GroupWidget], state: &str) -> bool {
    let mut field_ids = widgets
        .iter()
        .filter_map(|widget| widget.field_id)
        .collect::<Vec<ObjectId>>();
    field_ids.sort();
    field_ids.dedup();

    let mut written = false;
    for field_id in field_ids {
        if let Ok(field) = document.get_dictionary_mut(field_id) {
            field.set("V", Object::Name(state.as_bytes().to_vec()));
            written = true;
        }
    }

    for widget in widgets {
        let Some(widget_id) = widget.widget_id else {
            continue;
        };
        let appearance = if widget.states.iter().any(|offered| offered == state) {
            state
        } else {
            OFF_STATE
        };
        if let Ok(dict) = document.get_dictionary_mut(widget_id) {
            dict.set("AS", Object::Name(appearance.as_bytes().to_vec()));
        }
    }

    written
}
