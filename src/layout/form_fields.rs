//! Widget annotations read straight from the PDF object graph.

use lopdf::{Dictionary, Document, Object, ObjectId};

use super::FieldWidget;
use crate::model::Rect;

const MAX_PARENT_DEPTH: usize = 32;

/// A widget annotation on one page. `id` is `None` for annotations stored
/// inline in the page's `/Annots` array.
pub(crate) struct WidgetEntry<'a> {
    pub id: Option<ObjectId>,
    pub dict: &'a Dictionary,
}

pub fn page_fields(document: &Document, page_id: ObjectId) -> Vec<FieldWidget> {
    let Some(media_box) = page_media_box(document, page_id) else {
        return Vec::new();
    };

    page_widgets(document, page_id)
        .into_iter()
        .enumerate()
        .filter_map(|(index, widget)| {
            let pdf_rect = widget
                .dict
                .get(b"Rect")
                .ok()
                .and_then(|value| rect_from_object(document, value))?;
            Some(FieldWidget {
                index,
                name: full_field_name(document, widget.dict),
                rect: to_top_left(&pdf_rect, &media_box),
                states: appearance_states(document, widget.dict),
            })
        })
        .collect()
}

pub(crate) fn page_widgets(document: &Document, page_id: ObjectId) -> Vec<WidgetEntry<'_>> {
    let Ok(page) = document.get_dictionary(page_id) else {
        return Vec::new();
    };
    let Some(Object::Array(annotations)) = page
        .get(b"Annots")
        .ok()
        .and_then(|value| resolve(document, value))
    else {
        return Vec::new();
    };

    annotations
        .iter()
        .filter_map(|annotation| {
            let (id, dict) = match annotation {
                Object::Reference(id) => (Some(*id), document.get_dictionary(*id).ok()?),
                Object::Dictionary(dict) => (None, dict),
                _ => return None,
            };
            let is_widget = dict
                .get(b"Subtype")
                .ok()
                .and_then(|value| name_string(value))
                .is_some_and(|subtype| subtype == "Widget");
            is_widget.then_some(WidgetEntry { id, dict })
        })
        .collect()
}

/// Fully qualified field name: partial `/T` names joined with `.` from the
/// root field down to the widget.
pub(crate) fn full_field_name(document: &Document, widget: &Dictionary) -> String {
    let mut parts = Vec::<String>::new();
    let mut current = Some(widget);

    for _ in 0..MAX_PARENT_DEPTH {
        let Some(dict) = current else {
            break;
        };
        if let Ok(Object::String(bytes, _)) = dict.get(b"T") {
            parts.push(decode_text_string(bytes));
        }
        current = dict
            .get(b"Parent")
            .ok()
            .and_then(|value| resolve(document, value))
            .and_then(|value| match value {
                Object::Dictionary(parent) => Some(parent),
                _ => None,
            });
    }

    parts.reverse();
    parts.join(".")
}

/// Keys of the widget's normal appearance dictionary (`/AP /N`).
pub(crate) fn appearance_states(document: &Document, widget: &Dictionary) -> Vec<String> {
    let normal = widget
        .get(b"AP")
        .ok()
        .and_then(|value| resolve(document, value))
        .and_then(|value| match value {
            Object::Dictionary(appearance) => appearance.get(b"N").ok(),
            _ => None,
        })
        .and_then(|value| resolve(document, value));

    match normal {
        Some(Object::Dictionary(states)) => states
            .iter()
            .map(|(key, _)| String::from_utf8_lossy(key).into_owned())
            .collect(),
        _ => Vec::new(),
    }
}

/// The dictionary that carries the field value: the widget itself when it
/// is a terminal field, otherwise its `/Parent`.
pub(crate) fn field_object_id(widget: &WidgetEntry<'_>) -> Option<ObjectId> {
    if widget.dict.has(b"T") {
        return widget.id;
    }
    match widget.dict.get(b"Parent") {
        Ok(Object::Reference(id)) => Some(*id),
        _ => widget.id,
    }
}

/// Media box in native PDF coordinates (bottom-left origin), following the
/// inherited `/Parent` chain.
pub fn page_media_box(document: &Document, page_id: ObjectId) -> Option<Rect> {
    let mut current = document.get_dictionary(page_id).ok();

    for _ in 0..MAX_PARENT_DEPTH {
        let dict = current?;
        if let Some(rect) = dict
            .get(b"MediaBox")
            .ok()
            .and_then(|value| rect_from_object(document, value))
        {
            return Some(rect);
        }
        current = match dict.get(b"Parent") {
            Ok(Object::Reference(id)) => document.get_dictionary(*id).ok(),
            _ => None,
        };
    }

    None
}

fn to_top_left(pdf_rect: &Rect, media_box: &Rect) -> Rect {
    Rect::new(
        pdf_rect.x0 - media_box.x0,
        media_box.y1 - pdf_rect.y1,
        pdf_rect.x1 - media_box.x0,
        media_box.y1 - pdf_rect.y0,
    )
}

fn rect_from_object(document: &Document, value: &Object) -> Option<Rect> {
    let Object::Array(items) = resolve(document, value)? else {
        return None;
    };
    if items.len() != 4 {
        return None;
    }
    let numbers = items
        .iter()
        .map(|item| resolve(document, item).and_then(number))
        .collect::<Option<Vec<f64>>>()?;

    Some(Rect::new(
        numbers[0].min(numbers[2]),
        numbers[1].min(numbers[3]),
        numbers[0].max(numbers[2]),
        numbers[1].max(numbers[3]),
    ))
}

pub(crate) fn resolve<'a>(document: &'a Document, value: &'a Object) -> Option<&'a Object> {
    match value {
        Object::Reference(id) => document.get_object(*id).ok(),
        other => Some(other),
    }
}

fn number(value: &Object) -> Option<f64> {
    match value {
        Object::Integer(value) => Some(*value as f64),
        Object::Real(value) => Some(*value as f64),
        _ => None,
    }
}

fn name_string(value: &Object) -> Option<String> {
    match value {
        Object::Name(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        _ => None,
    }
}

fn decode_text_string(bytes: &[u8]) -> String {
    if let Some(utf16) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units = utf16
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect::<Vec<u16>>();
        return String::from_utf16_lossy(&units);
    }

    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&byte| byte as char).collect(),
    }
}
