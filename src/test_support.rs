use std::collections::HashMap;

use lopdf::{Dictionary, Document, Object, ObjectId, Stream, dictionary};

use crate::layout::{FieldWidget, PageLayout, Word};
use crate::model::Rect;

pub const PAGE_WIDTH: f64 = 612.0;
pub const PAGE_HEIGHT: f64 = 792.0;
const CHAR_WIDTH: f64 = 6.0;
const LINE_HEIGHT: f64 = 10.0;

/// Lays out `text` as words on one line starting at `(x, y)`.
pub fn line(text: &str, x: f64, y: f64) -> Vec<Word> {
    let mut cursor = x;
    text.split_whitespace()
        .map(|token| {
            let width = token.chars().count() as f64 * CHAR_WIDTH;
            let word = Word {
                text: token.to_string(),
                rect: Rect::new(cursor, y, cursor + width, y + LINE_HEIGHT),
            };
            cursor += width + CHAR_WIDTH;
            word
        })
        .collect()
}

pub fn page(index: usize, lines: Vec<Vec<Word>>, fields: Vec<FieldWidget>) -> PageLayout {
    PageLayout::new(
        index,
        PAGE_WIDTH,
        PAGE_HEIGHT,
        lines.into_iter().flatten().collect(),
        fields,
    )
}

pub fn widget(index: usize, name: &str, rect: Rect, export_value: &str) -> FieldWidget {
    FieldWidget {
        index,
        name: name.to_string(),
        rect,
        states: vec![export_value.to_string(), "Off".to_string()],
    }
}

/// One radio button of a choice group, in native PDF coordinates.
pub struct WidgetSpec {
    pub field_name: &'static str,
    pub rect: [i64; 4],
    pub state: &'static str,
}

/// An in-memory PDF with one radio field per distinct `field_name` on each
/// page; widgets are kids of their field.
pub fn form_document(pages: &[Vec<WidgetSpec>]) -> Document {
    let mut document = Document::with_version("1.5");
    let pages_id = document.new_object_id();
    let mut page_refs = Vec::<Object>::new();
    let mut field_refs = Vec::<Object>::new();

    for widgets in pages {
        let page_id = document.new_object_id();
        let mut annotations = Vec::<Object>::new();
        let mut fields: Vec<(String, ObjectId, Vec<Object>)> = Vec::new();
        let mut positions = HashMap::<String, usize>::new();

        for spec in widgets {
            let position = *positions
                .entry(spec.field_name.to_string())
                .or_insert_with(|| {
                    fields.push((
                        spec.field_name.to_string(),
                        document.new_object_id(),
                        Vec::new(),
                    ));
                    fields.len() - 1
                });
            let parent_id = fields[position].1;

            let on_stream = document.add_object(Stream::new(Dictionary::new(), Vec::new()));
            let off_stream = document.add_object(Stream::new(Dictionary::new(), Vec::new()));
            let mut normal = Dictionary::new();
            normal.set(spec.state, on_stream);
            normal.set("Off", off_stream);

            let rect = spec.rect.map(Object::Integer).to_vec();
            let widget_id = document.add_object(dictionary! {
                "Type" => "Annot",
                "Subtype" => "Widget",
                "Rect" => rect,
                "Parent" => parent_id,
                "AP" => dictionary! { "N" => normal },
                "AS" => "Off",
            });
            annotations.push(widget_id.into());
            fields[position].2.push(widget_id.into());
        }

        for (name, field_id, kids) in fields {
            document.objects.insert(
                field_id,
                Object::Dictionary(dictionary! {
                    "FT" => "Btn",
                    "Ff" => Object::Integer(49152),
                    "T" => Object::string_literal(name),
                    "Kids" => kids,
                }),
            );
            field_refs.push(field_id.into());
        }

        document.objects.insert(
            page_id,
            Object::Dictionary(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(612),
                    Object::Integer(792),
                ],
                "Annots" => annotations,
            }),
        );
        page_refs.push(page_id.into());
    }

    let page_count = page_refs.len() as i64;
    document.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => page_refs,
            "Count" => Object::Integer(page_count),
        }),
    );
    let catalog_id = document.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
        "AcroForm" => dictionary! { "Fields" => field_refs },
    });
    document.trailer.set("Root", catalog_id);

    document
}
