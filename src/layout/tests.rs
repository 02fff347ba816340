use regex::Regex;

use super::text_layer::parse_bbox_document;
use super::*;
use crate::test_support::{WidgetSpec, form_document, line, page};

const BBOX_SAMPLE: &str = r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.0 Transitional//EN">
<html xmlns="http://www.w3.org/1999/xhtml">
<body>
<doc>
  <page width="612.000000" height="792.000000">
    <word xMin="56.800000" yMin="57.208000" xMax="89.440000" yMax="69.160000">Repeat</word>
    <word xMin="92.200000" yMin="57.208000" xMax="102.000000" yMax="69.160000">ID</word>
    <word xMin="105.000000" yMin="57.208000" xMax="111.000000" yMax="69.160000">2</word>
    <word xMin="56.800000" yMin="90.000000" xMax="80.000000" yMax="100.000000">R&amp;D</word>
  </page>
  <page width="595.000000" height="842.000000">
    <word xMin="10.000000" yMin="20.000000" xMax="40.000000" yMax="30.000000">Second</word>
  </page>
</doc>
</body>
</html>
"#;

#[test]
fn parse_bbox_document_reads_pages_and_words() {
    let pages = parse_bbox_document(BBOX_SAMPLE).expect("bbox output should parse");

    assert_eq!(pages.len(), 2);
    assert_eq!(pages[0].width, 612.0);
    assert_eq!(pages[0].height, 792.0);
    assert_eq!(pages[0].words.len(), 4);
    assert_eq!(pages[0].words[3].text, "R&D");
    assert_eq!(pages[1].words[0].text, "Second");
    assert_eq!(pages[1].height, 842.0);
}

#[test]
fn page_text_joins_words_with_single_spaces() {
    let layout = page(0, vec![line("Repeat ID 3", 10.0, 10.0)], Vec::new());
    assert_eq!(layout.text(), "Repeat ID 3");
    assert!(layout.contains_text("Repeat   ID 3"));
    assert!(!layout.contains_text("Repeat ID 4"));
}

#[test]
fn search_unions_word_boxes_across_a_phrase() {
    let layout = page(
        0,
        vec![
            line("Difference ID: 4", 50.0, 100.0),
            line("MASTER", 200.0, 300.0),
        ],
        Vec::new(),
    );

    let rect = layout
        .first_match("difference id: 4")
        .expect("phrase should match");
    assert_eq!(rect.x0, 50.0);
    assert_eq!(rect.y0, 100.0);
    assert!(rect.x1 > 100.0);

    let master = layout.first_match("MASTER").expect("anchor should match");
    assert_eq!(master.x0, 200.0);
    assert!(layout.first_match("SAMPLE").is_none());
}

#[test]
fn find_all_returns_captures_in_text_order() {
    let layout = page(
        0,
        vec![
            line("Difference ID: 2", 20.0, 300.0),
            line("Difference ID:7", 20.0, 100.0),
        ],
        Vec::new(),
    );
    let pattern = Regex::new(r"Difference ID:\s*(\d+)").expect("regex");

    let matches = layout.find_all(&pattern);
    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0].group(1), Some("2"));
    assert_eq!(matches[0].rect.y0, 300.0);
    assert_eq!(matches[1].group(1), Some("7"));
    assert_eq!(matches[1].rect.y0, 100.0);
}

#[test]
fn field_widget_export_value_skips_off_state() {
    let widget = FieldWidget {
        index: 0,
        name: "group".to_string(),
        rect: Rect::default(),
        states: vec!["Off".to_string(), "FAIL".to_string()],
    };
    assert_eq!(widget.export_value(), Some("FAIL"));

    let unchecked = FieldWidget {
        states: vec!["Off".to_string()],
        ..widget
    };
    assert_eq!(unchecked.export_value(), None);
}

#[test]
fn page_fields_reads_widgets_in_top_left_coordinates() {
    let document = form_document(&[vec![
        WidgetSpec {
            field_name: "PassFail18diff1 4.1-6",
            rect: [500, 692, 510, 702],
            state: "PASS",
        },
        WidgetSpec {
            field_name: "PassFail18diff1 4.1-6",
            rect: [520, 692, 530, 702],
            state: "FAIL",
        },
    ]]);
    let page_id = *document.get_pages().get(&1).expect("first page");

    let fields = form_fields::page_fields(&document, page_id);
    assert_eq!(fields.len(), 2);
    assert_eq!(fields[0].index, 0);
    assert_eq!(fields[0].name, "PassFail18diff1 4.1-6");
    assert_eq!(fields[0].rect, Rect::new(500.0, 90.0, 510.0, 100.0));
    assert_eq!(fields[0].export_value(), Some("PASS"));
    assert_eq!(fields[1].export_value(), Some("FAIL"));
}

#[test]
fn page_media_box_is_read_from_page_dictionary() {
    let document = form_document(&[Vec::new()]);
    let page_id = *document.get_pages().get(&1).expect("first page");

    let media_box = form_fields::page_media_box(&document, page_id).expect("media box");
    assert_eq!(media_box.width(), 612.0);
    assert_eq!(media_box.height(), 792.0);
    assert!(form_fields::page_fields(&document, page_id).is_empty());
}
