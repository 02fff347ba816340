//! Coordinate-anchored view of a PDF: words from the poppler text layer and
//! fillable-field widgets from the object graph. All rectangles use page
//! points with a top-left origin.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;
use tracing::debug;

use crate::model::Rect;

pub mod form_fields;
mod text_layer;
#[cfg(test)]
mod tests;

#[derive(Debug, Clone, PartialEq)]
pub struct Word {
    pub text: String,
    pub rect: Rect,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldWidget {
    /// Position among the widget annotations of its page.
    pub index: usize,
    pub name: String,
    pub rect: Rect,
    /// Names of the normal appearance states, e.g. `["PASS", "Off"]`.
    pub states: Vec<String>,
}

impl FieldWidget {
    /// The first selectable (non-`Off`) appearance state.
    pub fn export_value(&self) -> Option<&str> {
        self.states
            .iter()
            .map(String::as_str)
            .find(|state| *state != "Off")
    }
}

#[derive(Debug, Clone)]
pub struct TextMatch {
    pub rect: Rect,
    pub groups: Vec<Option<String>>,
}

impl TextMatch {
    pub fn group(&self, index: usize) -> Option<&str> {
        self.groups.get(index).and_then(|value| value.as_deref())
    }
}

#[derive(Debug, Clone)]
pub struct PageLayout {
    pub index: usize,
    pub width: f64,
    pub height: f64,
    pub words: Vec<Word>,
    pub fields: Vec<FieldWidget>,
    text: String,
    spans: Vec<(usize, usize)>,
}

impl PageLayout {
    pub fn new(
        index: usize,
        width: f64,
        height: f64,
        words: Vec<Word>,
        fields: Vec<FieldWidget>,
    ) -> Self {
        let mut text = String::new();
        let mut spans = Vec::with_capacity(words.len());
        for word in &words {
            if !text.is_empty() {
                text.push(' ');
            }
            let start = text.len();
            text.push_str(&word.text);
            spans.push((start, text.len()));
        }

        Self {
            index,
            width,
            height,
            words,
            fields,
            text,
            spans,
        }
    }

    /// Page text with words joined by single spaces, in text-layer order.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn contains_text(&self, needle: &str) -> bool {
        let needle = crate::util::normalize_whitespace(needle);
        !needle.is_empty() && self.text.contains(&needle)
    }

    /// Every match of `pattern` over the page text, with the union of the
    /// bounding boxes of the words it touches.
    pub fn find_all(&self, pattern: &Regex) -> Vec<TextMatch> {
        pattern
            .captures_iter(&self.text)
            .filter_map(|captures| {
                let whole = captures.get(0)?;
                let rect = self.rect_for_span(whole.start(), whole.end())?;
                let groups = captures
                    .iter()
                    .map(|group| group.map(|value| value.as_str().to_string()))
                    .collect();
                Some(TextMatch { rect, groups })
            })
            .collect()
    }

    /// Case-insensitive phrase search; whitespace in `needle` matches any
    /// word break.
    pub fn search(&self, needle: &str) -> Vec<Rect> {
        let tokens = needle
            .split_whitespace()
            .map(regex::escape)
            .collect::<Vec<String>>();
        if tokens.is_empty() {
            return Vec::new();
        }

        let pattern = format!("(?i){}", tokens.join(r"\s+"));
        match Regex::new(&pattern) {
            Ok(regex) => self
                .find_all(&regex)
                .into_iter()
                .map(|found| found.rect)
                .collect(),
            Err(error) => {
                debug!(needle, error = %error, "search pattern rejected");
                Vec::new()
            }
        }
    }

    pub fn first_match(&self, needle: &str) -> Option<Rect> {
        self.search(needle).into_iter().next()
    }

    fn rect_for_span(&self, start: usize, end: usize) -> Option<Rect> {
        self.spans
            .iter()
            .zip(&self.words)
            .filter(|((word_start, word_end), _)| *word_start < end && start < *word_end)
            .map(|(_, word)| word.rect)
            .reduce(|acc, rect| acc.union(&rect))
    }
}

#[derive(Debug, Clone)]
pub struct DocumentLayout {
    pub path: PathBuf,
    pub pages: Vec<PageLayout>,
}

impl DocumentLayout {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

/// Reads the text layer with `pdftotext -bbox` and the widgets with `lopdf`,
/// merged page by page.
pub fn extract_layout(pdf_path: &Path) -> Result<DocumentLayout> {
    let text_pages = text_layer::extract_text_layer(pdf_path)?;
    let document = lopdf::Document::load(pdf_path)
        .with_context(|| format!("failed to load PDF object graph: {}", pdf_path.display()))?;
    let page_ids = document.get_pages();

    let page_count = text_pages.len().max(page_ids.len());
    let mut pages = Vec::with_capacity(page_count);

    for index in 0..page_count {
        let page_id = page_ids.get(&((index + 1) as u32)).copied();
        let media_box = page_id.and_then(|id| form_fields::page_media_box(&document, id));

        let (width, height, words) = match text_pages.get(index) {
            Some(text_page) => (text_page.width, text_page.height, text_page.words.clone()),
            None => {
                let (width, height) = media_box
                    .map(|media| (media.width(), media.height()))
                    .unwrap_or((0.0, 0.0));
                (width, height, Vec::new())
            }
        };

        let fields = match page_id {
            Some(id) => form_fields::page_fields(&document, id),
            None => Vec::new(),
        };

        pages.push(PageLayout::new(index, width, height, words, fields));
    }

    debug!(
        path = %pdf_path.display(),
        pages = pages.len(),
        widgets = pages.iter().map(|page| page.fields.len()).sum::<usize>(),
        "extracted document layout"
    );

    Ok(DocumentLayout {
        path: pdf_path.to_path_buf(),
        pages,
    })
}
