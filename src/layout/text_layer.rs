use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result, bail};
use regex::Regex;

use super::Word;
use crate::model::Rect;

#[derive(Debug, Clone, Default)]
pub(super) struct TextPage {
    pub width: f64,
    pub height: f64,
    pub words: Vec<Word>,
}

pub(super) fn extract_text_layer(pdf_path: &Path) -> Result<Vec<TextPage>> {
    let output = Command::new("pdftotext")
        .arg("-bbox")
        .arg("-enc")
        .arg("UTF-8")
        .arg(pdf_path)
        .arg("-")
        .output()
        .with_context(|| format!("failed to execute pdftotext for {}", pdf_path.display()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "pdftotext returned non-zero exit status for {}: {}",
            pdf_path.display(),
            stderr.trim()
        );
    }

    let raw = String::from_utf8_lossy(&output.stdout);
    parse_bbox_document(&raw)
}

/// Parses the XHTML emitted by `pdftotext -bbox` into pages of words.
pub(super) fn parse_bbox_document(raw: &str) -> Result<Vec<TextPage>> {
    let page_regex = Regex::new(r#"<page\s+width="([-0-9.]+)"\s+height="([-0-9.]+)"\s*>"#)
        .context("failed to compile page regex")?;
    let word_regex = Regex::new(
        r#"<word\s+xMin="([-0-9.]+)"\s+yMin="([-0-9.]+)"\s+xMax="([-0-9.]+)"\s+yMax="([-0-9.]+)"\s*>(.*?)</word>"#,
    )
    .context("failed to compile word regex")?;

    let mut pages = Vec::<TextPage>::new();

    for line in raw.lines() {
        if let Some(captures) = page_regex.captures(line) {
            pages.push(TextPage {
                width: parse_coordinate(captures.get(1).map(|value| value.as_str()))?,
                height: parse_coordinate(captures.get(2).map(|value| value.as_str()))?,
                words: Vec::new(),
            });
            continue;
        }

        let Some(captures) = word_regex.captures(line) else {
            continue;
        };
        let Some(page) = pages.last_mut() else {
            continue;
        };

        let text = decode_entities(captures.get(5).map(|value| value.as_str()).unwrap_or(""));
        if text.trim().is_empty() {
            continue;
        }

        page.words.push(Word {
            text: text.trim().to_string(),
            rect: Rect::new(
                parse_coordinate(captures.get(1).map(|value| value.as_str()))?,
                parse_coordinate(captures.get(2).map(|value| value.as_str()))?,
                parse_coordinate(captures.get(3).map(|value| value.as_str()))?,
                parse_coordinate(captures.get(4).map(|value| value.as_str()))?,
            ),
        });
    }

    Ok(pages)
}

fn parse_coordinate(raw: Option<&str>) -> Result<f64> {
    let raw = raw.context("missing coordinate capture")?;
    raw.parse::<f64>()
        .with_context(|| format!("invalid coordinate in text layer: {raw}"))
}

fn decode_entities(raw: &str) -> String {
    raw.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace('\u{00a0}', " ")
        .replace("&amp;", "&")
}
