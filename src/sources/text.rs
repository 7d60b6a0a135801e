use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::structure::document::{BoundingBox, SourceDocument, SourcePage, TextSpan};

pub const PLAIN_TEXT_FONT_SIZE: f32 = 10.0;

pub fn load_plain_text(path: &Path) -> Result<SourceDocument> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read text document {}", path.display()))?;
    Ok(parse_plain_text(&text))
}

/// Form feeds separate pages and blank lines separate blocks. Plain text has
/// no typography, so every span is body-sized and regular weight.
pub fn parse_plain_text(text: &str) -> SourceDocument {
    let pages = text
        .split('\u{000c}')
        .enumerate()
        .map(|(page_index, page_text)| SourcePage {
            number: page_index as u32 + 1,
            spans: page_spans(page_text),
            ..SourcePage::default()
        })
        .collect();

    SourceDocument { pages }
}

fn page_spans(page_text: &str) -> Vec<TextSpan> {
    let mut spans = Vec::new();
    let mut block = 0u32;
    let mut line = 0u32;
    let mut block_has_text = false;

    for raw_line in page_text.lines() {
        let trimmed = raw_line.trim_end();
        if trimmed.trim().is_empty() {
            if block_has_text {
                block += 1;
                block_has_text = false;
            }
            continue;
        }

        spans.push(TextSpan {
            text: trimmed.to_string(),
            font_size: PLAIN_TEXT_FONT_SIZE,
            is_bold: false,
            bbox: BoundingBox::default(),
            block,
            line,
        });
        line += 1;
        block_has_text = true;
    }

    spans
}
