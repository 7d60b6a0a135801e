use serde::Serialize;

use super::document::{BoundingBox, SourceDocument, SourcePage};
use super::headers::{HeaderClassifier, HeaderLevel};

#[derive(Debug, Clone, Serialize)]
pub struct TextBlock {
    pub text: String,
    pub page: u32,
    pub font_size: f32,
    pub is_bold: bool,
    pub bbox: BoundingBox,
    pub header_level: Option<HeaderLevel>,
}

impl TextBlock {
    pub fn body(text: &str, page: u32, font_size: f32, is_bold: bool) -> Self {
        Self {
            text: text.to_string(),
            page,
            font_size,
            is_bold,
            bbox: BoundingBox::default(),
            header_level: None,
        }
    }
}

/// Flattens the document into blocks in reading order. A block's font size
/// is the largest span size inside it, and it is bold if any span is.
pub fn extract_text_blocks(document: &SourceDocument) -> Vec<TextBlock> {
    document.pages.iter().flat_map(page_blocks).collect()
}

pub fn classify_blocks(blocks: &mut [TextBlock], classifier: &HeaderClassifier<'_>) {
    for block in blocks {
        block.header_level = classifier.classify(&block.text, block.font_size, block.is_bold);
    }
}

fn page_blocks(page: &SourcePage) -> Vec<TextBlock> {
    struct PendingBlock {
        id: u32,
        current_line: Option<u32>,
        lines: Vec<String>,
        font_size: f32,
        is_bold: bool,
        bbox: Option<BoundingBox>,
    }

    fn finish(pending: PendingBlock, page: u32, out: &mut Vec<TextBlock>) {
        let text = pending.lines.join("\n").trim().to_string();
        if text.is_empty() {
            return;
        }

        out.push(TextBlock {
            text,
            page,
            font_size: pending.font_size,
            is_bold: pending.is_bold,
            bbox: pending.bbox.unwrap_or_default(),
            header_level: None,
        });
    }

    let mut blocks = Vec::new();
    let mut pending: Option<PendingBlock> = None;

    for span in &page.spans {
        let starts_new_block = pending
            .as_ref()
            .map(|block| block.id != span.block)
            .unwrap_or(true);
        if starts_new_block {
            if let Some(block) = pending.take() {
                finish(block, page.number, &mut blocks);
            }
            pending = Some(PendingBlock {
                id: span.block,
                current_line: None,
                lines: Vec::new(),
                font_size: 0.0,
                is_bold: false,
                bbox: None,
            });
        }

        let Some(block) = pending.as_mut() else {
            continue;
        };

        if block.current_line != Some(span.line) {
            block.lines.push(String::new());
            block.current_line = Some(span.line);
        }
        if let Some(line) = block.lines.last_mut() {
            line.push_str(&span.text);
        }

        block.font_size = block.font_size.max(span.font_size);
        block.is_bold |= span.is_bold;
        block.bbox = Some(match block.bbox {
            Some(bbox) => bbox.union(&span.bbox),
            None => span.bbox,
        });
    }

    if let Some(block) = pending.take() {
        finish(block, page.number, &mut blocks);
    }

    blocks
}
