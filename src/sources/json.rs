use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::structure::document::SourceDocument;

/// Loads a page document written by an external parser. Pages must be
/// numbered from 1 and listed in ascending order.
pub fn load_page_json(path: &Path) -> Result<SourceDocument> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read page document {}", path.display()))?;
    let document = serde_json::from_str::<SourceDocument>(&raw)
        .with_context(|| format!("failed to parse page document {}", path.display()))?;
    validate_page_order(&document)
        .with_context(|| format!("invalid page document {}", path.display()))?;
    Ok(document)
}

pub fn validate_page_order(document: &SourceDocument) -> Result<()> {
    let mut previous = 0u32;
    for page in &document.pages {
        if page.number == 0 {
            bail!("page numbers are 1-based; found page 0");
        }
        if page.number <= previous {
            bail!(
                "page {} appears after page {}; pages must be in ascending order",
                page.number,
                previous
            );
        }
        previous = page.number;
    }
    Ok(())
}
