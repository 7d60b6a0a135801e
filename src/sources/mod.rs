pub mod json;
pub mod pdf;
pub mod text;


use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::structure::document::SourceDocument;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    Pdf,
    PageJson,
    PlainText,
}

impl SourceFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "pdf" => Some(SourceFormat::Pdf),
            "json" => Some(SourceFormat::PageJson),
            "txt" | "md" => Some(SourceFormat::PlainText),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SourceFormat::Pdf => "pdf",
            SourceFormat::PageJson => "page_json",
            SourceFormat::PlainText => "plain_text",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LoadOptions<'a> {
    /// Scratch directory for extracted images; removed after loading.
    pub work_dir: &'a Path,
    pub max_pages: Option<usize>,
}

#[derive(Debug)]
pub struct LoadedDocument {
    pub document: SourceDocument,
    pub warnings: Vec<String>,
}

/// Reads one source file into the page model. Any error here is fatal for
/// that document.
pub fn load_document(
    path: &Path,
    format: SourceFormat,
    options: LoadOptions<'_>,
) -> Result<LoadedDocument> {
    let mut loaded = match format {
        SourceFormat::Pdf => pdf::load_pdf(path, options)?,
        SourceFormat::PageJson => LoadedDocument {
            document: json::load_page_json(path)?,
            warnings: Vec::new(),
        },
        SourceFormat::PlainText => LoadedDocument {
            document: text::load_plain_text(path)?,
            warnings: Vec::new(),
        },
    };

    if let Some(max_pages) = options.max_pages {
        loaded.document.truncate_pages(max_pages);
    }

    info!(
        path = %path.display(),
        format = format.as_str(),
        pages = loaded.document.page_count(),
        images = loaded.document.image_count(),
        "loaded source document"
    );
    Ok(loaded)
}
