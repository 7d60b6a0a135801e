use serde::{Deserialize, Serialize};

/// Page-structured document handed over by a PDF parsing backend.
///
/// Reading order is `pages`, then `block`, `line` and span position within
/// each page; every stage downstream relies on that order being stable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceDocument {
    pub pages: Vec<SourcePage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourcePage {
    /// 1-based page number.
    pub number: u32,
    #[serde(default)]
    pub width: f32,
    #[serde(default)]
    pub height: f32,
    #[serde(default)]
    pub spans: Vec<TextSpan>,
    #[serde(default)]
    pub images: Vec<EmbeddedImage>,
    /// Tables already detected by the upstream parser, if it does that.
    #[serde(default)]
    pub tables: Vec<DetectedTable>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextSpan {
    pub text: String,
    pub font_size: f32,
    #[serde(default)]
    pub is_bold: bool,
    #[serde(default)]
    pub bbox: BoundingBox,
    pub block: u32,
    pub line: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BoundingBox {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn height(&self) -> f32 {
        (self.y1 - self.y0).max(0.0)
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddedImage {
    /// Position of the image within its page.
    pub index: usize,
    pub mime_type: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// Raw table as reported by a table-detection collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectedTable {
    pub headers: Vec<Option<String>>,
    pub rows: Vec<Vec<Option<String>>>,
    #[serde(default)]
    pub bbox: Option<BoundingBox>,
}

impl SourceDocument {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn truncate_pages(&mut self, max_pages: usize) {
        self.pages.truncate(max_pages);
    }

    pub fn image_count(&self) -> usize {
        self.pages.iter().map(|page| page.images.len()).sum()
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.trim())
            .map_err(serde::de::Error::custom)
    }
}
