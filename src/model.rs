use serde::{Deserialize, Serialize};

use crate::sources::SourceFormat;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEntry {
    pub doc_id: String,
    pub filename: String,
    pub format: SourceFormat,
    pub size_bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceInventoryManifest {
    pub manifest_version: u32,
    pub generated_at: String,
    pub source_directory: String,
    pub document_count: usize,
    pub documents: Vec<SourceEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolVersions {
    pub pdftohtml: Option<String>,
    pub pdfimages: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestPaths {
    pub cache_root: String,
    pub source_dir: String,
    pub manifest_dir: String,
    pub inventory_manifest_path: String,
    pub processed_dir: String,
    pub db_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSettings {
    pub chunk_size: usize,
    pub max_chunk_size: usize,
    pub context_markers: bool,
    pub table_detection: String,
    pub vision_mode: String,
    pub vision_enabled: bool,
    pub vision_model: Option<String>,
    pub vision_concurrency: usize,
    pub vision_timeout_secs: u64,
    pub extract_entities: bool,
    pub max_pages_per_doc: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestCounts {
    pub document_count: usize,
    pub selected_document_count: usize,
    pub processed_document_count: usize,
    pub failed_document_count: usize,
    pub pages_total: usize,
    pub sections_total: usize,
    pub orphan_sections_total: usize,
    pub chunks_written: usize,
    pub table_chunks: usize,
    pub algorithm_chunks: usize,
    pub recommendation_chunks: usize,
    pub table_failed_pages: usize,
    pub images_considered: usize,
    pub images_skipped_small: usize,
    pub vision_failures: usize,
    pub vision_timeouts: usize,
    pub docs_total: i64,
    pub chunks_total: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentOutputs {
    pub markdown_path: String,
    pub chunks_path: String,
    pub structure_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentResult {
    pub doc_id: String,
    pub filename: String,
    pub status: String,
    pub pages: usize,
    pub headers_detected: usize,
    pub sections: usize,
    pub chunks: usize,
    pub tables: usize,
    pub algorithms: usize,
    pub recommendations: usize,
    pub outputs: Option<DocumentOutputs>,
    pub error: Option<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub db_schema_version: String,
    pub status: String,
    pub started_at: String,
    pub updated_at: String,
    pub command: String,
    pub tool_versions: ToolVersions,
    pub paths: IngestPaths,
    pub settings: IngestSettings,
    pub counts: IngestCounts,
    pub documents: Vec<DocumentResult>,
    pub source_hashes: Vec<SourceEntry>,
    pub warnings: Vec<String>,
}
