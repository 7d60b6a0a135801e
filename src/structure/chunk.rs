use serde::Serialize;
use serde_json::{Map, Value};

use super::entities::EntityMap;
use super::tagging::{Category, ChunkTags, EvidenceLevel, Grade};
use crate::util::char_len;

#[derive(Debug, Clone, Serialize)]
pub struct Chunk {
    pub content: String,
    pub index: usize,
    pub section_hierarchy: Vec<String>,
    pub parent_section: Option<String>,
    pub is_recommendation: bool,
    pub evidence_level: Option<EvidenceLevel>,
    pub grade: Option<Grade>,
    pub target_population: String,
    pub category: Option<Category>,
    pub is_table: bool,
    pub is_algorithm: bool,
    pub table_data: Option<Vec<Map<String, Value>>>,
    pub algorithm_description: Option<String>,
    pub page_numbers: Vec<u32>,
    pub token_count: usize,
    #[serde(skip_serializing_if = "EntityMap::is_empty")]
    pub entities: EntityMap,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChunkMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_level: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_headers: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub algorithm_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_size: Option<usize>,
    pub entities_mentioned: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<usize>,
}

/// What a chunk carries besides text. A chunk is a table, an algorithm, or
/// plain section text, never more than one.
#[derive(Debug, Clone)]
pub enum ChunkPayload {
    Text,
    Table(Vec<Map<String, Value>>),
    Algorithm(String),
}

/// Approximate token count used for budgeting downstream embeddings.
pub fn estimate_tokens(content: &str) -> usize {
    char_len(content) / 4
}

impl Chunk {
    pub fn new(
        content: String,
        section_hierarchy: Vec<String>,
        payload: ChunkPayload,
        tags: ChunkTags,
        page_numbers: Vec<u32>,
        mut metadata: ChunkMetadata,
    ) -> Self {
        let parent_section = section_hierarchy
            .len()
            .checked_sub(2)
            .and_then(|index| section_hierarchy.get(index))
            .cloned();
        let (is_table, table_data, is_algorithm, algorithm_description) = match payload {
            ChunkPayload::Text => (false, None, false, None),
            ChunkPayload::Table(rows) => (true, Some(rows), false, None),
            ChunkPayload::Algorithm(description) => (false, None, true, Some(description)),
        };
        metadata.entities_mentioned = tags.entities_mentioned;

        Self {
            token_count: estimate_tokens(&content),
            content,
            index: 0,
            section_hierarchy,
            parent_section,
            is_recommendation: tags.is_recommendation,
            evidence_level: tags.evidence_level,
            grade: tags.grade,
            target_population: tags.target_population,
            category: tags.category,
            is_table,
            is_algorithm,
            table_data,
            algorithm_description,
            page_numbers,
            entities: EntityMap::new(),
            metadata,
        }
    }
}
