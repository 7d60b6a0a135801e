pub mod blocks;
pub mod chunk;
pub mod chunking;
pub mod document;
pub mod entities;
pub mod font_profile;
pub mod headers;
pub mod hierarchy;
pub mod tables;
pub mod tagging;
pub mod vision;

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;

use anyhow::Result;
use serde::Serialize;
use tracing::info;

use crate::util::now_utc_string;
use blocks::{TextBlock, classify_blocks, extract_text_blocks};
use chunk::Chunk;
use chunking::{ChunkingConfig, assemble_chunks};
use document::SourceDocument;
use entities::EntityExtractor;
use font_profile::{FontProfile, analyze_font_profile};
use headers::{HeaderClassifier, HeaderPatterns};
use hierarchy::{SectionTree, build_section_hierarchy};
use tables::{TableExtraction, TableFinder, extract_tables};
use tagging::MetadataTagger;
use vision::AlgorithmDescription;

/// Compiled patterns shared by every document of a run. Per-document state
/// (font thresholds, sections) never lives here.
#[derive(Debug)]
pub struct Structurer {
    patterns: HeaderPatterns,
    tagger: MetadataTagger,
}

/// Everything derived from the page text before any vision call is made.
#[derive(Debug)]
pub struct DocumentLayout {
    pub profile: FontProfile,
    pub blocks: Vec<TextBlock>,
    pub tree: SectionTree,
    pub tables: TableExtraction,
    pub page_count: usize,
}

#[derive(Debug, Clone)]
pub struct DocumentIdentity {
    pub doc_id: String,
    pub source_path: String,
    pub source_sha256: String,
    /// Used when no title candidate is found on the first pages.
    pub fallback_title: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChunkSummary {
    pub recommendations: usize,
    pub tables: usize,
    pub algorithms: usize,
    pub by_grade: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, usize>,
    pub by_population: BTreeMap<String, usize>,
}

impl ChunkSummary {
    pub fn from_chunks(chunks: &[Chunk]) -> Self {
        let mut summary = ChunkSummary::default();
        for chunk in chunks {
            summary.recommendations += usize::from(chunk.is_recommendation);
            summary.tables += usize::from(chunk.is_table);
            summary.algorithms += usize::from(chunk.is_algorithm);
            if let Some(grade) = chunk.grade {
                *summary.by_grade.entry(grade.to_string()).or_default() += 1;
            }
            if let Some(category) = chunk.category {
                *summary.by_category.entry(category.to_string()).or_default() += 1;
            }
            *summary
                .by_population
                .entry(chunk.target_population.clone())
                .or_default() += 1;
        }
        summary
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentMetadata {
    pub doc_id: String,
    pub title: String,
    pub source_path: String,
    pub source_sha256: String,
    pub page_count: usize,
    pub top_level_section_titles: Vec<String>,
    pub section_count: usize,
    pub orphan_sections: usize,
    pub table_count: usize,
    pub algorithm_count: usize,
    pub total_chunks: usize,
    pub parse_timestamp: String,
    pub font_profile: FontProfile,
    pub chunk_summary: ChunkSummary,
}

#[derive(Debug)]
pub struct StructuredDocument {
    pub metadata: DocumentMetadata,
    pub chunks: Vec<Chunk>,
    pub tree: SectionTree,
}

impl StructuredDocument {
    /// Markdown rendering of the whole document: a short header followed by
    /// every chunk in index order.
    pub fn full_content(&self) -> String {
        let mut out = format!(
            "# {}\n\nParsed: {}\nPages: {}\n",
            self.metadata.title, self.metadata.parse_timestamp, self.metadata.page_count
        );
        for chunk in &self.chunks {
            out.push('\n');
            out.push_str(&chunk.content);
            out.push('\n');
        }
        out
    }
}

impl Structurer {
    pub fn new() -> Result<Self> {
        Ok(Self {
            patterns: HeaderPatterns::new()?,
            tagger: MetadataTagger::new()?,
        })
    }

    pub fn tagger(&self) -> &MetadataTagger {
        &self.tagger
    }

    /// Font calibration, block extraction, header classification, section
    /// building and table extraction. Pass `None` to skip table detection.
    pub fn analyze_layout(
        &self,
        document: &SourceDocument,
        table_finder: Option<&dyn TableFinder>,
    ) -> DocumentLayout {
        let profile = analyze_font_profile(document);
        let classifier = HeaderClassifier::new(&self.patterns, profile.thresholds);

        let mut blocks = extract_text_blocks(document);
        classify_blocks(&mut blocks, &classifier);
        let headers = blocks
            .iter()
            .filter(|block| block.header_level.is_some())
            .count();

        let tree = build_section_hierarchy(&blocks);
        let tables = match table_finder {
            Some(finder) => extract_tables(document, finder),
            None => TableExtraction::default(),
        };

        info!(
            pages = document.page_count(),
            blocks = blocks.len(),
            headers,
            sections = tree.len(),
            orphans = tree.orphan_count(),
            calibrated = profile.calibrated,
            "analyzed document layout"
        );

        DocumentLayout {
            profile,
            blocks,
            tree,
            tables,
            page_count: document.page_count(),
        }
    }

    pub fn assemble(
        &self,
        layout: DocumentLayout,
        algorithms: &[AlgorithmDescription],
        config: &ChunkingConfig,
        entity_extractor: Option<&dyn EntityExtractor>,
        identity: DocumentIdentity,
    ) -> Result<StructuredDocument> {
        config.validate()?;

        let chunks = assemble_chunks(
            &layout.tree,
            &layout.tables.tables,
            algorithms,
            config,
            &self.tagger,
            entity_extractor,
        );

        let title = layout
            .profile
            .title
            .clone()
            .unwrap_or_else(|| identity.fallback_title.clone());
        let metadata = DocumentMetadata {
            doc_id: identity.doc_id,
            title,
            source_path: identity.source_path,
            source_sha256: identity.source_sha256,
            page_count: layout.page_count,
            top_level_section_titles: layout.tree.top_level_titles(),
            section_count: layout.tree.len(),
            orphan_sections: layout.tree.orphan_count(),
            table_count: layout.tables.tables.len(),
            algorithm_count: algorithms.len(),
            total_chunks: chunks.len(),
            parse_timestamp: now_utc_string(),
            font_profile: layout.profile,
            chunk_summary: ChunkSummary::from_chunks(&chunks),
        };

        info!(
            doc_id = %metadata.doc_id,
            chunks = metadata.total_chunks,
            tables = metadata.table_count,
            algorithms = metadata.algorithm_count,
            recommendations = metadata.chunk_summary.recommendations,
            "structured document"
        );

        Ok(StructuredDocument {
            metadata,
            chunks,
            tree: layout.tree,
        })
    }
}
