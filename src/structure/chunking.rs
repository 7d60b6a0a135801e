use anyhow::{Result, bail};
use serde::Serialize;
use tracing::{debug, warn};

use super::chunk::{Chunk, ChunkMetadata, ChunkPayload};
use super::entities::EntityExtractor;
use super::hierarchy::{SectionId, SectionTree};
use super::tables::ExtractedTable;
use super::tagging::MetadataTagger;
use super::vision::AlgorithmDescription;
use crate::util::char_len;

pub const TABLES_GROUP: &str = "Tables";
pub const ALGORITHMS_GROUP: &str = "Algorithms";

const PARAGRAPH_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ChunkingConfig {
    /// Packing target for section text, in characters.
    pub chunk_size: usize,
    /// Hard bound for every text chunk except a single oversized sentence.
    pub max_chunk_size: usize,
    pub context_markers: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1200,
            max_chunk_size: 2000,
            context_markers: true,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            bail!("chunk size must be greater than zero");
        }
        if self.chunk_size > self.max_chunk_size {
            bail!(
                "chunk size {} exceeds max chunk size {}",
                self.chunk_size,
                self.max_chunk_size
            );
        }
        Ok(())
    }
}

pub fn context_marker(hierarchy: &[String]) -> String {
    format!("<!-- CONTEXT: {} -->\n\n", hierarchy.join(" > "))
}

/// Greedy packing of paragraphs into pieces of at most `chunk_size`
/// characters. An oversized paragraph is re-packed sentence by sentence; a
/// single sentence longer than `chunk_size` is emitted whole.
pub fn split_content(content: &str, chunk_size: usize) -> Vec<String> {
    let content = content.trim();
    if content.is_empty() {
        return Vec::new();
    }
    if char_len(content) <= chunk_size {
        return vec![content.to_string()];
    }

    let mut pieces = Vec::new();
    let mut current = String::new();

    for paragraph in paragraphs(content) {
        let paragraph_len = char_len(&paragraph);
        if paragraph_len > chunk_size {
            flush(&mut pieces, &mut current);
            let mut sentences = pack_sentences(&paragraph, chunk_size);
            // The tail of a split paragraph keeps packing with what follows.
            if let Some(tail) = sentences.pop() {
                pieces.extend(sentences);
                current = tail;
            }
            continue;
        }

        if current.is_empty() {
            current = paragraph;
        } else if char_len(&current) + PARAGRAPH_SEPARATOR.len() + paragraph_len <= chunk_size {
            current.push_str(PARAGRAPH_SEPARATOR);
            current.push_str(&paragraph);
        } else {
            flush(&mut pieces, &mut current);
            current = paragraph;
        }
    }
    flush(&mut pieces, &mut current);

    pieces
}

fn paragraphs(content: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut lines = Vec::<&str>::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            if !lines.is_empty() {
                paragraphs.push(lines.join("\n").trim().to_string());
                lines.clear();
            }
        } else {
            lines.push(line);
        }
    }
    if !lines.is_empty() {
        paragraphs.push(lines.join("\n").trim().to_string());
    }
    paragraphs.retain(|paragraph| !paragraph.is_empty());
    paragraphs
}

fn pack_sentences(paragraph: &str, chunk_size: usize) -> Vec<String> {
    let mut packed = Vec::new();
    let mut current = String::new();
    for sentence in paragraph.split_inclusive(". ") {
        if !current.is_empty() && char_len(&current) + char_len(sentence) > chunk_size {
            flush(&mut packed, &mut current);
        }
        current.push_str(sentence);
    }
    flush(&mut packed, &mut current);
    packed
}

fn flush(pieces: &mut Vec<String>, current: &mut String) {
    let piece = current.trim();
    if !piece.is_empty() {
        pieces.push(piece.to_string());
    }
    current.clear();
}

/// Walks the section forest depth-first and emits text chunks, then one
/// chunk per table and per algorithm description under their synthetic
/// groups. Indices and `total_chunks` are assigned last.
pub fn assemble_chunks(
    tree: &SectionTree,
    tables: &[ExtractedTable],
    algorithms: &[AlgorithmDescription],
    config: &ChunkingConfig,
    tagger: &MetadataTagger,
    entity_extractor: Option<&dyn EntityExtractor>,
) -> Vec<Chunk> {
    let mut chunks = Vec::new();

    for id in tree.depth_first() {
        section_chunks(tree, id, config, tagger, &mut chunks);
    }
    chunks.extend(tables.iter().map(|table| table_chunk(table, tagger)));
    chunks.extend(
        algorithms
            .iter()
            .map(|algorithm| algorithm_chunk(algorithm, tagger)),
    );

    if let Some(extractor) = entity_extractor {
        for chunk in &mut chunks {
            chunk.entities = extractor.extract_entities(&chunk.content);
        }
    }

    let total = chunks.len();
    for (index, chunk) in chunks.iter_mut().enumerate() {
        chunk.index = index;
        chunk.metadata.total_chunks = Some(total);
    }
    chunks
}

fn section_chunks(
    tree: &SectionTree,
    id: SectionId,
    config: &ChunkingConfig,
    tagger: &MetadataTagger,
    chunks: &mut Vec<Chunk>,
) {
    let section = tree.get(id);
    if section.content.trim().is_empty() {
        return;
    }

    let hierarchy = tree.path(id);
    let mut pieces = split_content(&section.content, config.chunk_size);
    let mut marker = None;

    if config.context_markers && pieces.len() > 1 {
        let candidate = context_marker(&hierarchy);
        let marker_len = char_len(&candidate);
        if marker_len < config.chunk_size {
            pieces = split_content(&section.content, config.chunk_size - marker_len);
        }
        marker = Some(candidate);
    }

    debug!(
        section = %section.title,
        pieces = pieces.len(),
        "split section content"
    );

    let pages = (section.start_page..=section.end_page).collect::<Vec<u32>>();
    for piece in pieces {
        let tags = tagger.tag(&section.title, &piece);
        let content = match marker.as_deref() {
            Some(marker) if char_len(marker) + char_len(&piece) <= config.max_chunk_size => {
                format!("{marker}{piece}")
            }
            _ => piece,
        };
        if char_len(&content) > config.max_chunk_size {
            warn!(
                section = %section.title,
                chars = char_len(&content),
                max_chunk_size = config.max_chunk_size,
                "single sentence exceeds max chunk size; keeping it whole"
            );
        }

        chunks.push(Chunk::new(
            content,
            hierarchy.clone(),
            ChunkPayload::Text,
            tags,
            pages.clone(),
            ChunkMetadata {
                section_title: Some(section.title.clone()),
                section_level: Some(section.level.as_u8()),
                ..ChunkMetadata::default()
            },
        ));
    }
}

fn table_chunk(table: &ExtractedTable, tagger: &MetadataTagger) -> Chunk {
    let body = if table.json_rows.is_empty() {
        table.markdown.clone()
    } else {
        serde_json::to_string_pretty(&table.json_rows).unwrap_or_else(|_| table.markdown.clone())
    };
    let content = format!("**Table (Page {})**\n\n{body}", table.page);
    let tags = tagger.tag(TABLES_GROUP, &table.markdown);

    Chunk::new(
        content,
        vec![TABLES_GROUP.to_string()],
        ChunkPayload::Table(table.json_rows.clone()),
        tags,
        vec![table.page],
        ChunkMetadata {
            table_index: Some(table.index),
            table_headers: Some(table.headers.clone()),
            ..ChunkMetadata::default()
        },
    )
}

fn algorithm_chunk(algorithm: &AlgorithmDescription, tagger: &MetadataTagger) -> Chunk {
    let content = format!(
        "**Algorithm/Flowchart (Page {})**\n\n{}",
        algorithm.page, algorithm.description
    );
    let tags = tagger.tag(ALGORITHMS_GROUP, &algorithm.description);

    Chunk::new(
        content,
        vec![ALGORITHMS_GROUP.to_string()],
        ChunkPayload::Algorithm(algorithm.description.clone()),
        tags,
        vec![algorithm.page],
        ChunkMetadata {
            algorithm_index: Some(algorithm.index),
            image_size: Some(algorithm.image_size),
            ..ChunkMetadata::default()
        },
    )
}
