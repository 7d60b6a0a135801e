use super::*;

/// Async vision client driven from the synchronous ingest loop.
pub(super) struct VisionStage {
    runtime: tokio::runtime::Runtime,
    describer: OpenAiVisionDescriber,
    options: VisionOptions,
}

impl VisionStage {
    /// Returns `None` when vision is switched off or no API key is configured.
    pub(super) fn from_args(args: &IngestArgs) -> Result<Option<Self>> {
        if args.vision == VisionMode::Off {
            info!("vision disabled; algorithm images will not be described");
            return Ok(None);
        }

        let api_key = args
            .vision_api_key
            .clone()
            .or_else(|| std::env::var("GEMINI_API_KEY").ok())
            .filter(|key| !key.trim().is_empty());
        let Some(api_key) = api_key else {
            info!("no vision API key configured; skipping algorithm descriptions");
            return Ok(None);
        };

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to start async runtime for vision calls")?;
        let describer = OpenAiVisionDescriber::new(OpenAiVisionConfig {
            api_key,
            model: args.vision_model.clone(),
            base_url: args.vision_base_url.clone(),
            max_tokens: VISION_MAX_TOKENS,
        });

        info!(
            model = %args.vision_model,
            concurrency = args.vision_concurrency,
            timeout_secs = args.vision_timeout_secs,
            "vision enabled"
        );

        Ok(Some(Self {
            runtime,
            describer,
            options: VisionOptions {
                concurrency: args.vision_concurrency,
                timeout: Duration::from_secs(args.vision_timeout_secs),
            },
        }))
    }

    fn describe(&self, document: &SourceDocument) -> AlgorithmExtraction {
        self.runtime
            .block_on(describe_algorithms(document, &self.describer, self.options))
    }
}

/// Run-wide collaborators shared by every document.
pub(super) struct PipelineContext<'a> {
    pub structurer: &'a Structurer,
    pub chunking: &'a ChunkingConfig,
    pub table_finder: Option<&'a dyn TableFinder>,
    pub entity_extractor: Option<&'a dyn EntityExtractor>,
    pub vision: Option<&'a VisionStage>,
    pub source_dir: &'a Path,
    pub work_root: &'a Path,
    pub processed_dir: &'a Path,
    pub max_pages: Option<usize>,
}

#[derive(Debug, Default)]
pub(super) struct DocumentStats {
    pub headers_detected: usize,
    pub table_failed_pages: usize,
    pub images_considered: usize,
    pub images_skipped_small: usize,
    pub vision_failures: usize,
    pub vision_timeouts: usize,
}

pub(super) struct ProcessedDocument {
    pub structured: StructuredDocument,
    pub outputs: DocumentOutputs,
    pub stats: DocumentStats,
    pub warnings: Vec<String>,
}

#[derive(Debug, Serialize)]
struct SectionOutline<'a> {
    id: usize,
    title: &'a str,
    level: u8,
    parent: Option<usize>,
    start_page: u32,
    end_page: u32,
    content_chars: usize,
    synthetic: bool,
}

#[derive(Debug, Serialize)]
struct StructureRecord<'a> {
    #[serde(flatten)]
    metadata: &'a DocumentMetadata,
    sections: Vec<SectionOutline<'a>>,
    warnings: &'a [String],
}

pub(super) fn process_document(
    context: &PipelineContext<'_>,
    entry: &SourceEntry,
) -> Result<ProcessedDocument> {
    let source_path = context.source_dir.join(&entry.filename);
    let work_dir = context.work_root.join(&entry.doc_id);

    let loaded = load_document(
        &source_path,
        entry.format,
        LoadOptions {
            work_dir: &work_dir,
            max_pages: context.max_pages,
        },
    )
    .with_context(|| format!("failed to load {}", source_path.display()))?;
    let document = loaded.document;
    let mut warnings = loaded.warnings;

    if document.pages.is_empty() {
        bail!("{} contains no pages", entry.filename);
    }

    let layout = context
        .structurer
        .analyze_layout(&document, context.table_finder);
    let mut stats = DocumentStats {
        headers_detected: layout
            .blocks
            .iter()
            .filter(|block| block.header_level.is_some())
            .count(),
        table_failed_pages: layout.tables.failed_pages.len(),
        ..DocumentStats::default()
    };
    warnings.extend(layout.tables.warnings.iter().cloned());

    let algorithms = match context.vision {
        Some(vision) => {
            let extraction = vision.describe(&document);
            stats.images_considered = extraction.images_considered;
            stats.images_skipped_small = extraction.skipped_small_images;
            stats.vision_failures = extraction.failed;
            stats.vision_timeouts = extraction.timed_out;
            if extraction.failed + extraction.timed_out > 0 {
                warnings.push(format!(
                    "vision: {} image(s) failed, {} timed out",
                    extraction.failed, extraction.timed_out
                ));
            }
            extraction.algorithms
        }
        None => Vec::new(),
    };

    let fallback_title = source_path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(&entry.doc_id)
        .to_string();
    let structured = context.structurer.assemble(
        layout,
        &algorithms,
        context.chunking,
        context.entity_extractor,
        DocumentIdentity {
            doc_id: entry.doc_id.clone(),
            source_path: source_path.display().to_string(),
            source_sha256: entry.sha256.clone(),
            fallback_title,
        },
    )?;

    let outputs = write_processed_outputs(context.processed_dir, &structured, &warnings)?;

    Ok(ProcessedDocument {
        structured,
        outputs,
        stats,
        warnings,
    })
}

fn write_processed_outputs(
    processed_dir: &Path,
    structured: &StructuredDocument,
    warnings: &[String],
) -> Result<DocumentOutputs> {
    let doc_id = &structured.metadata.doc_id;
    let markdown_path = processed_dir.join(format!("{doc_id}.md"));
    let chunks_path = processed_dir.join(format!("{doc_id}_chunks.json"));
    let structure_path = processed_dir.join(format!("{doc_id}_structure.json"));

    write_text(&markdown_path, &structured.full_content())?;
    write_json_pretty(&chunks_path, &structured.chunks)?;
    write_json_pretty(
        &structure_path,
        &StructureRecord {
            metadata: &structured.metadata,
            sections: section_outline(&structured.tree),
            warnings,
        },
    )?;

    Ok(DocumentOutputs {
        markdown_path: markdown_path.display().to_string(),
        chunks_path: chunks_path.display().to_string(),
        structure_path: structure_path.display().to_string(),
    })
}

fn section_outline(tree: &SectionTree) -> Vec<SectionOutline<'_>> {
    tree.depth_first()
        .into_iter()
        .map(|id| {
            let section = tree.get(id);
            SectionOutline {
                id,
                title: &section.title,
                level: section.level.as_u8(),
                parent: section.parent,
                start_page: section.start_page,
                end_page: section.end_page,
                content_chars: section.content.chars().count(),
                synthetic: section.synthetic,
            }
        })
        .collect()
}

pub(super) fn succeeded_result(entry: &SourceEntry, processed: &ProcessedDocument) -> DocumentResult {
    let metadata = &processed.structured.metadata;
    DocumentResult {
        doc_id: entry.doc_id.clone(),
        filename: entry.filename.clone(),
        status: "processed".to_string(),
        pages: metadata.page_count,
        headers_detected: processed.stats.headers_detected,
        sections: metadata.section_count,
        chunks: metadata.total_chunks,
        tables: metadata.chunk_summary.tables,
        algorithms: metadata.chunk_summary.algorithms,
        recommendations: metadata.chunk_summary.recommendations,
        outputs: Some(processed.outputs.clone()),
        error: None,
        warnings: processed.warnings.clone(),
    }
}

pub(super) fn failed_result(entry: &SourceEntry, error: &anyhow::Error) -> DocumentResult {
    DocumentResult {
        doc_id: entry.doc_id.clone(),
        filename: entry.filename.clone(),
        status: "failed".to_string(),
        pages: 0,
        headers_detected: 0,
        sections: 0,
        chunks: 0,
        tables: 0,
        algorithms: 0,
        recommendations: 0,
        outputs: None,
        error: Some(format!("{error:#}")),
        warnings: Vec::new(),
    }
}

pub(super) fn accumulate_counts(counts: &mut IngestCounts, processed: &ProcessedDocument) {
    let metadata = &processed.structured.metadata;
    counts.processed_document_count += 1;
    counts.pages_total += metadata.page_count;
    counts.sections_total += metadata.section_count;
    counts.orphan_sections_total += metadata.orphan_sections;
    counts.table_chunks += metadata.chunk_summary.tables;
    counts.algorithm_chunks += metadata.chunk_summary.algorithms;
    counts.recommendation_chunks += metadata.chunk_summary.recommendations;
    counts.table_failed_pages += processed.stats.table_failed_pages;
    counts.images_considered += processed.stats.images_considered;
    counts.images_skipped_small += processed.stats.images_skipped_small;
    counts.vision_failures += processed.stats.vision_failures;
    counts.vision_timeouts += processed.stats.vision_timeouts;
}
