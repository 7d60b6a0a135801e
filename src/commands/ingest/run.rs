use super::*;

pub fn run(args: IngestArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("run-{}", utc_compact_string(started_ts));

    let cache_root = args.cache_root.clone();
    let manifest_dir = cache_root.join("manifests");
    ensure_directory(&manifest_dir)?;

    let source_dir = inventory::source_dir_for(&cache_root, args.source_dir.as_deref());
    let inventory_manifest_path = args
        .inventory_manifest_path
        .clone()
        .unwrap_or_else(|| inventory::default_manifest_path(&cache_root));
    let ingest_manifest_path = args.ingest_manifest_path.clone().unwrap_or_else(|| {
        manifest_dir.join(format!(
            "ingest_run_{}.json",
            utc_compact_string(started_ts)
        ))
    });
    let db_path = args
        .db_path
        .clone()
        .unwrap_or_else(|| default_db_path(&cache_root));
    let processed_dir = args
        .processed_dir
        .clone()
        .unwrap_or_else(|| cache_root.join("processed"));
    let work_root = cache_root.join("work");

    let chunking = ChunkingConfig {
        chunk_size: args.chunk_size,
        max_chunk_size: args.max_chunk_size,
        context_markers: args.context_markers,
    };
    chunking.validate()?;
    if args.vision_concurrency == 0 {
        bail!("--vision-concurrency must be at least 1");
    }

    info!(cache_root = %cache_root.display(), run_id = %run_id, "starting ingest");

    let inventory = load_or_refresh_inventory(
        &source_dir,
        &inventory_manifest_path,
        args.refresh_inventory,
    )?;
    let inventory_source_dir = PathBuf::from(&inventory.source_directory);
    let selected = select_documents(&inventory, &args.only_doc_ids)?;

    let tool_versions = collect_tool_versions();

    ensure_directory(&processed_dir)?;
    let mut connection = open_index(&db_path)?;

    let structurer = Structurer::new()?;
    let keyword_extractor = if args.extract_entities {
        Some(KeywordEntityExtractor::new()?)
    } else {
        None
    };
    let layout_finder = LayoutTableFinder::default();
    let provided_finder = ProvidedTableFinder;
    let table_finder: Option<&dyn TableFinder> = match args.table_detection {
        TableDetection::Layout => Some(&layout_finder),
        TableDetection::Provided => Some(&provided_finder),
        TableDetection::Off => None,
    };
    let vision = VisionStage::from_args(&args)?;

    let context = PipelineContext {
        structurer: &structurer,
        chunking: &chunking,
        table_finder,
        entity_extractor: keyword_extractor
            .as_ref()
            .map(|extractor| extractor as &dyn EntityExtractor),
        vision: vision.as_ref(),
        source_dir: &inventory_source_dir,
        work_root: &work_root,
        processed_dir: &processed_dir,
        max_pages: args.max_pages_per_doc,
    };

    let mut counts = IngestCounts {
        document_count: inventory.document_count,
        selected_document_count: selected.len(),
        ..IngestCounts::default()
    };
    let mut documents = Vec::with_capacity(selected.len());
    let mut warnings = Vec::new();

    for entry in &selected {
        info!(doc_id = %entry.doc_id, filename = %entry.filename, "processing document");

        let outcome = process_document(&context, entry).and_then(|processed| {
            let written = replace_document(&mut connection, entry, &processed.structured)?;
            Ok((processed, written))
        });

        match outcome {
            Ok((processed, written)) => {
                counts.chunks_written += written;
                accumulate_counts(&mut counts, &processed);
                for warning in &processed.warnings {
                    warnings.push(format!("{}: {warning}", entry.doc_id));
                }
                documents.push(succeeded_result(entry, &processed));
            }
            Err(err) => {
                warn!(doc_id = %entry.doc_id, error = %format!("{err:#}"), "document failed");
                counts.failed_document_count += 1;
                warnings.push(format!("{}: {err:#}", entry.doc_id));
                documents.push(failed_result(entry, &err));
            }
        }
    }

    sync_fts_index(&connection)?;

    counts.docs_total = count_rows(&connection, "SELECT COUNT(*) FROM docs")?;
    counts.chunks_total = count_rows(&connection, "SELECT COUNT(*) FROM chunks")?;

    let all_failed = !selected.is_empty() && counts.failed_document_count == selected.len();
    let status = if all_failed {
        "failed"
    } else if counts.failed_document_count > 0 {
        "completed_with_failures"
    } else {
        "completed"
    };

    let manifest = IngestRunManifest {
        manifest_version: 1,
        run_id,
        db_schema_version: DB_SCHEMA_VERSION.to_string(),
        status: status.to_string(),
        started_at,
        updated_at: now_utc_string(),
        command: render_ingest_command(&args),
        tool_versions,
        paths: IngestPaths {
            cache_root: cache_root.display().to_string(),
            source_dir: inventory_source_dir.display().to_string(),
            manifest_dir: manifest_dir.display().to_string(),
            inventory_manifest_path: inventory_manifest_path.display().to_string(),
            processed_dir: processed_dir.display().to_string(),
            db_path: db_path.display().to_string(),
        },
        settings: IngestSettings {
            chunk_size: chunking.chunk_size,
            max_chunk_size: chunking.max_chunk_size,
            context_markers: chunking.context_markers,
            table_detection: args.table_detection.as_str().to_string(),
            vision_mode: args.vision.as_str().to_string(),
            vision_enabled: vision.is_some(),
            vision_model: vision.as_ref().map(|_| args.vision_model.clone()),
            vision_concurrency: args.vision_concurrency,
            vision_timeout_secs: args.vision_timeout_secs,
            extract_entities: args.extract_entities,
            max_pages_per_doc: args.max_pages_per_doc,
        },
        counts,
        documents,
        source_hashes: selected,
        warnings,
    };

    write_json_pretty(&ingest_manifest_path, &manifest)?;
    info!(path = %ingest_manifest_path.display(), "wrote ingest run manifest");
    info!(
        processed = manifest.counts.processed_document_count,
        failed = manifest.counts.failed_document_count,
        chunks = manifest.counts.chunks_written,
        docs_total = manifest.counts.docs_total,
        chunks_total = manifest.counts.chunks_total,
        "ingest completed"
    );

    if all_failed {
        bail!(
            "all {} selected documents failed; see {}",
            manifest.counts.selected_document_count,
            ingest_manifest_path.display()
        );
    }

    Ok(())
}

pub fn default_db_path(cache_root: &Path) -> PathBuf {
    cache_root.join("cpgparse_index.sqlite")
}

fn load_or_refresh_inventory(
    source_dir: &Path,
    inventory_manifest_path: &Path,
    refresh_inventory: bool,
) -> Result<SourceInventoryManifest> {
    if refresh_inventory || !inventory_manifest_path.exists() {
        let manifest = inventory::build_manifest(source_dir)?;
        write_json_pretty(inventory_manifest_path, &manifest)?;
        info!(
            path = %inventory_manifest_path.display(),
            document_count = manifest.document_count,
            "refreshed inventory manifest"
        );
        return Ok(manifest);
    }

    let raw = fs::read(inventory_manifest_path)
        .with_context(|| format!("failed to read {}", inventory_manifest_path.display()))?;
    let manifest: SourceInventoryManifest = serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse {}", inventory_manifest_path.display()))?;

    info!(
        path = %inventory_manifest_path.display(),
        document_count = manifest.document_count,
        "loaded existing inventory manifest"
    );

    Ok(manifest)
}

pub(super) fn select_documents(
    inventory: &SourceInventoryManifest,
    only_doc_ids: &[String],
) -> Result<Vec<SourceEntry>> {
    if only_doc_ids.is_empty() {
        return Ok(inventory.documents.clone());
    }

    let unknown = only_doc_ids
        .iter()
        .filter(|id| !inventory.documents.iter().any(|entry| &entry.doc_id == *id))
        .cloned()
        .collect::<Vec<_>>();
    if !unknown.is_empty() {
        bail!("unknown doc ids requested via --only: {}", unknown.join(", "));
    }

    Ok(inventory
        .documents
        .iter()
        .filter(|entry| only_doc_ids.contains(&entry.doc_id))
        .cloned()
        .collect())
}

fn collect_tool_versions() -> ToolVersions {
    ToolVersions {
        pdftohtml: command_version_optional("pdftohtml", &["-v"]),
        pdfimages: command_version_optional("pdfimages", &["-v"]),
    }
}

fn command_version_optional(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let source = if stdout.trim().is_empty() {
        stderr.trim()
    } else {
        stdout.trim()
    };

    source
        .lines()
        .next()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ToOwned::to_owned)
}

pub(super) fn render_ingest_command(args: &IngestArgs) -> String {
    let mut command = vec![
        "cpgparse".to_string(),
        "ingest".to_string(),
        "--cache-root".to_string(),
        args.cache_root.display().to_string(),
    ];

    let optional_paths = [
        ("--source-dir", &args.source_dir),
        ("--inventory-manifest-path", &args.inventory_manifest_path),
        ("--ingest-manifest-path", &args.ingest_manifest_path),
        ("--db-path", &args.db_path),
        ("--processed-dir", &args.processed_dir),
    ];
    for (flag, path) in optional_paths {
        if let Some(path) = path {
            command.push(flag.to_string());
            command.push(path.display().to_string());
        }
    }
    if args.refresh_inventory {
        command.push("--refresh-inventory".to_string());
    }

    command.push("--chunk-size".to_string());
    command.push(args.chunk_size.to_string());
    command.push("--max-chunk-size".to_string());
    command.push(args.max_chunk_size.to_string());
    command.push("--context-markers".to_string());
    command.push(args.context_markers.to_string());
    command.push("--table-detection".to_string());
    command.push(args.table_detection.as_str().to_string());
    command.push("--vision".to_string());
    command.push(args.vision.as_str().to_string());

    if args.vision == VisionMode::Auto {
        command.push("--vision-model".to_string());
        command.push(args.vision_model.clone());
        command.push("--vision-concurrency".to_string());
        command.push(args.vision_concurrency.to_string());
        command.push("--vision-timeout-secs".to_string());
        command.push(args.vision_timeout_secs.to_string());
    }
    if args.extract_entities {
        command.push("--extract-entities".to_string());
    }
    if let Some(max_pages) = args.max_pages_per_doc {
        command.push("--max-pages-per-doc".to_string());
        command.push(max_pages.to_string());
    }
    for doc_id in &args.only_doc_ids {
        command.push("--only".to_string());
        command.push(doc_id.clone());
    }

    command.join(" ")
}
