use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

use crate::cli::InventoryArgs;
use crate::model::{SourceEntry, SourceInventoryManifest};
use crate::sources::SourceFormat;
use crate::util::{now_utc_string, sha256_file, slugify, write_json_pretty};

pub fn run(args: InventoryArgs) -> Result<()> {
    let source_dir = source_dir_for(&args.cache_root, args.source_dir.as_deref());
    let manifest = build_manifest(&source_dir)?;

    if args.dry_run {
        for entry in &manifest.documents {
            info!(
                doc_id = %entry.doc_id,
                filename = %entry.filename,
                format = entry.format.as_str(),
                "discovered document"
            );
        }
        info!(
            document_count = manifest.document_count,
            source = %manifest.source_directory,
            "inventory dry-run complete"
        );
        return Ok(());
    }

    let manifest_path = args
        .manifest_path
        .unwrap_or_else(|| default_manifest_path(&args.cache_root));

    write_json_pretty(&manifest_path, &manifest)?;
    info!(path = %manifest_path.display(), "wrote inventory manifest");
    info!(document_count = manifest.document_count, "inventory completed");

    Ok(())
}

pub fn source_dir_for(cache_root: &Path, source_dir: Option<&Path>) -> PathBuf {
    source_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| cache_root.join("sources"))
}

pub fn default_manifest_path(cache_root: &Path) -> PathBuf {
    cache_root.join("manifests").join("source_inventory.json")
}

pub fn build_manifest(source_dir: &Path) -> Result<SourceInventoryManifest> {
    let mut paths = discover_documents(source_dir)?;
    paths.sort_by(|a, b| a.0.cmp(&b.0));

    if paths.is_empty() {
        bail!("no guideline documents found in {}", source_dir.display());
    }

    let mut documents = Vec::<SourceEntry>::with_capacity(paths.len());
    for (path, format) in paths {
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(ToOwned::to_owned)
            .with_context(|| format!("invalid UTF-8 filename: {}", path.display()))?;
        let size_bytes = fs::metadata(&path)
            .with_context(|| format!("failed to stat {}", path.display()))?
            .len();
        let sha256 = sha256_file(&path)?;

        let mut doc_id = doc_id_for(&path, &sha256);
        let mut suffix = 2usize;
        while documents.iter().any(|entry| entry.doc_id == doc_id) {
            doc_id = format!("{}_{suffix}", doc_id_for(&path, &sha256));
            suffix += 1;
        }

        debug!(doc_id = %doc_id, filename = %filename, "hashed document");
        documents.push(SourceEntry {
            doc_id,
            filename,
            format,
            size_bytes,
            sha256,
        });
    }

    Ok(SourceInventoryManifest {
        manifest_version: 1,
        generated_at: now_utc_string(),
        source_directory: source_dir.display().to_string(),
        document_count: documents.len(),
        documents,
    })
}

/// Slug of the file stem plus a short content hash, so renamed copies of
/// the same guideline stay distinguishable.
pub fn doc_id_for(path: &Path, sha256: &str) -> String {
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(slugify)
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| "document".to_string());
    let short_hash = sha256.get(..8).unwrap_or(sha256);
    format!("{stem}_{short_hash}")
}

fn discover_documents(source_dir: &Path) -> Result<Vec<(PathBuf, SourceFormat)>> {
    let mut documents = Vec::new();

    let entries = fs::read_dir(source_dir)
        .with_context(|| format!("failed to read {}", source_dir.display()))?;

    for entry in entries {
        let entry =
            entry.with_context(|| format!("failed to read entry in {}", source_dir.display()))?;
        let path = entry.path();

        if !entry
            .file_type()
            .with_context(|| format!("failed to inspect file type: {}", path.display()))?
            .is_file()
        {
            continue;
        }

        if let Some(format) = SourceFormat::from_path(&path) {
            documents.push((path, format));
        }
    }

    Ok(documents)
}
