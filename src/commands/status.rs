use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::commands::{ingest, inventory};
use crate::model::{IngestRunManifest, SourceInventoryManifest};

pub fn run(args: StatusArgs) -> Result<()> {
    let manifest_dir = args.cache_root.join("manifests");
    let inventory_path = inventory::default_manifest_path(&args.cache_root);
    let db_path = args
        .db_path
        .clone()
        .unwrap_or_else(|| ingest::default_db_path(&args.cache_root));

    info!(cache_root = %args.cache_root.display(), "status requested");

    if inventory_path.exists() {
        let inventory: SourceInventoryManifest = read_json(&inventory_path)?;
        info!(
            generated_at = %inventory.generated_at,
            source = %inventory.source_directory,
            document_count = inventory.document_count,
            "loaded inventory manifest"
        );
    } else {
        warn!(path = %inventory_path.display(), "inventory manifest missing");
    }

    match latest_ingest_manifest(&manifest_dir)? {
        Some(path) => {
            let manifest: IngestRunManifest = read_json(&path)?;
            info!(
                path = %path.display(),
                run_id = %manifest.run_id,
                status = %manifest.status,
                updated_at = %manifest.updated_at,
                processed = manifest.counts.processed_document_count,
                failed = manifest.counts.failed_document_count,
                chunks = manifest.counts.chunks_written,
                recommendations = manifest.counts.recommendation_chunks,
                tables = manifest.counts.table_chunks,
                algorithms = manifest.counts.algorithm_chunks,
                "loaded latest ingest manifest"
            );
            for document in manifest
                .documents
                .iter()
                .filter(|document| document.error.is_some())
            {
                warn!(
                    doc_id = %document.doc_id,
                    error = %document.error.as_deref().unwrap_or_default(),
                    "document failed in latest run"
                );
            }
        }
        None => warn!(path = %manifest_dir.display(), "no ingest manifest found"),
    }

    if db_path.exists() {
        let conn = Connection::open(&db_path)
            .with_context(|| format!("failed to open {}", db_path.display()))?;
        let docs_count = query_count(&conn, "SELECT COUNT(*) FROM docs").unwrap_or(0);
        let chunks_count = query_count(&conn, "SELECT COUNT(*) FROM chunks").unwrap_or(0);
        let recommendation_count =
            query_count(&conn, "SELECT COUNT(*) FROM chunks WHERE is_recommendation = 1")
                .unwrap_or(0);

        info!(
            path = %db_path.display(),
            docs = docs_count,
            chunks = chunks_count,
            recommendations = recommendation_count,
            "database status"
        );
    } else {
        warn!(path = %db_path.display(), "database file missing");
    }

    Ok(())
}

/// Run manifests carry a compact UTC timestamp in their name, so the
/// lexically greatest one is the newest.
fn latest_ingest_manifest(manifest_dir: &Path) -> Result<Option<PathBuf>> {
    if !manifest_dir.exists() {
        return Ok(None);
    }

    let mut candidates = Vec::new();
    for entry in fs::read_dir(manifest_dir)
        .with_context(|| format!("failed to read {}", manifest_dir.display()))?
    {
        let path = entry?.path();
        let is_run_manifest = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with("ingest_run_") && name.ends_with(".json"));
        if is_run_manifest {
            candidates.push(path);
        }
    }

    candidates.sort();
    Ok(candidates.pop())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

fn query_count(conn: &Connection, sql: &str) -> Result<i64> {
    let count = conn.query_row(sql, [], |row| row.get(0))?;
    Ok(count)
}
