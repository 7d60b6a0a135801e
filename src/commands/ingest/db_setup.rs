use super::*;

fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    Ok(())
}

pub(super) fn open_index(db_path: &Path) -> Result<Connection> {
    if let Some(parent) = db_path.parent() {
        ensure_directory(parent)?;
    }
    let connection = Connection::open(db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    configure_connection(&connection)?;
    ensure_schema(&connection)?;
    Ok(connection)
}

fn ensure_schema(connection: &Connection) -> Result<()> {
    connection.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS metadata (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS docs (
          doc_id TEXT PRIMARY KEY,
          filename TEXT NOT NULL,
          sha256 TEXT NOT NULL,
          format TEXT NOT NULL,
          title TEXT,
          page_count INTEGER,
          chunk_count INTEGER,
          parsed_at TEXT
        );

        CREATE TABLE IF NOT EXISTS chunks (
          chunk_id TEXT PRIMARY KEY,
          doc_id TEXT NOT NULL,
          chunk_index INTEGER NOT NULL,
          chunk_type TEXT NOT NULL,
          heading TEXT,
          parent_section TEXT,
          text TEXT NOT NULL,
          is_recommendation INTEGER NOT NULL,
          evidence_level TEXT,
          grade TEXT,
          target_population TEXT NOT NULL,
          category TEXT,
          page_start INTEGER,
          page_end INTEGER,
          token_count INTEGER NOT NULL,
          table_json TEXT,
          entities_json TEXT,
          metadata_json TEXT NOT NULL,
          FOREIGN KEY(doc_id) REFERENCES docs(doc_id)
        );
        ",
    )?;

    connection
        .execute(
            "
            CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts
            USING fts5(chunk_id, doc_id, heading, text, content='chunks', content_rowid='rowid')
            ",
            [],
        )
        .context("failed to initialize FTS5 table chunks_fts")?;

    connection.execute_batch(
        "
        CREATE INDEX IF NOT EXISTS idx_chunks_doc_index ON chunks(doc_id, chunk_index);
        CREATE INDEX IF NOT EXISTS idx_chunks_doc_type ON chunks(doc_id, chunk_type);
        CREATE INDEX IF NOT EXISTS idx_chunks_grade ON chunks(grade);
        CREATE INDEX IF NOT EXISTS idx_chunks_population ON chunks(target_population);
        ",
    )?;

    let now = now_utc_string();
    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [DB_SCHEMA_VERSION],
    )?;
    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_updated_at', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [now],
    )?;

    Ok(())
}

/// Replaces every stored row of one document inside a single transaction.
pub(super) fn replace_document(
    connection: &mut Connection,
    entry: &SourceEntry,
    structured: &StructuredDocument,
) -> Result<usize> {
    let tx = connection.transaction()?;
    let metadata = &structured.metadata;

    tx.execute("DELETE FROM chunks WHERE doc_id = ?1", [&entry.doc_id])
        .with_context(|| format!("failed to clear chunks for {}", entry.doc_id))?;

    tx.execute(
        "
        INSERT INTO docs(doc_id, filename, sha256, format, title, page_count, chunk_count, parsed_at)
        VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ON CONFLICT(doc_id) DO UPDATE SET
          filename=excluded.filename,
          sha256=excluded.sha256,
          format=excluded.format,
          title=excluded.title,
          page_count=excluded.page_count,
          chunk_count=excluded.chunk_count,
          parsed_at=excluded.parsed_at
        ",
        params![
            &entry.doc_id,
            &entry.filename,
            &entry.sha256,
            entry.format.as_str(),
            &metadata.title,
            metadata.page_count as i64,
            metadata.total_chunks as i64,
            &metadata.parse_timestamp,
        ],
    )?;

    {
        let mut statement = tx.prepare(
            "
            INSERT INTO chunks(
              chunk_id, doc_id, chunk_index, chunk_type, heading, parent_section, text,
              is_recommendation, evidence_level, grade, target_population, category,
              page_start, page_end, token_count, table_json, entities_json, metadata_json
            )
            VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
            ",
        )?;

        for chunk in &structured.chunks {
            let chunk_type = if chunk.is_table {
                "table"
            } else if chunk.is_algorithm {
                "algorithm"
            } else {
                "section"
            };
            let table_json = chunk
                .table_data
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            let entities_json = if chunk.entities.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&chunk.entities)?)
            };

            statement.execute(params![
                chunk_id_for(&entry.doc_id, chunk.index),
                &entry.doc_id,
                chunk.index as i64,
                chunk_type,
                chunk.section_hierarchy.join(" > "),
                chunk.parent_section.as_deref(),
                &chunk.content,
                chunk.is_recommendation,
                chunk.evidence_level.map(|level| level.as_str()),
                chunk.grade.map(|grade| grade.as_str()),
                &chunk.target_population,
                chunk.category.map(|category| category.as_str()),
                chunk.page_numbers.first().map(|page| i64::from(*page)),
                chunk.page_numbers.last().map(|page| i64::from(*page)),
                chunk.token_count as i64,
                table_json,
                entities_json,
                serde_json::to_string(&chunk.metadata)?,
            ])?;
        }
    }

    tx.commit()?;
    Ok(structured.chunks.len())
}

pub(super) fn chunk_id_for(doc_id: &str, index: usize) -> String {
    format!("{doc_id}:{index:05}")
}

pub(super) fn sync_fts_index(connection: &Connection) -> Result<()> {
    connection
        .execute("INSERT INTO chunks_fts(chunks_fts) VALUES('rebuild')", [])
        .context("failed to rebuild FTS index")?;
    Ok(())
}

pub(super) fn count_rows(connection: &Connection, sql: &str) -> Result<i64> {
    let count = connection.query_row(sql, [], |row| row.get(0))?;
    Ok(count)
}
