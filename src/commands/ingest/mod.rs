use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use rusqlite::{Connection, params};
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::{IngestArgs, TableDetection, VisionMode};
use crate::commands::inventory;
use crate::model::{
    DocumentOutputs, DocumentResult, IngestCounts, IngestPaths, IngestRunManifest,
    IngestSettings, SourceEntry, SourceInventoryManifest, ToolVersions,
};
use crate::sources::{LoadOptions, load_document};
use crate::structure::chunking::ChunkingConfig;
use crate::structure::document::SourceDocument;
use crate::structure::entities::{EntityExtractor, KeywordEntityExtractor};
use crate::structure::hierarchy::SectionTree;
use crate::structure::tables::{LayoutTableFinder, ProvidedTableFinder, TableFinder};
use crate::structure::vision::{
    AlgorithmExtraction, OpenAiVisionConfig, OpenAiVisionDescriber, VisionOptions,
    describe_algorithms,
};
use crate::structure::{DocumentIdentity, DocumentMetadata, StructuredDocument, Structurer};
use crate::util::{
    ensure_directory, now_utc_string, utc_compact_string, write_json_pretty, write_text,
};

const DB_SCHEMA_VERSION: &str = "1.0.0";
const VISION_MAX_TOKENS: u32 = 1000;

mod db_setup;
mod pipeline;
mod run;

pub use run::{default_db_path, run};

use db_setup::*;
use pipeline::*;
