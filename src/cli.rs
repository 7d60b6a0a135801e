use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "cpgparse",
    version,
    about = "Clinical practice guideline structuring and chunking tooling"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Inventory(InventoryArgs),
    Ingest(IngestArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct InventoryArgs {
    #[arg(long, env = "CPG_CACHE_ROOT", default_value = ".cache/cpgparse")]
    pub cache_root: PathBuf,

    /// Directory holding guideline documents; defaults to `<cache-root>/sources`.
    #[arg(long)]
    pub source_dir: Option<PathBuf>,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct IngestArgs {
    #[arg(long, env = "CPG_CACHE_ROOT", default_value = ".cache/cpgparse")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub source_dir: Option<PathBuf>,

    #[arg(long)]
    pub inventory_manifest_path: Option<PathBuf>,

    #[arg(long)]
    pub ingest_manifest_path: Option<PathBuf>,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long)]
    pub processed_dir: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub refresh_inventory: bool,

    #[arg(long, default_value_t = 1200)]
    pub chunk_size: usize,

    #[arg(long, default_value_t = 2000)]
    pub max_chunk_size: usize,

    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub context_markers: bool,

    #[arg(long, value_enum, default_value_t = TableDetection::Layout)]
    pub table_detection: TableDetection,

    #[arg(long, value_enum, default_value_t = VisionMode::Auto)]
    pub vision: VisionMode,

    #[arg(long, env = "VISION_MODEL", default_value = "google/gemini-2.0-flash-001")]
    pub vision_model: String,

    /// Falls back to `GEMINI_API_KEY` when unset.
    #[arg(long, env = "OPENROUTER_API_KEY", hide_env_values = true)]
    pub vision_api_key: Option<String>,

    #[arg(
        long,
        env = "OPENROUTER_BASE_URL",
        default_value = "https://openrouter.ai/api/v1"
    )]
    pub vision_base_url: String,

    #[arg(long, default_value_t = 4)]
    pub vision_concurrency: usize,

    #[arg(long, default_value_t = 90)]
    pub vision_timeout_secs: u64,

    #[arg(long, default_value_t = false)]
    pub extract_entities: bool,

    #[arg(long)]
    pub max_pages_per_doc: Option<usize>,

    #[arg(long = "only")]
    pub only_doc_ids: Vec<String>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum TableDetection {
    Layout,
    Provided,
    Off,
}

impl TableDetection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Layout => "layout",
            Self::Provided => "provided",
            Self::Off => "off",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum VisionMode {
    Auto,
    Off,
}

impl VisionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Off => "off",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, env = "CPG_CACHE_ROOT", default_value = ".cache/cpgparse")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,
}
