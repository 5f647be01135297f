use clap::{Args, Parser, Subcommand};

use crate::provider::TranslateEngine;
use crate::translate::MismatchPolicy;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Translate every chapter of an EPUB and repackage it.
    Translate(TranslateArgs),
    /// List the chapter documents of an EPUB in reading order.
    Chapters(ChaptersArgs),
}

#[derive(Debug, Args)]
pub struct TranslateArgs {
    /// Input EPUB container.
    #[arg(long)]
    pub input: String,

    /// Output path for the bilingual EPUB.
    #[arg(long)]
    pub out: String,

    /// Working directory for the unpacked tree (reused when it exists, so an
    /// interrupted run resumes instead of re-extracting).
    #[arg(long)]
    pub work_dir: Option<String>,

    /// Source language code (e.g. en).
    #[arg(long)]
    pub from: String,

    /// Target language code (e.g. ja).
    #[arg(long)]
    pub to: String,

    /// Translation engine.
    #[arg(long, value_enum, default_value_t = TranslateEngine::Endpoint)]
    pub engine: TranslateEngine,

    /// Web translation endpoint (engine=endpoint).
    #[arg(long, default_value = crate::provider::DEFAULT_ENDPOINT_URL)]
    pub endpoint_url: String,

    /// Delay after each translated chapter file.
    #[arg(long, default_value_t = 120)]
    pub cooldown_secs: u64,

    /// Byte ceiling per translation request.
    #[arg(long, default_value_t = crate::chunk::CHUNK_BYTE_LIMIT)]
    pub chunk_limit: usize,

    /// Translation cache file.
    #[arg(long, default_value = "bilingual-cache.json")]
    pub cache: String,

    /// What to do when the provider returns a different paragraph count.
    #[arg(long, value_enum, default_value_t = MismatchPolicy::BestEffort)]
    pub on_mismatch: MismatchPolicy,
}

#[derive(Debug, Args)]
pub struct ChaptersArgs {
    /// Input EPUB container.
    #[arg(long)]
    pub input: String,
}
