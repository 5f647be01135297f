use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser as _;

use bibliovox::cache::TranslationCache;
use bibliovox::cli::{ChaptersArgs, Cli, Command, TranslateArgs};
use bibliovox::pipeline::PipelineConfig;
use bibliovox::translate::LanguagePair;
use bibliovox::{chapter, epub, orchestrate, provider};

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    bibliovox::logging::init().context("init logging")?;

    let cli = Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        Command::Translate(args) => translate(args).await.context("translate")?,
        Command::Chapters(args) => chapters(args).context("chapters")?,
    }

    Ok(())
}

async fn translate(args: TranslateArgs) -> anyhow::Result<()> {
    let input = PathBuf::from(&args.input);
    let out = PathBuf::from(&args.out);
    let work_dir = args
        .work_dir
        .as_deref()
        .map(PathBuf::from)
        .unwrap_or_else(|| out.with_extension("work"));

    let cache = TranslationCache::open(&PathBuf::from(&args.cache))
        .context("open translation cache")?;
    let translator = provider::build_translator(args.engine, &args.endpoint_url, Some(cache))
        .context("build translator")?;

    let langs = LanguagePair::new(args.from.trim(), args.to.trim());
    let config = PipelineConfig {
        chunk_limit: args.chunk_limit,
        cooldown: Duration::from_secs(args.cooldown_secs),
        mismatch_policy: args.on_mismatch,
    };

    let report = orchestrate::translate_book(
        translator.as_ref(),
        &input,
        &work_dir,
        &out,
        &langs,
        &config,
    )
    .await?;

    tracing::info!(
        translated = report.translated,
        skipped = report.skipped,
        out = %out.display(),
        "book translated"
    );
    Ok(())
}

fn chapters(args: ChaptersArgs) -> anyhow::Result<()> {
    let input = PathBuf::from(&args.input);
    let tmp = tempfile::tempdir().context("create inspection dir")?;

    epub::extract_container(&input, tmp.path())
        .with_context(|| format!("extract container: {}", input.display()))?;
    for chapter_id in chapter::list_chapters(tmp.path()).context("list chapters")? {
        println!("{chapter_id}");
    }
    Ok(())
}
