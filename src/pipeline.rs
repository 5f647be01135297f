use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;

use crate::chunk::{self, CHUNK_BYTE_LIMIT};
use crate::provider::Translator;
use crate::translate::{self, LanguagePair, MismatchPolicy, TRANSLATED_MARKER};

/// Cooldown after each successfully rewritten file. The provider is rate
/// sensitive; sequential access plus this delay keeps it tolerant.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub chunk_limit: usize,
    pub cooldown: Duration,
    pub mismatch_policy: MismatchPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_limit: CHUNK_BYTE_LIMIT,
            cooldown: DEFAULT_COOLDOWN,
            mismatch_policy: MismatchPolicy::BestEffort,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Translated { chunks: usize },
    Skipped,
}

/// Runs the chunker and chunk translator over one chapter file and rewrites
/// it in place.
///
/// A file already carrying the translated marker is left untouched. The
/// rewrite is destructive to the working copy and partial writes are not
/// rolled back; an interrupted run can leave a half-translated file behind.
pub async fn translate_chapter_file(
    translator: &dyn Translator,
    path: &Path,
    langs: &LanguagePair,
    config: &PipelineConfig,
) -> anyhow::Result<FileOutcome> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("read chapter file: {}", path.display()))?;

    if contents.contains(TRANSLATED_MARKER) {
        tracing::info!(file = %path.display(), "chapter already translated; skipping");
        return Ok(FileOutcome::Skipped);
    }

    let chunks = chunk::chunk_lines(&contents, config.chunk_limit);
    tracing::info!(
        file = %path.display(),
        chunks = chunks.len(),
        "translating chapter file"
    );

    let mut out = String::with_capacity(contents.len() * 2);
    for (idx, chunk) in chunks.iter().enumerate() {
        let fragment = chunk.text();
        let translated =
            translate::translate_chunk(translator, &fragment, langs, config.mismatch_policy)
                .await
                .with_context(|| format!("chunk {idx} of {}", path.display()))?;
        out.push_str(&translated);
    }

    out.push_str(TRANSLATED_MARKER);
    out.push('\n');
    out.push_str("</body>\n</html>\n");

    std::fs::write(path, &out)
        .with_context(|| format!("write translated chapter: {}", path.display()))?;

    if !config.cooldown.is_zero() {
        tracing::debug!(secs = config.cooldown.as_secs(), "provider cooldown");
        tokio::time::sleep(config.cooldown).await;
    }

    Ok(FileOutcome::Translated {
        chunks: chunks.len(),
    })
}
