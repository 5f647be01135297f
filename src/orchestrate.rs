use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::chapter::{self, NAV_FILENAME};
use crate::epub;
use crate::pipeline::{self, FileOutcome, PipelineConfig};
use crate::provider::Translator;
use crate::translate::LanguagePair;

/// Content-directory names tried before falling back to a search.
const CONTENT_DIR_CONVENTIONS: &[&str] = &["OEBPS", "OPS", "EPUB", "content", "text"];

/// Depth bound for the fallback content search; the worklist never recurses
/// deeper than this on adversarial trees.
const MAX_CONTENT_SEARCH_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    NotStarted,
    Extracting,
    TranslatingFiles(usize),
    Repackaging,
    Completed,
    CompletedWithError,
}

#[derive(Debug, Default)]
pub struct BookReport {
    pub translated: usize,
    pub skipped: usize,
    pub failed_file: Option<String>,
}

/// Tracks the single-run state machine. Extraction is never re-entered once
/// a working directory exists; resumability comes from reuse.
#[derive(Debug)]
pub struct BookRun {
    phase: RunPhase,
}

impl BookRun {
    pub fn new() -> Self {
        Self {
            phase: RunPhase::NotStarted,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    fn advance(&mut self, next: RunPhase) {
        tracing::debug!(from = ?self.phase, to = ?next, "book run phase");
        self.phase = next;
    }
}

impl Default for BookRun {
    fn default() -> Self {
        Self::new()
    }
}

/// Translates every chapter file of a book and repackages the result.
///
/// Chapter files run strictly in sequence; a failing file is recorded and
/// the remaining files still get their attempt. Repackaging is
/// unconditional, so a best-effort partial artifact always exists; only
/// after it is written does a recorded error surface to the caller.
pub async fn translate_book(
    translator: &dyn Translator,
    container: &Path,
    work_dir: &Path,
    out_path: &Path,
    langs: &LanguagePair,
    config: &PipelineConfig,
) -> anyhow::Result<BookReport> {
    let mut run = BookRun::new();

    if work_dir.exists() {
        tracing::info!(work_dir = %work_dir.display(), "reusing existing working directory");
    } else {
        run.advance(RunPhase::Extracting);
        epub::extract_container(container, work_dir)
            .with_context(|| format!("extract container: {}", container.display()))?;
    }

    let content_dir = find_content_dir(work_dir)?.ok_or_else(|| {
        anyhow::anyhow!("no content directory with markup files under {}", work_dir.display())
    })?;
    let candidates = chapter_candidates(&content_dir)?;
    tracing::info!(
        content_dir = %content_dir.display(),
        files = candidates.len(),
        "translating book"
    );

    let mut report = BookReport::default();
    let mut first_error: Option<anyhow::Error> = None;

    for (idx, file) in candidates.iter().enumerate() {
        run.advance(RunPhase::TranslatingFiles(idx));
        match pipeline::translate_chapter_file(translator, file, langs, config).await {
            Ok(FileOutcome::Translated { chunks }) => {
                tracing::info!(file = %file.display(), chunks, "chapter file translated");
                report.translated += 1;
            }
            Ok(FileOutcome::Skipped) => report.skipped += 1,
            Err(err) => {
                let name = file_name(file);
                tracing::error!(file = %file.display(), error = %format!("{err:#}"), "chapter file failed");
                if first_error.is_none() {
                    report.failed_file = Some(name.clone());
                    first_error = Some(err.context(format!("chapter file {name}")));
                }
            }
        }
    }

    run.advance(RunPhase::Repackaging);
    epub::pack_container(work_dir, out_path)
        .with_context(|| format!("repackage container: {}", out_path.display()))?;

    match first_error {
        Some(err) => {
            run.advance(RunPhase::CompletedWithError);
            Err(err)
        }
        None => {
            run.advance(RunPhase::Completed);
            Ok(report)
        }
    }
}

/// Locates the directory holding chapter markup: known conventions first,
/// then a depth-bounded worklist scan for the first directory that directly
/// contains a markup file.
pub fn find_content_dir(work_dir: &Path) -> anyhow::Result<Option<PathBuf>> {
    for name in CONTENT_DIR_CONVENTIONS {
        let candidate = work_dir.join(name);
        if candidate.is_dir() && dir_has_markup(&candidate)? {
            return Ok(Some(candidate));
        }
    }

    let mut worklist: Vec<(PathBuf, usize)> = vec![(work_dir.to_path_buf(), 0)];
    while let Some((dir, depth)) = worklist.pop() {
        if dir_has_markup(&dir)? {
            return Ok(Some(dir));
        }
        if depth >= MAX_CONTENT_SEARCH_DEPTH {
            continue;
        }

        let mut entries = std::fs::read_dir(&dir)
            .with_context(|| format!("read dir: {}", dir.display()))?
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("list dir: {}", dir.display()))?;
        // Worklist is a stack; reverse sort keeps visitation in name order.
        entries.sort_by_key(|e| std::cmp::Reverse(e.file_name()));
        for entry in entries {
            if entry.file_type().context("read entry type")?.is_dir() {
                worklist.push((entry.path(), depth + 1));
            }
        }
    }

    Ok(None)
}

fn dir_has_markup(dir: &Path) -> anyhow::Result<bool> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("read dir: {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("list dir: {}", dir.display()))?;
        if entry.file_type().context("read entry type")?.is_file()
            && chapter::is_markup_file(&entry.path())
        {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Markup files under the content directory in sorted order, minus the
/// navigation document.
fn chapter_candidates(content_dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    Ok(epub::list_files_recursively_sorted(content_dir)?
        .into_iter()
        .filter(|p| chapter::is_markup_file(p))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_none_or(|n| !n.eq_ignore_ascii_case(NAV_FILENAME))
        })
        .collect())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conventions_win_over_search() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("OEBPS")).unwrap();
        std::fs::create_dir_all(dir.path().join("aaa")).unwrap();
        std::fs::write(dir.path().join("OEBPS/ch1.xhtml"), "<p/>").unwrap();
        std::fs::write(dir.path().join("aaa/ch1.xhtml"), "<p/>").unwrap();

        let found = find_content_dir(dir.path()).unwrap().unwrap();
        assert_eq!(found, dir.path().join("OEBPS"));
    }

    #[test]
    fn fallback_search_finds_nested_markup() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("ch1.html"), "<p/>").unwrap();

        let found = find_content_dir(dir.path()).unwrap().unwrap();
        assert_eq!(found, nested);
    }

    #[test]
    fn empty_tree_finds_nothing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("empty")).unwrap();
        assert!(find_content_dir(dir.path()).unwrap().is_none());
    }

    #[test]
    fn candidates_exclude_the_navigation_document() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ch1.xhtml"), "<p/>").unwrap();
        std::fs::write(dir.path().join("nav.xhtml"), "<p/>").unwrap();
        std::fs::write(dir.path().join("style.css"), "p{}").unwrap();

        let candidates = chapter_candidates(dir.path()).unwrap();
        assert_eq!(candidates, vec![dir.path().join("ch1.xhtml")]);
    }

    #[test]
    fn run_phases_advance_in_order() {
        let mut run = BookRun::new();
        assert_eq!(run.phase(), RunPhase::NotStarted);
        run.advance(RunPhase::Extracting);
        run.advance(RunPhase::TranslatingFiles(0));
        run.advance(RunPhase::Repackaging);
        run.advance(RunPhase::Completed);
        assert_eq!(run.phase(), RunPhase::Completed);
    }
}
