use anyhow::Context as _;

use crate::chapter::{self, ParagraphElement};
use crate::provider::Translator;

/// Paragraph texts travel to the provider as one request body joined on
/// this delimiter, and the response is split on it again.
pub const PARAGRAPH_DELIMITER: &str = "\n\n";

/// Marker stamped into a rewritten chapter file; its presence makes the
/// pipeline a no-op on a second run.
pub const TRANSLATED_MARKER: &str = "<!-- bilingual:translated -->";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum MismatchPolicy {
    /// Pair by position when the translated paragraph count disagrees with
    /// the original count; positions past the translated tail keep their
    /// original text. Lossy, never fatal.
    #[default]
    BestEffort,
    /// Fail the chunk instead.
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguagePair {
    pub source: String,
    pub target: String,
}

impl LanguagePair {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Translates one chunk of chapter markup into an interleaved bilingual
/// fragment.
///
/// The part of the fragment before the first paragraph (the structural
/// header) is kept verbatim. Each paragraph becomes a translated element
/// tagged with the target language immediately followed by the original
/// element tagged with the source language. A fragment with no paragraphs
/// at all (header-only or a boundary artifact) passes through unchanged.
///
/// One provider call per chunk, no internal retry: failures propagate.
pub async fn translate_chunk(
    translator: &dyn Translator,
    fragment: &str,
    langs: &LanguagePair,
    policy: MismatchPolicy,
) -> anyhow::Result<String> {
    let paragraphs = chapter::paragraph_elements(fragment);
    if paragraphs.is_empty() {
        return Ok(fragment.to_owned());
    }

    let header = match fragment.find(&paragraphs[0].raw) {
        Some(pos) => &fragment[..pos],
        None => "",
    };

    let texts: Vec<String> = paragraphs
        .iter()
        .map(|p| chapter::flatten_text(&p.inner))
        .collect();
    let request_body = texts.join(PARAGRAPH_DELIMITER);

    let translated = translator
        .translate(&request_body, &langs.source, &langs.target)
        .await
        .context("translate chunk")?;

    let translated_parts: Vec<&str> = translated.split(PARAGRAPH_DELIMITER).collect();
    if translated_parts.len() != paragraphs.len() {
        match policy {
            MismatchPolicy::Fail => anyhow::bail!(
                "translated paragraph count {} does not match original count {}",
                translated_parts.len(),
                paragraphs.len()
            ),
            MismatchPolicy::BestEffort => tracing::warn!(
                original = paragraphs.len(),
                translated = translated_parts.len(),
                "paragraph count mismatch after translation; pairing by position"
            ),
        }
    }

    Ok(interleave(
        header,
        &paragraphs,
        &texts,
        &translated_parts,
        langs,
    ))
}

fn interleave(
    header: &str,
    paragraphs: &[ParagraphElement],
    original_texts: &[String],
    translated_parts: &[&str],
    langs: &LanguagePair,
) -> String {
    let mut out = String::with_capacity(header.len() + paragraphs.len() * 128);
    out.push_str(header);
    if !header.is_empty() && !header.ends_with('\n') {
        out.push('\n');
    }

    for (idx, paragraph) in paragraphs.iter().enumerate() {
        let translated_text = translated_parts
            .get(idx)
            .map(|part| part.trim())
            .filter(|part| !part.is_empty())
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| original_texts[idx].clone());

        out.push_str(&format!(
            "<p lang=\"{}\">{}</p>\n",
            langs.target,
            chapter::xml_escape(&translated_text)
        ));
        out.push_str(&chapter::tag_paragraph_lang(&paragraph.raw, &langs.source));
        out.push('\n');
    }

    out
}
