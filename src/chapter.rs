use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

/// The EPUB3 navigation document; never a translation candidate and never
/// listed as a readable chapter.
pub const NAV_FILENAME: &str = "nav.xhtml";

const MARKUP_EXTENSIONS: &[&str] = &["xhtml", "html", "htm"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LanguageTag {
    Source,
    Target,
}

/// One paragraph of a chapter as rendered, in document order.
///
/// `index` is dense and 0-based over the chapter's paragraph stream; the
/// playback queue refers back to it regardless of filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParagraphRecord {
    pub text: String,
    pub lang: LanguageTag,
    pub index: usize,
}

/// Lists chapter document identifiers for an extracted container, in spine
/// order when an OPF package document can be found, falling back to a sorted
/// listing of markup files. Identifiers are paths relative to `root`.
pub fn list_chapters(root: &Path) -> anyhow::Result<Vec<String>> {
    if let Some(opf_path) = find_opf(root)?
        && let Some(chapters) = chapters_from_opf(root, &opf_path)?
    {
        return Ok(chapters);
    }

    let mut chapters = Vec::new();
    for path in markup_files_sorted(root)? {
        let rel = path
            .strip_prefix(root)
            .with_context(|| format!("strip chapter prefix: {}", path.display()))?;
        let rel = rel.to_string_lossy().replace('\\', "/");
        if is_nav(&rel) {
            continue;
        }
        chapters.push(rel);
    }
    Ok(chapters)
}

/// Extracts the ordered paragraph stream from chapter markup.
///
/// A paragraph whose `lang` attribute matches `target_lang` is tagged as the
/// translated side; everything else is the source side.
pub fn paragraph_stream(markup: &str, target_lang: &str) -> Vec<ParagraphRecord> {
    paragraph_elements(markup)
        .into_iter()
        .enumerate()
        .map(|(index, el)| {
            let lang = match el.lang.as_deref() {
                Some(lang) if lang.eq_ignore_ascii_case(target_lang) => LanguageTag::Target,
                _ => LanguageTag::Source,
            };
            ParagraphRecord {
                text: flatten_text(&el.inner),
                lang,
                index,
            }
        })
        .collect()
}

/// A `<p>` element located in chapter markup. `raw` spans the full element
/// including tags; `inner` is the content between them.
#[derive(Debug, Clone, PartialEq)]
pub struct ParagraphElement {
    pub raw: String,
    pub inner: String,
    pub lang: Option<String>,
}

/// Scans markup for top-level `<p>` elements in document order. Paragraphs
/// are assumed not to nest (they cannot in conforming XHTML).
pub fn paragraph_elements(markup: &str) -> Vec<ParagraphElement> {
    let mut elements = Vec::new();
    let mut cursor = 0usize;

    while let Some(rel) = find_paragraph_open(&markup[cursor..]) {
        let start = cursor + rel;
        let Some(open_end_rel) = markup[start..].find('>') else {
            break;
        };
        let open_end = start + open_end_rel + 1;

        let Some(close_rel) = find_ascii_case_insensitive(&markup[open_end..], "</p>") else {
            break;
        };
        let close_start = open_end + close_rel;
        let end = close_start + "</p>".len();

        let open_tag = &markup[start..open_end];
        elements.push(ParagraphElement {
            raw: markup[start..end].to_owned(),
            inner: markup[open_end..close_start].to_owned(),
            lang: attribute_value(open_tag, "lang"),
        });
        cursor = end;
    }

    elements
}

/// Inserts or replaces a `lang` attribute on a paragraph's opening tag.
pub fn tag_paragraph_lang(raw_element: &str, lang: &str) -> String {
    let Some(open_end) = raw_element.find('>') else {
        return raw_element.to_owned();
    };
    let open_tag = &raw_element[..open_end];
    let rest = &raw_element[open_end..];

    if let Some((attr_start, attr_end)) = attribute_span(open_tag, "lang") {
        let mut out = String::with_capacity(raw_element.len() + lang.len());
        out.push_str(&open_tag[..attr_start]);
        out.push_str(&format!("lang=\"{lang}\""));
        out.push_str(&open_tag[attr_end..]);
        out.push_str(rest);
        return out;
    }

    format!("{open_tag} lang=\"{lang}\"{rest}")
}

/// Flattens element content to speakable text: tags stripped, entities
/// decoded, whitespace collapsed.
pub fn flatten_text(inner: &str) -> String {
    let mut text = String::with_capacity(inner.len());
    let mut in_tag = false;
    for ch in inner.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => text.push(ch),
            _ => {}
        }
    }

    let decoded = xml_unescape(&text);
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn xml_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

pub fn xml_unescape(input: &str) -> String {
    input
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

pub fn is_markup_file(path: &Path) -> bool {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    MARKUP_EXTENSIONS.contains(&ext.as_str())
}

fn is_nav(rel_path: &str) -> bool {
    rel_path
        .rsplit('/')
        .next()
        .is_some_and(|name| name.eq_ignore_ascii_case(NAV_FILENAME))
}

fn find_paragraph_open(markup: &str) -> Option<usize> {
    let mut cursor = 0usize;
    loop {
        let rel = find_ascii_case_insensitive(&markup[cursor..], "<p")?;
        let start = cursor + rel;
        // `<p>` or `<p ...>` only; not `<pre>`, `<param>` etc.
        match markup[start + 2..].chars().next() {
            Some(c) if c == '>' || c == '/' || c.is_whitespace() => return Some(start),
            Some(_) => cursor = start + 2,
            None => return None,
        }
    }
}

fn find_ascii_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    let haystack_bytes = haystack.as_bytes();
    let needle_bytes = needle.as_bytes();
    if needle_bytes.is_empty() || haystack_bytes.len() < needle_bytes.len() {
        return None;
    }
    (0..=haystack_bytes.len() - needle_bytes.len()).find(|&i| {
        haystack_bytes[i..i + needle_bytes.len()].eq_ignore_ascii_case(needle_bytes)
    })
}

fn attribute_span(open_tag: &str, name: &str) -> Option<(usize, usize)> {
    let lower = open_tag.to_ascii_lowercase();
    let needle = format!("{name}=\"");
    let mut cursor = 0usize;
    loop {
        let rel = lower[cursor..].find(&needle)?;
        let start = cursor + rel;
        // Must begin a standalone attribute, not a suffix like `xml:lang=`.
        let preceded_ok = start == 0
            || lower.as_bytes()[start - 1].is_ascii_whitespace();
        let value_start = start + needle.len();
        let Some(end_rel) = open_tag[value_start..].find('"') else {
            return None;
        };
        let end = value_start + end_rel + 1;
        if preceded_ok {
            return Some((start, end));
        }
        cursor = end;
    }
}

fn attribute_value(open_tag: &str, name: &str) -> Option<String> {
    let (start, end) = attribute_span(open_tag, name)?;
    let value_start = start + name.len() + 2;
    Some(open_tag[value_start..end - 1].to_owned())
}

fn find_opf(root: &Path) -> anyhow::Result<Option<PathBuf>> {
    let container_xml = root.join("META-INF").join("container.xml");
    if container_xml.exists() {
        let contents = std::fs::read_to_string(&container_xml)
            .with_context(|| format!("read container.xml: {}", container_xml.display()))?;
        if let Some(full_path) = rootfile_full_path(&contents) {
            let candidate = root.join(&full_path);
            if candidate.exists() {
                return Ok(Some(candidate));
            }
        }
    }

    // Some containers skip META-INF; take the first .opf found.
    for path in files_sorted(root)? {
        if path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("opf"))
        {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

fn rootfile_full_path(container_xml: &str) -> Option<String> {
    let rel = find_ascii_case_insensitive(container_xml, "<rootfile")?;
    let tag_end = container_xml[rel..].find('>')? + rel;
    attribute_value(&container_xml[rel..=tag_end], "full-path")
}

fn chapters_from_opf(root: &Path, opf_path: &Path) -> anyhow::Result<Option<Vec<String>>> {
    let opf = std::fs::read_to_string(opf_path)
        .with_context(|| format!("read package document: {}", opf_path.display()))?;
    let opf_dir = opf_path.parent().unwrap_or(root);

    let mut hrefs_by_id: Vec<(String, String)> = Vec::new();
    let mut cursor = 0usize;
    while let Some(rel) = find_ascii_case_insensitive(&opf[cursor..], "<item ") {
        let start = cursor + rel;
        let Some(end_rel) = opf[start..].find('>') else {
            break;
        };
        let end = start + end_rel;
        let tag = &opf[start..=end];
        if let (Some(id), Some(href)) = (attribute_value(tag, "id"), attribute_value(tag, "href")) {
            hrefs_by_id.push((id, href));
        }
        cursor = end + 1;
    }

    let mut chapters = Vec::new();
    let mut cursor = 0usize;
    while let Some(rel) = find_ascii_case_insensitive(&opf[cursor..], "<itemref") {
        let start = cursor + rel;
        let Some(end_rel) = opf[start..].find('>') else {
            break;
        };
        let end = start + end_rel;
        let tag = &opf[start..=end];
        if let Some(idref) = attribute_value(tag, "idref")
            && let Some((_, href)) = hrefs_by_id.iter().find(|(id, _)| *id == idref)
        {
            let abs = opf_dir.join(href);
            if !abs.exists() || !is_markup_file(&abs) {
                cursor = end + 1;
                continue;
            }
            let rel_to_root = abs
                .strip_prefix(root)
                .with_context(|| format!("strip chapter prefix: {}", abs.display()))?
                .to_string_lossy()
                .replace('\\', "/");
            if !is_nav(&rel_to_root) {
                chapters.push(rel_to_root);
            }
        }
        cursor = end + 1;
    }

    if chapters.is_empty() {
        return Ok(None);
    }
    Ok(Some(chapters))
}

fn markup_files_sorted(root: &Path) -> anyhow::Result<Vec<PathBuf>> {
    Ok(files_sorted(root)?
        .into_iter()
        .filter(|p| is_markup_file(p))
        .collect())
}

fn files_sorted(root: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(current) = stack.pop() {
        let mut entries = std::fs::read_dir(&current)
            .with_context(|| format!("read dir: {}", current.display()))?
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("list dir: {}", current.display()))?;
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let path = entry.path();
            let file_type = entry.file_type().context("read entry type")?;
            if file_type.is_dir() {
                stack.push(path);
            } else if file_type.is_file() {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paragraph_stream_tags_by_lang_attribute() {
        let markup = r#"<html><body>
<p lang="ja">こんにちは</p>
<p>Hello</p>
<p lang="ja">世界</p>
<p>World</p>
</body></html>"#;

        let stream = paragraph_stream(markup, "ja");
        assert_eq!(stream.len(), 4);
        assert_eq!(stream[0].lang, LanguageTag::Target);
        assert_eq!(stream[1].lang, LanguageTag::Source);
        assert_eq!(stream[0].text, "こんにちは");
        assert_eq!(stream[1].text, "Hello");
        assert_eq!(stream[3].index, 3);
    }

    #[test]
    fn paragraph_elements_skip_pre_and_keep_attrs() {
        let markup = "<pre>code</pre><p class=\"x\">One</p><p>Two</p>";
        let els = paragraph_elements(markup);
        assert_eq!(els.len(), 2);
        assert_eq!(els[0].inner, "One");
        assert_eq!(els[1].inner, "Two");
    }

    #[test]
    fn flatten_text_strips_markup_and_entities() {
        assert_eq!(
            flatten_text("A <em>bold</em>\n  claim &amp; more"),
            "A bold claim & more"
        );
    }

    #[test]
    fn tag_paragraph_lang_inserts_and_replaces() {
        assert_eq!(
            tag_paragraph_lang("<p>Hi</p>", "en"),
            "<p lang=\"en\">Hi</p>"
        );
        assert_eq!(
            tag_paragraph_lang("<p lang=\"ja\" class=\"a\">Hi</p>", "en"),
            "<p lang=\"en\" class=\"a\">Hi</p>"
        );
    }

    #[test]
    fn lang_attribute_ignores_xml_lang_suffix() {
        let els = paragraph_elements("<p xml:lang=\"ja\">Hi</p>");
        assert_eq!(els[0].lang, None);
    }

    #[test]
    fn spine_order_wins_over_listing_order() {
        let dir = tempfile::tempdir().unwrap();
        let oebps = dir.path().join("OEBPS");
        std::fs::create_dir_all(oebps.join("text")).unwrap();
        std::fs::create_dir_all(dir.path().join("META-INF")).unwrap();

        std::fs::write(
            dir.path().join("META-INF/container.xml"),
            r#"<?xml version="1.0"?>
<container><rootfiles>
  <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
</rootfiles></container>"#,
        )
        .unwrap();
        std::fs::write(
            oebps.join("content.opf"),
            r#"<package>
<manifest>
  <item id="b" href="text/b.xhtml" media-type="application/xhtml+xml"/>
  <item id="a" href="text/a.xhtml" media-type="application/xhtml+xml"/>
  <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml"/>
</manifest>
<spine>
  <itemref idref="b"/>
  <itemref idref="a"/>
  <itemref idref="nav"/>
</spine>
</package>"#,
        )
        .unwrap();
        std::fs::write(oebps.join("text/a.xhtml"), "<p>a</p>").unwrap();
        std::fs::write(oebps.join("text/b.xhtml"), "<p>b</p>").unwrap();
        std::fs::write(oebps.join("nav.xhtml"), "<p>nav</p>").unwrap();

        let chapters = list_chapters(dir.path()).unwrap();
        assert_eq!(chapters, vec!["OEBPS/text/b.xhtml", "OEBPS/text/a.xhtml"]);
    }

    #[test]
    fn listing_fallback_without_opf_excludes_nav() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("content")).unwrap();
        std::fs::write(dir.path().join("content/ch2.xhtml"), "<p>2</p>").unwrap();
        std::fs::write(dir.path().join("content/ch1.xhtml"), "<p>1</p>").unwrap();
        std::fs::write(dir.path().join("content/nav.xhtml"), "<p>n</p>").unwrap();
        std::fs::write(dir.path().join("content/style.css"), "p{}").unwrap();

        let chapters = list_chapters(dir.path()).unwrap();
        assert_eq!(chapters, vec!["content/ch1.xhtml", "content/ch2.xhtml"]);
    }
}
