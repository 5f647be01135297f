use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;

use crate::cache::TranslationCache;

/// Default public endpoint. The lightweight mobile page answers plain GET
/// requests and carries the translation inside a marked container element.
pub const DEFAULT_ENDPOINT_URL: &str = "https://translate.google.com/m";

/// Attribute marking the element that carries the translated text in the
/// endpoint's response markup.
const RESULT_MARKER: &str = "class=\"result-container\"";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// The translation capability. Fallible and slow; callers do not retry here.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> anyhow::Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslateEngine {
    /// Echo the input unchanged (dry runs, tests).
    Noop,
    /// Drive the public web endpoint.
    Endpoint,
}

/// Builds the provider stack for an engine choice, with the cache layered on
/// top of any real provider.
pub fn build_translator(
    engine: TranslateEngine,
    endpoint_url: &str,
    cache: Option<TranslationCache>,
) -> anyhow::Result<Arc<dyn Translator>> {
    let inner: Arc<dyn Translator> = match engine {
        TranslateEngine::Noop => Arc::new(NoopTranslator),
        TranslateEngine::Endpoint => Arc::new(EndpointTranslator::new(endpoint_url)?),
    };
    match cache {
        Some(cache) => Ok(Arc::new(CachedTranslator::new(inner, cache))),
        None => Ok(inner),
    }
}

pub struct NoopTranslator;

#[async_trait]
impl Translator for NoopTranslator {
    async fn translate(
        &self,
        text: &str,
        _source_lang: &str,
        _target_lang: &str,
    ) -> anyhow::Result<String> {
        Ok(text.to_owned())
    }
}

pub struct EndpointTranslator {
    client: reqwest::Client,
    endpoint: String,
}

impl EndpointTranslator {
    pub fn new(endpoint_url: &str) -> anyhow::Result<Self> {
        let endpoint = endpoint_url.trim_end_matches('/').to_owned();
        if endpoint.is_empty() {
            anyhow::bail!("translation endpoint url is empty");
        }
        url::Url::parse(&endpoint)
            .with_context(|| format!("invalid translation endpoint url: {endpoint}"))?;

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("build translation http client")?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl Translator for EndpointTranslator {
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> anyhow::Result<String> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("sl", source_lang), ("tl", target_lang), ("q", text)])
            .send()
            .await
            .with_context(|| format!("GET {}", self.endpoint))?;

        let status = response.status();
        let body = response.text().await.context("read translation response")?;
        if !status.is_success() {
            anyhow::bail!("translation endpoint error ({status}): {}", excerpt(&body));
        }

        extract_marked_text(&body)
            .ok_or_else(|| anyhow::anyhow!("no translation marker in response: {}", excerpt(&body)))
    }
}

/// Pulls the text content of the first element carrying the result marker.
fn extract_marked_text(markup: &str) -> Option<String> {
    let marker = markup.find(RESULT_MARKER)?;
    let open_end = markup[marker..].find('>')? + marker + 1;
    let close = markup[open_end..].find('<')? + open_end;
    let raw = markup[open_end..close].trim();
    if raw.is_empty() {
        return None;
    }
    Some(crate::chapter::xml_unescape(raw))
}

fn excerpt(body: &str) -> String {
    const MAX: usize = 200;
    let trimmed = body.trim();
    match trimmed.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}…", &trimmed[..idx]),
        None => trimmed.to_owned(),
    }
}

/// Memoizing wrapper: same (text, language pair) always resolves to the same
/// translation once seen, and every fresh translation is persisted before it
/// is returned.
pub struct CachedTranslator {
    inner: Arc<dyn Translator>,
    cache: TranslationCache,
}

impl CachedTranslator {
    pub fn new(inner: Arc<dyn Translator>, cache: TranslationCache) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl Translator for CachedTranslator {
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> anyhow::Result<String> {
        let key = TranslationCache::key(text, source_lang, target_lang);
        if let Some(hit) = self.cache.get(&key) {
            tracing::debug!(key = %key, "translation cache hit");
            return Ok(hit);
        }

        let translated = self.inner.translate(text, source_lang, target_lang).await?;
        self.cache
            .insert(&key, &translated)
            .context("persist translation cache entry")?;
        Ok(translated)
    }
}
