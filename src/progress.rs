use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::player::{VisibilityFilter, VoiceSettings};

/// Where a book's reader should resume: always the *next* paragraph, written
/// only after the previous one finished speaking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedProgress {
    pub book: String,
    pub last_chapter: String,
    pub last_paragraph_index: usize,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn get(&self, book: &str) -> anyhow::Result<Option<SavedProgress>>;
    async fn set(&self, progress: &SavedProgress) -> anyhow::Result<()>;
}

/// Flat-file store: one JSON map of book id to progress, rewritten
/// atomically on every save.
#[derive(Debug, Clone)]
pub struct LocalFsProgressStore {
    path: PathBuf,
}

impl LocalFsProgressStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: base_dir.into().join("progress.json"),
        }
    }

    async fn load(&self) -> anyhow::Result<BTreeMap<String, SavedProgress>> {
        read_json(&self.path)
            .await
            .map(Option::unwrap_or_default)
            .with_context(|| format!("read progress: {}", self.path.display()))
    }
}

#[async_trait]
impl ProgressStore for LocalFsProgressStore {
    async fn get(&self, book: &str) -> anyhow::Result<Option<SavedProgress>> {
        Ok(self.load().await?.remove(book))
    }

    async fn set(&self, progress: &SavedProgress) -> anyhow::Result<()> {
        let mut all = self.load().await?;
        all.insert(progress.book.clone(), progress.clone());
        write_json_atomic(&self.path, &all)
            .await
            .context("write progress")
    }
}

/// Client-visible reader preferences: playback voices per language,
/// visibility filter, and the cosmetic bits the reader page restores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderPrefs {
    pub source_voice: VoiceSettings,
    pub target_voice: VoiceSettings,
    pub visibility: VisibilityFilter,
    pub font_px: u32,
    pub panel_open: bool,
}

impl Default for ReaderPrefs {
    fn default() -> Self {
        Self {
            source_voice: VoiceSettings::default(),
            target_voice: VoiceSettings::default(),
            visibility: VisibilityFilter::default(),
            font_px: 18,
            panel_open: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocalFsPrefsStore {
    path: PathBuf,
}

impl LocalFsPrefsStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: base_dir.into().join("prefs.json"),
        }
    }

    pub async fn get(&self) -> anyhow::Result<ReaderPrefs> {
        read_json(&self.path)
            .await
            .map(Option::unwrap_or_default)
            .with_context(|| format!("read prefs: {}", self.path.display()))
    }

    pub async fn set(&self, prefs: &ReaderPrefs) -> anyhow::Result<()> {
        write_json_atomic(&self.path, prefs)
            .await
            .context("write prefs")
    }
}

pub async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let value = serde_json::from_slice(&bytes).context("parse json")?;
    Ok(Some(value))
}

pub async fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    tokio::fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    tokio::fs::write(&tmp_path, &data)
        .await
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}
