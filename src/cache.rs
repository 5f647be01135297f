use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context as _;
use sha2::Digest as _;

/// Durable memoization of provider calls.
///
/// The whole map is loaded once at open and every insert is written through
/// to disk immediately, so a crash never loses a paid-for translation.
/// Entries are never invalidated within a run.
#[derive(Clone)]
pub struct TranslationCache {
    path: PathBuf,
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl TranslationCache {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let entries = match std::fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("parse translation cache: {}", path.display()))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("read translation cache: {}", path.display())
                });
            }
        };

        tracing::debug!(path = %path.display(), entries = entries.len(), "opened translation cache");
        Ok(Self {
            path: path.to_owned(),
            entries: Arc::new(Mutex::new(entries)),
        })
    }

    /// Deterministic key over the full request triple.
    pub fn key(text: &str, source_lang: &str, target_lang: &str) -> String {
        let mut hasher = sha2::Sha256::new();
        hasher.update(source_lang.as_bytes());
        hasher.update([0x1f]);
        hasher.update(target_lang.as_bytes());
        hasher.update([0x1f]);
        hasher.update(text.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .expect("translation cache lock poisoned")
            .get(key)
            .cloned()
    }

    pub fn insert(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let snapshot = {
            let mut entries = self
                .entries
                .lock()
                .expect("translation cache lock poisoned");
            entries.insert(key.to_owned(), value.to_owned());
            entries.clone()
        };
        self.persist(&snapshot)
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .expect("translation cache lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn persist(&self, entries: &HashMap<String, String>) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create cache dir: {}", parent.display()))?;
        }

        let data = serde_json::to_vec_pretty(entries).context("serialize translation cache")?;
        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, &data)
            .with_context(|| format!("write cache tmp: {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("rename cache into place: {}", self.path.display()))?;
        Ok(())
    }
}
