use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::TranslateEngine;
use crate::translate::MismatchPolicy;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BookStatus {
    Uploaded,
    Translating,
    Done,
    Error,
}

/// One stored book and the state of its translation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookRecord {
    pub book_id: String,
    pub title: String,
    pub status: BookStatus,
    pub message: String,

    pub source_lang: Option<String>,
    pub target_lang: Option<String>,

    pub created_at: DateTime<Utc>,
    pub translated_at: Option<DateTime<Utc>>,

    pub original_path: PathBuf,
    pub work_dir: PathBuf,
    pub translated_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslateBookRequest {
    pub source_lang: String,
    pub target_lang: String,

    #[serde(default = "TranslateBookRequest::default_engine")]
    pub engine: TranslateEngine,
    #[serde(default = "TranslateBookRequest::default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default)]
    pub fail_on_mismatch: bool,
}

impl TranslateBookRequest {
    pub fn default_engine() -> TranslateEngine {
        TranslateEngine::Endpoint
    }

    pub fn default_cooldown_secs() -> u64 {
        crate::pipeline::DEFAULT_COOLDOWN.as_secs()
    }

    pub fn mismatch_policy(&self) -> MismatchPolicy {
        if self.fail_on_mismatch {
            MismatchPolicy::Fail
        } else {
            MismatchPolicy::BestEffort
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveProgressRequest {
    pub book: String,
    pub chapter: String,
    pub paragraph_index: usize,
}
