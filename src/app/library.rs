use std::path::PathBuf;

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::Utc;
use tokio::fs;

use crate::app::model::{BookRecord, BookStatus};
use crate::progress::{read_json, write_json_atomic};

/// The upload/storage collaborator: accepts a container file, hands back a
/// handle, and lists what it holds.
#[async_trait]
pub trait BookLibrary: Send + Sync {
    async fn store(&self, file_name: &str, bytes: &[u8]) -> anyhow::Result<BookRecord>;
    async fn get(&self, book_id: &str) -> anyhow::Result<Option<BookRecord>>;
    async fn list(&self) -> anyhow::Result<Vec<BookRecord>>;
    async fn put(&self, record: &BookRecord) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct LocalFsLibrary {
    base_dir: PathBuf,
}

impl LocalFsLibrary {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn books_dir(&self) -> PathBuf {
        self.base_dir.join("books")
    }

    fn book_dir(&self, book_id: &str) -> PathBuf {
        self.books_dir().join(book_id)
    }

    fn record_path(&self, book_id: &str) -> PathBuf {
        self.book_dir(book_id).join("book.json")
    }
}

#[async_trait]
impl BookLibrary for LocalFsLibrary {
    async fn store(&self, file_name: &str, bytes: &[u8]) -> anyhow::Result<BookRecord> {
        let book_id = uuid::Uuid::new_v4().to_string();
        let book_dir = self.book_dir(&book_id);
        fs::create_dir_all(&book_dir)
            .await
            .with_context(|| format!("create book dir: {}", book_dir.display()))?;

        let original_path = book_dir.join("original.epub");
        fs::write(&original_path, bytes)
            .await
            .with_context(|| format!("write upload: {}", original_path.display()))?;

        let record = BookRecord {
            book_id: book_id.clone(),
            title: file_name.to_owned(),
            status: BookStatus::Uploaded,
            message: "uploaded".to_owned(),
            source_lang: None,
            target_lang: None,
            created_at: Utc::now(),
            translated_at: None,
            original_path,
            work_dir: book_dir.join("work"),
            translated_path: None,
        };
        self.put(&record).await.context("write book record")?;
        Ok(record)
    }

    async fn get(&self, book_id: &str) -> anyhow::Result<Option<BookRecord>> {
        let path = self.record_path(book_id);
        read_json(&path)
            .await
            .with_context(|| format!("read: {}", path.display()))
    }

    async fn list(&self) -> anyhow::Result<Vec<BookRecord>> {
        let books_dir = self.books_dir();
        let mut dir = match fs::read_dir(&books_dir).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("read books dir: {}", books_dir.display()));
            }
        };

        let mut records = Vec::new();
        while let Some(entry) = dir.next_entry().await.context("list books dir")? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if uuid::Uuid::parse_str(name.as_ref()).is_err() {
                continue;
            }
            if let Some(record) = self.get(name.as_ref()).await? {
                records.push(record);
            }
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn put(&self, record: &BookRecord) -> anyhow::Result<()> {
        write_json_atomic(&self.record_path(&record.book_id), record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_then_list_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let library = LocalFsLibrary::new(dir.path());

        let record = library.store("my book.epub", b"PK fake").await.unwrap();
        assert_eq!(record.status, BookStatus::Uploaded);
        assert!(record.original_path.exists());

        let listed = library.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].book_id, record.book_id);
        assert_eq!(listed[0].title, "my book.epub");
    }

    #[tokio::test]
    async fn get_unknown_book_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let library = LocalFsLibrary::new(dir.path());
        let id = uuid::Uuid::new_v4().to_string();
        assert!(library.get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn status_updates_persist() {
        let dir = tempfile::tempdir().unwrap();
        let library = LocalFsLibrary::new(dir.path());

        let mut record = library.store("b.epub", b"PK").await.unwrap();
        record.status = BookStatus::Done;
        record.message = "done".to_owned();
        library.put(&record).await.unwrap();

        let loaded = library.get(&record.book_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, BookStatus::Done);
    }
}
