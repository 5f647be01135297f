use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use axum::Router;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{Json, Response};
use axum::routing::{get, post};
use chrono::Utc;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio_util::io::ReaderStream;

use crate::app::library::BookLibrary;
use crate::app::model::{BookRecord, BookStatus, SaveProgressRequest, TranslateBookRequest};
use crate::cache::TranslationCache;
use crate::chapter;
use crate::epub;
use crate::orchestrate;
use crate::pipeline::PipelineConfig;
use crate::progress::{LocalFsPrefsStore, ProgressStore, ReaderPrefs, SavedProgress};
use crate::provider;
use crate::translate::LanguagePair;

const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub base_dir: PathBuf,
    pub library: Arc<dyn BookLibrary>,
    pub progress: Arc<dyn ProgressStore>,
    pub prefs: LocalFsPrefsStore,
    pub endpoint_url: String,
    /// Bounds concurrent translation runs; the provider is rate sensitive,
    /// so the default is one.
    pub jobs: Arc<Semaphore>,
}

type HandlerError = (StatusCode, String);

pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok\n" }))
        .route("/api/books", post(upload_book).get(list_books))
        .route("/api/books/:book_id", get(get_book))
        .route("/api/books/:book_id/translate", post(translate_book))
        .route("/api/books/:book_id/chapters", get(list_book_chapters))
        .route("/api/books/:book_id/paragraphs", get(chapter_paragraphs))
        .route("/api/books/:book_id/download", get(download_translated))
        .route("/api/progress/:book_id", get(get_progress))
        .route("/api/progress", post(save_progress))
        .route("/api/prefs", get(get_prefs).put(put_prefs))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

async fn upload_book(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<BookRecord>, HandlerError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| (StatusCode::BAD_REQUEST, format!("read multipart: {err}")))?
    {
        let Some(file_name) = field.file_name().map(ToOwned::to_owned) else {
            continue;
        };
        if !file_name.to_ascii_lowercase().ends_with(".epub") {
            return Err((
                StatusCode::BAD_REQUEST,
                format!("not an epub file: {file_name}"),
            ));
        }

        let bytes = field
            .bytes()
            .await
            .map_err(|err| (StatusCode::BAD_REQUEST, format!("read upload: {err}")))?;
        if bytes.is_empty() {
            return Err((StatusCode::BAD_REQUEST, "uploaded file is empty".to_owned()));
        }

        let record = state
            .library
            .store(&file_name, &bytes)
            .await
            .map_err(internal)?;
        tracing::info!(book_id = %record.book_id, title = %record.title, "book uploaded");
        return Ok(Json(record));
    }

    Err((
        StatusCode::BAD_REQUEST,
        "multipart upload must carry a file field".to_owned(),
    ))
}

async fn list_books(State(state): State<AppState>) -> Result<Json<Vec<BookRecord>>, HandlerError> {
    Ok(Json(state.library.list().await.map_err(internal)?))
}

async fn get_book(
    State(state): State<AppState>,
    Path(book_id): Path<String>,
) -> Result<Json<BookRecord>, HandlerError> {
    Ok(Json(load_book(&state, &book_id).await?))
}

async fn translate_book(
    State(state): State<AppState>,
    Path(book_id): Path<String>,
    Json(request): Json<TranslateBookRequest>,
) -> Result<(StatusCode, Json<BookRecord>), HandlerError> {
    if request.source_lang.trim().is_empty() || request.target_lang.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "source_lang and target_lang are required".to_owned(),
        ));
    }

    let mut record = load_book(&state, &book_id).await?;
    if record.status == BookStatus::Translating {
        return Err((
            StatusCode::CONFLICT,
            "translation is already running".to_owned(),
        ));
    }

    record.status = BookStatus::Translating;
    record.message = "translating".to_owned();
    record.source_lang = Some(request.source_lang.trim().to_owned());
    record.target_lang = Some(request.target_lang.trim().to_owned());
    state.library.put(&record).await.map_err(internal)?;

    spawn_translation(state.clone(), record.clone(), request);
    Ok((StatusCode::ACCEPTED, Json(record)))
}

/// Runs the orchestrator off the request path, one run at a time.
fn spawn_translation(state: AppState, record: BookRecord, request: TranslateBookRequest) {
    let jobs = Arc::clone(&state.jobs);
    tokio::spawn(async move {
        let _permit = jobs
            .acquire_owned()
            .await
            .expect("translation job semaphore is closed");

        let book_id = record.book_id.clone();
        if let Err(err) = run_translation(&state, record, request).await {
            tracing::error!(book_id, error = %format!("{err:#}"), "translation job failed");
            let _ = mark_error(&state, &book_id, format!("{err:#}")).await;
        }
    });
}

async fn run_translation(
    state: &AppState,
    mut record: BookRecord,
    request: TranslateBookRequest,
) -> anyhow::Result<()> {
    let cache = TranslationCache::open(&state.base_dir.join("cache.json"))
        .context("open translation cache")?;
    let translator =
        provider::build_translator(request.engine, &state.endpoint_url, Some(cache))
            .context("build translator")?;

    let langs = LanguagePair::new(
        record.source_lang.clone().unwrap_or_default(),
        record.target_lang.clone().unwrap_or_default(),
    );
    let config = PipelineConfig {
        cooldown: Duration::from_secs(request.cooldown_secs),
        mismatch_policy: request.mismatch_policy(),
        ..PipelineConfig::default()
    };

    let out_path = record
        .work_dir
        .parent()
        .unwrap_or(&record.work_dir)
        .join("translated.epub");

    let result = orchestrate::translate_book(
        translator.as_ref(),
        &record.original_path,
        &record.work_dir,
        &out_path,
        &langs,
        &config,
    )
    .await;

    // Repackaging is unconditional, so a partial artifact exists either way.
    record.translated_path = out_path.exists().then(|| out_path.clone());

    match result {
        Ok(report) => {
            record.status = BookStatus::Done;
            record.translated_at = Some(Utc::now());
            record.message = format!(
                "translated {} file(s), skipped {}",
                report.translated, report.skipped
            );
        }
        Err(err) => {
            record.status = BookStatus::Error;
            record.message = format!("{err:#}");
        }
    }
    state.library.put(&record).await.context("save book record")
}

async fn mark_error(state: &AppState, book_id: &str, message: String) -> anyhow::Result<()> {
    let Some(mut record) = state.library.get(book_id).await? else {
        return Ok(());
    };
    record.status = BookStatus::Error;
    record.message = message;
    state.library.put(&record).await
}

async fn list_book_chapters(
    State(state): State<AppState>,
    Path(book_id): Path<String>,
) -> Result<Json<Vec<String>>, HandlerError> {
    let record = load_book(&state, &book_id).await?;
    let chapters = chapters_of(&record)?;
    Ok(Json(chapters))
}

#[derive(Debug, Deserialize)]
struct ChapterQuery {
    chapter: String,
}

async fn chapter_paragraphs(
    State(state): State<AppState>,
    Path(book_id): Path<String>,
    Query(query): Query<ChapterQuery>,
) -> Result<Json<Vec<chapter::ParagraphRecord>>, HandlerError> {
    let record = load_book(&state, &book_id).await?;
    let chapters = chapters_of(&record)?;

    // Chapter ids come from the container itself; anything else (including
    // traversal attempts) is rejected outright.
    if !chapters.contains(&query.chapter) {
        return Err((
            StatusCode::NOT_FOUND,
            format!("unknown chapter: {}", query.chapter),
        ));
    }

    let path = record.work_dir.join(&query.chapter);
    let markup = std::fs::read_to_string(&path)
        .with_context(|| format!("read chapter: {}", path.display()))
        .map_err(internal)?;
    let target = record.target_lang.clone().unwrap_or_default();
    Ok(Json(chapter::paragraph_stream(&markup, &target)))
}

async fn download_translated(
    State(state): State<AppState>,
    Path(book_id): Path<String>,
) -> Result<Response, HandlerError> {
    let record = load_book(&state, &book_id).await?;
    let Some(path) = record.translated_path else {
        return Err((
            StatusCode::CONFLICT,
            "book has no translated container yet".to_owned(),
        ));
    };

    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|_| (StatusCode::NOT_FOUND, "translated container is missing".to_owned()))?;
    let stream = ReaderStream::new(file);
    let body = axum::body::Body::from_stream(stream);

    let mut resp = Response::new(body);
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/epub+zip"),
    );
    resp.headers_mut().insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!(
            "attachment; filename=\"bilingual-{book_id}.epub\""
        ))
        .map_err(internal)?,
    );
    Ok(resp)
}

async fn get_progress(
    State(state): State<AppState>,
    Path(book_id): Path<String>,
) -> Result<Json<Option<SavedProgress>>, HandlerError> {
    validate_book_id(&book_id)?;
    Ok(Json(state.progress.get(&book_id).await.map_err(internal)?))
}

async fn save_progress(
    State(state): State<AppState>,
    Json(request): Json<SaveProgressRequest>,
) -> Result<StatusCode, HandlerError> {
    validate_book_id(&request.book)?;
    state
        .progress
        .set(&SavedProgress {
            book: request.book,
            last_chapter: request.chapter,
            last_paragraph_index: request.paragraph_index,
            updated_at: Utc::now(),
        })
        .await
        .map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_prefs(State(state): State<AppState>) -> Result<Json<ReaderPrefs>, HandlerError> {
    Ok(Json(state.prefs.get().await.map_err(internal)?))
}

async fn put_prefs(
    State(state): State<AppState>,
    Json(prefs): Json<ReaderPrefs>,
) -> Result<StatusCode, HandlerError> {
    state.prefs.set(&prefs).await.map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn load_book(state: &AppState, book_id: &str) -> Result<BookRecord, HandlerError> {
    validate_book_id(book_id)?;
    state
        .library
        .get(book_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("book not found: {book_id}")))
}

fn validate_book_id(book_id: &str) -> Result<(), HandlerError> {
    uuid::Uuid::parse_str(book_id.trim())
        .map(|_| ())
        .map_err(|_| (StatusCode::BAD_REQUEST, "invalid book id".to_owned()))
}

/// The reader works off the book's working directory: the original container
/// is unpacked there on first access and rewritten in place by translation.
fn chapters_of(record: &BookRecord) -> Result<Vec<String>, HandlerError> {
    if !record.work_dir.exists() {
        epub::extract_container(&record.original_path, &record.work_dir)
            .with_context(|| format!("extract container: {}", record.original_path.display()))
            .map_err(internal)?;
    }
    chapter::list_chapters(&record.work_dir).map_err(internal)
}

fn internal(err: impl std::fmt::Display) -> HandlerError {
    (StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"))
}
