use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt as _;
use tokio::sync::Semaphore;
use tower::ServiceExt as _;

use bibliovox::app::http::{AppState, api_router};
use bibliovox::app::library::LocalFsLibrary;
use bibliovox::app::model::BookRecord;
use bibliovox::epub;
use bibliovox::progress::{LocalFsPrefsStore, LocalFsProgressStore, ReaderPrefs};

const BOUNDARY: &str = "bibliovox-test-boundary";

fn test_router(data_dir: &Path) -> Router {
    api_router(AppState {
        base_dir: data_dir.to_path_buf(),
        library: Arc::new(LocalFsLibrary::new(data_dir)),
        progress: Arc::new(LocalFsProgressStore::new(data_dir)),
        prefs: LocalFsPrefsStore::new(data_dir),
        endpoint_url: "http://127.0.0.1:9/unused".to_owned(),
        jobs: Arc::new(Semaphore::new(1)),
    })
}

fn sample_epub_bytes(dir: &Path) -> Vec<u8> {
    let tree = dir.join("book-src");
    std::fs::create_dir_all(tree.join("OEBPS")).unwrap();
    std::fs::write(tree.join("mimetype"), "application/epub+zip").unwrap();
    std::fs::write(
        tree.join("OEBPS/ch1.xhtml"),
        "<html><body>\n<p>Hello.</p>\n<p>World.</p>\n</body></html>\n",
    )
    .unwrap();
    std::fs::write(tree.join("OEBPS/ch2.xhtml"), "<html><body>\n<p>Two.</p>\n</body></html>\n")
        .unwrap();

    let container = dir.join("sample.epub");
    epub::pack_container(&tree, &container).unwrap();
    std::fs::read(&container).unwrap()
}

fn multipart_upload(file_name: &str, bytes: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"book\"; filename=\"{file_name}\"\r\n\
Content-Type: application/epub+zip\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/api/books")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn json_body<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn upload_sample(router: &Router, dir: &Path) -> BookRecord {
    let bytes = sample_epub_bytes(dir);
    let response = router
        .clone()
        .oneshot(multipart_upload("sample.epub", &bytes))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    json_body(response).await
}

#[tokio::test]
async fn upload_then_list_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let router = test_router(&dir.path().join("data"));

    let record = upload_sample(&router, dir.path()).await;
    assert_eq!(record.title, "sample.epub");

    let response = router
        .clone()
        .oneshot(Request::get("/api/books").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let listed: Vec<BookRecord> = json_body(response).await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].book_id, record.book_id);
}

#[tokio::test]
async fn non_epub_uploads_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let router = test_router(&dir.path().join("data"));

    let response = router
        .oneshot(multipart_upload("evil.exe", b"MZ"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn chapters_come_back_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let router = test_router(&dir.path().join("data"));
    let record = upload_sample(&router, dir.path()).await;

    let response = router
        .oneshot(
            Request::get(format!("/api/books/{}/chapters", record.book_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let chapters: Vec<String> = json_body(response).await;
    assert_eq!(chapters, vec!["OEBPS/ch1.xhtml", "OEBPS/ch2.xhtml"]);
}

#[tokio::test]
async fn paragraphs_reject_chapters_outside_the_allow_list() {
    let dir = tempfile::tempdir().unwrap();
    let router = test_router(&dir.path().join("data"));
    let record = upload_sample(&router, dir.path()).await;

    for bad in ["../../etc/passwd", "OEBPS/../mimetype", "missing.xhtml"] {
        let uri = format!(
            "/api/books/{}/paragraphs?chapter={}",
            record.book_id,
            urlencode(bad)
        );
        let response = router
            .clone()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "chapter: {bad}");
    }

    let uri = format!(
        "/api/books/{}/paragraphs?chapter={}",
        record.book_id,
        urlencode("OEBPS/ch1.xhtml")
    );
    let response = router
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let paragraphs: Vec<bibliovox::chapter::ParagraphRecord> = json_body(response).await;
    assert_eq!(paragraphs.len(), 2);
    assert_eq!(paragraphs[0].text, "Hello.");
}

#[tokio::test]
async fn unknown_and_malformed_book_ids_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let router = test_router(&dir.path().join("data"));

    let response = router
        .clone()
        .oneshot(
            Request::get("/api/books/not-a-uuid/chapters")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let ghost = uuid::Uuid::new_v4();
    let response = router
        .oneshot(
            Request::get(format!("/api/books/{ghost}/chapters"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn progress_round_trips_through_the_api() {
    let dir = tempfile::tempdir().unwrap();
    let router = test_router(&dir.path().join("data"));
    let book = uuid::Uuid::new_v4().to_string();

    let response = router
        .clone()
        .oneshot(
            Request::get(format!("/api/progress/{book}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let empty: Option<bibliovox::progress::SavedProgress> = json_body(response).await;
    assert!(empty.is_none());

    let save = serde_json::json!({
        "book": book,
        "chapter": "OEBPS/ch1.xhtml",
        "paragraph_index": 7,
    });
    let response = router
        .clone()
        .oneshot(
            Request::post("/api/progress")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(save.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = router
        .oneshot(
            Request::get(format!("/api/progress/{book}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let saved: Option<bibliovox::progress::SavedProgress> = json_body(response).await;
    let saved = saved.unwrap();
    assert_eq!(saved.last_chapter, "OEBPS/ch1.xhtml");
    assert_eq!(saved.last_paragraph_index, 7);
}

#[tokio::test]
async fn prefs_default_then_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let router = test_router(&dir.path().join("data"));

    let response = router
        .clone()
        .oneshot(Request::get("/api/prefs").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let prefs: ReaderPrefs = json_body(response).await;
    assert_eq!(prefs, ReaderPrefs::default());

    let mut updated = prefs;
    updated.target_voice.rate = 1.25;
    updated.panel_open = true;
    let response = router
        .clone()
        .oneshot(
            Request::put("/api/prefs")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_string(&updated).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = router
        .oneshot(Request::get("/api/prefs").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let loaded: ReaderPrefs = json_body(response).await;
    assert_eq!(loaded, updated);
}

#[tokio::test]
async fn noop_translation_runs_to_done_and_serves_a_download() {
    let dir = tempfile::tempdir().unwrap();
    let router = test_router(&dir.path().join("data"));
    let record = upload_sample(&router, dir.path()).await;

    let request = serde_json::json!({
        "source_lang": "en",
        "target_lang": "fr",
        "engine": "noop",
        "cooldown_secs": 0,
    });
    let response = router
        .clone()
        .oneshot(
            Request::post(format!("/api/books/{}/translate", record.book_id))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(request.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    // The run happens off the request path; poll the record.
    let mut done = None;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let response = router
            .clone()
            .oneshot(
                Request::get(format!("/api/books/{}", record.book_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let current: BookRecord = json_body(response).await;
        if current.status == bibliovox::app::model::BookStatus::Done {
            done = Some(current);
            break;
        }
        assert_ne!(
            current.status,
            bibliovox::app::model::BookStatus::Error,
            "translation errored: {}",
            current.message
        );
    }
    let done = done.expect("translation did not finish in time");
    assert!(done.translated_path.is_some());

    let response = router
        .oneshot(
            Request::get(format!("/api/books/{}/download", record.book_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
        Some("application/epub+zip")
    );
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    // Zip local-file magic.
    assert_eq!(&bytes[..2], b"PK");
}

fn urlencode(raw: &str) -> String {
    let mut out = String::new();
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
