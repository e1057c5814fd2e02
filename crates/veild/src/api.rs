//! Snippet HTTP API
//!
//! Routes:
//!   POST /api/snippets        store an encrypted snippet, returns its id
//!   GET  /api/snippets/{id}   fetch a live snippet (404 when absent or expired)
//!   GET  /metrics, /healthz   (see [`crate::metrics`])

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use veil_core::api::{CreateSnippetRequest, CreateSnippetResponse, FetchSnippetResponse};
use veil_core::VeilError;
use veil_snippets::{Lookup, SnippetStore};

use crate::metrics::{healthz_handler, metrics_handler, FetchOutcome, Metrics};

/// Request bodies may carry JSON framing on top of the snippet itself.
const BODY_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SnippetStore>,
    pub metrics: Arc<Metrics>,
}

pub fn router(state: AppState, max_snippet_bytes: usize, expose_metrics: bool) -> Router {
    let mut app = Router::new()
        .route("/api/snippets", post(create_snippet))
        .route("/api/snippets/{id}", get(fetch_snippet))
        .route("/healthz", get(healthz_handler));
    if expose_metrics {
        app = app.route("/metrics", get(metrics_handler));
    }
    app.layer(DefaultBodyLimit::max(max_snippet_bytes + BODY_OVERHEAD))
        .with_state(state)
}

fn create_status(err: &VeilError) -> StatusCode {
    match err {
        VeilError::EmptyInput(_)
        | VeilError::InvalidSnippet(_)
        | VeilError::UnsupportedAlgorithm(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn create_snippet(
    State(state): State<AppState>,
    payload: Result<Json<CreateSnippetRequest>, JsonRejection>,
) -> (StatusCode, Json<CreateSnippetResponse>) {
    let Json(request) = match payload {
        Ok(json) => json,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(CreateSnippetResponse::err(rejection.body_text())),
            )
        }
    };

    let store = state.store.clone();
    let result = tokio::task::spawn_blocking(move || {
        store.create(&request.encrypted_text, &request.algorithm)
    })
    .await
    .map_err(|e| VeilError::Storage(format!("create task failed: {e}")))
    .and_then(|r| r);

    match result {
        Ok(id) => {
            state.metrics.record_created();
            tracing::info!(id = %id, "snippet created");
            (StatusCode::OK, Json(CreateSnippetResponse::ok(id)))
        }
        Err(e) => {
            let status = create_status(&e);
            if status.is_server_error() {
                tracing::error!("snippet create failed: {e}");
            } else {
                tracing::debug!("snippet create rejected: {e}");
            }
            (status, Json(CreateSnippetResponse::err(e.to_string())))
        }
    }
}

async fn fetch_snippet(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> (StatusCode, Json<FetchSnippetResponse>) {
    let store = state.store.clone();
    let lookup_id = id.clone();
    let lookup = tokio::task::spawn_blocking(move || store.lookup(&lookup_id))
        .await
        .map_err(|e| VeilError::Storage(format!("fetch task failed: {e}")))
        .and_then(|r| r);

    let (outcome, response) = match lookup {
        Ok(Lookup::Live(snippet)) => (
            FetchOutcome::Found,
            (StatusCode::OK, Json(FetchSnippetResponse::ok(snippet.body))),
        ),
        Ok(Lookup::Expired) => (FetchOutcome::Expired, not_found()),
        Ok(Lookup::Missing) => (FetchOutcome::Missing, not_found()),
        Err(e) => {
            tracing::error!(id = %id, "snippet fetch failed: {e}");
            (
                FetchOutcome::Error,
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(FetchSnippetResponse::err(e.to_string())),
                ),
            )
        }
    };
    state.metrics.record_fetch(outcome);
    response
}

fn not_found() -> (StatusCode, Json<FetchSnippetResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(FetchSnippetResponse::err(VeilError::SnippetNotFound.to_string())),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;
    use veil_core::config::StoreConfig;
    use veil_snippets::{ManualClock, MemoryBackend};

    const WEEK: u64 = 7 * 24 * 60 * 60;

    fn test_app() -> (Router, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000));
        let config = StoreConfig::default();
        let store = SnippetStore::new(Arc::new(MemoryBackend::new()), &config)
            .with_clock(clock.clone());
        let state = AppState {
            store: Arc::new(store),
            metrics: Arc::new(Metrics::new()),
        };
        (router(state, config.max_snippet_bytes, true), clock)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    fn create_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/snippets")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn fetch_request(id: &str) -> Request<Body> {
        Request::builder()
            .uri(format!("/api/snippets/{id}"))
            .body(Body::empty())
            .unwrap()
    }

    async fn create(app: &Router) -> String {
        let (status, body) = send(
            app,
            create_request(r#"{"encryptedText":"v1.AES-256..x.y.z.w","algorithm":"AES-256"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        body["snippetId"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn create_then_fetch() {
        let (app, _) = test_app();
        let id = create(&app).await;

        let (status, body) = send(&app, fetch_request(&id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["snippet"]["algorithm"], "AES-256");
        assert_eq!(body["snippet"]["encryptedText"], "v1.AES-256..x.y.z.w");
        assert_eq!(body["snippet"]["createdAt"], 1_700_000_000u64);

        // the wire shape decodes into the validated record
        let decoded: FetchSnippetResponse = serde_json::from_value(body).unwrap();
        assert!(decoded.into_result().is_ok());
    }

    #[tokio::test]
    async fn unknown_id_is_404() {
        let (app, _) = test_app();
        let (status, body) = send(&app, fetch_request("nosuchsnippet")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
        assert!(body["error"].is_string());
        assert!(body.get("snippet").is_none());
    }

    #[tokio::test]
    async fn expired_is_404() {
        let (app, clock) = test_app();
        let id = create(&app).await;
        clock.advance(WEEK + 1);
        let (status, body) = send(&app, fetch_request(&id)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn create_rejects_bad_input() {
        let (app, _) = test_app();
        for body in [
            r#"{"encryptedText":"","algorithm":"AES-256"}"#,
            r#"{"encryptedText":"abc","algorithm":"SHA-256"}"#,
            r#"{"encryptedText":"abc","algorithm":"ROT13"}"#,
            r#"{"encryptedText":"abc"}"#,
            "not json",
        ] {
            let (status, json) = send(&app, create_request(body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body: {body}");
            assert_eq!(json["success"], false);
            assert!(json["error"].is_string());
            assert!(json.get("snippetId").is_none());
        }
    }

    #[tokio::test]
    async fn metrics_and_health() {
        let (app, _) = test_app();
        let id = create(&app).await;
        send(&app, fetch_request(&id)).await;
        send(&app, fetch_request("missing00000")).await;

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let text = String::from_utf8(
            to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec(),
        )
        .unwrap();
        assert!(text.contains("veil_snippets_created_total 1"));
        assert!(text.contains(r#"outcome="found"} 1"#));
        assert!(text.contains(r#"outcome="missing"} 1"#));

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_create_and_fetch_on_json_table() {
        let dir = tempfile::tempdir().unwrap();
        let backend = veil_snippets::JsonFileBackend::open(&dir.path().join("snippets.json")).unwrap();
        let config = StoreConfig::default();
        let state = AppState {
            store: Arc::new(SnippetStore::new(Arc::new(backend), &config)),
            metrics: Arc::new(Metrics::new()),
        };
        let app = router(state, config.max_snippet_bytes, false);
        let first = create(&app).await;

        let mut tasks = Vec::new();
        for i in 0..16 {
            let app = app.clone();
            let first = first.clone();
            tasks.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    create(&app).await;
                } else {
                    let (status, body) = send(&app, fetch_request(&first)).await;
                    assert_eq!(status, StatusCode::OK);
                    assert_eq!(body["snippet"]["algorithm"], "AES-256");
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
    }

    #[tokio::test]
    async fn metrics_route_can_be_disabled() {
        let store = SnippetStore::new(Arc::new(MemoryBackend::new()), &StoreConfig::default());
        let state = AppState {
            store: Arc::new(store),
            metrics: Arc::new(Metrics::new()),
        };
        let app = router(state, 1024, false);
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
