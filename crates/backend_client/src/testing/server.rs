use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        IntoResponse,
        Response,
    },
    routing::{
        get,
        post,
    },
    Json,
    Router,
};
use history::MicroOp;
use serde::Deserialize;
use serde_json::json;
use tokio::{
    net::TcpListener,
    task::JoinHandle,
};

use super::memory::InMemoryBackend;
use crate::BackendError;

#[derive(Deserialize)]
struct TransactionArgs {
    transaction: Vec<MicroOp>,
}

#[derive(Deserialize)]
struct UdfPostRequest {
    args: TransactionArgs,
}

/// Serves an [`InMemoryBackend`] over both the Convex and the FastAPI wire
/// protocols on an ephemeral local port. Stops when dropped.
pub struct TestServer {
    pub url: String,
    pub backend: Arc<InMemoryBackend>,
    handle: JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub async fn serve(backend: Arc<InMemoryBackend>) -> anyhow::Result<TestServer> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("http://{}", listener.local_addr()?);
    let app = Router::new()
        .route("/version", get(|| async { "in-memory-test" }))
        .route("/openapi.json", get(|| async { "{}" }))
        .route("/api/mutation", post(udf))
        .route("/api/query", post(udf))
        .route("/api/append", post(append))
        .with_state(backend.clone());
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Test server failed: {e}");
        }
    });
    Ok(TestServer {
        url,
        backend,
        handle,
    })
}

async fn udf(
    State(backend): State<Arc<InMemoryBackend>>,
    Json(request): Json<UdfPostRequest>,
) -> Response {
    match backend.apply(&request.args.transaction).await {
        Ok(results) => Json(json!({"status": "success", "value": results})).into_response(),
        Err(BackendError::Definite(message)) => {
            Json(json!({"status": "error", "errorMessage": message})).into_response()
        },
        Err(BackendError::Indefinite(message)) => {
            (StatusCode::INTERNAL_SERVER_ERROR, message).into_response()
        },
    }
}

async fn append(
    State(backend): State<Arc<InMemoryBackend>>,
    Json(args): Json<TransactionArgs>,
) -> Response {
    match backend.apply(&args.transaction).await {
        Ok(results) => Json(results).into_response(),
        Err(BackendError::Definite(message)) => {
            (StatusCode::CONFLICT, Json(json!({"detail": message}))).into_response()
        },
        Err(BackendError::Indefinite(message)) => {
            (StatusCode::INTERNAL_SERVER_ERROR, message).into_response()
        },
    }
}
