//! The server half of the web mirror: one route, `/:name`, dispatching on
//! HTTP method the way spec.md §6 lays the wire contract out. Handlers never
//! interpret blob bytes themselves — they're a thin translation from HTTP to
//! [`Datastore::read`]/`update`/`exists`/`delete`, the same shape
//! `nar-bridge`'s handlers take translating HTTP into `BlobService` calls.

use std::sync::Arc;

use axum::extract::{FromRequest, Multipart, Path, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::warn;
use vaultree_datastore::Datastore;
use vaultree_name::BlobName;

/// Deployable config for the web mirror server: where it listens, and the
/// base URL it's reachable at (for logging/advertising, not for dialing
/// itself). Mirrors the reference workspace's per-piece config structs —
/// constructed programmatically or deserialized, no file format mandated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebServerConfig {
    /// Address to bind the listener to, e.g. `"0.0.0.0:5522"`.
    pub bind_addr: String,
    /// Base URL this server is reachable at, advertised to clients.
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Caps a single PUT body the way `nar-bridge`'s narinfo upload bounds its
/// own request size, rather than letting an unbounded client stream exhaust
/// the server's memory.
const MAX_BLOB_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

use crate::error::{classify, ErrorBody, ErrorCode};

#[derive(Clone)]
pub struct AppState {
    datastore: Arc<Datastore>,
}

impl AppState {
    pub fn new(datastore: Arc<Datastore>) -> Self {
        Self { datastore }
    }
}

/// Builds the router mirroring spec.md §6: one path segment per blob, with
/// GET/HEAD/PUT/DELETE on the same route.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/:name", get(get_blob).head(head_blob).put(put_blob).delete(delete_blob))
        .with_state(state)
}

/// Binds `config.bind_addr` and serves the router until the process is
/// killed, the way a binary entrypoint would drive this crate.
pub async fn serve(config: WebServerConfig, state: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(bind_addr = %config.bind_addr, "vaultree web mirror listening");
    axum::serve(listener, router(state)).await
}

#[derive(Serialize)]
struct NameResponse {
    name: String,
}

fn bad_name_response() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody::new(ErrorCode::InvalidBlobName, "malformed blob name")),
    )
        .into_response()
}

fn parse_name(raw: &str) -> Result<BlobName, Response> {
    BlobName::from_string(raw).map_err(|_| bad_name_response())
}

fn datastore_error_response(err: vaultree_datastore::DatastoreError) -> Response {
    use vaultree_datastore::DatastoreError as E;
    match &err {
        E::NotFound(_) => StatusCode::NOT_FOUND.into_response(),
        _ => match classify(&err) {
            Some(code) => (StatusCode::BAD_REQUEST, Json(ErrorBody::new(code, err.to_string()))).into_response(),
            None => {
                warn!(error = %err, "unclassified datastore error");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        },
    }
}

async fn get_blob(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let name = match parse_name(&name) {
        Ok(n) => n,
        Err(r) => return r,
    };
    let mut buf = Vec::new();
    match state.datastore.read(&name, &mut buf).await {
        Ok(()) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            buf,
        )
            .into_response(),
        Err(e) => datastore_error_response(e),
    }
}

async fn head_blob(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let name = match parse_name(&name) {
        Ok(n) => n,
        Err(r) => return r,
    };
    match state.datastore.exists(&name).await {
        Ok(true) => StatusCode::OK.into_response(),
        Ok(false) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => datastore_error_response(e),
    }
}

async fn put_blob(State(state): State<AppState>, Path(name): Path<String>, request: Request) -> Response {
    let name = match parse_name(&name) {
        Ok(n) => n,
        Err(r) => return r,
    };

    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let bytes = if content_type.starts_with("multipart/form-data") {
        let multipart = match Multipart::from_request(request, &state).await {
            Ok(m) => m,
            Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        };
        match extract_multipart_file(multipart).await {
            Ok(Some(b)) => b,
            Ok(None) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(ErrorBody::new(ErrorCode::NoFormField, "missing 'file' form field")),
                )
                    .into_response()
            }
            Err(r) => return r,
        }
    } else {
        match axum::body::to_bytes(request.into_body(), MAX_BLOB_UPLOAD_BYTES).await {
            Ok(b) => b.to_vec(),
            Err(e) => {
                warn!(error = %e, "failed to read PUT body");
                return StatusCode::BAD_REQUEST.into_response();
            }
        }
    };

    match state.datastore.update(&name, &mut std::io::Cursor::new(bytes)).await {
        Ok(()) => (
            StatusCode::OK,
            Json(NameResponse {
                name: name.to_string(),
            }),
        )
            .into_response(),
        Err(e) => datastore_error_response(e),
    }
}

async fn delete_blob(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let name = match parse_name(&name) {
        Ok(n) => n,
        Err(r) => return r,
    };
    match state.datastore.exists(&name).await {
        Ok(false) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => return datastore_error_response(e),
        Ok(true) => {}
    }
    match state.datastore.delete(&name).await {
        Ok(()) => (
            StatusCode::OK,
            Json(NameResponse {
                name: name.to_string(),
            }),
        )
            .into_response(),
        Err(e) => datastore_error_response(e),
    }
}

/// Pulls the single `file` part out of a `multipart/form-data` body — the
/// field name SPEC_FULL.md settles on for a single-file upload.
async fn extract_multipart_file(mut multipart: Multipart) -> Result<Option<Vec<u8>>, Response> {
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() == Some("file") {
            let bytes = field
                .bytes()
                .await
                .map_err(|_| StatusCode::BAD_REQUEST.into_response())?;
            return Ok(Some(bytes.to_vec()));
        }
    }
    Ok(None)
}
