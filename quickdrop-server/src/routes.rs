//! HTTP surface over the transfer manager.

use std::io;
use std::path::Path as StdPath;
use std::pin::pin;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{header, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::TryStreamExt;
use serde::Serialize;
use tokio_util::io::StreamReader;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use quickdrop_core::qr::{self, DEFAULT_QR_SIZE};
use quickdrop_core::{
    DownloadError, StorageError, Token, TokenStatus, TransferManager, UploadError,
};

use crate::ui::ui_router;

const NOT_FOUND_MESSAGE: &str = "File not found or already destroyed.";
const CONTENT_DESCRIPTION: HeaderName = HeaderName::from_static("content-description");
const CONTENT_TRANSFER_ENCODING: HeaderName =
    HeaderName::from_static("content-transfer-encoding");

pub struct AppState {
    pub transfers: Arc<TransferManager>,
    /// `http://host:port` as seen by recipients on the local network.
    pub public_base_url: String,
}

impl AppState {
    fn download_url(&self, token: &Token) -> String {
        format!("{}/download/{token}", self.public_base_url)
    }
}

#[derive(Serialize)]
struct UploadResponse {
    token: String,
    url: String,
    qr_url: String,
}

pub fn create_router(
    state: Arc<AppState>,
    web_dir: Option<&StdPath>,
    max_upload_bytes: Option<usize>,
) -> Router {
    let body_limit = match max_upload_bytes {
        Some(limit) => DefaultBodyLimit::max(limit),
        None => DefaultBodyLimit::disable(),
    };

    Router::new()
        .route("/upload", post(upload).layer(body_limit))
        .route("/download/:token", get(download))
        .route("/status/:token", get(status))
        .route("/qr/:token", get(qr_code))
        .route("/health", get(health))
        .merge(ui_router(web_dir))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_json(status: StatusCode, msg: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": msg.into() }))).into_response()
}

async fn upload(State(state): State<Arc<AppState>>, mut multipart: Multipart) -> Response {
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return error_json(StatusCode::BAD_REQUEST, "No file uploaded"),
            Err(e) => {
                warn!("Malformed multipart upload: {e}");
                return error_json(StatusCode::BAD_REQUEST, "No file uploaded");
            }
        };

        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().map(str::to_string);
        let reader = StreamReader::new(field.map_err(io::Error::other));
        let mut reader = pin!(reader);

        return match state
            .transfers
            .upload(&mut reader, file_name.as_deref())
            .await
        {
            Ok(token) => {
                let body = UploadResponse {
                    url: state.download_url(&token),
                    qr_url: format!("/qr/{token}"),
                    token: token.to_string(),
                };
                (StatusCode::OK, Json(body)).into_response()
            }
            Err(UploadError::Empty) => error_json(StatusCode::BAD_REQUEST, "No file uploaded"),
            Err(UploadError::Storage(StorageError::Source(e))) => {
                warn!("Upload stream broke off: {e}");
                error_json(StatusCode::BAD_REQUEST, format!("Upload interrupted: {e}"))
            }
            Err(UploadError::Storage(e)) => {
                error!("Failed to save upload: {e}");
                error_json(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Failed to save file: {e}"),
                )
            }
        };
    }
}

/// Stream the file, consuming the token. Cleanup happens when the body is
/// finished or dropped, so an aborted transfer still destroys the file.
async fn download(State(state): State<Arc<AppState>>, Path(token): Path<String>) -> Response {
    let token = Token::from(token);

    let download = match state.transfers.download(&token).await {
        Ok(download) => download,
        Err(DownloadError::NotFound) => {
            return (StatusCode::NOT_FOUND, NOT_FOUND_MESSAGE).into_response();
        }
        Err(DownloadError::Storage(e)) => {
            error!("Failed to open file for token {token}: {e}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to read file.".to_string(),
            )
                .into_response();
        }
    };

    let headers = [
        (CONTENT_DESCRIPTION, "File Transfer".to_string()),
        (CONTENT_TRANSFER_ENCODING, "binary".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!(
                "attachment; filename=\"{}\"",
                sanitize_content_disposition_filename(download.file_name())
            ),
        ),
        (
            header::CONTENT_TYPE,
            "application/octet-stream".to_string(),
        ),
        (header::CONTENT_LENGTH, download.len().to_string()),
    ];

    let body = Body::from_stream(download.into_stream());
    (StatusCode::OK, headers, body).into_response()
}

async fn status(State(state): State<Arc<AppState>>, Path(token): Path<String>) -> StatusCode {
    match state.transfers.status(&Token::from(token)) {
        TokenStatus::Exists => StatusCode::OK,
        TokenStatus::NotFound => StatusCode::NOT_FOUND,
    }
}

async fn qr_code(State(state): State<Arc<AppState>>, Path(token): Path<String>) -> Response {
    let token = Token::from(token);
    if state.transfers.status(&token) == TokenStatus::NotFound {
        return StatusCode::NOT_FOUND.into_response();
    }

    let url = state.download_url(&token);
    match tokio::task::spawn_blocking(move || qr::encode_png(&url, DEFAULT_QR_SIZE)).await {
        Ok(Ok(png)) => (StatusCode::OK, [(header::CONTENT_TYPE, "image/png")], png).into_response(),
        Ok(Err(e)) => {
            error!("Failed to render QR code for token {token}: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Err(e) => {
            error!("QR render task failed for token {token}: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "active": state.transfers.active_count(),
    }))
}

/// Replace characters that break the quoted-string production (RFC 6266).
fn sanitize_content_disposition_filename(name: &str) -> String {
    name.replace(['\\', '"'], "_")
}
