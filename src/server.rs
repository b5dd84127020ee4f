#![forbid(unsafe_code)]

//! Axum surface: the landing page, the download trigger and the file route.
//!
//! `POST /download` blocks until yt-dlp is done, then answers with the name
//! of the file the browser should fetch next from `/downloads/{filename}`.

use std::{path::PathBuf, sync::Arc};

use axum::{
    Json, Router,
    extract::{Path as AxumPath, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio::signal;
use tracing::{debug, error, info, warn};

use crate::downloader::{DownloadFailure, MediaDownloader, classify_failure};
use crate::store::{FileStore, ServeError, serve_attachment};

pub const URL_REQUIRED_MESSAGE: &str = "URL is required";
pub const AGE_RESTRICTED_MESSAGE: &str = "This is an age-restricted video. Please provide a cookies.txt file from your browser to download it.";
pub const GENERIC_FAILURE_MESSAGE: &str =
    "An unexpected error occurred on the server. The issue has been logged.";

const BUILTIN_INDEX: &str = include_str!("../www/index.html");

#[derive(Clone)]
pub struct AppState {
    downloader: Arc<dyn MediaDownloader>,
    store: Arc<FileStore>,
    www_root: Arc<PathBuf>,
}

impl AppState {
    pub fn new(
        downloader: Arc<dyn MediaDownloader>,
        store: FileStore,
        www_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            downloader,
            store: Arc::new(store),
            www_root: Arc::new(www_root.into()),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/download", post(start_download))
        .route("/downloads/{filename}", get(serve_download))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DownloadResponse {
    pub download_filename: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn forbidden(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<DownloadFailure> for ApiError {
    fn from(failure: DownloadFailure) -> Self {
        match failure {
            DownloadFailure::AgeRestricted => Self::forbidden(AGE_RESTRICTED_MESSAGE),
            DownloadFailure::Other => Self::internal(GENERIC_FAILURE_MESSAGE),
        }
    }
}

impl From<ServeError> for ApiError {
    fn from(err: ServeError) -> Self {
        match err {
            ServeError::NotFound => Self::not_found("file not found"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Resolves once Ctrl+C arrives so `axum::serve` can drain connections.
pub async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        warn!("failed to install Ctrl+C handler: {err}");
        return;
    }
    info!("shutdown requested");
}

async fn index(State(state): State<AppState>) -> Html<String> {
    let path = state.www_root.join("index.html");
    match tokio::fs::read_to_string(&path).await {
        Ok(html) => Html(html),
        Err(err) => {
            debug!(path = %path.display(), "serving built-in index page: {err}");
            Html(BUILTIN_INDEX.to_string())
        }
    }
}

async fn start_download(
    State(state): State<AppState>,
    payload: Result<Json<DownloadRequest>, JsonRejection>,
) -> ApiResult<Json<DownloadResponse>> {
    let requested = match payload {
        Ok(Json(request)) => request.url,
        Err(rejection) => {
            debug!("unreadable download request: {rejection}");
            None
        }
    };
    let url = requested
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty())
        .ok_or_else(|| ApiError::bad_request(URL_REQUIRED_MESSAGE))?;

    info!(url = %url, "download requested");
    let downloader = Arc::clone(&state.downloader);
    let job_url = url.clone();
    let outcome = tokio::task::spawn_blocking(move || downloader.download(&job_url))
        .await
        .map_err(|err| {
            error!(url = %url, "download task panicked: {err}");
            ApiError::internal(GENERIC_FAILURE_MESSAGE)
        })?;

    match outcome {
        Ok(download_filename) => {
            info!(url = %url, filename = %download_filename, "download finished");
            Ok(Json(DownloadResponse { download_filename }))
        }
        Err(err) => {
            error!(url = %url, "download failed: {err:#}");
            Err(classify_failure(&err).into())
        }
    }
}

async fn serve_download(
    State(state): State<AppState>,
    AxumPath(filename): AxumPath<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let Some(path) = state.store.resolve(&filename) else {
        warn!(filename = %filename, "rejected file name outside the download directory");
        return Err(ApiError::not_found("file not found"));
    };
    serve_attachment(&path, headers.get(header::RANGE))
        .await
        .map_err(ApiError::from)
}
