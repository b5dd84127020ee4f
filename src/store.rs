#![forbid(unsafe_code)]

//! The download directory and everything needed to hand its files back to a
//! browser.
//!
//! Lookups are confined to plain basenames: a requested name must be exactly
//! one normal path component, so `..`, absolute paths and nested paths never
//! resolve to anything.

use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use axum::{
    body::Body,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use mime_guess::MimeGuess;
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
};
use tokio_util::io::ReaderStream;

/// Flat directory holding every downloaded artifact.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Opens the store, creating the directory (and parents) when missing.
    /// Relative roots are anchored at the current working directory.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = std::path::absolute(root.as_ref())
            .with_context(|| format!("resolving {}", root.as_ref().display()))?;
        std::fs::create_dir_all(&root)
            .with_context(|| format!("creating download directory {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a client-supplied name onto a path inside the store. Returns
    /// `None` for anything other than a single plain file name.
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        if is_plain_file_name(name) {
            Some(self.root.join(name))
        } else {
            None
        }
    }
}

fn is_plain_file_name(name: &str) -> bool {
    if name.is_empty() || name.contains(['/', '\\', '\0']) {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Why a file could not be served.
#[derive(Debug, PartialEq, Eq)]
pub enum ServeError {
    NotFound,
}

/// Streams `path` as an attachment. Honours a single `bytes=` range so large
/// videos can be resumed by the browser.
pub async fn serve_attachment(
    path: &Path,
    range: Option<&HeaderValue>,
) -> Result<Response, ServeError> {
    let mut file = File::open(path).await.map_err(|_| ServeError::NotFound)?;
    let metadata = file.metadata().await.map_err(|_| ServeError::NotFound)?;
    if !metadata.is_file() {
        return Err(ServeError::NotFound);
    }
    let size = metadata.len();
    let range = range.and_then(|value| parse_range_header(value, size));

    let mut response = if let Some((start, end)) = range {
        if start >= size {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
            insert_header(&mut response, header::CONTENT_RANGE, format!("bytes */{size}"));
            return Ok(response);
        }
        let end = end.min(size.saturating_sub(1));
        let length = end - start + 1;
        file.seek(std::io::SeekFrom::Start(start))
            .await
            .map_err(|_| ServeError::NotFound)?;
        let body = Body::from_stream(ReaderStream::new(file.take(length)));
        let mut response = body.into_response();
        *response.status_mut() = StatusCode::PARTIAL_CONTENT;
        insert_header(
            &mut response,
            header::CONTENT_RANGE,
            format!("bytes {start}-{end}/{size}"),
        );
        insert_header(&mut response, header::CONTENT_LENGTH, length.to_string());
        response
    } else {
        let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
        insert_header(&mut response, header::CONTENT_LENGTH, size.to_string());
        response
    };

    insert_header(&mut response, header::ACCEPT_RANGES, "bytes".to_string());
    let mime = MimeGuess::from_path(path).first_or_octet_stream();
    insert_header(&mut response, header::CONTENT_TYPE, mime.to_string());
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    insert_header(
        &mut response,
        header::CONTENT_DISPOSITION,
        content_disposition(&name),
    );

    Ok(response)
}

fn insert_header(response: &mut Response, name: header::HeaderName, value: String) {
    if let Ok(value) = HeaderValue::from_str(&value) {
        response.headers_mut().insert(name, value);
    }
}

/// Builds `attachment; filename="..."; filename*=UTF-8''...` so non-ASCII
/// titles survive while older clients still get a usable name.
fn content_disposition(name: &str) -> String {
    let fallback: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect();
    format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
        percent_encode(name)
    )
}

/// RFC 5987 `attr-char` encoding.
fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'!'
            | b'#'
            | b'$'
            | b'&'
            | b'+'
            | b'-'
            | b'.'
            | b'^'
            | b'_'
            | b'`'
            | b'|'
            | b'~' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn parse_range_header(value: &HeaderValue, size: u64) -> Option<(u64, u64)> {
    let raw = value.to_str().ok()?.trim();
    let spec = raw.strip_prefix("bytes=")?;
    // Multi-range requests get the whole file.
    if spec.contains(',') {
        return None;
    }
    let (start, end) = spec.split_once('-')?;
    let (start, end) = (start.trim(), end.trim());
    if start.is_empty() {
        let suffix: u64 = end.parse().ok()?;
        if suffix == 0 {
            return None;
        }
        let start = size.saturating_sub(suffix);
        return Some((start, size.saturating_sub(1)));
    }
    let start: u64 = start.parse().ok()?;
    let end = if end.is_empty() {
        size.saturating_sub(1)
    } else {
        end.parse().ok()?
    };
    if end < start {
        return None;
    }
    Some((start, end))
}
