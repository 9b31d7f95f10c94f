//! HTTP endpoints for rstr.
//!
//! Uploads stream straight from the request body into a staging file on a
//! blocking thread, so a blob never has to fit in memory. Downloads stream
//! from an already-open handle, which keeps a concurrent delete from
//! truncating a response.
//!
//! `POST /blobs` also accepts `multipart/form-data`; every part named `file`
//! is stored, with its own content type and file name.

use std::fmt::Write as _;
use std::io;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{
        multipart::Field, DefaultBodyLimit, FromRequest, Multipart, Path, Query, Request, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use cas::{
    BlobReference, BlobStore, CasError, ContentHash, FileStore, PutOptions, PutOutcome,
    DEFAULT_MIME_TYPE,
};
use chrono::{DateTime, SecondsFormat, Utc};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::{ReaderStream, StreamReader, SyncIoBridge};
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::range::{self, ByteRange};

/// Request header carrying the uploader's file name.
pub const FILENAME_HEADER: &str = "x-filename";

/// Response header repeating the digest of the served blob.
pub const CONTENT_HASH_HEADER: &str = "x-content-hash";

/// Response header with the blob's creation time (RFC 3339).
pub const CREATED_HEADER: &str = "created";

/// Multipart field name that carries an upload.
pub const MULTIPART_FILE_FIELD: &str = "file";

const IMMUTABLE: &str = "public, max-age=31536000, immutable";

/// Shared state for web handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<FileStore>,
    /// Default page size for `GET /blobs`.
    pub list_limit: usize,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(serve_root))
        .route("/status", get(status))
        .route("/blobs", get(list_blobs).post(upload_blob))
        .route(
            "/blobs/{hash}",
            get(download_blob)
                .head(head_blob)
                .put(upload_blob_as)
                .delete(delete_blob),
        )
        .route("/blobs/{hash}/meta", get(blob_meta))
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve root discovery endpoint
async fn serve_root() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "rstr",
        "version": env!("CARGO_PKG_VERSION"),
        "links": {
            "blobs": "/blobs",
            "status": "/status",
        }
    }))
}

async fn status() -> StatusCode {
    StatusCode::OK
}

/// Run store work off the async executor.
async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> cas::Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(e) => {
            tracing::error!(error = %e, "blocking store task failed");
            Err(ApiError::internal())
        }
    }
}

fn parse_hash(raw: &str) -> Result<ContentHash, ApiError> {
    raw.parse::<ContentHash>()
        .map_err(|e| ApiError::from(CasError::from(e)))
}

fn header_str(headers: &HeaderMap, name: impl header::AsHeaderName) -> Option<&str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Hints for a put. The generic binary type says nothing about the
/// content, so it is left for the store to sniff.
fn hinted_options(mime_type: Option<&str>, filename: Option<&str>) -> PutOptions {
    let mut options = PutOptions::default();
    if let Some(mime_type) = mime_type.filter(|m| !is_generic_binary(m)) {
        options = options.with_mime_type(mime_type);
    }
    if let Some(filename) = filename {
        options = options.with_filename(filename);
    }
    options
}

fn is_generic_binary(mime_type: &str) -> bool {
    mime_type
        .split(';')
        .next()
        .map(str::trim)
        .is_some_and(|essence| essence.eq_ignore_ascii_case(DEFAULT_MIME_TYPE))
}

fn put_options(headers: &HeaderMap) -> PutOptions {
    hinted_options(
        header_str(headers, header::CONTENT_TYPE),
        header_str(headers, FILENAME_HEADER),
    )
}

fn is_multipart(headers: &HeaderMap) -> bool {
    header_str(headers, header::CONTENT_TYPE)
        .is_some_and(|ct| ct.to_ascii_lowercase().starts_with("multipart/form-data"))
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    hash: ContentHash,
    size: u64,
    created: bool,
}

async fn store_body(state: &AppState, body: Body, options: PutOptions) -> Result<PutOutcome, ApiError> {
    let stream = body.into_data_stream().map_err(io::Error::other);
    // Built here so the bridge captures the runtime handle.
    let mut reader = SyncIoBridge::new(StreamReader::new(stream));
    let store = Arc::clone(&state.store);
    blocking(move || store.put(&mut reader, options)).await
}

/// Store one multipart field. The field borrows the request, so its chunks
/// are forwarded over a channel to the blocking put.
async fn store_field(
    state: &AppState,
    mut field: Field<'_>,
    options: PutOptions,
) -> Result<PutOutcome, ApiError> {
    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(4);
    let mut reader = SyncIoBridge::new(StreamReader::new(ReceiverStream::new(rx)));
    let store = Arc::clone(&state.store);
    let put = blocking(move || store.put(&mut reader, options));

    let pump = async move {
        loop {
            let next = match field.chunk().await {
                Ok(Some(chunk)) => Ok(chunk),
                Ok(None) => break,
                Err(e) => Err(io::Error::other(e)),
            };
            let failed = next.is_err();
            // A closed channel means the put stopped reading.
            if tx.send(next).await.is_err() || failed {
                break;
            }
        }
    };

    let (outcome, ()) = tokio::join!(put, pump);
    outcome
}

fn invalid_multipart(message: String) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "InvalidMultipart", message)
}

fn upload_status(created: bool) -> StatusCode {
    if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    }
}

impl From<PutOutcome> for UploadResponse {
    fn from(outcome: PutOutcome) -> Self {
        Self {
            hash: outcome.hash,
            size: outcome.size_bytes,
            created: outcome.created,
        }
    }
}

fn upload_response(outcome: PutOutcome) -> Response {
    let status = upload_status(outcome.created);
    let location = format!("/blobs/{}", outcome.hash);
    let body = UploadResponse::from(outcome);
    (status, [(header::LOCATION, location)], Json(body)).into_response()
}

#[tracing::instrument(name = "http.blob.upload", skip_all, fields(hash = tracing::field::Empty))]
async fn upload_blob(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response, ApiError> {
    if is_multipart(request.headers()) {
        return upload_multipart(state, request).await;
    }

    let options = put_options(request.headers());
    let outcome = store_body(&state, request.into_body(), options).await?;
    tracing::Span::current().record("hash", outcome.hash.short());
    Ok(upload_response(outcome))
}

async fn upload_multipart(state: AppState, request: Request) -> Result<Response, ApiError> {
    let mut multipart = Multipart::from_request(request, &state)
        .await
        .map_err(|e| invalid_multipart(e.body_text()))?;

    let mut stored = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| invalid_multipart(e.body_text()))?
    {
        if field.name() != Some(MULTIPART_FILE_FIELD) {
            continue;
        }
        let options = hinted_options(field.content_type(), field.file_name());
        let outcome = store_field(&state, field, options).await?;
        tracing::debug!(
            hash = %outcome.hash.short(),
            created = outcome.created,
            "stored multipart file"
        );
        stored.push(UploadResponse::from(outcome));
    }

    if stored.is_empty() {
        return Err(invalid_multipart(format!(
            "no `{}` field in form",
            MULTIPART_FILE_FIELD
        )));
    }
    let status = upload_status(stored.iter().any(|upload| upload.created));
    Ok((status, Json(stored)).into_response())
}

/// Upload with a digest the content must match.
#[tracing::instrument(name = "http.blob.upload_as", skip(state, headers, body))]
async fn upload_blob_as(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, ApiError> {
    // Reject a bad reference before reading any of the body.
    let expected = parse_hash(&hash)?;
    let options = put_options(&headers).expecting(expected);
    let outcome = store_body(&state, body, options).await?;
    Ok(upload_response(outcome))
}

async fn download_blob(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    serve_blob(&state, &hash, &headers, true).await
}

async fn head_blob(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    serve_blob(&state, &hash, &headers, false).await
}

/// An opened blob and what to send from it.
struct Opened {
    reference: BlobReference,
    size: u64,
    plan: ByteRange,
    reader: Option<cas::BlobReader>,
}

async fn serve_blob(
    state: &AppState,
    raw: &str,
    headers: &HeaderMap,
    with_body: bool,
) -> Result<Response, ApiError> {
    let hash = parse_hash(raw)?;
    let etag = format!("\"{}\"", hash);
    let not_modified = etag_matches(headers, &etag);
    let range_header = header_str(headers, header::RANGE)
        .filter(|_| with_body && !not_modified)
        .map(str::to_owned);

    let store = Arc::clone(&state.store);
    let lookup = hash.clone();
    let opened = blocking(move || {
        let reference = store.inspect(&lookup)?;
        // One open per request; a range narrows the same handle.
        let reader = store.get(&lookup)?;
        let size = reader.size();
        let plan = range::resolve(range_header.as_deref(), size);
        let reader = match &plan {
            _ if !with_body || not_modified => None,
            ByteRange::Partial(slice) => Some(reader.slice(slice.clone())?),
            ByteRange::Full => Some(reader),
            ByteRange::Unsatisfiable => None,
        };
        Ok(Opened {
            reference,
            size,
            plan,
            reader,
        })
    })
    .await?;

    if opened.plan == ByteRange::Unsatisfiable {
        return Err(ApiError::range_not_satisfiable(opened.size));
    }

    let mut builder = Response::builder()
        .header(header::ETAG, &etag)
        .header(header::CACHE_CONTROL, IMMUTABLE)
        .header(CONTENT_HASH_HEADER, hash.as_str());

    if not_modified {
        return builder
            .status(StatusCode::NOT_MODIFIED)
            .body(Body::empty())
            .map_err(build_failed);
    }

    let reference = &opened.reference;
    builder = builder
        .header(header::CONTENT_TYPE, &reference.mime_type)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition(reference.filename.as_deref()),
        )
        .header(CREATED_HEADER, rfc3339(&reference.created));

    let (status, length) = match &opened.plan {
        ByteRange::Partial(slice) => {
            builder = builder.header(header::CONTENT_RANGE, range::content_range(slice, opened.size));
            (StatusCode::PARTIAL_CONTENT, slice.end - slice.start)
        }
        _ => (StatusCode::OK, opened.size),
    };

    let body = match opened.reader {
        Some(reader) => {
            let (file, remaining) = reader.into_parts();
            let file = tokio::fs::File::from_std(file);
            Body::from_stream(ReaderStream::new(file.take(remaining.end - remaining.start)))
        }
        None => Body::empty(),
    };

    builder
        .status(status)
        .header(header::CONTENT_LENGTH, length)
        .body(body)
        .map_err(build_failed)
}

fn build_failed(e: axum::http::Error) -> ApiError {
    tracing::error!(error = %e, "failed to build response");
    ApiError::internal()
}

/// True when any `If-None-Match` entry names this ETag (weakly) or is `*`.
fn etag_matches(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get_all(header::IF_NONE_MATCH)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .any(|tag| tag == "*" || tag == etag || tag.strip_prefix("W/") == Some(etag))
}

fn content_disposition(filename: Option<&str>) -> String {
    let Some(name) = filename else {
        return "attachment".to_string();
    };
    let plain = name
        .bytes()
        .all(|b| (0x20..0x7f).contains(&b) && b != b'"' && b != b'\\');
    if plain {
        format!("attachment; filename=\"{}\"", name)
    } else {
        format!("attachment; filename*=UTF-8''{}", percent_encode(name))
    }
}

/// RFC 5987 value encoding.
fn percent_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len() * 3);
    for b in value.bytes() {
        if b.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&b) {
            out.push(b as char);
        } else {
            let _ = write!(out, "%{:02X}", b);
        }
    }
    out
}

fn rfc3339(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[tracing::instrument(name = "http.blob.delete", skip(state))]
async fn delete_blob(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<StatusCode, ApiError> {
    let hash = parse_hash(&hash)?;
    let store = Arc::clone(&state.store);
    blocking(move || store.delete(&hash)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Blob metadata response
#[derive(Debug, Serialize)]
struct BlobMeta {
    hash: ContentHash,
    mime_type: String,
    size: u64,
    filename: Option<String>,
    created: DateTime<Utc>,
}

impl From<BlobReference> for BlobMeta {
    fn from(reference: BlobReference) -> Self {
        Self {
            hash: reference.hash,
            mime_type: reference.mime_type,
            size: reference.size_bytes,
            filename: reference.filename,
            created: reference.created,
        }
    }
}

async fn blob_meta(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Json<BlobMeta>, ApiError> {
    let hash = parse_hash(&hash)?;
    let store = Arc::clone(&state.store);
    let reference = blocking(move || store.inspect(&hash)).await?;
    Ok(Json(reference.into()))
}

/// Query parameters for listing
#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<usize>,
}

async fn list_blobs(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ContentHash>>, ApiError> {
    let limit = query.limit.unwrap_or(state.list_limit);
    let store = Arc::clone(&state.store);
    // Sorting a large index is real work.
    let hashes = blocking(move || Ok(store.list(limit))).await?;
    Ok(Json(hashes))
}
