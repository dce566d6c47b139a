//! GET and HEAD artifact resolution.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use axum_extra::headers::authorization::Basic;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;
use tokio_util::io::ReaderStream;
use tracing::{instrument, warn};

use maven_compat::timestamp;
use quarry_repo::{ArtifactRequest, Outcome, ResolvedContent};
use quarry_store::RelPath;

use crate::{principal, AppState};

/// Marks requests relayed by another repository manager; remotes are
/// never consulted on their behalf.
pub(crate) const PEER_HEADER: &str = "x-quarry-peer";

#[instrument(skip_all, fields(repo = %repo, path = %path))]
pub async fn get(
    Path((repo, path)): Path<(String, String)>,
    State(state): State<AppState>,
    auth: Option<TypedHeader<Authorization<Basic>>>,
    headers: HeaderMap,
) -> Result<Response, StatusCode> {
    serve(state, repo, path, auth, headers, false).await
}

#[instrument(skip_all, fields(repo = %repo, path = %path))]
pub async fn head(
    Path((repo, path)): Path<(String, String)>,
    State(state): State<AppState>,
    auth: Option<TypedHeader<Authorization<Basic>>>,
    headers: HeaderMap,
) -> Result<Response, StatusCode> {
    serve(state, repo, path, auth, headers, true).await
}

async fn serve(
    state: AppState,
    repo: String,
    path: String,
    auth: Option<TypedHeader<Authorization<Basic>>>,
    headers: HeaderMap,
    head_only: bool,
) -> Result<Response, StatusCode> {
    let rel: RelPath = path.parse().map_err(|e| {
        warn!(err = %e, "unresolvable path");
        StatusCode::NOT_FOUND
    })?;

    let mut request = ArtifactRequest::new(repo, rel);
    request.head_only = head_only;
    request.if_modified_since = headers
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        .and_then(timestamp::parse_http_date);
    request.from_peer = headers.contains_key(PEER_HEADER);

    let outcome = state
        .resolver
        .resolve(&principal(&auth), &request)
        .await
        .map_err(|e| {
            warn!(err = %e, "resolution failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    match outcome {
        Outcome::Found(content) => respond(content, &request),
        Outcome::NotFound { reason } => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::from(reason))
            .map_err(|_| StatusCode::NOT_FOUND),
        Outcome::Forbidden => Err(StatusCode::FORBIDDEN),
    }
}

fn respond(content: ResolvedContent, request: &ArtifactRequest) -> Result<Response, StatusCode> {
    let ResolvedContent { resource, body } = content;

    let not_modified = request
        .if_modified_since
        .map_or(false, |since| resource.last_modified <= since);

    let mut builder = Response::builder()
        .status(if not_modified {
            StatusCode::NOT_MODIFIED
        } else {
            StatusCode::OK
        })
        .header(
            header::CONTENT_TYPE,
            resource
                .mime_type
                .as_deref()
                .unwrap_or("application/octet-stream"),
        )
        .header(
            header::LAST_MODIFIED,
            timestamp::format_http_date(resource.last_modified),
        );
    if !not_modified {
        builder = builder.header(header::CONTENT_LENGTH, resource.size);
    }
    if let Some(sha1) = &resource.sha1 {
        builder = builder.header("x-checksum-sha1", sha1.as_str());
    }
    if let Some(md5) = &resource.md5 {
        builder = builder.header("x-checksum-md5", md5.as_str());
    }

    let body = match body {
        _ if not_modified => Body::empty(),
        quarry_repo::Body::File(file) => Body::from_stream(ReaderStream::new(file)),
        quarry_repo::Body::Bytes(bytes) => Body::from(bytes),
        quarry_repo::Body::Empty => Body::empty(),
    };

    builder.body(body).map_err(|e| {
        warn!(err = %e, "response assembly failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}
