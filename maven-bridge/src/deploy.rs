//! PUT deployment into local repositories.
//!
//! Three deployment shapes, decided by the path: checksum sidecars attach
//! a declared digest to an already-stored file, metadata documents are
//! parse-validated before storage, everything else streams straight into
//! the item store. The owning repository's checksum policy gates all of
//! them; a rejected declaration is a 409, never a silent overwrite.

use std::io;

use axum::extract::{Path, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum_extra::headers::authorization::Basic;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;
use bytes::Bytes;
use futures::TryStreamExt;
use tokio_util::io::StreamReader;
use tracing::{instrument, warn};

use maven_compat::checksum_file::ChecksumKind;
use maven_compat::{path as repo_path, Metadata};
use quarry_repo::{PathKind, Repository};
use quarry_store::{
    epoch_millis_now, Error as StoreError, HexDigest, ItemStore, RelPath, RepoPath, Wait,
    MAX_BUFFERED_DOCUMENT,
};

use crate::{principal, AppState};

pub(crate) const SHA1_HEADER: &str = "x-checksum-sha1";
pub(crate) const MD5_HEADER: &str = "x-checksum-md5";

#[instrument(skip_all, fields(repo = %repo, path = %path))]
pub async fn put(
    Path((repo, path)): Path<(String, String)>,
    State(state): State<AppState>,
    auth: Option<TypedHeader<Authorization<Basic>>>,
    request: Request,
) -> Result<StatusCode, StatusCode> {
    let rel: RelPath = path.parse().map_err(|e| {
        warn!(err = %e, "undeployable path");
        StatusCode::BAD_REQUEST
    })?;

    let repository = state
        .resolver
        .registry()
        .get(&repo)
        .ok_or(StatusCode::NOT_FOUND)?
        .clone();
    // Only a repository's own storage takes deployments; caches and
    // virtual views are read-only.
    if !repository.is_local() {
        return Err(StatusCode::METHOD_NOT_ALLOWED);
    }

    let principal = principal(&auth);
    if !state
        .resolver
        .access()
        .allows_deploy(&principal, &repository, &rel)
    {
        warn!(principal = %principal, "deploy denied");
        return Err(StatusCode::FORBIDDEN);
    }

    let store = state.resolver.store();
    match quarry_repo::classify(rel.as_str()) {
        PathKind::Checksum { kind, .. } => {
            store_sidecar(store, &repository, &rel, kind, request).await
        }
        PathKind::Metadata => store_metadata(store, &repository, &rel, request).await,
        PathKind::Standard | PathKind::Index => {
            store_artifact(store, &repository, &rel, request).await
        }
    }
}

/// Records the uploaded digest as the declared original of the file the
/// sidecar covers, then re-checks the repository's policy against the
/// stored bytes.
async fn store_sidecar(
    store: &ItemStore,
    repository: &Repository,
    rel: &RelPath,
    kind: ChecksumKind,
    request: Request,
) -> Result<StatusCode, StatusCode> {
    let bytes = buffered_body(request).await?;
    let text = std::str::from_utf8(&bytes).map_err(|e| {
        warn!(err = %e, "checksum upload is not text");
        StatusCode::BAD_REQUEST
    })?;
    let digest = HexDigest::parse(text, kind).map_err(|e| {
        warn!(err = %e, "checksum upload holds no {} digest", kind);
        StatusCode::BAD_REQUEST
    })?;

    // The path the sidecar covers; classification guarantees the suffix.
    let base = repo_path::checksum_target(rel.as_str())
        .map(|(base, _)| base.to_string())
        .ok_or(StatusCode::BAD_REQUEST)?;
    let base_rel: RelPath = base.parse().map_err(|_| StatusCode::BAD_REQUEST)?;
    let base_path =
        RepoPath::new(repository.key(), base_rel).map_err(|_| StatusCode::BAD_REQUEST)?;

    let mut handle = store
        .write(&base_path, Wait::Normal)
        .await
        .map_err(store_status)?;
    if !handle.existed() {
        warn!("checksum uploaded for a file that does not exist");
        return Err(StatusCode::NOT_FOUND);
    }

    handle.draft_mut().checksums_mut().set_original(kind, digest);
    repository
        .checksum_policy()
        .verify(handle.draft().checksums())
        .map_err(|e| {
            warn!(err = %e, "declared checksum rejected");
            StatusCode::CONFLICT
        })?;

    store.commit(handle).await.map_err(store_status)?;
    Ok(StatusCode::CREATED)
}

/// Metadata is the one document kind validated at write time; a copy that
/// does not parse would poison every later merge.
async fn store_metadata(
    store: &ItemStore,
    repository: &Repository,
    rel: &RelPath,
    request: Request,
) -> Result<StatusCode, StatusCode> {
    let declared = declared_digests(request.headers())?;
    let bytes = buffered_body(request).await?;
    let text = std::str::from_utf8(&bytes).map_err(|e| {
        warn!(err = %e, "metadata upload is not text");
        StatusCode::BAD_REQUEST
    })?;
    if let Err(e) = Metadata::parse(text) {
        warn!(err = %e, "metadata upload does not parse");
        return Err(StatusCode::BAD_REQUEST);
    }

    let path = RepoPath::new(repository.key(), rel.clone()).map_err(|_| StatusCode::BAD_REQUEST)?;
    let mut handle = store
        .write(&path, Wait::Normal)
        .await
        .map_err(store_status)?;
    for (kind, digest) in declared {
        handle.draft_mut().checksums_mut().set_original(kind, digest);
    }
    store
        .fill_bytes(
            &mut handle,
            repository.checksum_policy(),
            epoch_millis_now(),
            &bytes,
        )
        .await
        .map_err(store_status)?;
    store.commit(handle).await.map_err(store_status)?;
    Ok(StatusCode::CREATED)
}

async fn store_artifact(
    store: &ItemStore,
    repository: &Repository,
    rel: &RelPath,
    request: Request,
) -> Result<StatusCode, StatusCode> {
    let declared = declared_digests(request.headers())?;

    let stream = request.into_body().into_data_stream();
    let mut reader = StreamReader::new(stream.map_err(|e| {
        warn!(err = %e, "failed to read request body");
        io::Error::new(io::ErrorKind::BrokenPipe, e.to_string())
    }));

    let path = RepoPath::new(repository.key(), rel.clone()).map_err(|_| StatusCode::BAD_REQUEST)?;
    let mut handle = store
        .write(&path, Wait::Normal)
        .await
        .map_err(store_status)?;
    for (kind, digest) in declared {
        handle.draft_mut().checksums_mut().set_original(kind, digest);
    }
    store
        .fill_content(
            &mut handle,
            repository.checksum_policy(),
            epoch_millis_now(),
            &mut reader,
        )
        .await
        .map_err(store_status)?;
    store.commit(handle).await.map_err(store_status)?;
    Ok(StatusCode::CREATED)
}

/// Declared digests from the `X-Checksum-*` upload headers.
fn declared_digests(headers: &HeaderMap) -> Result<Vec<(ChecksumKind, HexDigest)>, StatusCode> {
    let mut declared = Vec::new();
    for (name, kind) in [
        (SHA1_HEADER, ChecksumKind::Sha1),
        (MD5_HEADER, ChecksumKind::Md5),
    ] {
        if let Some(value) = headers.get(name) {
            let digest = value
                .to_str()
                .ok()
                .and_then(|s| HexDigest::parse(s.trim(), kind).ok())
                .ok_or_else(|| {
                    warn!(header = name, "undecipherable checksum header");
                    StatusCode::BAD_REQUEST
                })?;
            declared.push((kind, digest));
        }
    }
    Ok(declared)
}

/// Sidecars and metadata are small documents; refuse anything that does
/// not fit the buffering limit.
async fn buffered_body(request: Request) -> Result<Bytes, StatusCode> {
    axum::body::to_bytes(request.into_body(), MAX_BUFFERED_DOCUMENT as usize)
        .await
        .map_err(|e| {
            warn!(err = %e, "unable to buffer document");
            StatusCode::BAD_REQUEST
        })
}

fn store_status(e: StoreError) -> StatusCode {
    match e {
        StoreError::ChecksumPolicy(_) => {
            warn!(err = %e, "deployment rejected by checksum policy");
            StatusCode::CONFLICT
        }
        StoreError::InvalidRequest(_) => {
            warn!(err = %e, "invalid deployment");
            StatusCode::BAD_REQUEST
        }
        StoreError::LockTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => {
            warn!(err = %e, "deployment failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::{as_user, seed, state, CONFIG};
    use axum::body::Body;
    use maven_compat::checksum_file::ChecksumKind;
    use pretty_assertions::assert_eq;
    use quarry_store::digest_pair;

    const JAR: &str = "com/example/widget/1.0/widget-1.0.jar";
    const METADATA: &str = "com/example/widget/maven-metadata.xml";

    const META_DOC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<metadata>
  <groupId>com.example</groupId>
  <artifactId>widget</artifactId>
  <versioning>
    <latest>1.0</latest>
    <versions><version>1.0</version></versions>
  </versioning>
</metadata>
"#;

    fn request(bytes: &[u8], headers: &[(&str, &str)]) -> Request {
        let mut builder = axum::http::Request::builder().method("PUT").uri("/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::from(bytes.to_vec())).unwrap()
    }

    async fn deploy(
        app: &crate::AppState,
        repo: &str,
        path: &str,
        user: Option<&str>,
        body: Request,
    ) -> Result<StatusCode, StatusCode> {
        put(
            Path((repo.to_string(), path.to_string())),
            State(app.clone()),
            user.and_then(as_user),
            body,
        )
        .await
    }

    #[tokio::test]
    async fn uploads_land_in_the_store() {
        let (app, _dir) = state(CONFIG).await;

        let status = deploy(&app, "dev", JAR, Some("alice"), request(b"jar bytes", &[])).await;
        assert_eq!(Ok(StatusCode::CREATED), status);

        let store = app.resolver.store();
        let item = store
            .get(&format!("dev:{JAR}").parse().unwrap())
            .await
            .unwrap()
            .expect("deployed item");
        assert_eq!(9, item.size());
        assert_eq!(
            b"jar bytes".to_vec(),
            store.read_content_bytes(&item).await.unwrap()
        );
    }

    #[tokio::test]
    async fn declared_headers_become_original_checksums() {
        let (app, _dir) = state(CONFIG).await;
        let (md5, sha1) = digest_pair(b"jar bytes");

        let status = deploy(
            &app,
            "dev",
            JAR,
            Some("alice"),
            request(
                b"jar bytes",
                &[(SHA1_HEADER, sha1.as_str()), (MD5_HEADER, md5.as_str())],
            ),
        )
        .await;
        assert_eq!(Ok(StatusCode::CREATED), status);

        let store = app.resolver.store();
        let item = store
            .get(&format!("dev:{JAR}").parse().unwrap())
            .await
            .unwrap()
            .expect("deployed item");
        assert_eq!(
            Some(&sha1),
            item.checksums().get(ChecksumKind::Sha1).original.as_ref()
        );
        assert_eq!(Some(true), item.checksums().get(ChecksumKind::Sha1).matches());
    }

    #[tokio::test]
    async fn strict_repositories_reject_mismatched_declarations() {
        let (app, _dir) = state(CONFIG).await;
        let (_, wrong) = digest_pair(b"different bytes");

        let status = deploy(
            &app,
            "strict",
            JAR,
            Some("alice"),
            request(b"jar bytes", &[(SHA1_HEADER, wrong.as_str())]),
        )
        .await;
        assert_eq!(Err(StatusCode::CONFLICT), status);

        // The rejected upload left nothing behind.
        let store = app.resolver.store();
        assert!(store
            .get(&format!("strict:{JAR}").parse().unwrap())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn strict_repositories_require_a_declaration() {
        let (app, _dir) = state(CONFIG).await;
        let status = deploy(&app, "strict", JAR, Some("alice"), request(b"jar bytes", &[])).await;
        assert_eq!(Err(StatusCode::CONFLICT), status);
    }

    #[tokio::test]
    async fn sidecar_uploads_attach_to_the_covered_file() {
        let (app, _dir) = state(CONFIG).await;
        seed(&app, &format!("dev:{JAR}"), 1_000, b"jar bytes").await;
        let (_, sha1) = digest_pair(b"jar bytes");

        let status = deploy(
            &app,
            "dev",
            &format!("{JAR}.sha1"),
            Some("alice"),
            request(sha1.as_str().as_bytes(), &[]),
        )
        .await;
        assert_eq!(Ok(StatusCode::CREATED), status);

        let store = app.resolver.store();
        let item = store
            .get(&format!("dev:{JAR}").parse().unwrap())
            .await
            .unwrap()
            .expect("covered item");
        assert_eq!(
            Some(&sha1),
            item.checksums().get(ChecksumKind::Sha1).original.as_ref()
        );
    }

    #[tokio::test]
    async fn sidecars_for_missing_files_are_rejected() {
        let (app, _dir) = state(CONFIG).await;
        let (_, sha1) = digest_pair(b"jar bytes");

        let status = deploy(
            &app,
            "dev",
            &format!("{JAR}.sha1"),
            Some("alice"),
            request(sha1.as_str().as_bytes(), &[]),
        )
        .await;
        assert_eq!(Err(StatusCode::NOT_FOUND), status);
    }

    #[tokio::test]
    async fn mismatched_sidecars_conflict_under_a_strict_policy() {
        let (app, _dir) = state(CONFIG).await;
        seed(&app, &format!("strict:{JAR}"), 1_000, b"jar bytes").await;
        let (_, wrong) = digest_pair(b"different bytes");

        let status = deploy(
            &app,
            "strict",
            &format!("{JAR}.sha1"),
            Some("alice"),
            request(wrong.as_str().as_bytes(), &[]),
        )
        .await;
        assert_eq!(Err(StatusCode::CONFLICT), status);
    }

    #[tokio::test]
    async fn metadata_must_parse_before_it_is_stored() {
        let (app, _dir) = state(CONFIG).await;

        let status = deploy(
            &app,
            "dev",
            METADATA,
            Some("alice"),
            request(b"<metadata><unclosed>", &[]),
        )
        .await;
        assert_eq!(Err(StatusCode::BAD_REQUEST), status);

        let status = deploy(
            &app,
            "dev",
            METADATA,
            Some("alice"),
            request(META_DOC.as_bytes(), &[]),
        )
        .await;
        assert_eq!(Ok(StatusCode::CREATED), status);
    }

    #[tokio::test]
    async fn deployment_is_never_anonymous() {
        let (app, _dir) = state(CONFIG).await;
        let status = deploy(&app, "dev", JAR, None, request(b"jar bytes", &[])).await;
        assert_eq!(Err(StatusCode::FORBIDDEN), status);
    }

    #[tokio::test]
    async fn only_local_repositories_take_uploads() {
        let (app, _dir) = state(CONFIG).await;
        let status = deploy(&app, "all", JAR, Some("alice"), request(b"jar bytes", &[])).await;
        assert_eq!(Err(StatusCode::METHOD_NOT_ALLOWED), status);
    }
}
