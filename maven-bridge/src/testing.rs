//! Fixtures shared by the handler tests.

use std::sync::Arc;

use axum::response::Response;
use axum_extra::headers::authorization::Basic;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;

use quarry_index::IndexManager;
use quarry_repo::{AccessControl, Registry, Resolver, Settings};
use quarry_store::{ChecksumPolicyKind, ItemStore, LockTimeouts, RepoPath, Wait};

use crate::AppState;

/// One open local, one locals-only private repo, one strict-policy repo
/// and a virtual over the first two. Alice is the only named user.
pub(crate) const CONFIG: &str = r#"
    [[repository]]
    key = "dev"
    type = "local"

    [[repository]]
    key = "private"
    type = "local"
    anonymous_read = false

    [[repository]]
    key = "strict"
    type = "local"
    checksum_policy = "verify-against-client"

    [[repository]]
    key = "all"
    type = "virtual"
    members = ["dev", "private"]

    [[access]]
    user = "alice"
    repo = "*"
"#;

pub(crate) async fn state(config: &str) -> (AppState, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        ItemStore::open(dir.path(), LockTimeouts::default())
            .await
            .unwrap(),
    );
    let settings = Settings::parse(config).unwrap();
    let registry = Arc::new(Registry::from_settings(&settings).unwrap());
    let access = AccessControl::new(settings.access_rules.clone());
    let resolver = Arc::new(Resolver::new(store, registry, access));
    let index = Arc::new(IndexManager::new(resolver.store().clone(), resolver.clone()));
    (AppState::new(resolver, index), dir)
}

pub(crate) async fn seed(state: &AppState, repo_path: &str, last_modified: u64, bytes: &[u8]) {
    let store = state.resolver.store();
    let path: RepoPath = repo_path.parse().unwrap();
    let mut handle = store.write(&path, Wait::Normal).await.unwrap();
    store
        .fill_bytes(
            &mut handle,
            ChecksumPolicyKind::default(),
            last_modified,
            bytes,
        )
        .await
        .unwrap();
    store.commit(handle).await.unwrap();
}

pub(crate) fn as_user(name: &str) -> Option<TypedHeader<Authorization<Basic>>> {
    Some(TypedHeader(Authorization::basic(name, "secret")))
}

pub(crate) async fn read_body(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}
