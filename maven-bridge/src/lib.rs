//! The HTTP face of the repository manager.
//!
//! Three surfaces: artifact resolution (`GET|HEAD /:repo/*path`),
//! deployment (`PUT /:repo/*path`) and the small `/api` corner (search,
//! ping). Handlers translate between HTTP and the resolver's vocabulary
//! and hold no logic of their own.

use std::sync::Arc;

use axum::routing::{get, head, put};
use axum::Router;
use axum_extra::headers::authorization::Basic;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;

use quarry_index::IndexManager;
use quarry_repo::{Principal, Resolver};

mod deploy;
mod fetch;
mod search;
#[cfg(test)]
mod testing;

#[derive(Clone)]
pub struct AppState {
    resolver: Arc<Resolver>,
    index: Arc<IndexManager>,
}

impl AppState {
    pub fn new(resolver: Arc<Resolver>, index: Arc<IndexManager>) -> Self {
        Self { resolver, index }
    }
}

pub fn gen_router() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/api/system/ping", get(ping))
        .route("/api/search", get(search::get))
        .route("/:repo/*path", get(fetch::get))
        .route("/:repo/*path", head(fetch::head))
        .route("/:repo/*path", put(deploy::put))
}

async fn root() -> &'static str {
    "Hello from quarry"
}

async fn ping() -> &'static str {
    "OK"
}

/// The principal a request acts as. Credentials are not verified beyond
/// their shape; authorization happens against the access rule table.
pub(crate) fn principal(auth: &Option<TypedHeader<Authorization<Basic>>>) -> Principal {
    match auth {
        Some(TypedHeader(Authorization(basic))) if !basic.username().is_empty() => {
            Principal::User(basic.username().into())
        }
        _ => Principal::Anonymous,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn principal_extraction() {
        assert_eq!(Principal::Anonymous, principal(&None));
        assert_eq!(
            Principal::Anonymous,
            principal(&Some(TypedHeader(Authorization::basic("", "secret"))))
        );
        assert_eq!(
            Principal::User("alice".into()),
            principal(&Some(TypedHeader(Authorization::basic("alice", "secret"))))
        );
    }
}
