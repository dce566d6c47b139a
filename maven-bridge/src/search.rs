//! Artifact search over the index manager's contexts.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use quarry_index::{Error as IndexError, IndexRecord};

use crate::AppState;

/// Hard cap on results per query, whatever the client asks for.
const MAX_RESULTS: usize = 100;

#[derive(Debug, Deserialize)]
pub(crate) struct SearchParams {
    q: String,
    /// Restrict to one repository key; spans all concrete ones otherwise.
    repo: Option<String>,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    20
}

#[derive(Debug, Serialize)]
pub(crate) struct SearchResponse {
    results: Vec<FoundArtifact>,
}

#[derive(Debug, Serialize)]
pub(crate) struct FoundArtifact {
    repo: String,
    #[serde(flatten)]
    record: IndexRecord,
    score: f32,
}

#[instrument(skip_all, fields(q = %params.q))]
pub async fn get(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, StatusCode> {
    let limit = params.limit.clamp(1, MAX_RESULTS);
    let hits = state
        .index
        .search(params.repo.as_deref(), &params.q, limit)
        .map_err(|e| match e {
            IndexError::Query(_) => StatusCode::BAD_REQUEST,
            _ => {
                warn!(err = %e, "search failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        })?;

    Ok(Json(SearchResponse {
        results: hits
            .into_iter()
            .map(|hit| FoundArtifact {
                repo: hit.repo_key,
                record: hit.record,
                score: hit.score,
            })
            .collect(),
    }))
}
