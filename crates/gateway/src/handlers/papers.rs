//! Paper comparison handlers

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use paperduel_common::{
    db::models::Paper,
    errors::{AppError, Result},
    source::CandidatePaper,
    MatchOutcome, RefreshReport,
};

const DEFAULT_TOP_LIMIT: u64 = 10;

/// Longest prefix of an unparseable id echoed back in errors
const MAX_ECHOED_ID_CHARS: usize = 36;

/// A paper as exposed over the API
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaperResponse {
    pub id: Uuid,
    pub external_id: String,
    pub title: String,
    pub authors: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub published_at: String,
    pub elo_rating: f64,
    pub shown: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Paper> for PaperResponse {
    fn from(paper: Paper) -> Self {
        Self {
            id: paper.id,
            external_id: paper.external_id,
            title: paper.title,
            authors: paper.authors,
            abstract_text: paper.abstract_text,
            published_at: paper.published_at.to_rfc3339(),
            elo_rating: paper.rating,
            shown: paper.shown,
            created_at: paper.created_at.to_rfc3339(),
            updated_at: paper.updated_at.to_rfc3339(),
        }
    }
}

/// Outcome of one comparison, ids as sent by the client
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    #[validate(length(min = 1, max = 64))]
    pub winner_id: String,

    #[validate(length(min = 1, max = 64))]
    pub loser_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteResponse {
    pub success: bool,
    pub winner_rating: f64,
    pub loser_rating: f64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct TopQuery {
    #[validate(range(min = 1, max = 100))]
    pub limit: Option<u64>,
}

/// An id that does not parse can never resolve to a stored paper
fn resolve_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| AppError::PaperNotFound {
        id: raw.trim().chars().take(MAX_ECHOED_ID_CHARS).collect(),
    })
}

/// Next pair to compare; refreshes the pool first when it is stale
pub async fn random_pair(State(state): State<AppState>) -> Result<Json<Vec<PaperResponse>>> {
    let (a, b) = state.arena.next_pair().await?;
    Ok(Json(vec![a.into(), b.into()]))
}

/// Record which of two papers the user preferred
pub async fn record_vote(
    State(state): State<AppState>,
    payload: std::result::Result<Json<VoteRequest>, JsonRejection>,
) -> Result<Json<VoteResponse>> {
    let Json(request) = payload.map_err(|e| AppError::InvalidFormat {
        message: e.body_text(),
    })?;
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let outcome = MatchOutcome {
        winner_id: resolve_id(&request.winner_id)?,
        loser_id: resolve_id(&request.loser_id)?,
    };
    let result = state.arena.record_vote(outcome).await?;

    Ok(Json(VoteResponse {
        success: true,
        winner_rating: result.winner_rating,
        loser_rating: result.loser_rating,
    }))
}

/// Leaderboard, best first
pub async fn top_papers(
    State(state): State<AppState>,
    query: std::result::Result<Query<TopQuery>, QueryRejection>,
) -> Result<Json<Vec<PaperResponse>>> {
    let Query(query) = query.map_err(|e| AppError::InvalidFormat {
        message: e.body_text(),
    })?;
    query.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: Some("limit".to_string()),
    })?;

    let papers = state
        .arena
        .top_papers(query.limit.unwrap_or(DEFAULT_TOP_LIMIT))
        .await?;
    Ok(Json(papers.into_iter().map(Into::into).collect()))
}

pub async fn get_paper(
    State(state): State<AppState>,
    Path(paper_id): Path<Uuid>,
) -> Result<Json<PaperResponse>> {
    let paper = state.arena.get_paper(paper_id).await?;
    Ok(Json(paper.into()))
}

/// Raw source batch for the configured topic; nothing is stored
pub async fn preview_feed(State(state): State<AppState>) -> Result<Json<Vec<CandidatePaper>>> {
    let candidates = state.arena.preview_feed().await?;
    Ok(Json(candidates))
}

/// Refresh the pool now, ignoring staleness
pub async fn refresh_pool(State(state): State<AppState>) -> Result<Json<RefreshReport>> {
    let report = state.arena.force_refresh().await?;

    tracing::info!(
        inserted = report.inserted,
        evicted = report.evicted,
        "Manual pool refresh finished"
    );

    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_id_accepts_padded_uuid() {
        let id = Uuid::new_v4();
        assert_eq!(resolve_id(&format!("  {id} ")).unwrap(), id);
    }

    #[test]
    fn test_unparseable_id_is_echoed_truncated() {
        let raw = format!("<script>{}</script>", "x".repeat(50));
        match resolve_id(&raw) {
            Err(AppError::PaperNotFound { id }) => {
                assert_eq!(id.chars().count(), MAX_ECHOED_ID_CHARS);
                assert!(raw.starts_with(&id));
            }
            other => panic!("expected PaperNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_short_unparseable_id_is_echoed_whole() {
        match resolve_id("not-a-uuid") {
            Err(AppError::PaperNotFound { id }) => assert_eq!(id, "not-a-uuid"),
            other => panic!("expected PaperNotFound, got {other:?}"),
        }
    }
}
