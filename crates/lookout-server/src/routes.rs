use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{SecondsFormat, Utc};
use lookout_core::{LookoutError, NewReviewComment, Review, ReviewStatus, Severity};
use lookout_review::store::NewReview;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::AppState;

/// `GET /api/health`
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "time": Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
}

/// `GET /api/reviews`, newest first.
pub async fn list_reviews(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Review>>, ApiError> {
    let reviews = state
        .store
        .with_session(move |s| s.list_reviews(params.limit))
        .await?;
    Ok(Json(reviews))
}

/// `GET /api/reviews/{id}`
pub async fn get_review(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Review>, ApiError> {
    let lookup = id.clone();
    let review = state
        .store
        .with_session(move |s| s.get_review(&lookup))
        .await?
        .ok_or_else(|| LookoutError::NotFound(format!("review {id}")))?;
    Ok(Json(review))
}

/// `POST /api/reviews`. Records an already finished review: status
/// defaults to `completed`, and `queued` or `in_progress` are rejected
/// since no pipeline run is started for it.
pub async fn create_review(
    State(state): State<AppState>,
    payload: Result<Json<NewReview>, JsonRejection>,
) -> Result<Json<Review>, ApiError> {
    let Json(new) = payload.map_err(|e| LookoutError::Validation(e.body_text()))?;
    let review = state
        .store
        .with_session(move |s| s.create_review_with_comments(&new))
        .await?;
    tracing::info!(review_id = %review.id, repo = %review.repo, "review created");
    Ok(Json(review))
}

/// `POST /api/reviews/seed`. Inserts one sample review into an empty store.
pub async fn seed_review(State(state): State<AppState>) -> Result<Json<Review>, ApiError> {
    let seeded = state
        .store
        .with_session(|s| {
            if s.has_any_reviews()? {
                return Ok(None);
            }
            s.create_review_with_comments(&sample_review()).map(Some)
        })
        .await?;
    seeded
        .map(Json)
        .ok_or_else(|| ApiError::Conflict("Reviews already exist".into()))
}

fn sample_review() -> NewReview {
    NewReview {
        repo: "octo-org/example-repo".into(),
        pr_number: 42,
        summary: "Sample AI review: Checked diff for issues.".into(),
        status: ReviewStatus::Completed,
        comments: vec![
            NewReviewComment {
                file_path: "src/api/service.py".into(),
                line_start: 18,
                line_end: 22,
                message: "Potential null dereference when user is None.".into(),
                severity: Severity::Warning,
            },
            NewReviewComment {
                file_path: "src/utils/date.ts".into(),
                line_start: 4,
                line_end: 4,
                message: "Consider UTC parsing to avoid timezone issues.".into(),
                severity: Severity::Info,
            },
        ],
    }
}
