use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use lookout_core::{LookoutError, ReviewStatus};
use lookout_review::pipeline::ReviewJob;
use lookout_review::signature::{self, SIGNATURE_HEADER};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::AppState;

pub const EVENT_HEADER: &str = "x-github-event";
pub const DELIVERY_HEADER: &str = "x-github-delivery";

/// Pull request actions that start a review.
const REVIEWED_ACTIONS: [&str; 3] = ["opened", "synchronize", "reopened"];

/// Fields required to review a pull request. Only read once the action
/// is known to be reviewed, so odd payloads for other actions still skip.
#[derive(Debug, Deserialize)]
struct PullRequestEvent {
    repository: Option<RepositoryRef>,
    pull_request: Option<PullRequestRef>,
    installation: Option<InstallationRef>,
}

#[derive(Debug, Deserialize)]
struct RepositoryRef {
    full_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PullRequestRef {
    number: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct InstallationRef {
    id: Option<u64>,
}

/// Everything needed to queue a review, validated.
#[derive(Debug, PartialEq, Eq)]
struct ReviewRequest {
    action: String,
    repo: String,
    pr_number: u64,
    installation_id: u64,
}

enum Triage {
    Review(ReviewRequest),
    Skip(Option<String>),
}

fn triage(payload: Value) -> Result<Triage, LookoutError> {
    let action = match payload.get("action").and_then(Value::as_str) {
        Some(action) if REVIEWED_ACTIONS.contains(&action) => action.to_string(),
        Some(action) => return Ok(Triage::Skip(Some(action.to_string()))),
        None => return Ok(Triage::Skip(None)),
    };

    let event: PullRequestEvent = serde_json::from_value(payload)
        .map_err(|e| LookoutError::Validation(format!("malformed pull_request payload: {e}")))?;

    let repo = event
        .repository
        .and_then(|r| r.full_name)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| LookoutError::Validation("Missing repository full name".into()))?;
    let pr_number = event
        .pull_request
        .and_then(|pr| pr.number)
        .ok_or_else(|| LookoutError::Validation("Missing pull request number".into()))?;
    let installation_id = event
        .installation
        .and_then(|i| i.id)
        .filter(|id| *id != 0)
        .ok_or_else(|| LookoutError::Validation("Missing installation id".into()))?;

    Ok(Triage::Review(ReviewRequest {
        action,
        repo,
        pr_number,
        installation_id,
    }))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// `POST /webhook/github`
///
/// Verifies the signature over the raw body, acknowledges every
/// non-reviewable delivery as skipped, and for reviewable pull request
/// actions creates a queued review and hands it to the worker queue.
pub async fn github_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    if !signature::verify(
        &state.webhook_secret,
        &body,
        header(&headers, SIGNATURE_HEADER),
    ) {
        tracing::warn!(
            delivery = header(&headers, DELIVERY_HEADER),
            "rejected webhook with invalid signature"
        );
        return Err(ApiError::Unauthorized);
    }

    let event = header(&headers, EVENT_HEADER)
        .unwrap_or_default()
        .to_string();
    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| LookoutError::Validation(format!("invalid JSON body: {e}")))?;

    if event != "pull_request" {
        tracing::debug!(event = %event, "ignoring non pull_request event");
        return Ok(Json(json!({ "received": true, "skipped": true, "event": event })));
    }

    let request = match triage(payload)? {
        Triage::Review(request) => request,
        Triage::Skip(action) => {
            tracing::debug!(?action, "ignoring pull_request action");
            return Ok(Json(json!({
                "received": true,
                "skipped": true,
                "event": event,
                "action": action,
            })));
        }
    };

    let slot = state.queue.try_reserve()?;

    let summary = format!("Webhook event: {event} ({})", request.action);
    let repo = request.repo.clone();
    let pr_number = request.pr_number;
    let review = state
        .store
        .with_session(move |session| {
            session.create_review(&repo, pr_number, ReviewStatus::Queued, &summary)
        })
        .await?;

    tracing::info!(
        review_id = %review.id,
        repo = %request.repo,
        pr = request.pr_number,
        action = %request.action,
        "review queued"
    );

    slot.dispatch(ReviewJob {
        review_id: review.id.clone(),
        repo: request.repo,
        pr_number: request.pr_number,
        installation_id: request.installation_id,
    });

    Ok(Json(json!({
        "received": true,
        "event": event,
        "review_id": review.id,
    })))
}
