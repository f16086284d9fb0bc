//! HTTP surface for the review pipeline.
//!
//! All endpoints live under `/api`:
//!
//! - `POST /api/upsert` ingests every paper uploaded for a session (`{ "id": session }`).
//! - `POST /api/generate` writes a review for `{ "id": session, "prompt": question }` and returns
//!   the composed text plus the per-section drafts.
//! - `POST /api/save`, `POST /api/query`, `POST /api/query_user_history`, and
//!   `POST /api/delete_user_history` manage saved reviews.
//! - `GET /api/metrics` reports pipeline counters.

use crate::history::{HistoryError, NewHistoryEntry};
use crate::review::{IngestReport, Review};
use crate::service::{ReviewApi, ReviewServiceError};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Build the HTTP router over `service`.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: ReviewApi + 'static,
{
    Router::new()
        .route("/api/upsert", post(upsert_session::<S>))
        .route("/api/generate", post(generate_review::<S>))
        .route("/api/save", post(save_review::<S>))
        .route("/api/query", post(query_review::<S>))
        .route("/api/query_user_history", post(query_user_history::<S>))
        .route("/api/delete_user_history", post(delete_user_history::<S>))
        .route("/api/metrics", get(get_metrics::<S>))
        .with_state(service)
}

#[derive(Deserialize)]
struct SessionRequest {
    /// Session whose uploads are used.
    id: String,
}

#[derive(Serialize)]
struct UpsertResponse {
    message: &'static str,
    papers: Vec<IngestReport>,
}

async fn upsert_session<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<SessionRequest>,
) -> Result<Json<UpsertResponse>, AppError>
where
    S: ReviewApi,
{
    let papers = service.ingest_session(&request.id).await?;
    let stored: usize = papers.iter().map(|report| report.stored).sum();
    tracing::info!(session_id = %request.id, papers = papers.len(), stored, "Upsert request completed");
    Ok(Json(UpsertResponse {
        message: "Vectors upserted successfully",
        papers,
    }))
}

#[derive(Deserialize)]
struct GenerateRequest {
    id: String,
    prompt: String,
}

#[derive(Serialize)]
struct GenerateResponse {
    systematic_review: String,
    sections: Review,
}

async fn generate_review<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, AppError>
where
    S: ReviewApi,
{
    let review = service.generate(&request.id, &request.prompt).await?;
    let systematic_review = review.compose();
    tracing::info!(
        session_id = %request.id,
        chars = systematic_review.chars().count(),
        failed_sections = review.failed_sections(),
        "Generate request completed"
    );
    Ok(Json(GenerateResponse {
        systematic_review,
        sections: review,
    }))
}

/// Body of `POST /api/save`. `user_id` is a list whose first element owns the review.
#[derive(Deserialize)]
struct SaveRequest {
    user_id: Vec<i64>,
    prompt_id: i64,
    prompt: String,
    systematic_review: String,
}

async fn save_review<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<SaveRequest>,
) -> Result<Json<serde_json::Value>, AppError>
where
    S: ReviewApi,
{
    let Some(&user_id) = request.user_id.first() else {
        return Err(ReviewServiceError::InvalidRequest("user_id must contain at least one id".into()).into());
    };
    service
        .save_review(NewHistoryEntry {
            user_id,
            prompt_id: request.prompt_id,
            prompt: request.prompt,
            systematic_review: request.systematic_review,
        })
        .await?;
    Ok(Json(json!({ "message": "Systematic review has been stored successfully" })))
}

#[derive(Deserialize)]
struct PromptRequest {
    prompt_id: i64,
}

async fn query_review<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<PromptRequest>,
) -> Result<Json<serde_json::Value>, AppError>
where
    S: ReviewApi,
{
    let entry = service.get_review(request.prompt_id).await?;
    Ok(Json(json!({
        "message": "Found systematic review successfully",
        "prompt": entry.prompt,
        "systematic_review": entry.systematic_review,
    })))
}

#[derive(Deserialize)]
struct UserRequest {
    user_id: i64,
}

#[derive(Serialize)]
struct HistoryItem {
    prompt_id: i64,
    prompt: String,
    created_at: String,
}

async fn query_user_history<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<UserRequest>,
) -> Result<Json<serde_json::Value>, AppError>
where
    S: ReviewApi,
{
    let result: Vec<HistoryItem> = service
        .user_history(request.user_id)
        .await?
        .into_iter()
        .map(|entry| HistoryItem {
            prompt_id: entry.prompt_id,
            prompt: entry.prompt,
            created_at: entry.created_at,
        })
        .collect();
    Ok(Json(json!({
        "message": "Found user history successfully",
        "result": result,
    })))
}

async fn delete_user_history<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<PromptRequest>,
) -> Result<Json<serde_json::Value>, AppError>
where
    S: ReviewApi,
{
    service.delete_review(request.prompt_id).await?;
    Ok(Json(json!({ "message": "History deleted successfully" })))
}

async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<crate::metrics::MetricsSnapshot>
where
    S: ReviewApi,
{
    Json(service.metrics_snapshot())
}

struct AppError(ReviewServiceError);

impl AppError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            ReviewServiceError::InvalidRequest(_) | ReviewServiceError::InvalidSession(_) => StatusCode::BAD_REQUEST,
            ReviewServiceError::SessionNotFound(_) | ReviewServiceError::History(HistoryError::NotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            ReviewServiceError::History(HistoryError::Duplicate(_)) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl From<ReviewServiceError> for AppError {
    fn from(inner: ReviewServiceError) -> Self {
        Self(inner)
    }
}
