use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use payclaim_core::{
    ClaimRequest, IngestedRecord, Money, NewIngestedRecord, Provider, RecordId, RequesterMeta,
    VerificationLog,
};
use payclaim_ingest::GeminiExtractor;
use payclaim_storage::{
    get_record, insert_ingested_record, recent_logs, recent_records, set_record_used, DbPool,
    VerificationEngine, VerifyConfig,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::intake::{self, Intake, StoreUploader};

const BODY_LIMIT: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub engine: VerificationEngine,
    pub intake: Arc<Intake>,
}

impl AppState {
    pub fn new(pool: DbPool, verify: VerifyConfig, fallback: GeminiExtractor) -> Self {
        let uploader = StoreUploader::new(pool.clone());
        AppState {
            engine: VerificationEngine::new(pool, verify),
            intake: Arc::new(Intake::new(uploader, fallback)),
        }
    }

    fn pool(&self) -> &DbPool {
        self.engine.pool()
    }
}

#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
    data: T,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Envelope {
            ok: true,
            code: None,
            message: None,
            data,
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/verify", post(verify).fallback(method_not_allowed))
        .route("/api/verify-payment", post(verify).fallback(method_not_allowed))
        .route("/api/notifications", get(list_records).post(upload_record))
        .route("/api/notifications/{id}/used", post(toggle_used))
        .route("/api/logs", get(list_logs))
        .route("/api/messages", get(intake::list_messages).post(intake::submit_message))
        .route("/api/messages/{local_id}", delete(intake::delete_message))
        .route("/api/messages/{local_id}/retry", post(intake::retry_message))
        .route("/api/messages/{local_id}/correct", post(intake::correct_message))
        .fallback(route_not_found)
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Health ────────────────────────────────────────────────────────────────────

async fn root() -> &'static str {
    "payclaim API server is running"
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn method_not_allowed() -> ApiError {
    ApiError::method_not_allowed()
}

async fn route_not_found() -> ApiError {
    ApiError::not_found("No such route")
}

// ── Verify ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyBody {
    transaction_id: String,
    amount: f64,
    provider: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyData {
    transaction_id: String,
    amount: Money,
    provider: Provider,
    matched_doc_id: String,
    verified_at: DateTime<Utc>,
}

fn header<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// First `x-forwarded-for` entry, or `"unknown"`.
fn requester(headers: &HeaderMap) -> RequesterMeta {
    let ip = header(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("unknown");
    RequesterMeta {
        ip: Some(ip.to_string()),
        user_agent: header(headers, "user-agent").map(str::to_string),
    }
}

async fn verify(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<VerifyBody>, JsonRejection>,
) -> Result<Json<Envelope<VerifyData>>, ApiError> {
    let Json(body) = body?;
    // Unrecognised providers and unusable amounts are left for validation so
    // the attempt is still audited.
    let provider = body.provider.parse().unwrap_or(Provider::Unknown);
    let amount = Money::from_f64_nonzero(body.amount).unwrap_or_else(Money::zero);
    let request = ClaimRequest::new(body.transaction_id, amount, provider);

    let verification = state.engine.verify(request, requester(&headers)).await?;
    Ok(Json(Envelope {
        ok: true,
        code: Some("verified"),
        message: Some("Payment verified successfully"),
        data: VerifyData {
            transaction_id: verification.transaction_code,
            amount: verification.amount,
            provider: verification.provider,
            matched_doc_id: verification.matched_record_id.to_string(),
            verified_at: verification.verified_at,
        },
    }))
}

// ── Ingested records ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct PageQuery {
    limit: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadData {
    record_id: RecordId,
}

async fn upload_record(
    State(state): State<AppState>,
    body: Result<Json<NewIngestedRecord>, JsonRejection>,
) -> Result<(StatusCode, Json<Envelope<UploadData>>), ApiError> {
    let Json(record) = body?;
    let (record_id, created) = insert_ingested_record(state.pool(), &record).await?;
    tracing::info!(%record_id, created, "ingested record received");
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(Envelope::ok(UploadData { record_id }))))
}

async fn list_records(
    State(state): State<AppState>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> Result<Json<Envelope<Vec<IngestedRecord>>>, ApiError> {
    let Query(page) = query.map_err(|e| ApiError::invalid_input(e.body_text()))?;
    let records = recent_records(state.pool(), page.limit).await?;
    Ok(Json(Envelope::ok(records)))
}

#[derive(Debug, Deserialize)]
struct UsedBody {
    used: bool,
}

async fn toggle_used(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Result<Json<UsedBody>, JsonRejection>,
) -> Result<Json<Envelope<IngestedRecord>>, ApiError> {
    let Json(body) = body?;
    let id = RecordId(id);
    if !set_record_used(state.pool(), id, body.used).await? {
        return Err(ApiError::not_found(format!("No record with id {id}")));
    }
    tracing::info!(record_id = %id, used = body.used, "record usage changed by admin");
    let record = get_record(state.pool(), id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("No record with id {id}")))?;
    Ok(Json(Envelope::ok(record)))
}

async fn list_logs(
    State(state): State<AppState>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> Result<Json<Envelope<Vec<VerificationLog>>>, ApiError> {
    let Query(page) = query.map_err(|e| ApiError::invalid_input(e.body_text()))?;
    let logs = recent_logs(state.pool(), page.limit).await?;
    Ok(Json(Envelope::ok(logs)))
}
