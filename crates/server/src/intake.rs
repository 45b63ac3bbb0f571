//! Device relay: raw SMS and notification text posted here is parsed and
//! tracked by a server-side sync controller that writes straight into the
//! record store.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use payclaim_core::{Money, NewIngestedRecord, ParsedPayment};
use payclaim_ingest::{GeminiExtractor, RawMessage, SyncController, UploadError, Uploader};
use payclaim_storage::{insert_ingested_record, DbPool, StoreError};
use serde::Deserialize;

use crate::error::ApiError;
use crate::routes::{AppState, Envelope};

pub type Intake = SyncController<StoreUploader, GeminiExtractor>;

/// Uploads by inserting into the local store.
pub struct StoreUploader {
    pool: DbPool,
}

impl StoreUploader {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl Uploader for StoreUploader {
    async fn upload(&self, record: &NewIngestedRecord) -> Result<(), UploadError> {
        insert_ingested_record(&self.pool, record)
            .await
            .map(|_| ())
            .map_err(|e| match e {
                StoreError::InvalidRecord(message) => UploadError::Rejected { status: 400, message },
                other => UploadError::Transport(other.to_string()),
            })
    }
}

#[derive(Debug, Deserialize)]
pub struct MessageBody {
    text: String,
    title: Option<String>,
    package: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionBody {
    transaction_id: String,
    amount: Option<f64>,
}

pub async fn submit_message(
    State(state): State<AppState>,
    body: Result<Json<MessageBody>, JsonRejection>,
) -> Result<(StatusCode, Json<Envelope<ParsedPayment>>), ApiError> {
    let Json(body) = body?;
    if body.text.trim().is_empty() {
        return Err(ApiError::invalid_input("text must not be empty"));
    }
    let payment = state
        .intake
        .ingest(RawMessage {
            text: body.text,
            title: body.title,
            package: body.package,
        })
        .await;
    Ok((StatusCode::CREATED, Json(Envelope::ok(payment))))
}

pub async fn list_messages(State(state): State<AppState>) -> Json<Envelope<Vec<ParsedPayment>>> {
    Json(Envelope::ok(state.intake.list().await))
}

pub async fn retry_message(
    State(state): State<AppState>,
    Path(local_id): Path<String>,
) -> Result<Json<Envelope<ParsedPayment>>, ApiError> {
    let payment = state.intake.retry(&local_id).await?;
    Ok(Json(Envelope::ok(payment)))
}

pub async fn correct_message(
    State(state): State<AppState>,
    Path(local_id): Path<String>,
    body: Result<Json<CorrectionBody>, JsonRejection>,
) -> Result<Json<Envelope<ParsedPayment>>, ApiError> {
    let Json(body) = body?;
    let amount = match body.amount {
        Some(raw) => Some(
            Money::from_f64_nonzero(raw)
                .filter(|m| m.is_positive())
                .ok_or_else(|| ApiError::invalid_input("amount must be greater than zero"))?,
        ),
        None => None,
    };
    let payment = state
        .intake
        .correct(&local_id, &body.transaction_id, amount)
        .await?;
    Ok(Json(Envelope::ok(payment)))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Path(local_id): Path<String>,
) -> Result<Json<Envelope<ParsedPayment>>, ApiError> {
    let payment = state.intake.delete(&local_id).await?;
    Ok(Json(Envelope::ok(payment)))
}
