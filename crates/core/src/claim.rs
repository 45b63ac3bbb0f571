use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::money::Money;
use super::payment::RecordId;
use super::provider::Provider;

pub const MIN_CODE_LEN: usize = 3;

/// Candidate records read per verification attempt.
pub const CANDIDATE_LIMIT: u32 = 10;

/// Largest accepted gap between the claimed and the observed amount, in paisa.
pub const AMOUNT_TOLERANCE_CENTS: i64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Transaction ID not found in our records")]
    NotFound,
    #[error("The amount entered does not match the transaction record")]
    AmountMismatch,
    #[error("This Transaction ID has already been verified")]
    AlreadyUsed,
    #[error("Server error: {0}")]
    ServerError(String),
}

impl VerifyError {
    /// Stable machine-readable code used on the wire and in audit logs.
    pub fn code(&self) -> &'static str {
        match self {
            VerifyError::InvalidInput(_) => "invalid_input",
            VerifyError::NotFound => "not_found",
            VerifyError::AmountMismatch => "amount_mismatch",
            VerifyError::AlreadyUsed => "already_used",
            VerifyError::ServerError(_) => "server_error",
        }
    }

    /// Only store or transport failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, VerifyError::ServerError(_))
    }
}

/// A payer's claim as submitted, before any checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimRequest {
    pub transaction_code: String,
    pub amount: Money,
    pub provider: Provider,
}

/// A claim that passed input validation and may be run against the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidClaim {
    pub transaction_code: String,
    pub amount: Money,
    pub provider: Provider,
}

impl ClaimRequest {
    pub fn new(transaction_code: impl Into<String>, amount: Money, provider: Provider) -> Self {
        ClaimRequest {
            transaction_code: transaction_code.into(),
            amount,
            provider,
        }
    }

    /// Trims the code but leaves its case alone; callers upper-case before
    /// submitting.
    pub fn validate(self) -> Result<ValidClaim, VerifyError> {
        let code = self.transaction_code.trim();
        if code.chars().count() < MIN_CODE_LEN {
            return Err(VerifyError::InvalidInput(format!(
                "transaction code must be at least {MIN_CODE_LEN} characters"
            )));
        }
        if !self.amount.is_positive() {
            return Err(VerifyError::InvalidInput(
                "amount must be greater than zero".to_string(),
            ));
        }
        if !self.provider.is_known() {
            return Err(VerifyError::InvalidInput(
                "provider must be one of bkash, nagad, rocket".to_string(),
            ));
        }
        Ok(ValidClaim {
            transaction_code: code.to_string(),
            amount: self.amount,
            provider: self.provider,
        })
    }
}

/// Returned to the caller on a successful claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verification {
    pub transaction_code: String,
    pub amount: Money,
    pub provider: Provider,
    pub matched_record_id: RecordId,
    pub verified_at: DateTime<Utc>,
}

/// The persisted exclusivity marker for one transaction code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationClaim {
    pub transaction_code: String,
    pub amount: Money,
    pub provider: Provider,
    pub matched_record_id: RecordId,
    pub verified_at: DateTime<Utc>,
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogAction {
    #[serde(rename = "VERIFY_SUCCESS")]
    VerifySuccess,
    #[serde(rename = "VERIFY_FAILED")]
    VerifyFailed,
}

impl fmt::Display for LogAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogAction::VerifySuccess => write!(f, "VERIFY_SUCCESS"),
            LogAction::VerifyFailed => write!(f, "VERIFY_FAILED"),
        }
    }
}

impl std::str::FromStr for LogAction {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "VERIFY_SUCCESS" => Ok(LogAction::VerifySuccess),
            "VERIFY_FAILED" => Ok(LogAction::VerifyFailed),
            other => Err(format!("Unknown log action: '{other}'")),
        }
    }
}

/// Who asked, as far as the transport can tell.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequesterMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// One append-only audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationLog {
    pub id: i64,
    pub action: LogAction,
    pub transaction_code: Option<String>,
    pub amount: Option<Money>,
    pub provider: Option<Provider>,
    pub error_code: Option<String>,
    pub requester: RequesterMeta,
    pub timestamp: DateTime<Utc>,
}
