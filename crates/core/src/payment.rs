use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::money::Money;
use super::provider::Provider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Structured fields pulled out of one message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedFields {
    pub provider: Provider,
    pub transaction_code: Option<String>,
    pub amount: Option<Money>,
    pub sender: Option<String>,
}

impl ParsedFields {
    pub fn unknown() -> Self {
        ParsedFields {
            provider: Provider::Unknown,
            transaction_code: None,
            amount: None,
            sender: None,
        }
    }

    pub fn has_code(&self) -> bool {
        self.transaction_code.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Synced,
    Failed,
    ManualReview,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Pending => write!(f, "pending"),
            SyncStatus::Synced => write!(f, "synced"),
            SyncStatus::Failed => write!(f, "failed"),
            SyncStatus::ManualReview => write!(f, "manual_review"),
        }
    }
}

impl std::str::FromStr for SyncStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "synced" => Ok(SyncStatus::Synced),
            "failed" => Ok(SyncStatus::Failed),
            "manual_review" => Ok(SyncStatus::ManualReview),
            other => Err(format!("Unknown sync status: '{other}'")),
        }
    }
}

/// Client-local projection of one SMS or notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedPayment {
    pub local_id: String,
    pub raw_text: String,
    pub title: Option<String>,
    pub source_package: Option<String>,
    pub provider: Provider,
    pub transaction_code: Option<String>,
    pub amount: Option<Money>,
    pub sender: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sync_status: SyncStatus,
    /// Always non-empty while `sync_status` is `Failed`.
    pub last_sync_error: Option<String>,
    pub ai_assisted: bool,
}

impl ParsedPayment {
    /// The document shape the record store accepts for ingestion.
    pub fn to_new_record(&self, upload_key: Option<String>) -> NewIngestedRecord {
        NewIngestedRecord {
            upload_key,
            source_package: self.source_package.clone(),
            title: self.title.clone(),
            provider: self.provider,
            raw_text: self.raw_text.clone(),
            transaction_code: self.transaction_code.clone(),
            amount: self.amount,
            sender: self.sender.clone(),
            observed_at: self.created_at,
        }
    }
}

/// An ingested record before the store has assigned it an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewIngestedRecord {
    #[serde(default)]
    pub upload_key: Option<String>,
    #[serde(default)]
    pub source_package: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    pub provider: Provider,
    pub raw_text: String,
    pub transaction_code: Option<String>,
    pub amount: Option<Money>,
    #[serde(default)]
    pub sender: Option<String>,
    pub observed_at: DateTime<Utc>,
}

/// One observed payment notification as held by the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestedRecord {
    pub id: RecordId,
    pub source_package: Option<String>,
    pub title: Option<String>,
    pub provider: Provider,
    pub raw_text: String,
    pub transaction_code: Option<String>,
    pub amount: Option<Money>,
    pub sender: Option<String>,
    pub observed_at: DateTime<Utc>,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub verified_amount: Option<Money>,
}
