use chrono::Utc;
use payclaim_core::{Money, ParsedFields, ParsedPayment, SyncStatus};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::fallback::FallbackExtractor;
use crate::hash;
use crate::parser::Parser;
use crate::upload::Uploader;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("No local payment with id {0}")]
    UnknownPayment(String),
    #[error("Payment {id} is {status}; cannot {action}")]
    InvalidTransition {
        id: String,
        status: SyncStatus,
        action: &'static str,
    },
    #[error("Correction must supply a transaction code")]
    EmptyCorrection,
}

/// Raw text as delivered by a device listener.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawMessage {
    pub text: String,
    /// Sender title or notification title.
    pub title: Option<String>,
    /// Package name of the app that posted the notification.
    pub package: Option<String>,
}

impl RawMessage {
    pub fn sms(text: impl Into<String>) -> Self {
        RawMessage { text: text.into(), ..Default::default() }
    }

    fn hint(&self) -> Option<String> {
        let parts: Vec<&str> = [self.title.as_deref(), self.package.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        (!parts.is_empty()).then(|| parts.join(" "))
    }
}

/// Tracks locally parsed payments until the record store has them.
///
/// `pending -> synced | failed`, `failed -> (retry) -> pending`, and
/// `manual_review -> (correction) -> pending`. Retries are user-driven; no
/// backoff and no automatic second attempt. The working-set lock is never
/// held while an upload is in flight.
pub struct SyncController<U: Uploader, F: FallbackExtractor> {
    uploader: U,
    fallback: F,
    payments: Mutex<Vec<ParsedPayment>>,
}

impl<U: Uploader, F: FallbackExtractor> SyncController<U, F> {
    pub fn new(uploader: U, fallback: F) -> Self {
        Self {
            uploader,
            fallback,
            payments: Mutex::new(Vec::new()),
        }
    }

    pub fn uploader(&self) -> &U {
        &self.uploader
    }

    /// Parse a new message, consult the fallback when no code was found, and
    /// upload straight away if a code is present.
    pub async fn ingest(&self, message: RawMessage) -> ParsedPayment {
        let hint = message.hint();
        let mut fields = Parser::parse(&message.text, hint.as_deref());
        let mut ai_assisted = false;

        if !fields.has_code() {
            if let Some(suggested) = self.fallback.extract(&message.text).await {
                if suggested.has_code() {
                    fields = merge(fields, suggested);
                    ai_assisted = true;
                }
            }
        }

        let sync_status = if fields.has_code() {
            SyncStatus::Pending
        } else {
            SyncStatus::ManualReview
        };
        let payment = ParsedPayment {
            local_id: Uuid::new_v4().to_string(),
            raw_text: message.text,
            title: message.title,
            source_package: message.package,
            provider: fields.provider,
            transaction_code: fields.transaction_code,
            amount: fields.amount,
            sender: fields.sender,
            created_at: Utc::now(),
            sync_status,
            last_sync_error: None,
            ai_assisted,
        };
        self.payments.lock().await.push(payment.clone());

        if sync_status == SyncStatus::ManualReview {
            tracing::info!(local_id = %payment.local_id, "no transaction code, held for manual review");
            return payment;
        }
        self.attempt_upload(payment).await
    }

    /// Re-send a failed payment once, with the same payload.
    pub async fn retry(&self, local_id: &str) -> Result<ParsedPayment, SyncError> {
        let payment = self
            .transition(local_id, "retry", &[SyncStatus::Failed], |p| {
                p.sync_status = SyncStatus::Pending;
                p.last_sync_error = None;
            })
            .await?;
        Ok(self.attempt_upload(payment).await)
    }

    /// Supply a transaction code (and optionally an amount) by hand, then
    /// upload. Allowed from manual review or after a failed upload.
    pub async fn correct(
        &self,
        local_id: &str,
        transaction_code: &str,
        amount: Option<Money>,
    ) -> Result<ParsedPayment, SyncError> {
        let code = transaction_code.trim();
        if code.is_empty() {
            return Err(SyncError::EmptyCorrection);
        }
        let payment = self
            .transition(
                local_id,
                "correct",
                &[SyncStatus::ManualReview, SyncStatus::Failed],
                |p| {
                    p.transaction_code = Some(code.to_string());
                    if let Some(amount) = amount {
                        p.amount = Some(amount);
                    }
                    p.sync_status = SyncStatus::Pending;
                    p.last_sync_error = None;
                },
            )
            .await?;
        Ok(self.attempt_upload(payment).await)
    }

    /// Drop a payment from the local list. Anything already uploaded stays in
    /// the store.
    pub async fn delete(&self, local_id: &str) -> Result<ParsedPayment, SyncError> {
        let mut payments = self.payments.lock().await;
        let idx = payments
            .iter()
            .position(|p| p.local_id == local_id)
            .ok_or_else(|| SyncError::UnknownPayment(local_id.to_string()))?;
        Ok(payments.remove(idx))
    }

    /// Newest first.
    pub async fn list(&self) -> Vec<ParsedPayment> {
        self.payments.lock().await.iter().rev().cloned().collect()
    }

    pub async fn get(&self, local_id: &str) -> Option<ParsedPayment> {
        self.payments
            .lock()
            .await
            .iter()
            .find(|p| p.local_id == local_id)
            .cloned()
    }

    async fn transition(
        &self,
        local_id: &str,
        action: &'static str,
        allowed: &[SyncStatus],
        apply: impl FnOnce(&mut ParsedPayment),
    ) -> Result<ParsedPayment, SyncError> {
        let mut payments = self.payments.lock().await;
        let payment = payments
            .iter_mut()
            .find(|p| p.local_id == local_id)
            .ok_or_else(|| SyncError::UnknownPayment(local_id.to_string()))?;
        if !allowed.contains(&payment.sync_status) {
            return Err(SyncError::InvalidTransition {
                id: local_id.to_string(),
                status: payment.sync_status,
                action,
            });
        }
        apply(payment);
        Ok(payment.clone())
    }

    async fn attempt_upload(&self, mut payment: ParsedPayment) -> ParsedPayment {
        let key = hash::upload_key(&payment);
        let record = payment.to_new_record(Some(key));

        match self.uploader.upload(&record).await {
            Ok(()) => {
                payment.sync_status = SyncStatus::Synced;
                payment.last_sync_error = None;
                tracing::info!(local_id = %payment.local_id, "payment synced");
            }
            Err(e) => {
                let reason = e.to_string();
                payment.sync_status = SyncStatus::Failed;
                payment.last_sync_error = Some(if reason.is_empty() {
                    "upload failed".to_string()
                } else {
                    reason
                });
                tracing::warn!(local_id = %payment.local_id, "payment sync failed: {e}");
            }
        }

        // Only the status fields are written back; a payment deleted while its
        // upload was in flight stays deleted.
        let mut payments = self.payments.lock().await;
        if let Some(stored) = payments.iter_mut().find(|p| p.local_id == payment.local_id) {
            stored.sync_status = payment.sync_status;
            stored.last_sync_error = payment.last_sync_error.clone();
        }
        payment
    }
}

/// Fallback answers win where they have a value; parser output fills gaps.
fn merge(parsed: ParsedFields, suggested: ParsedFields) -> ParsedFields {
    ParsedFields {
        provider: if suggested.provider.is_known() {
            suggested.provider
        } else {
            parsed.provider
        },
        transaction_code: suggested.transaction_code.or(parsed.transaction_code),
        amount: suggested.amount.or(parsed.amount),
        sender: suggested.sender.or(parsed.sender),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::{MockFallback, NoFallback};
    use crate::upload::{MockUploader, UploadError};
    use payclaim_core::{NewIngestedRecord, Provider};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    const BKASH_SMS: &str = "You have received Tk 1,500.00 from 01712345678. TrxID 9H76K54L at 12/04/2024 10:30";
    const UNREADABLE: &str = "Payment received of 500. Trx ID is MISSING-FORMAT-TEST.";

    fn controller(uploader: MockUploader) -> SyncController<MockUploader, NoFallback> {
        SyncController::new(uploader, NoFallback)
    }

    // ── Creation ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn ingest_with_code_uploads_immediately() {
        let c = controller(MockUploader::succeeding());
        let p = c.ingest(RawMessage::sms(BKASH_SMS)).await;

        assert_eq!(p.sync_status, SyncStatus::Synced);
        assert_eq!(p.transaction_code.as_deref(), Some("9H76K54L"));
        assert!(!p.ai_assisted);

        let sent = c.uploader().sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].transaction_code.as_deref(), Some("9H76K54L"));
        assert_eq!(
            sent[0].upload_key.as_deref(),
            Some(hash::upload_key(&p).as_str())
        );
    }

    #[tokio::test]
    async fn ingest_without_code_goes_to_manual_review() {
        let c = controller(MockUploader::succeeding());
        let p = c.ingest(RawMessage::sms(UNREADABLE)).await;

        assert_eq!(p.sync_status, SyncStatus::ManualReview);
        assert_eq!(p.provider, Provider::Unknown);
        assert!(c.uploader().sent().is_empty());
    }

    #[tokio::test]
    async fn title_hint_selects_provider() {
        let c = controller(MockUploader::succeeding());
        let message = RawMessage {
            text: "Trans ID: 12345678 Tk900 received".to_string(),
            title: Some("Rocket".to_string()),
            package: None,
        };
        let p = c.ingest(message).await;
        assert_eq!(p.provider, Provider::Rocket);
        assert_eq!(p.amount, Some(Money::from_cents(90_000)));
    }

    #[tokio::test]
    async fn upload_failure_marks_failed_with_reason() {
        let c = controller(MockUploader::failing_first(1));
        let p = c.ingest(RawMessage::sms(BKASH_SMS)).await;

        assert_eq!(p.sync_status, SyncStatus::Failed);
        assert!(p.last_sync_error.as_deref().is_some_and(|e| !e.is_empty()));
        assert_eq!(p.transaction_code.as_deref(), Some("9H76K54L"));
        assert_eq!(c.get(&p.local_id).await.unwrap().sync_status, SyncStatus::Failed);
    }

    // ── Fallback ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn fallback_only_consulted_without_code() {
        let c = SyncController::new(MockUploader::succeeding(), MockFallback::new(None));
        c.ingest(RawMessage::sms(BKASH_SMS)).await;
        assert_eq!(c.fallback.calls(), 0);

        c.ingest(RawMessage::sms(UNREADABLE)).await;
        assert_eq!(c.fallback.calls(), 1);
    }

    #[tokio::test]
    async fn fallback_code_promotes_to_pending_and_uploads() {
        let suggestion = ParsedFields {
            provider: Provider::Nagad,
            transaction_code: Some("MX500".to_string()),
            amount: Some(Money::from_cents(50_000)),
            sender: None,
        };
        let c = SyncController::new(MockUploader::succeeding(), MockFallback::new(Some(suggestion)));
        let p = c.ingest(RawMessage::sms(UNREADABLE)).await;

        assert!(p.ai_assisted);
        assert_eq!(p.sync_status, SyncStatus::Synced);
        assert_eq!(p.provider, Provider::Nagad);
        assert_eq!(p.transaction_code.as_deref(), Some("MX500"));
    }

    #[tokio::test]
    async fn fallback_without_code_is_ignored() {
        let suggestion = ParsedFields {
            amount: Some(Money::from_cents(50_000)),
            ..ParsedFields::unknown()
        };
        let c = SyncController::new(MockUploader::succeeding(), MockFallback::new(Some(suggestion)));
        let p = c.ingest(RawMessage::sms(UNREADABLE)).await;

        assert!(!p.ai_assisted);
        assert_eq!(p.sync_status, SyncStatus::ManualReview);
        assert_eq!(p.amount, None);
    }

    // ── Retry ─────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn retry_resends_identical_payload() {
        let c = controller(MockUploader::failing_first(1));
        let failed = c.ingest(RawMessage::sms(BKASH_SMS)).await;
        assert_eq!(failed.sync_status, SyncStatus::Failed);

        let retried = c.retry(&failed.local_id).await.unwrap();
        assert_eq!(retried.sync_status, SyncStatus::Synced);
        assert_eq!(retried.last_sync_error, None);

        let sent = c.uploader().sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], failed.to_new_record(sent[0].upload_key.clone()));
    }

    #[tokio::test]
    async fn retry_can_fail_again() {
        let c = controller(MockUploader::failing_first(2));
        let p = c.ingest(RawMessage::sms(BKASH_SMS)).await;
        let p = c.retry(&p.local_id).await.unwrap();
        assert_eq!(p.sync_status, SyncStatus::Failed);
        assert!(p.last_sync_error.is_some());
    }

    #[tokio::test]
    async fn retry_rejected_unless_failed() {
        let c = controller(MockUploader::succeeding());
        let synced = c.ingest(RawMessage::sms(BKASH_SMS)).await;
        assert!(matches!(
            c.retry(&synced.local_id).await,
            Err(SyncError::InvalidTransition { status: SyncStatus::Synced, .. })
        ));

        let review = c.ingest(RawMessage::sms(UNREADABLE)).await;
        assert!(matches!(
            c.retry(&review.local_id).await,
            Err(SyncError::InvalidTransition { status: SyncStatus::ManualReview, .. })
        ));
        assert!(matches!(c.retry("missing").await, Err(SyncError::UnknownPayment(_))));
    }

    // ── Correction ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn correction_promotes_manual_review() {
        let c = controller(MockUploader::succeeding());
        let p = c.ingest(RawMessage::sms(UNREADABLE)).await;

        let p = c
            .correct(&p.local_id, "  TX500  ", Some(Money::from_cents(50_000)))
            .await
            .unwrap();
        assert_eq!(p.sync_status, SyncStatus::Synced);
        assert_eq!(p.transaction_code.as_deref(), Some("TX500"));
        assert_eq!(p.amount, Some(Money::from_cents(50_000)));
        assert_eq!(c.uploader().sent().len(), 1);
    }

    #[tokio::test]
    async fn empty_correction_keeps_manual_review() {
        let c = controller(MockUploader::succeeding());
        let p = c.ingest(RawMessage::sms(UNREADABLE)).await;
        assert!(matches!(
            c.correct(&p.local_id, "   ", None).await,
            Err(SyncError::EmptyCorrection)
        ));
        assert_eq!(c.get(&p.local_id).await.unwrap().sync_status, SyncStatus::ManualReview);
    }

    /// Keeps the first record per upload key, like the record store, and
    /// loses the acknowledgement of the first upload.
    #[derive(Default)]
    struct LostAckStore {
        acked_once: AtomicBool,
        records: std::sync::Mutex<Vec<NewIngestedRecord>>,
    }

    impl LostAckStore {
        fn codes(&self) -> Vec<Option<String>> {
            self.records
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.transaction_code.clone())
                .collect()
        }
    }

    impl Uploader for LostAckStore {
        async fn upload(&self, record: &NewIngestedRecord) -> Result<(), UploadError> {
            {
                let mut records = self.records.lock().unwrap();
                if !records.iter().any(|r| r.upload_key == record.upload_key) {
                    records.push(record.clone());
                }
            }
            if self.acked_once.swap(true, Ordering::SeqCst) {
                Ok(())
            } else {
                Err(UploadError::Transport("timeout".into()))
            }
        }
    }

    #[tokio::test]
    async fn correction_after_lost_ack_reaches_store() {
        let c = SyncController::new(LostAckStore::default(), NoFallback);
        let p = c.ingest(RawMessage::sms("bKash Tk 500 TrxID WRONG1")).await;
        assert_eq!(p.sync_status, SyncStatus::Failed);
        assert_eq!(c.uploader().codes(), vec![Some("WRONG1".to_string())]);

        let p = c.correct(&p.local_id, "RIGHT1", None).await.unwrap();
        assert_eq!(p.sync_status, SyncStatus::Synced);
        assert!(c.uploader().codes().contains(&Some("RIGHT1".to_string())));
    }

    #[tokio::test]
    async fn retry_after_lost_ack_is_not_duplicated() {
        let c = SyncController::new(LostAckStore::default(), NoFallback);
        let p = c.ingest(RawMessage::sms(BKASH_SMS)).await;
        assert_eq!(p.sync_status, SyncStatus::Failed);

        let p = c.retry(&p.local_id).await.unwrap();
        assert_eq!(p.sync_status, SyncStatus::Synced);
        assert_eq!(c.uploader().codes(), vec![Some("9H76K54L".to_string())]);
    }

    // ── Deletion and listing ──────────────────────────────────────────────────

    #[tokio::test]
    async fn delete_removes_locally_only() {
        let c = controller(MockUploader::succeeding());
        let p = c.ingest(RawMessage::sms(BKASH_SMS)).await;

        let removed = c.delete(&p.local_id).await.unwrap();
        assert_eq!(removed.local_id, p.local_id);
        assert!(c.list().await.is_empty());
        assert_eq!(c.uploader().sent().len(), 1);
        assert!(matches!(c.delete(&p.local_id).await, Err(SyncError::UnknownPayment(_))));
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let c = controller(MockUploader::succeeding());
        let first = c.ingest(RawMessage::sms(UNREADABLE)).await;
        let second = c.ingest(RawMessage::sms(BKASH_SMS)).await;
        let ids: Vec<String> = c.list().await.into_iter().map(|p| p.local_id).collect();
        assert_eq!(ids, vec![second.local_id, first.local_id]);
    }

    // ── Concurrency ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn uploads_run_concurrently() {
        let c = Arc::new(controller(
            MockUploader::succeeding().with_delay(Duration::from_millis(200)),
        ));
        let started = std::time::Instant::now();
        let handles: Vec<_> = (0..5)
            .map(|i| {
                let c = Arc::clone(&c);
                tokio::spawn(async move {
                    c.ingest(RawMessage::sms(format!("bKash TrxID CODE{i}"))).await
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.await.unwrap().sync_status, SyncStatus::Synced);
        }
        // Five serial uploads would need a full second.
        assert!(started.elapsed() < Duration::from_millis(900));
        assert_eq!(c.uploader().sent().len(), 5);
    }

    #[test]
    fn hint_joins_title_and_package() {
        let m = RawMessage {
            text: String::new(),
            title: Some(" Payment ".into()),
            package: Some("com.bkash.customerapp".into()),
        };
        assert_eq!(m.hint().as_deref(), Some("Payment com.bkash.customerapp"));
        assert_eq!(RawMessage::sms("x").hint(), None);
    }
}
