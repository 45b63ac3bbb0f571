use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use payclaim_core::{
    ClaimRequest, LogAction, Money, Provider, RecordId, RequesterMeta, ValidClaim, Verification,
    VerifyError, AMOUNT_TOLERANCE_CENTS, CANDIDATE_LIMIT,
};

use crate::db::{append_log, fmt_ts, DbPool, NewLogEntry};

#[derive(Debug, Clone)]
pub struct VerifyConfig {
    /// Largest accepted gap between claimed and recorded amount, inclusive.
    pub tolerance: Money,
    pub candidate_limit: u32,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        VerifyConfig {
            tolerance: Money::from_cents(AMOUNT_TOLERANCE_CENTS),
            candidate_limit: CANDIDATE_LIMIT,
        }
    }
}

/// Claims ingested records for payers, at most once per transaction code.
///
/// Each verification is one `BEGIN IMMEDIATE` transaction: SQLite admits a
/// single writer, so a second verifier of the same code reads the committed
/// claim and gets `AlreadyUsed`. The claim primary key backs this up.
/// Failed attempts are audited on a detached task after the rollback.
#[derive(Clone)]
pub struct VerificationEngine {
    pool: DbPool,
    config: VerifyConfig,
    audit_failures: Arc<AtomicU64>,
}

impl VerificationEngine {
    pub fn new(pool: DbPool, config: VerifyConfig) -> Self {
        Self {
            pool,
            config,
            audit_failures: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Failure audit entries that could not be written.
    pub fn audit_failures(&self) -> u64 {
        self.audit_failures.load(Ordering::Relaxed)
    }

    pub async fn verify(
        &self,
        request: ClaimRequest,
        requester: RequesterMeta,
    ) -> Result<Verification, VerifyError> {
        let attempted_code = request.transaction_code.trim().to_string();
        let attempted_amount = request.amount;
        let attempted_provider = request.provider;

        let outcome = match request.validate() {
            Ok(claim) => self.claim(&claim, &requester).await,
            Err(e) => Err(e),
        };

        match &outcome {
            Ok(v) => {
                tracing::info!(
                    transaction_code = %v.transaction_code,
                    record_id = %v.matched_record_id,
                    amount = %v.amount,
                    "VERIFY_SUCCESS"
                );
            }
            Err(e) => {
                tracing::info!(
                    transaction_code = %attempted_code,
                    code = e.code(),
                    "VERIFY_FAILED: {e}"
                );
                self.audit_failure(NewLogEntry {
                    action: LogAction::VerifyFailed,
                    transaction_code: Some(attempted_code).filter(|c| !c.is_empty()),
                    amount: Some(attempted_amount),
                    provider: Some(attempted_provider).filter(|p| p.is_known()),
                    error_code: Some(e.code().to_string()),
                    requester,
                    timestamp: Utc::now(),
                });
            }
        }
        outcome
    }

    async fn claim(
        &self,
        claim: &ValidClaim,
        requester: &RequesterMeta,
    ) -> Result<Verification, VerifyError> {
        // Dropping `tx` on any early return rolls back.
        let mut tx = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(store_failure)?;

        let existing = sqlx::query_as::<_, (String,)>(
            "SELECT transaction_code FROM verification_claims WHERE transaction_code = ?",
        )
        .bind(&claim.transaction_code)
        .fetch_optional(&mut *tx)
        .await
        .map_err(store_failure)?;
        if existing.is_some() {
            return Err(VerifyError::AlreadyUsed);
        }

        let candidates = sqlx::query_as::<_, (i64, String, Option<i64>)>(
            "SELECT id, provider, amount_cents FROM ingested_records \
             WHERE transaction_code = ? AND used = 0 \
             ORDER BY observed_at, id LIMIT ?",
        )
        .bind(&claim.transaction_code)
        .bind(i64::from(self.config.candidate_limit))
        .fetch_all(&mut *tx)
        .await
        .map_err(store_failure)?;
        if candidates.is_empty() {
            return Err(VerifyError::NotFound);
        }

        let (record_id, stored_provider, _) = candidates
            .iter()
            .find(|(_, _, cents)| {
                cents.is_some_and(|c| {
                    Money::from_cents(c).within(claim.amount, self.config.tolerance)
                })
            })
            .ok_or(VerifyError::AmountMismatch)?;
        let record_id = RecordId(*record_id);

        if stored_provider.parse::<Provider>().ok() != Some(claim.provider) {
            tracing::info!(
                transaction_code = %claim.transaction_code,
                requested = %claim.provider,
                stored = %stored_provider,
                "provider differs from stored record"
            );
        }

        let verified_at = Utc::now();
        let inserted = sqlx::query(
            "INSERT INTO verification_claims \
             (transaction_code, amount_cents, provider, matched_record_id, verified_at, status) \
             VALUES (?, ?, ?, ?, ?, 'used')",
        )
        .bind(&claim.transaction_code)
        .bind(claim.amount.to_cents())
        .bind(claim.provider.id())
        .bind(record_id.0)
        .bind(fmt_ts(verified_at))
        .execute(&mut *tx)
        .await;
        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                return Err(VerifyError::AlreadyUsed);
            }
            Err(e) => return Err(store_failure(e)),
        }

        let updated = sqlx::query(
            "UPDATE ingested_records SET used = 1, used_at = ?, verified_amount_cents = ? \
             WHERE id = ? AND used = 0",
        )
        .bind(fmt_ts(verified_at))
        .bind(claim.amount.to_cents())
        .bind(record_id.0)
        .execute(&mut *tx)
        .await
        .map_err(store_failure)?;
        if updated.rows_affected() != 1 {
            return Err(VerifyError::AlreadyUsed);
        }

        append_log(
            &mut *tx,
            &NewLogEntry {
                action: LogAction::VerifySuccess,
                transaction_code: Some(claim.transaction_code.clone()),
                amount: Some(claim.amount),
                provider: Some(claim.provider),
                error_code: None,
                requester: requester.clone(),
                timestamp: verified_at,
            },
        )
        .await
        .map_err(store_failure)?;

        tx.commit().await.map_err(store_failure)?;

        Ok(Verification {
            transaction_code: claim.transaction_code.clone(),
            amount: claim.amount,
            provider: claim.provider,
            matched_record_id: record_id,
            verified_at,
        })
    }

    fn audit_failure(&self, entry: NewLogEntry) {
        let pool = self.pool.clone();
        let failures = Arc::clone(&self.audit_failures);
        tokio::spawn(async move {
            if let Err(e) = append_log(&pool, &entry).await {
                failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("could not write VERIFY_FAILED audit entry: {e}");
            }
        });
    }
}

fn store_failure(e: sqlx::Error) -> VerifyError {
    tracing::error!("verification store failure: {e}");
    VerifyError::ServerError(e.to_string())
}
