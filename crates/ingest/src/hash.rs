use payclaim_core::{Money, ParsedPayment};
use sha2::{Digest, Sha256};

/// Compute SHA-256 of an in-memory byte slice.
pub fn sha256_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Encode a raw 32-byte hash as a lowercase hex string (64 chars).
pub fn to_hex(hash: &[u8; 32]) -> String {
    hash.iter().map(|b| format!("{b:02x}")).collect()
}

/// Idempotency key for uploading one local payment.
///
/// Resending an unchanged payment reuses its key. A correction changes the
/// code, amount or sender and with them the key, so the store never mistakes
/// a corrected upload for an earlier one that arrived without an ack. Two
/// deliveries of the same SMS text have different local ids and never share
/// a key.
pub fn upload_key(payment: &ParsedPayment) -> String {
    let amount = payment.amount.map(Money::to_cents).map(|c| c.to_string());
    let fields = [
        Some(payment.local_id.as_str()),
        Some(payment.raw_text.as_str()),
        Some(payment.provider.id()),
        payment.transaction_code.as_deref(),
        amount.as_deref(),
        payment.sender.as_deref(),
    ];

    let mut buf = Vec::new();
    for field in fields {
        // Absent and empty fields hash differently.
        match field {
            Some(value) => {
                buf.push(1u8);
                buf.extend_from_slice(value.as_bytes());
            }
            None => buf.push(2u8),
        }
        buf.push(0u8);
    }
    to_hex(&sha256_bytes(&buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use payclaim_core::{Provider, SyncStatus};

    fn payment(local_id: &str, text: &str) -> ParsedPayment {
        ParsedPayment {
            local_id: local_id.to_string(),
            raw_text: text.to_string(),
            title: None,
            source_package: None,
            provider: Provider::Bkash,
            transaction_code: Some("X1".to_string()),
            amount: Some(Money::from_cents(50_000)),
            sender: Some("01712345678".to_string()),
            created_at: Utc::now(),
            sync_status: SyncStatus::Pending,
            last_sync_error: None,
            ai_assisted: false,
        }
    }

    #[test]
    fn sha256_bytes_known_vector() {
        let hex = to_hex(&sha256_bytes(b""));
        assert_eq!(
            hex,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn upload_key_is_stable_per_payment() {
        let p = payment("a", "TrxID X1");
        assert_eq!(upload_key(&p), upload_key(&p.clone()));
        assert_eq!(upload_key(&p).len(), 64);

        // Status bookkeeping is not part of the payload.
        let mut failed = p.clone();
        failed.sync_status = SyncStatus::Failed;
        failed.last_sync_error = Some("timeout".into());
        assert_eq!(upload_key(&failed), upload_key(&p));
    }

    #[test]
    fn upload_key_separates_local_ids() {
        assert_ne!(upload_key(&payment("a", "TrxID X1")), upload_key(&payment("b", "TrxID X1")));
        // The separator keeps ("ab","c") and ("a","bc") apart.
        assert_ne!(upload_key(&payment("ab", "c")), upload_key(&payment("a", "bc")));
    }

    #[test]
    fn corrected_fields_change_the_key() {
        let original = payment("a", "bKash Tk 500 TrxID WRONG1");
        let key = upload_key(&original);

        let mut code = original.clone();
        code.transaction_code = Some("RIGHT1".into());
        assert_ne!(upload_key(&code), key);

        let mut amount = original.clone();
        amount.amount = Some(Money::from_cents(50_001));
        assert_ne!(upload_key(&amount), key);

        let mut sender = original.clone();
        sender.sender = None;
        assert_ne!(upload_key(&sender), key);
    }
}
