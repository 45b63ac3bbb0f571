pub mod claim;
pub mod money;
pub mod payment;
pub mod provider;

pub use claim::{
    ClaimRequest, LogAction, RequesterMeta, ValidClaim, Verification, VerificationClaim,
    VerificationLog, VerifyError, AMOUNT_TOLERANCE_CENTS, CANDIDATE_LIMIT, MIN_CODE_LEN,
};
pub use money::Money;
pub use payment::{
    IngestedRecord, NewIngestedRecord, ParsedFields, ParsedPayment, RecordId, SyncStatus,
};
pub use provider::Provider;
