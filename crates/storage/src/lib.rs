pub mod db;
pub mod verify;

pub use db::{
    append_log, create_db, get_claim, get_record, insert_ingested_record, recent_logs,
    recent_records, set_record_used, DbOptions, DbPool, NewLogEntry, StoreError, DEFAULT_PAGE,
    MAX_PAGE,
};
pub use verify::{VerificationEngine, VerifyConfig};
