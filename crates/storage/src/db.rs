use chrono::{DateTime, Datelike, SecondsFormat, Utc};
use payclaim_core::{
    IngestedRecord, LogAction, Money, NewIngestedRecord, Provider, RecordId, RequesterMeta,
    VerificationClaim, VerificationLog,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Executor, Pool, Sqlite};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub type DbPool = Pool<Sqlite>;

pub const DEFAULT_PAGE: u32 = 20;
pub const MAX_PAGE: u32 = 100;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("Corrupt row: {0}")]
    Corrupt(String),
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

#[derive(Debug, Clone)]
pub struct DbOptions {
    pub max_connections: u32,
    /// How long a writer waits for the SQLite lock before giving up.
    pub busy_timeout: Duration,
}

impl Default for DbOptions {
    fn default() -> Self {
        DbOptions {
            max_connections: 4,
            busy_timeout: Duration::from_millis(5000),
        }
    }
}

pub async fn create_db(path: &Path, options: &DbOptions) -> Result<DbPool, sqlx::Error> {
    // Pragmas go on the connect options so every pooled connection gets them.
    let connect = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(options.busy_timeout)
        .pragma("cache_size", "-32000");

    let pool = SqlitePoolOptions::new()
        .max_connections(options.max_connections.max(1))
        .connect_with(connect)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingested_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            upload_key TEXT UNIQUE,
            source_package TEXT,
            title TEXT,
            provider TEXT NOT NULL,
            raw_text TEXT NOT NULL,
            transaction_code TEXT,
            amount_cents INTEGER,
            sender TEXT,
            observed_at TEXT NOT NULL,
            used INTEGER NOT NULL DEFAULT 0,
            used_at TEXT,
            verified_amount_cents INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_ingested_records_code ON ingested_records (transaction_code, used)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_ingested_records_observed ON ingested_records (observed_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS verification_claims (
            transaction_code TEXT PRIMARY KEY,
            amount_cents INTEGER NOT NULL,
            provider TEXT NOT NULL,
            matched_record_id INTEGER NOT NULL,
            verified_at TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'used',
            FOREIGN KEY (matched_record_id) REFERENCES ingested_records(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS verification_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            action TEXT NOT NULL,
            transaction_code TEXT,
            amount_cents INTEGER,
            provider TEXT,
            error_code TEXT,
            requester_ip TEXT,
            user_agent TEXT,
            timestamp TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

// ── Timestamps ────────────────────────────────────────────────────────────────

// Fixed-width UTC text so lexical order matches time order. Only four-digit
// years keep that width and parse back.
const STORABLE_YEARS: std::ops::RangeInclusive<i32> = 0..=9999;

pub(crate) fn fmt_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{raw}': {e}")))
}

fn parse_provider(raw: &str) -> Result<Provider, StoreError> {
    raw.parse::<Provider>().map_err(StoreError::Corrupt)
}

fn clamp_page(limit: Option<u32>) -> i64 {
    i64::from(limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE))
}

// ── Ingested records ──────────────────────────────────────────────────────────

/// Store one uploaded record. A repeat of an upload key returns the id of
/// the record already stored and `false`.
pub async fn insert_ingested_record(
    pool: &DbPool,
    record: &NewIngestedRecord,
) -> Result<(RecordId, bool), StoreError> {
    if !STORABLE_YEARS.contains(&record.observed_at.year()) {
        return Err(StoreError::InvalidRecord(format!(
            "observedAt year {} is outside 0000-9999",
            record.observed_at.year()
        )));
    }
    let code = record
        .transaction_code
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty());

    let inserted = sqlx::query_as::<_, (i64,)>(
        r#"
        INSERT INTO ingested_records
            (upload_key, source_package, title, provider, raw_text, transaction_code,
             amount_cents, sender, observed_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(upload_key) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(record.upload_key.as_deref())
    .bind(record.source_package.as_deref())
    .bind(record.title.as_deref())
    .bind(record.provider.id())
    .bind(&record.raw_text)
    .bind(code)
    .bind(record.amount.map(Money::to_cents))
    .bind(record.sender.as_deref())
    .bind(fmt_ts(record.observed_at))
    .fetch_optional(pool)
    .await?;

    if let Some((id,)) = inserted {
        return Ok((RecordId(id), true));
    }

    let (id,) = sqlx::query_as::<_, (i64,)>("SELECT id FROM ingested_records WHERE upload_key = ?")
        .bind(record.upload_key.as_deref())
        .fetch_one(pool)
        .await?;
    Ok((RecordId(id), false))
}

type RecordRow = (
    i64,
    Option<String>,
    Option<String>,
    String,
    String,
    Option<String>,
    Option<i64>,
    Option<String>,
    String,
    i64,
    Option<String>,
    Option<i64>,
);

const RECORD_COLUMNS: &str = "id, source_package, title, provider, raw_text, transaction_code, \
     amount_cents, sender, observed_at, used, used_at, verified_amount_cents";

fn record_from_row(r: RecordRow) -> Result<IngestedRecord, StoreError> {
    Ok(IngestedRecord {
        id: RecordId(r.0),
        source_package: r.1,
        title: r.2,
        provider: parse_provider(&r.3)?,
        raw_text: r.4,
        transaction_code: r.5,
        amount: r.6.map(Money::from_cents),
        sender: r.7,
        observed_at: parse_ts(&r.8)?,
        used: r.9 != 0,
        used_at: r.10.as_deref().map(parse_ts).transpose()?,
        verified_amount: r.11.map(Money::from_cents),
    })
}

/// Latest records first. `limit` defaults to 20 and is capped at 100.
pub async fn recent_records(
    pool: &DbPool,
    limit: Option<u32>,
) -> Result<Vec<IngestedRecord>, StoreError> {
    let rows = sqlx::query_as::<_, RecordRow>(&format!(
        "SELECT {RECORD_COLUMNS} FROM ingested_records ORDER BY observed_at DESC, id DESC LIMIT ?"
    ))
    .bind(clamp_page(limit))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(record_from_row).collect()
}

pub async fn get_record(pool: &DbPool, id: RecordId) -> Result<Option<IngestedRecord>, StoreError> {
    let row = sqlx::query_as::<_, RecordRow>(&format!(
        "SELECT {RECORD_COLUMNS} FROM ingested_records WHERE id = ?"
    ))
    .bind(id.0)
    .fetch_optional(pool)
    .await?;

    row.map(record_from_row).transpose()
}

/// Administrative mark/unmark. Claims are left alone, so an unmarked record
/// whose code was already claimed still cannot be verified again.
/// Returns `false` when no record has that id.
pub async fn set_record_used(pool: &DbPool, id: RecordId, used: bool) -> Result<bool, StoreError> {
    let result = if used {
        sqlx::query(
            "UPDATE ingested_records SET used = 1, used_at = COALESCE(used_at, ?) WHERE id = ?",
        )
        .bind(fmt_ts(Utc::now()))
        .bind(id.0)
        .execute(pool)
        .await?
    } else {
        sqlx::query("UPDATE ingested_records SET used = 0, used_at = NULL WHERE id = ?")
            .bind(id.0)
            .execute(pool)
            .await?
    };
    Ok(result.rows_affected() > 0)
}

// ── Claims ────────────────────────────────────────────────────────────────────

pub async fn get_claim(
    pool: &DbPool,
    transaction_code: &str,
) -> Result<Option<VerificationClaim>, StoreError> {
    let row = sqlx::query_as::<_, (String, i64, String, i64, String, String)>(
        "SELECT transaction_code, amount_cents, provider, matched_record_id, verified_at, status \
         FROM verification_claims WHERE transaction_code = ?",
    )
    .bind(transaction_code)
    .fetch_optional(pool)
    .await?;

    row.map(|r| {
        Ok(VerificationClaim {
            transaction_code: r.0,
            amount: Money::from_cents(r.1),
            provider: parse_provider(&r.2)?,
            matched_record_id: RecordId(r.3),
            verified_at: parse_ts(&r.4)?,
            status: r.5,
        })
    })
    .transpose()
}

// ── Audit log ─────────────────────────────────────────────────────────────────

/// An audit entry waiting to be written.
#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub action: LogAction,
    pub transaction_code: Option<String>,
    pub amount: Option<Money>,
    pub provider: Option<Provider>,
    pub error_code: Option<String>,
    pub requester: RequesterMeta,
    pub timestamp: DateTime<Utc>,
}

/// Append one audit entry. Takes any executor so it can join an open
/// transaction.
pub async fn append_log<'e, E>(executor: E, entry: &NewLogEntry) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO verification_logs
            (action, transaction_code, amount_cents, provider, error_code,
             requester_ip, user_agent, timestamp)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entry.action.to_string())
    .bind(entry.transaction_code.as_deref())
    .bind(entry.amount.map(Money::to_cents))
    .bind(entry.provider.map(Provider::id))
    .bind(entry.error_code.as_deref())
    .bind(entry.requester.ip.as_deref())
    .bind(entry.requester.user_agent.as_deref())
    .bind(fmt_ts(entry.timestamp))
    .execute(executor)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Newest entries first. `limit` defaults to 20 and is capped at 100.
pub async fn recent_logs(
    pool: &DbPool,
    limit: Option<u32>,
) -> Result<Vec<VerificationLog>, StoreError> {
    type LogRow = (
        i64,
        String,
        Option<String>,
        Option<i64>,
        Option<String>,
        Option<String>,
        Option<String>,
        Option<String>,
        String,
    );
    let rows = sqlx::query_as::<_, LogRow>(
        "SELECT id, action, transaction_code, amount_cents, provider, error_code, \
         requester_ip, user_agent, timestamp \
         FROM verification_logs ORDER BY id DESC LIMIT ?",
    )
    .bind(clamp_page(limit))
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|r| {
            Ok(VerificationLog {
                id: r.0,
                action: r.1.parse::<LogAction>().map_err(StoreError::Corrupt)?,
                transaction_code: r.2,
                amount: r.3.map(Money::from_cents),
                provider: r.4.as_deref().map(parse_provider).transpose()?,
                error_code: r.5,
                requester: RequesterMeta { ip: r.6, user_agent: r.7 },
                timestamp: parse_ts(&r.8)?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> (tempfile::TempDir, DbPool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_db(&dir.path().join("test.db"), &DbOptions::default())
            .await
            .unwrap();
        (dir, pool)
    }

    fn new_record(code: &str, cents: i64, key: Option<&str>) -> NewIngestedRecord {
        NewIngestedRecord {
            upload_key: key.map(str::to_string),
            source_package: Some("com.bkash.customerapp".into()),
            title: Some("bKash".into()),
            provider: Provider::Bkash,
            raw_text: format!("You have received Tk {cents} TrxID {code}"),
            transaction_code: Some(code.to_string()),
            amount: Some(Money::from_cents(cents)),
            sender: Some("01712345678".into()),
            observed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let (_dir, pool) = test_db().await;
        run_migrations(&pool).await.unwrap();
        assert!(recent_records(&pool, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn insert_and_read_back() {
        let (_dir, pool) = test_db().await;
        let (id, created) = insert_ingested_record(&pool, &new_record("9H76K54L", 150_000, None))
            .await
            .unwrap();
        assert!(created);

        let stored = get_record(&pool, id).await.unwrap().unwrap();
        assert_eq!(stored.transaction_code.as_deref(), Some("9H76K54L"));
        assert_eq!(stored.amount, Some(Money::from_cents(150_000)));
        assert_eq!(stored.provider, Provider::Bkash);
        assert!(!stored.used);
        assert!(stored.used_at.is_none());
    }

    #[tokio::test]
    async fn upload_key_makes_insert_idempotent() {
        let (_dir, pool) = test_db().await;
        let record = new_record("AB12", 500, Some("key-1"));
        let (first, created) = insert_ingested_record(&pool, &record).await.unwrap();
        let (second, again) = insert_ingested_record(&pool, &record).await.unwrap();
        assert!(created);
        assert!(!again);
        assert_eq!(first, second);
        assert_eq!(recent_records(&pool, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn records_without_key_are_never_merged() {
        let (_dir, pool) = test_db().await;
        let record = new_record("AB12", 500, None);
        insert_ingested_record(&pool, &record).await.unwrap();
        insert_ingested_record(&pool, &record).await.unwrap();
        assert_eq!(recent_records(&pool, None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn out_of_range_year_is_rejected() {
        let (_dir, pool) = test_db().await;
        let mut record = new_record("FAR1", 500, None);
        record.observed_at = "+10000-01-01T00:00:00Z".parse().unwrap();
        assert!(matches!(
            insert_ingested_record(&pool, &record).await,
            Err(StoreError::InvalidRecord(_))
        ));

        record.observed_at = "9999-12-31T23:59:59Z".parse().unwrap();
        insert_ingested_record(&pool, &record).await.unwrap();
        let page = recent_records(&pool, None).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].observed_at.year(), 9999);
    }

    #[tokio::test]
    async fn blank_code_is_stored_as_null() {
        let (_dir, pool) = test_db().await;
        let mut record = new_record("x", 500, None);
        record.transaction_code = Some("   ".into());
        let (id, _) = insert_ingested_record(&pool, &record).await.unwrap();
        assert_eq!(get_record(&pool, id).await.unwrap().unwrap().transaction_code, None);
    }

    #[tokio::test]
    async fn recent_records_newest_first_and_capped() {
        let (_dir, pool) = test_db().await;
        let base = Utc::now();
        for i in 0..25 {
            let mut record = new_record(&format!("CODE{i}"), 100, None);
            record.observed_at = base + chrono::Duration::seconds(i);
            insert_ingested_record(&pool, &record).await.unwrap();
        }

        let page = recent_records(&pool, None).await.unwrap();
        assert_eq!(page.len(), 20);
        assert_eq!(page[0].transaction_code.as_deref(), Some("CODE24"));

        assert_eq!(recent_records(&pool, Some(5)).await.unwrap().len(), 5);
        assert_eq!(recent_records(&pool, Some(1000)).await.unwrap().len(), 25);
    }

    #[tokio::test]
    async fn set_record_used_toggles() {
        let (_dir, pool) = test_db().await;
        let (id, _) = insert_ingested_record(&pool, &new_record("AB12", 500, None))
            .await
            .unwrap();

        assert!(set_record_used(&pool, id, true).await.unwrap());
        let marked = get_record(&pool, id).await.unwrap().unwrap();
        assert!(marked.used);
        assert!(marked.used_at.is_some());

        assert!(set_record_used(&pool, id, false).await.unwrap());
        let unmarked = get_record(&pool, id).await.unwrap().unwrap();
        assert!(!unmarked.used);
        assert!(unmarked.used_at.is_none());

        assert!(!set_record_used(&pool, RecordId(9999), true).await.unwrap());
    }

    #[tokio::test]
    async fn logs_round_trip_newest_first() {
        let (_dir, pool) = test_db().await;
        for action in [LogAction::VerifyFailed, LogAction::VerifySuccess] {
            append_log(
                &pool,
                &NewLogEntry {
                    action,
                    transaction_code: Some("AB12".into()),
                    amount: Some(Money::from_cents(500)),
                    provider: Some(Provider::Nagad),
                    error_code: None,
                    requester: RequesterMeta {
                        ip: Some("10.0.0.1".into()),
                        user_agent: None,
                    },
                    timestamp: Utc::now(),
                },
            )
            .await
            .unwrap();
        }

        let logs = recent_logs(&pool, None).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].action, LogAction::VerifySuccess);
        assert_eq!(logs[1].provider, Some(Provider::Nagad));
        assert_eq!(logs[1].requester.ip.as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn timestamps_sort_lexically() {
        let early = Utc::now();
        let late = early + chrono::Duration::milliseconds(1500);
        assert!(fmt_ts(early) < fmt_ts(late));
        assert_eq!(fmt_ts(early).len(), fmt_ts(late).len());
    }
}
