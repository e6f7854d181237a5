use async_trait::async_trait;
use snipper_core::error::Result;
use snipper_core::{Record, ServiceStats, Storage, StorageError};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Connection, Row};
use std::time::Duration;
use tracing::debug;

/// Schema for the `shorts` table.
pub const SHORTS_DDL: &str = include_str!("../ddl/postgres/shorts.sql");

/// The one place the soft-delete filter is spelled out for SQL reads.
const LIVE_PREDICATE: &str = "deleted = FALSE";

const MAX_CONNECTIONS: u32 = 20;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_LIFETIME: Duration = Duration::from_secs(120);

/// PostgreSQL implementation of the storage contract.
///
/// Soft delete is implemented with the `deleted` column. Listing reads only
/// return live rows. Duplicate URLs are caught by a partial unique index on
/// `original` over live rows, so a deleted URL may be shortened again.
#[derive(Debug, Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    /// Creates a storage from an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates a storage by opening a new connection pool.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .idle_timeout(IDLE_TIMEOUT)
            .max_lifetime(MAX_LIFETIME)
            .connect(database_url)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Self::new(pool))
    }

    /// Creates the `shorts` table and its indexes if they are missing.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(SHORTS_DDL)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        debug!("applied shorts schema");
        Ok(())
    }

    /// Returns a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Finds the stored row that blocks inserting `record`: a live row with
    /// the same URL, else any row with the same short.
    async fn find_blocking<'e, E>(executor: E, record: &Record) -> Result<Option<Record>>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let sql = format!(
            r#"
            SELECT short, original, user_id, deleted
            FROM shorts
            WHERE (original = $1 AND {LIVE_PREDICATE})
               OR short = $2
            ORDER BY (short = $2) ASC
            LIMIT 1
            "#
        );

        let row = sqlx::query(&sql)
            .bind(&record.full)
            .bind(&record.short)
            .fetch_optional(executor)
            .await
            .map_err(map_sqlx_error)?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn count(&self, sql: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(sql)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        u64::try_from(count)
            .map_err(|_| StorageError::InvalidData(format!("negative count: {count}")))
    }
}

fn record_from_row(row: &PgRow) -> Result<Record> {
    Ok(Record {
        short: row.try_get("short").map_err(map_sqlx_error)?,
        full: row.try_get("original").map_err(map_sqlx_error)?,
        user_id: row.try_get("user_id").map_err(map_sqlx_error)?,
        deleted: row.try_get("deleted").map_err(map_sqlx_error)?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(sqlx::error::DatabaseError::is_unique_violation)
}

fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    let message = err.to_string();

    match err {
        sqlx::Error::PoolTimedOut => StorageError::Timeout(message),
        sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => StorageError::Unavailable(message),
        sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::RowNotFound => StorageError::InvalidData(message),
        _ => StorageError::Query(message),
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn store(&self, record: Record) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO shorts (short, original, user_id)
            VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&record.short)
        .bind(&record.full)
        .bind(&record.user_id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        // Nothing inserted: recover the row that won.
        match Self::find_blocking(&self.pool, &record).await? {
            Some(existing) => Err(StorageError::blocked_by(&record, existing)),
            None => Err(StorageError::Operation(format!(
                "insert of \"{}\" was skipped but no conflicting row exists",
                record.short
            ))),
        }
    }

    async fn store_batch(&self, records: Vec<Record>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        for (position, record) in records.iter().enumerate() {
            let result = sqlx::query(
                r#"
                INSERT INTO shorts (short, original, user_id)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(&record.short)
            .bind(&record.full)
            .bind(&record.user_id)
            .execute(&mut *tx)
            .await;

            match result {
                Ok(_) => {}
                Err(err) if is_unique_violation(&err) => {
                    tx.rollback().await.map_err(map_sqlx_error)?;
                    let existing = match Self::find_blocking(&self.pool, record).await? {
                        Some(existing) => existing,
                        // The blocking row came from earlier in this batch.
                        None => records[..position]
                            .iter()
                            .find(|earlier| earlier.full == record.full)
                            .or_else(|| {
                                records[..position]
                                    .iter()
                                    .find(|earlier| earlier.short == record.short)
                            })
                            .cloned()
                            .ok_or_else(|| map_sqlx_error(err))?,
                    };
                    return Err(StorageError::blocked_by(record, existing));
                }
                Err(err) => return Err(map_sqlx_error(err)),
            }
        }

        tx.commit().await.map_err(map_sqlx_error)
    }

    async fn load(&self, short: &str) -> Result<Record> {
        let row = sqlx::query(
            r#"
            SELECT short, original, user_id, deleted
            FROM shorts
            WHERE short = $1
            LIMIT 1
            "#,
        )
        .bind(short)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        match row {
            Some(row) => record_from_row(&row),
            None => Err(StorageError::not_found(short)),
        }
    }

    async fn load_batch(&self, shorts: &[String]) -> Result<Vec<Record>> {
        if shorts.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            r#"
            SELECT short, original, user_id, deleted
            FROM shorts
            WHERE short = ANY($1) AND {LIVE_PREDICATE}
            "#
        );

        sqlx::query(&sql)
            .bind(shorts)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .iter()
            .map(record_from_row)
            .collect()
    }

    async fn load_for_user(&self, user_id: &str) -> Result<Vec<Record>> {
        let sql = format!(
            r#"
            SELECT short, original, user_id, deleted
            FROM shorts
            WHERE user_id = $1 AND {LIVE_PREDICATE}
            "#
        );

        sqlx::query(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .iter()
            .map(record_from_row)
            .collect()
    }

    async fn delete(&self, short: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE shorts
            SET deleted = TRUE
            WHERE short = $1
            "#,
        )
        .bind(short)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found(short));
        }
        Ok(())
    }

    async fn delete_batch(&self, shorts: &[String]) -> Result<()> {
        if shorts.is_empty() {
            return Ok(());
        }

        sqlx::query(
            r#"
            UPDATE shorts
            SET deleted = TRUE
            WHERE short = ANY($1)
            "#,
        )
        .bind(shorts)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
        conn.ping().await.map_err(map_sqlx_error)
    }

    async fn stats(&self) -> Result<ServiceStats> {
        let urls_sql = format!("SELECT COUNT(*) FROM shorts WHERE {LIVE_PREDICATE}");
        let users_sql = format!("SELECT COUNT(DISTINCT user_id) FROM shorts WHERE {LIVE_PREDICATE}");

        let (urls_count, users_count) =
            tokio::try_join!(self.count(&urls_sql), self.count(&users_sql))?;

        Ok(ServiceStats {
            urls_count,
            users_count,
        })
    }
}
