//! SQLite-backed record store.
//!
//! The table layout is not fixed: the id and timestamp columns are named in
//! configuration and the exported payload is assembled from every column the
//! table has, discovered through `PRAGMA table_info` at connect time.
//!
//! The timestamp column may hold INTEGER epoch seconds or any date text
//! SQLite's date functions accept (`2024-07-02 18:00:00`, RFC 3339 with an
//! offset). Both are compared as epoch seconds; text SQLite cannot parse
//! never matches a cutoff.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqlitePoolOptions};

use super::store::{RecordStore, StoreError, StoreResult, StoredRecord};
use crate::config::SqliteStoreConfig;

/// SQLite caps bound parameters per statement; stay well below it.
const DELETE_CHUNK: usize = 500;

pub struct SqliteRecordStore {
    pool: SqlitePool,
    table: String,
    id_column: String,
    /// The timestamp column as epoch seconds.
    epoch_expr: String,
    /// `json_object('col', "col", ...)` over every column of the table.
    payload_expr: String,
}

impl SqliteRecordStore {
    pub async fn connect(config: &SqliteStoreConfig) -> StoreResult<Self> {
        config.validate().map_err(StoreError::Config)?;

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;

        Self::from_pool(
            pool,
            &config.table,
            &config.id_column,
            &config.timestamp_column,
        )
        .await
    }

    pub async fn from_pool(
        pool: SqlitePool,
        table: &str,
        id_column: &str,
        timestamp_column: &str,
    ) -> StoreResult<Self> {
        let columns: Vec<String> = sqlx::query(&format!("PRAGMA table_info(\"{table}\")"))
            .fetch_all(&pool)
            .await?
            .iter()
            .map(|row| row.get::<String, _>("name"))
            .collect();

        if columns.is_empty() {
            return Err(StoreError::Config(format!("table '{table}' does not exist")));
        }
        for required in [id_column, timestamp_column] {
            if !columns.iter().any(|c| c == required) {
                return Err(StoreError::Config(format!(
                    "table '{table}' has no column '{required}'"
                )));
            }
        }

        let payload_expr = format!(
            "json_object({})",
            columns
                .iter()
                .map(|c| format!("'{c}', \"{c}\""))
                .collect::<Vec<_>>()
                .join(", ")
        );

        tracing::debug!(table, columns = columns.len(), "Connected SQLite record store");

        Ok(Self {
            pool,
            table: table.to_string(),
            id_column: id_column.to_string(),
            epoch_expr: epoch_seconds(timestamp_column),
            payload_expr,
        })
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn fetch_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: u32,
        ordered: bool,
    ) -> StoreResult<Vec<StoredRecord>> {
        let order = if ordered {
            format!("ORDER BY {} ASC, \"{}\" ASC", self.epoch_expr, self.id_column)
        } else {
            String::new()
        };
        let sql = format!(
            r#"
            SELECT "{id}" AS record_id, {ts} AS record_epoch, {payload} AS payload
            FROM "{table}"
            WHERE {ts} < ?
            {order}
            LIMIT ?
            "#,
            id = self.id_column,
            ts = self.epoch_expr,
            payload = self.payload_expr,
            table = self.table,
        );

        let rows = sqlx::query(&sql)
            .bind(cutoff.timestamp())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> StoreResult<StoredRecord> {
                let payload: String = row.try_get("payload")?;
                let epoch: i64 = row.try_get("record_epoch")?;
                let created_at = DateTime::from_timestamp(epoch, 0).ok_or_else(|| {
                    StoreError::Config(format!("timestamp {epoch} is out of range"))
                })?;
                Ok(StoredRecord {
                    id: row.try_get("record_id")?,
                    created_at,
                    payload: serde_json::from_str(&payload)?,
                })
            })
            .collect()
    }

    async fn delete(&self, ids: &[i64]) -> StoreResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut deleted = 0;

        for chunk in ids.chunks(DELETE_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "DELETE FROM \"{}\" WHERE \"{}\" IN ({placeholders})",
                self.table, self.id_column
            );
            let mut query = sqlx::query(&sql);
            for id in chunk {
                query = query.bind(*id);
            }
            deleted += query.execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(deleted)
    }

    async fn compact(&self) -> StoreResult<()> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }

    async fn count(&self) -> StoreResult<u64> {
        let row = sqlx::query(&format!("SELECT COUNT(*) AS count FROM \"{}\"", self.table))
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("count").max(0) as u64)
    }
}

/// SQL expression reading `column` as integer epoch seconds.
fn epoch_seconds(column: &str) -> String {
    format!(
        "(CASE WHEN typeof(\"{column}\") IN ('integer', 'real') \
         THEN CAST(\"{column}\" AS INTEGER) \
         ELSE CAST(strftime('%s', \"{column}\") AS INTEGER) END)"
    )
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    async fn create_test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory SQLite pool");

        sqlx::query(
            r#"
            CREATE TABLE events (
                id INTEGER PRIMARY KEY NOT NULL,
                kind TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .expect("Failed to create events table");

        pool
    }

    async fn insert(pool: &SqlitePool, id: i64, kind: &str, created_at: DateTime<Utc>) {
        sqlx::query("INSERT INTO events (id, kind, created_at) VALUES (?, ?, ?)")
            .bind(id)
            .bind(kind)
            .bind(created_at)
            .execute(pool)
            .await
            .expect("Failed to insert event");
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 8, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_before_builds_payload() {
        let pool = create_test_pool().await;
        insert(&pool, 1, "login", now() - Duration::days(40)).await;
        insert(&pool, 2, "logout", now() - Duration::days(5)).await;

        let store = SqliteRecordStore::from_pool(pool, "events", "id", "created_at")
            .await
            .unwrap();
        let batch = store
            .fetch_before(now() - Duration::days(30), 100, true)
            .await
            .unwrap();

        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, 1);
        assert_eq!(batch[0].created_at, now() - Duration::days(40));
        assert_eq!(batch[0].payload["kind"], "login");
    }

    #[tokio::test]
    async fn test_integer_epoch_column_compares_by_time() {
        let pool = create_test_pool().await;
        sqlx::query("CREATE TABLE metrics (id INTEGER PRIMARY KEY, ts INTEGER NOT NULL)")
            .execute(&pool)
            .await
            .unwrap();
        for (id, age) in [(1, 45), (2, 1)] {
            sqlx::query("INSERT INTO metrics (id, ts) VALUES (?, ?)")
                .bind(id)
                .bind((now() - Duration::days(age)).timestamp())
                .execute(&pool)
                .await
                .unwrap();
        }

        let store = SqliteRecordStore::from_pool(pool, "metrics", "id", "ts")
            .await
            .unwrap();
        let batch = store
            .fetch_before(now() - Duration::days(30), 100, true)
            .await
            .unwrap();

        assert_eq!(batch.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1]);
        assert_eq!(batch[0].created_at, now() - Duration::days(45));
    }

    #[tokio::test]
    async fn test_sqlite_text_timestamps_compare_by_time() {
        let pool = create_test_pool().await;
        for (id, ts) in [(1, "2024-08-01 06:00:00"), (2, "2024-08-01 18:00:00")] {
            sqlx::query("INSERT INTO events (id, kind, created_at) VALUES (?, 'audit', ?)")
                .bind(id)
                .bind(ts)
                .execute(&pool)
                .await
                .unwrap();
        }

        let store = SqliteRecordStore::from_pool(pool, "events", "id", "created_at")
            .await
            .unwrap();
        let batch = store.fetch_before(now(), 100, true).await.unwrap();

        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, 1);
        assert_eq!(batch[0].created_at, now() - Duration::hours(6));
    }

    #[tokio::test]
    async fn test_unparseable_timestamp_never_matches() {
        let pool = create_test_pool().await;
        sqlx::query("INSERT INTO events (id, kind, created_at) VALUES (1, 'audit', 'yesterday')")
            .execute(&pool)
            .await
            .unwrap();

        let store = SqliteRecordStore::from_pool(pool, "events", "id", "created_at")
            .await
            .unwrap();
        assert!(store.fetch_before(now(), 100, false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_in_chunks() {
        let pool = create_test_pool().await;
        for id in 0..1_200 {
            insert(&pool, id, "bulk", now() - Duration::days(60)).await;
        }
        let store = SqliteRecordStore::from_pool(pool, "events", "id", "created_at")
            .await
            .unwrap();

        let ids: Vec<i64> = (0..1_100).collect();
        assert_eq!(store.delete(&ids).await.unwrap(), 1_100);
        assert_eq!(store.count().await.unwrap(), 100);
        store.compact().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_column_rejected() {
        let pool = create_test_pool().await;
        let result = SqliteRecordStore::from_pool(pool, "events", "id", "recorded_at").await;
        assert!(matches!(result, Err(StoreError::Config(msg)) if msg.contains("recorded_at")));
    }

    #[tokio::test]
    async fn test_missing_table_rejected() {
        let pool = create_test_pool().await;
        let result = SqliteRecordStore::from_pool(pool, "nope", "id", "created_at").await;
        assert!(matches!(result, Err(StoreError::Config(_))));
    }
}
