//! SQLite-backed implementation of [`StoreBackend`].

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument};

use crate::error::{StoreError, StoreResult};

use super::backend::StoreBackend;
use super::schema::{CheckStatus, Downtime, ProbeResult, Status};

pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();
        info!("opening sqlite store at {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        debug!("running store migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    fn millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn from_millis(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }

    fn from_millis_opt(millis: Option<i64>) -> Option<DateTime<Utc>> {
        millis.map(Self::from_millis)
    }

    fn downtime_from_row(row: &sqlx::sqlite::SqliteRow) -> Downtime {
        Downtime {
            id: row.get("id"),
            environment: row.get("environment"),
            check: row.get("check_id"),
            name: row.get("name"),
            message: row.get("message"),
            start: Self::from_millis(row.get("start")),
            end: Self::from_millis_opt(row.get::<Option<i64>, _>("end")),
            fail_count: row.get("fail_count"),
            last_result_id: row.get("last_result_id"),
            recovered: row.get::<i64, _>("recovered") != 0,
            comment: row.get("comment"),
            down_notify_sent: row.get::<i64, _>("down_notify_sent") != 0,
            down_notify_time: Self::from_millis_opt(row.get::<Option<i64>, _>("down_notify_time")),
            recover_notify_sent: row.get::<i64, _>("recover_notify_sent") != 0,
            recover_notify_time: Self::from_millis_opt(row.get::<Option<i64>, _>("recover_notify_time")),
        }
    }
}

#[async_trait]
impl StoreBackend for SqliteStore {
    #[instrument(skip(self, result), fields(environment = %result.environment, check = %result.check))]
    async fn insert_result(&self, result: &ProbeResult) -> StoreResult<i64> {
        let id = sqlx::query(
            "INSERT INTO results (environment, check_id, name, status, message, detail, duration_ms, timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&result.environment)
        .bind(&result.check)
        .bind(&result.name)
        .bind(result.status.as_str())
        .bind(&result.message)
        .bind(&result.detail)
        .bind(result.duration_ms)
        .bind(Self::millis(&result.timestamp))
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(id)
    }

    async fn upsert_check_status(&self, result: &ProbeResult) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO check_status (environment, check_id, name, status, message, detail, duration_ms, updated, last_result_id)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (environment, check_id) DO UPDATE SET
                name = excluded.name,
                status = excluded.status,
                message = excluded.message,
                detail = excluded.detail,
                duration_ms = excluded.duration_ms,
                updated = excluded.updated,
                last_result_id = excluded.last_result_id",
        )
        .bind(&result.environment)
        .bind(&result.check)
        .bind(&result.name)
        .bind(result.status.as_str())
        .bind(&result.message)
        .bind(&result.detail)
        .bind(result.duration_ms)
        .bind(Self::millis(&result.timestamp))
        .bind(result.id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn open_downtime(&self, environment: &str, check: &str) -> StoreResult<Option<Downtime>> {
        let row = sqlx::query(
            "SELECT * FROM downtimes WHERE environment = ? AND check_id = ? AND recovered = 0",
        )
        .bind(environment)
        .bind(check)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Self::downtime_from_row(&r)))
    }

    async fn create_downtime(&self, result: &ProbeResult) -> StoreResult<Downtime> {
        let id = sqlx::query(
            "INSERT INTO downtimes (environment, check_id, name, message, start, fail_count, last_result_id, recovered)
             VALUES (?, ?, ?, ?, ?, 1, ?, 0)",
        )
        .bind(&result.environment)
        .bind(&result.check)
        .bind(&result.name)
        .bind(&result.message)
        .bind(Self::millis(&result.timestamp))
        .bind(result.id)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(Downtime {
            id,
            environment: result.environment.clone(),
            check: result.check.clone(),
            name: result.name.clone(),
            message: result.message.clone(),
            start: result.timestamp,
            end: None,
            fail_count: 1,
            last_result_id: result.id,
            recovered: false,
            comment: None,
            down_notify_sent: false,
            down_notify_time: None,
            recover_notify_sent: false,
            recover_notify_time: None,
        })
    }

    async fn record_downtime_failure(
        &self,
        downtime_id: i64,
        message: &str,
        last_result_id: i64,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE downtimes SET fail_count = fail_count + 1, message = ?, last_result_id = ? WHERE id = ?",
        )
        .bind(message)
        .bind(last_result_id)
        .bind(downtime_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn close_downtime(&self, downtime_id: i64, end: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("UPDATE downtimes SET recovered = 1, end = ? WHERE id = ?")
            .bind(Self::millis(&end))
            .bind(downtime_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn mark_down_notified(&self, ids: &[i64], at: DateTime<Utc>) -> StoreResult<()> {
        let at_millis = Self::millis(&at);
        for id in ids {
            sqlx::query("UPDATE downtimes SET down_notify_sent = 1, down_notify_time = ? WHERE id = ?")
                .bind(at_millis)
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn mark_recover_notified(&self, ids: &[i64], at: DateTime<Utc>) -> StoreResult<()> {
        let at_millis = Self::millis(&at);
        for id in ids {
            sqlx::query("UPDATE downtimes SET recover_notify_sent = 1, recover_notify_time = ? WHERE id = ?")
                .bind(at_millis)
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn pending_down(&self, environment: &str) -> StoreResult<Vec<Downtime>> {
        let rows = sqlx::query(
            "SELECT * FROM downtimes WHERE environment = ? AND recovered = 0 AND down_notify_sent = 0",
        )
        .bind(environment)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::downtime_from_row).collect())
    }

    async fn pending_recover(&self, environment: &str) -> StoreResult<Vec<Downtime>> {
        let rows = sqlx::query(
            "SELECT * FROM downtimes WHERE environment = ? AND recovered = 1 AND down_notify_sent = 1 AND recover_notify_sent = 0",
        )
        .bind(environment)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::downtime_from_row).collect())
    }

    async fn status(&self, environment: &str) -> StoreResult<Vec<CheckStatus>> {
        let rows = sqlx::query(
            "SELECT * FROM check_status WHERE environment = ? ORDER BY name ASC",
        )
        .bind(environment)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| CheckStatus {
                environment: row.get("environment"),
                check: row.get("check_id"),
                name: row.get("name"),
                status: Status::parse(row.get::<String, _>("status").as_str()),
                message: row.get("message"),
                detail: row.get("detail"),
                duration_ms: row.get("duration_ms"),
                updated: Self::from_millis(row.get("updated")),
                last_result_id: row.get("last_result_id"),
            })
            .collect())
    }

    async fn downtimes(&self, environment: &str) -> StoreResult<Vec<Downtime>> {
        let rows = sqlx::query(
            "SELECT * FROM downtimes WHERE environment = ? ORDER BY recovered ASC, start DESC LIMIT 30",
        )
        .bind(environment)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::downtime_from_row).collect())
    }

    async fn result_by_id(&self, id: i64) -> StoreResult<Option<ProbeResult>> {
        let row = sqlx::query("SELECT * FROM results WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| ProbeResult {
            id: row.get("id"),
            environment: row.get("environment"),
            check: row.get("check_id"),
            name: row.get("name"),
            status: Status::parse(row.get::<String, _>("status").as_str()),
            message: row.get("message"),
            detail: row.get("detail"),
            duration_ms: row.get("duration_ms"),
            timestamp: Self::from_millis(row.get("timestamp")),
        }))
    }

    #[instrument(skip(self, checks), fields(count = checks.len()))]
    async fn reconcile(&self, checks: &[(String, String, String)]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        for (environment, check, name) in checks {
            sqlx::query(
                "INSERT INTO check_status (environment, check_id, name, status, message, duration_ms, updated, last_result_id)
                 VALUES (?, ?, ?, 'ERROR', 'not yet checked', 0, 0, 0)
                 ON CONFLICT (environment, check_id) DO UPDATE SET name = excluded.name",
            )
            .bind(environment)
            .bind(check)
            .bind(name)
            .execute(&mut *tx)
            .await?;
        }

        let placeholders = vec!["(?, ?)"; checks.len()].join(", ");
        if !checks.is_empty() {
            let sql = format!(
                "DELETE FROM check_status WHERE (environment, check_id) NOT IN ({})",
                placeholders
            );
            let mut query = sqlx::query(&sql);
            for (environment, check, _name) in checks {
                query = query.bind(environment).bind(check);
            }
            query.execute(&mut *tx).await?;
        } else {
            sqlx::query("DELETE FROM check_status").execute(&mut *tx).await?;
        }

        tx.commit().await?;
        debug!("reconciled check_status against {} configured checks", checks.len());
        Ok(())
    }
}
