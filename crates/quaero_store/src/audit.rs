//! SQLite-backed audit log. Every dispatcher call, local or remote,
//! lands here through the `AuditLog` trait so operators can inspect
//! pipeline health without instrumenting each provider separately.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quaero_protocol::error::{ProtocolError, Result};
use quaero_protocol::store::AuditLog;
use quaero_protocol::types::{AuditLogEntry, AuditOperation};
use sqlx::{Row, SqlitePool};

/// Opens (and migrates) a SQLite pool at `path`, or `sqlite::memory:` for
/// tests.
pub async fn open_pool(url: &str) -> Result<SqlitePool> {
    let pool = SqlitePool::connect(url)
        .await
        .map_err(|e| ProtocolError::ResourceMissing(format!("opening audit database {url}: {e}")))?;
    migrate(&pool).await?;
    Ok(pool)
}

async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS llm_audit_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp TEXT NOT NULL,
            mode TEXT NOT NULL,
            operation TEXT NOT NULL,
            success INTEGER NOT NULL,
            error TEXT,
            duration INTEGER NOT NULL,
            query_text TEXT
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| ProtocolError::ResourceMissing(format!("creating llm_audit_log: {e}")))?;
    Ok(())
}

/// SQLite-backed implementation of the `AuditLog` contract, with a few
/// extra query helpers (not part of the trait, same as the reference
/// audit sink it's modeled on) for operators inspecting pipeline health.
pub struct AuditLogger {
    pool: SqlitePool,
    log_queries: bool,
}

impl AuditLogger {
    pub fn new(pool: SqlitePool, log_queries: bool) -> Self {
        Self { pool, log_queries }
    }

    pub async fn by_operation(&self, operation: AuditOperation, limit: u32) -> Result<Vec<AuditLogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, timestamp, mode, operation, success, error, duration, query_text
            FROM llm_audit_log
            WHERE operation = ?
            ORDER BY timestamp DESC
            LIMIT ?
            "#,
        )
        .bind(operation.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_err)?;

        rows.iter().map(row_to_entry).collect()
    }

    /// Indented JSON array of entries in ascending timestamp order.
    pub async fn export_json(&self) -> Result<String> {
        let rows = sqlx::query(
            r#"
            SELECT id, timestamp, mode, operation, success, error, duration, query_text
            FROM llm_audit_log
            ORDER BY timestamp ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_err)?;

        let entries: Vec<AuditLogEntry> = rows.iter().map(row_to_entry).collect::<Result<_>>()?;
        serde_json::to_string_pretty(&entries).map_err(|e| ProtocolError::Json(e))
    }
}

fn sqlx_err(e: sqlx::Error) -> ProtocolError {
    ProtocolError::ResourceMissing(format!("audit log query failed: {e}"))
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<AuditLogEntry> {
    let id: i64 = row.get("id");
    let timestamp_str: String = row.get("timestamp");
    let mode: String = row.get("mode");
    let operation_str: String = row.get("operation");
    let success: i64 = row.get("success");
    let error: Option<String> = row.get("error");
    let duration: i64 = row.get("duration");
    let query_text: Option<String> = row.get("query_text");

    let timestamp = DateTime::parse_from_rfc3339(&timestamp_str)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());
    let operation = match operation_str.as_str() {
        "embed" => AuditOperation::Embed,
        _ => AuditOperation::Chat,
    };

    Ok(AuditLogEntry {
        id: Some(id),
        timestamp,
        mode,
        operation,
        success: success != 0,
        error,
        duration_ms: duration,
        query_text,
    })
}

#[async_trait]
impl AuditLog for AuditLogger {
    async fn record(&self, mut entry: AuditLogEntry) -> Result<i64> {
        if !self.log_queries {
            entry.query_text = None;
        }

        let result = sqlx::query(
            r#"
            INSERT INTO llm_audit_log (timestamp, mode, operation, success, error, duration, query_text)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.timestamp.to_rfc3339())
        .bind(&entry.mode)
        .bind(entry.operation.to_string())
        .bind(entry.success)
        .bind(&entry.error)
        .bind(entry.duration_ms)
        .bind(&entry.query_text)
        .execute(&self.pool)
        .await
        .map_err(sqlx_err)?;

        Ok(result.last_insert_rowid())
    }

    async fn recent(&self, limit: u32) -> Result<Vec<AuditLogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, timestamp, mode, operation, success, error, duration, query_text
            FROM llm_audit_log
            ORDER BY timestamp DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_err)?;

        rows.iter().map(row_to_entry).collect()
    }

    async fn count_by_success(&self, success: bool) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM llm_audit_log WHERE success = ?")
            .bind(success)
            .fetch_one(&self.pool)
            .await
            .map_err(sqlx_err)?;
        Ok(row.get("count"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn logger(log_queries: bool) -> AuditLogger {
        let pool = open_pool("sqlite::memory:").await.unwrap();
        AuditLogger::new(pool, log_queries)
    }

    #[tokio::test]
    async fn record_and_recent_round_trip() {
        let logger = logger(true).await;
        let mut entry = AuditLogEntry::new("cloud", AuditOperation::Chat);
        entry.query_text = Some("summarize AAPL".to_string());
        entry.duration_ms = 250;
        logger.record(entry).await.unwrap();

        let recent = logger.recent(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].mode, "cloud");
        assert_eq!(recent[0].query_text.as_deref(), Some("summarize AAPL"));
    }

    #[tokio::test]
    async fn log_queries_false_redacts_query_text() {
        let logger = logger(false).await;
        let mut entry = AuditLogEntry::new("offline", AuditOperation::Embed);
        entry.query_text = Some("sensitive prompt".to_string());
        logger.record(entry).await.unwrap();

        let recent = logger.recent(1).await.unwrap();
        assert_eq!(recent[0].query_text, None);
    }

    #[tokio::test]
    async fn by_operation_filters() {
        let logger = logger(true).await;
        logger.record(AuditLogEntry::new("cloud", AuditOperation::Chat)).await.unwrap();
        logger.record(AuditLogEntry::new("cloud", AuditOperation::Embed)).await.unwrap();
        logger.record(AuditLogEntry::new("cloud", AuditOperation::Embed)).await.unwrap();

        let embeds = logger.by_operation(AuditOperation::Embed, 10).await.unwrap();
        assert_eq!(embeds.len(), 2);
    }

    #[tokio::test]
    async fn count_by_success_splits_outcomes() {
        let logger = logger(true).await;
        let mut failed = AuditLogEntry::new("cloud", AuditOperation::Chat);
        failed.success = false;
        failed.error = Some("rate limited".to_string());
        logger.record(failed).await.unwrap();
        logger.record(AuditLogEntry::new("cloud", AuditOperation::Chat)).await.unwrap();

        assert_eq!(logger.count_by_success(true).await.unwrap(), 1);
        assert_eq!(logger.count_by_success(false).await.unwrap(), 1);
    }
}
