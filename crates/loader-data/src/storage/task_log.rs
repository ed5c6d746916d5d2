//! PostgreSQL 작업 원장 (`task_logs`).
//!
//! 종료 상태 전이는 `status IN ('STARTED', 'PROCESSING')` 조건부 UPDATE로만
//! 일어나므로 동시에 닫으려 해도 한 번만 성공합니다.

use super::TaskLogStore;
use crate::error::{DataError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use loader_core::{TaskLogEntry, TaskStatus};
use sqlx::{FromRow, PgPool};
use tracing::instrument;

const SELECT_COLUMNS: &str =
    "task_id, endpoint, status, message, start_time, end_time, duration_ms";

/// DB 작업 원장 레코드.
#[derive(Debug, Clone, FromRow)]
pub struct TaskLogRecord {
    pub task_id: String,
    pub endpoint: String,
    pub status: String,
    pub message: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

impl TryFrom<TaskLogRecord> for TaskLogEntry {
    type Error = DataError;

    fn try_from(r: TaskLogRecord) -> Result<Self> {
        let status = r.status.parse::<TaskStatus>().map_err(DataError::InvalidData)?;
        Ok(Self {
            task_id: r.task_id,
            endpoint: r.endpoint,
            status,
            message: r.message,
            start_time: r.start_time,
            end_time: r.end_time,
            duration_ms: r.duration_ms,
        })
    }
}

fn into_entries(records: Vec<TaskLogRecord>) -> Result<Vec<TaskLogEntry>> {
    records.into_iter().map(TaskLogEntry::try_from).collect()
}

/// PostgreSQL 작업 원장 저장소.
#[derive(Clone)]
pub struct PgTaskLogStore {
    pool: PgPool,
}

impl PgTaskLogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskLogStore for PgTaskLogStore {
    #[instrument(skip(self, entry), fields(task_id = %entry.task_id))]
    async fn insert(&self, entry: &TaskLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO task_logs (task_id, endpoint, status, message, start_time, end_time, duration_ms)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&entry.task_id)
        .bind(&entry.endpoint)
        .bind(entry.status.as_str())
        .bind(&entry.message)
        .bind(entry.start_time)
        .bind(entry.end_time)
        .bind(entry.duration_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_processing(&self, task_id: &str, message: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE task_logs SET status = 'PROCESSING', message = $2
            WHERE task_id = $1 AND status IN ('STARTED', 'PROCESSING')
            "#,
        )
        .bind(task_id)
        .bind(message)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(match self.find(task_id).await? {
                Some(entry) => DataError::InvalidState(format!("{} is {}", task_id, entry.status)),
                None => DataError::NotFound(task_id.to_string()),
            });
        }
        Ok(())
    }

    #[instrument(skip(self, message))]
    async fn close(
        &self,
        task_id: &str,
        status: TaskStatus,
        message: &str,
        end_time: DateTime<Utc>,
    ) -> Result<TaskLogEntry> {
        if !status.is_terminal() {
            return Err(DataError::InvalidState(format!("{} is not terminal", status)));
        }

        let sql = format!(
            r#"
            UPDATE task_logs SET
                status = $2,
                message = $3,
                end_time = GREATEST($4, start_time),
                duration_ms = (EXTRACT(EPOCH FROM (GREATEST($4, start_time) - start_time)) * 1000)::bigint
            WHERE task_id = $1 AND status IN ('STARTED', 'PROCESSING')
            RETURNING {}
            "#,
            SELECT_COLUMNS
        );
        let record: Option<TaskLogRecord> = sqlx::query_as(&sql)
            .bind(task_id)
            .bind(status.as_str())
            .bind(message)
            .bind(end_time)
            .fetch_optional(&self.pool)
            .await?;

        match record {
            Some(record) => TaskLogEntry::try_from(record),
            None => Err(match self.find(task_id).await? {
                Some(entry) => DataError::InvalidState(format!(
                    "{} already closed as {}",
                    task_id, entry.status
                )),
                None => DataError::NotFound(task_id.to_string()),
            }),
        }
    }

    async fn find(&self, task_id: &str) -> Result<Option<TaskLogEntry>> {
        let sql = format!("SELECT {} FROM task_logs WHERE task_id = $1", SELECT_COLUMNS);
        let record: Option<TaskLogRecord> = sqlx::query_as(&sql)
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        record.map(TaskLogEntry::try_from).transpose()
    }

    async fn by_status(&self, status: TaskStatus) -> Result<Vec<TaskLogEntry>> {
        let sql = format!(
            "SELECT {} FROM task_logs WHERE status = $1 ORDER BY start_time DESC",
            SELECT_COLUMNS
        );
        let records: Vec<TaskLogRecord> = sqlx::query_as(&sql)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;
        into_entries(records)
    }

    async fn active(&self) -> Result<Vec<TaskLogEntry>> {
        let sql = format!(
            "SELECT {} FROM task_logs WHERE status IN ('STARTED', 'PROCESSING') ORDER BY start_time DESC",
            SELECT_COLUMNS
        );
        let records: Vec<TaskLogRecord> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        into_entries(records)
    }

    async fn in_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<TaskLogEntry>> {
        let sql = format!(
            "SELECT {} FROM task_logs WHERE start_time >= $1 AND start_time < $2 ORDER BY start_time DESC",
            SELECT_COLUMNS
        );
        let records: Vec<TaskLogRecord> = sqlx::query_as(&sql)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?;
        into_entries(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_record_with_unknown_status_is_invalid() {
        let record = TaskLogRecord {
            task_id: "T_1".to_string(),
            endpoint: "load-minute".to_string(),
            status: "PAUSED".to_string(),
            message: String::new(),
            start_time: Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap(),
            end_time: None,
            duration_ms: None,
        };
        assert!(matches!(TaskLogEntry::try_from(record), Err(DataError::InvalidData(_))));
    }
}
