//! PostgreSQL 세션 집계 저장소 (`session_aggregates`).

use super::{AggregateStore, VolumeStats};
use crate::error::{DataError, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use loader_core::{SessionAggregate, SessionWindow};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use tracing::instrument;

const SELECT_COLUMNS: &str = r#"
    figi, avg_morning_volume, avg_evening_volume, avg_weekend_volume,
    morning_days, evening_days, weekend_days, aggregated_dates,
    last_calculated, created_at, updated_at
"#;

/// 윈도우 평균 컬럼 이름.
pub fn average_column(window: SessionWindow) -> &'static str {
    match window {
        SessionWindow::Morning => "avg_morning_volume",
        SessionWindow::Evening => "avg_evening_volume",
        SessionWindow::Weekend => "avg_weekend_volume",
    }
}

/// DB 집계 레코드.
#[derive(Debug, Clone, FromRow)]
pub struct AggregateRecord {
    pub figi: String,
    pub avg_morning_volume: Option<Decimal>,
    pub avg_evening_volume: Option<Decimal>,
    pub avg_weekend_volume: Option<Decimal>,
    pub morning_days: i64,
    pub evening_days: i64,
    pub weekend_days: i64,
    /// `DATE[]` 컬럼
    pub aggregated_dates: Vec<NaiveDate>,
    pub last_calculated: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<AggregateRecord> for SessionAggregate {
    fn from(r: AggregateRecord) -> Self {
        Self {
            figi: r.figi,
            avg_morning_volume: r.avg_morning_volume,
            avg_evening_volume: r.avg_evening_volume,
            avg_weekend_volume: r.avg_weekend_volume,
            morning_days: r.morning_days,
            evening_days: r.evening_days,
            weekend_days: r.weekend_days,
            aggregated_dates: r.aggregated_dates.into_iter().collect(),
            last_calculated: r.last_calculated,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

/// PostgreSQL 세션 집계 저장소.
#[derive(Clone)]
pub struct PgAggregateStore {
    pool: PgPool,
}

impl PgAggregateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, sql: &str, bind_limit: Option<i64>) -> Result<Vec<SessionAggregate>> {
        let mut query = sqlx::query_as::<_, AggregateRecord>(sql);
        if let Some(limit) = bind_limit {
            query = query.bind(limit);
        }
        let records = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DataError::QueryError(e.to_string()))?;
        Ok(records.into_iter().map(SessionAggregate::from).collect())
    }
}

#[async_trait]
impl AggregateStore for PgAggregateStore {
    async fn get(&self, figi: &str) -> Result<Option<SessionAggregate>> {
        let sql = format!("SELECT {} FROM session_aggregates WHERE figi = $1", SELECT_COLUMNS);
        let record: Option<AggregateRecord> = sqlx::query_as(&sql)
            .bind(figi)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record.map(SessionAggregate::from))
    }

    #[instrument(skip(self, aggregate), fields(figi = %aggregate.figi))]
    async fn upsert(&self, aggregate: &SessionAggregate) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO session_aggregates (
                figi, avg_morning_volume, avg_evening_volume, avg_weekend_volume,
                morning_days, evening_days, weekend_days, aggregated_dates,
                last_calculated, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (figi) DO UPDATE SET
                avg_morning_volume = EXCLUDED.avg_morning_volume,
                avg_evening_volume = EXCLUDED.avg_evening_volume,
                avg_weekend_volume = EXCLUDED.avg_weekend_volume,
                morning_days = EXCLUDED.morning_days,
                evening_days = EXCLUDED.evening_days,
                weekend_days = EXCLUDED.weekend_days,
                aggregated_dates = EXCLUDED.aggregated_dates,
                last_calculated = EXCLUDED.last_calculated,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&aggregate.figi)
        .bind(aggregate.avg_morning_volume)
        .bind(aggregate.avg_evening_volume)
        .bind(aggregate.avg_weekend_volume)
        .bind(aggregate.morning_days)
        .bind(aggregate.evening_days)
        .bind(aggregate.weekend_days)
        .bind(aggregate.aggregated_dates.iter().copied().collect::<Vec<NaiveDate>>())
        .bind(aggregate.last_calculated)
        .bind(aggregate.created_at)
        .bind(aggregate.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| DataError::InsertError(e.to_string()))?;

        Ok(())
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<SessionAggregate>> {
        let sql = format!(
            "SELECT {} FROM session_aggregates ORDER BY updated_at DESC LIMIT $1",
            SELECT_COLUMNS
        );
        self.fetch(&sql, Some(limit)).await
    }

    async fn top_by_average(&self, window: SessionWindow, limit: i64) -> Result<Vec<SessionAggregate>> {
        let column = average_column(window);
        let sql = format!(
            "SELECT {} FROM session_aggregates WHERE {} IS NOT NULL ORDER BY {} DESC LIMIT $1",
            SELECT_COLUMNS, column, column
        );
        self.fetch(&sql, Some(limit)).await
    }

    async fn stale_since(&self, before: DateTime<Utc>) -> Result<Vec<SessionAggregate>> {
        let sql = format!(
            "SELECT {} FROM session_aggregates WHERE last_calculated < $1 ORDER BY last_calculated ASC",
            SELECT_COLUMNS
        );
        let records: Vec<AggregateRecord> = sqlx::query_as(&sql)
            .bind(before)
            .fetch_all(&self.pool)
            .await?;
        Ok(records.into_iter().map(SessionAggregate::from).collect())
    }

    async fn window_stats(&self, window: SessionWindow) -> Result<VolumeStats> {
        let column = average_column(window);
        let sql = format!(
            "SELECT COUNT(*), ROUND(AVG({c}), 2), MAX({c}), MIN({c}) FROM session_aggregates WHERE {c} > 0",
            c = column
        );
        let (instruments, avg, max, min): (i64, Option<Decimal>, Option<Decimal>, Option<Decimal>) =
            sqlx::query_as(&sql).fetch_one(&self.pool).await?;

        Ok(VolumeStats {
            instruments,
            avg,
            max,
            min,
        })
    }
}
