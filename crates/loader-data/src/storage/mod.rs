//! 저장소 트레이트와 구현.
//!
//! - `candles`: 해상도별 캔들 테이블 (`minute_candles`, `daily_candles`)
//! - `aggregates`: 종목별 세션 집계 (`session_aggregates`)
//! - `task_log`: 작업 원장 (`task_logs`)
//! - `memory`: 테스트와 로컬 실행용 메모리 구현

pub mod aggregates;
pub mod candles;
pub mod memory;
pub mod task_log;

use crate::error::{DataError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use loader_core::{Candle, Resolution, SessionAggregate, SessionWindow, TaskLogEntry, TaskStatus};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::collections::HashSet;
use std::time::Duration;
use tracing::info;

/// 해상도 하나의 캔들 저장소. 키는 `(figi, time)`입니다.
#[async_trait]
pub trait CandleStore: Send + Sync {
    fn resolution(&self) -> Resolution;

    /// 구간 `[from, to]`에 이미 저장된 시각 집합.
    async fn existing_times(
        &self,
        figi: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<HashSet<DateTime<Utc>>>;

    /// 한 트랜잭션으로 삽입하고 새로 들어간 행 수를 반환합니다.
    ///
    /// 이미 있는 키는 덮어쓰지 않고 건너뜁니다.
    async fn insert_batch(&self, candles: &[Candle]) -> Result<u64>;

    /// 구간 `[from, to)`의 캔들을 시각 순으로 반환합니다.
    async fn find_range(
        &self,
        figi: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>>;

    async fn count(&self, figi: &str) -> Result<i64>;
}

/// 윈도우 평균의 종목 전체 통계.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeStats {
    /// 평균이 양수인 종목 수
    pub instruments: i64,
    pub avg: Option<Decimal>,
    pub max: Option<Decimal>,
    pub min: Option<Decimal>,
}

/// 종목별 세션 집계 저장소.
#[async_trait]
pub trait AggregateStore: Send + Sync {
    async fn get(&self, figi: &str) -> Result<Option<SessionAggregate>>;

    /// 생성 또는 갱신. `created_at`은 최초 값이 유지됩니다.
    async fn upsert(&self, aggregate: &SessionAggregate) -> Result<()>;

    /// `updated_at` 내림차순.
    async fn list_recent(&self, limit: i64) -> Result<Vec<SessionAggregate>>;

    /// 윈도우 평균 내림차순 상위 종목.
    async fn top_by_average(&self, window: SessionWindow, limit: i64) -> Result<Vec<SessionAggregate>>;

    /// `last_calculated`가 `before`보다 오래된 레코드.
    async fn stale_since(&self, before: DateTime<Utc>) -> Result<Vec<SessionAggregate>>;

    async fn window_stats(&self, window: SessionWindow) -> Result<VolumeStats>;
}

/// 작업 원장 저장소. 항목은 삭제되지 않습니다.
#[async_trait]
pub trait TaskLogStore: Send + Sync {
    async fn insert(&self, entry: &TaskLogEntry) -> Result<()>;

    /// 종료되지 않은 작업을 PROCESSING으로 바꿉니다.
    async fn mark_processing(&self, task_id: &str, message: &str) -> Result<()>;

    /// 종료 상태를 한 번만 설정하고 갱신된 항목을 반환합니다.
    ///
    /// 이미 종료된 작업이면 [`DataError::InvalidState`]입니다.
    async fn close(
        &self,
        task_id: &str,
        status: TaskStatus,
        message: &str,
        end_time: DateTime<Utc>,
    ) -> Result<TaskLogEntry>;

    async fn find(&self, task_id: &str) -> Result<Option<TaskLogEntry>>;

    /// 시작 시각 내림차순.
    async fn by_status(&self, status: TaskStatus) -> Result<Vec<TaskLogEntry>>;

    /// STARTED 또는 PROCESSING 상태인 작업.
    async fn active(&self) -> Result<Vec<TaskLogEntry>>;

    /// 시작 시각이 `[from, to)`에 있는 작업.
    async fn in_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<TaskLogEntry>>;
}

/// 데이터베이스 연결 설정.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

impl From<&loader_core::config::DatabaseConfig> for DatabaseConfig {
    fn from(config: &loader_core::config::DatabaseConfig) -> Self {
        Self {
            url: config.url.clone(),
            max_connections: config.max_connections,
            connect_timeout_secs: config.connection_timeout_secs,
        }
    }
}

/// PostgreSQL 연결 풀 래퍼.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 새로운 데이터베이스 연결 풀을 생성합니다.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        info!(max_connections = config.max_connections, "데이터베이스 연결 중");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(|e| DataError::ConnectionError(e.to_string()))?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
