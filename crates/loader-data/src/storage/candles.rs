//! PostgreSQL 캔들 저장소.
//!
//! 해상도마다 테이블이 분리되어 있으며 키는 `(figi, time)`입니다.
//! 시각은 `timestamptz`로 저장하고 읽을 때 기준 시간대로 변환합니다.

use super::CandleStore;
use crate::error::{DataError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use loader_core::time::to_reporting_time;
use loader_core::{Candle, Resolution};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use std::collections::HashSet;
use tracing::{debug, instrument};

/// 한 번의 INSERT 문에 넣는 최대 행 수.
const INSERT_CHUNK: usize = 500;

/// 해상도별 캔들 테이블 이름.
pub fn candle_table(resolution: Resolution) -> &'static str {
    match resolution {
        Resolution::Minute => "minute_candles",
        Resolution::Day => "daily_candles",
    }
}

/// DB 캔들 레코드.
#[derive(Debug, Clone, FromRow)]
pub struct CandleRecord {
    pub figi: String,
    pub time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: i64,
    pub is_complete: bool,
}

/// `bigint` 컬럼에 넣을 거래량. 범위를 벗어나면 잘라내지 않고 거부합니다.
fn volume_column(candle: &Candle) -> Result<i64> {
    i64::try_from(candle.volume).map_err(|_| {
        DataError::InvalidData(format!("거래량 범위 초과: {} ({})", candle.volume, candle.key()))
    })
}

impl CandleRecord {
    pub fn into_candle(self) -> Result<Candle> {
        let volume = u64::try_from(self.volume).map_err(|_| {
            DataError::InvalidData(format!("음수 거래량: {} ({})", self.volume, self.figi))
        })?;
        Ok(Candle {
            figi: self.figi,
            time: to_reporting_time(self.time),
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume,
            complete: self.is_complete,
        })
    }
}

/// PostgreSQL 캔들 저장소.
#[derive(Clone)]
pub struct PgCandleStore {
    pool: PgPool,
    resolution: Resolution,
    table: &'static str,
}

impl PgCandleStore {
    pub fn new(pool: PgPool, resolution: Resolution) -> Self {
        Self {
            pool,
            resolution,
            table: candle_table(resolution),
        }
    }
}

#[async_trait]
impl CandleStore for PgCandleStore {
    fn resolution(&self) -> Resolution {
        self.resolution
    }

    #[instrument(skip(self), fields(table = self.table))]
    async fn existing_times(
        &self,
        figi: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<HashSet<DateTime<Utc>>> {
        let sql = format!(
            "SELECT time FROM {} WHERE figi = $1 AND time >= $2 AND time <= $3",
            self.table
        );
        let times: Vec<DateTime<Utc>> = sqlx::query_scalar(&sql)
            .bind(figi)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?;
        Ok(times.into_iter().collect())
    }

    #[instrument(skip(self, candles), fields(table = self.table, count = candles.len()))]
    async fn insert_batch(&self, candles: &[Candle]) -> Result<u64> {
        if candles.is_empty() {
            return Ok(0);
        }
        let volumes = candles.iter().map(volume_column).collect::<Result<Vec<i64>>>()?;

        let sql = format!(
            r#"
            INSERT INTO {} (figi, time, open, high, low, close, volume, is_complete)
            SELECT * FROM UNNEST(
                $1::text[], $2::timestamptz[],
                $3::numeric[], $4::numeric[], $5::numeric[], $6::numeric[],
                $7::bigint[], $8::bool[]
            )
            ON CONFLICT (figi, time) DO NOTHING
            "#,
            self.table
        );

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DataError::ConnectionError(e.to_string()))?;
        let mut inserted = 0u64;

        for (chunk, volumes) in candles.chunks(INSERT_CHUNK).zip(volumes.chunks(INSERT_CHUNK)) {
            let figis: Vec<&str> = chunk.iter().map(|c| c.figi.as_str()).collect();
            let times: Vec<DateTime<Utc>> = chunk.iter().map(|c| c.time.with_timezone(&Utc)).collect();
            let opens: Vec<Decimal> = chunk.iter().map(|c| c.open).collect();
            let highs: Vec<Decimal> = chunk.iter().map(|c| c.high).collect();
            let lows: Vec<Decimal> = chunk.iter().map(|c| c.low).collect();
            let closes: Vec<Decimal> = chunk.iter().map(|c| c.close).collect();
            let completes: Vec<bool> = chunk.iter().map(|c| c.complete).collect();

            let result = sqlx::query(&sql)
                .bind(&figis)
                .bind(&times)
                .bind(&opens)
                .bind(&highs)
                .bind(&lows)
                .bind(&closes)
                .bind(volumes)
                .bind(&completes)
                .execute(&mut *tx)
                .await
                .map_err(|e| DataError::InsertError(e.to_string()))?;

            inserted += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| DataError::InsertError(e.to_string()))?;

        debug!(inserted, skipped = candles.len() as u64 - inserted, "캔들 배치 저장");
        Ok(inserted)
    }

    #[instrument(skip(self), fields(table = self.table))]
    async fn find_range(
        &self,
        figi: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let sql = format!(
            r#"
            SELECT figi, time, open, high, low, close, volume, is_complete
            FROM {}
            WHERE figi = $1 AND time >= $2 AND time < $3
            ORDER BY time ASC
            "#,
            self.table
        );
        let records: Vec<CandleRecord> = sqlx::query_as(&sql)
            .bind(figi)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DataError::QueryError(e.to_string()))?;

        records.into_iter().map(CandleRecord::into_candle).collect()
    }

    async fn count(&self, figi: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {} WHERE figi = $1", self.table);
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(figi)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
