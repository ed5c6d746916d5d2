//! 외부 협력자 경계.
//!
//! - [`MarketDataGateway`]: 종목/날짜/해상도별 원시 캔들 조회
//! - [`InstrumentCatalog`]: 자산군별 종목 목록

pub mod retry;
pub mod t_invest;

pub use retry::RetryPolicy;
pub use t_invest::TInvestRestClient;

use crate::error::{DataError, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use loader_core::{AssetClass, RawCandle, Resolution};
use sqlx::PgPool;

/// 시장 데이터 게이트웨이.
///
/// 실패하거나 빈 목록을 반환할 수 있습니다.
#[async_trait]
pub trait MarketDataGateway: Send + Sync {
    /// 기준 시간대 하루치 캔들을 조회합니다.
    async fn fetch_candles(
        &self,
        figi: &str,
        date: NaiveDate,
        resolution: Resolution,
    ) -> Result<Vec<RawCandle>>;
}

/// 종목 카탈로그.
#[async_trait]
pub trait InstrumentCatalog: Send + Sync {
    async fn list_instruments(&self, asset_class: AssetClass) -> Result<Vec<String>>;
}

/// 자산군별 카탈로그 테이블 이름.
pub fn catalog_table(asset_class: AssetClass) -> &'static str {
    match asset_class {
        AssetClass::Share => "shares",
        AssetClass::Future => "futures",
        AssetClass::Indicative => "indicatives",
    }
}

/// PostgreSQL 종목 카탈로그 (`shares`, `futures`, `indicatives`).
#[derive(Clone)]
pub struct PgInstrumentCatalog {
    pool: PgPool,
}

impl PgInstrumentCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InstrumentCatalog for PgInstrumentCatalog {
    async fn list_instruments(&self, asset_class: AssetClass) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT figi FROM {} WHERE figi IS NOT NULL ORDER BY figi",
            catalog_table(asset_class)
        );
        let figis: Vec<String> = sqlx::query_scalar(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DataError::QueryError(e.to_string()))?;
        Ok(figis)
    }
}
