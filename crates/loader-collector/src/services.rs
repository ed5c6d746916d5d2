//! 서비스 조립.
//!
//! 설정으로부터 저장소, 게이트웨이, 적재기, 집계기를 만들고 하루치 전체
//! 워크플로우(분봉 → 일봉 → 세션 집계)를 실행합니다.

use crate::config::CollectorConfig;
use crate::modules::{
    AggregationTarget, CandleIngestor, IngestOptions, IngestRequest, SessionAggregator, TaskLedger,
};
use crate::stats::{AggregationSummary, LogSummary};
use crate::Result;
use chrono::NaiveDate;
use loader_core::{IngestionOutcome, Resolution};
use loader_data::storage::DatabaseConfig;
use loader_data::{
    AggregateStore, CandleStore, Database, InstrumentCatalog, MarketDataGateway, PgAggregateStore,
    PgCandleStore, PgInstrumentCatalog, PgTaskLogStore, TInvestRestClient, TaskLogStore,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// 하루치 워크플로우 결과.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyRunReport {
    pub date: NaiveDate,
    pub minute: IngestionOutcome,
    pub daily: IngestionOutcome,
    pub aggregation: AggregationSummary,
}

/// 저장소 묶음.
pub struct StoreSet {
    pub minute_candles: Arc<dyn CandleStore>,
    pub day_candles: Arc<dyn CandleStore>,
    pub aggregates: Arc<dyn AggregateStore>,
    pub task_log: Arc<dyn TaskLogStore>,
    pub catalog: Arc<dyn InstrumentCatalog>,
}

/// 적재/집계 서비스.
#[derive(Clone)]
pub struct LoaderServices {
    pub ingestor: CandleIngestor,
    pub aggregator: SessionAggregator,
    pub ledger: TaskLedger,
    database: Option<Database>,
}

impl LoaderServices {
    /// 주입된 저장소와 게이트웨이로 서비스를 만듭니다.
    pub fn from_parts(
        gateway: Arc<dyn MarketDataGateway>,
        stores: StoreSet,
        options: IngestOptions,
        aggregation_concurrency: usize,
    ) -> Self {
        let ledger = TaskLedger::new(stores.task_log);
        let ingestor = CandleIngestor::new(
            gateway,
            stores.catalog.clone(),
            stores.minute_candles.clone(),
            stores.day_candles,
            ledger.clone(),
            options,
        );
        let aggregator = SessionAggregator::new(
            stores.minute_candles,
            stores.aggregates,
            stores.catalog,
            ledger.clone(),
            aggregation_concurrency,
        );

        Self {
            ingestor,
            aggregator,
            ledger,
            database: None,
        }
    }

    /// PostgreSQL과 T-Invest REST 게이트웨이에 연결합니다.
    pub async fn connect(config: &CollectorConfig) -> Result<Self> {
        let database = Database::connect(&DatabaseConfig::from(&config.app.database)).await?;
        let pool = database.pool().clone();
        info!("데이터베이스 연결 성공");

        let gateway = TInvestRestClient::from_config(&config.app.gateway)?;
        let stores = StoreSet {
            minute_candles: Arc::new(PgCandleStore::new(pool.clone(), Resolution::Minute)),
            day_candles: Arc::new(PgCandleStore::new(pool.clone(), Resolution::Day)),
            aggregates: Arc::new(PgAggregateStore::new(pool.clone())),
            task_log: Arc::new(PgTaskLogStore::new(pool.clone())),
            catalog: Arc::new(PgInstrumentCatalog::new(pool)),
        };

        let mut services = Self::from_parts(
            Arc::new(gateway),
            stores,
            config.ingest_options(),
            config.app.aggregation.concurrency,
        );
        services.database = Some(database);
        Ok(services)
    }

    /// 전체 카탈로그의 분봉과 일봉을 적재한 뒤 같은 날짜를 집계합니다.
    ///
    /// 적재 단계가 실패해도 집계는 이미 저장된 분봉으로 진행합니다.
    pub async fn run_daily(&self, date: NaiveDate) -> Result<DailyRunReport> {
        info!(date = %date, "=== 일일 워크플로우 시작 ===");

        info!("Step 1/3: 분봉 적재");
        let minute = self
            .ingestor
            .ingest_and_wait(IngestRequest::new(Resolution::Minute).with_date(date))
            .await?;
        minute.log_summary("load-minute");

        info!("Step 2/3: 일봉 적재");
        let daily = self
            .ingestor
            .ingest_and_wait(IngestRequest::new(Resolution::Day).with_date(date))
            .await?;
        daily.log_summary("load-daily");

        info!("Step 3/3: 세션 집계");
        let aggregation = self
            .aggregator
            .aggregate_range(AggregationTarget::Catalog(Vec::new()), date, date)
            .await?;

        info!(date = %date, "=== 일일 워크플로우 완료 ===");
        Ok(DailyRunReport {
            date,
            minute,
            daily,
            aggregation,
        })
    }

    /// 연결 풀을 닫습니다.
    pub async fn close(&self) {
        if let Some(database) = &self.database {
            database.pool().close().await;
        }
    }
}
