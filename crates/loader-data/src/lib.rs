//! 캔들 저장소, 종목 카탈로그, 시장 데이터 게이트웨이.
//!
//! 이 crate는 다음을 제공합니다:
//! - 해상도별 캔들 저장소 (PostgreSQL, 메모리)
//! - 종목별 세션 집계 저장소
//! - 작업 원장 저장소
//! - 자산군별 종목 카탈로그
//! - T-Invest REST 캔들 게이트웨이 (재시도 포함)

pub mod error;
pub mod provider;
pub mod storage;

pub use error::{DataError, Result};

pub use storage::{
    AggregateStore, CandleStore, Database, TaskLogStore, VolumeStats,
};
pub use storage::aggregates::PgAggregateStore;
pub use storage::candles::PgCandleStore;
pub use storage::memory::{
    MemoryAggregateStore, MemoryCandleStore, MemoryCatalog, MemoryTaskLogStore,
};
pub use storage::task_log::PgTaskLogStore;

pub use provider::{
    InstrumentCatalog, MarketDataGateway, PgInstrumentCatalog, RetryPolicy, TInvestRestClient,
};
