//! 적재/집계 모듈.

pub mod aggregate;
pub mod ingest;
pub mod ledger;

pub use aggregate::{AggregateUpdate, AggregationTarget, SessionAggregator};
pub use ingest::{CandleIngestor, IngestOptions, IngestRequest, IngestionHandle};
pub use ledger::TaskLedger;
