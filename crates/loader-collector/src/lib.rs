//! 캔들 적재 및 세션 거래량 집계.
//!
//! 이 crate는 다음을 제공합니다:
//! - 캔들 적재 파이프라인 (분봉/일봉, 병렬 조회 → 검증 → 중복 확인 → 배치 쓰기)
//! - 세션 거래량 집계 (오전/저녁/주말 증분 평균)
//! - 작업 원장 (시작/진행/종료 기록)
//! - 단발 실행과 데몬 모드를 지원하는 CLI 바이너리

pub mod config;
pub mod error;
pub mod modules;
pub mod services;
pub mod stats;

pub use config::CollectorConfig;
pub use error::{CollectorError, Result};
pub use services::{DailyRunReport, LoaderServices, StoreSet};
pub use stats::{AggregationSummary, LogSummary};
