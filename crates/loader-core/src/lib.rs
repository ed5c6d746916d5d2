//! # Loader Core
//!
//! 캔들 적재기의 핵심 도메인 모델 및 타입을 제공합니다.
//!
//! 이 크레이트는 적재 파이프라인과 세션 집계 전반에서 사용되는 기본 타입을 제공합니다:
//! - 캔들 및 원시 캔들 (검증, 시간대 정규화)
//! - 세션 윈도우 (오전, 저녁, 주말) 분류
//! - 증분 평균 기반 세션 집계 레코드
//! - 적재 결과 계약과 작업 원장 항목
//! - 설정 관리
//! - 로깅 인프라

pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod time;
pub mod types;

pub use config::*;
pub use domain::*;
pub use error::*;
pub use logging::*;
pub use types::*;
