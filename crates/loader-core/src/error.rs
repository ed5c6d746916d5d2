//! 적재 시스템의 에러 타입.
//!
//! 이 모듈은 도메인 계층 전반에서 사용되는 에러 타입을 정의합니다.

use thiserror::Error;

/// 핵심 적재 에러.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// 설정 에러
    #[error("설정 에러: {0}")]
    Config(String),

    /// 데이터 검증 에러
    #[error("검증 에러: {0}")]
    Validation(String),

    /// 시장 데이터 게이트웨이 에러
    #[error("게이트웨이 에러: {0}")]
    Gateway(String),

    /// 요청 한도 초과
    #[error("요청 한도 초과: {0}")]
    RateLimit(String),

    /// 저장소 에러
    #[error("저장소 에러: {0}")]
    Storage(String),

    /// 타임아웃
    #[error("타임아웃: {0}")]
    Timeout(String),

    /// 직렬화 에러
    #[error("직렬화 에러: {0}")]
    Serialization(String),

    /// 찾을 수 없음
    #[error("찾을 수 없음: {0}")]
    NotFound(String),

    /// 허용되지 않는 상태 전이
    #[error("잘못된 상태: {0}")]
    InvalidState(String),

    /// 내부 에러
    #[error("내부 에러: {0}")]
    Internal(String),
}

/// 적재 작업을 위한 Result 타입.
pub type LoaderResult<T> = Result<T, LoaderError>;

impl LoaderError {
    /// 재시도 가능한 에러인지 확인합니다.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LoaderError::Gateway(_) | LoaderError::RateLimit(_) | LoaderError::Timeout(_)
        )
    }
}

impl From<serde_json::Error> for LoaderError {
    fn from(err: serde_json::Error) -> Self {
        LoaderError::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for LoaderError {
    fn from(err: config::ConfigError) -> Self {
        LoaderError::Config(err.to_string())
    }
}
