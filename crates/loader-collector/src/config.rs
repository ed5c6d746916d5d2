//! 설정 모듈.
//!
//! `AppConfig`(파일 + `LOADER__*` 환경 변수)를 읽은 뒤 비어 있는 연결 정보를
//! 관례적인 환경 변수(`DATABASE_URL`, `T_INVEST_TOKEN`)로 채웁니다.

use crate::error::CollectorError;
use crate::modules::IngestOptions;
use crate::Result;
use loader_core::AppConfig;
use std::path::Path;

/// Collector 전체 설정
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub app: AppConfig,
}

impl CollectorConfig {
    /// 설정 파일(없으면 `config/default.toml`)과 환경 변수에서 로드합니다.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut app = match path {
            Some(path) => AppConfig::load(path)?,
            None => AppConfig::load_default()?,
        };

        if app.database.url.is_empty() {
            app.database.url = std::env::var("DATABASE_URL").map_err(|_| {
                CollectorError::Config("DATABASE_URL 환경변수가 설정되지 않았습니다".to_string())
            })?;
        }
        if app.gateway.token.is_empty() {
            app.gateway.token = env_var_or("T_INVEST_TOKEN", String::new());
        }

        Ok(Self { app })
    }

    pub fn database_url(&self) -> &str {
        &self.app.database.url
    }

    pub fn ingest_options(&self) -> IngestOptions {
        IngestOptions::from(&self.app.ingest)
    }
}

/// 환경변수 값 (없으면 기본값)
fn env_var_or(key: &str, default: String) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
}
