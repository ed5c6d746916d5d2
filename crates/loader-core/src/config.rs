//! 설정 관리.
//!
//! 기본값 → TOML 파일 → `LOADER__SECTION__KEY` 환경 변수 순으로 덮어씁니다.

use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// 애플리케이션 설정.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub gateway: GatewayConfig,
    pub ingest: IngestConfig,
    pub aggregation: AggregationConfig,
    pub daemon: DaemonConfig,
}

/// 데이터베이스 설정.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// 연결 URL (비어 있으면 `DATABASE_URL` 사용)
    pub url: String,
    pub max_connections: u32,
    /// 연결 타임아웃 (초)
    pub connection_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            connection_timeout_secs: 30,
        }
    }
}

/// 로깅 설정.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// 로그 형식 (pretty, json, compact)
    pub format: String,
    pub span_events: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            span_events: false,
        }
    }
}

/// 시장 데이터 게이트웨이(T-Invest REST) 설정.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub base_url: String,
    /// API 토큰 (비어 있으면 `T_INVEST_TOKEN` 사용)
    pub token: String,
    pub request_timeout_secs: u64,
    /// 요청 사이 고정 지연 (밀리초)
    pub request_delay_ms: u64,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://invest-public-api.tinkoff.ru/rest".to_string(),
            token: String::new(),
            request_timeout_secs: 30,
            request_delay_ms: 200,
            retry_attempts: 3,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 10_000,
        }
    }
}

// 토큰이 로그에 찍히지 않도록 Debug를 직접 구현
impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("request_delay_ms", &self.request_delay_ms)
            .field("retry_attempts", &self.retry_attempts)
            .field("retry_base_delay_ms", &self.retry_base_delay_ms)
            .field("retry_max_delay_ms", &self.retry_max_delay_ms)
            .finish()
    }
}

impl GatewayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

/// 적재 파이프라인 설정.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// 동시에 조회할 종목 수 (fetch pool 크기)
    pub fetch_concurrency: usize,
    /// 동시에 실행할 배치 쓰기 수 (write pool 크기)
    pub write_concurrency: usize,
    /// 한 번의 트랜잭션으로 쓰는 캔들 수
    pub write_batch_size: usize,
    /// 종목당 게이트웨이 호출 타임아웃 (초)
    pub fetch_timeout_secs: u64,
    /// 결과에 포함할 저장 항목 샘플 수 상한
    pub saved_items_limit: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            fetch_concurrency: 10,
            write_concurrency: 4,
            write_batch_size: 500,
            fetch_timeout_secs: 60,
            saved_items_limit: 1_000,
        }
    }
}

impl IngestConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// 세션 집계 설정.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// 동시에 집계할 종목 수
    pub concurrency: usize,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self { concurrency: 8 }
    }
}

/// 데몬 모드 설정.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// 워크플로우 실행 주기 (분 단위)
    pub interval_minutes: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 24 * 60,
        }
    }
}

impl DaemonConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }
}

impl AppConfig {
    /// 파일과 환경 변수에서 설정을 로드합니다.
    ///
    /// 파일이 없으면 기본값과 환경 변수만 사용합니다.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        let builder = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(
                config::Environment::with_prefix("LOADER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// 기본 경로(`config/default.toml`)에서 설정을 로드합니다.
    pub fn load_default() -> Result<Self, config::ConfigError> {
        Self::load("config/default.toml")
    }
}
