//! T-Invest REST API 캔들 게이트웨이.
//!
//! `MarketDataService/GetCandles`를 호출합니다. 가격은 `Quotation`
//! (`units` 문자열 + `nano`)으로, 거래량은 int64 문자열로 전달됩니다.

use super::{MarketDataGateway, RetryPolicy};
use crate::error::{DataError, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use loader_core::config::GatewayConfig;
use loader_core::time::day_bounds;
use loader_core::{Quotation, RawCandle, Resolution};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};

const DEFAULT_BASE_URL: &str = "https://invest-public-api.tinkoff.ru/rest";
const SERVICE_PREFIX: &str = "tinkoff.public.invest.api.contract.v1";

// ============================================================================
// 요청/응답 타입
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GetCandlesRequest<'a> {
    figi: &'a str,
    instrument_id: &'a str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    interval: &'a str,
}

#[derive(Debug, Deserialize)]
struct GetCandlesResponse {
    #[serde(default)]
    candles: Vec<HistoricCandle>,
}

/// int64는 JSON 문자열로 오지만 숫자도 허용합니다.
#[derive(Deserialize)]
#[serde(untagged)]
enum Int64Repr {
    Text(String),
    Number(i64),
}

fn de_int64<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match Int64Repr::deserialize(deserializer)? {
        Int64Repr::Number(n) => Ok(n),
        Int64Repr::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Default, Deserialize)]
struct WireQuotation {
    #[serde(default, deserialize_with = "de_int64")]
    units: i64,
    #[serde(default)]
    nano: i32,
}

impl From<WireQuotation> for Quotation {
    fn from(q: WireQuotation) -> Self {
        Quotation::new(q.units, q.nano)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoricCandle {
    #[serde(default)]
    open: WireQuotation,
    #[serde(default)]
    high: WireQuotation,
    #[serde(default)]
    low: WireQuotation,
    #[serde(default)]
    close: WireQuotation,
    #[serde(default, deserialize_with = "de_int64")]
    volume: i64,
    time: DateTime<Utc>,
    #[serde(default)]
    is_complete: bool,
}

impl HistoricCandle {
    fn into_raw(self) -> Result<RawCandle> {
        let volume = u64::try_from(self.volume)
            .map_err(|_| DataError::ParseError(format!("negative volume {} at {}", self.volume, self.time)))?;
        Ok(RawCandle {
            time: self.time,
            open: Quotation::from(self.open).to_decimal(),
            high: Quotation::from(self.high).to_decimal(),
            low: Quotation::from(self.low).to_decimal(),
            close: Quotation::from(self.close).to_decimal(),
            volume,
            complete: self.is_complete,
        })
    }
}

// ============================================================================
// 클라이언트
// ============================================================================

/// T-Invest REST 클라이언트.
pub struct TInvestRestClient {
    client: Client,
    token: SecretString,
    base_url: String,
    request_delay: Duration,
    retry: RetryPolicy,
}

impl TInvestRestClient {
    /// 기본 설정으로 클라이언트를 생성합니다.
    pub fn new(token: impl Into<String>) -> Result<Self> {
        Self::build(
            token.into(),
            DEFAULT_BASE_URL.to_string(),
            Duration::from_secs(30),
        )
    }

    /// 게이트웨이 설정으로 클라이언트를 생성합니다.
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        if config.token.is_empty() {
            return Err(DataError::Rejected("T-Invest API 토큰이 비어 있습니다".to_string()));
        }
        Ok(Self::build(
            config.token.clone(),
            config.base_url.trim_end_matches('/').to_string(),
            config.request_timeout(),
        )?
        .with_request_delay(config.request_delay())
        .with_retry_policy(RetryPolicy::from(config)))
    }

    fn build(token: String, base_url: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DataError::FetchError(format!("HTTP 클라이언트 생성 실패: {}", e)))?;

        Ok(Self {
            client,
            token: SecretString::new(token.into()),
            base_url,
            request_delay: Duration::from_millis(200),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn endpoint(&self, service: &str, method: &str) -> String {
        format!("{}/{}.{}/{}", self.base_url, SERVICE_PREFIX, service, method)
    }

    /// 한 번의 POST 호출. HTTP 상태를 오류 종류로 분류합니다.
    async fn post_once<Req, Resp>(&self, url: &str, body: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized + Sync,
        Resp: DeserializeOwned,
    {
        let response = self
            .client
            .post(url)
            .bearer_auth(self.token.expose_secret())
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<Resp>().await?);
        }

        let text = response.text().await.unwrap_or_default();
        let detail = format!("HTTP {}: {}", status.as_u16(), text);
        Err(if status == StatusCode::TOO_MANY_REQUESTS {
            DataError::RateLimited(detail)
        } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
            DataError::FetchError(detail)
        } else {
            DataError::Rejected(detail)
        })
    }

    /// 요청 간 지연과 재시도를 적용한 POST 호출.
    async fn post<Req, Resp>(&self, url: &str, body: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized + Sync,
        Resp: DeserializeOwned,
    {
        let mut attempt = 1;
        loop {
            if !self.request_delay.is_zero() {
                tokio::time::sleep(self.request_delay).await;
            }

            match self.post_once(url, body).await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_retryable() && self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        url,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "T-Invest 요청 재시도 예정"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// 구간 `[from, to)`의 캔들을 조회합니다.
    #[instrument(skip(self))]
    pub async fn get_candles(
        &self,
        figi: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        resolution: Resolution,
    ) -> Result<Vec<RawCandle>> {
        let request = GetCandlesRequest {
            figi,
            instrument_id: figi,
            from,
            to,
            interval: resolution.to_api_interval(),
        };
        let url = self.endpoint("MarketDataService", "GetCandles");
        let response: GetCandlesResponse = self.post(&url, &request).await?;

        let candles = response
            .candles
            .into_iter()
            .map(HistoricCandle::into_raw)
            .collect::<Result<Vec<_>>>()?;

        debug!(figi, count = candles.len(), "T-Invest 캔들 수신");
        Ok(candles)
    }
}

#[async_trait]
impl MarketDataGateway for TInvestRestClient {
    async fn fetch_candles(
        &self,
        figi: &str,
        date: NaiveDate,
        resolution: Resolution,
    ) -> Result<Vec<RawCandle>> {
        let (from, to) = day_bounds(date);
        self.get_candles(figi, from, to, resolution).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_historic_candle() {
        let json = r#"{
            "candles": [{
                "open": {"units": "280", "nano": 100000000},
                "high": {"units": "281", "nano": 0},
                "low": {"units": "279", "nano": 500000000},
                "close": {"units": "280", "nano": 700000000},
                "volume": "3450",
                "time": "2024-03-05T04:00:00Z",
                "isComplete": true
            }]
        }"#;
        let response: GetCandlesResponse = serde_json::from_str(json).unwrap();
        let raw = response.candles.into_iter().next().unwrap().into_raw().unwrap();

        assert_eq!(raw.open, dec!(280.1));
        assert_eq!(raw.low, dec!(279.5));
        assert_eq!(raw.volume, 3_450);
        assert!(raw.complete);
    }

    #[test]
    fn test_numeric_int64_and_missing_fields() {
        let json = r#"{"candles": [{"volume": 7, "time": "2024-03-05T04:01:00Z"}]}"#;
        let response: GetCandlesResponse = serde_json::from_str(json).unwrap();
        let raw = response.candles.into_iter().next().unwrap().into_raw().unwrap();

        assert_eq!(raw.volume, 7);
        assert!(!raw.complete);
        assert_eq!(raw.open, dec!(0));
    }

    #[test]
    fn test_empty_response() {
        let response: GetCandlesResponse = serde_json::from_str("{}").unwrap();
        assert!(response.candles.is_empty());
    }

    #[test]
    fn test_endpoint_path() {
        let client = TInvestRestClient::new("t.token")
            .unwrap()
            .with_base_url("http://localhost:8080/rest/");
        assert_eq!(
            client.endpoint("MarketDataService", "GetCandles"),
            "http://localhost:8080/rest/tinkoff.public.invest.api.contract.v1.MarketDataService/GetCandles"
        );
    }

    #[test]
    fn test_from_config_requires_token() {
        assert!(TInvestRestClient::from_config(&GatewayConfig::default()).is_err());
    }
}
