//! 캔들 타입과 저장 경계에서의 검증/정규화.

use crate::time::to_reporting_time;
use crate::types::PRICE_SCALE;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 게이트웨이가 반환한 원시 캔들 (UTC).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCandle {
    pub time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: u64,
    /// 봉이 마감되었는지 여부
    pub complete: bool,
}

/// 저장소(`bigint`)가 담을 수 있는 최대 거래량.
pub const MAX_VOLUME: u64 = i64::MAX as u64;

/// 원시 캔들이 저장 대상에서 제외된 이유.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandleRejection {
    /// 아직 마감되지 않은 봉
    Incomplete,
    /// OHLC 관계가 성립하지 않거나 거래량이 범위를 벗어난 봉
    NonPhysical,
}

impl fmt::Display for CandleRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandleRejection::Incomplete => f.write_str("미완성 봉"),
            CandleRejection::NonPhysical => f.write_str("OHLC 불일치"),
        }
    }
}

impl RawCandle {
    /// 저장 가능한 봉인지 확인합니다.
    pub fn validate(&self) -> Result<(), CandleRejection> {
        if !self.complete {
            return Err(CandleRejection::Incomplete);
        }
        let body_high = self.open.max(self.close);
        let body_low = self.open.min(self.close);
        if self.high < body_high || self.low > body_low || self.high < self.low {
            return Err(CandleRejection::NonPhysical);
        }
        if self.volume > MAX_VOLUME {
            return Err(CandleRejection::NonPhysical);
        }
        Ok(())
    }
}

/// 저장되는 캔들. 시각은 기준 시간대입니다.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candle {
    pub figi: String,
    pub time: DateTime<Tz>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: u64,
    pub complete: bool,
}

fn price(value: Decimal) -> Decimal {
    let mut value = value;
    value.rescale(PRICE_SCALE);
    value
}

impl Candle {
    /// 원시 캔들을 검증하고 기준 시간대로 정규화합니다.
    pub fn from_raw(figi: &str, raw: &RawCandle) -> Result<Self, CandleRejection> {
        raw.validate()?;
        Ok(Self {
            figi: figi.to_string(),
            time: to_reporting_time(raw.time),
            open: price(raw.open),
            high: price(raw.high),
            low: price(raw.low),
            close: price(raw.close),
            volume: raw.volume,
            complete: raw.complete,
        })
    }

    /// 저장 결과 샘플에 쓰는 `figi:시각` 키.
    pub fn key(&self) -> String {
        format!("{}:{}", self.figi, self.time.to_rfc3339())
    }
}
