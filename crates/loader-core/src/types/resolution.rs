//! 캔들 해상도 정의.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 캔들 해상도. 해상도마다 저장소가 분리됩니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// 1분봉
    Minute,
    /// 일봉
    Day,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Minute => "minute",
            Resolution::Day => "day",
        }
    }

    /// T-Invest API 간격 문자열로 변환합니다.
    pub fn to_api_interval(&self) -> &'static str {
        match self {
            Resolution::Minute => "CANDLE_INTERVAL_1_MIN",
            Resolution::Day => "CANDLE_INTERVAL_DAY",
        }
    }

    /// 작업 ID 접두사.
    pub fn task_prefix(&self) -> &'static str {
        match self {
            Resolution::Minute => "MINUTE_CANDLES",
            Resolution::Day => "DAILY_CANDLES",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "minute" | "1m" | "min" => Ok(Resolution::Minute),
            "day" | "daily" | "1d" => Ok(Resolution::Day),
            _ => Err(format!("알 수 없는 해상도: {}", s)),
        }
    }
}
