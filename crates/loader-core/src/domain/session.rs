//! 세션 윈도우 분류.
//!
//! 모든 시각은 기준 시간대 기준입니다.
//! - 오전: 평일 06:50:00 ~ 09:59:59
//! - 저녁: 평일 19:00:00 ~ 23:59:59
//! - 주말: 토/일 하루 전체

use crate::domain::Candle;
use crate::time::is_weekend;
use chrono::{DateTime, NaiveDateTime, Timelike};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const fn seconds(h: u32, m: u32, s: u32) -> u32 {
    h * 3600 + m * 60 + s
}

const MORNING_START: u32 = seconds(6, 50, 0);
const MORNING_END: u32 = seconds(9, 59, 59);
const EVENING_START: u32 = seconds(19, 0, 0);
const EVENING_END: u32 = seconds(23, 59, 59);

/// 거래량 집계 구간.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionWindow {
    /// 평일 개장 전
    Morning,
    /// 평일 장 마감 후
    Evening,
    /// 토/일
    Weekend,
}

impl SessionWindow {
    /// 현지 시각이 속하는 윈도우. 어느 윈도우에도 속하지 않으면 `None`.
    pub fn classify(local: &NaiveDateTime) -> Option<SessionWindow> {
        if is_weekend(local.date()) {
            return Some(SessionWindow::Weekend);
        }
        let secs = local.time().num_seconds_from_midnight();
        if (MORNING_START..=MORNING_END).contains(&secs) {
            Some(SessionWindow::Morning)
        } else if (EVENING_START..=EVENING_END).contains(&secs) {
            Some(SessionWindow::Evening)
        } else {
            None
        }
    }

    pub fn classify_time(time: &DateTime<Tz>) -> Option<SessionWindow> {
        Self::classify(&time.naive_local())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionWindow::Morning => "morning",
            SessionWindow::Evening => "evening",
            SessionWindow::Weekend => "weekend",
        }
    }
}

impl fmt::Display for SessionWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionWindow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "morning" => Ok(SessionWindow::Morning),
            "evening" => Ok(SessionWindow::Evening),
            "weekend" => Ok(SessionWindow::Weekend),
            _ => Err(format!("알 수 없는 세션 윈도우: {}", s)),
        }
    }
}

/// 하루치 윈도우별 거래량 합계.
///
/// `morning + evening + weekend + other`는 입력 캔들 거래량의 총합과 같습니다.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionVolumes {
    pub morning: u64,
    pub evening: u64,
    pub weekend: u64,
    /// 어느 윈도우에도 속하지 않은 거래량
    pub other: u64,
}

impl SessionVolumes {
    pub fn add(&mut self, window: Option<SessionWindow>, volume: u64) {
        let bucket = match window {
            Some(SessionWindow::Morning) => &mut self.morning,
            Some(SessionWindow::Evening) => &mut self.evening,
            Some(SessionWindow::Weekend) => &mut self.weekend,
            None => &mut self.other,
        };
        *bucket = bucket.saturating_add(volume);
    }

    pub fn from_candles<'a>(candles: impl IntoIterator<Item = &'a Candle>) -> Self {
        let mut volumes = Self::default();
        for candle in candles {
            volumes.add(SessionWindow::classify_time(&candle.time), candle.volume);
        }
        volumes
    }

    pub fn get(&self, window: SessionWindow) -> u64 {
        match window {
            SessionWindow::Morning => self.morning,
            SessionWindow::Evening => self.evening,
            SessionWindow::Weekend => self.weekend,
        }
    }

    pub fn total(&self) -> u64 {
        self.morning
            .saturating_add(self.evening)
            .saturating_add(self.weekend)
            .saturating_add(self.other)
    }

    /// 어느 윈도우에도 거래량이 없는지 여부.
    pub fn is_idle(&self) -> bool {
        self.morning == 0 && self.evening == 0 && self.weekend == 0
    }
}
