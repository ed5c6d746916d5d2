//! 종목별 세션 거래량 누적 통계.
//!
//! 평균은 이전 평균과 이전 일수만으로 갱신합니다 (증분 평균).
//! 과거 캔들을 다시 읽어 재계산하지 않습니다.
//!
//! 평균에 반영된 날짜는 `aggregated_dates`에 남아 같은 날짜가 두 번 반영되지
//! 않습니다. 반영할 거래량이 없던 날짜는 기록하지 않으므로 캔들이 늦게
//! 적재되면 다시 집계할 수 있고, 날짜 순서와 무관하게 반영됩니다.

use crate::domain::{SessionVolumes, SessionWindow};
use crate::time::is_weekend;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeSet;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// 평균 거래량의 소수 자릿수.
pub const AVERAGE_SCALE: u32 = 2;

/// `old * n + sample`을 `n + 1`로 나눈 새 평균.
pub fn incremental_average(previous: Option<Decimal>, count: i64, sample: u64) -> Decimal {
    let sample = Decimal::from(sample);
    let average = match previous {
        Some(avg) if count > 0 => (avg * Decimal::from(count) + sample) / Decimal::from(count + 1),
        _ => sample,
    };
    average.round_dp_with_strategy(AVERAGE_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// 종목당 하나씩 존재하는 세션 집계 레코드.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAggregate {
    pub figi: String,
    pub avg_morning_volume: Option<Decimal>,
    pub avg_evening_volume: Option<Decimal>,
    pub avg_weekend_volume: Option<Decimal>,
    /// 오전 평균에 반영된 평일 수
    pub morning_days: i64,
    /// 저녁 평균에 반영된 평일 수
    pub evening_days: i64,
    /// 주말 평균에 반영된 주말 일수
    pub weekend_days: i64,
    /// 평균에 반영된 날짜 (거래량이 없던 날짜는 제외)
    pub aggregated_dates: BTreeSet<NaiveDate>,
    pub last_calculated: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 하루치 반영 결과.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// 하나 이상의 윈도우 평균이 갱신됨
    Updated(Vec<SessionWindow>),
    /// 윈도우 거래량이 없어 `last_calculated`만 갱신됨
    Idle,
    /// 이미 평균에 반영된 날짜라 `last_calculated`만 갱신됨
    AlreadyAggregated,
}

impl SessionAggregate {
    /// 최초 집계 시 생성되는 빈 레코드.
    pub fn new(figi: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            figi: figi.into(),
            avg_morning_volume: None,
            avg_evening_volume: None,
            avg_weekend_volume: None,
            morning_days: 0,
            evening_days: 0,
            weekend_days: 0,
            aggregated_dates: BTreeSet::new(),
            last_calculated: now,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn average(&self, window: SessionWindow) -> Option<Decimal> {
        match window {
            SessionWindow::Morning => self.avg_morning_volume,
            SessionWindow::Evening => self.avg_evening_volume,
            SessionWindow::Weekend => self.avg_weekend_volume,
        }
    }

    pub fn days(&self, window: SessionWindow) -> i64 {
        match window {
            SessionWindow::Morning => self.morning_days,
            SessionWindow::Evening => self.evening_days,
            SessionWindow::Weekend => self.weekend_days,
        }
    }

    fn fold(&mut self, window: SessionWindow, sample: u64) {
        let (average, days) = match window {
            SessionWindow::Morning => (&mut self.avg_morning_volume, &mut self.morning_days),
            SessionWindow::Evening => (&mut self.avg_evening_volume, &mut self.evening_days),
            SessionWindow::Weekend => (&mut self.avg_weekend_volume, &mut self.weekend_days),
        };
        *average = Some(incremental_average(*average, *days, sample));
        *days += 1;
    }

    /// 가장 최근에 반영된 날짜.
    pub fn last_aggregated_date(&self) -> Option<NaiveDate> {
        self.aggregated_dates.last().copied()
    }

    /// 하루치 윈도우 거래량을 반영합니다.
    pub fn apply(&mut self, date: NaiveDate, volumes: &SessionVolumes, now: DateTime<Utc>) -> MergeOutcome {
        self.last_calculated = now;
        self.updated_at = now;

        if self.aggregated_dates.contains(&date) {
            return MergeOutcome::AlreadyAggregated;
        }

        let candidates: &[SessionWindow] = if is_weekend(date) {
            &[SessionWindow::Weekend]
        } else {
            &[SessionWindow::Morning, SessionWindow::Evening]
        };

        let mut updated = Vec::new();
        for window in candidates {
            let sample = volumes.get(*window);
            if sample > 0 {
                self.fold(*window, sample);
                updated.push(*window);
            }
        }

        if updated.is_empty() {
            MergeOutcome::Idle
        } else {
            self.aggregated_dates.insert(date);
            MergeOutcome::Updated(updated)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 20, 0, 0, 0).unwrap()
    }

    fn morning(volume: u64) -> SessionVolumes {
        SessionVolumes {
            morning: volume,
            ..Default::default()
        }
    }

    #[test]
    fn test_incremental_average() {
        assert_eq!(incremental_average(None, 0, 500), dec!(500));
        assert_eq!(incremental_average(Some(dec!(500)), 1, 300), dec!(400));
        assert_eq!(incremental_average(Some(dec!(500)), 1, 0), dec!(250));
        // 1000 / 3 = 333.333.. → 333.33
        assert_eq!(incremental_average(Some(dec!(400)), 2, 200), dec!(333.33));
    }

    #[test]
    fn test_rounding_half_up() {
        // (0.01 * 1 + 0) / 2 = 0.005 → 0.01
        assert_eq!(incremental_average(Some(dec!(0.01)), 1, 0), dec!(0.01));
    }

    #[test]
    fn test_two_tuesdays() {
        let mut agg = SessionAggregate::new("BBG000B9XRY4", now());
        let tue1 = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        let tue2 = NaiveDate::from_ymd_opt(2024, 3, 12).unwrap();

        assert_eq!(
            agg.apply(tue1, &morning(500), now()),
            MergeOutcome::Updated(vec![SessionWindow::Morning])
        );
        assert_eq!(agg.avg_morning_volume, Some(dec!(500)));
        assert_eq!(agg.morning_days, 1);

        agg.apply(tue2, &morning(300), now());
        assert_eq!(agg.avg_morning_volume, Some(dec!(400)));
        assert_eq!(agg.morning_days, 2);
        assert_eq!(agg.avg_evening_volume, None);
        assert_eq!(agg.evening_days, 0);
    }

    #[test]
    fn test_weekend_ignores_morning_bucket() {
        let mut agg = SessionAggregate::new("X", now());
        let saturday = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        let volumes = SessionVolumes {
            weekend: 1_200,
            ..Default::default()
        };

        agg.apply(saturday, &volumes, now());
        assert_eq!(agg.avg_weekend_volume, Some(dec!(1200)));
        assert_eq!(agg.weekend_days, 1);
        assert_eq!(agg.morning_days, 0);
    }

    #[test]
    fn test_idle_day_only_touches_last_calculated() {
        let created = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let mut agg = SessionAggregate::new("X", created);
        let outcome = agg.apply(
            NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
            &SessionVolumes {
                other: 900,
                ..Default::default()
            },
            now(),
        );

        assert_eq!(outcome, MergeOutcome::Idle);
        assert_eq!(agg.last_calculated, now());
        assert_eq!(agg.created_at, created);
        assert_eq!(agg.morning_days + agg.evening_days + agg.weekend_days, 0);
    }

    #[test]
    fn test_rerun_same_date_does_not_double_count() {
        let mut agg = SessionAggregate::new("X", now());
        let date = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();

        agg.apply(date, &morning(500), now());
        assert_eq!(agg.apply(date, &morning(500), now()), MergeOutcome::AlreadyAggregated);
        assert_eq!(agg.morning_days, 1);
        assert_eq!(agg.avg_morning_volume, Some(dec!(500)));
    }

    #[test]
    fn test_earlier_date_folds_after_later_one() {
        let mut agg = SessionAggregate::new("X", now());
        let tue1 = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        let tue2 = NaiveDate::from_ymd_opt(2024, 3, 12).unwrap();

        agg.apply(tue2, &morning(300), now());
        assert_eq!(
            agg.apply(tue1, &morning(500), now()),
            MergeOutcome::Updated(vec![SessionWindow::Morning])
        );
        assert_eq!(agg.avg_morning_volume, Some(dec!(400)));
        assert_eq!(agg.morning_days, 2);
        assert_eq!(agg.last_aggregated_date(), Some(tue2));
    }

    #[test]
    fn test_idle_date_folds_when_data_arrives_later() {
        let mut agg = SessionAggregate::new("X", now());
        let date = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();

        assert_eq!(agg.apply(date, &SessionVolumes::default(), now()), MergeOutcome::Idle);
        assert!(agg.aggregated_dates.is_empty());

        assert_eq!(
            agg.apply(date, &morning(500), now()),
            MergeOutcome::Updated(vec![SessionWindow::Morning])
        );
        assert_eq!(agg.avg_morning_volume, Some(dec!(500)));
        assert_eq!(agg.morning_days, 1);
    }

    /// 반영된 날짜들의 윈도우 거래량 단순 평균.
    fn mean_of(samples: &[u64]) -> Option<Decimal> {
        if samples.is_empty() {
            return None;
        }
        let sum: u64 = samples.iter().sum();
        Some(Decimal::from(sum) / Decimal::from(samples.len() as u64))
    }

    proptest! {
        #[test]
        fn averages_track_distinct_contributing_dates(
            days in prop::collection::vec((0u64..21, 0u64..10_000, 0u64..10_000, 0u64..10_000), 1..40),
        ) {
            let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
            let mut agg = SessionAggregate::new("X", now());
            // 날짜별로 처음 반영된 거래량
            let mut contributed: std::collections::BTreeMap<NaiveDate, SessionVolumes> =
                std::collections::BTreeMap::new();

            // 순서가 뒤섞이고 같은 날짜가 반복되는 입력
            for (offset, m, e, w) in days {
                let date = start + chrono::Days::new(offset);
                let volumes = SessionVolumes { morning: m, evening: e, weekend: w, other: 0 };
                let before = (agg.morning_days, agg.evening_days, agg.weekend_days);
                let outcome = agg.apply(date, &volumes, now());

                if let MergeOutcome::Updated(_) = outcome {
                    prop_assert!(!contributed.contains_key(&date));
                    contributed.insert(date, volumes);
                }
                prop_assert!(agg.morning_days >= before.0);
                prop_assert!(agg.evening_days >= before.1);
                prop_assert!(agg.weekend_days >= before.2);
            }

            for window in [SessionWindow::Morning, SessionWindow::Evening, SessionWindow::Weekend] {
                let samples: Vec<u64> = contributed
                    .iter()
                    .filter(|(date, _)| is_weekend(**date) == (window == SessionWindow::Weekend))
                    .map(|(_, v)| v.get(window))
                    .filter(|v| *v > 0)
                    .collect();

                prop_assert_eq!(agg.days(window), samples.len() as i64);
                prop_assert_eq!(agg.average(window).is_some(), !samples.is_empty());
                if let (Some(avg), Some(mean)) = (agg.average(window), mean_of(&samples)) {
                    // 매 단계 소수 둘째 자리 반올림 오차 누적 허용
                    let tolerance = Decimal::new(1, 2) * Decimal::from(samples.len() as u64);
                    prop_assert!((avg - mean).abs() <= tolerance, "avg {} mean {}", avg, mean);
                }
            }
            prop_assert_eq!(agg.aggregated_dates.len(), contributed.len());
        }
    }
}
