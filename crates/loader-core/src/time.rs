//! 기준 시간대 변환.
//!
//! 게이트웨이는 UTC 시각을 돌려주고 저장소는 모스크바 시간으로 보관합니다.
//! 시간대 변환은 이 모듈에서만 수행합니다.

use chrono::{DateTime, Datelike, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;

/// 저장과 세션 분류의 기준 시간대.
pub const REPORTING_TZ: Tz = chrono_tz::Europe::Moscow;

/// UTC 시각을 기준 시간대로 변환합니다.
pub fn to_reporting_time(instant: DateTime<Utc>) -> DateTime<Tz> {
    instant.with_timezone(&REPORTING_TZ)
}

/// 기준 시간대의 오늘 날짜.
pub fn today_in_reporting_zone() -> NaiveDate {
    to_reporting_time(Utc::now()).date_naive()
}

/// 기준 시간대의 어제 날짜.
pub fn previous_day_in_reporting_zone() -> NaiveDate {
    let today = today_in_reporting_zone();
    today.pred_opt().unwrap_or(today)
}

/// 기준 시간대 자정의 UTC 시각.
fn local_midnight(date: NaiveDate) -> DateTime<Utc> {
    let naive = date.and_time(NaiveTime::MIN);
    match REPORTING_TZ.from_local_datetime(&naive) {
        LocalResult::Single(t) | LocalResult::Ambiguous(t, _) => t.with_timezone(&Utc),
        // 존재하지 않는 현지 시각(서머타임 전환)은 UTC로 간주
        LocalResult::None => Utc.from_utc_datetime(&naive),
    }
}

/// 날짜의 하루 구간 `[00:00, 다음 날 00:00)`을 UTC로 반환합니다.
pub fn day_bounds(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let next = date.succ_opt().unwrap_or(NaiveDate::MAX);
    (local_midnight(date), local_midnight(next))
}

/// 토요일 또는 일요일 여부.
pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_reporting_time_is_utc_plus_three() {
        let utc = Utc.with_ymd_and_hms(2024, 3, 5, 4, 0, 0).unwrap();
        let local = to_reporting_time(utc);

        assert_eq!(local.hour(), 7);
        assert_eq!(local.date_naive(), NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
    }

    #[test]
    fn test_late_utc_evening_rolls_to_next_local_day() {
        let utc = Utc.with_ymd_and_hms(2024, 3, 5, 22, 30, 0).unwrap();
        let local = to_reporting_time(utc);

        assert_eq!(local.date_naive(), NaiveDate::from_ymd_opt(2024, 3, 6).unwrap());
        assert_eq!(local.hour(), 1);
    }

    #[test]
    fn test_day_bounds() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        let (from, to) = day_bounds(date);

        assert_eq!(from, Utc.with_ymd_and_hms(2024, 3, 4, 21, 0, 0).unwrap());
        assert_eq!(to, Utc.with_ymd_and_hms(2024, 3, 5, 21, 0, 0).unwrap());
    }

    #[test]
    fn test_is_weekend() {
        // 2024-03-09 토요일
        assert!(is_weekend(NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()));
        assert!(is_weekend(NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()));
        assert!(!is_weekend(NaiveDate::from_ymd_opt(2024, 3, 11).unwrap()));
    }
}
