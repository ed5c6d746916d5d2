//! 적재 실행 결과.
//!
//! 종목 단위 작업은 [`InstrumentReport`]를 만들고, 실행 전체의
//! [`IngestionOutcome`]이 이를 합산합니다. 모든 카운터는 교환 가능한 합이므로
//! 종목 처리 순서와 무관합니다.

use crate::domain::Candle;
use crate::types::Resolution;
use chrono::NaiveDate;
use serde::Serialize;

/// 종목 하나의 조회/검증/중복 확인 결과.
#[derive(Debug, Clone, Default)]
pub struct InstrumentReport {
    pub figi: String,
    /// 게이트웨이가 반환한 원시 캔들 수
    pub returned: u64,
    /// 저장 대상 신규 캔들
    pub new_candles: Vec<Candle>,
    pub existing: u64,
    pub invalid: u64,
    /// 조회 실패/타임아웃 사유. 설정되면 missing으로도 집계됩니다.
    pub fetch_error: Option<String>,
}

impl InstrumentReport {
    pub fn new(figi: impl Into<String>) -> Self {
        Self {
            figi: figi.into(),
            ..Default::default()
        }
    }

    /// 조회가 실패한 종목의 보고서.
    pub fn failed(figi: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            figi: figi.into(),
            fetch_error: Some(error.into()),
            ..Default::default()
        }
    }

    /// 게이트웨이에서 아무것도 받지 못했는지 여부.
    pub fn is_missing(&self) -> bool {
        self.returned == 0
    }
}

/// 적재 실행 한 번의 결과 계약.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionOutcome {
    pub task_id: String,
    pub resolution: Resolution,
    pub date: NaiveDate,
    pub total_requested: u64,
    pub new_items_saved: u64,
    pub existing_items_skipped: u64,
    pub invalid_items_filtered: u64,
    pub missing_from_api: u64,
    /// 조회 실패/타임아웃 종목 수 (`missing_from_api`에 포함)
    pub fetch_errors: u64,
    /// 배치 쓰기 실패로 저장되지 못한 캔들 수
    pub failed_to_save: u64,
    pub success: bool,
    pub message: String,
    /// `figi:시각` 샘플 (상한 있음, 계약 아님)
    pub saved_items: Vec<String>,
}

impl IngestionOutcome {
    pub fn new(task_id: impl Into<String>, resolution: Resolution, date: NaiveDate) -> Self {
        Self {
            task_id: task_id.into(),
            resolution,
            date,
            total_requested: 0,
            new_items_saved: 0,
            existing_items_skipped: 0,
            invalid_items_filtered: 0,
            missing_from_api: 0,
            fetch_errors: 0,
            failed_to_save: 0,
            success: true,
            message: String::new(),
            saved_items: Vec::new(),
        }
    }

    /// 종목 작업 시작 전에 실패한 실행.
    pub fn failed(
        task_id: impl Into<String>,
        resolution: Resolution,
        date: NaiveDate,
        message: impl Into<String>,
    ) -> Self {
        let mut outcome = Self::new(task_id, resolution, date);
        outcome.success = false;
        outcome.message = message.into();
        outcome
    }

    /// 종목 보고서를 합산합니다. 신규 캔들은 쓰기 결과로 따로 집계합니다.
    ///
    /// 빈 응답 종목은 `missing_from_api`에만 1을 더하고 `total_requested`는 그대로 둡니다.
    pub fn absorb(&mut self, report: &InstrumentReport) {
        if report.is_missing() {
            self.missing_from_api += 1;
            if report.fetch_error.is_some() {
                self.fetch_errors += 1;
            }
            return;
        }
        self.total_requested += report.returned;
        self.existing_items_skipped += report.existing;
        self.invalid_items_filtered += report.invalid;
    }

    /// 성공한 배치 쓰기를 반영합니다.
    ///
    /// 중복 확인 이후 다른 작성자가 먼저 넣은 행(`conflicts`)은 기존 항목으로 봅니다.
    pub fn record_write(&mut self, inserted: u64, conflicts: u64) {
        self.new_items_saved += inserted;
        self.existing_items_skipped += conflicts;
    }

    pub fn record_write_failure(&mut self, candles: u64) {
        self.failed_to_save += candles;
    }

    pub fn push_saved_items(&mut self, keys: impl IntoIterator<Item = String>, limit: usize) {
        let room = limit.saturating_sub(self.saved_items.len());
        self.saved_items.extend(keys.into_iter().take(room));
    }

    /// 분류된 항목 수의 합.
    pub fn classified(&self) -> u64 {
        self.new_items_saved
            + self.existing_items_skipped
            + self.invalid_items_filtered
            + self.missing_from_api
            + self.failed_to_save
    }

    /// `total_requested + missing_from_api`가 모든 분류의 합과 같은지 확인합니다.
    ///
    /// 빈 응답 종목은 요청 수에 들어가지 않으므로 누락 수만큼 차이가 납니다.
    pub fn is_balanced(&self) -> bool {
        self.total_requested + self.missing_from_api == self.classified()
    }

    /// 사람이 읽는 요약 메시지를 채웁니다.
    pub fn summarize(&mut self) {
        self.message = format!(
            "{} 캔들 적재 완료 ({}): 요청 {}, 신규 {}, 기존 {}, 무효 {}, 누락 {} (조회 실패 {}), 저장 실패 {}",
            self.resolution,
            self.date,
            self.total_requested,
            self.new_items_saved,
            self.existing_items_skipped,
            self.invalid_items_filtered,
            self.missing_from_api,
            self.fetch_errors,
            self.failed_to_save,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome() -> IngestionOutcome {
        IngestionOutcome::new(
            "MINUTE_CANDLES_0a1b2c3d",
            Resolution::Minute,
            NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
        )
    }

    #[test]
    fn test_missing_instrument_counts_once() {
        let mut outcome = outcome();
        outcome.absorb(&InstrumentReport::new("Y"));
        outcome.absorb(&InstrumentReport::failed("Z", "timeout"));

        assert_eq!(outcome.total_requested, 0);
        assert_eq!(outcome.missing_from_api, 2);
        assert_eq!(outcome.fetch_errors, 1);
        assert!(outcome.is_balanced());
    }

    #[test]
    fn test_total_excludes_empty_instruments() {
        let mut outcome = outcome();
        outcome.absorb(&InstrumentReport {
            figi: "X".to_string(),
            returned: 2,
            ..Default::default()
        });
        outcome.record_write(2, 0);
        outcome.absorb(&InstrumentReport::new("Y"));

        assert_eq!(outcome.total_requested, 2);
        assert_eq!(outcome.new_items_saved, 2);
        assert_eq!(outcome.missing_from_api, 1);
        assert_eq!(outcome.classified(), 3);
        assert!(outcome.is_balanced());
    }

    #[test]
    fn test_write_failure_keeps_balance() {
        let mut outcome = outcome();
        let report = InstrumentReport {
            figi: "X".to_string(),
            returned: 10,
            existing: 3,
            invalid: 1,
            ..Default::default()
        };
        outcome.absorb(&report);
        outcome.record_write(4, 0);
        outcome.record_write_failure(2);

        assert_eq!(outcome.new_items_saved, 4);
        assert_eq!(outcome.failed_to_save, 2);
        assert!(outcome.is_balanced());
        assert!(outcome.success);
    }

    #[test]
    fn test_conflicts_become_existing() {
        let mut outcome = outcome();
        outcome.absorb(&InstrumentReport {
            figi: "X".to_string(),
            returned: 5,
            ..Default::default()
        });
        outcome.record_write(3, 2);

        assert_eq!(outcome.existing_items_skipped, 2);
        assert!(outcome.is_balanced());
    }

    #[test]
    fn test_saved_items_capped() {
        let mut outcome = outcome();
        outcome.push_saved_items((0..5).map(|i| format!("X:{i}")), 3);
        outcome.push_saved_items((5..9).map(|i| format!("X:{i}")), 3);
        assert_eq!(outcome.saved_items.len(), 3);
    }

    #[test]
    fn test_serializes_camel_case() {
        let json = serde_json::to_value(outcome()).unwrap();
        assert!(json.get("totalRequested").is_some());
        assert!(json.get("missingFromApi").is_some());
        assert_eq!(json["resolution"], "minute");
    }
}
