//! 실행 결과 통계와 요약 로그.

use loader_core::IngestionOutcome;
use serde::Serialize;
use std::time::Duration;

/// 실행 결과를 구조화된 로그 한 줄로 남깁니다.
pub trait LogSummary {
    fn log_summary(&self, operation: &str);
}

impl LogSummary for IngestionOutcome {
    fn log_summary(&self, operation: &str) {
        let balanced = self.is_balanced();
        if self.success {
            tracing::info!(
                operation = operation,
                task_id = %self.task_id,
                date = %self.date,
                total_requested = self.total_requested,
                new_items_saved = self.new_items_saved,
                existing_items_skipped = self.existing_items_skipped,
                invalid_items_filtered = self.invalid_items_filtered,
                missing_from_api = self.missing_from_api,
                fetch_errors = self.fetch_errors,
                failed_to_save = self.failed_to_save,
                balanced,
                "적재 완료"
            );
        } else {
            tracing::error!(
                operation = operation,
                task_id = %self.task_id,
                date = %self.date,
                message = %self.message,
                "적재 실패"
            );
        }
    }
}

/// 다종목/기간 집계 실행 요약.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationSummary {
    pub task_id: String,
    pub processed_instruments: usize,
    /// 오류 없이 끝난 종목
    pub successful_instruments: usize,
    /// 오류 없이 끝났지만 갱신된 날짜가 없는 종목
    pub skipped_instruments: usize,
    /// 한 날짜 이상 읽기/쓰기에 실패한 종목
    pub error_instruments: usize,
    pub dates_processed: usize,
    /// 평균이 갱신된 (종목, 날짜) 수
    pub updated_days: usize,
    /// 윈도우 거래량이 없던 (종목, 날짜) 수
    pub idle_days: usize,
    /// 이미 반영되어 건너뛴 (종목, 날짜) 수
    pub already_aggregated_days: usize,
    pub failed_days: usize,
    pub success: bool,
    pub error_message: Option<String>,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl AggregationSummary {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            success: true,
            ..Default::default()
        }
    }

    pub fn failed(task_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            success: false,
            error_message: Some(message.into()),
            ..Default::default()
        }
    }

    /// 성공률 계산 (%)
    pub fn success_rate(&self) -> f64 {
        if self.processed_instruments == 0 {
            0.0
        } else {
            (self.successful_instruments as f64 / self.processed_instruments as f64) * 100.0
        }
    }

    pub fn message(&self) -> String {
        match &self.error_message {
            Some(message) => message.clone(),
            None => format!(
                "세션 집계 완료: 종목 {} (성공 {}, 무변경 {}, 오류 {}), 날짜 {}, 갱신 {}",
                self.processed_instruments,
                self.successful_instruments,
                self.skipped_instruments,
                self.error_instruments,
                self.dates_processed,
                self.updated_days,
            ),
        }
    }
}

impl LogSummary for AggregationSummary {
    fn log_summary(&self, operation: &str) {
        tracing::info!(
            operation = operation,
            task_id = %self.task_id,
            processed = self.processed_instruments,
            successful = self.successful_instruments,
            skipped = self.skipped_instruments,
            errors = self.error_instruments,
            dates = self.dates_processed,
            updated_days = self.updated_days,
            failed_days = self.failed_days,
            success_rate = format!("{:.1}%", self.success_rate()),
            elapsed = format!("{:.1}s", self.elapsed.as_secs_f64()),
            "집계 완료"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_rate() {
        let mut summary = AggregationSummary::new("AGGREGATION_1");
        assert_eq!(summary.success_rate(), 0.0);

        summary.processed_instruments = 4;
        summary.successful_instruments = 3;
        assert!((summary.success_rate() - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_failed_summary_message() {
        let summary = AggregationSummary::failed("AGGREGATION_2", "카탈로그 조회 실패");
        assert!(!summary.success);
        assert_eq!(summary.message(), "카탈로그 조회 실패");
    }
}
