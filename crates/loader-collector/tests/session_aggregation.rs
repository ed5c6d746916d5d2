//! 세션 거래량 집계 통합 테스트.

use chrono::{NaiveDate, TimeZone, Utc};
use loader_collector::modules::{AggregationTarget, SessionAggregator, TaskLedger};
use loader_core::time::REPORTING_TZ;
use loader_core::{
    AssetClass, Candle, MergeOutcome, RawCandle, Resolution, SessionWindow, TaskStatus,
};
use loader_data::{
    AggregateStore, MemoryAggregateStore, MemoryCandleStore, MemoryCatalog, MemoryTaskLogStore,
    TaskLogStore,
};
use rust_decimal_macros::dec;
use std::sync::Arc;

struct Harness {
    candles: Arc<MemoryCandleStore>,
    aggregates: Arc<MemoryAggregateStore>,
    catalog: Arc<MemoryCatalog>,
    tasks: Arc<MemoryTaskLogStore>,
    aggregator: SessionAggregator,
}

fn harness_with(catalog: MemoryCatalog) -> Harness {
    let candles = Arc::new(MemoryCandleStore::new(Resolution::Minute));
    let aggregates = Arc::new(MemoryAggregateStore::new());
    let catalog = Arc::new(catalog);
    let tasks = Arc::new(MemoryTaskLogStore::new());
    let aggregator = SessionAggregator::new(
        candles.clone(),
        aggregates.clone(),
        catalog.clone(),
        TaskLedger::new(tasks.clone()),
        4,
    );
    Harness {
        candles,
        aggregates,
        catalog,
        tasks,
        aggregator,
    }
}

fn harness() -> Harness {
    harness_with(MemoryCatalog::new())
}

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// 기준 시간대 현지 시각의 분봉.
fn candle(figi: &str, date: NaiveDate, hour: u32, minute: u32, volume: u64) -> Candle {
    let local = REPORTING_TZ
        .from_local_datetime(&date.and_hms_opt(hour, minute, 0).unwrap())
        .single()
        .unwrap();
    let raw = RawCandle {
        time: local.with_timezone(&Utc),
        open: dec!(10),
        high: dec!(11),
        low: dec!(9),
        close: dec!(10.5),
        volume,
        complete: true,
    };
    Candle::from_raw(figi, &raw).unwrap()
}

/// 07:00부터 1분 간격으로 `volumes`를 넣습니다.
async fn seed_morning(h: &Harness, figi: &str, date: NaiveDate, volumes: &[u64]) {
    let candles = volumes
        .iter()
        .enumerate()
        .map(|(i, v)| candle(figi, date, 7, i as u32, *v));
    h.candles.seed(candles).await;
}

// 2024-03-05, 2024-03-12: 화요일 / 2024-03-09: 토요일
const TUE1: (i32, u32, u32) = (2024, 3, 5);
const TUE2: (i32, u32, u32) = (2024, 3, 12);
const SAT: (i32, u32, u32) = (2024, 3, 9);

fn d((y, m, dd): (i32, u32, u32)) -> NaiveDate {
    day(y, m, dd)
}

#[tokio::test]
async fn test_morning_average_over_two_tuesdays() {
    let h = harness();
    seed_morning(&h, "FIGI_X", d(TUE1), &[100, 100, 100, 100, 100]).await;
    seed_morning(&h, "FIGI_X", d(TUE2), &[150, 150]).await;

    let first = h.aggregator.aggregate("FIGI_X", d(TUE1)).await.unwrap();
    assert_eq!(first.outcome, MergeOutcome::Updated(vec![SessionWindow::Morning]));
    assert_eq!(first.volumes.morning, 500);
    assert_eq!(first.aggregate.avg_morning_volume, Some(dec!(500)));
    assert_eq!(first.aggregate.morning_days, 1);

    let second = h.aggregator.aggregate("FIGI_X", d(TUE2)).await.unwrap();
    assert_eq!(second.aggregate.avg_morning_volume, Some(dec!(400)));
    assert_eq!(second.aggregate.morning_days, 2);
    assert_eq!(second.aggregate.avg_evening_volume, None);
    assert_eq!(second.aggregate.last_aggregated_date(), Some(d(TUE2)));

    let stored = h.aggregates.get("FIGI_X").await.unwrap().unwrap();
    assert_eq!(stored.avg_morning_volume, Some(dec!(400)));
}

#[tokio::test]
async fn test_evening_and_outside_volume() {
    let h = harness();
    h.candles
        .seed([
            candle("FIGI_X", d(TUE1), 19, 0, 40),
            candle("FIGI_X", d(TUE1), 23, 59, 60),
            // 장중 거래량은 어느 윈도우에도 들어가지 않음
            candle("FIGI_X", d(TUE1), 12, 0, 1000),
        ])
        .await;

    let update = h.aggregator.aggregate("FIGI_X", d(TUE1)).await.unwrap();

    assert_eq!(update.volumes.evening, 100);
    assert_eq!(update.volumes.other, 1000);
    assert_eq!(update.aggregate.avg_evening_volume, Some(dec!(100)));
    assert_eq!(update.aggregate.avg_morning_volume, None);
    assert_eq!(update.aggregate.evening_days, 1);
}

#[tokio::test]
async fn test_weekend_day() {
    let h = harness();
    h.candles
        .seed([
            candle("FIGI_X", d(SAT), 8, 0, 70),
            candle("FIGI_X", d(SAT), 15, 30, 30),
        ])
        .await;

    let update = h.aggregator.aggregate("FIGI_X", d(SAT)).await.unwrap();

    assert_eq!(update.outcome, MergeOutcome::Updated(vec![SessionWindow::Weekend]));
    assert_eq!(update.aggregate.avg_weekend_volume, Some(dec!(100)));
    assert_eq!(update.aggregate.weekend_days, 1);
    assert_eq!(update.aggregate.morning_days, 0);
}

#[tokio::test]
async fn test_rerun_same_date_does_not_double_count() {
    let h = harness();
    seed_morning(&h, "FIGI_X", d(TUE1), &[500]).await;

    h.aggregator.aggregate("FIGI_X", d(TUE1)).await.unwrap();
    let rerun = h.aggregator.aggregate("FIGI_X", d(TUE1)).await.unwrap();

    assert_eq!(rerun.outcome, MergeOutcome::AlreadyAggregated);
    assert_eq!(rerun.aggregate.avg_morning_volume, Some(dec!(500)));
    assert_eq!(rerun.aggregate.morning_days, 1);
}

#[tokio::test]
async fn test_idle_day_keeps_averages() {
    let h = harness();
    seed_morning(&h, "FIGI_X", d(TUE1), &[500]).await;
    h.aggregator.aggregate("FIGI_X", d(TUE1)).await.unwrap();

    // 다음 날은 캔들 없음
    let idle = h.aggregator.aggregate("FIGI_X", day(2024, 3, 6)).await.unwrap();

    assert_eq!(idle.outcome, MergeOutcome::Idle);
    assert_eq!(idle.aggregate.avg_morning_volume, Some(dec!(500)));
    assert_eq!(idle.aggregate.morning_days, 1);
    // 거래량이 없던 날짜는 반영 목록에 남지 않음
    assert_eq!(idle.aggregate.last_aggregated_date(), Some(d(TUE1)));
    assert!(!idle.aggregate.aggregated_dates.contains(&day(2024, 3, 6)));
}

#[tokio::test]
async fn test_earlier_date_after_later_date_still_folds() {
    let h = harness();
    seed_morning(&h, "FIGI_X", d(TUE1), &[500]).await;
    seed_morning(&h, "FIGI_X", d(TUE2), &[300]).await;

    h.aggregator.aggregate("FIGI_X", d(TUE2)).await.unwrap();
    let earlier = h.aggregator.aggregate("FIGI_X", d(TUE1)).await.unwrap();

    assert_eq!(earlier.outcome, MergeOutcome::Updated(vec![SessionWindow::Morning]));
    assert_eq!(earlier.aggregate.morning_days, 2);
    assert_eq!(earlier.aggregate.avg_morning_volume, Some(dec!(400)));
    assert_eq!(earlier.aggregate.last_aggregated_date(), Some(d(TUE2)));
}

#[tokio::test]
async fn test_late_candles_fold_after_idle_run() {
    let h = harness();

    // 분봉 적재 전에 집계가 먼저 실행됨
    let idle = h.aggregator.aggregate("FIGI_X", d(TUE1)).await.unwrap();
    assert_eq!(idle.outcome, MergeOutcome::Idle);

    seed_morning(&h, "FIGI_X", d(TUE1), &[200, 300]).await;
    let late = h.aggregator.aggregate("FIGI_X", d(TUE1)).await.unwrap();

    assert_eq!(late.outcome, MergeOutcome::Updated(vec![SessionWindow::Morning]));
    assert_eq!(late.aggregate.morning_days, 1);
    assert_eq!(late.aggregate.avg_morning_volume, Some(dec!(500)));

    let again = h.aggregator.aggregate("FIGI_X", d(TUE1)).await.unwrap();
    assert_eq!(again.outcome, MergeOutcome::AlreadyAggregated);
    assert_eq!(again.aggregate.morning_days, 1);
}

#[tokio::test]
async fn test_concurrent_same_instrument_applies_once() {
    let h = harness();
    seed_morning(&h, "FIGI_X", d(TUE1), &[200, 300]).await;

    let a = h.aggregator.clone();
    let b = h.aggregator.clone();
    let (left, right) = tokio::join!(
        tokio::spawn(async move { a.aggregate("FIGI_X", d(TUE1)).await }),
        tokio::spawn(async move { b.aggregate("FIGI_X", d(TUE1)).await }),
    );
    let outcomes = [left.unwrap().unwrap().outcome, right.unwrap().unwrap().outcome];

    assert_eq!(
        outcomes.iter().filter(|o| **o == MergeOutcome::AlreadyAggregated).count(),
        1
    );
    let stored = h.aggregates.get("FIGI_X").await.unwrap().unwrap();
    assert_eq!(stored.morning_days, 1);
    assert_eq!(stored.avg_morning_volume, Some(dec!(500)));
}

#[tokio::test]
async fn test_write_failure_surfaces() {
    let h = harness();
    seed_morning(&h, "FIGI_X", d(TUE1), &[500]).await;
    h.aggregates.set_fail_writes(true);

    assert!(h.aggregator.aggregate("FIGI_X", d(TUE1)).await.is_err());
    assert!(h.aggregates.get("FIGI_X").await.unwrap().is_none());
}

// ============================================================================
// 기간 집계
// ============================================================================

#[tokio::test]
async fn test_range_over_catalog() {
    let catalog = MemoryCatalog::new()
        .with_instruments(AssetClass::Share, ["FIGI_A", "FIGI_B"])
        .with_instruments(AssetClass::Future, ["FIGI_A"]);
    let h = harness_with(catalog);
    seed_morning(&h, "FIGI_A", d(TUE1), &[100]).await;

    let summary = h
        .aggregator
        .aggregate_range(AggregationTarget::Catalog(Vec::new()), day(2024, 3, 4), day(2024, 3, 6))
        .await
        .unwrap();

    assert!(summary.success);
    assert_eq!(summary.processed_instruments, 2);
    assert_eq!(summary.dates_processed, 3);
    assert_eq!(summary.updated_days, 1);
    assert_eq!(summary.idle_days, 5);
    assert_eq!(summary.successful_instruments, 2);
    assert_eq!(summary.skipped_instruments, 1);
    assert_eq!(summary.error_instruments, 0);

    let entry = h.tasks.find(&summary.task_id).await.unwrap().unwrap();
    assert_eq!(entry.status, TaskStatus::Success);
    assert!(summary.task_id.starts_with("AGGREGATION_"));
}

#[tokio::test]
async fn test_read_failure_is_isolated() {
    let catalog = MemoryCatalog::new().with_instruments(AssetClass::Share, ["FIGI_A", "FIGI_B"]);
    let h = harness_with(catalog);
    seed_morning(&h, "FIGI_A", d(TUE1), &[100]).await;
    seed_morning(&h, "FIGI_B", d(TUE1), &[300]).await;
    h.candles.fail_reads_for("FIGI_A").await;

    let summary = h
        .aggregator
        .aggregate_range(AggregationTarget::Catalog(vec![AssetClass::Share]), d(TUE1), d(TUE1))
        .await
        .unwrap();

    assert!(summary.success);
    assert_eq!(summary.error_instruments, 1);
    assert_eq!(summary.failed_days, 1);
    assert_eq!(summary.successful_instruments, 1);
    assert!(h.aggregates.get("FIGI_A").await.unwrap().is_none());
    let b = h.aggregates.get("FIGI_B").await.unwrap().unwrap();
    assert_eq!(b.avg_morning_volume, Some(dec!(300)));
}

#[tokio::test]
async fn test_single_instrument_range_rerun() {
    let h = harness();
    seed_morning(&h, "FIGI_X", d(TUE1), &[500]).await;
    seed_morning(&h, "FIGI_X", d(TUE2), &[300]).await;

    let target = || AggregationTarget::Instrument("FIGI_X".to_string());
    let first = h.aggregator.aggregate_range(target(), d(TUE1), d(TUE2)).await.unwrap();
    let second = h.aggregator.aggregate_range(target(), d(TUE1), d(TUE2)).await.unwrap();

    assert_eq!(first.updated_days, 2);
    assert_eq!(second.updated_days, 0);
    assert_eq!(second.already_aggregated_days, 2);
    assert_eq!(second.idle_days, 6);

    let stored = h.aggregator.get("FIGI_X").await.unwrap().unwrap();
    assert_eq!(stored.avg_morning_volume, Some(dec!(400)));
    assert_eq!(stored.morning_days, 2);
}

#[tokio::test]
async fn test_invalid_range_fails() {
    let h = harness();

    let summary = h
        .aggregator
        .aggregate_range(AggregationTarget::Instrument("FIGI_X".to_string()), d(TUE2), d(TUE1))
        .await
        .unwrap();

    assert!(!summary.success);
    assert_eq!(summary.processed_instruments, 0);
    let entry = h.tasks.find(&summary.task_id).await.unwrap().unwrap();
    assert_eq!(entry.status, TaskStatus::Failed);
}

#[tokio::test]
async fn test_catalog_failure_fails_run() {
    let h = harness();
    h.catalog.set_unavailable(true);

    let summary = h
        .aggregator
        .aggregate_range(AggregationTarget::Catalog(Vec::new()), d(TUE1), d(TUE1))
        .await
        .unwrap();

    assert!(!summary.success);
    assert!(summary.error_message.is_some());
}

#[tokio::test]
async fn test_top_by_morning_average() {
    let h = harness();
    seed_morning(&h, "FIGI_A", d(TUE1), &[100]).await;
    seed_morning(&h, "FIGI_B", d(TUE1), &[900]).await;
    h.aggregator.aggregate("FIGI_A", d(TUE1)).await.unwrap();
    h.aggregator.aggregate("FIGI_B", d(TUE1)).await.unwrap();

    let top = h.aggregator.top(SessionWindow::Morning, 1).await.unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].figi, "FIGI_B");

    let stats = h.aggregator.window_stats(SessionWindow::Morning).await.unwrap();
    assert_eq!(stats.instruments, 2);
    assert_eq!(stats.max, Some(dec!(900)));
}
