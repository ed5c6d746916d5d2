//! 세션 거래량 집계.
//!
//! 저장된 분봉을 기준 시간대의 하루 단위로 읽어 오전/저녁/주말 윈도우
//! 거래량을 구하고, 종목별 누적 평균에 증분 반영합니다.
//!
//! 같은 종목의 집계는 종목별 잠금으로 직렬화되므로 동시에 같은 날짜를 두 번
//! 요청해도 한 번만 반영됩니다.

use super::TaskLedger;
use crate::error::CollectorError;
use crate::stats::{AggregationSummary, LogSummary};
use crate::Result;
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use loader_core::time::day_bounds;
use loader_core::{
    instrument_span, AssetClass, MergeOutcome, SessionAggregate, SessionVolumes, SessionWindow,
};
use loader_data::{AggregateStore, CandleStore, InstrumentCatalog, VolumeStats};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn, Instrument};

/// 종목별 집계 잠금 맵 타입.
type AggregateLockMap = Arc<RwLock<HashMap<String, Arc<Mutex<()>>>>>;

/// 하루 집계 한 번의 결과.
#[derive(Debug, Clone)]
pub struct AggregateUpdate {
    pub aggregate: SessionAggregate,
    pub volumes: SessionVolumes,
    pub outcome: MergeOutcome,
}

/// 기간 집계 대상.
#[derive(Debug, Clone)]
pub enum AggregationTarget {
    /// 단일 종목
    Instrument(String),
    /// 자산군 카탈로그 (비어 있으면 전체)
    Catalog(Vec<AssetClass>),
}

/// 종목 하나의 기간 집계 집계치.
#[derive(Debug, Default)]
struct InstrumentTally {
    updated: usize,
    idle: usize,
    already: usize,
    failed: usize,
}

/// 세션 거래량 집계기.
#[derive(Clone)]
pub struct SessionAggregator {
    candles: Arc<dyn CandleStore>,
    aggregates: Arc<dyn AggregateStore>,
    catalog: Arc<dyn InstrumentCatalog>,
    ledger: TaskLedger,
    locks: AggregateLockMap,
    concurrency: usize,
}

impl SessionAggregator {
    /// `candles`는 분봉 저장소여야 합니다.
    pub fn new(
        candles: Arc<dyn CandleStore>,
        aggregates: Arc<dyn AggregateStore>,
        catalog: Arc<dyn InstrumentCatalog>,
        ledger: TaskLedger,
        concurrency: usize,
    ) -> Self {
        Self {
            candles,
            aggregates,
            catalog,
            ledger,
            locks: Arc::new(RwLock::new(HashMap::new())),
            concurrency: concurrency.max(1),
        }
    }

    /// 종목별 잠금 획득 또는 생성.
    async fn get_or_create_lock(&self, figi: &str) -> Arc<Mutex<()>> {
        let locks = self.locks.read().await;
        if let Some(lock) = locks.get(figi) {
            return lock.clone();
        }
        drop(locks);

        let mut locks = self.locks.write().await;
        locks
            .entry(figi.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// 종목 하나의 하루치 거래량을 집계해 저장합니다.
    ///
    /// 이미 반영된 날짜는 평균을 바꾸지 않고 `last_calculated`만 갱신합니다.
    #[instrument(skip(self))]
    pub async fn aggregate(&self, figi: &str, date: NaiveDate) -> Result<AggregateUpdate> {
        let lock = self.get_or_create_lock(figi).await;
        let _guard = lock.lock().await;

        let (from, to) = day_bounds(date);
        let candles = self.candles.find_range(figi, from, to).await?;
        let volumes = SessionVolumes::from_candles(&candles);

        let now = Utc::now();
        let mut aggregate = match self.aggregates.get(figi).await? {
            Some(existing) => existing,
            None => SessionAggregate::new(figi, now),
        };
        let outcome = aggregate.apply(date, &volumes, now);
        self.aggregates.upsert(&aggregate).await?;

        debug!(
            figi,
            date = %date,
            candles = candles.len(),
            morning = volumes.morning,
            evening = volumes.evening,
            weekend = volumes.weekend,
            outcome = ?outcome,
            "세션 집계"
        );

        Ok(AggregateUpdate {
            aggregate,
            volumes,
            outcome,
        })
    }

    /// 대상 종목들의 `[from, to]` 날짜를 오름차순으로 집계합니다.
    ///
    /// 날짜 단위 실패는 요약에 집계하고 다음 날짜로 진행합니다.
    pub async fn aggregate_range(
        &self,
        target: AggregationTarget,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<AggregationSummary> {
        let started = Instant::now();
        let task_id = self
            .ledger
            .start("AGGREGATION", "aggregate", &format!("세션 집계 시작 ({} ~ {})", from, to))
            .await;

        if from > to {
            let summary = AggregationSummary::failed(
                &task_id,
                format!("잘못된 날짜 범위: {} > {}", from, to),
            );
            self.ledger.fail(&task_id, &summary.message()).await;
            return Ok(summary);
        }

        let instruments = match self.resolve_target(&target).await {
            Ok(instruments) => instruments,
            Err(e) => {
                error!(task_id = %task_id, error = %e, "집계 대상 조회 실패");
                let summary =
                    AggregationSummary::failed(&task_id, format!("종목 목록 조회 실패: {}", e));
                self.ledger.fail(&task_id, &summary.message()).await;
                return Ok(summary);
            }
        };

        let dates: Vec<NaiveDate> = from.iter_days().take_while(|d| *d <= to).collect();
        info!(
            task_id = %task_id,
            instruments = instruments.len(),
            dates = dates.len(),
            "기간 집계 시작"
        );
        self.ledger
            .progress(
                &task_id,
                &format!("종목 {}개 x {}일 집계 중", instruments.len(), dates.len()),
            )
            .await;

        let tallies: Vec<InstrumentTally> = stream::iter(instruments)
            .map(|figi| {
                let span = instrument_span!("aggregate_instrument", figi, task_id);
                let dates = &dates;
                async move { self.aggregate_dates(&figi, dates).await }.instrument(span)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut summary = AggregationSummary::new(&task_id);
        summary.dates_processed = dates.len();
        for tally in tallies {
            summary.processed_instruments += 1;
            summary.updated_days += tally.updated;
            summary.idle_days += tally.idle;
            summary.already_aggregated_days += tally.already;
            summary.failed_days += tally.failed;
            if tally.failed > 0 {
                summary.error_instruments += 1;
            } else {
                summary.successful_instruments += 1;
                if tally.updated == 0 {
                    summary.skipped_instruments += 1;
                }
            }
        }
        summary.elapsed = started.elapsed();
        summary.log_summary("aggregate");

        self.ledger.complete(&task_id, &summary.message()).await;
        Ok(summary)
    }

    async fn aggregate_dates(&self, figi: &str, dates: &[NaiveDate]) -> InstrumentTally {
        let mut tally = InstrumentTally::default();
        for date in dates {
            match self.aggregate(figi, *date).await {
                Ok(update) => match update.outcome {
                    MergeOutcome::Updated(_) => tally.updated += 1,
                    MergeOutcome::Idle => tally.idle += 1,
                    MergeOutcome::AlreadyAggregated => tally.already += 1,
                },
                Err(e) => {
                    warn!(date = %date, error = %e, "날짜 집계 실패");
                    tally.failed += 1;
                }
            }
        }
        tally
    }

    async fn resolve_target(&self, target: &AggregationTarget) -> Result<Vec<String>> {
        match target {
            AggregationTarget::Instrument(figi) => {
                let figi = figi.trim();
                if figi.is_empty() {
                    return Err(CollectorError::Task("FIGI가 비어 있습니다".to_string()));
                }
                Ok(vec![figi.to_string()])
            }
            AggregationTarget::Catalog(asset_classes) => {
                let mut seen = HashSet::new();
                let mut resolved = Vec::new();
                for asset_class in AssetClass::or_all(asset_classes) {
                    for figi in self.catalog.list_instruments(asset_class).await? {
                        if seen.insert(figi.clone()) {
                            resolved.push(figi);
                        }
                    }
                }
                Ok(resolved)
            }
        }
    }

    // ========================================================================
    // 조회
    // ========================================================================

    pub async fn get(&self, figi: &str) -> Result<Option<SessionAggregate>> {
        Ok(self.aggregates.get(figi).await?)
    }

    /// 최근 갱신 순.
    pub async fn recent(&self, limit: i64) -> Result<Vec<SessionAggregate>> {
        Ok(self.aggregates.list_recent(limit).await?)
    }

    /// 윈도우 평균 거래량 상위 종목.
    pub async fn top(&self, window: SessionWindow, limit: i64) -> Result<Vec<SessionAggregate>> {
        Ok(self.aggregates.top_by_average(window, limit).await?)
    }

    /// `days`일 넘게 재계산되지 않은 종목.
    pub async fn stale(&self, days: i64) -> Result<Vec<SessionAggregate>> {
        let before = Utc::now() - ChronoDuration::days(days);
        Ok(self.aggregates.stale_since(before).await?)
    }

    pub async fn window_stats(&self, window: SessionWindow) -> Result<VolumeStats> {
        Ok(self.aggregates.window_stats(window).await?)
    }
}
