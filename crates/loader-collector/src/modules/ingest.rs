//! 캔들 적재 파이프라인.
//!
//! 1. 종목 결정 (명시 목록 또는 자산군별 카탈로그)
//! 2. fetch pool: 종목별 조회 → 검증 → 중복 확인 (`buffer_unordered`)
//! 3. write pool: 신규 캔들을 배치로 나눠 트랜잭션 쓰기 (`Semaphore`)
//! 4. 결과 합산 및 작업 원장 종료
//!
//! 종목 단위 실패(조회 오류, 타임아웃)와 배치 쓰기 실패는 카운터로 흡수됩니다.
//! 카탈로그 조회 실패만 실행 전체를 실패시킵니다.

use super::TaskLedger;
use crate::error::CollectorError;
use crate::stats::LogSummary;
use crate::Result;
use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use loader_core::config::IngestConfig;
use loader_core::time::today_in_reporting_zone;
use loader_core::{
    instrument_span, AssetClass, Candle, IngestionOutcome, InstrumentReport,
    RawCandle, Resolution,
};
use loader_data::{CandleStore, InstrumentCatalog, MarketDataGateway};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

// ============================================================================
// 옵션 / 요청
// ============================================================================

/// 파이프라인 실행 옵션.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub fetch_concurrency: usize,
    pub write_concurrency: usize,
    pub write_batch_size: usize,
    pub fetch_timeout: Duration,
    pub saved_items_limit: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self::from(&IngestConfig::default())
    }
}

impl From<&IngestConfig> for IngestOptions {
    fn from(config: &IngestConfig) -> Self {
        Self {
            fetch_concurrency: config.fetch_concurrency.max(1),
            write_concurrency: config.write_concurrency.max(1),
            write_batch_size: config.write_batch_size.max(1),
            fetch_timeout: config.fetch_timeout(),
            saved_items_limit: config.saved_items_limit,
        }
    }
}

/// 적재 요청.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub resolution: Resolution,
    /// 비어 있으면 카탈로그에서 종목을 가져옵니다.
    pub instruments: Vec<String>,
    /// 비어 있으면 모든 자산군.
    pub asset_classes: Vec<AssetClass>,
    /// 없으면 기준 시간대의 오늘.
    pub date: Option<NaiveDate>,
}

impl IngestRequest {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            instruments: Vec::new(),
            asset_classes: Vec::new(),
            date: None,
        }
    }

    pub fn with_instruments<I, S>(mut self, instruments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.instruments = instruments.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_asset_classes(mut self, asset_classes: impl Into<Vec<AssetClass>>) -> Self {
        self.asset_classes = asset_classes.into();
        self
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    fn endpoint(&self) -> &'static str {
        match self.resolution {
            Resolution::Minute => "load-minute",
            Resolution::Day => "load-daily",
        }
    }
}

/// 실행 중인 적재 작업 핸들.
pub struct IngestionHandle {
    task_id: String,
    handle: JoinHandle<IngestionOutcome>,
}

impl IngestionHandle {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// 모든 조회와 쓰기가 끝날 때까지 기다립니다.
    pub async fn wait(self) -> Result<IngestionOutcome> {
        self.handle.await.map_err(CollectorError::from)
    }
}

// ============================================================================
// 중복 확인
// ============================================================================

/// 종목 하나에 대해 이미 저장된 시각을 한 번에 조회해 두는 중복 판정기.
///
/// 조회가 실패하면 모든 캔들을 신규 후보로 보고, 쓰기 단계의
/// `ON CONFLICT DO NOTHING` 결과로 기존 항목을 가려냅니다.
struct DedupOracle {
    known: Option<HashSet<DateTime<Utc>>>,
}

impl DedupOracle {
    async fn load(store: &dyn CandleStore, figi: &str, raws: &[RawCandle]) -> Self {
        let (Some(from), Some(to)) = (
            raws.iter().map(|r| r.time).min(),
            raws.iter().map(|r| r.time).max(),
        ) else {
            return Self { known: Some(HashSet::new()) };
        };

        match store.existing_times(figi, from, to).await {
            Ok(known) => Self { known: Some(known) },
            Err(e) => {
                warn!(figi, error = %e, "중복 확인 실패, 쓰기 단계에서 판정");
                Self { known: None }
            }
        }
    }

    fn contains(&self, time: &DateTime<Utc>) -> bool {
        self.known.as_ref().is_some_and(|known| known.contains(time))
    }
}

// ============================================================================
// 파이프라인
// ============================================================================

/// 캔들 적재기.
#[derive(Clone)]
pub struct CandleIngestor {
    gateway: Arc<dyn MarketDataGateway>,
    catalog: Arc<dyn InstrumentCatalog>,
    minute_store: Arc<dyn CandleStore>,
    day_store: Arc<dyn CandleStore>,
    ledger: TaskLedger,
    options: IngestOptions,
    /// write pool. 동시에 실행되는 모든 적재 작업이 공유합니다.
    write_permits: Arc<Semaphore>,
}

impl CandleIngestor {
    pub fn new(
        gateway: Arc<dyn MarketDataGateway>,
        catalog: Arc<dyn InstrumentCatalog>,
        minute_store: Arc<dyn CandleStore>,
        day_store: Arc<dyn CandleStore>,
        ledger: TaskLedger,
        options: IngestOptions,
    ) -> Self {
        let write_permits = Arc::new(Semaphore::new(options.write_concurrency.max(1)));
        Self {
            gateway,
            catalog,
            minute_store,
            day_store,
            ledger,
            options,
            write_permits,
        }
    }

    fn store_for(&self, resolution: Resolution) -> Arc<dyn CandleStore> {
        match resolution {
            Resolution::Minute => self.minute_store.clone(),
            Resolution::Day => self.day_store.clone(),
        }
    }

    /// 적재를 시작하고 즉시 핸들을 반환합니다.
    ///
    /// 작업 원장 항목은 반환 전에 기록됩니다.
    pub async fn ingest(&self, request: IngestRequest) -> IngestionHandle {
        let task_id = self
            .ledger
            .start(
                request.resolution.task_prefix(),
                request.endpoint(),
                &format!("{} 캔들 적재 시작", request.resolution),
            )
            .await;

        let this = self.clone();
        let id = task_id.clone();
        let handle = tokio::spawn(async move { this.run(id, request).await });

        IngestionHandle { task_id, handle }
    }

    /// 적재를 끝까지 실행합니다.
    pub async fn ingest_and_wait(&self, request: IngestRequest) -> Result<IngestionOutcome> {
        self.ingest(request).await.wait().await
    }

    async fn run(&self, task_id: String, request: IngestRequest) -> IngestionOutcome {
        let started = std::time::Instant::now();
        let resolution = request.resolution;
        let date = request.date.unwrap_or_else(today_in_reporting_zone);

        let instruments = match self.resolve_instruments(&request).await {
            Ok(instruments) => instruments,
            Err(e) => {
                let message = format!("종목 목록 조회 실패: {}", e);
                error!(task_id = %task_id, error = %e, "종목 목록 조회 실패");
                let outcome = IngestionOutcome::failed(&task_id, resolution, date, message);
                self.ledger.fail(&task_id, &outcome.message).await;
                return outcome;
            }
        };

        info!(
            task_id = %task_id,
            resolution = %resolution,
            date = %date,
            instruments = instruments.len(),
            "적재 시작"
        );
        self.ledger
            .progress(&task_id, &format!("종목 {}개 조회 중", instruments.len()))
            .await;

        let mut outcome = IngestionOutcome::new(&task_id, resolution, date);
        let store = self.store_for(resolution);

        // fetch pool
        let reports: Vec<InstrumentReport> = stream::iter(instruments)
            .map(|figi| {
                let store = store.clone();
                let span = instrument_span!("ingest_instrument", figi, task_id);
                async move { self.process_instrument(figi, date, resolution, store.as_ref()).await }
                    .instrument(span)
            })
            .buffer_unordered(self.options.fetch_concurrency)
            .collect()
            .await;

        let mut pending = Vec::new();
        for report in reports {
            outcome.absorb(&report);
            pending.extend(report.new_candles);
        }

        // write pool
        self.write_candles(&task_id, store, pending, &mut outcome).await;

        outcome.summarize();
        if !outcome.is_balanced() {
            warn!(
                task_id = %task_id,
                total = outcome.total_requested,
                missing = outcome.missing_from_api,
                classified = outcome.classified(),
                "결과 카운터 불일치"
            );
        }
        outcome.log_summary(request.endpoint());
        debug!(task_id = %task_id, elapsed_ms = started.elapsed().as_millis() as u64, "적재 종료");

        self.ledger.complete(&task_id, &outcome.message).await;
        outcome
    }

    /// 요청 종목을 결정합니다. 중복은 첫 등장 순서로 제거됩니다.
    async fn resolve_instruments(&self, request: &IngestRequest) -> loader_data::Result<Vec<String>> {
        let mut seen = HashSet::new();
        let mut resolved = Vec::new();

        if !request.instruments.is_empty() {
            for figi in &request.instruments {
                let figi = figi.trim();
                if !figi.is_empty() && seen.insert(figi.to_string()) {
                    resolved.push(figi.to_string());
                }
            }
            return Ok(resolved);
        }

        for asset_class in AssetClass::or_all(&request.asset_classes) {
            let figis = self.catalog.list_instruments(asset_class).await?;
            debug!(asset_class = %asset_class, count = figis.len(), "카탈로그 종목 조회");
            for figi in figis {
                if seen.insert(figi.clone()) {
                    resolved.push(figi);
                }
            }
        }
        Ok(resolved)
    }

    /// 종목 하나를 조회하고 검증/중복 확인한 보고서를 만듭니다.
    async fn process_instrument(
        &self,
        figi: String,
        date: NaiveDate,
        resolution: Resolution,
        store: &dyn CandleStore,
    ) -> InstrumentReport {
        let fetched = match tokio::time::timeout(
            self.options.fetch_timeout,
            self.gateway.fetch_candles(&figi, date, resolution),
        )
        .await
        {
            Ok(Ok(candles)) => candles,
            Ok(Err(e)) => {
                warn!(error = %e, "캔들 조회 실패");
                return InstrumentReport::failed(figi, e.to_string());
            }
            Err(_) => {
                warn!(timeout_ms = self.options.fetch_timeout.as_millis() as u64, "캔들 조회 타임아웃");
                return InstrumentReport::failed(figi, "게이트웨이 응답 타임아웃");
            }
        };

        let mut report = InstrumentReport::new(&figi);
        report.returned = fetched.len() as u64;
        if fetched.is_empty() {
            debug!("API 데이터 없음");
            return report;
        }

        let oracle = DedupOracle::load(store, &figi, &fetched).await;
        let mut seen = HashSet::with_capacity(fetched.len());

        for raw in &fetched {
            match Candle::from_raw(&figi, raw) {
                Err(reason) => {
                    report.invalid += 1;
                    debug!(time = %raw.time, reason = %reason, "캔들 제외");
                }
                Ok(candle) => {
                    // 같은 응답 안의 중복 시각도 기존 항목으로 봄
                    if oracle.contains(&raw.time) || !seen.insert(raw.time) {
                        report.existing += 1;
                    } else {
                        report.new_candles.push(candle);
                    }
                }
            }
        }

        debug!(
            returned = report.returned,
            new = report.new_candles.len(),
            existing = report.existing,
            invalid = report.invalid,
            "종목 처리 완료"
        );
        report
    }

    /// 신규 캔들을 배치로 나눠 write pool에서 저장합니다.
    async fn write_candles(
        &self,
        task_id: &str,
        store: Arc<dyn CandleStore>,
        candles: Vec<Candle>,
        outcome: &mut IngestionOutcome,
    ) {
        if candles.is_empty() {
            return;
        }

        let mut batches: Vec<(Vec<String>, JoinHandle<loader_data::Result<u64>>)> = Vec::new();
        let mut remaining = candles;

        while !remaining.is_empty() {
            let tail = remaining.split_off(self.options.write_batch_size.min(remaining.len()));
            let batch = std::mem::replace(&mut remaining, tail);
            let keys: Vec<String> = batch.iter().map(Candle::key).collect();

            let permit = match self.write_permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!(task_id, error = %e, "write pool 종료됨");
                    outcome.record_write_failure(batch.len() as u64);
                    continue;
                }
            };
            let store = store.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                store.insert_batch(&batch).await
            });
            batches.push((keys, handle));
        }

        for (keys, handle) in batches {
            let size = keys.len() as u64;
            match handle.await {
                Ok(Ok(inserted)) => {
                    let inserted = inserted.min(size);
                    outcome.record_write(inserted, size - inserted);
                    if inserted == size {
                        outcome.push_saved_items(keys, self.options.saved_items_limit);
                    }
                }
                Ok(Err(e)) => {
                    error!(task_id, batch = size, error = %e, "배치 저장 실패");
                    outcome.record_write_failure(size);
                }
                Err(e) => {
                    error!(task_id, batch = size, error = %e, "배치 저장 작업 중단");
                    outcome.record_write_failure(size);
                }
            }
        }
    }
}
