//! 메모리 저장소 구현.
//!
//! DB 없이 파이프라인과 집계를 실행할 때 사용합니다. 장애 주입 스위치로
//! 쓰기/조회 실패 경로를 재현할 수 있습니다.

use super::{AggregateStore, CandleStore, TaskLogStore, VolumeStats};
use crate::error::{DataError, Result};
use crate::provider::InstrumentCatalog;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use loader_core::{
    AssetClass, Candle, Resolution, SessionAggregate, SessionWindow, TaskLogEntry, TaskStatus,
    AVERAGE_SCALE,
};
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;

// ============================================================================
// 캔들
// ============================================================================

/// 메모리 캔들 저장소.
pub struct MemoryCandleStore {
    resolution: Resolution,
    candles: RwLock<BTreeMap<(String, DateTime<Utc>), Candle>>,
    fail_inserts: AtomicBool,
    fail_lookups: AtomicBool,
    fail_reads: RwLock<HashSet<String>>,
    insert_batches: AtomicU64,
}

impl MemoryCandleStore {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            candles: RwLock::new(BTreeMap::new()),
            fail_inserts: AtomicBool::new(false),
            fail_lookups: AtomicBool::new(false),
            fail_reads: RwLock::new(HashSet::new()),
            insert_batches: AtomicU64::new(0),
        }
    }

    /// 이후 모든 `insert_batch` 호출을 실패시킵니다.
    pub fn set_fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    /// 이후 모든 중복 확인(`existing_times`)을 실패시킵니다.
    pub fn set_fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    /// 해당 종목의 `find_range`를 실패시킵니다.
    pub async fn fail_reads_for(&self, figi: &str) {
        self.fail_reads.write().await.insert(figi.to_string());
    }

    /// 쓰기 호출 횟수 (실패 포함).
    pub fn insert_batches(&self) -> u64 {
        self.insert_batches.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.candles.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.candles.read().await.is_empty()
    }

    /// 중복 확인을 거치지 않고 캔들을 직접 넣습니다.
    pub async fn seed(&self, candles: impl IntoIterator<Item = Candle>) {
        let mut store = self.candles.write().await;
        for candle in candles {
            store.insert((candle.figi.clone(), candle.time.with_timezone(&Utc)), candle);
        }
    }

    fn check_lookup(&self) -> Result<()> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(DataError::QueryError("lookup failure injected".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CandleStore for MemoryCandleStore {
    fn resolution(&self) -> Resolution {
        self.resolution
    }

    async fn existing_times(
        &self,
        figi: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<HashSet<DateTime<Utc>>> {
        self.check_lookup()?;
        if from > to {
            return Ok(HashSet::new());
        }
        let store = self.candles.read().await;
        Ok(store
            .range((figi.to_string(), from)..=(figi.to_string(), to))
            .map(|((_, time), _)| *time)
            .collect())
    }

    async fn insert_batch(&self, candles: &[Candle]) -> Result<u64> {
        self.insert_batches.fetch_add(1, Ordering::SeqCst);
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(DataError::InsertError("write failure injected".to_string()));
        }

        let mut store = self.candles.write().await;
        let mut inserted = 0;
        for candle in candles {
            let key = (candle.figi.clone(), candle.time.with_timezone(&Utc));
            if let std::collections::btree_map::Entry::Vacant(slot) = store.entry(key) {
                slot.insert(candle.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn find_range(
        &self,
        figi: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        if self.fail_reads.read().await.contains(figi) {
            return Err(DataError::QueryError(format!("read failure injected for {}", figi)));
        }
        if from >= to {
            return Ok(Vec::new());
        }
        let store = self.candles.read().await;
        Ok(store
            .range((figi.to_string(), from)..(figi.to_string(), to))
            .map(|(_, candle)| candle.clone())
            .collect())
    }

    async fn count(&self, figi: &str) -> Result<i64> {
        let store = self.candles.read().await;
        Ok(store.keys().filter(|(f, _)| f == figi).count() as i64)
    }
}

// ============================================================================
// 세션 집계
// ============================================================================

/// 메모리 세션 집계 저장소.
#[derive(Default)]
pub struct MemoryAggregateStore {
    records: RwLock<HashMap<String, SessionAggregate>>,
    fail_writes: AtomicBool,
}

impl MemoryAggregateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    async fn sorted_by<K: Ord>(
        &self,
        filter: impl Fn(&SessionAggregate) -> bool,
        key: impl Fn(&SessionAggregate) -> K,
    ) -> Vec<SessionAggregate> {
        let records = self.records.read().await;
        let mut selected: Vec<SessionAggregate> =
            records.values().filter(|r| filter(r)).cloned().collect();
        selected.sort_by_key(|r| key(r));
        selected
    }
}

#[async_trait]
impl AggregateStore for MemoryAggregateStore {
    async fn get(&self, figi: &str) -> Result<Option<SessionAggregate>> {
        Ok(self.records.read().await.get(figi).cloned())
    }

    async fn upsert(&self, aggregate: &SessionAggregate) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DataError::InsertError("write failure injected".to_string()));
        }
        let mut records = self.records.write().await;
        let mut stored = aggregate.clone();
        if let Some(existing) = records.get(&aggregate.figi) {
            stored.created_at = existing.created_at;
        }
        records.insert(aggregate.figi.clone(), stored);
        Ok(())
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<SessionAggregate>> {
        let mut list = self
            .sorted_by(|_| true, |r| std::cmp::Reverse(r.updated_at))
            .await;
        list.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(list)
    }

    async fn top_by_average(&self, window: SessionWindow, limit: i64) -> Result<Vec<SessionAggregate>> {
        let mut list = self
            .sorted_by(
                |r| r.average(window).is_some(),
                |r| std::cmp::Reverse(r.average(window)),
            )
            .await;
        list.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(list)
    }

    async fn stale_since(&self, before: DateTime<Utc>) -> Result<Vec<SessionAggregate>> {
        Ok(self
            .sorted_by(|r| r.last_calculated < before, |r| r.last_calculated)
            .await)
    }

    async fn window_stats(&self, window: SessionWindow) -> Result<VolumeStats> {
        let records = self.records.read().await;
        let averages: Vec<Decimal> = records
            .values()
            .filter_map(|r| r.average(window))
            .filter(|avg| *avg > Decimal::ZERO)
            .collect();

        if averages.is_empty() {
            return Ok(VolumeStats::default());
        }
        let sum: Decimal = averages.iter().sum();
        let count = averages.len() as i64;
        Ok(VolumeStats {
            instruments: count,
            avg: Some(
                (sum / Decimal::from(count))
                    .round_dp_with_strategy(AVERAGE_SCALE, RoundingStrategy::MidpointAwayFromZero),
            ),
            max: averages.iter().max().copied(),
            min: averages.iter().min().copied(),
        })
    }
}

// ============================================================================
// 작업 원장
// ============================================================================

/// 메모리 작업 원장.
#[derive(Default)]
pub struct MemoryTaskLogStore {
    entries: RwLock<HashMap<String, TaskLogEntry>>,
    fail_writes: AtomicBool,
}

impl MemoryTaskLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_write(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DataError::QueryError("ledger failure injected".to_string()));
        }
        Ok(())
    }

    async fn select(&self, filter: impl Fn(&TaskLogEntry) -> bool) -> Vec<TaskLogEntry> {
        let entries = self.entries.read().await;
        let mut selected: Vec<TaskLogEntry> = entries.values().filter(|e| filter(e)).cloned().collect();
        selected.sort_by_key(|e| std::cmp::Reverse(e.start_time));
        selected
    }
}

#[async_trait]
impl TaskLogStore for MemoryTaskLogStore {
    async fn insert(&self, entry: &TaskLogEntry) -> Result<()> {
        self.check_write()?;
        let mut entries = self.entries.write().await;
        if entries.contains_key(&entry.task_id) {
            return Err(DataError::DuplicateError(entry.task_id.clone()));
        }
        entries.insert(entry.task_id.clone(), entry.clone());
        Ok(())
    }

    async fn mark_processing(&self, task_id: &str, message: &str) -> Result<()> {
        self.check_write()?;
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(task_id)
            .ok_or_else(|| DataError::NotFound(task_id.to_string()))?;
        entry
            .mark_processing(message)
            .map_err(|e| DataError::InvalidState(e.to_string()))
    }

    async fn close(
        &self,
        task_id: &str,
        status: TaskStatus,
        message: &str,
        end_time: DateTime<Utc>,
    ) -> Result<TaskLogEntry> {
        self.check_write()?;
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(task_id)
            .ok_or_else(|| DataError::NotFound(task_id.to_string()))?;
        entry
            .close(status, message, end_time)
            .map_err(|e| DataError::InvalidState(e.to_string()))?;
        Ok(entry.clone())
    }

    async fn find(&self, task_id: &str) -> Result<Option<TaskLogEntry>> {
        Ok(self.entries.read().await.get(task_id).cloned())
    }

    async fn by_status(&self, status: TaskStatus) -> Result<Vec<TaskLogEntry>> {
        Ok(self.select(|e| e.status == status).await)
    }

    async fn active(&self) -> Result<Vec<TaskLogEntry>> {
        Ok(self.select(TaskLogEntry::is_active).await)
    }

    async fn in_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<TaskLogEntry>> {
        Ok(self
            .select(|e| e.start_time >= from && e.start_time < to)
            .await)
    }
}

// ============================================================================
// 카탈로그
// ============================================================================

/// 메모리 종목 카탈로그.
#[derive(Default)]
pub struct MemoryCatalog {
    instruments: HashMap<AssetClass, Vec<String>>,
    unavailable: AtomicBool,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instruments<I, S>(mut self, asset_class: AssetClass, figis: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.instruments
            .entry(asset_class)
            .or_default()
            .extend(figis.into_iter().map(Into::into));
        self
    }

    /// 카탈로그 조회를 실패시킵니다.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl InstrumentCatalog for MemoryCatalog {
    async fn list_instruments(&self, asset_class: AssetClass) -> Result<Vec<String>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DataError::ConnectionError("catalog unavailable".to_string()));
        }
        Ok(self.instruments.get(&asset_class).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use loader_core::time::to_reporting_time;
    use rust_decimal_macros::dec;

    fn candle(figi: &str, minute: i64) -> Candle {
        let time = Utc.with_ymd_and_hms(2024, 3, 5, 4, 0, 0).unwrap() + Duration::minutes(minute);
        Candle {
            figi: figi.to_string(),
            time: to_reporting_time(time),
            open: dec!(10),
            high: dec!(11),
            low: dec!(9),
            close: dec!(10),
            volume: 100,
            complete: true,
        }
    }

    #[tokio::test]
    async fn test_insert_skips_existing_keys() {
        let store = MemoryCandleStore::new(Resolution::Minute);
        assert_eq!(store.insert_batch(&[candle("X", 0), candle("X", 1)]).await.unwrap(), 2);
        assert_eq!(store.insert_batch(&[candle("X", 1), candle("X", 2)]).await.unwrap(), 1);
        assert_eq!(store.count("X").await.unwrap(), 3);
        let all = Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap();
        let times = store
            .existing_times("X", all, all + Duration::days(1))
            .await
            .unwrap();
        assert!(times.contains(&candle("X", 2).time.with_timezone(&Utc)));
        assert!(store
            .existing_times("Y", all, all + Duration::days(1))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_find_range_is_half_open_and_per_figi() {
        let store = MemoryCandleStore::new(Resolution::Minute);
        store
            .seed(vec![candle("X", 0), candle("X", 1), candle("X", 2), candle("Y", 1)])
            .await;

        let from = candle("X", 0).time.with_timezone(&Utc);
        let to = candle("X", 2).time.with_timezone(&Utc);
        let found = store.find_range("X", from, to).await.unwrap();

        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|c| c.figi == "X"));

        let times = store.existing_times("X", from, to).await.unwrap();
        assert_eq!(times.len(), 3);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = MemoryCandleStore::new(Resolution::Day);
        store.set_fail_inserts(true);
        assert!(store.insert_batch(&[candle("X", 0)]).await.is_err());
        assert_eq!(store.insert_batches(), 1);
        assert!(store.is_empty().await);

        store.fail_reads_for("X").await;
        let now = Utc::now();
        assert!(store.find_range("X", now - Duration::days(1), now).await.is_err());
    }

    #[tokio::test]
    async fn test_aggregate_upsert_keeps_created_at() {
        let store = MemoryAggregateStore::new();
        let first = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();

        store.upsert(&SessionAggregate::new("X", first)).await.unwrap();
        store.upsert(&SessionAggregate::new("X", later)).await.unwrap();

        let stored = store.get("X").await.unwrap().unwrap();
        assert_eq!(stored.created_at, first);
        assert_eq!(stored.updated_at, later);
    }

    #[tokio::test]
    async fn test_aggregate_queries() {
        let store = MemoryAggregateStore::new();
        let base = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        for (i, (figi, avg)) in [("A", dec!(100)), ("B", dec!(300)), ("C", dec!(200))].into_iter().enumerate() {
            let mut agg = SessionAggregate::new(figi, base + Duration::hours(i as i64));
            agg.avg_morning_volume = Some(avg);
            agg.morning_days = 1;
            store.upsert(&agg).await.unwrap();
        }
        store.upsert(&SessionAggregate::new("D", base)).await.unwrap();

        let top = store.top_by_average(SessionWindow::Morning, 2).await.unwrap();
        assert_eq!(top.iter().map(|r| r.figi.as_str()).collect::<Vec<_>>(), vec!["B", "C"]);

        let recent = store.list_recent(1).await.unwrap();
        assert_eq!(recent[0].figi, "C");

        let stale = store.stale_since(base + Duration::minutes(30)).await.unwrap();
        assert_eq!(stale.len(), 2);

        let stats = store.window_stats(SessionWindow::Morning).await.unwrap();
        assert_eq!(stats.instruments, 3);
        assert_eq!(stats.avg, Some(dec!(200)));
        assert_eq!(stats.max, Some(dec!(300)));
        assert_eq!(stats.min, Some(dec!(100)));
    }

    #[tokio::test]
    async fn test_task_log_close_once() {
        let store = MemoryTaskLogStore::new();
        let start = Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap();
        store
            .insert(&TaskLogEntry::started("T_1", "load-minute", "시작", start))
            .await
            .unwrap();
        store.mark_processing("T_1", "진행 중").await.unwrap();
        assert_eq!(store.active().await.unwrap().len(), 1);

        let closed = store
            .close("T_1", TaskStatus::Success, "완료", start + Duration::seconds(2))
            .await
            .unwrap();
        assert_eq!(closed.duration_ms, Some(2_000));

        let again = store.close("T_1", TaskStatus::Failed, "?", start).await;
        assert!(matches!(again, Err(DataError::InvalidState(_))));
        assert!(store.active().await.unwrap().is_empty());
        assert_eq!(store.by_status(TaskStatus::Success).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_catalog() {
        let catalog = MemoryCatalog::new()
            .with_instruments(AssetClass::Share, ["A", "B"])
            .with_instruments(AssetClass::Future, ["F"]);

        assert_eq!(catalog.list_instruments(AssetClass::Share).await.unwrap().len(), 2);
        assert!(catalog.list_instruments(AssetClass::Indicative).await.unwrap().is_empty());

        catalog.set_unavailable(true);
        assert!(catalog.list_instruments(AssetClass::Share).await.is_err());
    }
}
