//! Shared fixtures for snapsync integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use snapsync::prelude::*;

/// T0 of every scenario. `t(n)` is n hours later.
pub fn t(hours: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap() + Duration::hours(hours)
}

/// `t(hours)` plus some minutes.
pub fn tm(hours: i64, minutes: i64) -> DateTime<Utc> {
    t(hours) + Duration::minutes(minutes)
}

pub fn count_scope(config: SyncConfig) -> SyncScope {
    let mut calculator = CalculatorConfig::new();
    calculator.insert("groupBy".to_string(), "ScheduleState".into());
    SyncScope::new(
        ProjectScope::standalone(),
        &WorkspaceConfiguration::default(),
        config,
        SnapshotCountCalculator::KIND,
        Some(calculator),
    )
}

pub fn snapshot(id: i64, valid_from: DateTime<Utc>, state: &str) -> Snapshot {
    Snapshot::new(id, valid_from).with_field("ScheduleState", state)
}

pub fn page(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    snapshots: Vec<Snapshot>,
    has_more: bool,
) -> Page {
    Page::new(snapshots, Interval::new(start, end).unwrap(), has_more)
}

/// In-memory store that counts writes and removals.
#[derive(Clone, Default)]
pub struct CountingStore {
    pub inner: InMemoryCacheStore,
    sets: Arc<AtomicUsize>,
    removes: Arc<AtomicUsize>,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    pub fn removes(&self) -> usize {
        self.removes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheStore for CountingStore {
    async fn get(&self, key: &CacheKey) -> SyncResult<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &CacheKey, state: Vec<u8>) -> SyncResult<()> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, state).await
    }

    async fn remove(&self, key: &CacheKey) -> SyncResult<()> {
        self.removes.fetch_add(1, Ordering::SeqCst);
        self.inner.remove(key).await
    }

    async fn keys(&self) -> SyncResult<Vec<CacheKey>> {
        self.inner.keys().await
    }
}

/// Everything a scenario needs to drive and inspect one session.
pub struct Harness {
    pub session: SyncOrchestrator<SnapshotCountCalculator>,
    pub store: CountingStore,
    pub source: Arc<ScriptedSource>,
    pub sink: CollectingSink<CountView>,
}

impl Harness {
    pub fn new(config: SyncConfig) -> Self {
        Self::with_store(config, CountingStore::new())
    }

    pub fn with_store(config: SyncConfig, store: CountingStore) -> Self {
        let source = Arc::new(ScriptedSource::new());
        let sink = CollectingSink::new();
        let session = SyncOrchestrator::new(
            count_scope(config),
            Arc::new(store.clone()),
            source.clone(),
            sink.clone(),
        );
        Self {
            session,
            store,
            source,
            sink,
        }
    }
}
