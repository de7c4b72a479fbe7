//! End-to-end session scenarios: cold start, warm restore, historical pin
//! and invalidation, driven step by step and through the tokio driver.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use snapsync::prelude::*;

fn bootstrap_phase(event: &RenderEvent<CountView>) -> Phase {
    match event {
        RenderEvent::Bootstrap { phase, .. } => *phase,
        other => panic!("expected a bootstrap event, got {other:?}"),
    }
}

#[tokio::test]
async fn test_cold_start_single_page() {
    let mut h = Harness::new(SyncConfig::new());
    h.source.push_page(page(
        t(0),
        t(1),
        vec![snapshot(1, t(0), "Defined"), snapshot(2, tm(0, 30), "Accepted")],
        false,
    ));

    assert_eq!(h.session.bootstrap().await.unwrap(), Continuation::FetchNow);
    let next = h.session.fetch_once().await.unwrap();

    assert_eq!(
        next,
        Continuation::Schedule(Duration::from_secs(30 * 60 + 30))
    );
    assert_eq!(h.session.phase(), Phase::Scheduled);
    assert_eq!(h.store.sets(), 1);
    assert_eq!(h.source.requests(), vec![None]);

    let events = h.sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(bootstrap_phase(&events[0]), Phase::Cold);
    assert_eq!(events[0].view().unwrap().total_snapshots, 0);
    assert!(events[1].is_dirty());
    assert_eq!(events[1].view().unwrap().total_snapshots, 2);
    assert_eq!(events[1].view().unwrap().up_to_date, Some(t(1)));
}

#[tokio::test]
async fn test_warm_restore_drains_backlog_then_schedules() {
    let store = CountingStore::new();
    {
        let mut first = Harness::with_store(SyncConfig::new(), store.clone());
        first
            .source
            .push_page(page(t(0), t(1), vec![snapshot(1, t(0), "Defined")], false));
        first.session.bootstrap().await.unwrap();
        first.session.fetch_once().await.unwrap();
    }

    let mut h = Harness::with_store(SyncConfig::new(), store);
    h.source.push_page(page(
        t(1),
        t(2),
        vec![snapshot(2, t(1), "Defined")],
        true,
    ));
    h.source.push_page(page(
        t(2),
        t(3),
        vec![snapshot(1, t(2), "Accepted")],
        false,
    ));

    assert_eq!(h.session.bootstrap().await.unwrap(), Continuation::FetchNow);
    assert_eq!(h.session.marker(), Some(t(1)));

    assert_eq!(h.session.fetch_once().await.unwrap(), Continuation::FetchNow);
    assert!(h.session.next_fetch_at().is_none());
    assert!(matches!(
        h.session.fetch_once().await.unwrap(),
        Continuation::Schedule(_)
    ));

    assert_eq!(h.source.requests(), vec![Some(t(1)), Some(t(2))]);
    let events = h.sink.events();
    assert_eq!(bootstrap_phase(&events[0]), Phase::Restored);
    assert_eq!(events[0].view().unwrap().total_snapshots, 1);
    assert_eq!(events.len(), 3);

    let view = h.session.view().unwrap();
    assert_eq!(view.total_snapshots, 3);
    assert_eq!(view.distinct_objects, 2);
    assert_eq!(view.up_to_date, Some(t(3)));
}

#[tokio::test]
async fn test_pinned_as_of_clamps_and_stops() {
    let as_of = tm(1, 30);
    let mut h = Harness::new(SyncConfig::new().with_as_of(as_of));
    h.source.push_page(page(
        t(1),
        t(2),
        vec![
            snapshot(1, t(1), "Defined"),
            snapshot(2, tm(1, 45), "Defined"),
        ],
        true,
    ));

    h.session.bootstrap().await.unwrap();
    let next = h.session.fetch_once().await.unwrap();

    assert_eq!(next, Continuation::Stop);
    assert_eq!(h.session.phase(), Phase::Stopped);
    assert_eq!(h.session.marker(), Some(as_of));
    assert!(h.session.next_fetch_at().is_none());
    assert_eq!(h.session.view().unwrap().total_snapshots, 1);
}

#[tokio::test]
async fn test_pinned_session_restored_past_as_of_does_not_fetch() {
    let as_of = t(2);
    let store = CountingStore::new();
    {
        let mut first = Harness::with_store(SyncConfig::new().with_as_of(as_of), store.clone());
        first.source.push_page(page(t(0), t(3), vec![], false));
        first.session.bootstrap().await.unwrap();
        assert_eq!(first.session.fetch_once().await.unwrap(), Continuation::Stop);
    }

    let mut h = Harness::with_store(SyncConfig::new().with_as_of(as_of), store);
    assert_eq!(h.session.bootstrap().await.unwrap(), Continuation::Stop);
    assert!(h.source.requests().is_empty());
}

#[tokio::test]
async fn test_invalidate_while_scheduled_starts_cold() {
    let mut h = Harness::new(SyncConfig::new());
    h.source
        .push_page(page(t(0), t(1), vec![snapshot(1, t(0), "Defined")], false));
    h.session.bootstrap().await.unwrap();
    h.session.fetch_once().await.unwrap();
    assert_eq!(h.session.phase(), Phase::Scheduled);
    let generation = h.session.generation();

    let next = h.session.invalidate().await.unwrap();

    assert_eq!(next, Continuation::FetchNow);
    assert!(h.session.next_fetch_at().is_none());
    assert_eq!(h.session.generation(), generation + 1);
    assert_eq!(h.store.removes(), 1);
    assert!(h.store.inner.is_empty().await);
    assert_eq!(h.session.marker(), None);

    let last = h.sink.last().unwrap();
    assert_eq!(bootstrap_phase(&last), Phase::Cold);
    assert_eq!(last.view().unwrap().total_snapshots, 0);

    h.source
        .push_page(page(t(0), t(1), vec![snapshot(1, t(0), "Defined")], false));
    h.session.fetch_once().await.unwrap();
    assert_eq!(h.source.requests(), vec![None, None]);
    assert_eq!(h.session.view().unwrap().total_snapshots, 1);
}

#[tokio::test]
async fn test_keys_partition_sessions() {
    let store = CountingStore::new();
    let mut by_state = Harness::with_store(SyncConfig::new(), store.clone());
    let mut pinned = Harness::with_store(SyncConfig::new().with_as_of(t(5)), store.clone());
    assert_ne!(by_state.session.key(), pinned.session.key());

    by_state
        .source
        .push_page(page(t(0), t(1), vec![snapshot(1, t(0), "Defined")], false));
    pinned.source.push_page(page(t(0), t(1), vec![], false));

    by_state.session.bootstrap().await.unwrap();
    by_state.session.fetch_once().await.unwrap();
    pinned.session.bootstrap().await.unwrap();
    pinned.session.fetch_once().await.unwrap();

    assert_eq!(store.keys().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_config_file_derivation_reaches_calculator() {
    let (config, calculator) = SyncConfigFile::from_json(
        r#"{
            "deriveFieldsOnSnapshotsConfig": { "fields": [
                { "field": "Stage", "from": "ScheduleState",
                  "map": { "Defined": "open", "In-Progress": "open", "Accepted": "closed" } }
            ] },
            "calculatorConfig": { "groupBy": "Stage" }
        }"#,
    )
    .unwrap()
    .into_parts();
    let scope = SyncScope::new(
        ProjectScope::standalone(),
        &WorkspaceConfiguration::default(),
        config,
        SnapshotCountCalculator::KIND,
        calculator,
    );
    let source = Arc::new(ScriptedSource::from_pages([page(
        t(0),
        t(1),
        vec![
            snapshot(1, t(0), "Defined"),
            snapshot(2, t(0), "In-Progress"),
            snapshot(3, tm(0, 30), "Accepted"),
        ],
        false,
    )]));
    let mut session = SyncOrchestrator::<SnapshotCountCalculator>::new(
        scope,
        Arc::new(InMemoryCacheStore::new()),
        source,
        LogSink,
    );

    session.bootstrap().await.unwrap();
    session.fetch_once().await.unwrap();

    let view = session.view().unwrap();
    assert_eq!(view.group_by, "Stage");
    assert_eq!(view.counts["open"], 2);
    assert_eq!(view.counts["closed"], 1);
}

mod driver {
    use super::*;
    use tokio::time::Instant;

    fn running(config: SyncConfig) -> (
        SyncOrchestrator<SnapshotCountCalculator>,
        Arc<ScriptedSource>,
        tokio::sync::mpsc::UnboundedReceiver<RenderEvent<CountView>>,
    ) {
        let source = Arc::new(ScriptedSource::new());
        let (sink, events) = ChannelSink::new();
        let session = SyncOrchestrator::new(
            count_scope(config),
            Arc::new(InMemoryCacheStore::new()),
            source.clone(),
            sink,
        );
        (session, source, events)
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_timer_fires_after_refresh_plus_padding() {
        let (session, source, mut events) = running(SyncConfig::new());
        source.push_page(page(t(0), t(1), vec![snapshot(1, t(0), "Defined")], false));
        let handle = session.handle();
        let task = tokio::spawn(session.run());

        assert_eq!(events.recv().await.unwrap().name(), "bootstrap");
        assert!(events.recv().await.unwrap().is_dirty());
        let merged_at = Instant::now();

        let refreshed = events.recv().await.unwrap();
        assert_eq!(refreshed.name(), "merged");
        assert!(!refreshed.is_dirty());
        assert!(merged_at.elapsed() >= Duration::from_secs(30 * 60 + 30));
        assert_eq!(source.requests(), vec![None, Some(t(1))]);

        let stats = handle.shutdown().await.unwrap();
        assert_eq!(stats.pages_merged, 2);
        assert_eq!(stats.empty_pages, 1);
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retries_after_padding() {
        let config = SyncConfig::new().with_padding_delay(Duration::from_secs(5));
        let (session, source, mut events) = running(config);
        source.push_error(SyncError::Server {
            status: 503,
            message: "unavailable".to_string(),
        });
        source.push_page(page(t(0), t(1), vec![snapshot(1, t(0), "Defined")], false));
        let handle = session.handle();
        let started = Instant::now();
        let task = tokio::spawn(session.run());

        assert_eq!(events.recv().await.unwrap().name(), "bootstrap");
        match events.recv().await.unwrap() {
            RenderEvent::FetchFailed { retry_in_ms, .. } => assert_eq!(retry_in_ms, 5_000),
            other => panic!("expected a fetch failure, got {other:?}"),
        }
        assert!(events.recv().await.unwrap().is_dirty());
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(60));

        let stats = handle.shutdown().await.unwrap();
        assert_eq!(stats.fetch_failures, 1);
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_pinned_session_ends_by_itself() {
        let (session, source, mut events) = running(SyncConfig::new().with_as_of(tm(1, 30)));
        source.push_page(page(t(0), t(1), vec![snapshot(1, t(0), "Defined")], true));
        source.push_page(page(t(1), t(2), vec![snapshot(2, t(1), "Defined")], true));

        let stats = session.run().await.unwrap();

        assert_eq!(stats.pages_merged, 2);
        assert_eq!(source.remaining(), 0);
        assert_eq!(events.recv().await.unwrap().name(), "bootstrap");
        assert_eq!(events.recv().await.unwrap().name(), "merged");
        let last = events.recv().await.unwrap();
        assert_eq!(last.view().unwrap().up_to_date, Some(tm(1, 30)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_through_handle() {
        let (session, source, mut events) = running(SyncConfig::new());
        source.push_page(page(t(0), t(1), vec![snapshot(1, t(0), "Defined")], false));
        source.push_page(page(t(0), t(1), vec![], false));
        let handle = session.handle();
        let task = tokio::spawn(session.run());

        assert_eq!(events.recv().await.unwrap().name(), "bootstrap");
        assert!(events.recv().await.unwrap().is_dirty());

        handle.invalidate().await.unwrap();
        let restarted = events.recv().await.unwrap();
        assert_eq!(bootstrap_phase(&restarted), Phase::Cold);
        assert_eq!(restarted.view().unwrap().total_snapshots, 0);

        let refetched = events.recv().await.unwrap();
        assert_eq!(refetched.view().unwrap().total_snapshots, 0);
        assert_eq!(source.requests(), vec![None, None]);

        let stats = handle.shutdown().await.unwrap();
        assert_eq!(stats.invalidations, 1);
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_violation_fails_the_run() {
        let (session, source, mut events) = running(SyncConfig::new());
        source.push_page(page(t(0), t(2), vec![], true));
        source.push_page(page(t(1), t(3), vec![], false));

        let result = session.run().await;

        assert!(matches!(result, Err(SyncError::IntervalViolation { .. })));
        let mut last = None;
        while let Ok(event) = events.try_recv() {
            last = Some(event);
        }
        assert_eq!(last.unwrap().name(), "failed");
    }
}
