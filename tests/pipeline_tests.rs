// Pipeline scenarios against the public service API
//
// Tests cover:
// - Idempotent submission and session rehydration
// - Feature values for the reference scenarios
// - Batch partial failure, cancellation and store retries
// - Sequence assignment under concurrent submissions
// - Late arrivals, terminal sessions, inactivity expiry and backpressure
// - Evidence fusion over derived behavioral features

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

use skillprint::api::app_state::AppState;
use skillprint::config::{AppConfig, ConfigHandle};
use skillprint::error::AppError;
use skillprint::ingest::PayloadRegistry;
use skillprint::models::{
    Anomaly, EvidenceSource, FeatureValue, QualityFlag, RawEvent, Session, SessionStatus, Skill,
    SourceKind, TelemetryEvent,
};
use skillprint::services::{EventStatus, FuseRequest};
use skillprint::storage::{
    AppendOutcome, EventStore, MemoryEventStore, MemorySessionRepository, SessionRepository,
    StorageFactory, StorageInstance, StoreError, StoreResult,
};

// ============ Helpers ============

fn base_ms() -> i64 {
    (Utc::now() - Duration::hours(1)).timestamp_millis()
}

fn raw(event_type: &str, timestamp: i64, payload: Value) -> RawEvent {
    RawEvent {
        event_type: event_type.to_string(),
        timestamp,
        payload,
    }
}

fn task_started(ts: i64, task: &str) -> RawEvent {
    raw("task_started", ts, json!({ "task_id": task }))
}

fn task_completed(ts: i64, task: &str) -> RawEvent {
    raw("task_completed", ts, json!({ "task_id": task, "completion_time_sec": 3.5 }))
}

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.pipeline.storage.retry.initial_backoff_ms = 1;
    config.pipeline.storage.retry.max_backoff_ms = 2;
    config
}

fn state_with(config: AppConfig, storage: StorageInstance) -> AppState {
    AppState::new(
        Arc::new(ConfigHandle::new(config)),
        storage,
        PayloadRegistry::standard(),
    )
}

fn state(config: AppConfig) -> AppState {
    state_with(config, StorageFactory::in_memory())
}

fn entries(events: Vec<RawEvent>) -> Vec<Value> {
    events
        .into_iter()
        .map(|event| serde_json::to_value(event).unwrap())
        .collect()
}

async fn start(state: &AppState) -> String {
    state
        .ingestion
        .start_session("student_1", Default::default())
        .await
        .unwrap()
        .id
}

/// Fails the first `failures` appends, then delegates
struct FlakyEventStore {
    inner: MemoryEventStore,
    failures: AtomicUsize,
}

impl FlakyEventStore {
    fn new(failures: usize) -> Self {
        Self {
            inner: MemoryEventStore::new(),
            failures: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl EventStore for FlakyEventStore {
    async fn append(&self, event: &TelemetryEvent) -> StoreResult<AppendOutcome> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Unavailable("connection reset".into()));
        }
        self.inner.append(event).await
    }

    async fn range(
        &self,
        session_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<TelemetryEvent>> {
        self.inner.range(session_id, from, to).await
    }

    async fn count(&self, session_id: &str) -> StoreResult<usize> {
        self.inner.count(session_id).await
    }
}

/// Sleeps on every lookup and fails the first `failures` of them
struct SlowSessionRepository {
    inner: MemorySessionRepository,
    failures: AtomicUsize,
    delay: std::time::Duration,
}

#[async_trait]
impl SessionRepository for SlowSessionRepository {
    async fn create(&self, session: &Session) -> StoreResult<()> {
        self.inner.create(session).await
    }

    async fn get_by_id(&self, id: &str) -> StoreResult<Option<Session>> {
        tokio::time::sleep(self.delay).await;
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Timeout("session lookup".into()));
        }
        self.inner.get_by_id(id).await
    }

    async fn update(&self, session: &Session) -> StoreResult<()> {
        self.inner.update(session).await
    }

    async fn list_by_student(
        &self,
        student_id: &str,
        status: Option<SessionStatus>,
        limit: usize,
    ) -> StoreResult<Vec<Session>> {
        self.inner.list_by_student(student_id, status, limit).await
    }

    async fn list_idle(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Session>> {
        self.inner.list_idle(cutoff).await
    }
}

/// Cancels a token once `after` events were stored, or sleeps on every append
struct InstrumentedEventStore {
    inner: MemoryEventStore,
    appended: AtomicUsize,
    cancel_after: Option<(usize, CancellationToken)>,
    delay: std::time::Duration,
}

#[async_trait]
impl EventStore for InstrumentedEventStore {
    async fn append(&self, event: &TelemetryEvent) -> StoreResult<AppendOutcome> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let outcome = self.inner.append(event).await?;
        let appended = self.appended.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, token)) = &self.cancel_after {
            if appended >= *after {
                token.cancel();
            }
        }
        Ok(outcome)
    }

    async fn range(
        &self,
        session_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<TelemetryEvent>> {
        self.inner.range(session_id, from, to).await
    }

    async fn count(&self, session_id: &str) -> StoreResult<usize> {
        self.inner.count(session_id).await
    }
}

// ============ Idempotence ============

#[tokio::test]
async fn test_duplicate_submission_stores_one_event() {
    let state = state(test_config());
    let session_id = start(&state).await;
    let event = task_started(base_ms(), "t1");

    let first = state.ingestion.submit_event(&session_id, event.clone()).await.unwrap();
    let second = state.ingestion.submit_event(&session_id, event).await.unwrap();

    assert_eq!(first.status, EventStatus::Accepted);
    assert_eq!(first.sequence, Some(1));
    assert_eq!(second.status, EventStatus::Duplicate);
    assert_eq!(second.sequence, None);
    assert_eq!(state.storage.events.count(&session_id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_rehydrated_workspace_keeps_dedup_and_sequence() {
    let storage = StorageFactory::in_memory();
    let first = state_with(test_config(), storage.clone());
    let session_id = start(&first).await;
    let base = base_ms();
    first
        .ingestion
        .submit_event(&session_id, task_started(base, "t1"))
        .await
        .unwrap();

    // a second service over the same storage has no in-memory workspace
    let second = state_with(test_config(), storage);
    let duplicate = second
        .ingestion
        .submit_event(&session_id, task_started(base, "t1"))
        .await
        .unwrap();
    assert_eq!(duplicate.status, EventStatus::Duplicate);

    let next = second
        .ingestion
        .submit_event(&session_id, task_started(base + 1_000, "t2"))
        .await
        .unwrap();
    assert_eq!(next.sequence, Some(2));
}

#[tokio::test]
async fn test_concurrent_submissions_get_contiguous_sequences() {
    let state = state(test_config());
    let session_id = start(&state).await;
    let base = base_ms();

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let ingestion = state.ingestion.clone();
            let session_id = session_id.clone();
            tokio::spawn(async move {
                ingestion
                    .submit_event(&session_id, task_started(base + i * 100, &format!("t{i}")))
                    .await
            })
        })
        .collect();
    let mut acked = Vec::new();
    for handle in handles {
        let ack = handle.await.unwrap().unwrap();
        assert_eq!(ack.status, EventStatus::Accepted);
        acked.push(ack.sequence.unwrap());
    }
    acked.sort_unstable();
    assert_eq!(acked, (1..=20).collect::<Vec<u64>>());

    let mut stored: Vec<u64> = state
        .storage
        .events
        .range(&session_id, None, None)
        .await
        .unwrap()
        .iter()
        .map(|e| e.sequence)
        .collect();
    stored.sort_unstable();
    assert_eq!(stored, (1..=20).collect::<Vec<u64>>());
}

#[tokio::test]
async fn test_failed_rehydrate_keeps_session_serialized() {
    let storage = StorageInstance {
        sessions: Arc::new(SlowSessionRepository {
            inner: MemorySessionRepository::new(),
            failures: AtomicUsize::new(3),
            delay: std::time::Duration::from_millis(100),
        }),
        ..StorageFactory::in_memory()
    };
    let state = state_with(test_config(), storage);
    let session_id = start(&state).await;
    let base = base_ms();

    let submit = |event: RawEvent| {
        let ingestion = state.ingestion.clone();
        let session_id = session_id.clone();
        tokio::spawn(async move { ingestion.submit_event(&session_id, event).await })
    };

    // the first caller exhausts its retries while loading the workspace
    let first = submit(task_started(base, "t1"));
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let queued = submit(task_started(base + 1_000, "t2"));

    let err = first.await.unwrap().unwrap_err();
    assert!(matches!(err, AppError::StoreUnavailable(_)));

    // arrives while the queued caller is still rebuilding the workspace
    let newcomer = submit(task_started(base + 2_000, "t3"));

    let mut acked = vec![
        queued.await.unwrap().unwrap().sequence.unwrap(),
        newcomer.await.unwrap().unwrap().sequence.unwrap(),
    ];
    acked.sort_unstable();
    assert_eq!(acked, vec![1, 2]);

    let stored: Vec<u64> = state
        .storage
        .events
        .range(&session_id, None, None)
        .await
        .unwrap()
        .iter()
        .map(|e| e.sequence)
        .collect();
    assert_eq!(stored.len(), 2);
    assert!(stored.contains(&1) && stored.contains(&2));
}

// ============ Feature scenarios ============

#[tokio::test]
async fn test_task_completion_rate_scenario() {
    let state = state(test_config());
    let session_id = start(&state).await;
    let base = base_ms();

    let mut events = Vec::new();
    for i in 0..10 {
        events.push(task_started(base + i * 2_000, &format!("t{i}")));
        if i < 9 {
            events.push(task_completed(base + i * 2_000 + 1_000, &format!("t{i}")));
        }
    }
    let summary = state
        .ingestion
        .submit_batch(&session_id, entries(events), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.accepted, 19);

    state
        .ingestion
        .complete_session(&session_id, None, vec![])
        .await
        .unwrap();
    let features = state.ingestion.get_features(&session_id).await.unwrap();

    assert_eq!(features.get("task_completion_rate"), Some(FeatureValue::Score(0.9)));
    assert_eq!(features.event_count, 19);
    assert_eq!(features.quality, QualityFlag::Normal);
}

#[tokio::test]
async fn test_recovery_time_scenarios() {
    let state = state(test_config());
    let base = base_ms();

    let with_failure = start(&state).await;
    let events = vec![
        task_started(base, "t1"),
        raw("task_failed", base + 1_000, json!({ "task_id": "t1", "reason": "wrong order" })),
        raw("retry_attempted", base + 6_000, json!({ "task_id": "t1", "retry_number": 1 })),
    ];
    state
        .ingestion
        .submit_batch(&with_failure, entries(events), CancellationToken::new())
        .await
        .unwrap();
    state
        .ingestion
        .complete_session(&with_failure, None, vec![])
        .await
        .unwrap();
    let features = state.ingestion.get_features(&with_failure).await.unwrap();
    assert_eq!(features.get("recovery_time_avg"), Some(FeatureValue::Seconds(5.0)));

    let without_failure = start(&state).await;
    state
        .ingestion
        .submit_event(&without_failure, task_started(base, "t1"))
        .await
        .unwrap();
    state
        .ingestion
        .complete_session(&without_failure, None, vec![])
        .await
        .unwrap();
    let features = state.ingestion.get_features(&without_failure).await.unwrap();
    assert_eq!(features.get("recovery_time_avg"), Some(FeatureValue::NotApplicable));

    let json = serde_json::to_value(&features).unwrap();
    assert!(json["features"]["recovery_time_avg"].is_null());
}

#[tokio::test]
async fn test_out_of_order_events_are_released_in_timestamp_order() {
    let mut config = test_config();
    config.pipeline.ingestion.lateness_window_ms = 60_000;
    let state = state(config);
    let session_id = start(&state).await;
    let base = base_ms();

    // retry arrives before the failure it follows
    for event in [
        raw("retry_attempted", base + 6_000, json!({ "task_id": "t1", "retry_number": 1 })),
        task_started(base, "t1"),
        raw("task_failed", base + 1_000, json!({ "task_id": "t1", "reason": "timeout" })),
    ] {
        let ack = state.ingestion.submit_event(&session_id, event).await.unwrap();
        assert!(!ack.late);
    }
    state
        .ingestion
        .complete_session(&session_id, None, vec![])
        .await
        .unwrap();

    let features = state.ingestion.get_features(&session_id).await.unwrap();
    assert_eq!(features.get("recovery_time_avg"), Some(FeatureValue::Seconds(5.0)));
    assert!(features.anomalies.is_empty());

    let events = state.ingestion.get_events(&session_id, None, None).await.unwrap();
    let timestamps: Vec<_> = events.iter().map(|e| e.timestamp).collect();
    assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));
}

// ============ Batches ============

#[tokio::test]
async fn test_batch_with_one_invalid_event() {
    let state = state(test_config());
    let session_id = start(&state).await;
    let base = base_ms();

    let events: Vec<RawEvent> = (0..100)
        .map(|i| {
            if i == 42 {
                raw("task_started", base + i * 100, json!({ "role": "builder" }))
            } else {
                task_started(base + i * 100, &format!("t{i}"))
            }
        })
        .collect();

    let summary = state
        .ingestion
        .submit_batch(&session_id, entries(events), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.received, 100);
    assert_eq!(summary.accepted, 99);
    assert_eq!(summary.duplicates, 0);
    assert_eq!(summary.rejected.len(), 1);
    assert_eq!(summary.rejected[0].index, 42);
    assert_eq!(summary.rejected[0].category, "ValidationError");
    assert_eq!(summary.rejected[0].code, "missing_field");
    assert!(!summary.rejected[0].retryable);
    assert_eq!(state.storage.events.count(&session_id).await.unwrap(), 99);
}

#[tokio::test]
async fn test_batch_with_one_malformed_envelope() {
    let state = state(test_config());
    let session_id = start(&state).await;
    let base = base_ms();

    let mut events = entries((0..100).map(|i| task_started(base + i * 100, &format!("t{i}"))).collect());
    events[42] = json!({ "event_type": "task_started", "payload": { "task_id": "t42" } });

    let summary = state
        .ingestion
        .submit_batch(&session_id, events, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.received, 100);
    assert_eq!(summary.accepted, 99);
    assert_eq!(summary.rejected.len(), 1);
    assert_eq!(summary.rejected[0].index, 42);
    assert_eq!(summary.rejected[0].category, "ValidationError");
    assert_eq!(summary.rejected[0].code, "malformed_event");
    assert!(!summary.rejected[0].retryable);
    assert_eq!(state.storage.events.count(&session_id).await.unwrap(), 99);
    assert!(state.metrics.gather().contains("telemetry_events_rejected_total 1"));
}

#[tokio::test]
async fn test_oversized_batch_is_refused() {
    let state = state(test_config());
    let session_id = start(&state).await;
    let base = base_ms();
    let events: Vec<RawEvent> = (0..101).map(|i| task_started(base + i, &format!("t{i}"))).collect();

    let err = state
        .ingestion
        .submit_batch(&session_id, entries(events), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(state.storage.events.count(&session_id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_cancelled_batch_keeps_accepted_events() {
    let cancel = CancellationToken::new();
    let storage = StorageInstance {
        events: Arc::new(InstrumentedEventStore {
            inner: MemoryEventStore::new(),
            appended: AtomicUsize::new(0),
            cancel_after: Some((4, cancel.clone())),
            delay: std::time::Duration::ZERO,
        }),
        ..StorageFactory::in_memory()
    };
    let state = state_with(test_config(), storage);
    let session_id = start(&state).await;
    let base = base_ms();
    let events: Vec<RawEvent> = (0..10).map(|i| task_started(base + i * 100, &format!("t{i}"))).collect();

    let summary = state
        .ingestion
        .submit_batch(&session_id, entries(events.clone()), cancel)
        .await
        .unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.accepted, 4);
    assert_eq!(summary.unprocessed, 6);
    assert_eq!(state.storage.events.count(&session_id).await.unwrap(), 4);

    // resending the whole batch is safe
    let resent = state
        .ingestion
        .submit_batch(&session_id, entries(events), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(resent.duplicates, 4);
    assert_eq!(resent.accepted, 6);
    assert!(!resent.cancelled);
}

// ============ Store failures ============

#[tokio::test]
async fn test_transient_store_failures_are_retried() {
    let storage = StorageInstance {
        events: Arc::new(FlakyEventStore::new(2)),
        ..StorageFactory::in_memory()
    };
    let state = state_with(test_config(), storage);
    let session_id = start(&state).await;

    let ack = state
        .ingestion
        .submit_event(&session_id, task_started(base_ms(), "t1"))
        .await
        .unwrap();
    assert_eq!(ack.status, EventStatus::Accepted);
    assert!(state.metrics.gather().contains("event_store_retries_total 2"));
}

#[tokio::test]
async fn test_exhausted_retries_fail_the_acknowledgment() {
    let storage = StorageInstance {
        events: Arc::new(FlakyEventStore::new(3)),
        ..StorageFactory::in_memory()
    };
    let state = state_with(test_config(), storage);
    let session_id = start(&state).await;
    let event = task_started(base_ms(), "t1");

    let err = state
        .ingestion
        .submit_event(&session_id, event.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::StoreUnavailable(_)));
    assert!(err.is_retryable());
    assert_eq!(state.storage.events.count(&session_id).await.unwrap(), 0);

    // the failed event was never acknowledged, so resending stores it
    let ack = state.ingestion.submit_event(&session_id, event).await.unwrap();
    assert_eq!(ack.status, EventStatus::Accepted);
    assert_eq!(state.storage.events.count(&session_id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_store_outage_marks_rest_of_batch_retryable() {
    let mut config = test_config();
    config.pipeline.storage.retry.max_attempts = 1;
    let storage = StorageInstance {
        events: Arc::new(FlakyEventStore::new(1)),
        ..StorageFactory::in_memory()
    };
    let state = state_with(config, storage);
    let session_id = start(&state).await;
    let base = base_ms();
    let events: Vec<RawEvent> = (0..5).map(|i| task_started(base + i * 100, &format!("t{i}"))).collect();

    let summary = state
        .ingestion
        .submit_batch(&session_id, entries(events), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.accepted, 0);
    assert_eq!(summary.rejected.len(), 5);
    assert!(summary.rejected.iter().all(|r| r.retryable && r.category == "StoreUnavailable"));
}

// ============ Session lifecycle ============

#[tokio::test]
async fn test_terminal_session_refuses_events() {
    let state = state(test_config());
    let session_id = start(&state).await;
    let session = state
        .ingestion
        .complete_session(&session_id, None, vec!["m1".into()])
        .await
        .unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert!(session.total_playtime_sec.is_some());

    let err = state
        .ingestion
        .submit_event(&session_id, task_started(base_ms(), "t1"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::SessionTerminal { .. }));

    let err = state
        .ingestion
        .submit_batch(&session_id, entries(vec![task_started(base_ms(), "t1")]), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::SessionTerminal { .. }));

    let err = state
        .ingestion
        .complete_session(&session_id, None, vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::SessionTerminal { .. }));
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let state = state(test_config());
    let err = state
        .ingestion
        .submit_event("missing", task_started(base_ms(), "t1"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::SessionNotFound(_)));
}

#[tokio::test]
async fn test_late_arrival_rederives_with_monotonic_coverage() {
    let mut config = test_config();
    config.pipeline.ingestion.lateness_window_ms = 1_000;
    let state = state(config);
    let session_id = start(&state).await;
    let base = base_ms();

    for event in [
        raw("mission_started", base, json!({ "mission_id": "m1" })),
        raw(
            "mission_completed",
            base + 1_000,
            json!({ "mission_id": "m1", "completion_time_sec": 1.0, "choices_made": 0 }),
        ),
        // pushes the watermark past the mission completion
        task_started(base + 5_000, "t2"),
    ] {
        state.ingestion.submit_event(&session_id, event).await.unwrap();
    }

    let interim = state.ingestion.get_features(&session_id).await.unwrap();
    assert_eq!(interim.event_count, 2);

    let late = state
        .ingestion
        .submit_event(&session_id, task_started(base + 500, "t1"))
        .await
        .unwrap();
    assert!(late.late);

    let rederived = state.ingestion.get_features(&session_id).await.unwrap();
    assert_eq!(rederived.event_count, 3);

    state
        .ingestion
        .complete_session(&session_id, None, vec![])
        .await
        .unwrap();
    let history = state.storage.features.history(&session_id).await.unwrap();
    let coverage: Vec<usize> = history.iter().map(|v| v.event_count).collect();
    assert_eq!(coverage, vec![2, 3, 4]);

    let session = state.ingestion.get_session(&session_id).await.unwrap();
    assert_eq!(session.completed_missions(), 1);
}

#[tokio::test]
async fn test_inactive_session_expires_with_low_confidence() {
    let mut config = test_config();
    config.pipeline.ingestion.inactivity_timeout_secs = 60;
    let state = state(config);
    let session_id = start(&state).await;
    state
        .ingestion
        .submit_event(&session_id, task_started(base_ms(), "t1"))
        .await
        .unwrap();

    // not idle yet
    let expired = state.ingestion.expire_inactive(Utc::now()).await.unwrap();
    assert!(expired.is_empty());

    let expired = state
        .ingestion
        .expire_inactive(Utc::now() + Duration::minutes(2))
        .await
        .unwrap();
    assert_eq!(expired, vec![session_id.clone()]);

    let session = state.ingestion.get_session(&session_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Incomplete);
    assert_eq!(session.ended_at, Some(session.last_activity_at));

    let features = state.ingestion.get_features(&session_id).await.unwrap();
    assert!(features.is_low_confidence());
    assert!(features.anomalies.contains(&Anomaly::SessionTimedOut));
}

#[tokio::test]
async fn test_saturated_session_reports_backpressure() {
    let mut config = test_config();
    config.pipeline.ingestion.lock_timeout_ms = 10;
    let storage = StorageInstance {
        events: Arc::new(InstrumentedEventStore {
            inner: MemoryEventStore::new(),
            appended: AtomicUsize::new(0),
            cancel_after: None,
            delay: std::time::Duration::from_millis(50),
        }),
        ..StorageFactory::in_memory()
    };
    let state = state_with(config, storage);
    let session_id = start(&state).await;
    let other_session = start(&state).await;
    let base = base_ms();

    let ingestion = state.ingestion.clone();
    let busy_session = session_id.clone();
    let events: Vec<RawEvent> = (0..6).map(|i| task_started(base + i * 100, &format!("t{i}"))).collect();
    let batch = tokio::spawn(async move {
        ingestion
            .submit_batch(&busy_session, entries(events), CancellationToken::new())
            .await
    });
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;

    let err = state
        .ingestion
        .submit_event(&session_id, task_started(base + 10_000, "late_comer"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Backpressure { .. }));
    assert!(err.is_retryable());

    // other sessions are not blocked
    let ack = state
        .ingestion
        .submit_event(&other_session, task_started(base, "t1"))
        .await
        .unwrap();
    assert_eq!(ack.status, EventStatus::Accepted);

    let summary = batch.await.unwrap().unwrap();
    assert_eq!(summary.accepted, 6);
}

// ============ Fusion ============

fn external(kind: SourceKind, raw_score: f64) -> EvidenceSource {
    EvidenceSource {
        skill: Skill::Empathy,
        kind,
        raw_score,
        normalized_score: 0.0,
        weight: 0.0,
        quality: QualityFlag::Normal,
        timestamp: Utc::now(),
        reference: None,
    }
}

#[tokio::test]
async fn test_fusion_redistributes_missing_rubric_weight() {
    let state = state(test_config());
    let assessment = state
        .assessment
        .fuse_assessment(FuseRequest {
            student_id: "student_1".into(),
            skill: Skill::Empathy,
            sources: vec![
                external(SourceKind::Behavioral, 0.8),
                external(SourceKind::Linguistic, 0.6),
            ],
            include_behavioral: false,
        })
        .await
        .unwrap();

    assert!((assessment.fused_score - 0.707).abs() < 1e-3);
    let weights: f64 = assessment.sources.iter().map(|s| s.weight).sum();
    assert!((weights - 1.0).abs() < 1e-9);
    assert!(assessment.sources.iter().all(|s| s.kind != SourceKind::Rubric));
    assert!(assessment.confidence < 1.0);
    assert!((0.0..=1.0).contains(&assessment.confidence));
}

#[tokio::test]
async fn test_fusion_uses_session_features() {
    let state = state(test_config());
    let session_id = start(&state).await;
    let base = base_ms();
    let choices: Vec<RawEvent> = (0..4)
        .map(|i| {
            let tags = if i < 3 { json!(["empathetic"]) } else { json!([]) };
            raw(
                "choice_made",
                base + i * 5_000,
                json!({ "mission_id": "m1", "choice_id": format!("c{i}"), "time_taken_sec": 2.0, "tags": tags }),
            )
        })
        .collect();
    state
        .ingestion
        .submit_batch(&session_id, entries(choices), CancellationToken::new())
        .await
        .unwrap();
    state
        .ingestion
        .complete_session(&session_id, None, vec![])
        .await
        .unwrap();

    let assessment = state
        .assessment
        .fuse_assessment(FuseRequest {
            student_id: "student_1".into(),
            skill: Skill::Empathy,
            sources: vec![external(SourceKind::Rubric, 4.0)],
            include_behavioral: true,
        })
        .await
        .unwrap();

    let behavioral = assessment
        .sources
        .iter()
        .find(|s| s.kind == SourceKind::Behavioral)
        .unwrap();
    assert_eq!(behavioral.raw_score, 0.75);
    assert_eq!(behavioral.reference.as_deref(), Some(session_id.as_str()));

    let latest = state.assessment.latest_assessments("student_1").await.unwrap();
    assert_eq!(latest.len(), 1);
}

#[tokio::test]
async fn test_fusion_without_evidence_is_refused() {
    let state = state(test_config());
    let err = state
        .assessment
        .fuse_assessment(FuseRequest {
            student_id: "student_1".into(),
            skill: Skill::Collaboration,
            sources: vec![],
            include_behavioral: true,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NoEvidence { .. }));
}
