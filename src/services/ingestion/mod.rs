//! 遥测接入服务
//!
//! 校验 → 去重/排序缓冲 → 事件存储 + 会话状态机 →（关卡/会话完成时）特征提取。
//! 同一会话的所有修改操作都在该会话的执行上下文内串行执行，不同会话互不阻塞。

pub mod context;
pub mod sweeper;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{AppConfig, ConfigHandle};
use crate::error::{AppError, Result};
use crate::ingest::{Admission, EventValidator, OrderingBuffer, PayloadRegistry, RejectReason, RetryPolicy};
use crate::models::event::{RawEvent, TelemetryEvent};
use crate::models::feature::FeatureVector;
use crate::models::session::{DeviceInfo, Session, SessionStatus};
use crate::observability::PipelineMetrics;
use crate::services::features::FeatureExtractor;
use crate::services::session::{SessionSignal, SessionStateMachine};
use crate::storage::{AppendOutcome, StorageInstance};

pub use context::{SessionContexts, SessionLease, SessionWorkspace};
pub use sweeper::spawn_inactivity_sweeper;

/// 单个事件的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Accepted,
    Duplicate,
}

/// 单事件确认
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventAck {
    pub session_id: String,
    pub status: EventStatus,
    /// 存储时分配的序号，重复事件没有序号
    pub sequence: Option<u64>,
    /// 是否在水位线之后到达
    pub late: bool,
}

/// 批次中被拒绝的事件
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedEvent {
    /// 批次内下标（从 0 开始）
    pub index: usize,
    pub category: String,
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

/// 批量提交结果
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub received: usize,
    pub accepted: usize,
    pub duplicates: usize,
    pub late: usize,
    pub rejected: Vec<RejectedEvent>,
    /// 调用方中途取消
    pub cancelled: bool,
    /// 取消时尚未处理的事件数
    pub unprocessed: usize,
}

impl BatchSummary {
    fn new(received: usize) -> Self {
        Self {
            received,
            ..Self::default()
        }
    }

    fn reject(&mut self, index: usize, reason: &RejectReason) {
        self.rejected.push(RejectedEvent {
            index,
            category: reason.category().to_string(),
            code: reason.code().to_string(),
            message: reason.to_string(),
            retryable: reason.retryable(),
        });
    }
}

/// 一次接入调用中需要在释放上下文前处理的后续动作
#[derive(Debug, Default)]
struct Triggers {
    mission_completed: bool,
    late_arrival: bool,
}

/// 遥测接入服务 trait
#[async_trait]
pub trait IngestionService: Send + Sync {
    /// 创建 active 会话
    async fn start_session(&self, student_id: &str, device_info: DeviceInfo) -> Result<Session>;

    /// 提交单个事件
    async fn submit_event(&self, session_id: &str, event: RawEvent) -> Result<EventAck>;

    /// 批量提交，单个事件失败不影响同批次已接受的事件
    ///
    /// 事件以原始 JSON 传入并逐条解码，格式错误按下标拒绝。
    async fn submit_batch(
        &self,
        session_id: &str,
        events: Vec<Value>,
        cancel: CancellationToken,
    ) -> Result<BatchSummary>;

    /// 结束会话并提取完整特征
    async fn complete_session(
        &self,
        session_id: &str,
        ended_at: Option<DateTime<Utc>>,
        missions_completed: Vec<String>,
    ) -> Result<Session>;

    /// 把超时不活跃的会话转为 incomplete，返回被转换的会话 ID
    async fn expire_inactive(&self, now: DateTime<Utc>) -> Result<Vec<String>>;

    async fn get_session(&self, session_id: &str) -> Result<Session>;

    async fn list_sessions(
        &self,
        student_id: &str,
        status: Option<SessionStatus>,
        limit: usize,
    ) -> Result<Vec<Session>>;

    /// 会话最新的特征向量
    async fn get_features(&self, session_id: &str) -> Result<FeatureVector>;

    /// 事件日志范围查询（闭区间）
    async fn get_events(
        &self,
        session_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<TelemetryEvent>>;
}

/// 遥测接入服务实现
pub struct IngestionServiceImpl {
    storage: StorageInstance,
    config: Arc<ConfigHandle>,
    registry: Arc<PayloadRegistry>,
    contexts: SessionContexts,
    metrics: Arc<PipelineMetrics>,
}

impl IngestionServiceImpl {
    pub fn new(
        storage: StorageInstance,
        config: Arc<ConfigHandle>,
        registry: Arc<PayloadRegistry>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            storage,
            config,
            registry,
            contexts: SessionContexts::new(),
            metrics,
        }
    }

    fn retry_policy(config: &AppConfig) -> RetryPolicy {
        RetryPolicy::from(&config.pipeline.storage.retry)
    }

    async fn lease(&self, session_id: &str, weight: usize, config: &AppConfig) -> Result<SessionLease> {
        let ingestion = &config.pipeline.ingestion;
        self.contexts
            .acquire(
                session_id,
                weight,
                ingestion.max_in_flight_events,
                std::time::Duration::from_millis(ingestion.lock_timeout_ms),
            )
            .await
            .map_err(|reason| {
                PipelineMetrics::incr(&self.metrics.backpressure_total);
                warn!(session_id = %session_id, "Session saturated: {}", reason);
                AppError::from(reason)
            })
    }

    /// 取出租约中的工作区，未加载时从存储重建
    ///
    /// 重建失败时槽位保留、工作区留空，由下一个持锁者重试；
    /// 排队中的任务与新请求因此始终共用同一把会话锁。
    async fn workspace<'l>(
        &self,
        lease: &'l mut SessionLease,
        session_id: &str,
        config: &AppConfig,
    ) -> Result<&'l mut SessionWorkspace> {
        let workspace = match lease.take() {
            Some(workspace) => workspace,
            None => match self.rehydrate(session_id, config).await {
                Ok(workspace) => workspace,
                Err(e) => {
                    if matches!(e, AppError::SessionNotFound(_)) {
                        self.contexts.remove(session_id);
                    }
                    return Err(e);
                }
            },
        };
        if workspace.session.status.is_terminal() {
            self.contexts.remove(session_id);
        }
        Ok(lease.insert(workspace))
    }

    /// 从会话表和事件日志重建工作区
    async fn rehydrate(&self, session_id: &str, config: &AppConfig) -> Result<SessionWorkspace> {
        let retry = Self::retry_policy(config);
        let session = retry
            .run("session_get", || self.storage.sessions.get_by_id(session_id))
            .await?
            .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))?;
        let events = retry
            .run("event_range", || self.storage.events.range(session_id, None, None))
            .await?;

        let mut workspace = SessionWorkspace {
            session,
            buffer: OrderingBuffer::new(config.pipeline.ingestion.lateness_window_ms),
            next_sequence: 1,
            features_computed: false,
        };
        for event in &events {
            workspace.buffer.mark_seen(event);
            SessionStateMachine::apply(&mut workspace.session, event);
            workspace.next_sequence = workspace.next_sequence.max(event.sequence + 1);
        }
        workspace.features_computed = retry
            .run("feature_latest", || self.storage.features.latest(session_id))
            .await?
            .is_some();

        debug!(
            session_id = %session_id,
            events = events.len(),
            next_sequence = workspace.next_sequence,
            "Rehydrated session workspace"
        );
        Ok(workspace)
    }

    /// 在会话上下文内处理一个事件
    async fn ingest_one(
        &self,
        workspace: &mut SessionWorkspace,
        raw: &RawEvent,
        config: &AppConfig,
        validator: &EventValidator,
        triggers: &mut Triggers,
    ) -> std::result::Result<EventAck, RejectReason> {
        PipelineMetrics::incr(&self.metrics.events_received);
        let result = self.store_and_release(workspace, raw, config, validator, triggers).await;
        match &result {
            Ok(ack) if ack.status == EventStatus::Duplicate => {
                PipelineMetrics::incr(&self.metrics.events_duplicate);
            }
            Ok(ack) => {
                PipelineMetrics::incr(&self.metrics.events_accepted);
                if ack.late {
                    PipelineMetrics::incr(&self.metrics.events_late);
                }
            }
            Err(_) => PipelineMetrics::incr(&self.metrics.events_rejected),
        }
        result
    }

    async fn store_and_release(
        &self,
        workspace: &mut SessionWorkspace,
        raw: &RawEvent,
        config: &AppConfig,
        validator: &EventValidator,
        triggers: &mut Triggers,
    ) -> std::result::Result<EventAck, RejectReason> {
        let now = Utc::now();
        let session_id = workspace.session.id.clone();
        let mut event = validator.validate(&session_id, Some(&workspace.session), raw, now)?;

        let duplicate = EventAck {
            session_id: session_id.clone(),
            status: EventStatus::Duplicate,
            sequence: None,
            late: false,
        };
        if workspace.buffer.has_seen(&event.dedup_key()) {
            debug!(session_id = %session_id, event_type = %event.event_type, "Duplicate event discarded");
            return Ok(duplicate);
        }

        event.sequence = workspace.next_sequence;
        event.late = workspace
            .buffer
            .watermark()
            .is_some_and(|watermark| event.timestamp < watermark);

        let mut attempts = 0u64;
        let appended = Self::retry_policy(config)
            .run("event_append", || {
                attempts += 1;
                self.storage.events.append(&event)
            })
            .await;
        PipelineMetrics::add(&self.metrics.store_retries, attempts.saturating_sub(1));

        match appended {
            Err(e) => {
                error!(
                    session_id = %session_id,
                    attempts,
                    "Event store unavailable, acknowledgment failed: {}",
                    e
                );
                return Err(RejectReason::StoreUnavailable {
                    message: e.to_string(),
                });
            }
            Ok(AppendOutcome::Duplicate) => {
                workspace.buffer.mark_seen(&event);
                return Ok(duplicate);
            }
            Ok(AppendOutcome::Appended) => {}
        }

        let ack = EventAck {
            session_id,
            status: EventStatus::Accepted,
            sequence: Some(event.sequence),
            late: event.late,
        };
        workspace.next_sequence += 1;
        workspace.session.touch(now);

        if let Admission::Late(late) = workspace.buffer.admit(event) {
            debug!(
                session_id = %ack.session_id,
                sequence = late.sequence,
                "Late event inserted behind the watermark"
            );
            triggers.late_arrival = true;
            if SessionStateMachine::apply(&mut workspace.session, &late).is_some() {
                triggers.mission_completed = true;
            }
        }
        for released in workspace.buffer.drain() {
            if let Some(SessionSignal::MissionCompleted { mission_id }) =
                SessionStateMachine::apply(&mut workspace.session, &released)
            {
                debug!(session_id = %ack.session_id, mission_id = %mission_id, "Mission completed");
                triggers.mission_completed = true;
            }
        }

        Ok(ack)
    }

    /// 释放上下文前的收尾：按触发条件重新提取特征并持久化会话
    async fn finish_ingest(&self, workspace: &mut SessionWorkspace, triggers: Triggers, config: &AppConfig) {
        if triggers.mission_completed || (triggers.late_arrival && workspace.features_computed) {
            self.extract_released(workspace, config).await;
        }
        if let Err(e) = self.persist_session(&workspace.session, config).await {
            // 事件已经落盘，会话进度可以从事件日志重建
            warn!(session_id = %workspace.session.id, "Failed to persist session progress: {}", e);
        }
    }

    /// 对水位线之前（已释放）的事件做中间提取
    async fn extract_released(&self, workspace: &mut SessionWorkspace, config: &AppConfig) {
        let Some(watermark) = workspace.buffer.watermark() else {
            return;
        };
        let session_id = workspace.session.id.clone();
        let events = Self::retry_policy(config)
            .run("event_range", || {
                self.storage.events.range(&session_id, None, Some(watermark))
            })
            .await;
        match events {
            Ok(events) => {
                self.store_features(workspace, &events, false, config).await;
            }
            Err(e) => error!(session_id = %session_id, "Interim feature extraction skipped: {}", e),
        }
    }

    /// 对会话全部事件做最终提取
    async fn extract_all(&self, workspace: &mut SessionWorkspace, timed_out: bool, config: &AppConfig) {
        let session_id = workspace.session.id.clone();
        let events = Self::retry_policy(config)
            .run("event_range", || self.storage.events.range(&session_id, None, None))
            .await;
        match events {
            Ok(events) => {
                self.store_features(workspace, &events, timed_out, config).await;
            }
            Err(e) => error!(session_id = %session_id, "Final feature extraction skipped: {}", e),
        }
    }

    async fn store_features(
        &self,
        workspace: &mut SessionWorkspace,
        events: &[TelemetryEvent],
        timed_out: bool,
        config: &AppConfig,
    ) {
        let extractor = FeatureExtractor::new(config.pipeline.features.clone());
        let vector = extractor.extract(&workspace.session, events, timed_out, Utc::now());
        let stored = Self::retry_policy(config)
            .run("feature_append", || self.storage.features.append(&vector))
            .await;
        match stored {
            Ok(true) => {
                workspace.features_computed = true;
                PipelineMetrics::incr(&self.metrics.feature_extractions);
                info!(
                    session_id = %vector.session_id,
                    events = vector.event_count,
                    quality = ?vector.quality,
                    "Feature vector stored"
                );
            }
            Ok(false) => debug!(
                session_id = %vector.session_id,
                events = vector.event_count,
                "Feature vector covers fewer events than the latest one, not stored"
            ),
            Err(e) => error!(session_id = %vector.session_id, "Failed to store feature vector: {}", e),
        }
    }

    async fn persist_session(&self, session: &Session, config: &AppConfig) -> Result<()> {
        Self::retry_policy(config)
            .run("session_update", || self.storage.sessions.update(session))
            .await?;
        Ok(())
    }

    /// 在会话上下文内完成超时转换，会话已不满足条件时返回 false
    async fn expire_one(&self, session_id: &str, cutoff: DateTime<Utc>, config: &AppConfig) -> Result<bool> {
        let mut lease = self.lease(session_id, 1, config).await?;
        let workspace = self.workspace(&mut lease, session_id, config).await?;
        if workspace.session.status.is_terminal() || workspace.session.last_activity_at >= cutoff {
            return Ok(false);
        }

        for event in workspace.buffer.flush() {
            SessionStateMachine::apply(&mut workspace.session, &event);
        }
        let mut expired = workspace.session.clone();
        SessionStateMachine::expire(&mut expired)?;
        self.persist_session(&expired, config).await?;
        workspace.session = expired;

        self.extract_all(workspace, true, config).await;
        PipelineMetrics::incr(&self.metrics.sessions_incomplete);
        drop(lease);
        self.contexts.remove(session_id);
        Ok(true)
    }

    async fn require_session(&self, session_id: &str) -> Result<Session> {
        let config = self.config.snapshot();
        Self::retry_policy(&config)
            .run("session_get", || self.storage.sessions.get_by_id(session_id))
            .await?
            .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))
    }
}

#[async_trait]
impl IngestionService for IngestionServiceImpl {
    async fn start_session(&self, student_id: &str, device_info: DeviceInfo) -> Result<Session> {
        let student_id = student_id.trim();
        if student_id.is_empty() {
            return Err(AppError::Validation("student_id must not be empty".into()));
        }

        let config = self.config.snapshot();
        let session = SessionStateMachine::start(student_id, device_info, Utc::now());
        Self::retry_policy(&config)
            .run("session_create", || self.storage.sessions.create(&session))
            .await?;

        PipelineMetrics::incr(&self.metrics.sessions_started);
        info!(session_id = %session.id, student_id = %student_id, "Session started");
        Ok(session)
    }

    async fn submit_event(&self, session_id: &str, event: RawEvent) -> Result<EventAck> {
        let config = self.config.snapshot();
        let mut lease = self.lease(session_id, 1, &config).await?;
        let workspace = self.workspace(&mut lease, session_id, &config).await?;

        let validator = EventValidator::new(
            self.registry.clone(),
            config.pipeline.ingestion.future_tolerance_ms,
        );
        let mut triggers = Triggers::default();
        let result = self
            .ingest_one(workspace, &event, &config, &validator, &mut triggers)
            .await;
        if result.is_ok() {
            self.finish_ingest(workspace, triggers, &config).await;
        }
        Ok(result?)
    }

    async fn submit_batch(
        &self,
        session_id: &str,
        events: Vec<Value>,
        cancel: CancellationToken,
    ) -> Result<BatchSummary> {
        let config = self.config.snapshot();
        let received = events.len();
        let max_batch_size = config.pipeline.ingestion.max_batch_size;
        if received > max_batch_size {
            return Err(AppError::Validation(format!(
                "batch of {} events exceeds the limit of {}",
                received, max_batch_size
            )));
        }

        let mut lease = tokio::select! {
            lease = self.lease(session_id, received.max(1), &config) => lease?,
            _ = cancel.cancelled() => {
                return Err(AppError::Cancelled(format!("batch for session {session_id}")));
            }
        };
        let workspace = self.workspace(&mut lease, session_id, &config).await?;
        if workspace.session.status.is_terminal() {
            return Err(AppError::SessionTerminal {
                session_id: session_id.to_string(),
                status: workspace.session.status,
            });
        }

        let validator = EventValidator::new(
            self.registry.clone(),
            config.pipeline.ingestion.future_tolerance_ms,
        );
        let mut summary = BatchSummary::new(received);
        let mut triggers = Triggers::default();

        for (index, entry) in events.into_iter().enumerate() {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                summary.unprocessed = received - index;
                info!(
                    session_id = %session_id,
                    processed = index,
                    "Batch cancelled by caller"
                );
                break;
            }

            let raw = match EventValidator::decode(entry) {
                Ok(raw) => raw,
                Err(reason) => {
                    PipelineMetrics::incr(&self.metrics.events_received);
                    PipelineMetrics::incr(&self.metrics.events_rejected);
                    summary.reject(index, &reason);
                    continue;
                }
            };

            match self
                .ingest_one(workspace, &raw, &config, &validator, &mut triggers)
                .await
            {
                Ok(ack) if ack.status == EventStatus::Duplicate => summary.duplicates += 1,
                Ok(ack) => {
                    summary.accepted += 1;
                    if ack.late {
                        summary.late += 1;
                    }
                }
                Err(reason @ RejectReason::StoreUnavailable { .. }) => {
                    // 剩余事件不再尝试，全部标记为可重试
                    for rest in index..received {
                        summary.reject(rest, &reason);
                    }
                    break;
                }
                Err(reason) => summary.reject(index, &reason),
            }
        }

        self.finish_ingest(workspace, triggers, &config).await;
        info!(
            session_id = %session_id,
            received = summary.received,
            accepted = summary.accepted,
            duplicates = summary.duplicates,
            rejected = summary.rejected.len(),
            "Batch processed"
        );
        Ok(summary)
    }

    async fn complete_session(
        &self,
        session_id: &str,
        ended_at: Option<DateTime<Utc>>,
        missions_completed: Vec<String>,
    ) -> Result<Session> {
        let config = self.config.snapshot();
        let mut lease = self.lease(session_id, 1, &config).await?;
        let workspace = self.workspace(&mut lease, session_id, &config).await?;

        let ended_at = ended_at.unwrap_or_else(Utc::now);
        SessionStateMachine::ensure_completable(&workspace.session, ended_at)?;

        for event in workspace.buffer.flush() {
            SessionStateMachine::apply(&mut workspace.session, &event);
        }
        let mut completed = workspace.session.clone();
        SessionStateMachine::complete(&mut completed, ended_at, &missions_completed)?;
        self.persist_session(&completed, &config).await?;
        workspace.session = completed;

        self.extract_all(workspace, false, &config).await;
        let session = workspace.session.clone();
        drop(lease);
        self.contexts.remove(session_id);

        PipelineMetrics::incr(&self.metrics.sessions_completed);
        info!(
            session_id = %session_id,
            playtime_sec = session.total_playtime_sec,
            missions = session.completed_missions(),
            "Session completed"
        );
        Ok(session)
    }

    async fn expire_inactive(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let config = self.config.snapshot();
        let timeout = Duration::seconds(config.pipeline.ingestion.inactivity_timeout_secs as i64);
        let cutoff = now - timeout;
        let idle = Self::retry_policy(&config)
            .run("session_list_idle", || self.storage.sessions.list_idle(cutoff))
            .await?;

        let mut expired = Vec::new();
        for candidate in idle {
            match self.expire_one(&candidate.id, cutoff, &config).await {
                Ok(true) => expired.push(candidate.id),
                Ok(false) => {}
                Err(e) => warn!(session_id = %candidate.id, "Failed to expire session: {}", e),
            }
        }

        if !expired.is_empty() {
            info!(count = expired.len(), "Expired inactive sessions");
        }
        Ok(expired)
    }

    async fn get_session(&self, session_id: &str) -> Result<Session> {
        self.require_session(session_id).await
    }

    async fn list_sessions(
        &self,
        student_id: &str,
        status: Option<SessionStatus>,
        limit: usize,
    ) -> Result<Vec<Session>> {
        let config = self.config.snapshot();
        let sessions = Self::retry_policy(&config)
            .run("session_list", || {
                self.storage.sessions.list_by_student(student_id, status, limit)
            })
            .await?;
        Ok(sessions)
    }

    async fn get_features(&self, session_id: &str) -> Result<FeatureVector> {
        self.require_session(session_id).await?;
        self.storage
            .features
            .latest(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("no feature vector for session {session_id}")))
    }

    async fn get_events(
        &self,
        session_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<TelemetryEvent>> {
        self.require_session(session_id).await?;
        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                return Err(AppError::Validation("`from` must not be after `to`".into()));
            }
        }
        Ok(self.storage.events.range(session_id, from, to).await?)
    }
}

/// 创建接入服务实例
pub fn create_ingestion_service(
    storage: StorageInstance,
    config: Arc<ConfigHandle>,
    registry: Arc<PayloadRegistry>,
    metrics: Arc<PipelineMetrics>,
) -> Box<dyn IngestionService> {
    Box::new(IngestionServiceImpl::new(storage, config, registry, metrics))
}
