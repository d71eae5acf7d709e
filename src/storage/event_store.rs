//! 事件存储
//!
//! 按会话分区的追加写事件日志。分区之间互不加锁，
//! 同一分区内按 (时间戳, 序号) 有序，迟到事件插入到正确位置。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;

use crate::models::event::{DedupKey, TelemetryEvent};
use crate::storage::repository::StoreResult;

/// 追加结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// 去重键已存在，未写入
    Duplicate,
}

/// 事件存储 trait
#[async_trait]
pub trait EventStore: Send + Sync {
    /// 追加事件，去重键冲突时返回 `Duplicate`
    async fn append(&self, event: &TelemetryEvent) -> StoreResult<AppendOutcome>;

    /// 会话内时间范围查询（闭区间），按 (时间戳, 序号) 排序
    async fn range(
        &self,
        session_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<TelemetryEvent>>;

    /// 会话事件数
    async fn count(&self, session_id: &str) -> StoreResult<usize>;

    /// 存储是否可用
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Partition {
    events: Vec<TelemetryEvent>,
    keys: HashSet<DedupKey>,
}

/// 内存事件存储
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    partitions: DashMap<String, Arc<RwLock<Partition>>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn partition(&self, session_id: &str) -> Arc<RwLock<Partition>> {
        self.partitions
            .entry(session_id.to_string())
            .or_default()
            .value()
            .clone()
    }

    fn existing(&self, session_id: &str) -> Option<Arc<RwLock<Partition>>> {
        self.partitions.get(session_id).map(|p| p.value().clone())
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append(&self, event: &TelemetryEvent) -> StoreResult<AppendOutcome> {
        let partition = self.partition(&event.session_id);
        let mut partition = partition.write();

        if !partition.keys.insert(event.dedup_key()) {
            return Ok(AppendOutcome::Duplicate);
        }

        let key = event.order_key();
        let position = partition.events.partition_point(|e| e.order_key() <= key);
        partition.events.insert(position, event.clone());
        Ok(AppendOutcome::Appended)
    }

    async fn range(
        &self,
        session_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<TelemetryEvent>> {
        let Some(partition) = self.existing(session_id) else {
            return Ok(Vec::new());
        };
        let partition = partition.read();

        let start = match from {
            Some(from) => partition.events.partition_point(|e| e.timestamp < from),
            None => 0,
        };
        let end = match to {
            Some(to) => partition.events.partition_point(|e| e.timestamp <= to),
            None => partition.events.len(),
        };
        if start >= end {
            return Ok(Vec::new());
        }
        Ok(partition.events[start..end].to_vec())
    }

    async fn count(&self, session_id: &str) -> StoreResult<usize> {
        Ok(self
            .existing(session_id)
            .map(|p| p.read().events.len())
            .unwrap_or(0))
    }
}
