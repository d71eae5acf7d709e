//! 存储工厂模块
//!
//! 组装服务使用的全部存储实例。

use std::sync::Arc;

use crate::error::Result;
use crate::storage::event_store::{EventStore, MemoryEventStore};
use crate::storage::memory::{
    MemoryAssessmentRepository, MemoryFeatureRepository, MemorySessionRepository,
};
use crate::storage::repository::{AssessmentRepository, FeatureRepository, SessionRepository};

/// 存储实例集合
#[derive(Clone)]
pub struct StorageInstance {
    pub events: Arc<dyn EventStore>,
    pub sessions: Arc<dyn SessionRepository>,
    pub features: Arc<dyn FeatureRepository>,
    pub assessments: Arc<dyn AssessmentRepository>,
}

/// 存储工厂
pub struct StorageFactory;

impl StorageFactory {
    /// 创建内存存储实例
    pub fn in_memory() -> StorageInstance {
        StorageInstance {
            events: Arc::new(MemoryEventStore::new()),
            sessions: Arc::new(MemorySessionRepository::new()),
            features: Arc::new(MemoryFeatureRepository::new()),
            assessments: Arc::new(MemoryAssessmentRepository::new()),
        }
    }

    /// 检查存储是否可用
    pub async fn health_check(storage: &StorageInstance) -> Result<bool> {
        storage.events.ping().await?;
        Ok(true)
    }
}
