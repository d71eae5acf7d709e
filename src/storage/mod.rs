//! 存储层模块
//!
//! 按会话分区的事件日志，以及会话、特征、评估三类仓储。

pub mod event_store;
pub mod factory;
pub mod memory;
pub mod repository;

pub use event_store::{AppendOutcome, EventStore, MemoryEventStore};
pub use factory::{StorageFactory, StorageInstance};
pub use memory::{MemoryAssessmentRepository, MemoryFeatureRepository, MemorySessionRepository};
pub use repository::{
    AssessmentRepository, FeatureRepository, SessionRepository, StoreError, StoreResult,
};
