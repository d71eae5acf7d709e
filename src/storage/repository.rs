use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::evidence::{FusedAssessment, Skill};
use crate::models::feature::FeatureVector;
use crate::models::session::{Session, SessionStatus};

/// 存储层错误（均视为暂时性故障）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store operation timed out: {0}")]
    Timeout(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// 会话仓储 trait
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// 创建会话
    async fn create(&self, session: &Session) -> StoreResult<()>;

    /// 根据 ID 获取会话
    async fn get_by_id(&self, id: &str) -> StoreResult<Option<Session>>;

    /// 整体覆盖更新
    async fn update(&self, session: &Session) -> StoreResult<()>;

    /// 按学生列出会话，按开始时间倒序
    async fn list_by_student(
        &self,
        student_id: &str,
        status: Option<SessionStatus>,
        limit: usize,
    ) -> StoreResult<Vec<Session>>;

    /// 最后活跃时间早于 `cutoff` 的进行中会话
    async fn list_idle(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Session>>;
}

/// 特征向量仓储 trait
///
/// 追加写；同一会话的记录覆盖的事件数只增不减。
#[async_trait]
pub trait FeatureRepository: Send + Sync {
    /// 追加特征向量，覆盖事件数少于最新记录时拒绝并返回 `false`
    async fn append(&self, features: &FeatureVector) -> StoreResult<bool>;

    /// 会话最新的特征向量
    async fn latest(&self, session_id: &str) -> StoreResult<Option<FeatureVector>>;

    /// 学生每个会话的最新特征向量，按提取时间倒序
    async fn latest_by_student(&self, student_id: &str) -> StoreResult<Vec<FeatureVector>>;

    /// 会话全部提取历史，按写入顺序
    async fn history(&self, session_id: &str) -> StoreResult<Vec<FeatureVector>>;
}

/// 融合评估仓储 trait
#[async_trait]
pub trait AssessmentRepository: Send + Sync {
    async fn append(&self, assessment: &FusedAssessment) -> StoreResult<()>;

    /// 学生每项技能的最新评估
    async fn latest_by_student(&self, student_id: &str) -> StoreResult<Vec<FusedAssessment>>;

    /// 学生某项技能的评估历史，最新在前
    async fn history(
        &self,
        student_id: &str,
        skill: Skill,
        limit: usize,
    ) -> StoreResult<Vec<FusedAssessment>>;
}
