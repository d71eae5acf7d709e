//! 内存仓储实现
//!
//! 持久化技术不在本服务范围内，这些实现满足仓储 trait 的全部约定，
//! 供服务进程和测试使用。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeMap;

use crate::models::evidence::{FusedAssessment, Skill};
use crate::models::feature::FeatureVector;
use crate::models::session::{Session, SessionStatus};
use crate::storage::repository::{
    AssessmentRepository, FeatureRepository, SessionRepository, StoreResult,
};

/// 内存会话仓储
#[derive(Debug, Default)]
pub struct MemorySessionRepository {
    sessions: DashMap<String, Session>,
}

impl MemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepository for MemorySessionRepository {
    async fn create(&self, session: &Session) -> StoreResult<()> {
        self.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> StoreResult<Option<Session>> {
        Ok(self.sessions.get(id).map(|s| s.value().clone()))
    }

    async fn update(&self, session: &Session) -> StoreResult<()> {
        self.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn list_by_student(
        &self,
        student_id: &str,
        status: Option<SessionStatus>,
        limit: usize,
    ) -> StoreResult<Vec<Session>> {
        let mut sessions: Vec<Session> = self
            .sessions
            .iter()
            .filter(|s| s.student_id == student_id)
            .filter(|s| status.is_none_or(|status| s.status == status))
            .map(|s| s.value().clone())
            .collect();
        sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at).then_with(|| a.id.cmp(&b.id)));
        sessions.truncate(limit);
        Ok(sessions)
    }

    async fn list_idle(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Session>> {
        Ok(self
            .sessions
            .iter()
            .filter(|s| s.status == SessionStatus::Active && s.last_activity_at < cutoff)
            .map(|s| s.value().clone())
            .collect())
    }
}

/// 内存特征仓储
#[derive(Debug, Default)]
pub struct MemoryFeatureRepository {
    /// session_id -> 提取历史
    vectors: DashMap<String, Vec<FeatureVector>>,
}

impl MemoryFeatureRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FeatureRepository for MemoryFeatureRepository {
    async fn append(&self, features: &FeatureVector) -> StoreResult<bool> {
        let mut history = self.vectors.entry(features.session_id.clone()).or_default();
        if let Some(latest) = history.last() {
            if features.event_count < latest.event_count {
                return Ok(false);
            }
        }
        history.push(features.clone());
        Ok(true)
    }

    async fn latest(&self, session_id: &str) -> StoreResult<Option<FeatureVector>> {
        Ok(self
            .vectors
            .get(session_id)
            .and_then(|history| history.last().cloned()))
    }

    async fn latest_by_student(&self, student_id: &str) -> StoreResult<Vec<FeatureVector>> {
        let mut latest: Vec<FeatureVector> = self
            .vectors
            .iter()
            .filter_map(|history| history.last().cloned())
            .filter(|v| v.student_id == student_id)
            .collect();
        latest.sort_by(|a, b| b.extracted_at.cmp(&a.extracted_at));
        Ok(latest)
    }

    async fn history(&self, session_id: &str) -> StoreResult<Vec<FeatureVector>> {
        Ok(self
            .vectors
            .get(session_id)
            .map(|history| history.value().clone())
            .unwrap_or_default())
    }
}

/// 内存评估仓储
#[derive(Debug, Default)]
pub struct MemoryAssessmentRepository {
    /// student_id -> 评估记录（追加顺序）
    assessments: DashMap<String, Vec<FusedAssessment>>,
}

impl MemoryAssessmentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AssessmentRepository for MemoryAssessmentRepository {
    async fn append(&self, assessment: &FusedAssessment) -> StoreResult<()> {
        self.assessments
            .entry(assessment.student_id.clone())
            .or_default()
            .push(assessment.clone());
        Ok(())
    }

    async fn latest_by_student(&self, student_id: &str) -> StoreResult<Vec<FusedAssessment>> {
        let Some(records) = self.assessments.get(student_id) else {
            return Ok(Vec::new());
        };

        let mut latest: BTreeMap<Skill, &FusedAssessment> = BTreeMap::new();
        for record in records.iter() {
            let newer = latest
                .get(&record.skill)
                .is_none_or(|current| record.generated_at >= current.generated_at);
            if newer {
                latest.insert(record.skill, record);
            }
        }
        Ok(latest.into_values().cloned().collect())
    }

    async fn history(
        &self,
        student_id: &str,
        skill: Skill,
        limit: usize,
    ) -> StoreResult<Vec<FusedAssessment>> {
        let mut records: Vec<FusedAssessment> = self
            .assessments
            .get(student_id)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.skill == skill)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        records.reverse();
        records.truncate(limit);
        Ok(records)
    }
}
