//! 技能评估服务
//!
//! 收集某学生某项技能的证据（外部提交的语言/量表分数，以及可选的由最新特征向量
//! 派生的行为证据），做新鲜度过滤后交给 [`FusionCombiner`]，结果追加写入。

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::ConfigHandle;
use crate::error::{AppError, Result};
use crate::ingest::RetryPolicy;
use crate::models::evidence::{EvidenceSource, FusedAssessment, Skill, SourceKind};
use crate::models::feature::FeatureVector;
use crate::observability::PipelineMetrics;
use crate::services::features::behavioral_feature_for;
use crate::services::fusion::FusionCombiner;
use crate::storage::StorageInstance;

/// 融合请求
#[derive(Debug, Clone, Deserialize)]
pub struct FuseRequest {
    pub student_id: String,
    pub skill: Skill,
    /// 外部通道提交的证据
    #[serde(default)]
    pub sources: Vec<EvidenceSource>,
    /// 是否从最新特征向量派生行为证据
    #[serde(default)]
    pub include_behavioral: bool,
}

/// 评估服务 trait
#[async_trait]
pub trait AssessmentService: Send + Sync {
    /// 融合证据并追加一条评估记录
    async fn fuse_assessment(&self, request: FuseRequest) -> Result<FusedAssessment>;

    /// 每项技能最新的一条评估
    async fn latest_assessments(&self, student_id: &str) -> Result<Vec<FusedAssessment>>;

    /// 某项技能的评估历史，最新在前
    async fn assessment_history(
        &self,
        student_id: &str,
        skill: Skill,
        limit: usize,
    ) -> Result<Vec<FusedAssessment>>;
}

/// 评估服务实现
pub struct AssessmentServiceImpl {
    storage: StorageInstance,
    config: Arc<ConfigHandle>,
    metrics: Arc<PipelineMetrics>,
}

impl AssessmentServiceImpl {
    pub fn new(storage: StorageInstance, config: Arc<ConfigHandle>, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            storage,
            config,
            metrics,
        }
    }

    fn check_sources(request: &FuseRequest) -> Result<()> {
        if request.student_id.trim().is_empty() {
            return Err(AppError::Validation("student_id must not be empty".into()));
        }
        for (index, source) in request.sources.iter().enumerate() {
            if source.skill != request.skill {
                return Err(AppError::Validation(format!(
                    "source {index} is for {} but the request is for {}",
                    source.skill, request.skill
                )));
            }
            if !source.raw_score.is_finite() {
                return Err(AppError::Validation(format!("source {index} has a non-finite score")));
            }
        }
        Ok(())
    }

    /// 取最近一个对该技能特征有分数的特征向量
    fn behavioral_source(skill: Skill, vectors: &[FeatureVector]) -> Option<EvidenceSource> {
        let feature = behavioral_feature_for(skill);
        vectors.iter().find_map(|vector| {
            let score = vector.get(feature)?.as_score()?;
            Some(EvidenceSource {
                skill,
                kind: SourceKind::Behavioral,
                raw_score: score,
                normalized_score: 0.0,
                weight: 0.0,
                quality: vector.quality,
                timestamp: vector.extracted_at,
                reference: Some(vector.session_id.clone()),
            })
        })
    }
}

#[async_trait]
impl AssessmentService for AssessmentServiceImpl {
    async fn fuse_assessment(&self, request: FuseRequest) -> Result<FusedAssessment> {
        Self::check_sources(&request)?;
        let config = self.config.snapshot();
        let retry = RetryPolicy::from(&config.pipeline.storage.retry);
        let now = Utc::now();

        let FuseRequest {
            student_id,
            skill,
            mut sources,
            include_behavioral,
        } = request;

        if include_behavioral {
            let vectors = retry
                .run("feature_latest_by_student", || {
                    self.storage.features.latest_by_student(&student_id)
                })
                .await?;
            match Self::behavioral_source(skill, &vectors) {
                Some(source) => sources.push(source),
                None => debug!(student_id = %student_id, skill = %skill, "No behavioral evidence available"),
            }
        }

        let combiner = FusionCombiner::new(config.pipeline.fusion.clone());
        let fresh = combiner.select_fresh(sources, now);
        let no_evidence = || AppError::NoEvidence {
            student_id: student_id.clone(),
            skill,
        };
        if fresh.is_empty() {
            return Err(no_evidence());
        }
        let assessment = combiner
            .fuse(&student_id, skill, fresh, now)
            .ok_or_else(no_evidence)?;

        retry
            .run("assessment_append", || self.storage.assessments.append(&assessment))
            .await?;
        PipelineMetrics::incr(&self.metrics.assessments_total);
        info!(
            student_id = %student_id,
            skill = %skill,
            score = assessment.fused_score,
            confidence = assessment.confidence,
            sources = assessment.sources.len(),
            "Assessment fused"
        );
        Ok(assessment)
    }

    async fn latest_assessments(&self, student_id: &str) -> Result<Vec<FusedAssessment>> {
        Ok(self.storage.assessments.latest_by_student(student_id).await?)
    }

    async fn assessment_history(
        &self,
        student_id: &str,
        skill: Skill,
        limit: usize,
    ) -> Result<Vec<FusedAssessment>> {
        Ok(self.storage.assessments.history(student_id, skill, limit).await?)
    }
}

/// 创建评估服务实例
pub fn create_assessment_service(
    storage: StorageInstance,
    config: Arc<ConfigHandle>,
    metrics: Arc<PipelineMetrics>,
) -> Box<dyn AssessmentService> {
    Box::new(AssessmentServiceImpl::new(storage, config, metrics))
}
