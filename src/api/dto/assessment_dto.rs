//! 评估 DTO

use serde::Deserialize;
use validator::Validate;

use crate::models::evidence::{EvidenceSource, Skill};
use crate::services::assessment::FuseRequest;

/// 融合请求
#[derive(Debug, Deserialize, Validate)]
pub struct FuseAssessmentRequest {
    #[validate(length(min = 1, max = 128))]
    pub student_id: String,
    pub skill: Skill,
    #[serde(default)]
    #[validate(length(max = 64))]
    pub sources: Vec<EvidenceSource>,
    /// 缺省时从最新特征向量派生行为证据
    #[serde(default = "default_include_behavioral")]
    pub include_behavioral: bool,
}

fn default_include_behavioral() -> bool {
    true
}

impl From<FuseAssessmentRequest> for FuseRequest {
    fn from(request: FuseAssessmentRequest) -> Self {
        FuseRequest {
            student_id: request.student_id,
            skill: request.skill,
            sources: request.sources,
            include_behavioral: request.include_behavioral,
        }
    }
}

/// 评估历史查询参数
#[derive(Debug, Deserialize)]
pub struct AssessmentQuery {
    /// 指定技能时返回该技能的历史，否则返回每项技能的最新评估
    pub skill: Option<Skill>,
    pub limit: Option<usize>,
}
