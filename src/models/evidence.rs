//! 证据来源与融合评估模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::feature::QualityFlag;

/// 被测量的非学业技能
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Skill {
    Empathy,
    Collaboration,
    ProblemSolving,
    Resilience,
    Adaptability,
    SelfRegulation,
}

impl Skill {
    pub const ALL: [Skill; 6] = [
        Skill::Empathy,
        Skill::Collaboration,
        Skill::ProblemSolving,
        Skill::Resilience,
        Skill::Adaptability,
        Skill::SelfRegulation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Skill::Empathy => "empathy",
            Skill::Collaboration => "collaboration",
            Skill::ProblemSolving => "problem_solving",
            Skill::Resilience => "resilience",
            Skill::Adaptability => "adaptability",
            Skill::SelfRegulation => "self_regulation",
        }
    }
}

impl std::str::FromStr for Skill {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Skill::ALL
            .iter()
            .find(|skill| skill.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown skill: {}", s))
    }
}

impl std::fmt::Display for Skill {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 证据通道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// 游戏遥测行为特征
    Behavioral,
    /// 课堂转录语言分析
    Linguistic,
    /// 教师评分量表
    Rubric,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [
        SourceKind::Behavioral,
        SourceKind::Linguistic,
        SourceKind::Rubric,
    ];
}

/// 原始分数的量纲
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreScale {
    pub min: f64,
    pub max: f64,
}

impl ScoreScale {
    pub const UNIT: ScoreScale = ScoreScale { min: 0.0, max: 1.0 };

    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// 线性归一化到 [0,1]
    pub fn normalize(&self, raw: f64) -> f64 {
        let span = self.max - self.min;
        if span <= 0.0 || raw.is_nan() {
            return 0.0;
        }
        ((raw - self.min) / span).clamp(0.0, 1.0)
    }

    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.max > self.min
    }
}

/// 某个通道对某项技能的一次打分
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceSource {
    pub skill: Skill,
    pub kind: SourceKind,
    /// 通道自身量纲下的原始分
    pub raw_score: f64,
    /// 归一化分数
    #[serde(default)]
    pub normalized_score: f64,
    /// 归一化后的融合权重（只在融合结果中填写）
    #[serde(default)]
    pub weight: f64,
    /// 行为通道的特征质量
    #[serde(default)]
    pub quality: QualityFlag,
    pub timestamp: DateTime<Utc>,
    /// 来源引用（会话 ID、量表记录 ID 等）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

/// 融合评估结果，追加写入、不可变
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusedAssessment {
    pub id: String,
    pub student_id: String,
    pub skill: Skill,
    pub fused_score: f64,
    pub confidence: f64,
    /// 参与融合的证据，按通道排序
    pub sources: Vec<EvidenceSource>,
    pub generated_at: DateTime<Utc>,
}

impl FusedAssessment {
    pub fn new(
        student_id: &str,
        skill: Skill,
        fused_score: f64,
        confidence: f64,
        sources: Vec<EvidenceSource>,
        generated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            student_id: student_id.to_string(),
            skill,
            fused_score,
            confidence,
            sources,
            generated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ScoreScale::UNIT, 0.4, 0.4)]
    #[case(ScoreScale::new(1.0, 4.0), 4.0, 1.0)]
    #[case(ScoreScale::new(1.0, 4.0), 2.5, 0.5)]
    #[case(ScoreScale::new(0.0, 100.0), 130.0, 1.0)]
    #[case(ScoreScale::new(0.0, 100.0), -5.0, 0.0)]
    fn test_scale_normalize(#[case] scale: ScoreScale, #[case] raw: f64, #[case] expected: f64) {
        assert!((scale.normalize(raw) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_skill_parse() {
        assert_eq!("self_regulation".parse::<Skill>().unwrap(), Skill::SelfRegulation);
        assert!("charisma".parse::<Skill>().is_err());
    }
}
