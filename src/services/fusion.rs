//! 多源证据融合
//!
//! 行为、语言、量表三个通道的分数先按各自量纲归一化，再按技能权重加权平均。
//! 缺失的通道不计 0 分，其权重按比例分给在场的通道。
//! 置信度 = min(一致度, 通道数对应的佐证上限)，行为证据低置信度时再乘惩罚系数。

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::config::FusionConfig;
use crate::models::evidence::{EvidenceSource, FusedAssessment, Skill, SourceKind};
use crate::models::feature::QualityFlag;

/// [0,1] 区间内方差的上界
const MAX_UNIT_VARIANCE: f64 = 0.25;

/// 证据融合器
#[derive(Debug, Clone)]
pub struct FusionCombiner {
    config: FusionConfig,
}

impl FusionCombiner {
    pub fn new(config: FusionConfig) -> Self {
        Self { config }
    }

    /// 过滤掉新鲜度窗口之外的证据
    pub fn select_fresh(&self, sources: Vec<EvidenceSource>, now: DateTime<Utc>) -> Vec<EvidenceSource> {
        let oldest = now - Duration::seconds(self.config.freshness_window_secs);
        sources
            .into_iter()
            .filter(|s| s.timestamp >= oldest)
            .collect()
    }

    /// 融合同一技能的证据
    ///
    /// 没有证据或全部权重为 0 时返回 `None`。
    pub fn fuse(
        &self,
        student_id: &str,
        skill: Skill,
        sources: Vec<EvidenceSource>,
        now: DateTime<Utc>,
    ) -> Option<FusedAssessment> {
        if sources.is_empty() {
            return None;
        }

        let weights = self.config.weights_for(skill);
        let mut per_kind: BTreeMap<SourceKind, usize> = BTreeMap::new();
        for source in &sources {
            *per_kind.entry(source.kind).or_default() += 1;
        }

        // 同一通道的多条证据平分该通道的权重
        let mut sources: Vec<EvidenceSource> = sources
            .into_iter()
            .map(|mut source| {
                let scale = self.config.scales.get(source.kind);
                source.normalized_score = scale.normalize(source.raw_score);
                source.weight = weights.get(source.kind) / per_kind[&source.kind] as f64;
                source
            })
            .collect();

        let total: f64 = sources.iter().map(|s| s.weight).sum();
        if total <= 0.0 || !total.is_finite() {
            return None;
        }
        for source in &mut sources {
            source.weight /= total;
        }

        let fused: f64 = sources.iter().map(|s| s.weight * s.normalized_score).sum();
        let variance: f64 = sources
            .iter()
            .map(|s| s.weight * (s.normalized_score - fused).powi(2))
            .sum();
        let agreement = 1.0 - variance / MAX_UNIT_VARIANCE;

        // 权重为 0 的通道不参与佐证，也不带来惩罚
        let contributing = || sources.iter().filter(|s| s.weight > 0.0);
        let channels: BTreeSet<SourceKind> = contributing().map(|s| s.kind).collect();
        let mut confidence = agreement.min(self.config.ceiling_for(channels.len()));
        let degraded = contributing()
            .any(|s| s.kind == SourceKind::Behavioral && s.quality == QualityFlag::LowConfidence);
        if degraded {
            confidence *= self.config.low_confidence_penalty;
        }

        sources.sort_by(|a, b| a.kind.cmp(&b.kind).then(a.timestamp.cmp(&b.timestamp)));

        debug!(
            "Fused {} sources for {}/{}: score={:.4}, confidence={:.4}",
            sources.len(),
            student_id,
            skill,
            fused,
            confidence
        );

        Some(FusedAssessment::new(
            student_id,
            skill,
            fused.clamp(0.0, 1.0),
            confidence.clamp(0.0, 1.0),
            sources,
            now,
        ))
    }
}
