//! 行为特征向量

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;

/// 单个特征值
///
/// `NotApplicable` 序列化为 `null`，融合时被排除而不是按 0 计分。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FeatureValue {
    /// [0,1] 区间内的比率或分数
    Score(f64),
    /// 非负计数
    Count(u64),
    /// 非负时长（秒）
    Seconds(f64),
    /// 所需事件类型从未出现
    NotApplicable,
}

impl FeatureValue {
    /// 构造比率，分母为 0 时返回 NotApplicable
    pub fn ratio(numerator: f64, denominator: f64) -> Self {
        if denominator <= 0.0 {
            return FeatureValue::NotApplicable;
        }
        FeatureValue::score(numerator / denominator)
    }

    /// 构造分数并裁剪到 [0,1]
    pub fn score(value: f64) -> Self {
        if value.is_nan() {
            return FeatureValue::NotApplicable;
        }
        FeatureValue::Score(value.clamp(0.0, 1.0))
    }

    pub fn as_score(&self) -> Option<f64> {
        match self {
            FeatureValue::Score(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_applicable(&self) -> bool {
        !matches!(self, FeatureValue::NotApplicable)
    }
}

impl Serialize for FeatureValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FeatureValue::Score(v) | FeatureValue::Seconds(v) => serializer.serialize_f64(*v),
            FeatureValue::Count(n) => serializer.serialize_u64(*n),
            FeatureValue::NotApplicable => serializer.serialize_none(),
        }
    }
}

/// 特征质量标记
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    #[default]
    Normal,
    LowConfidence,
}

/// 异常检测结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Anomaly {
    /// 选择事件速率超过上限
    ChoiceRateExceeded { observed_per_sec: f64, ceiling_per_sec: f64 },
    /// 任务完成前没有对应的开始事件
    CompletionWithoutStart { task_id: String },
    /// 重试前没有对应的失败事件
    RetryWithoutFailure { task_id: String },
    /// 关卡完成前没有对应的关卡开始事件
    MissionCompletedWithoutStart { mission_id: String },
    /// 会话因不活跃超时结束
    SessionTimedOut,
}

/// 会话的行为特征向量
///
/// 派生数据，可由事件日志完全重建。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureVector {
    pub session_id: String,
    pub student_id: String,
    /// 特征名 -> 特征值
    pub features: BTreeMap<String, FeatureValue>,
    pub extracted_at: DateTime<Utc>,
    pub quality: QualityFlag,
    /// 触发低置信度的原因
    pub anomalies: Vec<Anomaly>,
    /// 参与计算的事件数
    pub event_count: usize,
    /// 参与计算的最大事件序号
    pub max_sequence: Option<u64>,
}

impl FeatureVector {
    pub fn get(&self, name: &str) -> Option<FeatureValue> {
        self.features.get(name).copied()
    }

    pub fn is_low_confidence(&self) -> bool {
        self.quality == QualityFlag::LowConfidence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio_with_zero_denominator_is_not_applicable() {
        assert_eq!(FeatureValue::ratio(3.0, 0.0), FeatureValue::NotApplicable);
        assert_eq!(FeatureValue::ratio(9.0, 10.0), FeatureValue::Score(0.9));
    }

    #[test]
    fn test_score_is_clipped() {
        assert_eq!(FeatureValue::score(1.7), FeatureValue::Score(1.0));
        assert_eq!(FeatureValue::score(-0.2), FeatureValue::Score(0.0));
        assert_eq!(FeatureValue::score(f64::NAN), FeatureValue::NotApplicable);
    }

    #[test]
    fn test_not_applicable_serializes_as_null() {
        let json = serde_json::to_value(FeatureValue::NotApplicable).unwrap();
        assert!(json.is_null());
        let json = serde_json::to_value(FeatureValue::Count(4)).unwrap();
        assert_eq!(json, serde_json::json!(4));
    }
}
