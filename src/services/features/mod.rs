//! 行为特征提取
//!
//! 把一个会话的有序事件流折叠成 [`FeatureVector`]。提取是纯函数：
//! 同一组事件（按时间戳、序号排序后）总是得到相同的特征值。

pub mod anomaly;
pub mod calculators;

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::debug;

use crate::config::FeatureConfig;
use crate::models::evidence::Skill;
use crate::models::feature::{Anomaly, FeatureValue, FeatureVector, QualityFlag};
use crate::models::session::Session;
use crate::models::event::TelemetryEvent;

pub use anomaly::AnomalyDetector;
use calculators::*;

/// 每项技能对应的行为特征
pub fn behavioral_feature_for(skill: Skill) -> &'static str {
    match skill {
        Skill::Empathy => EMPATHETIC_CHOICE_RATE,
        Skill::Collaboration => DELEGATION_FAIRNESS,
        Skill::ProblemSolving => TASK_COMPLETION_RATE,
        Skill::Resilience => PERSISTENCE_SCORE,
        Skill::Adaptability => FLEXIBILITY_SCORE,
        Skill::SelfRegulation => DISTRACTION_RESISTANCE,
    }
}

/// 特征提取器
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    config: FeatureConfig,
}

impl FeatureExtractor {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    /// 从事件中提取特征向量
    ///
    /// `timed_out` 为 true 时会话因不活跃结束，结果标记为低置信度。
    pub fn extract(
        &self,
        session: &Session,
        events: &[TelemetryEvent],
        timed_out: bool,
        now: DateTime<Utc>,
    ) -> FeatureVector {
        let mut ordered: Vec<&TelemetryEvent> = events.iter().collect();
        ordered.sort_by_key(|e| e.order_key());
        let events = ordered.as_slice();

        let config = &self.config;
        let features: BTreeMap<String, FeatureValue> = [
            (TASK_COMPLETION_RATE, task_completion_rate(events)),
            (RETRY_COUNT, retry_count(events)),
            (RECOVERY_TIME_AVG, recovery_time_avg(events)),
            (PERSISTENCE_SCORE, persistence_score(events)),
            (STRATEGY_SWITCHING_COUNT, strategy_switching_count(events)),
            (FLEXIBILITY_SCORE, flexibility_score(events, config)),
            (DELEGATION_FAIRNESS, delegation_fairness(events)),
            (DISTRACTION_RESISTANCE, distraction_resistance(events, config)),
            (EMPATHETIC_CHOICE_RATE, empathetic_choice_rate(events, config)),
            (HELP_REQUEST_COUNT, help_request_count(events)),
            (DIALOGUE_REREAD_COUNT, dialogue_reread_count(events)),
        ]
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect();

        let mut anomalies = AnomalyDetector::new(config).detect(events);
        if timed_out {
            anomalies.push(Anomaly::SessionTimedOut);
        }
        let quality = if anomalies.is_empty() {
            QualityFlag::Normal
        } else {
            QualityFlag::LowConfidence
        };

        debug!(
            "Extracted {} features for session {} from {} events ({:?})",
            features.len(),
            session.id,
            events.len(),
            quality
        );

        FeatureVector {
            session_id: session.id.clone(),
            student_id: session.student_id.clone(),
            features,
            extracted_at: now,
            quality,
            anomalies,
            event_count: events.len(),
            max_sequence: events.iter().map(|e| e.sequence).max(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::{EventPayload, EventType};
    use crate::models::session::DeviceInfo;

    fn event(seq: u64, ms: i64, event_type: EventType, payload: EventPayload) -> TelemetryEvent {
        TelemetryEvent {
            session_id: "s1".into(),
            event_type,
            timestamp: DateTime::from_timestamp_millis(ms).unwrap(),
            payload,
            payload_hash: format!("h{seq}"),
            sequence: seq,
            received_at: Utc::now(),
            late: false,
        }
    }

    fn task_events() -> Vec<TelemetryEvent> {
        let started = |seq, ms, id: &str| {
            event(
                seq,
                ms,
                EventType::TaskStarted,
                EventPayload::TaskStarted {
                    task_id: id.into(),
                    role: None,
                },
            )
        };
        let completed = |seq, ms, id: &str| {
            event(
                seq,
                ms,
                EventType::TaskCompleted,
                EventPayload::TaskCompleted {
                    task_id: id.into(),
                    completion_time_sec: 2.0,
                },
            )
        };
        vec![
            completed(4, 4_000, "t2"),
            started(1, 1_000, "t1"),
            completed(2, 2_000, "t1"),
            started(3, 3_000, "t2"),
        ]
    }

    fn session() -> Session {
        let mut session = Session::new("student_1", DeviceInfo::default(), Utc::now());
        session.id = "s1".into();
        session
    }

    #[test]
    fn test_extract_is_order_independent_and_deterministic() {
        let extractor = FeatureExtractor::new(FeatureConfig::default());
        let now = Utc::now();
        let events = task_events();
        let mut reversed = events.clone();
        reversed.reverse();

        let a = extractor.extract(&session(), &events, false, now);
        let b = extractor.extract(&session(), &reversed, false, now);
        assert_eq!(a.features, b.features);
        assert_eq!(a.get(TASK_COMPLETION_RATE), Some(FeatureValue::Score(1.0)));
        assert_eq!(a.event_count, 4);
        assert_eq!(a.max_sequence, Some(4));
        assert_eq!(a.quality, QualityFlag::Normal);
    }

    #[test]
    fn test_every_feature_is_present() {
        let extractor = FeatureExtractor::new(FeatureConfig::default());
        let vector = extractor.extract(&session(), &[], false, Utc::now());
        assert_eq!(vector.features.len(), 11);
        assert!(vector.features.values().all(|v| !v.is_applicable()));
        assert_eq!(vector.max_sequence, None);
    }

    #[test]
    fn test_timed_out_session_is_low_confidence() {
        let extractor = FeatureExtractor::new(FeatureConfig::default());
        let vector = extractor.extract(&session(), &task_events(), true, Utc::now());
        assert!(vector.is_low_confidence());
        assert_eq!(vector.anomalies, vec![Anomaly::SessionTimedOut]);
    }

    #[test]
    fn test_every_skill_maps_to_an_extracted_feature() {
        let extractor = FeatureExtractor::new(FeatureConfig::default());
        let vector = extractor.extract(&session(), &[], false, Utc::now());
        for skill in Skill::ALL {
            assert!(vector.features.contains_key(behavioral_feature_for(skill)));
        }
    }
}
