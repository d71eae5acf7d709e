//! 异常检测
//!
//! 事件速率超过物理上合理的上限，或因果顺序在排序缓冲修复后仍然不成立时，
//! 把会话标记为低置信度。异常不阻断处理，只降低融合置信度。

use std::collections::HashSet;

use crate::config::FeatureConfig;
use crate::models::event::{EventPayload, EventType, TelemetryEvent};
use crate::models::feature::Anomaly;

pub struct AnomalyDetector<'a> {
    config: &'a FeatureConfig,
}

impl<'a> AnomalyDetector<'a> {
    pub fn new(config: &'a FeatureConfig) -> Self {
        Self { config }
    }

    pub fn detect(&self, events: &[&TelemetryEvent]) -> Vec<Anomaly> {
        let mut anomalies = Vec::new();
        if let Some(rate) = self.choice_rate_violation(events) {
            anomalies.push(rate);
        }
        anomalies.extend(causal_violations(events));
        anomalies
    }

    /// 选择事件数 ÷ max(会话跨度, 最小时间窗)
    fn choice_rate_violation(&self, events: &[&TelemetryEvent]) -> Option<Anomaly> {
        let choices = events
            .iter()
            .filter(|e| e.event_type == EventType::ChoiceMade)
            .count();
        if choices == 0 {
            return None;
        }

        let (first, last) = (events.first()?, events.last()?);
        let span = (last.timestamp - first.timestamp).num_milliseconds() as f64 / 1000.0;
        let window = span.max(self.config.min_rate_window_secs);
        let observed = choices as f64 / window;

        (observed > self.config.max_choice_rate_per_sec).then(|| Anomaly::ChoiceRateExceeded {
            observed_per_sec: observed,
            ceiling_per_sec: self.config.max_choice_rate_per_sec,
        })
    }
}

/// 每个任务/关卡只报告一次
fn causal_violations(events: &[&TelemetryEvent]) -> Vec<Anomaly> {
    let mut started_tasks: HashSet<&str> = HashSet::new();
    let mut failed_tasks: HashSet<&str> = HashSet::new();
    let mut started_missions: HashSet<&str> = HashSet::new();
    let mut reported: HashSet<(&'static str, &str)> = HashSet::new();
    let mut anomalies = Vec::new();

    for event in events {
        match &event.payload {
            EventPayload::TaskStarted { task_id, .. } => {
                started_tasks.insert(task_id);
            }
            EventPayload::TaskFailed { task_id, .. } => {
                failed_tasks.insert(task_id);
            }
            EventPayload::MissionStarted { mission_id } => {
                started_missions.insert(mission_id);
            }
            EventPayload::TaskCompleted { task_id, .. } => {
                if !started_tasks.contains(task_id.as_str())
                    && reported.insert(("completion", task_id))
                {
                    anomalies.push(Anomaly::CompletionWithoutStart {
                        task_id: task_id.clone(),
                    });
                }
            }
            EventPayload::RetryAttempted { task_id, .. } => {
                if !failed_tasks.contains(task_id.as_str()) && reported.insert(("retry", task_id)) {
                    anomalies.push(Anomaly::RetryWithoutFailure {
                        task_id: task_id.clone(),
                    });
                }
            }
            EventPayload::MissionCompleted { mission_id, .. } => {
                if !started_missions.contains(mission_id.as_str())
                    && reported.insert(("mission", mission_id))
                {
                    anomalies.push(Anomaly::MissionCompletedWithoutStart {
                        mission_id: mission_id.clone(),
                    });
                }
            }
            _ => {}
        }
    }
    anomalies
}
