//! 行为特征计算器
//!
//! 每个计算器都是有序事件序列上的纯函数。所需事件类型从未出现时返回
//! `NotApplicable`，不返回 0。

use std::collections::{BTreeMap, HashMap};

use crate::config::FeatureConfig;
use crate::models::event::{EventPayload, EventType, TelemetryEvent};
use crate::models::feature::FeatureValue;

pub const TASK_COMPLETION_RATE: &str = "task_completion_rate";
pub const RETRY_COUNT: &str = "retry_count";
pub const RECOVERY_TIME_AVG: &str = "recovery_time_avg";
pub const PERSISTENCE_SCORE: &str = "persistence_score";
pub const STRATEGY_SWITCHING_COUNT: &str = "strategy_switching_count";
pub const FLEXIBILITY_SCORE: &str = "flexibility_score";
pub const DELEGATION_FAIRNESS: &str = "delegation_fairness";
pub const DISTRACTION_RESISTANCE: &str = "distraction_resistance";
pub const EMPATHETIC_CHOICE_RATE: &str = "empathetic_choice_rate";
pub const HELP_REQUEST_COUNT: &str = "help_request_count";
pub const DIALOGUE_REREAD_COUNT: &str = "dialogue_reread_count";

fn seconds_between(earlier: &TelemetryEvent, later: &TelemetryEvent) -> f64 {
    (later.timestamp - earlier.timestamp).num_milliseconds() as f64 / 1000.0
}

fn count_of(events: &[&TelemetryEvent], event_type: &EventType) -> usize {
    events.iter().filter(|e| &e.event_type == event_type).count()
}

/// 任务完成事件数 ÷ 任务开始事件数
///
/// 没有任何 task_started 时返回 `NotApplicable` 而不是 0：所需事件类型从未
/// 出现的特征一律不计分，融合时会排除它，不会把"没有任务"当成"全部失败"。
pub fn task_completion_rate(events: &[&TelemetryEvent]) -> FeatureValue {
    let started = count_of(events, &EventType::TaskStarted);
    let completed = count_of(events, &EventType::TaskCompleted);
    FeatureValue::ratio(completed as f64, started as f64)
}

/// 一次有效重试：之前同一任务至少失败过一次
struct Retry<'a> {
    /// 该任务最近一次失败
    failure: &'a TelemetryEvent,
    /// 失败与重试之间是否求助过
    helped: bool,
    retry: &'a TelemetryEvent,
}

fn retries<'a>(events: &[&'a TelemetryEvent]) -> Vec<Retry<'a>> {
    // task_id -> (最近一次失败, 失败后是否求助)
    let mut last_failure: HashMap<&str, (&TelemetryEvent, bool)> = HashMap::new();
    let mut out = Vec::new();

    for event in events {
        match &event.payload {
            EventPayload::TaskFailed { task_id, .. } => {
                last_failure.insert(task_id.as_str(), (*event, false));
            }
            EventPayload::HelpRequested { .. } => {
                for entry in last_failure.values_mut() {
                    entry.1 = true;
                }
            }
            EventPayload::RetryAttempted { task_id, .. } => {
                if let Some(&(failure, helped)) = last_failure.get(task_id.as_str()) {
                    out.push(Retry {
                        failure,
                        helped,
                        retry: *event,
                    });
                }
            }
            _ => {}
        }
    }
    out
}

fn has_failures(events: &[&TelemetryEvent]) -> bool {
    events.iter().any(|e| e.event_type == EventType::TaskFailed)
}

/// 失败之后的重试次数，按任务匹配
pub fn retry_count(events: &[&TelemetryEvent]) -> FeatureValue {
    if !has_failures(events) {
        return FeatureValue::NotApplicable;
    }
    FeatureValue::Count(retries(events).len() as u64)
}

/// 重试时间与该任务上一次失败时间之差的均值（秒）
pub fn recovery_time_avg(events: &[&TelemetryEvent]) -> FeatureValue {
    let retries = retries(events);
    if retries.is_empty() {
        return FeatureValue::NotApplicable;
    }
    let total: f64 = retries
        .iter()
        .map(|r| seconds_between(r.failure, r.retry).max(0.0))
        .sum();
    FeatureValue::Seconds(total / retries.len() as f64)
}

/// 没有中间求助的重试占全部重试的比例
pub fn persistence_score(events: &[&TelemetryEvent]) -> FeatureValue {
    let retries = retries(events);
    let unaided = retries.iter().filter(|r| !r.helped).count();
    FeatureValue::ratio(unaided as f64, retries.len() as f64)
}

/// 策略标签序列中相邻两项不同的次数
pub fn strategy_switching_count(events: &[&TelemetryEvent]) -> FeatureValue {
    let approaches: Vec<&str> = events
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::ChoiceMade {
                approach: Some(approach),
                ..
            } => Some(approach.as_str()),
            EventPayload::StrategyChanged { to_tag, .. } => Some(to_tag.as_str()),
            _ => None,
        })
        .collect();

    if approaches.is_empty() {
        return FeatureValue::NotApplicable;
    }
    let switches = approaches.windows(2).filter(|w| w[0] != w[1]).count();
    FeatureValue::Count(switches as u64)
}

fn is_adaptive(event: &TelemetryEvent, adaptive_tag: &str) -> bool {
    event.event_type == EventType::StrategyChanged || event.payload.has_tag(adaptive_tag)
}

/// 挫折后首次适应性选择的反应时间，映射为 ref / (ref + t)，取均值
///
/// 挫折后没有任何适应性选择计 0 分。
pub fn flexibility_score(events: &[&TelemetryEvent], config: &FeatureConfig) -> FeatureValue {
    let reference = config.flexibility_reference_secs;
    let mut scores = Vec::new();

    for (i, event) in events.iter().enumerate() {
        if event.event_type != EventType::TaskFailed {
            continue;
        }
        let response = events[i + 1..]
            .iter()
            .find(|later| is_adaptive(later, &config.adaptive_tag));
        let score = match response {
            Some(later) => {
                let elapsed = seconds_between(event, later).max(0.0);
                reference / (reference + elapsed)
            }
            None => 0.0,
        };
        scores.push(score);
    }

    if scores.is_empty() {
        return FeatureValue::NotApplicable;
    }
    FeatureValue::score(scores.iter().sum::<f64>() / scores.len() as f64)
}

/// 1 − 各角色任务数方差 / 最大可能方差
///
/// 只统计带角色的任务开始事件（协作关卡才会上报角色），少于两个角色时不适用。
pub fn delegation_fairness(events: &[&TelemetryEvent]) -> FeatureValue {
    let mut per_role: BTreeMap<&str, f64> = BTreeMap::new();
    for event in events {
        if let EventPayload::TaskStarted {
            role: Some(role), ..
        } = &event.payload
        {
            *per_role.entry(role.as_str()).or_default() += 1.0;
        }
    }

    let roles = per_role.len() as f64;
    if per_role.len() < 2 {
        return FeatureValue::NotApplicable;
    }
    let total: f64 = per_role.values().sum();
    let mean = total / roles;
    let variance = per_role
        .values()
        .map(|c| (c - mean).powi(2))
        .sum::<f64>()
        / roles;
    // 所有任务集中在一个角色时的方差
    let max_variance = total * total * (roles - 1.0) / (roles * roles);
    if max_variance <= 0.0 {
        return FeatureValue::NotApplicable;
    }
    FeatureValue::score(1.0 - variance / max_variance)
}

/// 在任务时间 ÷ (在任务时间 + 空闲时间)
pub fn distraction_resistance(events: &[&TelemetryEvent], config: &FeatureConfig) -> FeatureValue {
    if events.len() < 2 {
        return FeatureValue::NotApplicable;
    }
    let (mut on_task, mut idle) = (0.0, 0.0);
    for pair in events.windows(2) {
        let gap = seconds_between(pair[0], pair[1]).max(0.0);
        if gap > config.idle_gap_secs {
            idle += gap;
        } else {
            on_task += gap;
        }
    }
    FeatureValue::ratio(on_task, on_task + idle)
}

/// 共情关卡中带共情标签的选择占全部选择的比例
pub fn empathetic_choice_rate(events: &[&TelemetryEvent], config: &FeatureConfig) -> FeatureValue {
    let in_scope = |mission: &str| {
        config.empathy_missions.is_empty() || config.empathy_missions.iter().any(|m| m == mission)
    };

    let (mut total, mut empathetic) = (0usize, 0usize);
    for event in events {
        if let EventPayload::ChoiceMade { mission_id, .. } = &event.payload {
            if in_scope(mission_id) {
                total += 1;
                if event.payload.has_tag(&config.empathetic_tag) {
                    empathetic += 1;
                }
            }
        }
    }
    FeatureValue::ratio(empathetic as f64, total as f64)
}

fn nonzero_count(count: usize) -> FeatureValue {
    if count == 0 {
        FeatureValue::NotApplicable
    } else {
        FeatureValue::Count(count as u64)
    }
}

pub fn help_request_count(events: &[&TelemetryEvent]) -> FeatureValue {
    nonzero_count(count_of(events, &EventType::HelpRequested))
}

pub fn dialogue_reread_count(events: &[&TelemetryEvent]) -> FeatureValue {
    nonzero_count(count_of(events, &EventType::DialogueReread))
}
