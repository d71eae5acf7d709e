//! 遥测事件模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// 事件类型
///
/// 已知类型之外的标签通过注册表扩展，落入 `Custom`。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    MissionStarted,
    MissionCompleted,
    ChoiceMade,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    RetryAttempted,
    HelpRequested,
    DialogueReread,
    StrategyChanged,
    Custom(String),
}

impl EventType {
    pub const BUILTIN: [EventType; 10] = [
        EventType::MissionStarted,
        EventType::MissionCompleted,
        EventType::ChoiceMade,
        EventType::TaskStarted,
        EventType::TaskCompleted,
        EventType::TaskFailed,
        EventType::RetryAttempted,
        EventType::HelpRequested,
        EventType::DialogueReread,
        EventType::StrategyChanged,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            EventType::MissionStarted => "mission_started",
            EventType::MissionCompleted => "mission_completed",
            EventType::ChoiceMade => "choice_made",
            EventType::TaskStarted => "task_started",
            EventType::TaskCompleted => "task_completed",
            EventType::TaskFailed => "task_failed",
            EventType::RetryAttempted => "retry_attempted",
            EventType::HelpRequested => "help_requested",
            EventType::DialogueReread => "dialogue_reread",
            EventType::StrategyChanged => "strategy_changed",
            EventType::Custom(tag) => tag.as_str(),
        }
    }
}

impl From<String> for EventType {
    fn from(tag: String) -> Self {
        Self::BUILTIN
            .iter()
            .find(|t| t.as_str() == tag)
            .cloned()
            .unwrap_or(EventType::Custom(tag))
    }
}

impl From<&str> for EventType {
    fn from(tag: &str) -> Self {
        EventType::from(tag.to_string())
    }
}

impl From<EventType> for String {
    fn from(event_type: EventType) -> Self {
        event_type.as_str().to_string()
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 按事件类型区分的载荷
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    MissionStarted {
        mission_id: String,
    },
    MissionCompleted {
        mission_id: String,
        completion_time_sec: f64,
        choices_made: u64,
    },
    ChoiceMade {
        mission_id: String,
        choice_id: String,
        time_taken_sec: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        approach: Option<String>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        tags: Vec<String>,
    },
    TaskStarted {
        task_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        role: Option<String>,
    },
    TaskCompleted {
        task_id: String,
        completion_time_sec: f64,
    },
    TaskFailed {
        task_id: String,
        reason: String,
    },
    RetryAttempted {
        task_id: String,
        retry_number: u64,
    },
    HelpRequested {
        context: String,
    },
    DialogueReread {
        dialogue_id: String,
    },
    StrategyChanged {
        from_tag: String,
        to_tag: String,
    },
    /// 注册表扩展的事件类型，保留原始字段
    Custom(Map<String, Value>),
}

impl EventPayload {
    pub fn task_id(&self) -> Option<&str> {
        match self {
            EventPayload::TaskStarted { task_id, .. }
            | EventPayload::TaskCompleted { task_id, .. }
            | EventPayload::TaskFailed { task_id, .. }
            | EventPayload::RetryAttempted { task_id, .. } => Some(task_id),
            _ => None,
        }
    }

    pub fn mission_id(&self) -> Option<&str> {
        match self {
            EventPayload::MissionStarted { mission_id }
            | EventPayload::MissionCompleted { mission_id, .. }
            | EventPayload::ChoiceMade { mission_id, .. } => Some(mission_id),
            _ => None,
        }
    }

    /// 选择事件是否带有指定标签
    pub fn has_tag(&self, tag: &str) -> bool {
        match self {
            EventPayload::ChoiceMade { tags, .. } => tags.iter().any(|t| t == tag),
            _ => false,
        }
    }
}

/// 客户端上报的原始事件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawEvent {
    /// 事件类型标签
    pub event_type: String,
    /// 客户端时间戳（Unix 毫秒）
    pub timestamp: i64,
    /// 载荷
    #[serde(default)]
    pub payload: Value,
}

/// 去重键：(会话, 类型, 时间戳, 载荷哈希)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DedupKey {
    pub session_id: String,
    pub event_type: String,
    pub timestamp_ms: i64,
    pub payload_hash: String,
}

/// 已接受的遥测事件，接受后不可变
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryEvent {
    /// 所属会话
    pub session_id: String,
    /// 事件类型
    pub event_type: EventType,
    /// 客户端时间戳（毫秒精度）
    pub timestamp: DateTime<Utc>,
    /// 类型化载荷
    pub payload: EventPayload,
    /// 原始载荷的内容哈希
    pub payload_hash: String,
    /// 服务端分配的会话内单调序号
    pub sequence: u64,
    /// 服务端接收时间
    pub received_at: DateTime<Utc>,
    /// 是否晚于迟到窗口到达
    pub late: bool,
}

impl TelemetryEvent {
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            session_id: self.session_id.clone(),
            event_type: self.event_type.as_str().to_string(),
            timestamp_ms: self.timestamp.timestamp_millis(),
            payload_hash: self.payload_hash.clone(),
        }
    }

    /// 排序键：时间戳优先，同一时间戳按到达序号
    pub fn order_key(&self) -> (DateTime<Utc>, u64) {
        (self.timestamp, self.sequence)
    }
}

/// 计算载荷内容哈希
///
/// serde_json 的 Map 按键排序，序列化结果与字段上报顺序无关。
pub fn payload_hash(payload: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.to_string().as_bytes());
    hex::encode(hasher.finalize())
}
