use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// 会话状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// 进行中
    #[default]
    Active,
    /// 正常结束（终态）
    Completed,
    /// 超时未完成（终态）
    Incomplete,
}

impl SessionStatus {
    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Incomplete)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Incomplete => "incomplete",
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "incomplete" => Ok(Self::Incomplete),
            _ => Err(format!("unknown session status: {}", s)),
        }
    }
}

/// 关卡进度
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
}

/// 客户端设备信息
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct DeviceInfo {
    /// 平台（web / ios / android ...）
    pub platform: Option<String>,
    /// 客户端版本
    pub app_version: Option<String>,
    /// 屏幕分辨率等其他信息
    pub extra: BTreeMap<String, String>,
}

/// 游戏会话实体
///
/// 一个学生的一次连续游戏尝试。只有会话状态机可以修改它。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    /// 会话唯一标识
    pub id: String,

    /// 学生标识
    pub student_id: String,

    /// 会话状态
    pub status: SessionStatus,

    /// 开始时间
    pub started_at: DateTime<Utc>,

    /// 结束时间（进入终态时设置）
    pub ended_at: Option<DateTime<Utc>>,

    /// 最后一次服务端接收到事件的时间，用于不活跃超时判断
    pub last_activity_at: DateTime<Utc>,

    /// 关卡进度
    pub mission_progress: BTreeMap<String, MissionStatus>,

    /// 总游戏时长（秒），仅在 completed 时计算
    pub total_playtime_sec: Option<f64>,

    /// 设备信息
    pub device_info: DeviceInfo,
}

impl Session {
    /// 创建新会话，关卡进度为空
    pub fn new(student_id: &str, device_info: DeviceInfo, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            student_id: student_id.to_string(),
            status: SessionStatus::Active,
            started_at: now,
            ended_at: None,
            last_activity_at: now,
            mission_progress: BTreeMap::new(),
            total_playtime_sec: None,
            device_info,
        }
    }

    /// 更新最后活跃时间
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_activity_at {
            self.last_activity_at = now;
        }
    }

    pub fn mission_status(&self, mission_id: &str) -> MissionStatus {
        self.mission_progress
            .get(mission_id)
            .copied()
            .unwrap_or_default()
    }

    /// 已完成的关卡数量
    pub fn completed_missions(&self) -> usize {
        self.mission_progress
            .values()
            .filter(|s| **s == MissionStatus::Completed)
            .count()
    }
}
