//! 会话 DTO

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::session::DeviceInfo;

/// 开始会话请求
#[derive(Debug, Deserialize, Validate)]
pub struct StartSessionRequest {
    /// 学生 ID
    #[validate(length(min = 1, max = 128))]
    pub student_id: String,
    /// 设备信息
    #[serde(default)]
    pub device_info: DeviceInfo,
}

/// 开始会话响应
#[derive(Debug, Serialize)]
pub struct StartSessionResponse {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
}

/// 会话列表查询参数
#[derive(Debug, Deserialize, Validate)]
pub struct ListSessionsParams {
    #[validate(length(min = 1, max = 128))]
    pub student_id: String,
    /// active / completed / incomplete
    pub status: Option<String>,
    #[validate(range(min = 1, max = 500))]
    pub limit: Option<usize>,
}

/// 结束会话请求
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CompleteSessionRequest {
    /// 结束时间，缺省为服务端当前时间
    pub ended_at: Option<DateTime<Utc>>,
    /// 客户端确认完成的关卡
    pub missions_completed: Vec<String>,
}

/// 事件范围查询参数（Unix 毫秒）
#[derive(Debug, Default, Deserialize)]
pub struct EventRangeParams {
    pub from: Option<i64>,
    pub to: Option<i64>,
}
