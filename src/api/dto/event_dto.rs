//! 事件 DTO

use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

/// 批量提交请求
///
/// 事件保持为原始 JSON，由接入服务逐条解码，单条格式错误只影响它自己的下标。
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitBatchRequest {
    #[validate(length(max = 100))]
    pub events: Vec<Value>,
}

/// 事件列表响应
#[derive(Debug, Serialize)]
pub struct EventListResponse<T> {
    pub session_id: String,
    pub count: usize,
    pub events: Vec<T>,
}
