//! 管理 DTO

use serde::Serialize;

/// 配置重载响应
#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub reloaded: bool,
    pub environment: String,
}
