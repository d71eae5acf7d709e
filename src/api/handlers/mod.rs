//! Handlers 模块
//!
//! HTTP 请求处理函数。

pub mod admin_handler;
pub mod assessment_handler;
pub mod event_handler;
pub mod session_handler;
