//! Routes 模块
//!
//! 定义 API 路由。

pub mod admin_routes;
pub mod assessment_routes;
pub mod event_routes;
pub mod session_routes;
