//! DTO 模块
//!
//! 数据传输对象，用于 API 请求和响应的序列化。

pub mod admin_dto;
pub mod assessment_dto;
pub mod event_dto;
pub mod session_dto;

pub use admin_dto::*;
pub use assessment_dto::*;
pub use event_dto::*;
pub use session_dto::*;
