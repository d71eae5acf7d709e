//! 事件接入层
//!
//! 校验、去重排序缓冲与存储重试策略。

pub mod buffer;
pub mod registry;
pub mod retry;
pub mod validator;

pub use buffer::{Admission, OrderingBuffer};
pub use registry::{FieldKind, FieldSpec, PayloadRegistry, PayloadSchema};
pub use retry::RetryPolicy;
pub use validator::{EventValidator, RejectReason};
