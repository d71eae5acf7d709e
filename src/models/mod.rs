//! 核心数据模型模块
//!
//! 定义 Skillprint 的核心数据结构：Session, TelemetryEvent, FeatureVector,
//! EvidenceSource, FusedAssessment。

pub mod event;
pub mod evidence;
pub mod feature;
pub mod session;

pub use event::*;
pub use evidence::*;
pub use feature::*;
pub use session::*;
