//! Skillprint - 游戏遥测技能评估流水线
//!
//! 接收游戏会话的遥测事件流（可能乱序、重复、突发），确定性地派生行为特征，
//! 并与语言分析、教师量表等外部证据融合成带置信度的技能评估。

pub mod api;
pub mod config;
pub mod error;
pub mod ingest;
pub mod models;
pub mod observability;
pub mod services;
pub mod storage;
