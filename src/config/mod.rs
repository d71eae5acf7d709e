//! 配置管理模块
//!
//! 提供应用程序配置加载和管理功能，支持 TOML/YAML 配置文件和环境变量覆盖，
//! 流水线配置以不可变快照的形式原子替换。

pub mod config;
pub mod loader;
pub mod snapshot;

pub use config::{
    AppConfig, FeatureConfig, FusionConfig, IngestionConfig, LoggingConfig, PipelineConfig,
    RetryConfig, ServerConfig, SourceScales, SourceWeights, StorageConfig,
};
pub use loader::{ConfigLoader, ConfigValidationError};
pub use snapshot::ConfigHandle;
