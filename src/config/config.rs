use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::models::evidence::{ScoreScale, Skill, SourceKind};

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// 服务地址
    pub host: String,
    /// 服务端口
    pub port: u16,
    /// 工作线程数
    pub workers: usize,
    /// 请求超时（秒）
    pub request_timeout: u64,
    /// 最大请求体大小（字节）
    pub max_request_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            workers: 4,
            request_timeout: 30,
            max_request_size: 2 * 1024 * 1024,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别（RUST_LOG 优先）
    pub level: String,
    /// 结构化 JSON 日志
    pub structured: bool,
    /// 日志文件目录，为空则只输出到 stdout
    pub log_dir: Option<PathBuf>,
    /// 日志文件名前缀
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            structured: false,
            log_dir: None,
            file_prefix: "skillprint.log".into(),
        }
    }
}

/// 事件接入配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IngestionConfig {
    /// 迟到窗口（毫秒）
    pub lateness_window_ms: i64,
    /// 允许客户端时间戳超前服务端的容差（毫秒）
    pub future_tolerance_ms: i64,
    /// 单批最大事件数
    pub max_batch_size: usize,
    /// 不活跃超时（秒）
    pub inactivity_timeout_secs: u64,
    /// 超时扫描间隔（秒）
    pub sweep_interval_secs: u64,
    /// 获取会话执行上下文的最长等待（毫秒）
    pub lock_timeout_ms: u64,
    /// 单会话在途事件上限
    pub max_in_flight_events: usize,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            lateness_window_ms: 5_000,
            future_tolerance_ms: 5_000,
            max_batch_size: 100,
            inactivity_timeout_secs: 24 * 60 * 60,
            sweep_interval_secs: 300,
            lock_timeout_ms: 2_000,
            max_in_flight_events: 1_000,
        }
    }
}

/// 特征提取配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FeatureConfig {
    /// 超过该间隔的事件空档计为空闲（秒）
    pub idle_gap_secs: f64,
    /// 灵活性评分的参考反应时间（秒）
    pub flexibility_reference_secs: f64,
    /// 共情关卡 ID，为空表示所有关卡
    pub empathy_missions: Vec<String>,
    /// 共情选择标签
    pub empathetic_tag: String,
    /// 适应性选择标签
    pub adaptive_tag: String,
    /// 选择事件速率上限（次/秒）
    pub max_choice_rate_per_sec: f64,
    /// 计算速率时的最小时间窗（秒）
    pub min_rate_window_secs: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            idle_gap_secs: 30.0,
            flexibility_reference_secs: 10.0,
            empathy_missions: Vec::new(),
            empathetic_tag: "empathetic".into(),
            adaptive_tag: "adaptive".into(),
            max_choice_rate_per_sec: 2.0,
            min_rate_window_secs: 5.0,
        }
    }
}

/// 三个证据通道的权重
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SourceWeights {
    pub behavioral: f64,
    pub linguistic: f64,
    pub rubric: f64,
}

impl SourceWeights {
    pub fn get(&self, kind: SourceKind) -> f64 {
        match kind {
            SourceKind::Behavioral => self.behavioral,
            SourceKind::Linguistic => self.linguistic,
            SourceKind::Rubric => self.rubric,
        }
    }
}

impl Default for SourceWeights {
    fn default() -> Self {
        Self {
            behavioral: 0.4,
            linguistic: 0.35,
            rubric: 0.25,
        }
    }
}

/// 各通道原始分量纲
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SourceScales {
    pub behavioral: ScoreScale,
    pub linguistic: ScoreScale,
    /// 教师量表默认 1-4 分
    pub rubric: ScoreScale,
}

impl SourceScales {
    pub fn get(&self, kind: SourceKind) -> ScoreScale {
        match kind {
            SourceKind::Behavioral => self.behavioral,
            SourceKind::Linguistic => self.linguistic,
            SourceKind::Rubric => self.rubric,
        }
    }
}

impl Default for SourceScales {
    fn default() -> Self {
        Self {
            behavioral: ScoreScale::UNIT,
            linguistic: ScoreScale::UNIT,
            rubric: ScoreScale::new(1.0, 4.0),
        }
    }
}

/// 证据融合配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FusionConfig {
    /// 未单独配置的技能使用的权重
    pub default_weights: SourceWeights,
    /// 按技能名覆盖的权重（如 `empathy`）
    pub skill_weights: BTreeMap<String, SourceWeights>,
    pub scales: SourceScales,
    /// 按参与通道数（1、2、3）的置信度上限
    pub corroboration_ceilings: Vec<f64>,
    /// 行为证据低置信度时的置信度惩罚系数
    pub low_confidence_penalty: f64,
    /// 证据新鲜度窗口（秒）
    pub freshness_window_secs: i64,
}

impl FusionConfig {
    pub fn weights_for(&self, skill: Skill) -> SourceWeights {
        self.skill_weights
            .get(skill.as_str())
            .copied()
            .unwrap_or(self.default_weights)
    }

    /// 给定通道数的置信度上限，超出配置长度时取最后一项
    pub fn ceiling_for(&self, channels: usize) -> f64 {
        if channels == 0 {
            return 0.0;
        }
        self.corroboration_ceilings
            .get(channels - 1)
            .or(self.corroboration_ceilings.last())
            .copied()
            .unwrap_or(1.0)
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            default_weights: SourceWeights::default(),
            skill_weights: BTreeMap::new(),
            scales: SourceScales::default(),
            corroboration_ceilings: vec![0.6, 0.85, 1.0],
            low_confidence_penalty: 0.7,
            freshness_window_secs: 30 * 24 * 60 * 60,
        }
    }
}

/// 存储重试配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 50,
            max_backoff_ms: 1_000,
        }
    }
}

/// 存储配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct StorageConfig {
    pub retry: RetryConfig,
}

/// 流水线配置，整体作为不可变快照替换
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub ingestion: IngestionConfig,
    pub features: FeatureConfig,
    pub fusion: FusionConfig,
    pub storage: StorageConfig,
}

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// 服务器配置
    pub server: ServerConfig,
    /// 日志配置
    pub logging: LoggingConfig,
    /// 流水线配置
    pub pipeline: PipelineConfig,
    /// 应用名称
    pub app_name: String,
    /// 环境
    pub environment: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::development()
    }
}

impl AppConfig {
    /// 创建开发环境配置
    pub fn development() -> Self {
        Self {
            server: ServerConfig::default(),
            logging: LoggingConfig {
                level: "debug".into(),
                ..LoggingConfig::default()
            },
            pipeline: PipelineConfig::default(),
            app_name: "skillprint".into(),
            environment: "development".into(),
        }
    }

    /// 创建生产环境配置
    pub fn production() -> Self {
        let mut config = Self::development();
        config.environment = "production".into();
        config.logging.level = "info".into();
        config.logging.structured = true;
        config.logging.log_dir = Some(PathBuf::from("./logs"));
        config.server.workers = std::thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(4);
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pipeline_values() {
        let config = AppConfig::default();
        assert_eq!(config.pipeline.ingestion.max_batch_size, 100);
        assert_eq!(config.pipeline.ingestion.inactivity_timeout_secs, 86_400);
        assert_eq!(config.pipeline.fusion.default_weights, SourceWeights::default());
    }

    #[test]
    fn test_skill_weights_override_default() {
        let mut fusion = FusionConfig::default();
        fusion.skill_weights.insert(
            "empathy".to_string(),
            SourceWeights {
                behavioral: 0.2,
                linguistic: 0.5,
                rubric: 0.3,
            },
        );
        assert_eq!(fusion.weights_for(Skill::Empathy).linguistic, 0.5);
        assert_eq!(fusion.weights_for(Skill::Resilience).behavioral, 0.4);
    }

    #[test]
    fn test_ceiling_for_channel_count() {
        let fusion = FusionConfig::default();
        assert_eq!(fusion.ceiling_for(0), 0.0);
        assert_eq!(fusion.ceiling_for(1), 0.6);
        assert_eq!(fusion.ceiling_for(3), 1.0);
        assert_eq!(fusion.ceiling_for(5), 1.0);
    }
}
