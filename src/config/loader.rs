use crate::config::config::AppConfig;
use crate::models::evidence::Skill;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml, Yaml},
};
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "SKILLPRINT_";

/// 配置加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 从默认路径加载配置
    ///
    /// 合并顺序（后者覆盖前者）：
    /// 1. 内置默认值
    /// 2. ./skillprint.toml
    /// 3. ./skillprint.yaml
    /// 4. SKILLPRINT_ 前缀的环境变量，嵌套键用 `__` 分隔
    pub fn load() -> Result<AppConfig, figment::Error> {
        Self::figment(None).extract()
    }

    /// 从指定路径加载配置，按扩展名选择格式
    pub fn load_from(path: PathBuf) -> Result<AppConfig, figment::Error> {
        Self::figment(Some(&path)).extract()
    }

    fn figment(path: Option<&Path>) -> Figment {
        let base = Figment::from(Serialized::defaults(AppConfig::default()));
        let files = match path {
            Some(path) if is_yaml(path) => base.merge(Yaml::file(path)),
            Some(path) => base.merge(Toml::file(path)),
            None => base
                .merge(Toml::file("skillprint.toml"))
                .merge(Yaml::file("skillprint.yaml")),
        };
        files.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// 验证配置
    pub fn validate(config: &AppConfig) -> Result<(), ConfigValidationError> {
        if config.server.port == 0 {
            return Err(ConfigValidationError::InvalidPort);
        }

        let ingestion = &config.pipeline.ingestion;
        if ingestion.lateness_window_ms < 0 {
            return Err(ConfigValidationError::InvalidValue(
                "pipeline.ingestion.lateness_window_ms must be >= 0".into(),
            ));
        }
        if ingestion.future_tolerance_ms < 0 {
            return Err(ConfigValidationError::InvalidValue(
                "pipeline.ingestion.future_tolerance_ms must be >= 0".into(),
            ));
        }
        if ingestion.max_batch_size == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "pipeline.ingestion.max_batch_size must be > 0".into(),
            ));
        }
        if ingestion.max_in_flight_events < ingestion.max_batch_size {
            return Err(ConfigValidationError::InvalidValue(
                "pipeline.ingestion.max_in_flight_events must cover one full batch".into(),
            ));
        }
        if ingestion.inactivity_timeout_secs == 0 || ingestion.sweep_interval_secs == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "inactivity timeout and sweep interval must be > 0".into(),
            ));
        }

        let features = &config.pipeline.features;
        if features.idle_gap_secs <= 0.0
            || features.flexibility_reference_secs <= 0.0
            || features.max_choice_rate_per_sec <= 0.0
            || features.min_rate_window_secs <= 0.0
        {
            return Err(ConfigValidationError::InvalidValue(
                "pipeline.features thresholds must be positive".into(),
            ));
        }

        let fusion = &config.pipeline.fusion;
        if let Some(name) = fusion
            .skill_weights
            .keys()
            .find(|name| name.parse::<Skill>().is_err())
        {
            return Err(ConfigValidationError::InvalidValue(format!(
                "unknown skill in fusion.skill_weights: {}",
                name
            )));
        }
        let mut weight_sets = vec![fusion.default_weights];
        weight_sets.extend(fusion.skill_weights.values().copied());
        for weights in weight_sets {
            let all = [weights.behavioral, weights.linguistic, weights.rubric];
            if all.iter().any(|w| !w.is_finite() || *w < 0.0) || all.iter().sum::<f64>() <= 0.0 {
                return Err(ConfigValidationError::InvalidWeights);
            }
        }
        for scale in [fusion.scales.behavioral, fusion.scales.linguistic, fusion.scales.rubric] {
            if !scale.is_valid() {
                return Err(ConfigValidationError::InvalidScale {
                    min: scale.min,
                    max: scale.max,
                });
            }
        }
        if fusion.corroboration_ceilings.is_empty()
            || fusion
                .corroboration_ceilings
                .iter()
                .any(|c| !(0.0..=1.0).contains(c))
            || fusion.corroboration_ceilings.windows(2).any(|w| w[0] > w[1])
        {
            return Err(ConfigValidationError::InvalidValue(
                "corroboration_ceilings must be non-decreasing values in [0,1]".into(),
            ));
        }
        if !(0.0..1.0).contains(&fusion.low_confidence_penalty) {
            return Err(ConfigValidationError::InvalidValue(
                "low_confidence_penalty must be in [0,1)".into(),
            ));
        }
        if fusion.freshness_window_secs <= 0 {
            return Err(ConfigValidationError::InvalidValue(
                "freshness_window_secs must be > 0".into(),
            ));
        }

        if config.pipeline.storage.retry.max_attempts == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "pipeline.storage.retry.max_attempts must be > 0".into(),
            ));
        }

        Ok(())
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

/// 配置验证错误
#[derive(thiserror::Error, Debug)]
pub enum ConfigValidationError {
    #[error("服务端口无效，必须大于 0")]
    InvalidPort,

    #[error("证据权重无效：必须非负且总和大于 0")]
    InvalidWeights,

    #[error("分数量纲无效: [{min}, {max}]")]
    InvalidScale { min: f64, max: f64 },

    #[error("配置值无效: {0}")]
    InvalidValue(String),
}
