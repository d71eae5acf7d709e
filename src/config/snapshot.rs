//! Configuration snapshot handle
//!
//! Readers take an `Arc` to the current configuration and keep it for the
//! duration of one operation. A reload builds and validates a complete new
//! configuration and swaps the pointer; in-flight operations keep the
//! snapshot they started with.

use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::config::config::AppConfig;
use crate::config::loader::ConfigLoader;
use crate::error::{AppError, Result};

#[derive(Debug)]
pub struct ConfigHandle {
    current: RwLock<Arc<AppConfig>>,
    source: Option<PathBuf>,
}

impl ConfigHandle {
    pub fn new(config: AppConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
            source: None,
        }
    }

    /// Handle that reloads from an explicit file instead of the default search path
    pub fn with_source(config: AppConfig, source: PathBuf) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
            source: Some(source),
        }
    }

    pub fn snapshot(&self) -> Arc<AppConfig> {
        self.current.read().clone()
    }

    /// Validate and install a new configuration
    pub fn replace(&self, config: AppConfig) -> Result<Arc<AppConfig>> {
        ConfigLoader::validate(&config)?;
        let config = Arc::new(config);
        *self.current.write() = config.clone();
        Ok(config)
    }

    /// Re-read the configuration sources and swap the snapshot
    pub fn reload(&self) -> Result<Arc<AppConfig>> {
        let loaded = match &self.source {
            Some(path) => ConfigLoader::load_from(path.clone()),
            None => ConfigLoader::load(),
        }
        .map_err(|e| AppError::Config(e.to_string()))?;

        let config = self.replace(loaded)?;
        info!(
            environment = %config.environment,
            lateness_window_ms = config.pipeline.ingestion.lateness_window_ms,
            "Configuration reloaded"
        );
        Ok(config)
    }
}
