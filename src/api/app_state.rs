use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, ConfigHandle};
use crate::ingest::PayloadRegistry;
use crate::observability::PipelineMetrics;
use crate::services::assessment::{AssessmentService, create_assessment_service};
use crate::services::ingestion::{IngestionService, create_ingestion_service};
use crate::storage::{StorageFactory, StorageInstance};

/// Application state shared by every handler
#[derive(Clone)]
pub struct AppState {
    /// Telemetry ingestion, session lifecycle and feature queries
    pub ingestion: Arc<dyn IngestionService>,
    /// Evidence fusion
    pub assessment: Arc<dyn AssessmentService>,
    /// Reloadable configuration snapshot
    pub config: Arc<ConfigHandle>,
    pub metrics: Arc<PipelineMetrics>,
    pub storage: StorageInstance,
    /// Cancelled on shutdown; batch submissions run under a child token
    pub shutdown: CancellationToken,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("ingestion", &"Arc<dyn IngestionService>")
            .field("assessment", &"Arc<dyn AssessmentService>")
            .field("config", &self.config.snapshot().app_name)
            .field("shutdown", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl AppState {
    /// Create application state over the given storage
    pub fn new(config: Arc<ConfigHandle>, storage: StorageInstance, registry: PayloadRegistry) -> Self {
        let metrics = Arc::new(PipelineMetrics::new());
        let ingestion = create_ingestion_service(
            storage.clone(),
            config.clone(),
            Arc::new(registry),
            metrics.clone(),
        );
        let assessment = create_assessment_service(storage.clone(), config.clone(), metrics.clone());

        Self {
            ingestion: Arc::from(ingestion),
            assessment: Arc::from(assessment),
            config,
            metrics,
            storage,
            shutdown: CancellationToken::new(),
        }
    }

    /// In-memory stores and the standard event registry
    pub fn in_memory(config: AppConfig) -> Self {
        Self::new(
            Arc::new(ConfigHandle::new(config)),
            StorageFactory::in_memory(),
            PayloadRegistry::standard(),
        )
    }
}
