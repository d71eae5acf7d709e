//! Background inactivity sweeper

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ConfigHandle;
use crate::services::ingestion::IngestionService;

/// Periodically expire sessions idle past the inactivity timeout
///
/// The interval is read from the current snapshot before every pass, so a
/// reload takes effect after the pending sleep.
pub fn spawn_inactivity_sweeper(
    ingestion: Arc<dyn IngestionService>,
    config: Arc<ConfigHandle>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Inactivity sweeper started");
        loop {
            let interval = config.snapshot().pipeline.ingestion.sweep_interval_secs.max(1);
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_secs(interval)) => {}
            }

            match ingestion.expire_inactive(Utc::now()).await {
                Ok(expired) => debug!(count = expired.len(), "Inactivity sweep finished"),
                Err(e) => warn!("Inactivity sweep failed: {}", e),
            }
        }
        info!("Inactivity sweeper stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::ingest::PayloadRegistry;
    use crate::observability::PipelineMetrics;
    use crate::services::ingestion::create_ingestion_service;
    use crate::storage::StorageFactory;

    #[tokio::test]
    async fn test_sweeper_stops_on_shutdown() {
        let config = Arc::new(ConfigHandle::new(AppConfig::default()));
        let ingestion: Arc<dyn IngestionService> = Arc::from(create_ingestion_service(
            StorageFactory::in_memory(),
            config.clone(),
            Arc::new(PayloadRegistry::standard()),
            Arc::new(PipelineMetrics::new()),
        ));
        let shutdown = CancellationToken::new();
        let handle = spawn_inactivity_sweeper(ingestion, config, shutdown.clone());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }
}
