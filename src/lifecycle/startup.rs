//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the gateway context and pipeline from a validated config
//! - Start background tasks (cache sweeper)
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Background tasks stop on the shared shutdown signal

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::auth::CredentialStore;
use crate::config::GatewayConfig;
use crate::context::{ContextError, GatewayContext};
use crate::lifecycle::shutdown::Shutdown;
use crate::pipeline::RequestPipeline;

/// Everything a running gateway needs.
pub struct Gateway {
    pub context: Arc<GatewayContext>,
    pub pipeline: Arc<RequestPipeline>,
}

impl Gateway {
    pub fn build(config: GatewayConfig, store: Arc<dyn CredentialStore>) -> Result<Self, ContextError> {
        let context = Arc::new(GatewayContext::from_config(config, store)?);
        let pipeline = Arc::new(RequestPipeline::new(context.clone()));
        Ok(Self { context, pipeline })
    }
}

/// Periodically drop expired cache entries until shutdown.
pub fn spawn_cache_sweeper(context: Arc<GatewayContext>, every: Duration, shutdown: Shutdown) -> JoinHandle<()> {
    let mut stop = shutdown.subscribe();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_secs(1)));
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = context.caches.sweep_expired();
                    if removed > 0 {
                        tracing::debug!(removed, "Swept expired cache entries");
                    }
                }
                _ = stop.recv() => {
                    tracing::debug!("Cache sweeper stopped");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::InMemoryCredentialStore;
    use crate::config::ProviderConfig;
    use crate::pipeline::ApiResponse;

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_removes_expired_entries() {
        let mut provider = ProviderConfig::new("crm", "https://api.crm.example");
        provider.cache.ttl_ms = Some(500);
        let config = GatewayConfig {
            providers: vec![provider],
            ..Default::default()
        };
        let gateway = Gateway::build(config, Arc::new(InMemoryCredentialStore::new(None))).unwrap();
        let cache = gateway.context.caches.get("crm").unwrap();
        cache.set("k", ApiResponse::new(200, serde_json::json!({})), None);

        let shutdown = Shutdown::new();
        let handle = spawn_cache_sweeper(gateway.context.clone(), Duration::from_secs(1), shutdown.clone());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(cache.len(), 0);

        shutdown.trigger();
        handle.await.unwrap();
    }
}
