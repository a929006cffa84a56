use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{Instrument, Span, error, info};

use stocklink_auth::{HmacSha256Verifier, WebhookVerifier};
use stocklink_infra::{
    AppConfig, CatalogBackend, CatalogSeed, GraphqlCatalogClient, InMemoryCatalog,
};
use stocklink_inventory::{
    CatalogClient, CatalogError, InventorySync, SweeperHandle, SyncError, SyncOutcome,
    SyncSettings, SyncTracker,
};

/// Sync service over whichever catalog the process was wired with.
pub type DynInventorySync = InventorySync<Arc<dyn CatalogClient>>;

#[derive(Debug, Error)]
pub enum ServicesError {
    #[error("catalog client: {0}")]
    Catalog(#[from] CatalogError),

    #[error("catalog seed {path}: {reason}")]
    Seed { path: PathBuf, reason: String },
}

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppServices {
    pub sync: Arc<DynInventorySync>,
    pub verifier: Arc<dyn WebhookVerifier>,
}

impl AppServices {
    pub fn new(
        catalog: Arc<dyn CatalogClient>,
        tracker: SyncTracker,
        settings: SyncSettings,
        verifier: Arc<dyn WebhookVerifier>,
    ) -> Self {
        Self {
            sync: Arc::new(InventorySync::new(catalog, tracker, settings)),
            verifier,
        }
    }

    pub fn tracker(&self) -> &SyncTracker {
        self.sync.tracker()
    }

    /// Run a sync flow after the delivery has been acknowledged.
    ///
    /// The outcome only ever reaches the logs.
    pub fn spawn_flow<F>(&self, span: Span, flow: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<SyncOutcome, SyncError>> + Send + 'static,
    {
        tokio::spawn(
            async move {
                match flow.await {
                    Ok(outcome) => info!(?outcome, "sync flow finished"),
                    Err(e) => error!(error = %e, "sync flow failed after acknowledgement"),
                }
            }
            .instrument(span),
        )
    }
}

/// Wire catalog, tracker and verifier from configuration.
///
/// The returned sweeper handle must be shut down by the caller.
pub async fn build_services(
    config: &AppConfig,
) -> Result<(AppServices, SweeperHandle), ServicesError> {
    let catalog = build_catalog(config).await?;
    let tracker = SyncTracker::new(config.tracker_config());
    let sweeper = tracker.spawn_sweeper(config.sweep_interval);
    let verifier = Arc::new(HmacSha256Verifier::new(config.webhook_secret.as_bytes()));

    Ok((
        AppServices::new(catalog, tracker, config.sync_settings(), verifier),
        sweeper,
    ))
}

async fn build_catalog(config: &AppConfig) -> Result<Arc<dyn CatalogClient>, ServicesError> {
    match &config.catalog {
        CatalogBackend::Graphql => {
            let client = GraphqlCatalogClient::new(config.graphql_config())?;
            info!(endpoint = %client.config().endpoint, "using graphql catalog");
            Ok(Arc::new(client))
        }
        CatalogBackend::Memory { seed } => {
            let catalog = match seed {
                Some(path) => InMemoryCatalog::from_seed(load_seed(path).await?),
                None => InMemoryCatalog::new(),
            }
            .with_batch_size(config.batch_size);
            tracing::warn!(seed = ?seed, "using in-memory catalog; no remote writes will happen");
            Ok(Arc::new(catalog))
        }
    }
}

async fn load_seed(path: &Path) -> Result<CatalogSeed, ServicesError> {
    let raw = tokio::fs::read(path).await.map_err(|e| ServicesError::Seed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    serde_json::from_slice(&raw).map_err(|e| ServicesError::Seed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}
