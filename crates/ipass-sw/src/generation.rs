//! Cache generations: seeding at install, sweeping stale caches at activate.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::cache::{add_all, CacheError};
use crate::config::WorkerConfig;
use crate::host::WorkerScope;
use crate::ServiceWorkerError;

/// Lifecycle position of the current generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GenerationState {
    #[default]
    Uninitialized,
    /// Install ran, successfully or not.
    Seeded,
    /// Stale generations swept and clients claimed.
    Active,
}

/// What activation did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
    /// Stale caches removed.
    pub deleted: Vec<String>,
    /// Stale caches that could not be removed.
    pub failed: Vec<String>,
    /// Clients taken over.
    pub claimed: usize,
}

/// Owns the current generation and its install/activate protocol.
pub struct GenerationManager {
    config: Arc<WorkerConfig>,
    scope: WorkerScope,
    state: RwLock<GenerationState>,
}

impl GenerationManager {
    pub fn new(config: Arc<WorkerConfig>, scope: WorkerScope) -> Self {
        Self {
            config,
            scope,
            state: RwLock::new(GenerationState::Uninitialized),
        }
    }

    pub async fn state(&self) -> GenerationState {
        *self.state.read().await
    }

    /// Open the current generation and seed it with the manifest, then request
    /// promotion. Returns how many resources were stored.
    ///
    /// A seeding failure is returned but leaves the generation `Seeded`, with
    /// whatever resources did succeed still in the cache.
    pub async fn install(&self) -> Result<usize, ServiceWorkerError> {
        info!(generation = %self.config.generation, "Service Worker: Install");

        let seeded = self.seed().await;
        *self.state.write().await = GenerationState::Seeded;

        match &seeded {
            Ok(count) => info!(generation = %self.config.generation, count, "Manifest cached"),
            Err(e) => warn!(
                generation = %self.config.generation,
                category = e.category(),
                error = %e,
                "Service Worker: Cache failed"
            ),
        }

        if let Err(e) = self.scope.lifecycle.skip_waiting().await {
            warn!(error = %e, "Skip waiting failed");
        }

        seeded
    }

    async fn seed(&self) -> Result<usize, ServiceWorkerError> {
        let cache = self.scope.caches.open(self.config.generation.as_str()).await?;
        info!(
            generation = %self.config.generation,
            count = self.config.manifest.len(),
            "Service Worker: Caching files"
        );

        add_all(cache.as_ref(), self.scope.network.as_ref(), &self.config.manifest)
            .await
            .map_err(|e| match e {
                CacheError::AddAllFailed { failed } => ServiceWorkerError::SeedFailed { failed },
                other => other.into(),
            })
    }

    /// Delete every cache that is not the current generation, then claim the
    /// open clients.
    ///
    /// Deletions run concurrently and independently; a failed one is logged and
    /// listed in the report. Enumeration or claim failures are returned.
    pub async fn activate(&self) -> Result<ActivationReport, ServiceWorkerError> {
        info!(generation = %self.config.generation, "Service Worker: Activate");

        let names = self.scope.caches.keys().await?;
        let stale: Vec<String> = names
            .into_iter()
            .filter(|name| name.as_str() != self.config.generation.as_str())
            .collect();

        let deletions = stale.iter().map(|name| async move {
            info!(cache = %name, "Service Worker: Clearing old cache");
            (name, self.scope.caches.delete(name).await)
        });

        let mut report = ActivationReport::default();
        for (name, result) in join_all(deletions).await {
            match result {
                Ok(true) => report.deleted.push(name.clone()),
                Ok(false) => debug!(cache = %name, "Cache already gone"),
                Err(source) => {
                    let error = ServiceWorkerError::EvictionFailed {
                        name: name.clone(),
                        source,
                    };
                    warn!(category = error.category(), error = %error, "Stale cache kept");
                    report.failed.push(name.clone());
                }
            }
        }

        *self.state.write().await = GenerationState::Active;

        report.claimed = self.scope.clients.claim().await?;
        info!(
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            claimed = report.claimed,
            "Activation complete"
        );

        Ok(report)
    }
}
