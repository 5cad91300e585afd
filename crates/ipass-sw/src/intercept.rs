//! Fetch interception: cache-first, refill on miss, offline shell fallback.

use std::sync::Arc;

use http::StatusCode;
use ipass_net::{Request, Response, ResponseType};
use tracing::{debug, trace, warn};

use crate::cache::CacheStorage;
use crate::config::WorkerConfig;
use crate::host::{Lifetime, WorkerScope};

/// Where an intercepted response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// Stored snapshot; the network was not consulted.
    Cache,
    /// Network response, cached or not.
    Network,
    /// Cached shell document served for a failed navigation.
    OfflineFallback,
    /// Network failed and nothing could stand in for it.
    Unavailable,
}

/// The interceptor's answer for one request.
#[derive(Debug, Clone)]
pub struct Interception {
    pub response: Option<Response>,
    pub source: ResponseSource,
}

impl Interception {
    fn new(response: Response, source: ResponseSource) -> Self {
        Self {
            response: Some(response),
            source,
        }
    }

    /// No response at all; the requesting context sees a network error.
    pub fn unavailable() -> Self {
        Self {
            response: None,
            source: ResponseSource::Unavailable,
        }
    }
}

/// Decides, per request, between the cache, the network and the offline shell.
pub struct RequestInterceptor {
    config: Arc<WorkerConfig>,
    scope: WorkerScope,
}

impl RequestInterceptor {
    pub fn new(config: Arc<WorkerConfig>, scope: WorkerScope) -> Self {
        Self { config, scope }
    }

    /// Only secure-transport requests are intercepted.
    pub fn should_intercept(&self, request: &Request) -> bool {
        request.is_secure()
    }

    /// Whether a network response is written back into the cache.
    pub fn is_refillable(response: &Response) -> bool {
        response.status == StatusCode::OK && response.response_type == ResponseType::Basic
    }

    /// Run the decision procedure for `request`. A cache refill is registered on
    /// `lifetime` and not awaited here.
    pub async fn intercept(&self, request: &Request, lifetime: &Lifetime) -> Interception {
        if let Some(cached) = self.lookup(request).await {
            trace!(url = %request.url, "Serving from cache");
            return Interception::new(cached, ResponseSource::Cache);
        }

        match self.scope.network.fetch(request).await {
            Ok(response) => {
                if Self::is_refillable(&response) {
                    self.refill(request, response.clone(), lifetime);
                } else {
                    trace!(
                        url = %request.url,
                        status = %response.status,
                        response_type = ?response.response_type,
                        "Not caching response"
                    );
                }
                Interception::new(response, ResponseSource::Network)
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Network fetch failed");
                self.offline_fallback(request).await
            }
        }
    }

    async fn lookup(&self, request: &Request) -> Option<Response> {
        match self.scope.caches.match_request(request).await {
            Ok(found) => found,
            Err(e) => {
                warn!(url = %request.url, error = %e, "Cache lookup failed, treating as miss");
                None
            }
        }
    }

    fn refill(&self, request: &Request, snapshot: Response, lifetime: &Lifetime) {
        let caches: Arc<dyn CacheStorage> = Arc::clone(&self.scope.caches);
        let generation = self.config.generation.clone();
        let request = request.clone();

        lifetime.wait_until(async move {
            let stored = match caches.open(generation.as_str()).await {
                Ok(cache) => cache.put(&request, snapshot).await,
                Err(e) => Err(e),
            };
            // Refill failures never reach the response path.
            if let Err(e) = stored {
                debug!(cache = %generation, url = %request.url, error = %e, "Cache refill dropped");
            }
            Ok(())
        });
    }

    async fn offline_fallback(&self, request: &Request) -> Interception {
        if !request.is_navigation() {
            return Interception::unavailable();
        }

        let shell = Request::get(self.config.shell_document.clone());
        match self.lookup(&shell).await {
            Some(document) => {
                debug!(url = %request.url, "Offline, serving shell document");
                Interception::new(document, ResponseSource::OfflineFallback)
            }
            None => {
                warn!(url = %request.url, shell = %shell.url, "Offline and shell document not cached");
                Interception::unavailable()
            }
        }
    }
}
