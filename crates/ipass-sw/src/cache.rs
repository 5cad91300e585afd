//! Cache Storage: named caches of request → response snapshots.
//!
//! The worker only talks to the [`CacheStorage`] and [`Cache`] traits; the
//! in-memory implementations back the smoke harness and tests.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use hashbrown::HashMap;
use http::{HeaderMap, Method, StatusCode};
use ipass_net::{Network, Request, Response};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};
use url::Url;

use crate::now_millis;

// ==================== Errors ====================

/// Errors raised by the cache store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Only GET requests can be stored.
    #[error("Cannot cache {0} request")]
    MethodNotAllowed(Method),

    /// The response cannot be stored (partial content, `Vary: *`).
    #[error("Response not cacheable: {0}")]
    Uncacheable(String),

    /// `add_all` could not fetch or store some of its URLs.
    #[error("Failed to add {} of the requested resources", .failed.len())]
    AddAllFailed { failed: Vec<String> },

    /// Backend failure.
    #[error("Storage error: {0}")]
    Storage(String),
}

// ==================== Capabilities ====================

/// A single named cache.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Cache name (the generation identifier).
    fn name(&self) -> &str;

    /// Look up the response stored for `request`.
    async fn match_request(&self, request: &Request) -> Result<Option<Response>, CacheError>;

    /// Store `response` under `request`, replacing any entry it matches.
    async fn put(&self, request: &Request, response: Response) -> Result<(), CacheError>;

    /// Remove the entries matching `request`.
    async fn delete(&self, request: &Request) -> Result<bool, CacheError>;

    /// URLs of all stored entries.
    async fn keys(&self) -> Result<Vec<Url>, CacheError>;
}

/// The set of named caches for an origin.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a cache, creating it if it does not exist.
    async fn open(&self, name: &str) -> Result<Arc<dyn Cache>, CacheError>;

    /// Check if a cache exists.
    async fn has(&self, name: &str) -> Result<bool, CacheError>;

    /// Delete a cache and every entry in it.
    async fn delete(&self, name: &str) -> Result<bool, CacheError>;

    /// Names of all caches, in creation order.
    async fn keys(&self) -> Result<Vec<String>, CacheError>;

    /// Look `request` up in every cache, in creation order.
    async fn match_request(&self, request: &Request) -> Result<Option<Response>, CacheError>;
}

/// Fetch every URL and store each successful response in `cache`.
///
/// Fetches run concurrently. A non-ok status counts as a failure. Responses that
/// succeeded stay stored even when others fail; the error lists the failures.
pub async fn add_all(
    cache: &dyn Cache,
    network: &dyn Network,
    urls: &[Url],
) -> Result<usize, CacheError> {
    let requests: Vec<Request> = urls.iter().cloned().map(Request::get).collect();

    let attempts = requests.iter().map(|request| async move {
        let response = network.fetch(request).await.map_err(|e| e.to_string())?;
        if !response.ok() {
            return Err(format!("HTTP {}", response.status));
        }
        cache.put(request, response).await.map_err(|e| e.to_string())
    });
    let results = join_all(attempts).await;

    let mut stored = 0;
    let mut failed = Vec::new();
    for (request, result) in requests.iter().zip(results) {
        match result {
            Ok(()) => stored += 1,
            Err(reason) => {
                warn!(cache = cache.name(), url = %request.url, %reason, "Failed to cache resource");
                failed.push(format!("{}: {}", request.url, reason));
            }
        }
    }

    if failed.is_empty() {
        Ok(stored)
    } else {
        Err(CacheError::AddAllFailed { failed })
    }
}

// ==================== Entries ====================

/// A cached request/response pair.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Request URL, fragment stripped.
    pub url: Url,

    /// Request headers, consulted for `Vary` matching.
    pub request_headers: HeaderMap,

    /// Response snapshot.
    pub response: Response,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    fn new(request: &Request, response: Response) -> Self {
        Self {
            url: request.cache_url(),
            request_headers: request.headers.clone(),
            response,
            cached_at: now_millis(),
        }
    }

    /// Whether this entry answers `request`, honouring the response's `Vary`.
    pub fn matches(&self, request: &Request) -> bool {
        self.response.vary().iter().all(|name| {
            name != "*" && self.request_headers.get(name.as_str()) == request.headers.get(name.as_str())
        })
    }
}

// ==================== Memory Cache ====================

/// In-memory [`Cache`].
#[derive(Debug, Default)]
pub struct MemoryCache {
    name: String,
    entries: RwLock<HashMap<String, Vec<CacheEntry>>>,
}

impl MemoryCache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.values().map(Vec::len).sum()
    }

    /// Whether the cache holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl Cache for MemoryCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn match_request(&self, request: &Request) -> Result<Option<Response>, CacheError> {
        if request.method != Method::GET {
            return Ok(None);
        }

        let entries = self.entries.read().await;
        let found = entries
            .get(request.cache_url().as_str())
            .and_then(|variants| variants.iter().find(|entry| entry.matches(request)))
            .map(|entry| entry.response.clone());

        trace!(cache = %self.name, url = %request.url, hit = found.is_some(), "Cache match");
        Ok(found)
    }

    async fn put(&self, request: &Request, response: Response) -> Result<(), CacheError> {
        if request.method != Method::GET {
            return Err(CacheError::MethodNotAllowed(request.method.clone()));
        }
        if response.status == StatusCode::PARTIAL_CONTENT {
            return Err(CacheError::Uncacheable("partial content".to_string()));
        }
        if response.vary().iter().any(|name| name == "*") {
            return Err(CacheError::Uncacheable("Vary: *".to_string()));
        }

        let entry = CacheEntry::new(request, response);
        let mut entries = self.entries.write().await;
        let variants = entries.entry(entry.url.to_string()).or_default();
        variants.retain(|existing| !existing.matches(request));
        variants.push(entry);

        debug!(cache = %self.name, url = %request.url, "Cache put");
        Ok(())
    }

    async fn delete(&self, request: &Request) -> Result<bool, CacheError> {
        if request.method != Method::GET {
            return Ok(false);
        }

        let mut entries = self.entries.write().await;
        let key = request.cache_url();
        let Some(variants) = entries.get_mut(key.as_str()) else {
            return Ok(false);
        };

        let before = variants.len();
        variants.retain(|entry| !entry.matches(request));
        let removed = variants.len() != before;
        if variants.is_empty() {
            entries.remove(key.as_str());
        }
        Ok(removed)
    }

    async fn keys(&self) -> Result<Vec<Url>, CacheError> {
        let entries = self.entries.read().await;
        Ok(entries
            .values()
            .flatten()
            .map(|entry| entry.url.clone())
            .collect())
    }
}

// ==================== Memory Cache Storage ====================

/// In-memory [`CacheStorage`].
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    caches: RwLock<Vec<Arc<MemoryCache>>>,
}

impl MemoryCacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a cache by name without creating it.
    pub async fn get(&self, name: &str) -> Option<Arc<MemoryCache>> {
        self.caches
            .read()
            .await
            .iter()
            .find(|cache| cache.name == name)
            .cloned()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn Cache>, CacheError> {
        let mut caches = self.caches.write().await;
        if let Some(cache) = caches.iter().find(|cache| cache.name == name) {
            return Ok(Arc::clone(cache) as Arc<dyn Cache>);
        }

        debug!(cache = name, "Creating cache");
        let cache = Arc::new(MemoryCache::new(name));
        caches.push(Arc::clone(&cache));
        Ok(cache)
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        Ok(self.get(name).await.is_some())
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        let mut caches = self.caches.write().await;
        let before = caches.len();
        caches.retain(|cache| cache.name != name);
        Ok(caches.len() != before)
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(self
            .caches
            .read()
            .await
            .iter()
            .map(|cache| cache.name.clone())
            .collect())
    }

    async fn match_request(&self, request: &Request) -> Result<Option<Response>, CacheError> {
        let caches: Vec<Arc<MemoryCache>> = self.caches.read().await.clone();
        for cache in caches {
            if let Some(response) = cache.match_request(request).await? {
                return Ok(Some(response));
            }
        }
        Ok(None)
    }
}
