//! # iPass Shell Worker
//!
//! Offline support for the iPass single-page application: a background worker
//! that serves the app shell from a versioned cache and falls back to the
//! network.
//!
//! ## Features
//!
//! - **Cache generations**: one cache per deployment, seeded from a fixed
//!   manifest at install and swept of older generations at activate
//! - **Fetch interception**: cache-first, refill-on-miss, offline shell fallback
//! - **Auxiliary events**: push, notification click, message, sync, error
//! - **In-memory host**: cache storage, clients and notifications that run
//!   without a browser
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorker ── dispatch table (EventKind → Handler)
//!     │
//!     ├── GenerationManager   install / activate
//!     ├── RequestInterceptor  fetch
//!     └── handlers            push / notificationclick / message / sync / error
//!
//! WorkerScope (host capabilities)
//!     ├── CacheStorage ── Cache ── Request → Response
//!     ├── Network
//!     ├── Notifier
//!     ├── Clients
//!     └── Lifecycle (skip waiting)
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use ipass_net::NetError;
use thiserror::Error;

pub mod cache;
pub mod config;
pub mod events;
pub mod generation;
pub mod handlers;
pub mod host;
pub mod intercept;
pub mod worker;

pub use cache::{add_all, Cache, CacheEntry, CacheError, CacheStorage, MemoryCache, MemoryCacheStorage};
pub use config::{ConfigError, GenerationId, NotificationAction, NotificationConfig, WorkerConfig};
pub use events::{
    ClientMessage, ErrorEvent, EventKind, ExtendableEvent, FetchEvent, FetchOutcome, MessageEvent,
    NotificationEvent, PushEvent, PushMessageData, RejectionEvent, SyncEvent, WorkerEvent,
};
pub use generation::{ActivationReport, GenerationManager, GenerationState};
pub use host::{
    Client, ClientType, Clients, Lifecycle, Lifetime, MemoryClients, Notification,
    NotificationCenter, NotificationData, NotificationOptions, Notifier, Registration,
    WorkerScope, WorkerState, WorkerVersion,
};
pub use intercept::{Interception, RequestInterceptor, ResponseSource};
pub use worker::{Handler, ServiceWorker};

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    /// One or more manifest resources could not be fetched during install.
    #[error("Manifest seeding failed for {} resource(s): {}", .failed.len(), .failed.join(", "))]
    SeedFailed { failed: Vec<String> },

    /// A stale generation could not be deleted during activate.
    #[error("Failed to delete cache {name}: {source}")]
    EvictionFailed {
        name: String,
        #[source]
        source: CacheError,
    },

    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Host error: {0}")]
    Host(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Task failed: {0}")]
    Task(String),
}

/// Milliseconds since the Unix epoch, saturating at `u64::MAX`.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

impl ServiceWorkerError {
    /// Create a host capability error.
    pub fn host(message: impl Into<String>) -> Self {
        Self::Host(message.into())
    }

    /// Get the error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            ServiceWorkerError::SeedFailed { .. } => "seed",
            ServiceWorkerError::EvictionFailed { .. } => "evict",
            ServiceWorkerError::Network(_) => "network",
            ServiceWorkerError::Cache(_) => "cache",
            ServiceWorkerError::Config(_) => "config",
            ServiceWorkerError::Host(_) | ServiceWorkerError::InvalidState(_) => "host",
            ServiceWorkerError::Task(_) => "task",
        }
    }
}
