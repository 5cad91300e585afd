//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use http::StatusCode;
use ipass_net::{NetError, Network, Request, Response, ResponseType};
use ipass_sw::{
    Cache, CacheError, CacheStorage, MemoryCacheStorage, MemoryClients, NotificationCenter,
    Registration, ServiceWorker, WorkerConfig, WorkerScope,
};
use url::Url;

pub const ORIGIN: &str = "https://ipass.example";

pub fn origin() -> Url {
    Url::parse(ORIGIN).unwrap()
}

pub fn url(path: &str) -> Url {
    origin().join(path).unwrap()
}

pub fn init_tracing() {
    ipass_common::init_logging(&ipass_common::LogConfig::debug());
}

#[derive(Clone)]
struct Route {
    status: StatusCode,
    response_type: ResponseType,
    body: String,
}

/// Network that serves canned responses and counts every call.
#[derive(Default)]
pub struct MockNetwork {
    routes: Mutex<Vec<(Url, Route)>>,
    calls: AtomicUsize,
    offline: AtomicBool,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: Url, body: &str) {
        self.route(url, StatusCode::OK, ResponseType::Basic, body);
    }

    pub fn route(&self, url: Url, status: StatusCode, response_type: ResponseType, body: &str) {
        let route = Route {
            status,
            response_type,
            body: body.to_string(),
        };
        let mut routes = self.routes.lock().unwrap();
        routes.retain(|(existing, _)| *existing != url);
        routes.push((url, route));
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Network for MockNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(NetError::RequestFailed(format!("offline: {}", request.url)));
        }

        let route = self
            .routes
            .lock()
            .unwrap()
            .iter()
            .find(|(url, _)| *url == request.url)
            .map(|(_, route)| route.clone());

        Ok(match route {
            Some(route) => Response::new(
                request.url.clone(),
                route.status,
                route.response_type,
                route.body.into(),
            ),
            None => Response::new(
                request.url.clone(),
                StatusCode::NOT_FOUND,
                ResponseType::Basic,
                "not found".into(),
            ),
        })
    }
}

/// Cache storage whose operations can be made to fail.
#[derive(Default)]
pub struct FlakyStorage {
    pub inner: MemoryCacheStorage,
    locked: Mutex<HashSet<String>>,
    read_only: AtomicBool,
    unlistable: AtomicBool,
}

impl FlakyStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_cache(&self, name: &str) {
        self.locked.lock().unwrap().insert(name.to_string());
    }

    /// Make `open` fail, so no cache can be written.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Make `keys` fail.
    pub fn set_unlistable(&self, unlistable: bool) {
        self.unlistable.store(unlistable, Ordering::SeqCst);
    }
}

#[async_trait]
impl CacheStorage for FlakyStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn Cache>, CacheError> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(CacheError::Storage(format!("cannot open {name}: quota exceeded")));
        }
        self.inner.open(name).await
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        self.inner.has(name).await
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        if self.locked.lock().unwrap().contains(name) {
            return Err(CacheError::Storage(format!("{name} is locked")));
        }
        self.inner.delete(name).await
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        if self.unlistable.load(Ordering::SeqCst) {
            return Err(CacheError::Storage("cache names unavailable".to_string()));
        }
        self.inner.keys().await
    }

    async fn match_request(&self, request: &Request) -> Result<Option<Response>, CacheError> {
        self.inner.match_request(request).await
    }
}

/// A worker wired to in-memory host capabilities.
pub struct Harness {
    pub worker: ServiceWorker,
    pub network: Arc<MockNetwork>,
    pub caches: Arc<FlakyStorage>,
    pub notifications: Arc<NotificationCenter>,
    pub clients: Arc<MemoryClients>,
    pub registration: Arc<Registration>,
}

impl Harness {
    pub fn new(config: WorkerConfig) -> Self {
        let network = Arc::new(MockNetwork::new());
        let caches = Arc::new(FlakyStorage::new());
        let notifications = Arc::new(NotificationCenter::new());
        let clients = Arc::new(MemoryClients::new());
        let registration = Arc::new(Registration::new(url("/iPass/")));

        let scope = WorkerScope {
            caches: caches.clone(),
            network: network.clone(),
            notifications: notifications.clone(),
            clients: clients.clone(),
            lifecycle: registration.clone(),
        };
        let worker = ServiceWorker::new(config, scope).unwrap();

        Self {
            worker,
            network,
            caches,
            notifications,
            clients,
            registration,
        }
    }

    /// Worker for generation `generation` seeding `manifest`, every entry served.
    pub fn serving(generation: &str, manifest: &[&str]) -> Self {
        let config = WorkerConfig::new(generation, origin(), manifest).unwrap();
        let harness = Self::new(config);
        for entry in &harness.worker.config().manifest {
            harness.network.serve(entry.clone(), &format!("body of {}", entry.path()));
        }
        harness
    }

    pub fn memory(&self) -> &MemoryCacheStorage {
        &self.caches.inner
    }
}
