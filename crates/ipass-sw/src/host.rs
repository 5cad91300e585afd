//! Host capabilities the worker runs against.
//!
//! Each capability is a trait so the worker can be driven by a browser
//! binding, the smoke harness or a test double. The in-memory versions here
//! are complete enough to run the whole lifecycle without a browser.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use hashbrown::HashMap;
use ipass_net::Network;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use url::Url;

use crate::cache::CacheStorage;
use crate::config::NotificationAction;
use crate::ServiceWorkerError;

// ==================== Lifetime ====================

/// Extend-lifetime registry carried by an event.
///
/// Work passed to [`Lifetime::wait_until`] is spawned immediately; the host
/// keeps the worker alive until [`Lifetime::settled`] has drained it.
#[derive(Debug, Clone, Default)]
pub struct Lifetime {
    tasks: Arc<Mutex<Vec<JoinHandle<Result<(), ServiceWorkerError>>>>>,
}

impl Lifetime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `future` and keep the worker alive until it settles.
    ///
    /// Must be called from within a tokio runtime.
    pub fn wait_until<F>(&self, future: F)
    where
        F: Future<Output = Result<(), ServiceWorkerError>> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.lock().push(handle);
    }

    /// Number of registered tasks not yet collected by `settled`.
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// Await every registered task, including ones registered while waiting.
    pub async fn settled(&self) -> Vec<Result<(), ServiceWorkerError>> {
        let mut results = Vec::new();
        loop {
            let batch: Vec<_> = self.lock().drain(..).collect();
            if batch.is_empty() {
                return results;
            }
            for handle in batch {
                results.push(match handle.await {
                    Ok(result) => result,
                    Err(e) => Err(ServiceWorkerError::Task(e.to_string())),
                });
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<Result<(), ServiceWorkerError>>>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ==================== Notifications ====================

/// Structured data attached to a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
    /// Ms since epoch when the push arrived.
    pub date_of_arrival: u64,
    pub primary_key: u32,
}

/// Options passed to `show_notification`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationOptions {
    pub body: String,
    pub icon: Url,
    pub badge: Url,
    pub vibrate: Vec<u32>,
    pub data: NotificationData,
    pub actions: Vec<NotificationAction>,
}

/// A displayed notification.
#[derive(Debug, Clone)]
pub struct Notification {
    pub id: u64,
    pub title: String,
    pub options: NotificationOptions,
    closed: Arc<AtomicBool>,
}

impl Notification {
    pub fn new(title: impl Into<String>, options: NotificationOptions) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self {
            id: COUNTER.fetch_add(1, Ordering::Relaxed),
            title: title.into(),
            options,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Dismiss the notification.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

/// Notification capability.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn show_notification(
        &self,
        title: &str,
        options: NotificationOptions,
    ) -> Result<Notification, ServiceWorkerError>;
}

/// In-memory [`Notifier`] that records what was shown.
#[derive(Debug, Default)]
pub struct NotificationCenter {
    shown: RwLock<Vec<Notification>>,
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every notification shown so far, oldest first.
    pub async fn shown(&self) -> Vec<Notification> {
        self.shown.read().await.clone()
    }

    /// Notifications not yet closed.
    pub async fn open(&self) -> Vec<Notification> {
        self.shown
            .read()
            .await
            .iter()
            .filter(|n| !n.is_closed())
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Notifier for NotificationCenter {
    async fn show_notification(
        &self,
        title: &str,
        options: NotificationOptions,
    ) -> Result<Notification, ServiceWorkerError> {
        let notification = Notification::new(title, options);
        debug!(id = notification.id, title, "Showing notification");
        self.shown.write().await.push(notification.clone());
        Ok(notification)
    }
}

// ==================== Clients ====================

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
}

/// A client context (page or worker) in the worker's scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    pub id: String,
    pub url: Url,
    pub client_type: ClientType,
    pub focused: bool,
    /// Whether this worker controls the client.
    pub controlled: bool,
}

impl Client {
    /// Create a window client.
    pub fn window(url: Url) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self {
            id: format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed)),
            url,
            client_type: ClientType::Window,
            focused: false,
            controlled: false,
        }
    }
}

/// Client-window capability.
#[async_trait]
pub trait Clients: Send + Sync {
    /// Open a window at `url`, or focus one already showing it.
    async fn open_window(&self, url: &Url) -> Result<Client, ServiceWorkerError>;

    /// Take control of every client in scope. Returns how many were claimed.
    async fn claim(&self) -> Result<usize, ServiceWorkerError>;
}

/// In-memory [`Clients`].
#[derive(Debug, Default)]
pub struct MemoryClients {
    clients: RwLock<HashMap<String, Client>>,
}

impl MemoryClients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client.
    pub async fn add(&self, client: Client) {
        self.clients.write().await.insert(client.id.clone(), client);
    }

    /// Get a client by ID.
    pub async fn get(&self, id: &str) -> Option<Client> {
        self.clients.read().await.get(id).cloned()
    }

    /// All clients.
    pub async fn all(&self) -> Vec<Client> {
        self.clients.read().await.values().cloned().collect()
    }

    /// Remove a client.
    pub async fn remove(&self, id: &str) -> Option<Client> {
        self.clients.write().await.remove(id)
    }
}

#[async_trait]
impl Clients for MemoryClients {
    async fn open_window(&self, url: &Url) -> Result<Client, ServiceWorkerError> {
        let mut clients = self.clients.write().await;

        for client in clients.values_mut() {
            client.focused = false;
        }

        let existing = clients
            .values_mut()
            .find(|c| c.client_type == ClientType::Window && c.url == *url);
        if let Some(client) = existing {
            client.focused = true;
            debug!(id = %client.id, url = %url, "Focused existing window");
            return Ok(client.clone());
        }

        let mut client = Client::window(url.clone());
        client.focused = true;
        debug!(id = %client.id, url = %url, "Opened window");
        clients.insert(client.id.clone(), client.clone());
        Ok(client)
    }

    async fn claim(&self) -> Result<usize, ServiceWorkerError> {
        let mut clients = self.clients.write().await;
        for client in clients.values_mut() {
            client.controlled = true;
        }
        Ok(clients.len())
    }
}

// ==================== Registration ====================

/// Worker state as seen by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WorkerState {
    /// Script parsed, not yet installing.
    #[default]
    Parsed,
    /// Install event dispatched.
    Installing,
    /// Installed, waiting for the previous version to let go.
    Installed,
    /// Activate event dispatched.
    Activating,
    /// Active and controlling clients.
    Activated,
    /// Replaced or failed.
    Redundant,
}

/// One version of the worker script.
#[derive(Debug, Clone)]
pub struct WorkerVersion {
    pub id: u64,
    pub script_url: Url,
    pub state: WorkerState,
    pub state_changed_at: Instant,
}

impl WorkerVersion {
    fn new(script_url: Url) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self {
            id: COUNTER.fetch_add(1, Ordering::Relaxed),
            script_url,
            state: WorkerState::Parsed,
            state_changed_at: Instant::now(),
        }
    }

    fn set_state(&mut self, state: WorkerState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }
}

/// Lifecycle capability: promotion requests from inside the worker.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    /// Promote the waiting (or still installing) version without waiting for
    /// existing clients to close.
    async fn skip_waiting(&self) -> Result<(), ServiceWorkerError>;
}

#[derive(Debug, Default)]
struct Slots {
    installing: Option<WorkerVersion>,
    waiting: Option<WorkerVersion>,
    active: Option<WorkerVersion>,
    skip_waiting: bool,
}

impl Slots {
    /// Move the waiting version to active, retiring the old one.
    fn promote(&mut self) -> bool {
        let Some(mut worker) = self.waiting.take() else {
            return false;
        };
        if let Some(mut old) = self.active.take() {
            old.set_state(WorkerState::Redundant);
        }
        worker.set_state(WorkerState::Activating);
        self.active = Some(worker);
        self.skip_waiting = false;
        true
    }
}

/// Host-side registration tracking installing → waiting → active.
#[derive(Debug)]
pub struct Registration {
    pub scope: Url,
    slots: RwLock<Slots>,
}

impl Registration {
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            slots: RwLock::new(Slots::default()),
        }
    }

    /// Start installing a new version of the script.
    pub async fn update(&self, script_url: Url) -> u64 {
        let mut slots = self.slots.write().await;
        if let Some(mut stale) = slots.installing.take() {
            stale.set_state(WorkerState::Redundant);
        }
        let mut worker = WorkerVersion::new(script_url);
        worker.set_state(WorkerState::Installing);
        let id = worker.id;
        slots.installing = Some(worker);
        id
    }

    /// Install finished: the version waits, or activates right away when there
    /// is no active version or skip-waiting was requested.
    ///
    /// Returns `true` when the host should dispatch `activate`.
    pub async fn install_complete(&self) -> bool {
        let mut slots = self.slots.write().await;
        let Some(mut worker) = slots.installing.take() else {
            return false;
        };
        worker.set_state(WorkerState::Installed);
        if let Some(mut superseded) = slots.waiting.replace(worker) {
            superseded.set_state(WorkerState::Redundant);
        }

        if slots.active.is_none() || slots.skip_waiting {
            slots.promote()
        } else {
            false
        }
    }

    /// The activate event settled.
    pub async fn activation_complete(&self) {
        if let Some(ref mut active) = self.slots.write().await.active {
            active.set_state(WorkerState::Activated);
        }
    }

    /// Every client of the old version closed: promote the waiting version.
    pub async fn clients_released(&self) -> bool {
        self.slots.write().await.promote()
    }

    pub async fn active(&self) -> Option<WorkerVersion> {
        self.slots.read().await.active.clone()
    }

    pub async fn waiting(&self) -> Option<WorkerVersion> {
        self.slots.read().await.waiting.clone()
    }

    pub async fn installing(&self) -> Option<WorkerVersion> {
        self.slots.read().await.installing.clone()
    }
}

#[async_trait]
impl Lifecycle for Registration {
    async fn skip_waiting(&self) -> Result<(), ServiceWorkerError> {
        let mut slots = self.slots.write().await;
        if slots.promote() {
            info!(scope = %self.scope, "Waiting worker promoted");
        } else {
            slots.skip_waiting = true;
        }
        Ok(())
    }
}

// ==================== Scope ====================

/// The capabilities a worker instance runs with.
#[derive(Clone)]
pub struct WorkerScope {
    pub caches: Arc<dyn CacheStorage>,
    pub network: Arc<dyn Network>,
    pub notifications: Arc<dyn Notifier>,
    pub clients: Arc<dyn Clients>,
    pub lifecycle: Arc<dyn Lifecycle>,
}
