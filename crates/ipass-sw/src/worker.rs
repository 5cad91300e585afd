//! The worker instance and its event dispatch table.

use std::sync::Arc;

use hashbrown::HashMap;
use ipass_net::Request;
use tracing::{debug, error, trace};

use crate::config::WorkerConfig;
use crate::events::{EventKind, ExtendableEvent, FetchEvent, FetchOutcome, WorkerEvent};
use crate::generation::GenerationManager;
use crate::handlers;
use crate::host::{Lifetime, WorkerScope};
use crate::intercept::RequestInterceptor;
use crate::ServiceWorkerError;

/// An event handler. Handlers register asynchronous work on the event's
/// lifetime and return immediately.
pub type Handler = fn(&ServiceWorker, &WorkerEvent);

/// A running worker: configuration, host capabilities and handlers.
pub struct ServiceWorker {
    config: Arc<WorkerConfig>,
    scope: WorkerScope,
    generations: Arc<GenerationManager>,
    interceptor: Arc<RequestInterceptor>,
    handlers: HashMap<EventKind, Handler>,
}

impl ServiceWorker {
    /// Create a worker with the default handler for every event kind.
    pub fn new(config: WorkerConfig, scope: WorkerScope) -> Result<Self, ServiceWorkerError> {
        config.validate()?;
        let config = Arc::new(config);

        Ok(Self {
            generations: Arc::new(GenerationManager::new(Arc::clone(&config), scope.clone())),
            interceptor: Arc::new(RequestInterceptor::new(Arc::clone(&config), scope.clone())),
            handlers: Self::default_handlers(),
            config,
            scope,
        })
    }

    fn default_handlers() -> HashMap<EventKind, Handler> {
        let mut table: HashMap<EventKind, Handler> = HashMap::new();
        table.insert(EventKind::Install, on_install);
        table.insert(EventKind::Activate, on_activate);
        table.insert(EventKind::Fetch, on_fetch);
        table.insert(EventKind::Push, handlers::on_push);
        table.insert(EventKind::NotificationClick, handlers::on_notification_click);
        table.insert(EventKind::Message, handlers::on_message);
        table.insert(EventKind::Sync, handlers::on_sync);
        table.insert(EventKind::Error, handlers::on_error);
        table.insert(EventKind::UnhandledRejection, handlers::on_unhandled_rejection);
        table
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn scope(&self) -> &WorkerScope {
        &self.scope
    }

    pub fn generations(&self) -> &GenerationManager {
        &self.generations
    }

    pub fn interceptor(&self) -> &RequestInterceptor {
        &self.interceptor
    }

    /// Replace the handler for `kind`, returning the previous one.
    pub fn set_handler(&mut self, kind: EventKind, handler: Handler) -> Option<Handler> {
        self.handlers.insert(kind, handler)
    }

    /// Remove the handler for `kind`. Events of that kind are then ignored.
    pub fn remove_handler(&mut self, kind: EventKind) -> Option<Handler> {
        self.handlers.remove(&kind)
    }

    /// Route `event` to its handler. Returns `false` when no handler is
    /// registered for its kind.
    pub fn dispatch(&self, event: &WorkerEvent) -> bool {
        let kind = event.kind();
        match self.handlers.get(&kind) {
            Some(handler) => {
                trace!(event = %kind, "Dispatching event");
                handler(self, event);
                true
            }
            None => {
                debug!(event = %kind, "No handler registered");
                false
            }
        }
    }

    /// Dispatch `install` and wait for it to settle.
    pub async fn install(&self) -> Result<(), ServiceWorkerError> {
        let event = WorkerEvent::Install(ExtendableEvent::new());
        self.dispatch(&event);
        first_error(event.settled().await)
    }

    /// Dispatch `activate` and wait for it to settle.
    pub async fn activate(&self) -> Result<(), ServiceWorkerError> {
        let event = WorkerEvent::Activate(ExtendableEvent::new());
        self.dispatch(&event);
        first_error(event.settled().await)
    }

    /// Dispatch `fetch` for `request` and wait for the response.
    ///
    /// The returned lifetime still holds any cache refill; await
    /// [`Lifetime::settled`] to observe it.
    pub async fn fetch(&self, request: Request) -> (FetchOutcome, Lifetime) {
        let event = FetchEvent::new(request);
        let lifetime = event.lifetime.clone();
        let event = WorkerEvent::Fetch(event);
        self.dispatch(&event);

        let WorkerEvent::Fetch(event) = event else {
            return (FetchOutcome::Passthrough, lifetime);
        };
        (event.outcome().await, lifetime)
    }
}

fn first_error(results: Vec<Result<(), ServiceWorkerError>>) -> Result<(), ServiceWorkerError> {
    results.into_iter().find(Result::is_err).unwrap_or(Ok(()))
}

fn on_install(worker: &ServiceWorker, event: &WorkerEvent) {
    let WorkerEvent::Install(event) = event else {
        return;
    };
    let generations = Arc::clone(&worker.generations);
    event
        .lifetime
        .wait_until(async move { generations.install().await.map(|_| ()) });
}

fn on_activate(worker: &ServiceWorker, event: &WorkerEvent) {
    let WorkerEvent::Activate(event) = event else {
        return;
    };
    let generations = Arc::clone(&worker.generations);
    event
        .lifetime
        .wait_until(async move { generations.activate().await.map(|_| ()) });
}

fn on_fetch(worker: &ServiceWorker, event: &WorkerEvent) {
    let WorkerEvent::Fetch(event) = event else {
        return;
    };
    if !worker.interceptor.should_intercept(&event.request) {
        trace!(url = %event.request.url, "Not intercepting insecure request");
        return;
    }

    let interceptor = Arc::clone(&worker.interceptor);
    let request = event.request.clone();
    let lifetime = event.lifetime.clone();
    let registered =
        event.respond_with(async move { interceptor.intercept(&request, &lifetime).await });

    if let Err(e) = registered {
        error!(url = %event.request.url, error = %e, "Failed to register response");
    }
}
