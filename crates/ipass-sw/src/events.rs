//! Host lifecycle events and their payloads.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use bytes::Bytes;
use ipass_net::{Request, Response};
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::error;

use crate::host::{Lifetime, Notification};
use crate::intercept::{Interception, ResponseSource};
use crate::ServiceWorkerError;

/// Event kinds the host dispatches to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Install,
    Activate,
    Fetch,
    Push,
    NotificationClick,
    Message,
    Sync,
    Error,
    UnhandledRejection,
}

impl EventKind {
    pub const ALL: [EventKind; 9] = [
        EventKind::Install,
        EventKind::Activate,
        EventKind::Fetch,
        EventKind::Push,
        EventKind::NotificationClick,
        EventKind::Message,
        EventKind::Sync,
        EventKind::Error,
        EventKind::UnhandledRejection,
    ];

    /// DOM event type name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Install => "install",
            EventKind::Activate => "activate",
            EventKind::Fetch => "fetch",
            EventKind::Push => "push",
            EventKind::NotificationClick => "notificationclick",
            EventKind::Message => "message",
            EventKind::Sync => "sync",
            EventKind::Error => "error",
            EventKind::UnhandledRejection => "unhandledrejection",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Install / activate event.
#[derive(Debug, Default)]
pub struct ExtendableEvent {
    pub lifetime: Lifetime,
}

impl ExtendableEvent {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Result of dispatching a fetch event.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// The worker did not respond; the host performs the request itself.
    Passthrough,
    /// The worker responded. `None` inside means the host sees a network error.
    Responded(Interception),
}

impl FetchOutcome {
    pub fn response(&self) -> Option<&Response> {
        match self {
            FetchOutcome::Passthrough => None,
            FetchOutcome::Responded(interception) => interception.response.as_ref(),
        }
    }

    pub fn source(&self) -> Option<ResponseSource> {
        match self {
            FetchOutcome::Passthrough => None,
            FetchOutcome::Responded(interception) => Some(interception.source),
        }
    }
}

/// Fetch event.
#[derive(Debug)]
pub struct FetchEvent {
    pub request: Request,
    pub lifetime: Lifetime,
    response: Mutex<Option<JoinHandle<Interception>>>,
}

impl FetchEvent {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            lifetime: Lifetime::new(),
            response: Mutex::new(None),
        }
    }

    /// Answer the request with the output of `future`. Only one response may be
    /// registered per event.
    pub fn respond_with<F>(&self, future: F) -> Result<(), ServiceWorkerError>
    where
        F: Future<Output = Interception> + Send + 'static,
    {
        let mut slot = self.response.lock().unwrap_or_else(|p| p.into_inner());
        if slot.is_some() {
            return Err(ServiceWorkerError::InvalidState(format!(
                "respond_with already called for {}",
                self.request.url
            )));
        }
        *slot = Some(tokio::spawn(future));
        Ok(())
    }

    /// Wait for the registered response, if any. Work registered on
    /// [`FetchEvent::lifetime`] is not awaited.
    pub async fn outcome(&self) -> FetchOutcome {
        let handle = self.response.lock().unwrap_or_else(|p| p.into_inner()).take();
        match handle {
            None => FetchOutcome::Passthrough,
            Some(handle) => match handle.await {
                Ok(interception) => FetchOutcome::Responded(interception),
                Err(e) => {
                    error!(url = %self.request.url, error = %e, "Fetch handler task failed");
                    FetchOutcome::Responded(Interception::unavailable())
                }
            },
        }
    }
}

/// Push payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushMessageData(Bytes);

impl PushMessageData {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self(data.into())
    }

    /// Payload decoded as UTF-8, invalid sequences replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }

    pub fn bytes(&self) -> &Bytes {
        &self.0
    }
}

/// Push event.
#[derive(Debug, Default)]
pub struct PushEvent {
    pub data: Option<PushMessageData>,
    pub lifetime: Lifetime,
}

impl PushEvent {
    pub fn new(data: Option<PushMessageData>) -> Self {
        Self {
            data,
            lifetime: Lifetime::new(),
        }
    }
}

/// Notification click event.
#[derive(Debug)]
pub struct NotificationEvent {
    pub notification: Notification,
    /// Action button chosen, `None` for a click on the body.
    pub action: Option<String>,
    pub lifetime: Lifetime,
}

impl NotificationEvent {
    pub fn new(notification: Notification, action: Option<&str>) -> Self {
        Self {
            notification,
            action: action.map(str::to_string),
            lifetime: Lifetime::new(),
        }
    }
}

/// Messages pages send to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Promote the waiting worker now.
    SkipWaiting,
}

/// Message event.
#[derive(Debug, Default)]
pub struct MessageEvent {
    pub data: serde_json::Value,
    /// Sending client, when known.
    pub source: Option<String>,
    pub lifetime: Lifetime,
}

impl MessageEvent {
    pub fn new(data: serde_json::Value) -> Self {
        Self {
            data,
            source: None,
            lifetime: Lifetime::new(),
        }
    }

    /// The payload as a known message, if it is one.
    pub fn message(&self) -> Option<ClientMessage> {
        ClientMessage::deserialize(&self.data).ok()
    }
}

/// Background sync event.
#[derive(Debug, Default)]
pub struct SyncEvent {
    pub tag: String,
    /// Whether the host will give up on this tag after this attempt.
    pub last_chance: bool,
    pub lifetime: Lifetime,
}

impl SyncEvent {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            last_chance: false,
            lifetime: Lifetime::new(),
        }
    }
}

/// Uncaught error inside the worker.
#[derive(Debug, Clone, Default)]
pub struct ErrorEvent {
    pub message: String,
    pub filename: Option<String>,
    pub lineno: Option<u32>,
}

impl ErrorEvent {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }
}

/// Rejected asynchronous work nobody handled.
#[derive(Debug, Default)]
pub struct RejectionEvent {
    pub reason: String,
    default_prevented: AtomicBool,
}

impl RejectionEvent {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            default_prevented: AtomicBool::new(false),
        }
    }

    /// Mark the rejection handled so the host does not report it.
    pub fn prevent_default(&self) {
        self.default_prevented.store(true, Ordering::Relaxed);
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented.load(Ordering::Relaxed)
    }
}

/// An event dispatched by the host.
#[derive(Debug)]
pub enum WorkerEvent {
    Install(ExtendableEvent),
    Activate(ExtendableEvent),
    Fetch(FetchEvent),
    Push(PushEvent),
    NotificationClick(NotificationEvent),
    Message(MessageEvent),
    Sync(SyncEvent),
    Error(ErrorEvent),
    UnhandledRejection(RejectionEvent),
}

impl WorkerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            WorkerEvent::Install(_) => EventKind::Install,
            WorkerEvent::Activate(_) => EventKind::Activate,
            WorkerEvent::Fetch(_) => EventKind::Fetch,
            WorkerEvent::Push(_) => EventKind::Push,
            WorkerEvent::NotificationClick(_) => EventKind::NotificationClick,
            WorkerEvent::Message(_) => EventKind::Message,
            WorkerEvent::Sync(_) => EventKind::Sync,
            WorkerEvent::Error(_) => EventKind::Error,
            WorkerEvent::UnhandledRejection(_) => EventKind::UnhandledRejection,
        }
    }

    /// The extend-lifetime registry, for events that carry one.
    pub fn lifetime(&self) -> Option<&Lifetime> {
        match self {
            WorkerEvent::Install(e) | WorkerEvent::Activate(e) => Some(&e.lifetime),
            WorkerEvent::Fetch(e) => Some(&e.lifetime),
            WorkerEvent::Push(e) => Some(&e.lifetime),
            WorkerEvent::NotificationClick(e) => Some(&e.lifetime),
            WorkerEvent::Message(e) => Some(&e.lifetime),
            WorkerEvent::Sync(e) => Some(&e.lifetime),
            WorkerEvent::Error(_) | WorkerEvent::UnhandledRejection(_) => None,
        }
    }

    /// Await everything the handler registered. Events without a lifetime
    /// settle immediately.
    pub async fn settled(&self) -> Vec<Result<(), ServiceWorkerError>> {
        match self.lifetime() {
            Some(lifetime) => lifetime.settled().await,
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_kind_names() {
        assert_eq!(EventKind::NotificationClick.as_str(), "notificationclick");
        assert_eq!(EventKind::UnhandledRejection.to_string(), "unhandledrejection");
        assert_eq!(EventKind::ALL.len(), 9);
    }

    #[test]
    fn test_skip_waiting_message() {
        let event = MessageEvent::new(json!({ "type": "SKIP_WAITING" }));
        assert_eq!(event.message(), Some(ClientMessage::SkipWaiting));
    }

    #[test]
    fn test_unknown_messages_are_ignored() {
        assert_eq!(MessageEvent::new(json!({ "type": "REFRESH" })).message(), None);
        assert_eq!(MessageEvent::new(json!("SKIP_WAITING")).message(), None);
        assert_eq!(MessageEvent::new(serde_json::Value::Null).message(), None);
    }

    #[test]
    fn test_push_text_is_lossy() {
        let data = PushMessageData::new(vec![0x68, 0x69, 0xff]);
        assert_eq!(data.text(), "hi\u{fffd}");
    }

    #[test]
    fn test_rejection_prevent_default() {
        let event = RejectionEvent::new("boom");
        assert!(!event.default_prevented());
        event.prevent_default();
        assert!(event.default_prevented());
    }

    #[tokio::test]
    async fn test_respond_with_only_once() {
        let request = Request::parse("https://ipass.example/iPass/").unwrap();
        let event = FetchEvent::new(request);

        event.respond_with(async { Interception::unavailable() }).unwrap();
        assert!(event.respond_with(async { Interception::unavailable() }).is_err());

        let outcome = event.outcome().await;
        assert_eq!(outcome.source(), Some(ResponseSource::Unavailable));
        assert!(outcome.response().is_none());
    }

    #[tokio::test]
    async fn test_no_response_is_passthrough() {
        let request = Request::parse("http://ipass.example/iPass/").unwrap();
        let event = FetchEvent::new(request);
        assert!(matches!(event.outcome().await, FetchOutcome::Passthrough));
    }
}
