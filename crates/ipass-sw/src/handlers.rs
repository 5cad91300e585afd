//! Auxiliary event handlers: push, notification click, message, sync, errors.
//!
//! None of these touch the cache. Each performs one side effect through the
//! worker's host capabilities.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::config::{NotificationConfig, EXPLORE_ACTION};
use crate::events::{ClientMessage, PushMessageData, WorkerEvent};
use crate::host::{NotificationData, NotificationOptions};
use crate::now_millis;
use crate::worker::ServiceWorker;

/// Build the notification shown for a push with `data`.
pub fn push_notification(
    config: &NotificationConfig,
    data: Option<&PushMessageData>,
) -> NotificationOptions {
    let body = match data {
        Some(data) => data.text(),
        None => config.default_body.clone(),
    };

    NotificationOptions {
        body,
        icon: config.icon.clone(),
        badge: config.badge.clone(),
        vibrate: config.vibrate.clone(),
        data: NotificationData {
            date_of_arrival: now_millis(),
            primary_key: 1,
        },
        actions: config.actions.clone(),
    }
}

pub(crate) fn on_push(worker: &ServiceWorker, event: &WorkerEvent) {
    let WorkerEvent::Push(event) = event else {
        return;
    };
    info!("Service Worker: Push message received");

    let notification = &worker.config().notification;
    let options = push_notification(notification, event.data.as_ref());
    let title = notification.title.clone();
    let notifier = Arc::clone(&worker.scope().notifications);

    event.lifetime.wait_until(async move {
        notifier.show_notification(&title, options).await?;
        Ok(())
    });
}

pub(crate) fn on_notification_click(worker: &ServiceWorker, event: &WorkerEvent) {
    let WorkerEvent::NotificationClick(event) = event else {
        return;
    };
    info!(
        id = event.notification.id,
        action = ?event.action,
        "Service Worker: Notification click received"
    );

    event.notification.close();

    if event.action.as_deref() == Some(EXPLORE_ACTION) {
        let clients = Arc::clone(&worker.scope().clients);
        let url = worker.config().start_url.clone();
        event.lifetime.wait_until(async move {
            clients.open_window(&url).await?;
            Ok(())
        });
    }
}

pub(crate) fn on_message(worker: &ServiceWorker, event: &WorkerEvent) {
    let WorkerEvent::Message(event) = event else {
        return;
    };
    info!(data = %event.data, source = ?event.source, "Service Worker: Message received");

    match event.message() {
        Some(ClientMessage::SkipWaiting) => {
            let lifecycle = Arc::clone(&worker.scope().lifecycle);
            event.lifetime.wait_until(async move { lifecycle.skip_waiting().await });
        }
        None => debug!("Ignoring unrecognized message"),
    }
}

pub(crate) fn on_sync(worker: &ServiceWorker, event: &WorkerEvent) {
    let WorkerEvent::Sync(event) = event else {
        return;
    };
    info!(tag = %event.tag, "Service Worker: Background sync");

    if event.tag == worker.config().sync_tag {
        let tag = event.tag.clone();
        event.lifetime.wait_until(async move {
            // Nothing is queued for deferred delivery yet.
            debug!(%tag, "Background sync complete");
            Ok(())
        });
    } else {
        debug!(tag = %event.tag, "Ignoring unknown sync tag");
    }
}

pub(crate) fn on_error(_worker: &ServiceWorker, event: &WorkerEvent) {
    let WorkerEvent::Error(event) = event else {
        return;
    };
    error!(
        message = %event.message,
        filename = ?event.filename,
        lineno = ?event.lineno,
        "Service Worker: Error occurred"
    );
}

pub(crate) fn on_unhandled_rejection(_worker: &ServiceWorker, event: &WorkerEvent) {
    let WorkerEvent::UnhandledRejection(event) = event else {
        return;
    };
    error!(reason = %event.reason, "Service Worker: Unhandled promise rejection");
    event.prevent_default();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_PUSH_BODY;
    use url::Url;

    fn config() -> NotificationConfig {
        NotificationConfig::ipass(&Url::parse("https://ipass.example").unwrap()).unwrap()
    }

    #[test]
    fn test_push_without_data_uses_default_body() {
        let options = push_notification(&config(), None);
        assert_eq!(options.body, DEFAULT_PUSH_BODY);
        assert!(!options.body.is_empty());
    }

    #[test]
    fn test_push_with_data_uses_text() {
        let data = PushMessageData::new("비밀번호가 변경되었습니다");
        let options = push_notification(&config(), Some(&data));
        assert_eq!(options.body, "비밀번호가 변경되었습니다");
    }

    #[test]
    fn test_push_notification_presentation() {
        let options = push_notification(&config(), None);
        assert_eq!(options.icon.as_str(), "https://ipass.example/iPass/icon.png");
        assert_eq!(options.vibrate, vec![100, 50, 100]);
        assert_eq!(options.data.primary_key, 1);
        assert!(options.data.date_of_arrival > 0);
        assert_eq!(options.actions.len(), 2);
    }
}
