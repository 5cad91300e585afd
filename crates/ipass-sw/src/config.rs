//! Build-time worker configuration.
//!
//! The deployed worker is configured entirely by the constants below; bumping
//! [`CACHE_NAME`] is how a new app shell is rolled out.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use url::Url;

/// Current cache generation.
pub const CACHE_NAME: &str = "ipass-v1.0.0";

/// App shell and third-party libraries seeded at install.
pub const MANIFEST_PATHS: &[&str] = &[
    "/iPass/",
    "/iPass/index.html",
    "/iPass/icon.png",
    "/iPass/og_image.png",
    "https://unpkg.com/react@18/umd/react.production.min.js",
    "https://unpkg.com/react-dom@18/umd/react-dom.production.min.js",
    "https://unpkg.com/@babel/standalone/babel.min.js",
    "https://unpkg.com/lucide@latest/dist/umd/lucide.js",
    "https://cdn.tailwindcss.com",
];

/// Root HTML served when a navigation fails offline.
pub const SHELL_DOCUMENT: &str = "/iPass/index.html";

/// Window opened from the notification `explore` action.
pub const START_URL: &str = "/iPass/";

/// Background-sync tag the worker reacts to.
pub const SYNC_TAG: &str = "background-sync";

pub const NOTIFICATION_TITLE: &str = "iPass";
pub const DEFAULT_PUSH_BODY: &str = "새로운 알림이 있습니다.";
pub const APP_ICON: &str = "/iPass/icon.png";
pub const VIBRATION_PATTERN: &[u32] = &[100, 50, 100];
pub const EXPLORE_ACTION: &str = "explore";
pub const CLOSE_ACTION: &str = "close";

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Generation identifier is empty")]
    EmptyGeneration,

    #[error("Manifest is empty")]
    EmptyManifest,

    #[error("Duplicate manifest entry: {0}")]
    DuplicateEntry(String),

    #[error("Shell document {0} is not in the manifest")]
    ShellNotInManifest(String),

    #[error("Invalid URL {entry}: {source}")]
    InvalidUrl {
        entry: String,
        #[source]
        source: url::ParseError,
    },
}

/// Identifier of one cache generation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenerationId(String);

impl GenerationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A button shown on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    pub icon: Option<Url>,
}

/// Fixed presentation of push notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub title: String,
    /// Body used when a push carries no payload.
    pub default_body: String,
    pub icon: Url,
    pub badge: Url,
    pub vibrate: Vec<u32>,
    pub actions: Vec<NotificationAction>,
}

impl NotificationConfig {
    /// The iPass notification style, with assets resolved against `origin`.
    pub fn ipass(origin: &Url) -> Result<Self, ConfigError> {
        let icon = resolve(origin, APP_ICON)?;
        Ok(Self {
            title: NOTIFICATION_TITLE.to_string(),
            default_body: DEFAULT_PUSH_BODY.to_string(),
            badge: icon.clone(),
            vibrate: VIBRATION_PATTERN.to_vec(),
            actions: vec![
                NotificationAction {
                    action: EXPLORE_ACTION.to_string(),
                    title: "열기".to_string(),
                    icon: Some(icon.clone()),
                },
                NotificationAction {
                    action: CLOSE_ACTION.to_string(),
                    title: "닫기".to_string(),
                    icon: Some(icon.clone()),
                },
            ],
            icon,
        })
    }
}

/// Immutable worker configuration shared by every component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Current cache generation.
    pub generation: GenerationId,
    /// Origin the app is served from.
    pub origin: Url,
    /// Absolute URLs seeded at install, in order.
    pub manifest: Vec<Url>,
    /// Offline fallback for navigations.
    pub shell_document: Url,
    /// Window opened from notifications.
    pub start_url: Url,
    /// Recognized background-sync tag.
    pub sync_tag: String,
    pub notification: NotificationConfig,
}

impl WorkerConfig {
    /// The deployed iPass configuration for `origin`.
    pub fn ipass(origin: Url) -> Result<Self, ConfigError> {
        Self::new(CACHE_NAME, origin, MANIFEST_PATHS)
    }

    /// Configuration with a custom generation and manifest. Relative manifest
    /// entries are resolved against `origin`.
    pub fn new(
        generation: impl Into<String>,
        origin: Url,
        manifest: &[&str],
    ) -> Result<Self, ConfigError> {
        let manifest = manifest
            .iter()
            .map(|entry| resolve(&origin, entry))
            .collect::<Result<Vec<_>, _>>()?;

        let config = Self {
            generation: GenerationId::new(generation),
            shell_document: resolve(&origin, SHELL_DOCUMENT)?,
            start_url: resolve(&origin, START_URL)?,
            sync_tag: SYNC_TAG.to_string(),
            notification: NotificationConfig::ipass(&origin)?,
            manifest,
            origin,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the install protocol relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.generation.as_str().trim().is_empty() {
            return Err(ConfigError::EmptyGeneration);
        }
        if self.manifest.is_empty() {
            return Err(ConfigError::EmptyManifest);
        }

        for (i, url) in self.manifest.iter().enumerate() {
            if self.manifest[..i].contains(url) {
                return Err(ConfigError::DuplicateEntry(url.to_string()));
            }
        }

        if !self.manifest.contains(&self.shell_document) {
            return Err(ConfigError::ShellNotInManifest(self.shell_document.to_string()));
        }

        Ok(())
    }
}

fn resolve(origin: &Url, entry: &str) -> Result<Url, ConfigError> {
    origin.join(entry).map_err(|source| ConfigError::InvalidUrl {
        entry: entry.to_string(),
        source,
    })
}
