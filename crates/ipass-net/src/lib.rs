//! # iPass Net
//!
//! Request/response model and the network capability used by the iPass shell
//! worker.
//!
//! ## Design Goals
//!
//! 1. **Snapshot responses**: bodies are fully buffered `Bytes`, so cloning a
//!    response yields an independent, byte-identical copy
//! 2. **Capability seam**: the worker only sees the [`Network`] trait
//! 3. **Response typing**: every response is classified as basic, cors or opaque
//!    relative to the application origin

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info, trace};
use url::Url;

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// What the requesting context intends to do with the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Destination {
    /// Top-level or nested navigation.
    Document,
    Script,
    Style,
    Image,
    Font,
    Manifest,
    /// `fetch()` / XHR and anything without a more specific destination.
    #[default]
    Empty,
}

/// Request mode, which decides how cross-origin responses are exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    Navigate,
    SameOrigin,
    NoCors,
    #[default]
    Cors,
}

/// HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub destination: Destination,
    pub mode: RequestMode,
}

impl Request {
    /// Create a request with the given method.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            url,
            method,
            headers: HeaderMap::new(),
            body: None,
            destination: Destination::Empty,
            mode: RequestMode::Cors,
        }
    }

    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Create a navigation request for a document.
    pub fn navigate(url: Url) -> Self {
        Self::get(url)
            .destination(Destination::Document)
            .mode(RequestMode::Navigate)
    }

    /// Parse `url` and create a GET request for it.
    pub fn parse(url: &str) -> Result<Self, NetError> {
        let url = Url::parse(url).map_err(|e| NetError::InvalidUrl(format!("{}: {}", url, e)))?;
        Ok(Self::get(url))
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the destination.
    pub fn destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    /// Set the request mode.
    pub fn mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the body.
    pub fn body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    /// Whether the request loads a full document.
    pub fn is_navigation(&self) -> bool {
        self.destination == Destination::Document
    }

    /// Whether the request travels over a secure transport.
    pub fn is_secure(&self) -> bool {
        self.url.scheme() == "https"
    }

    /// URL used as the cache key: the request URL without its fragment.
    pub fn cache_url(&self) -> Url {
        let mut url = self.url.clone();
        url.set_fragment(None);
        url
    }
}

/// How a response may be exposed to the requesting context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    /// Same-origin response.
    #[default]
    Basic,
    /// Cross-origin response shared through CORS.
    Cors,
    /// Cross-origin `no-cors` response.
    Opaque,
}

/// HTTP response with a fully buffered body.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub response_type: ResponseType,
    body: Bytes,
}

impl Response {
    /// Create a response.
    pub fn new(url: Url, status: StatusCode, response_type: ResponseType, body: Bytes) -> Self {
        Self {
            url,
            status,
            headers: HeaderMap::new(),
            response_type,
            body,
        }
    }

    /// Create a same-origin 200 response.
    pub fn basic(url: Url, body: impl Into<Bytes>) -> Self {
        Self::new(url, StatusCode::OK, ResponseType::Basic, body.into())
    }

    /// Add a header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Check if request was successful (2xx).
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// The body bytes.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Consume the response, returning its body.
    pub fn into_bytes(self) -> Bytes {
        self.body
    }

    /// Get the body as text.
    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::RequestFailed(e.to_string()))
    }

    /// The `Content-Type` header, if present and readable.
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    /// Header names listed in `Vary`, lowercased. `*` is returned as-is.
    pub fn vary(&self) -> Vec<String> {
        self.headers
            .get_all(http::header::VARY)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(|name| name.trim().to_ascii_lowercase())
            .filter(|name| !name.is_empty())
            .collect()
    }
}

/// The network capability: issue a request, fail on connectivity loss.
#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError>;
}

/// Resource loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Accept-Language header.
    pub accept_language: String,
    /// Network-layer timeout; the worker itself never cancels a request.
    pub timeout: Duration,
    /// Maximum redirects.
    pub max_redirects: usize,
    /// Origin of the application. Only responses from it are `Basic`.
    pub app_origin: Url,
}

impl LoaderConfig {
    /// Default settings for an application served from `app_origin`.
    pub fn new(app_origin: Url) -> Self {
        Self {
            user_agent: format!("iPass-ShellWorker/{}", env!("CARGO_PKG_VERSION")),
            accept_language: "ko-KR,ko;q=0.9,en;q=0.8".to_string(),
            timeout: Duration::from_secs(30),
            max_redirects: 10,
            app_origin,
        }
    }
}

/// reqwest-backed [`Network`].
pub struct ResourceLoader {
    client: Client,
    config: LoaderConfig,
}

impl ResourceLoader {
    /// Create a new resource loader.
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        info!(app_origin = %config.app_origin.origin().ascii_serialization(), "ResourceLoader initialized");

        Ok(Self { client, config })
    }

    /// Classify a response relative to the application origin.
    fn classify(&self, request: &Request, final_url: &Url) -> ResponseType {
        if final_url.origin() == self.config.app_origin.origin() {
            ResponseType::Basic
        } else if request.mode == RequestMode::NoCors {
            ResponseType::Opaque
        } else {
            ResponseType::Cors
        }
    }
}

#[async_trait]
impl Network for ResourceLoader {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        let mut req_builder = self
            .client
            .request(request.method.clone(), request.url.clone());

        for (name, value) in request.headers.iter() {
            req_builder = req_builder.header(name, value);
        }

        if !request.headers.contains_key(http::header::ACCEPT_LANGUAGE) {
            req_builder = req_builder.header("Accept-Language", &self.config.accept_language);
        }

        if let Some(ref body) = request.body {
            req_builder = req_builder.body(body.clone());
        }

        let response = req_builder.send().await.map_err(|e| {
            if e.is_timeout() {
                NetError::Timeout(self.config.timeout)
            } else {
                NetError::HttpError(e)
            }
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let response_type = self.classify(request, &url);
        let body = response.bytes().await?;

        trace!(
            url = %url,
            status = %status,
            response_type = ?response_type,
            body_len = body.len(),
            "Response received"
        );

        let mut response = Response::new(url, status, response_type, body);
        response.headers = headers;
        Ok(response)
    }
}
