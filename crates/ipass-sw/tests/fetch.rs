//! Fetch interception: cache-first, refill, offline fallback.

mod common;

use common::{init_tracing, url, Harness};
use http::header::{HeaderValue, ACCEPT_LANGUAGE, VARY};
use http::{Method, StatusCode};
use ipass_net::{Destination, Request, Response, ResponseType};
use ipass_sw::{Cache, CacheStorage, FetchOutcome, ResponseSource};

async fn installed() -> Harness {
    let harness = Harness::serving("ipass-v1.0.0", &["/iPass/", "/iPass/index.html"]);
    harness.worker.install().await.unwrap();
    harness
}

#[tokio::test]
async fn cache_hit_never_touches_the_network() {
    init_tracing();
    let harness = installed().await;
    let before = harness.network.calls();

    let (outcome, lifetime) = harness.worker.fetch(Request::get(url("/iPass/index.html"))).await;

    assert_eq!(outcome.source(), Some(ResponseSource::Cache));
    assert_eq!(outcome.response().unwrap().text().unwrap(), "body of /iPass/index.html");
    assert_eq!(harness.network.calls(), before);
    assert_eq!(lifetime.pending(), 0);
}

#[tokio::test]
async fn fragment_is_ignored_on_lookup() {
    let harness = installed().await;
    let before = harness.network.calls();

    let (outcome, _) = harness.worker.fetch(Request::get(url("/iPass/#vault"))).await;

    assert_eq!(outcome.source(), Some(ResponseSource::Cache));
    assert_eq!(harness.network.calls(), before);
}

#[tokio::test]
async fn miss_is_refilled_with_the_same_response() {
    init_tracing();
    let harness = installed().await;
    let data = url("/iPass/data.json");
    harness.network.serve(data.clone(), r#"{"entries":3}"#);

    let (outcome, lifetime) = harness.worker.fetch(Request::get(data.clone())).await;
    assert_eq!(outcome.source(), Some(ResponseSource::Network));
    let delivered = outcome.response().unwrap().clone();

    let results = lifetime.settled().await;
    assert!(results.iter().all(Result::is_ok));

    let cache = harness.memory().get("ipass-v1.0.0").await.unwrap();
    let stored = cache.match_request(&Request::get(data.clone())).await.unwrap().unwrap();
    assert_eq!(stored.status, delivered.status);
    assert_eq!(stored.body(), delivered.body());

    // The second fetch is served from the refilled entry.
    let before = harness.network.calls();
    let (again, _) = harness.worker.fetch(Request::get(data)).await;
    assert_eq!(again.source(), Some(ResponseSource::Cache));
    assert_eq!(again.response().unwrap().body(), delivered.body());
    assert_eq!(harness.network.calls(), before);
}

#[tokio::test]
async fn failed_refill_still_delivers_the_response() {
    init_tracing();
    let harness = installed().await;
    let data = url("/iPass/data.json");
    harness.network.serve(data.clone(), r#"{"entries":3}"#);
    harness.caches.set_read_only(true);

    let (outcome, lifetime) = harness.worker.fetch(Request::get(data.clone())).await;

    assert_eq!(outcome.source(), Some(ResponseSource::Network));
    let response = outcome.response().unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.text().unwrap(), r#"{"entries":3}"#);

    let results = lifetime.settled().await;
    assert_eq!(results.len(), 1);
    assert!(results.iter().all(Result::is_ok));
    assert!(harness
        .caches
        .match_request(&Request::get(data))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn non_basic_or_non_200_responses_are_not_cached() {
    let harness = installed().await;
    let cdn = url("/cdn/lib.js");
    let created = url("/iPass/created");
    let missing = url("/iPass/missing");
    harness.network.route(cdn.clone(), StatusCode::OK, ResponseType::Cors, "lib");
    harness.network.route(created.clone(), StatusCode::CREATED, ResponseType::Basic, "new");

    for target in [&cdn, &created, &missing] {
        let (outcome, lifetime) = harness.worker.fetch(Request::get(target.clone())).await;
        assert_eq!(outcome.source(), Some(ResponseSource::Network));
        assert_eq!(lifetime.pending(), 0);
        lifetime.settled().await;
    }

    // Non-ok status reaches the page unchanged.
    let (outcome, _) = harness.worker.fetch(Request::get(missing.clone())).await;
    assert_eq!(outcome.response().unwrap().status, StatusCode::NOT_FOUND);

    let cache = harness.memory().get("ipass-v1.0.0").await.unwrap();
    assert_eq!(cache.len().await, 2);
}

#[tokio::test]
async fn opaque_responses_pass_through_uncached() {
    let harness = installed().await;
    let font = url("/fonts/pretendard.woff2");
    harness.network.route(font.clone(), StatusCode::OK, ResponseType::Opaque, "");

    let (outcome, lifetime) = harness
        .worker
        .fetch(Request::get(font.clone()).destination(Destination::Font))
        .await;
    lifetime.settled().await;

    assert_eq!(outcome.response().unwrap().response_type, ResponseType::Opaque);
    assert!(harness
        .caches
        .match_request(&Request::get(font))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn offline_navigation_falls_back_to_the_shell() {
    init_tracing();
    let harness = installed().await;
    harness.network.set_offline(true);

    let (outcome, _) = harness.worker.fetch(Request::navigate(url("/iPass/settings"))).await;

    assert_eq!(outcome.source(), Some(ResponseSource::OfflineFallback));
    assert_eq!(outcome.response().unwrap().text().unwrap(), "body of /iPass/index.html");
}

#[tokio::test]
async fn offline_subresource_is_unavailable() {
    let harness = installed().await;
    harness.network.set_offline(true);

    let request = Request::get(url("/iPass/photo.png")).destination(Destination::Image);
    let (outcome, _) = harness.worker.fetch(request).await;

    assert_eq!(outcome.source(), Some(ResponseSource::Unavailable));
    assert!(outcome.response().is_none());
}

#[tokio::test]
async fn offline_navigation_without_a_shell_is_unavailable() {
    let harness = Harness::serving("ipass-v1.0.0", &["/iPass/", "/iPass/index.html"]);
    harness.network.set_offline(true);

    let (outcome, _) = harness.worker.fetch(Request::navigate(url("/iPass/settings"))).await;

    assert_eq!(outcome.source(), Some(ResponseSource::Unavailable));
}

#[tokio::test]
async fn insecure_requests_are_not_intercepted() {
    let harness = installed().await;
    let before = harness.network.calls();

    let request = Request::parse("http://ipass.example/iPass/index.html").unwrap();
    let (outcome, _) = harness.worker.fetch(request).await;

    assert!(matches!(outcome, FetchOutcome::Passthrough));
    assert_eq!(harness.network.calls(), before);
}

#[tokio::test]
async fn non_get_requests_go_to_the_network() {
    let harness = installed().await;
    let before = harness.network.calls();

    let request = Request::new(Method::POST, url("/iPass/index.html"));
    let (outcome, lifetime) = harness.worker.fetch(request).await;
    lifetime.settled().await;

    assert_eq!(outcome.source(), Some(ResponseSource::Network));
    assert_eq!(harness.network.calls(), before + 1);
}

#[tokio::test]
async fn earlier_generations_still_answer_lookups() {
    let harness = Harness::serving("ipass-v1.0.0", &["/iPass/index.html"]);
    let old = harness.caches.open("ipass-v0.9.0").await.unwrap();
    let legacy = url("/iPass/legacy.js");
    old.put(&Request::get(legacy.clone()), Response::basic(legacy.clone(), "old"))
        .await
        .unwrap();

    let (outcome, _) = harness.worker.fetch(Request::get(legacy)).await;

    assert_eq!(outcome.source(), Some(ResponseSource::Cache));
    assert_eq!(outcome.response().unwrap().text().unwrap(), "old");
}

#[tokio::test]
async fn vary_selects_the_matching_variant() {
    let harness = Harness::serving("ipass-v1.0.0", &["/iPass/index.html"]);
    let cache = harness.caches.open("ipass-v1.0.0").await.unwrap();
    let strings = url("/iPass/strings.json");

    for (lang, body) in [("ko", "안녕"), ("en", "hello")] {
        let request =
            Request::get(strings.clone()).header(ACCEPT_LANGUAGE, HeaderValue::from_static(lang));
        let response = Response::basic(strings.clone(), body)
            .with_header(VARY, HeaderValue::from_static("Accept-Language"));
        cache.put(&request, response).await.unwrap();
    }

    let english =
        Request::get(strings.clone()).header(ACCEPT_LANGUAGE, HeaderValue::from_static("en"));
    let (outcome, _) = harness.worker.fetch(english).await;
    assert_eq!(outcome.response().unwrap().text().unwrap(), "hello");
}
