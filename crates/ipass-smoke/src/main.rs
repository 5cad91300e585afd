//! iPass Smoke Harness
//!
//! Runs the shell worker against a live origin: registers, installs and
//! activates it, then fetches each requested URL twice (the second should
//! come from cache) and prints a JSON summary.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use ipass_common::{init_logging, LogConfig, LogFormat};
use ipass_net::{LoaderConfig, Request, ResourceLoader};
use ipass_sw::config::{CACHE_NAME, MANIFEST_PATHS};
use ipass_sw::{
    CacheStorage, FetchOutcome, MemoryCacheStorage, MemoryClients, NotificationCenter,
    Registration, ServiceWorker, WorkerConfig, WorkerScope,
};
use serde_json::json;
use tracing::{error, info, warn};
use url::Url;

/// Collects operation durations.
#[derive(Default)]
struct PerfTiming {
    timings: HashMap<&'static str, Vec<Duration>>,
}

impl PerfTiming {
    fn record(&mut self, operation: &'static str, duration: Duration) {
        self.timings.entry(operation).or_default().push(duration);
    }

    fn summary(&self) -> serde_json::Value {
        let mut summary = serde_json::Map::new();

        for (op, durations) in &self.timings {
            if durations.is_empty() {
                continue;
            }

            let millis: Vec<f64> = durations.iter().map(|d| d.as_secs_f64() * 1000.0).collect();
            let total_ms: f64 = millis.iter().sum();
            let max_ms = millis.iter().copied().fold(f64::NEG_INFINITY, f64::max);

            summary.insert(
                op.to_string(),
                json!({
                    "count": millis.len(),
                    "total_ms": (total_ms * 100.0).round() / 100.0,
                    "avg_ms": (total_ms / millis.len() as f64 * 100.0).round() / 100.0,
                    "max_ms": (max_ms * 100.0).round() / 100.0,
                }),
            );
        }

        serde_json::Value::Object(summary)
    }
}

/// Parse command line arguments
struct Args {
    origin: String,
    generation: String,
    manifest: Vec<String>,
    fetch: Vec<String>,
    json_logs: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut origin = "http://127.0.0.1:8080".to_string();
        let mut generation = CACHE_NAME.to_string();
        let mut manifest = Vec::new();
        let mut fetch = Vec::new();
        let mut json_logs = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--origin" => {
                    if let Some(val) = args.next() {
                        origin = val;
                    }
                }
                "--generation" => {
                    if let Some(val) = args.next() {
                        generation = val;
                    }
                }
                "--manifest" => manifest.extend(args.next()),
                "--fetch" => fetch.extend(args.next()),
                "--json-logs" => json_logs = true,
                other => eprintln!("Warning: ignoring unknown argument {}", other),
            }
        }

        if manifest.is_empty() {
            manifest = MANIFEST_PATHS.iter().map(|p| p.to_string()).collect();
        }

        Self {
            origin,
            generation,
            manifest,
            fetch,
            json_logs,
        }
    }
}

fn describe(outcome: &FetchOutcome) -> serde_json::Value {
    match outcome {
        FetchOutcome::Passthrough => json!({ "source": "passthrough" }),
        FetchOutcome::Responded(interception) => json!({
            "source": format!("{:?}", interception.source),
            "status": interception.response.as_ref().map(|r| r.status.as_u16()),
            "bytes": interception.response.as_ref().map(|r| r.body().len()),
        }),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_format = if args.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    init_logging(&LogConfig::default().with_format(log_format));

    let origin = Url::parse(&args.origin).with_context(|| format!("invalid origin {}", args.origin))?;
    info!(
        origin = %origin,
        generation = %args.generation,
        manifest = args.manifest.len(),
        fetch = args.fetch.len(),
        "Starting iPass Smoke Harness"
    );

    let manifest: Vec<&str> = args.manifest.iter().map(String::as_str).collect();
    let config = WorkerConfig::new(args.generation.clone(), origin.clone(), &manifest)?;

    let loader = ResourceLoader::new(LoaderConfig::new(origin.clone()))?;
    let caches = Arc::new(MemoryCacheStorage::new());
    let clients = Arc::new(MemoryClients::new());
    let notifications = Arc::new(NotificationCenter::new());
    let registration = Arc::new(Registration::new(config.start_url.clone()));

    let scope = WorkerScope {
        caches: caches.clone(),
        network: Arc::new(loader),
        notifications,
        clients: clients.clone(),
        lifecycle: registration.clone(),
    };
    let worker = ServiceWorker::new(config, scope)?;
    let mut perf = PerfTiming::default();

    registration.update(origin.join("sw.js")?).await;

    let start = Instant::now();
    let install = worker.install().await;
    perf.record("install", start.elapsed());
    if let Err(ref e) = install {
        warn!(category = e.category(), error = %e, "Install finished with errors");
    }

    let mut activation = None;
    if registration.install_complete().await {
        let start = Instant::now();
        match worker.generations().activate().await {
            Ok(report) => activation = Some(report),
            Err(e) => error!(category = e.category(), error = %e, "Activation failed"),
        }
        perf.record("activate", start.elapsed());
        registration.activation_complete().await;
    }

    let mut fetches = Vec::new();
    for target in &args.fetch {
        let request = Request::get(origin.join(target)?);

        let mut attempts = Vec::new();
        for _ in 0..2 {
            let start = Instant::now();
            let (outcome, lifetime) = worker.fetch(request.clone()).await;
            perf.record("fetch", start.elapsed());
            lifetime.settled().await;
            attempts.push(describe(&outcome));
        }
        fetches.push(json!({ "url": request.url.as_str(), "attempts": attempts }));
    }

    let generation = worker.config().generation.as_str();
    let cached = match caches.get(generation).await {
        Some(cache) => cache.len().await,
        None => 0,
    };

    let result = json!({
        "generation": generation,
        "install": {
            "ok": install.is_ok(),
            "error": install.as_ref().err().map(|e| e.to_string()),
            "cached": cached,
        },
        "activate": activation.as_ref().map(|report| json!({
            "deleted": report.deleted,
            "failed": report.failed,
            "claimed": report.claimed,
        })),
        "caches": caches.keys().await?,
        "clients": clients.all().await.len(),
        "state": format!("{:?}", worker.generations().state().await),
        "fetches": fetches,
        "perf": perf.summary(),
    });
    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(())
}
