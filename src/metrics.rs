use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder, core::Collector,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;

use crate::io_util::{read_once_with_timeout, shutdown_with_timeout, write_all_with_timeout};
use crate::proxy::request::parse_request_line;

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

fn register<C>(collector: C, name: &str) -> C
where
    C: Collector + Clone + 'static,
{
    REGISTRY
        .register(Box::new(collector.clone()))
        .unwrap_or_else(|err| panic!("register {name}: {err}"));
    collector
}

fn counter(name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).unwrap_or_else(|err| panic!("create {name}: {err}"));
    register(counter, name)
}

fn counter_vec(name: &str, help: &str, label: &str) -> IntCounterVec {
    let vec = IntCounterVec::new(Opts::new(name, help), &[label])
        .unwrap_or_else(|err| panic!("create {name}: {err}"));
    register(vec, name)
}

static REQUESTS_BY_STATUS: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec(
        "requests_status_total",
        "Proxied requests by response status class",
        "status_class",
    )
});

static REQUEST_DURATION: Lazy<Histogram> = Lazy::new(|| {
    let opts = HistogramOpts::new("request_duration_seconds", "Time spent handling a request")
        .buckets(vec![
            0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0,
        ]);
    let histogram = Histogram::with_opts(opts).expect("create request_duration_seconds");
    register(histogram, "request_duration_seconds")
});

static CACHE_LOOKUPS: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec("cache_lookup_total", "Response cache lookups by result", "result")
});

static CACHE_STORES: Lazy<IntCounter> =
    Lazy::new(|| counter("cache_store_total", "Upstream responses written to the cache"));

static CACHE_STORE_ERRORS: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "cache_store_errors_total",
        "Upstream responses relayed without being cached",
    )
});

static CACHE_EVICTIONS: Lazy<IntCounter> =
    Lazy::new(|| counter("cache_evictions_total", "Oldest entries evicted to make room"));

static CACHE_PURGED_FILES: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "cache_purged_files_total",
        "Unreachable cache files removed at startup",
    )
});

static CACHE_ENTRIES: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new("cache_entries", "Entries currently cached")
        .expect("create cache_entries");
    register(gauge, "cache_entries")
});

static UPSTREAM_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec("upstream_errors_total", "Upstream failures by kind", "kind")
});

const METRICS_PATH: &str = "/metrics";
const METRICS_MAX_REQUEST_BYTES: usize = 1024;
const METRICS_IO_TIMEOUT: Duration = Duration::from_secs(5);

fn status_class(status: Option<u16>) -> &'static str {
    match status {
        Some(100..=199) => "1xx",
        Some(200..=299) => "2xx",
        Some(300..=399) => "3xx",
        Some(400..=499) => "4xx",
        Some(500..=599) => "5xx",
        Some(_) => "other",
        // closed without a response, or relayed bytes without a status line
        None => "none",
    }
}

pub fn record_request(status: Option<u16>, elapsed: Duration) {
    REQUESTS_BY_STATUS
        .with_label_values(&[status_class(status)])
        .inc();
    REQUEST_DURATION.observe(elapsed.as_secs_f64());
}

pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    CACHE_LOOKUPS.with_label_values(&[result]).inc();
}

pub fn record_cache_store() {
    CACHE_STORES.inc();
}

pub fn record_cache_store_error() {
    CACHE_STORE_ERRORS.inc();
}

pub fn record_cache_eviction() {
    CACHE_EVICTIONS.inc();
}

pub fn record_cache_purged(files: u64) {
    CACHE_PURGED_FILES.inc_by(files);
}

pub fn set_cache_entries(entries: usize) {
    CACHE_ENTRIES.set(i64::try_from(entries).unwrap_or(i64::MAX));
}

pub fn record_upstream_error(kind: &str) {
    UPSTREAM_ERRORS.with_label_values(&[kind]).inc();
}

pub fn gather() -> Vec<u8> {
    let mut buffer = Vec::new();
    if let Err(err) = TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer) {
        tracing::warn!(error = %err, "failed to encode metrics");
    }
    buffer
}

/// Serves the registry as Prometheus text on `GET /metrics`, one request per connection.
pub async fn serve(addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {addr}"))?;
    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .context("metrics accept loop failed")?;
        tokio::spawn(async move {
            if let Err(err) = handle_stream(stream, METRICS_IO_TIMEOUT).await {
                tracing::debug!(peer = %peer, error = %err, "metrics handler error");
            }
        });
    }
}

async fn handle_stream<S>(mut stream: S, io_timeout: Duration) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let raw = read_once_with_timeout(
        &mut stream,
        METRICS_MAX_REQUEST_BYTES,
        io_timeout,
        "reading metrics request",
    )
    .await?;
    if raw.is_empty() {
        return Ok(());
    }

    let wants_metrics = parse_request_line(&raw)
        .map(|line| line.method == "GET" && line.uri == METRICS_PATH)
        .unwrap_or(false);
    let response = if wants_metrics {
        let encoder = TextEncoder::new();
        build_response("200 OK", encoder.format_type(), &gather())
    } else {
        build_response("404 Not Found", "text/plain", b"not found")
    };

    write_all_with_timeout(&mut stream, &response, io_timeout, "writing metrics response")
        .await?;
    shutdown_with_timeout(&mut stream, io_timeout).await
}

fn build_response(status: &str, content_type: &str, body: &[u8]) -> Vec<u8> {
    let mut response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    )
    .into_bytes();
    response.extend_from_slice(body);
    response
}
