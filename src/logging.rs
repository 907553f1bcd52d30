use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Result, anyhow};
use http::StatusCode;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogFormat;

const DEFAULT_FILTER: &str = "info";

pub fn init_logger(format: LogFormat) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    match format {
        LogFormat::Json => fmt::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(false)
            .with_span_list(false)
            .try_init()
            .map_err(|err| anyhow!(err))?,
        LogFormat::Text => fmt::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .try_init()
            .map_err(|err| anyhow!(err))?,
    }

    Ok(())
}

/// What the cache contributed to answering a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLookup {
    Miss,
    /// Even-length entry replayed without contacting upstream.
    Hit,
    /// Odd-length entry answered with 304.
    HitNotModified,
    /// Even-length entry present but forwarded anyway.
    HitRefetch,
    /// Entry present but its stored bytes could not be read.
    HitUnreadable,
}

impl CacheLookup {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheLookup::Miss => "miss",
            CacheLookup::Hit => "hit",
            CacheLookup::HitNotModified => "hit_not_modified",
            CacheLookup::HitRefetch => "hit_refetch",
            CacheLookup::HitUnreadable => "hit_unreadable",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStore {
    Stored,
    Replaced,
    /// Stored after evicting the oldest entry.
    StoredEvicted,
    Failed,
}

impl CacheStore {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStore::Stored => "stored",
            CacheStore::Replaced => "replaced",
            CacheStore::StoredEvicted => "stored_evicted",
            CacheStore::Failed => "failed",
        }
    }
}

/// One line of the access log; every handled request produces exactly one.
#[derive(Debug, Clone)]
pub struct AccessLogEvent {
    pub peer: SocketAddr,
    pub method: Option<String>,
    pub path: Option<String>,
    pub version: Option<String>,
    pub cache_lookup: Option<CacheLookup>,
    pub cache_store: Option<CacheStore>,
    /// `None` when the connection closed without a response or relayed bytes had no status line.
    pub status: Option<u16>,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub elapsed: Duration,
    pub upstream: Option<String>,
    pub error_reason: Option<&'static str>,
    pub error_detail: Option<String>,
}

#[derive(Debug)]
pub struct AccessLogBuilder {
    event: AccessLogEvent,
}

impl AccessLogBuilder {
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            event: AccessLogEvent {
                peer,
                method: None,
                path: None,
                version: None,
                cache_lookup: None,
                cache_store: None,
                status: None,
                bytes_in: 0,
                bytes_out: 0,
                elapsed: Duration::ZERO,
                upstream: None,
                error_reason: None,
                error_detail: None,
            },
        }
    }

    pub fn request_line(mut self, method: &str, path: &str, version: &str) -> Self {
        self.event.method = Some(method.to_string());
        self.event.path = Some(path.to_string());
        self.event.version = Some(version.to_string());
        self
    }

    pub fn cache_lookup(mut self, lookup: CacheLookup) -> Self {
        self.event.cache_lookup = Some(lookup);
        self
    }

    pub fn cache_store(mut self, store: CacheStore) -> Self {
        self.event.cache_store = Some(store);
        self
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.event.status = Some(status.as_u16());
        self
    }

    pub fn relayed_status(mut self, status: Option<u16>) -> Self {
        self.event.status = status;
        self
    }

    pub fn bytes(mut self, bytes_in: u64, bytes_out: u64) -> Self {
        self.event.bytes_in = bytes_in;
        self.event.bytes_out = bytes_out;
        self
    }

    pub fn elapsed(mut self, elapsed: Duration) -> Self {
        self.event.elapsed = elapsed;
        self
    }

    pub fn upstream(mut self, authority: impl Into<String>) -> Self {
        self.event.upstream = Some(authority.into());
        self
    }

    pub fn error(mut self, reason: &'static str, detail: impl ToString) -> Self {
        self.event.error_reason = Some(reason);
        self.event.error_detail = Some(detail.to_string());
        self
    }

    pub fn build(self) -> AccessLogEvent {
        self.event
    }

    pub fn log(self) {
        log_access(&self.build());
    }
}

pub fn log_access(event: &AccessLogEvent) {
    let ts = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();

    tracing::info!(
        target: "access_log",
        ts = %ts,
        client_ip = %event.peer.ip(),
        client_port = event.peer.port(),
        method = event.method.as_deref(),
        path = event.path.as_deref(),
        version = event.version.as_deref(),
        status = event.status,
        cache_lookup = event.cache_lookup.map(CacheLookup::as_str),
        cache_store = event.cache_store.map(CacheStore::as_str),
        bytes_in = event.bytes_in,
        bytes_out = event.bytes_out,
        elapsed_ms = event.elapsed.as_millis() as u64,
        upstream = event.upstream.as_deref(),
        error_reason = event.error_reason,
        error_detail = event.error_detail.as_deref()
    );

    crate::metrics::record_request(event.status, event.elapsed);
}
