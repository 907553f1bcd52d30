use std::net::SocketAddr;
use std::time::{Duration, Instant};

use anyhow::Result;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use crate::logging::{AccessLogBuilder, CacheLookup, CacheStore};
use crate::settings::CacheHitPolicy;

use super::AppContext;
use super::request::{
    RequestError, RequestLine, RequestReader, SingleRead, ensure_get, normalize_uri,
    parse_request_line, validate_size,
};
use super::respond::{LocalResponse, relay, respond_with_access_log, status_of};
use super::upstream::{self, UpstreamError};

struct Exchange<'a, S> {
    stream: &'a mut S,
    app: &'a AppContext,
    started: Instant,
    bytes_in: u64,
}

impl<S> Exchange<'_, S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn client_timeout(&self) -> Duration {
        self.app.settings.client_timeout()
    }

    async fn respond(&mut self, response: LocalResponse, log: AccessLogBuilder) -> Result<()> {
        let timeout = self.client_timeout();
        let elapsed = self.started.elapsed();
        respond_with_access_log(self.stream, response, timeout, self.bytes_in, elapsed, log).await
    }

    async fn reject(&mut self, err: RequestError, log: AccessLogBuilder) -> Result<()> {
        let log = log.error(err.reason(), &err);
        match err.response() {
            Some(response) => self.respond(response, log).await,
            None => {
                debug!("client sent an empty request; closing");
                Ok(())
            }
        }
    }

    async fn relay(&mut self, data: &[u8], log: AccessLogBuilder) -> Result<()> {
        let bytes_out = relay(self.stream, data, self.client_timeout()).await?;
        log.relayed_status(status_of(data))
            .bytes(self.bytes_in, bytes_out as u64)
            .elapsed(self.started.elapsed())
            .log();
        Ok(())
    }
}

/// Serves exactly one request on `stream` and then lets the connection drop.
pub async fn handle_connection<S>(mut stream: S, peer: SocketAddr, app: AppContext) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let started = Instant::now();
    let raw = SingleRead::from_settings(&app.settings)
        .read_request(&mut stream)
        .await?;
    let mut exchange = Exchange {
        stream: &mut stream,
        app: &app,
        started,
        bytes_in: raw.len() as u64,
    };
    let log = AccessLogBuilder::new(peer);

    let line = match parse_request_line(&raw) {
        Ok(line) => line,
        Err(err) => return exchange.reject(err, log).await,
    };
    let log = log.request_line(&line.method, &line.uri, &line.version);

    if let Err(err) = ensure_get(&line) {
        return exchange.reject(err, log).await;
    }
    let uri = match normalize_uri(&line.uri) {
        Ok(uri) => uri,
        Err(err) => return exchange.reject(err, log).await,
    };

    let cached = app.cache.lookup(&uri).await;
    if let Some(entry) = &cached
        && entry.is_odd_length()
    {
        debug!(uri = %uri, len = entry.len, "odd-length cache hit; answering not modified");
        return exchange
            .respond(LocalResponse::NotModified, log.cache_lookup(CacheLookup::HitNotModified))
            .await;
    }

    if let Err(err) = validate_size(&uri, app.settings.max_requested_size) {
        return exchange.reject(err, log).await;
    }

    let lookup = match (&cached, app.settings.cache_hit_policy) {
        (None, _) => CacheLookup::Miss,
        (Some(_), CacheHitPolicy::Refetch) => CacheLookup::HitRefetch,
        (Some(_), CacheHitPolicy::Serve) => match app.cache.read(&uri).await {
            Ok(Some((_, data))) => {
                return exchange.relay(&data, log.cache_lookup(CacheLookup::Hit)).await;
            }
            Ok(None) => CacheLookup::Miss,
            Err(err) => {
                warn!(uri = %uri, error = ?err, "failed to read cached response; forwarding");
                CacheLookup::HitUnreadable
            }
        },
    };
    let log = log.cache_lookup(lookup);

    forward(&mut exchange, &line, &uri, log).await
}

async fn forward<S>(
    exchange: &mut Exchange<'_, S>,
    line: &RequestLine,
    uri: &str,
    log: AccessLogBuilder,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let app = exchange.app;
    let target = &app.upstream;
    let log = log.upstream(target.authority());

    let response = match upstream::fetch(target, uri, &line.version).await {
        Ok(response) => response,
        Err(err) => return upstream_failed(exchange, uri, err, log).await,
    };

    let stored = store(exchange, uri, response.clone()).await;
    exchange.relay(&response, log.cache_store(stored)).await
}

async fn upstream_failed<S>(
    exchange: &mut Exchange<'_, S>,
    uri: &str,
    err: UpstreamError,
    log: AccessLogBuilder,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    crate::metrics::record_upstream_error(err.kind());
    let log = log.error(err.kind(), &err);

    if err.is_unreachable() {
        warn!(uri, error = %err, "upstream unreachable");
        return exchange.respond(LocalResponse::NotFound, log).await;
    }

    // Connected but the exchange broke: nothing is cached and the client gets no answer.
    warn!(uri, error = %err, "upstream exchange failed; closing client connection");
    log.bytes(exchange.bytes_in, 0)
        .elapsed(exchange.started.elapsed())
        .log();
    Ok(())
}

async fn store<S>(exchange: &Exchange<'_, S>, uri: &str, response: Bytes) -> CacheStore {
    match exchange.app.cache.insert(uri, response).await {
        Ok(outcome) if outcome.evicted.is_some() => CacheStore::StoredEvicted,
        Ok(outcome) if outcome.replaced => CacheStore::Replaced,
        Ok(_) => CacheStore::Stored,
        Err(err) => {
            crate::metrics::record_cache_store_error();
            warn!(uri, error = ?err, "failed to cache upstream response; relaying anyway");
            CacheStore::Failed
        }
    }
}
