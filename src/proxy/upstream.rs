use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::net::{TcpStream, lookup_host};
use tokio::time::timeout;
use tracing::debug;

use crate::io_util::{read_once_with_timeout, write_all_with_timeout};
use crate::settings::Settings;

/// The fixed origin every cache miss is forwarded to.
#[derive(Debug, Clone)]
pub struct UpstreamTarget {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
    pub max_response_size: usize,
}

impl UpstreamTarget {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            host: settings.upstream_host.clone(),
            port: settings.upstream_port,
            connect_timeout: settings.upstream_connect_timeout(),
            io_timeout: settings.upstream_timeout(),
            max_response_size: settings.max_response_size,
        }
    }

    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("failed to connect to {authority}: {source}")]
    Connect {
        authority: String,
        #[source]
        source: io::Error,
    },
    #[error("connection to {authority} timed out after {timeout:?}")]
    ConnectTimeout { authority: String, timeout: Duration },
    #[error("upstream {authority} closed without sending a response")]
    EmptyResponse { authority: String },
    #[error("exchange with upstream failed: {0:#}")]
    Exchange(#[from] anyhow::Error),
}

impl UpstreamError {
    /// True when no connection could be established; the client gets a 404 in that case.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            UpstreamError::Connect { .. } | UpstreamError::ConnectTimeout { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamError::Connect { source, .. }
                if source.kind() == io::ErrorKind::ConnectionRefused =>
            {
                "refused"
            }
            UpstreamError::Connect { .. } => "connect",
            UpstreamError::ConnectTimeout { .. } => "connect_timeout",
            UpstreamError::EmptyResponse { .. } => "empty_response",
            UpstreamError::Exchange(_) => "exchange",
        }
    }
}

pub fn build_request(target: &UpstreamTarget, uri: &str, version: &str) -> String {
    format!(
        "GET {uri} {version}\r\nHost: {}:{}\r\n\r\n",
        target.host, target.port
    )
}

/// Opens a fresh connection, sends a minimal GET and returns the single chunk read back.
///
/// Anything beyond `max_response_size` is never read, so large responses arrive truncated.
pub async fn fetch(
    target: &UpstreamTarget,
    uri: &str,
    version: &str,
) -> Result<Bytes, UpstreamError> {
    let mut stream = connect(target).await?;

    let request = build_request(target, uri, version);
    write_all_with_timeout(
        &mut stream,
        request.as_bytes(),
        target.io_timeout,
        "writing upstream request",
    )
    .await?;

    let response = read_once_with_timeout(
        &mut stream,
        target.max_response_size,
        target.io_timeout,
        "reading upstream response",
    )
    .await?;
    if response.is_empty() {
        return Err(UpstreamError::EmptyResponse {
            authority: target.authority(),
        });
    }
    debug!(upstream = %target.authority(), uri, bytes = response.len(), "received upstream response");
    Ok(response)
}

async fn connect(target: &UpstreamTarget) -> Result<TcpStream, UpstreamError> {
    let authority = target.authority();
    let attempt = async {
        let addrs: Vec<SocketAddr> = lookup_host((target.host.as_str(), target.port))
            .await?
            .collect();
        connect_to_addrs(&addrs).await
    };

    match timeout(target.connect_timeout, attempt).await {
        Ok(Ok((stream, addr))) => {
            debug!(upstream = %authority, peer = %addr, "connected to upstream");
            Ok(stream)
        }
        Ok(Err(source)) => Err(UpstreamError::Connect { authority, source }),
        Err(_) => Err(UpstreamError::ConnectTimeout {
            authority,
            timeout: target.connect_timeout,
        }),
    }
}

/// Tries each resolved address in turn and keeps the last failure.
async fn connect_to_addrs(addrs: &[SocketAddr]) -> io::Result<(TcpStream, SocketAddr)> {
    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                if let Err(err) = stream.set_nodelay(true) {
                    debug!(peer = %addr, error = %err, "failed to set TCP_NODELAY on upstream stream");
                }
                return Ok((stream, *addr));
            }
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses")
    }))
}
