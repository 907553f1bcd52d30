//! Synthetic origin server used as the proxy's upstream in development and tests.
//!
//! `GET /<size>` returns an HTML document exactly `size` bytes long, which makes it easy to
//! produce both even- and odd-length responses on demand.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::io_util::{read_once_with_timeout, shutdown_with_timeout, write_all_with_timeout};

pub const MIN_BODY_SIZE: i64 = 100;
pub const MAX_BODY_SIZE: i64 = 20_000;

const BODY_OPEN: &str = "<HTML><BODY>";
const BODY_CLOSE: &str = "</BODY></HTML>";
const MAX_REQUEST_SIZE: usize = 1024;
const IO_TIMEOUT: Duration = Duration::from_secs(30);

const BAD_REQUEST: &[u8] = b"HTTP/1.1 400 Bad Request\r\n\r\n";
const NOT_IMPLEMENTED: &[u8] = b"HTTP/1.1 501 Not Implemented\r\n\r\n";

pub async fn run(listen: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind origin listener on {}", listen))?;
    serve(listener).await
}

pub async fn serve(listener: TcpListener) -> Result<()> {
    let local_addr = listener.local_addr().context("listener has no local address")?;
    info!(address = %local_addr, "origin server started");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                error!(error = %err, "failed to accept incoming connection");
                return Err(err).context("origin accept loop failed");
            }
        };
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, peer).await {
                debug!(peer = %peer, error = ?err, "origin connection closed with error");
            }
        });
    }
}

pub async fn handle_connection<S>(mut stream: S, peer: SocketAddr) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = read_once_with_timeout(
        &mut stream,
        MAX_REQUEST_SIZE,
        IO_TIMEOUT,
        "reading origin request",
    )
    .await?;
    let Some(response) = respond_to(&request) else {
        return Ok(());
    };

    write_all_with_timeout(&mut stream, &response, IO_TIMEOUT, "writing origin response").await?;
    shutdown_with_timeout(&mut stream, IO_TIMEOUT).await?;
    let request_line = String::from_utf8_lossy(&request);
    let request_line = request_line.lines().next().unwrap_or_default();
    info!(peer = %peer, request = request_line, bytes_out = response.len(), "origin served request");
    Ok(())
}

/// Computes the full response for one raw request; `None` means close without answering.
pub fn respond_to(request: &[u8]) -> Option<Vec<u8>> {
    let text = String::from_utf8_lossy(request);
    let line = text.lines().next()?;

    let parts: Vec<&str> = line.split_whitespace().collect();
    let [method, uri, _version] = parts.as_slice() else {
        return Some(BAD_REQUEST.to_vec());
    };
    if *method != "GET" {
        return Some(NOT_IMPLEMENTED.to_vec());
    }

    match uri.trim_start_matches('/').parse::<i64>() {
        Ok(size) if (MIN_BODY_SIZE..=MAX_BODY_SIZE).contains(&size) => {
            Some(ok_response(&body_of_size(size as usize)))
        }
        _ => Some(BAD_REQUEST.to_vec()),
    }
}

/// An HTML document of exactly `size` bytes; `size` must cover the fixed markup.
pub fn body_of_size(size: usize) -> String {
    let fill = size.saturating_sub(BODY_OPEN.len() + BODY_CLOSE.len());
    format!("{BODY_OPEN}{}{BODY_CLOSE}", "a".repeat(fill))
}

fn ok_response(body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
    .into_bytes()
}
