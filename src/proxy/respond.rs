use std::time::Duration;

use anyhow::Result;
use http::StatusCode;
use tokio::io::AsyncWrite;

use crate::io_util::{shutdown_with_timeout, write_all_with_timeout};
use crate::logging::AccessLogBuilder;

/// Responses the proxy produces itself instead of relaying from upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalResponse {
    NotModified,
    BadRequest,
    NotFound,
    UriTooLong,
    NotImplemented,
}

impl LocalResponse {
    pub fn status(self) -> StatusCode {
        match self {
            LocalResponse::NotModified => StatusCode::NOT_MODIFIED,
            LocalResponse::BadRequest => StatusCode::BAD_REQUEST,
            LocalResponse::NotFound => StatusCode::NOT_FOUND,
            LocalResponse::UriTooLong => StatusCode::URI_TOO_LONG,
            LocalResponse::NotImplemented => StatusCode::NOT_IMPLEMENTED,
        }
    }

    // `http` calls 414 "URI Too Long"; clients of this proxy expect the older phrase.
    pub fn reason(self) -> &'static str {
        match self {
            LocalResponse::NotModified => "Not Modified",
            LocalResponse::BadRequest => "Bad Request",
            LocalResponse::NotFound => "Not Found",
            LocalResponse::UriTooLong => "Request-URI Too Long",
            LocalResponse::NotImplemented => "Not Implemented",
        }
    }
}

pub fn build_response(response: LocalResponse, body: &[u8]) -> Vec<u8> {
    let header = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/html\r\nContent-Length: {}\r\n\r\n",
        response.status().as_u16(),
        response.reason(),
        body.len()
    );
    let mut out = Vec::with_capacity(header.len() + body.len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(body);
    out
}

pub async fn send_response<S>(
    stream: &mut S,
    response: LocalResponse,
    body: &[u8],
    timeout_dur: Duration,
) -> Result<usize>
where
    S: AsyncWrite + Unpin,
{
    let bytes = build_response(response, body);
    write_all_with_timeout(stream, &bytes, timeout_dur, "writing local response").await?;
    Ok(bytes.len())
}

pub async fn respond_with_access_log<S>(
    stream: &mut S,
    response: LocalResponse,
    timeout_dur: Duration,
    bytes_in: u64,
    elapsed: Duration,
    log_builder: AccessLogBuilder,
) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let bytes_out = send_response(stream, response, &[], timeout_dur).await?;
    shutdown_with_timeout(stream, timeout_dur).await?;
    log_builder
        .status(response.status())
        .bytes(bytes_in, bytes_out as u64)
        .elapsed(elapsed)
        .log();
    Ok(())
}

/// Writes upstream (or cached) bytes to the client unchanged.
pub async fn relay<S>(stream: &mut S, data: &[u8], timeout_dur: Duration) -> Result<usize>
where
    S: AsyncWrite + Unpin,
{
    write_all_with_timeout(stream, data, timeout_dur, "relaying response").await?;
    shutdown_with_timeout(stream, timeout_dur).await?;
    Ok(data.len())
}

/// Extracts the status code from the status line of a raw response, if it has one.
pub fn status_of(response: &[u8]) -> Option<u16> {
    let line_end = response
        .iter()
        .position(|b| *b == b'\n')
        .unwrap_or(response.len());
    let line = std::str::from_utf8(&response[..line_end]).ok()?;
    let mut parts = line.split_whitespace();
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    let code = parts.next()?;
    if code.len() != 3 {
        return None;
    }
    code.parse().ok()
}
