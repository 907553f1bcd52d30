use std::num::IntErrorKind;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::io::AsyncRead;

use crate::io_util::read_once_with_timeout;
use crate::settings::Settings;

use super::respond::LocalResponse;

const ABSOLUTE_FORM_PREFIX: &str = "http://";

/// Obtains the raw bytes of one client request. Validation only ever sees the returned bytes,
/// so a framed reader can replace [`SingleRead`] without touching the parser.
#[async_trait]
pub trait RequestReader {
    async fn read_request<S>(&self, stream: &mut S) -> Result<Bytes>
    where
        S: AsyncRead + Unpin + Send;
}

/// Treats one bounded read as the entire request. Nothing further is read even when the
/// request line is incomplete.
#[derive(Debug, Clone, Copy)]
pub struct SingleRead {
    pub max_len: usize,
    pub timeout: Duration,
}

impl SingleRead {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_len: settings.max_request_size,
            timeout: settings.client_timeout(),
        }
    }
}

#[async_trait]
impl RequestReader for SingleRead {
    async fn read_request<S>(&self, stream: &mut S) -> Result<Bytes>
    where
        S: AsyncRead + Unpin + Send,
    {
        read_once_with_timeout(stream, self.max_len, self.timeout, "reading client request").await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub uri: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("request contained no lines")]
    Empty,
    #[error("request line must have exactly three parts")]
    MalformedRequestLine,
    #[error("method {0} is not supported")]
    UnsupportedMethod(String),
    #[error("request URI {0:?} does not start with '/'")]
    InvalidUri(String),
    #[error("requested size {0:?} is not an integer")]
    InvalidSize(String),
    #[error("requested size {size} exceeds limit {limit}")]
    SizeTooLarge { size: String, limit: i64 },
}

impl RequestError {
    /// The response to send for this error; `None` means close without answering.
    pub fn response(&self) -> Option<LocalResponse> {
        match self {
            RequestError::Empty => None,
            RequestError::MalformedRequestLine
            | RequestError::InvalidUri(_)
            | RequestError::InvalidSize(_) => Some(LocalResponse::BadRequest),
            RequestError::UnsupportedMethod(_) => Some(LocalResponse::NotImplemented),
            RequestError::SizeTooLarge { .. } => Some(LocalResponse::UriTooLong),
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            RequestError::Empty => "empty_request",
            RequestError::MalformedRequestLine => "malformed_request_line",
            RequestError::UnsupportedMethod(_) => "unsupported_method",
            RequestError::InvalidUri(_) => "invalid_uri",
            RequestError::InvalidSize(_) => "invalid_size",
            RequestError::SizeTooLarge { .. } => "size_too_large",
        }
    }
}

/// Splits the first line of `raw` into method, URI and version.
///
/// Bytes that are not valid UTF-8 are replaced rather than rejected; any resulting damage
/// surfaces as a malformed line or an invalid URI.
pub fn parse_request_line(raw: &[u8]) -> Result<RequestLine, RequestError> {
    let text = String::from_utf8_lossy(raw);
    let first = text.lines().next().ok_or(RequestError::Empty)?;

    let mut parts = first.split_whitespace();
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(uri), Some(version), None) => Ok(RequestLine {
            method: method.to_string(),
            uri: uri.to_string(),
            version: version.to_string(),
        }),
        _ => Err(RequestError::MalformedRequestLine),
    }
}

pub fn ensure_get(line: &RequestLine) -> Result<(), RequestError> {
    if line.method == "GET" {
        Ok(())
    } else {
        Err(RequestError::UnsupportedMethod(line.method.clone()))
    }
}

/// Rewrites an absolute-form `http://host/path` target to `/path` and checks the result is in
/// origin form. An absolute target without a path normalizes to the empty string and is
/// rejected.
pub fn normalize_uri(uri: &str) -> Result<String, RequestError> {
    let normalized = match uri.strip_prefix(ABSOLUTE_FORM_PREFIX) {
        Some(rest) => rest.find('/').map(|idx| &rest[idx..]).unwrap_or_default(),
        None => uri,
    };
    if normalized.starts_with('/') {
        Ok(normalized.to_string())
    } else {
        Err(RequestError::InvalidUri(uri.to_string()))
    }
}

/// Parses the segment after the leading `/` as the requested size and enforces `limit`.
pub fn validate_size(uri: &str, limit: i64) -> Result<i64, RequestError> {
    let segment = uri.strip_prefix('/').unwrap_or(uri);
    let too_large = || RequestError::SizeTooLarge {
        size: segment.to_string(),
        limit,
    };
    match segment.parse::<i64>() {
        Ok(size) if size > limit => Err(too_large()),
        Ok(size) => Ok(size),
        Err(err) if *err.kind() == IntErrorKind::PosOverflow => Err(too_large()),
        // below any limit; upstream decides what to make of it
        Err(err) if *err.kind() == IntErrorKind::NegOverflow => Ok(i64::MIN),
        Err(_) => Err(RequestError::InvalidSize(segment.to_string())),
    }
}
