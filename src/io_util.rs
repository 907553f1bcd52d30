use std::time::Duration;

use anyhow::Result;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::util::timeout_with_context;

/// Performs exactly one read of at most `max_len` bytes.
///
/// Whatever that read returns is the whole message: callers on both the client and upstream
/// side treat a single read as complete, so nothing here loops until a terminator or a
/// content length is reached. An empty result means the peer closed without sending.
pub async fn read_once_with_timeout<S>(
    stream: &mut S,
    max_len: usize,
    timeout_dur: Duration,
    context: &str,
) -> Result<Bytes>
where
    S: AsyncRead + Unpin,
{
    let mut buf = BytesMut::zeroed(max_len);
    let n = timeout_with_context(timeout_dur, stream.read(&mut buf), context).await?;
    buf.truncate(n);
    Ok(buf.freeze())
}

pub async fn write_all_with_timeout<S>(
    stream: &mut S,
    data: &[u8],
    timeout_dur: Duration,
    context: &str,
) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    timeout_with_context(timeout_dur, stream.write_all(data), context).await
}

pub async fn shutdown_with_timeout<S>(stream: &mut S, timeout_dur: Duration) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    timeout_with_context(timeout_dur, stream.shutdown(), "shutting down stream").await
}
