use std::net::SocketAddr;
use std::time::Duration as StdDuration;

use anyhow::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const READ_TIMEOUT: StdDuration = StdDuration::from_secs(5);

pub struct ProxyClient {
    stream: TcpStream,
}

impl ProxyClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        Ok(Self {
            stream: TcpStream::connect(addr).await?,
        })
    }

    pub async fn send(&mut self, request: impl AsRef<[u8]>) -> Result<()> {
        self.stream.write_all(request.as_ref()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Reads until the proxy closes the connection.
    pub async fn read_response(&mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        timeout(READ_TIMEOUT, self.stream.read_to_end(&mut buf)).await??;
        Ok(buf)
    }

    /// Half-closes the connection so the proxy's read sees end of stream.
    pub async fn close_write(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }

    pub async fn shutdown(mut self) {
        self.stream.shutdown().await.ok();
    }

    /// One connection, one raw request, everything the proxy sends back.
    pub async fn exchange(addr: SocketAddr, request: impl AsRef<[u8]>) -> Result<Vec<u8>> {
        let mut client = Self::connect(addr).await?;
        client.send(request).await?;
        client.read_response().await
    }

    pub async fn get(addr: SocketAddr, uri: &str) -> Result<Vec<u8>> {
        Self::exchange(addr, format!("GET {uri} HTTP/1.1\r\nHost: localhost\r\n\r\n")).await
    }
}

pub fn status_line(response: &[u8]) -> String {
    let text = String::from_utf8_lossy(response);
    text.lines().next().unwrap_or_default().to_string()
}
