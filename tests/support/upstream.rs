use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use anyhow::Result;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Clone)]
enum UpstreamBehavior {
    /// Accept, read the request, then close without answering.
    Close,
    Fixed { response: Arc<Vec<u8>> },
}

/// Loopback upstream that records every request it receives.
pub struct TestUpstream {
    addr: SocketAddr,
    requests: Arc<AtomicUsize>,
    request_heads: Arc<Mutex<Vec<String>>>,
    handle: JoinHandle<()>,
}

impl TestUpstream {
    pub async fn close() -> Result<Self> {
        Self::spawn(UpstreamBehavior::Close).await
    }

    pub async fn fixed(response: impl Into<Vec<u8>>) -> Result<Self> {
        Self::spawn(UpstreamBehavior::Fixed {
            response: Arc::new(response.into()),
        })
        .await
    }

    /// A `200 OK` whose total byte length (status line and headers included) is `total_len`.
    pub async fn with_total_len(total_len: usize) -> Result<Self> {
        Self::fixed(response_of_len(total_len)).await
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn request_heads(&self) -> Vec<String> {
        self.request_heads.lock().clone()
    }

    async fn spawn(behavior: UpstreamBehavior) -> Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let addr = listener.local_addr()?;
        let requests = Arc::new(AtomicUsize::new(0));
        let request_heads = Arc::new(Mutex::new(Vec::new()));

        let counter = requests.clone();
        let heads = request_heads.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let behavior = behavior.clone();
                let counter = counter.clone();
                let heads = heads.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let n = socket.read(&mut buf).await.unwrap_or(0);
                    if n == 0 {
                        return;
                    }
                    counter.fetch_add(1, Ordering::SeqCst);
                    heads
                        .lock()
                        .push(String::from_utf8_lossy(&buf[..n]).to_string());
                    if let UpstreamBehavior::Fixed { response } = behavior {
                        let _ = socket.write_all(&response).await;
                    }
                    let _ = socket.shutdown().await;
                });
            }
        });

        Ok(Self {
            addr,
            requests,
            request_heads,
            handle,
        })
    }
}

impl Drop for TestUpstream {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub fn response_of_len(total_len: usize) -> Vec<u8> {
    let head = b"HTTP/1.1 200 OK\r\n\r\n";
    assert!(total_len >= head.len(), "response too short for a status line");
    let mut response = head.to_vec();
    response.resize(total_len, b'x');
    response
}

/// The bundled synthetic origin on a loopback port.
pub struct OriginServer {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl OriginServer {
    pub async fn spawn() -> Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let addr = listener.local_addr()?;
        let handle = tokio::spawn(async move {
            if let Err(err) = relaycache::origin::serve(listener).await {
                tracing::error!(error = ?err, "origin server failed");
            }
        });
        Ok(Self { addr, handle })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

impl Drop for OriginServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
