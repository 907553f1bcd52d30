use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use relaycache::{
    build_app,
    cli::LogFormat,
    proxy::{self, cache::ResponseCache},
    settings::Settings,
};

fn default_test_settings(listen: SocketAddr, cache_dir: PathBuf, upstream_port: u16) -> Settings {
    Settings {
        listen,
        upstream_host: "127.0.0.1".to_string(),
        upstream_port,
        log: LogFormat::Text,
        cache_dir,
        client_timeout: 5,
        upstream_connect_timeout: 2,
        upstream_timeout: 5,
        ..Settings::default()
    }
}

pub struct ProxyHarness {
    pub addr: SocketAddr,
    pub settings: Arc<Settings>,
    pub cache: Arc<ResponseCache>,
    cache_dir: TempDir,
    handle: JoinHandle<()>,
}

impl ProxyHarness {
    pub fn cache_dir(&self) -> &std::path::Path {
        self.cache_dir.path()
    }

    /// File names currently in the disk cache directory, sorted.
    pub fn cached_files(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(self.cache_dir.path())? {
            names.push(entry?.file_name().to_string_lossy().to_string());
        }
        names.sort();
        Ok(names)
    }

    pub async fn shutdown(self) {
        self.handle.abort();
        let _ = self.handle.await;
    }
}

pub struct ProxyHarnessBuilder {
    upstream_port: u16,
    cache_dir: Option<TempDir>,
    settings_override: Option<Box<dyn FnOnce(&mut Settings) + Send>>,
}

impl ProxyHarnessBuilder {
    pub fn new(upstream_port: u16) -> Self {
        Self {
            upstream_port,
            cache_dir: None,
            settings_override: None,
        }
    }

    /// Reuses a prepared cache directory instead of a fresh one.
    pub fn with_cache_dir(mut self, dir: TempDir) -> Self {
        self.cache_dir = Some(dir);
        self
    }

    pub fn with_settings<F>(mut self, func: F) -> Self
    where
        F: FnOnce(&mut Settings) + Send + 'static,
    {
        self.settings_override = Some(Box::new(func));
        self
    }

    pub async fn spawn(mut self) -> Result<ProxyHarness> {
        let cache_dir = match self.cache_dir.take() {
            Some(dir) => dir,
            None => TempDir::new()?,
        };
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let addr = listener.local_addr()?;

        let mut settings =
            default_test_settings(addr, cache_dir.path().to_path_buf(), self.upstream_port);
        if let Some(override_fn) = self.settings_override.take() {
            override_fn(&mut settings);
        }
        settings.validate()?;
        let settings = Arc::new(settings);

        let app = build_app(settings.clone()).await?;
        let cache = app.cache.clone();
        let handle = tokio::spawn(async move {
            if let Err(err) = proxy::listener::serve(listener, app).await {
                tracing::error!(error = ?err, "proxy run failed");
            }
        });

        Ok(ProxyHarness {
            addr,
            settings,
            cache,
            cache_dir,
            handle,
        })
    }
}
