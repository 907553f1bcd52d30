use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, anyhow, ensure};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::cli::{Cli, LogFormat};

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8888))
}

fn default_upstream_host() -> String {
    "localhost".to_string()
}

fn default_upstream_port() -> u16 {
    8080
}

fn default_log_format() -> LogFormat {
    LogFormat::Json
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("proxy_cache")
}

fn default_cache_max_entries() -> usize {
    10
}

fn default_cache_purge_on_start() -> bool {
    true
}

fn default_max_request_size() -> usize {
    1024
}

fn default_max_response_size() -> usize {
    4096
}

fn default_max_requested_size() -> i64 {
    9999
}

fn default_client_timeout() -> u64 {
    30
}

fn default_upstream_connect_timeout() -> u64 {
    5
}

fn default_upstream_timeout() -> u64 {
    60
}

/// Where cached upstream responses are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStorage {
    #[default]
    Disk,
    Memory,
}

/// What to do when an even-length cached response exists for the requested URI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheHitPolicy {
    /// Replay the cached bytes without contacting upstream.
    #[default]
    Serve,
    /// Forward to upstream anyway and re-store the fresh response.
    Refetch,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    #[serde(default = "default_upstream_host")]
    pub upstream_host: String,
    #[serde(default = "default_upstream_port")]
    pub upstream_port: u16,
    #[serde(default = "default_log_format")]
    pub log: LogFormat,
    #[serde(default)]
    pub cache_storage: CacheStorage,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,
    #[serde(default)]
    pub cache_hit_policy: CacheHitPolicy,
    #[serde(default = "default_cache_purge_on_start")]
    pub cache_purge_on_start: bool,
    #[serde(default = "default_max_request_size")]
    pub max_request_size: usize,
    #[serde(default = "default_max_response_size")]
    pub max_response_size: usize,
    /// Largest numeric path segment accepted before answering 414.
    #[serde(default = "default_max_requested_size")]
    pub max_requested_size: i64,
    #[serde(default = "default_client_timeout")]
    pub client_timeout: u64,
    #[serde(default = "default_upstream_connect_timeout")]
    pub upstream_connect_timeout: u64,
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout: u64,
    #[serde(default)]
    pub metrics_listen: Option<SocketAddr>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            upstream_host: default_upstream_host(),
            upstream_port: default_upstream_port(),
            log: default_log_format(),
            cache_storage: CacheStorage::default(),
            cache_dir: default_cache_dir(),
            cache_max_entries: default_cache_max_entries(),
            cache_hit_policy: CacheHitPolicy::default(),
            cache_purge_on_start: default_cache_purge_on_start(),
            max_request_size: default_max_request_size(),
            max_response_size: default_max_response_size(),
            max_requested_size: default_max_requested_size(),
            client_timeout: default_client_timeout(),
            upstream_connect_timeout: default_upstream_connect_timeout(),
            upstream_timeout: default_upstream_timeout(),
            metrics_listen: None,
        }
    }
}

impl Settings {
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut builder = Config::builder();
        let config_path = resolve_config_path(cli);

        if let Some(path) = &config_path {
            builder = builder.add_source(File::from(path.clone()).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("RELAYCACHE")
                .separator("__")
                .try_parsing(true),
        );

        let cfg = builder.build().map_err(to_anyhow)?;
        let mut settings: Settings = cfg.try_deserialize().map_err(to_anyhow)?;
        if let Some(path) = &config_path {
            settings.apply_base_dir(path);
        }
        settings.validate()?;
        Ok(settings)
    }

    pub fn cache_capacity(&self) -> Result<NonZeroUsize> {
        NonZeroUsize::new(self.cache_max_entries)
            .ok_or_else(|| anyhow!("cache_max_entries must be at least 1"))
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout)
    }

    pub fn upstream_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_connect_timeout)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout)
    }

    fn apply_base_dir(&mut self, config_path: &Path) {
        let base_dir = config_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        self.cache_dir = absolutize(&self.cache_dir, base_dir);
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.upstream_host.trim().is_empty(),
            "upstream_host must not be empty"
        );
        ensure!(
            self.upstream_port > 0,
            "upstream_port must be greater than 0"
        );
        ensure!(
            self.cache_max_entries > 0,
            "cache_max_entries must be greater than 0 (got {})",
            self.cache_max_entries
        );
        ensure!(
            self.max_request_size > 0,
            "max_request_size must be greater than 0 (got {})",
            self.max_request_size
        );
        ensure!(
            self.max_response_size > 0,
            "max_response_size must be greater than 0 (got {})",
            self.max_response_size
        );
        ensure!(
            self.max_requested_size >= 0,
            "max_requested_size must not be negative (got {})",
            self.max_requested_size
        );
        ensure!(
            self.client_timeout > 0,
            "client_timeout must be greater than 0 seconds (got {})",
            self.client_timeout
        );
        ensure!(
            self.upstream_connect_timeout > 0,
            "upstream_connect_timeout must be greater than 0 seconds (got {})",
            self.upstream_connect_timeout
        );
        ensure!(
            self.upstream_timeout > 0,
            "upstream_timeout must be greater than 0 seconds (got {})",
            self.upstream_timeout
        );
        if self.cache_storage == CacheStorage::Disk {
            ensure!(
                !self.cache_dir.as_os_str().is_empty(),
                "cache_dir must be set when cache_storage is disk"
            );
        }
        Ok(())
    }
}

fn to_anyhow(err: ConfigError) -> anyhow::Error {
    anyhow!(err)
}

fn resolve_config_path(cli: &Cli) -> Option<PathBuf> {
    if let Some(path) = &cli.config {
        return Some(path.clone());
    }
    let candidate = PathBuf::from("relaycache.toml");
    candidate.exists().then_some(candidate)
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
