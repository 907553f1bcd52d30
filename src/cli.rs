use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Parser)]
#[command(name = "relaycache", about = "Forwarding HTTP proxy with a bounded FIFO cache")]
pub struct Cli {
    /// Path to the runtime configuration file (defaults to ./relaycache.toml if present).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, Parser)]
#[command(
    name = "relaycache-origin",
    about = "Synthetic origin server returning HTML bodies of the requested size"
)]
pub struct OriginCli {
    /// Address to accept connections on.
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}
