#![allow(dead_code)]

pub mod harness;
pub mod net;
pub mod proxy_client;
pub mod upstream;

pub use harness::{ProxyHarness, ProxyHarnessBuilder};
pub use net::{find_free_port, wait_for_listener};
pub use proxy_client::{ProxyClient, status_line};
pub use upstream::{OriginServer, TestUpstream};
