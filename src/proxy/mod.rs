pub mod cache;
pub mod listener;
pub mod pipeline;
pub mod request;
pub mod respond;
pub mod upstream;

use std::sync::Arc;

use anyhow::Result;

use crate::settings::Settings;

use self::cache::ResponseCache;
use self::upstream::UpstreamTarget;

#[derive(Clone)]
pub struct AppContext {
    pub settings: Arc<Settings>,
    pub cache: Arc<ResponseCache>,
    pub upstream: Arc<UpstreamTarget>,
}

impl AppContext {
    pub fn new(
        settings: Arc<Settings>,
        cache: Arc<ResponseCache>,
        upstream: Arc<UpstreamTarget>,
    ) -> Self {
        Self {
            settings,
            cache,
            upstream,
        }
    }
}

pub async fn run(app: AppContext) -> Result<()> {
    listener::start_listener(app).await
}
