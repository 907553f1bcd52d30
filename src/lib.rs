pub mod cli;
pub mod io_util;
pub mod logging;
pub mod metrics;
pub mod origin;
pub mod proxy;
pub mod settings;
pub mod util;

use std::sync::Arc;

use anyhow::Result;

use crate::{
    proxy::{cache::ResponseCache, upstream::UpstreamTarget},
    settings::Settings,
};

pub async fn run(settings: Settings) -> Result<()> {
    let settings = Arc::new(settings);
    if let Some(addr) = settings.metrics_listen {
        tokio::spawn(async move {
            tracing::info!(address = %addr, "metrics endpoint starting");
            if let Err(err) = crate::metrics::serve(addr).await {
                tracing::error!(error = ?err, "metrics endpoint failed");
            }
        });
    }

    let app = build_app(settings).await?;
    tracing::info!(
        upstream = %app.upstream.authority(),
        cache_storage = ?app.settings.cache_storage,
        cache_max_entries = app.settings.cache_max_entries,
        cache_hit_policy = ?app.settings.cache_hit_policy,
        "relaycache starting"
    );
    proxy::run(app).await
}

/// Builds the shared proxy state: the response cache and the upstream target.
pub async fn build_app(settings: Arc<Settings>) -> Result<proxy::AppContext> {
    let cache = Arc::new(ResponseCache::from_settings(&settings).await?);
    let upstream = Arc::new(UpstreamTarget::from_settings(&settings));
    Ok(proxy::AppContext::new(settings, cache, upstream))
}
