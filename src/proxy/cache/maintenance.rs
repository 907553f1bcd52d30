use std::path::Path;

use anyhow::{Context, Result};
use tokio::fs as async_fs;
use tracing::warn;

use super::CacheKey;

pub(super) const TEMP_PREFIX: &str = "tmp_";

/// Deletes cache files and unfinished temp files from `dir`, returning how many were removed.
///
/// The URI index is never persisted, so after a restart every key file is unreachable. Only
/// names the store itself produces are touched.
pub(super) async fn purge_orphans(dir: &Path) -> Result<u64> {
    let mut entries = async_fs::read_dir(dir)
        .await
        .with_context(|| format!("failed to list cache dir {}", dir.display()))?;
    let mut removed = 0u64;

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !(CacheKey::looks_like_key(&name) || name.starts_with(TEMP_PREFIX)) {
            continue;
        }
        match async_fs::remove_file(entry.path()).await {
            Ok(()) => removed += 1,
            Err(err) => warn!(
                error = %err,
                path = %entry.path().display(),
                "failed to remove orphaned cache file"
            ),
        }
    }

    Ok(removed)
}
