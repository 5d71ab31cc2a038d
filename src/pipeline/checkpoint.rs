//! Window state checkpoints on local disk.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::detect::{KeyedWindowStore, WindowSnapshot};

/// Write the store's snapshot to `path`. The file is replaced atomically so
/// a crash mid-write leaves the previous checkpoint intact.
pub fn save(store: &KeyedWindowStore, path: &Path) -> Result<usize> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let snapshot = store.snapshot();
    let vins = snapshot.entries.len();
    let bytes = serde_json::to_vec(&snapshot).context("failed to serialize window snapshot")?;

    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes).with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to move checkpoint into place at {}", path.display()))?;

    debug!(path = %path.display(), vins, "window checkpoint written");
    Ok(vins)
}

/// Restore `store` from `path`. Returns `None` when no checkpoint exists.
pub fn load(store: &KeyedWindowStore, path: &Path) -> Result<Option<usize>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let snapshot: WindowSnapshot = serde_json::from_slice(&bytes)
        .with_context(|| format!("corrupt checkpoint {}", path.display()))?;
    let taken_at = snapshot.taken_at;
    let vins = store.restore(snapshot)?;
    info!(path = %path.display(), vins, %taken_at, "window state restored from checkpoint");
    Ok(Some(vins))
}
