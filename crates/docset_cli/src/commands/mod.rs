//! CLI command implementations.

pub mod history;
pub mod inspect;
pub mod verify_blobs;

use docset_storage::InMemoryRowStore;
use std::path::Path;
use tracing::debug;

/// Opens a snapshot file.
pub(crate) fn open(path: &Path) -> Result<InMemoryRowStore, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No snapshot found at {:?}", path).into());
    }
    debug!(path = %path.display(), "loading snapshot");
    Ok(InMemoryRowStore::load_snapshot(path)?)
}
