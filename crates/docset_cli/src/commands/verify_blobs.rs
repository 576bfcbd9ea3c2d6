//! Verify-blobs command implementation.

use docset_core::{BlobReport, BlobStore, BlobStoreConfig, Severity};
use docset_storage::RowStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Runs the verify-blobs command.
pub fn run(path: &Path, partitions: &[PathBuf]) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying binary objects in {:?}", path);
    println!();

    let meta: Arc<dyn RowStore> = Arc::new(super::open(path)?);
    let mut stores: Vec<Arc<dyn RowStore>> = Vec::with_capacity(partitions.len());
    for partition in partitions {
        stores.push(Arc::new(super::open(partition)?));
    }
    let report = verify(meta, stores)?;
    print_report(&report);

    println!();
    if report.has_errors() {
        println!("✗ Blob verification failed");
        Err("Verification failed".into())
    } else {
        println!("✓ Blob verification passed");
        Ok(())
    }
}

/// Validates the blob store kept in `meta`.
pub fn verify(
    meta: Arc<dyn RowStore>,
    partitions: Vec<Arc<dyn RowStore>>,
) -> Result<BlobReport, Box<dyn std::error::Error>> {
    let config = if partitions.is_empty() {
        BlobStoreConfig::new()
    } else {
        BlobStoreConfig::fragmented(partitions)
    };
    let blobs = BlobStore::open(meta, config)?;
    Ok(blobs.validate()?)
}

fn print_report(report: &BlobReport) {
    println!("  Objects scanned: {}", report.scanned);
    println!("  Errors: {}", report.count(Severity::Error));
    println!("  Warnings: {}", report.count(Severity::Warning));
    for issue in &report.issues {
        println!("    {issue}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docset_core::BlobIssueKind;
    use docset_storage::InMemoryRowStore;
    use tempfile::tempdir;

    #[test]
    fn clean_store_from_snapshot_passes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = Arc::new(InMemoryRowStore::new());
        let blobs = BlobStore::open(store.clone(), BlobStoreConfig::new()).unwrap();
        blobs.put(b"alpha").unwrap();
        blobs.put(b"beta").unwrap();
        store.save_snapshot(&path).unwrap();

        let reopened: Arc<dyn RowStore> = Arc::new(super::super::open(&path).unwrap());
        let report = verify(reopened, Vec::new()).unwrap();
        assert_eq!(report.scanned, 2);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn fragmented_payloads_need_their_partitions() {
        let meta = Arc::new(InMemoryRowStore::new());
        let partition: Arc<dyn RowStore> = Arc::new(InMemoryRowStore::new());
        let blobs = BlobStore::open(
            meta.clone(),
            BlobStoreConfig::fragmented(vec![partition.clone()]),
        )
        .unwrap();
        let id = blobs.put(b"payload").unwrap();

        let report = verify(meta.clone(), vec![partition]).unwrap();
        assert!(report.issues.is_empty());

        let empty: Arc<dyn RowStore> = Arc::new(InMemoryRowStore::new());
        let report = verify(meta, vec![empty]).unwrap();
        assert!(report.has(id, BlobIssueKind::MissingPayload));
        assert!(report.has_errors());
    }
}
