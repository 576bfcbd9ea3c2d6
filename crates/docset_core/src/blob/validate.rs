//! Consistency scan over every stored binary object.

use super::{
    BlobId, BlobStore, ContentHash, DATA_ID_COLUMN, HASH_COLUMN, LENGTH_COLUMN, PARTITION_COLUMN,
};
use crate::error::CoreResult;
use docset_storage::{Datum, Filter};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::{info, warn};

/// How serious a validator finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Suspicious but not corrupt.
    Warning,
    /// Stored data is inconsistent.
    Error,
}

/// Kind of validator finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobIssueKind {
    /// The hash is empty or all zeros.
    PlaceholderHash,
    /// The hash is not 32 hex digits.
    CorruptHash,
    /// The stored length differs from the payload length.
    LengthMismatch,
    /// The payload does not hash to the stored hash.
    HashMismatch,
    /// The payload cannot be found.
    MissingPayload,
    /// Another object already holds the same content.
    DuplicatePayload,
    /// A partition holds a payload no object points at.
    OrphanPayload,
}

impl BlobIssueKind {
    /// Severity of this kind of finding.
    #[must_use]
    pub const fn severity(self) -> Severity {
        match self {
            BlobIssueKind::PlaceholderHash
            | BlobIssueKind::DuplicatePayload
            | BlobIssueKind::OrphanPayload => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

/// One validator finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobIssue {
    /// Affected object. For an orphaned payload, its row in the partition.
    pub blob: BlobId,
    /// Partition holding an orphaned payload.
    pub partition: Option<usize>,
    /// What is wrong.
    pub kind: BlobIssueKind,
    /// Human-readable details.
    pub message: String,
}

impl BlobIssue {
    /// Severity of the finding.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        self.kind.severity()
    }
}

impl fmt::Display for BlobIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity() {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        match self.partition {
            Some(partition) => write!(
                f,
                "{level}: partition {partition} row {}: {}",
                self.blob.as_i64(),
                self.message
            ),
            None => write!(f, "{level}: {}: {}", self.blob, self.message),
        }
    }
}

/// Result of a validator run.
#[derive(Debug, Clone, Default)]
pub struct BlobReport {
    /// Number of objects scanned.
    pub scanned: usize,
    /// Findings, in object order.
    pub issues: Vec<BlobIssue>,
}

impl BlobReport {
    /// Checks if any finding has error severity.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(|i| i.severity() == Severity::Error)
    }

    /// Returns the number of findings with the given severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity() == severity).count()
    }

    /// Checks if a finding of this kind was reported for an object.
    #[must_use]
    pub fn has(&self, blob: BlobId, kind: BlobIssueKind) -> bool {
        self.issues.iter().any(|i| i.blob == blob && i.kind == kind)
    }

    /// Checks if a partition row was reported as an orphaned payload.
    #[must_use]
    pub fn has_orphan(&self, partition: usize, data_id: i64) -> bool {
        self.issues.iter().any(|i| {
            i.kind == BlobIssueKind::OrphanPayload
                && i.partition == Some(partition)
                && i.blob.as_i64() == data_id
        })
    }

    fn push(&mut self, blob: BlobId, kind: BlobIssueKind, message: String) {
        warn!(%blob, ?kind, "{message}");
        self.issues.push(BlobIssue {
            blob,
            partition: None,
            kind,
            message,
        });
    }

    fn push_orphan(&mut self, partition: usize, data_id: i64) {
        warn!(partition, data_id, "orphaned blob payload");
        self.issues.push(BlobIssue {
            blob: BlobId(data_id),
            partition: Some(partition),
            kind: BlobIssueKind::OrphanPayload,
            message: "payload has no metadata row".into(),
        });
    }
}

impl BlobStore {
    /// Scans every stored object and reports inconsistencies.
    ///
    /// In fragmented layout, partition payloads that no object points at are
    /// reported too. The scan never stops at a finding; only storage failures abort it.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn validate(&self) -> CoreResult<BlobReport> {
        // Holding the index lock keeps a half-finished put from looking orphaned.
        let _guard = self.index_lock.lock();
        let mut report = BlobReport::default();
        let mut seen: HashMap<(ContentHash, i64), BlobId> = HashMap::new();
        let mut referenced: HashSet<(i64, i64)> = HashSet::new();

        for (raw_id, row) in self.meta.select_where(self.table, &Filter::All)? {
            let id = BlobId(raw_id);
            report.scanned += 1;
            if let (Datum::Int(partition), Datum::Int(data_id)) =
                (row.get(PARTITION_COLUMN), row.get(DATA_ID_COLUMN))
            {
                referenced.insert((*partition, *data_id));
            }

            let hash_text = row.get(HASH_COLUMN).as_text().unwrap_or_default();
            let length = row.get(LENGTH_COLUMN).as_int();

            let hash = if hash_text.is_empty() || hash_text.bytes().all(|b| b == b'0') {
                report.push(id, BlobIssueKind::PlaceholderHash, "placeholder hash".into());
                None
            } else if let Some(hash) = ContentHash::from_hex(hash_text) {
                Some(hash)
            } else {
                report.push(
                    id,
                    BlobIssueKind::CorruptHash,
                    format!("hash '{hash_text}' is not a 128-bit hex digest"),
                );
                None
            };

            let Some(payload) = self.payload(id, &row)? else {
                report.push(id, BlobIssueKind::MissingPayload, "payload is missing".into());
                continue;
            };

            let actual = payload.len() as i64;
            if length != Some(actual) {
                report.push(
                    id,
                    BlobIssueKind::LengthMismatch,
                    format!("stored length {length:?} but payload has {actual} bytes"),
                );
            }

            let Some(hash) = hash else { continue };
            if ContentHash::of(&payload) != hash {
                report.push(
                    id,
                    BlobIssueKind::HashMismatch,
                    format!("payload does not hash to {hash}"),
                );
                continue;
            }
            if let Some(first) = seen.get(&(hash, actual)) {
                report.push(
                    id,
                    BlobIssueKind::DuplicatePayload,
                    format!("same content as {first}; deduplication was bypassed"),
                );
            } else {
                seen.insert((hash, actual), id);
            }
        }

        for (index, partition) in self.partitions.iter().enumerate() {
            for (data_id, _) in partition.store.select_where(partition.table, &Filter::All)? {
                if !referenced.contains(&(index as i64, data_id)) {
                    report.push_orphan(index, data_id);
                }
            }
        }

        info!(
            scanned = report.scanned,
            errors = report.count(Severity::Error),
            warnings = report.count(Severity::Warning),
            "blob validation finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::super::{BlobStoreConfig, BLOB_DATA_TABLE, BLOB_TABLE, PAYLOAD_COLUMN};
    use super::*;
    use docset_storage::{InMemoryRowStore, Row, RowStore};
    use std::sync::Arc;

    fn insert_raw(meta: &InMemoryRowStore, row: Row) -> BlobId {
        let table = meta.table_id(BLOB_TABLE).unwrap();
        let mut txn = meta.begin_write().unwrap();
        let id = txn.insert(table, row).unwrap();
        txn.commit().unwrap();
        BlobId(id)
    }

    #[test]
    fn clean_store_has_no_findings() {
        let store = BlobStore::open(Arc::new(InMemoryRowStore::new()), BlobStoreConfig::new())
            .unwrap();
        store.put(b"one").unwrap();
        store.put(b"two").unwrap();
        let report = store.validate().unwrap();
        assert_eq!(report.scanned, 2);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn findings_are_classified() {
        let meta = Arc::new(InMemoryRowStore::new());
        let store = BlobStore::open(meta.clone(), BlobStoreConfig::new()).unwrap();
        let good = store.put(b"payload").unwrap();
        let good_hash = ContentHash::of(b"payload").to_hex();

        let placeholder = insert_raw(
            &meta,
            Row::new()
                .with(HASH_COLUMN, "0".repeat(32))
                .with(LENGTH_COLUMN, 1i64)
                .with(PAYLOAD_COLUMN, vec![1u8]),
        );
        let bad_length = insert_raw(
            &meta,
            Row::new()
                .with(HASH_COLUMN, ContentHash::of(b"ab").to_hex())
                .with(LENGTH_COLUMN, 5i64)
                .with(PAYLOAD_COLUMN, b"ab".to_vec()),
        );
        let corrupt = insert_raw(
            &meta,
            Row::new()
                .with(HASH_COLUMN, "not-a-hash")
                .with(LENGTH_COLUMN, 1i64)
                .with(PAYLOAD_COLUMN, vec![7u8]),
        );
        let duplicate = insert_raw(
            &meta,
            Row::new()
                .with(HASH_COLUMN, good_hash)
                .with(LENGTH_COLUMN, 7i64)
                .with(PAYLOAD_COLUMN, b"payload".to_vec()),
        );
        let missing = insert_raw(
            &meta,
            Row::new()
                .with(HASH_COLUMN, ContentHash::of(b"x").to_hex())
                .with(LENGTH_COLUMN, 1i64),
        );

        let report = store.validate().unwrap();
        assert_eq!(report.scanned, 6);
        assert!(!report.issues.iter().any(|i| i.blob == good));
        assert!(report.has(placeholder, BlobIssueKind::PlaceholderHash));
        assert!(report.has(bad_length, BlobIssueKind::LengthMismatch));
        assert!(report.has(corrupt, BlobIssueKind::CorruptHash));
        assert!(report.has(duplicate, BlobIssueKind::DuplicatePayload));
        assert!(report.has(missing, BlobIssueKind::MissingPayload));
        assert!(report.has_errors());
        assert_eq!(report.count(Severity::Warning), 2);
        assert_eq!(report.count(Severity::Error), 3);
    }

    #[test]
    fn unreferenced_partition_payload_is_reported() {
        let partition = Arc::new(InMemoryRowStore::new());
        let partitions: Vec<Arc<dyn RowStore>> = vec![partition.clone()];
        let store = BlobStore::open(
            Arc::new(InMemoryRowStore::new()),
            BlobStoreConfig::fragmented(partitions),
        )
        .unwrap();
        let kept = store.put(b"kept").unwrap();

        let data = partition.table_id(BLOB_DATA_TABLE).unwrap();
        let mut txn = partition.begin_write().unwrap();
        let stray = txn
            .insert(data, Row::new().with(PAYLOAD_COLUMN, b"stray".to_vec()))
            .unwrap();
        txn.commit().unwrap();

        let report = store.validate().unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.issues.len(), 1);
        assert!(report.has_orphan(0, stray));
        assert!(!report.issues.iter().any(|i| i.blob == kept));
        assert!(!report.has_errors());
        assert!(report.issues[0].to_string().contains("partition 0"));
    }

    #[test]
    fn severity_of_kinds() {
        assert_eq!(BlobIssueKind::OrphanPayload.severity(), Severity::Warning);
        assert_eq!(BlobIssueKind::DuplicatePayload.severity(), Severity::Warning);
        assert_eq!(BlobIssueKind::LengthMismatch.severity(), Severity::Error);
    }
}
