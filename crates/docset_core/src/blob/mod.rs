//! Content-addressed binary object store.
//!
//! Objects are keyed by their MD5 content hash together with their length.
//! Storing the same bytes twice returns the existing object. Metadata always
//! lives in the `_blobs` table of the main store; in fragmented layout the
//! payloads go to the `_blob_data` table of one of several partition stores
//! chosen by a [`PartitionRule`].

mod validate;

pub use validate::{BlobIssue, BlobIssueKind, BlobReport, Severity};

use crate::error::{CoreError, CoreResult};
use docset_storage::{Datum, Filter, Row, RowStore, StorageError, TableId, TableSpec};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Metadata table of the blob store.
pub const BLOB_TABLE: &str = "_blobs";

/// Payload table of partition stores.
pub const BLOB_DATA_TABLE: &str = "_blob_data";

pub(crate) const HASH_COLUMN: &str = "hash";
pub(crate) const LENGTH_COLUMN: &str = "length";
pub(crate) const PAYLOAD_COLUMN: &str = "payload";
pub(crate) const PARTITION_COLUMN: &str = "partition";
pub(crate) const DATA_ID_COLUMN: &str = "data_id";

/// Surrogate identifier of a stored binary object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlobId(pub i64);

impl BlobId {
    /// Creates a blob ID.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw row identifier.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blob:{}", self.0)
    }
}

/// 128-bit content hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 16]);

impl ContentHash {
    /// Hashes a payload.
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        Self(md5::compute(bytes).0)
    }

    /// Parses the lowercase hex form.
    #[must_use]
    pub fn from_hex(text: &str) -> Option<Self> {
        let bytes = hex::decode(text).ok()?;
        let array: [u8; 16] = bytes.try_into().ok()?;
        Some(Self(array))
    }

    /// Returns the raw digest.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Returns the lowercase hex form.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Chooses the partition store of a new payload.
pub trait PartitionRule: Send + Sync {
    /// Returns a partition index; values are taken modulo `partitions`.
    fn partition(&self, hash: &ContentHash, len: usize, partitions: usize) -> usize;
}

impl<F> PartitionRule for F
where
    F: Fn(&ContentHash, usize, usize) -> usize + Send + Sync,
{
    fn partition(&self, hash: &ContentHash, len: usize, partitions: usize) -> usize {
        self(hash, len, partitions)
    }
}

/// Spreads payloads by the first byte of their hash.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashPartitionRule;

impl PartitionRule for HashPartitionRule {
    fn partition(&self, hash: &ContentHash, _len: usize, partitions: usize) -> usize {
        usize::from(hash.as_bytes()[0]) % partitions.max(1)
    }
}

/// Physical layout of the blob store.
#[derive(Clone, Default)]
pub enum BlobLayout {
    /// Payloads are stored next to their metadata.
    #[default]
    Inline,
    /// Payloads are stored in separate partition stores.
    Fragmented {
        /// Partition stores.
        partitions: Vec<Arc<dyn RowStore>>,
        /// Partition selection.
        rule: Arc<dyn PartitionRule>,
    },
}

impl fmt::Debug for BlobLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlobLayout::Inline => f.write_str("Inline"),
            BlobLayout::Fragmented { partitions, .. } => f
                .debug_struct("Fragmented")
                .field("partitions", &partitions.len())
                .finish_non_exhaustive(),
        }
    }
}

/// Configuration of a blob store.
#[derive(Debug, Clone, Default)]
pub struct BlobStoreConfig {
    /// Physical layout.
    pub layout: BlobLayout,
}

impl BlobStoreConfig {
    /// Inline layout.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fragmented layout over the given partitions using
    /// [`HashPartitionRule`].
    #[must_use]
    pub fn fragmented(partitions: Vec<Arc<dyn RowStore>>) -> Self {
        Self {
            layout: BlobLayout::Fragmented {
                partitions,
                rule: Arc::new(HashPartitionRule),
            },
        }
    }

    /// Replaces the partition rule of a fragmented layout.
    #[must_use]
    pub fn rule(mut self, rule: Arc<dyn PartitionRule>) -> Self {
        if let BlobLayout::Fragmented { rule: current, .. } = &mut self.layout {
            *current = rule;
        }
        self
    }
}

struct Partition {
    store: Arc<dyn RowStore>,
    table: TableId,
}

impl Partition {
    fn remove(&self, data_id: i64) -> CoreResult<()> {
        let mut txn = self.store.begin_write()?;
        txn.delete(self.table, data_id)?;
        txn.commit()?;
        Ok(())
    }
}

/// Stored metadata of a binary object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobInfo {
    /// Object identifier.
    pub id: BlobId,
    /// Stored hash text.
    pub hash: String,
    /// Stored length.
    pub length: i64,
    /// Partition holding the payload, `None` when inline.
    pub partition: Option<usize>,
}

/// Content-addressed binary object store.
///
/// Safe to share across working sets. The hash index is serialized by a
/// mutex held only for the duration of a single [`BlobStore::put`].
pub struct BlobStore {
    meta: Arc<dyn RowStore>,
    table: TableId,
    partitions: Vec<Partition>,
    rule: Option<Arc<dyn PartitionRule>>,
    index_lock: Mutex<()>,
}

impl fmt::Debug for BlobStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobStore")
            .field("table", &self.table)
            .field("partitions", &self.partitions.len())
            .finish_non_exhaustive()
    }
}

impl BlobStore {
    /// Opens the store, creating its tables if necessary.
    ///
    /// # Errors
    ///
    /// Returns an error if a fragmented layout has no partitions, or a
    /// storage error.
    pub fn open(meta: Arc<dyn RowStore>, config: BlobStoreConfig) -> CoreResult<Self> {
        let table = meta.create_table(
            &TableSpec::new(BLOB_TABLE)
                .column(HASH_COLUMN)
                .column(LENGTH_COLUMN)
                .column(PAYLOAD_COLUMN)
                .column(PARTITION_COLUMN)
                .column(DATA_ID_COLUMN),
        )?;

        let (partitions, rule) = match config.layout {
            BlobLayout::Inline => (Vec::new(), None),
            BlobLayout::Fragmented { partitions, rule } => {
                if partitions.is_empty() {
                    return Err(CoreError::invalid_request(
                        "fragmented blob layout needs at least one partition",
                    ));
                }
                let partitions = partitions
                    .into_iter()
                    .map(|store| {
                        let table = store.create_table(
                            &TableSpec::new(BLOB_DATA_TABLE).column(PAYLOAD_COLUMN),
                        )?;
                        Ok(Partition { store, table })
                    })
                    .collect::<CoreResult<Vec<_>>>()?;
                (partitions, Some(rule))
            }
        };

        Ok(Self {
            meta,
            table,
            partitions,
            rule,
            index_lock: Mutex::new(()),
        })
    }

    /// Checks if payloads are stored in partition stores.
    #[must_use]
    pub fn is_fragmented(&self) -> bool {
        self.rule.is_some()
    }

    /// Stores a payload and returns its identifier.
    ///
    /// If an object with the same hash and length exists, its identifier is
    /// returned and nothing is written.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn put(&self, bytes: &[u8]) -> CoreResult<BlobId> {
        let hash = ContentHash::of(bytes);
        let length = i64::try_from(bytes.len())
            .map_err(|_| CoreError::invalid_request("payload too large"))?;

        let _guard = self.index_lock.lock();
        if let Some(id) = self.find(&hash, length)? {
            debug!(%id, %hash, "blob deduplicated");
            return Ok(id);
        }

        let mut row = Row::new()
            .with(HASH_COLUMN, hash.to_hex())
            .with(LENGTH_COLUMN, length);

        let Some(rule) = &self.rule else {
            row.set(PAYLOAD_COLUMN, bytes.to_vec());
            let id = self.insert_meta(row)?;
            info!(%id, %hash, length, "blob stored");
            return Ok(id);
        };

        let index = rule.partition(&hash, bytes.len(), self.partitions.len()) % self.partitions.len();
        let partition = &self.partitions[index];
        let mut txn = partition.store.begin_write()?;
        let data_id = txn.insert(
            partition.table,
            Row::new().with(PAYLOAD_COLUMN, bytes.to_vec()),
        )?;
        txn.commit()?;
        row.set(PARTITION_COLUMN, index as i64);
        row.set(DATA_ID_COLUMN, data_id);

        // The payload is committed first; without its metadata row it must go.
        match self.insert_meta(row) {
            Ok(id) => {
                info!(%id, %hash, length, partition = index, "blob stored");
                Ok(id)
            }
            Err(err) => {
                if let Err(cleanup) = partition.remove(data_id) {
                    warn!(
                        error = %cleanup,
                        partition = index,
                        data_id,
                        "orphaned blob payload left behind"
                    );
                }
                Err(err)
            }
        }
    }

    fn insert_meta(&self, row: Row) -> CoreResult<BlobId> {
        let mut txn = self.meta.begin_write()?;
        let id = BlobId(txn.insert(self.table, row)?);
        txn.commit()?;
        Ok(id)
    }

    fn find(&self, hash: &ContentHash, length: i64) -> CoreResult<Option<BlobId>> {
        let filter = Filter::And(vec![
            Filter::eq(HASH_COLUMN, hash.to_hex()),
            Filter::eq(LENGTH_COLUMN, length),
        ]);
        let rows = self.meta.select_where(self.table, &filter)?;
        Ok(rows.first().map(|(id, _)| BlobId(*id)))
    }

    /// Reads a payload.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BlobNotFound`] for an unknown identifier.
    pub fn get(&self, id: BlobId) -> CoreResult<Vec<u8>> {
        let row = self
            .meta
            .select(self.table, id.0)?
            .ok_or(CoreError::BlobNotFound { id })?;
        self.payload(id, &row)?
            .ok_or_else(|| StorageError::Corrupted(format!("payload of {id} is missing")).into())
    }

    /// Reads the metadata of an object.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BlobNotFound`] for an unknown identifier.
    pub fn info(&self, id: BlobId) -> CoreResult<BlobInfo> {
        let row = self
            .meta
            .select(self.table, id.0)?
            .ok_or(CoreError::BlobNotFound { id })?;
        Ok(Self::info_of(id, &row))
    }

    /// Checks if an object exists.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn contains(&self, id: BlobId) -> CoreResult<bool> {
        Ok(self.meta.select(self.table, id.0)?.is_some())
    }

    /// Returns the number of stored objects.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn len(&self) -> CoreResult<usize> {
        Ok(self.meta.count(self.table)?)
    }

    /// Checks if the store holds no objects.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }

    fn info_of(id: BlobId, row: &Row) -> BlobInfo {
        BlobInfo {
            id,
            hash: row.get(HASH_COLUMN).as_text().unwrap_or_default().to_string(),
            length: row.get(LENGTH_COLUMN).as_int().unwrap_or(-1),
            partition: row
                .get(PARTITION_COLUMN)
                .as_int()
                .and_then(|p| usize::try_from(p).ok()),
        }
    }

    /// Loads the payload referenced by a metadata row.
    fn payload(&self, id: BlobId, row: &Row) -> CoreResult<Option<Vec<u8>>> {
        let Some(index) = row.get(PARTITION_COLUMN).as_int() else {
            return Ok(row.get(PAYLOAD_COLUMN).as_bytes().map(<[u8]>::to_vec));
        };
        let partition = usize::try_from(index)
            .ok()
            .and_then(|i| self.partitions.get(i))
            .ok_or_else(|| {
                StorageError::Corrupted(format!("{id} names unknown partition {index}"))
            })?;
        let Datum::Int(data_id) = row.get(DATA_ID_COLUMN) else {
            return Ok(None);
        };
        Ok(partition
            .store
            .select(partition.table, *data_id)?
            .and_then(|r| r.get(PAYLOAD_COLUMN).as_bytes().map(<[u8]>::to_vec)))
    }
}
