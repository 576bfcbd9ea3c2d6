//! JSON snapshot persistence for [`InMemoryRowStore`].

use crate::error::StorageResult;
use crate::memory::{InMemoryRowStore, Tables};
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

impl InMemoryRowStore {
    /// Writes the committed state of every table to `path`.
    ///
    /// The file is written to a sibling temporary path first and then
    /// renamed over the target.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_snapshot(&self, path: &Path) -> StorageResult<()> {
        let tables = self.tables_snapshot();
        let tmp = path.with_extension("tmp");
        {
            let mut writer = BufWriter::new(fs::File::create(&tmp)?);
            serde_json::to_writer(&mut writer, &tables)?;
            writer.flush()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Opens a store from a snapshot written by [`InMemoryRowStore::save_snapshot`].
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a valid snapshot.
    pub fn load_snapshot(path: &Path) -> StorageResult<Self> {
        let reader = BufReader::new(fs::File::open(path)?);
        let tables: Tables = serde_json::from_reader(reader)?;
        Ok(Self::from_tables(tables))
    }
}

#[cfg(test)]
mod tests {
    use crate::{Datum, InMemoryRowStore, Row, RowStore, StorageError, TableSpec};
    use tempfile::tempdir;

    #[test]
    fn snapshot_roundtrip_preserves_rows_and_id_counters() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = InMemoryRowStore::new();
        let table = store
            .create_table(&TableSpec::new("docs").column("title").column("blob"))
            .unwrap();
        let mut txn = store.begin_write().unwrap();
        txn.insert(table, Row::new().with("title", "a")).unwrap();
        let second = txn
            .insert(table, Row::new().with("blob", vec![1u8, 2, 3]))
            .unwrap();
        txn.delete(table, second).unwrap();
        txn.commit().unwrap();
        store.save_snapshot(&path).unwrap();

        let loaded = InMemoryRowStore::load_snapshot(&path).unwrap();
        assert_eq!(loaded.table_id("docs"), Some(table));
        assert_eq!(
            loaded.select(table, 1).unwrap().unwrap().get("title"),
            &Datum::from("a")
        );

        let mut txn = loaded.begin_write().unwrap();
        assert_eq!(txn.insert(table, Row::new()).unwrap(), 3);
    }

    #[test]
    fn corrupt_snapshot_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, b"{not json").unwrap();

        let result = InMemoryRowStore::load_snapshot(&path);
        assert!(matches!(result, Err(StorageError::Corrupted(_))));
    }
}
