#![allow(clippy::result_large_err)]
//! Durable key-value storage using redb.
//!
//! Every tree operation runs in its own redb transaction. Write
//! transactions are serialized by redb, which is what makes
//! [`KvTree::commit_if_absent`] and [`KvTree::fetch_and_update`] atomic
//! without any lock of ours.
//!
//! # Example
//!
//! ```rust,no_run
//! use warrant_storage::{KvBackend, KvTree, RedbStore};
//!
//! let store = RedbStore::open("/tmp/directory.redb").unwrap();
//! let identities = store.tree("identities").unwrap();
//! identities.set(b"a@x.com", b"record").unwrap();
//! assert!(identities.contains(b"a@x.com").unwrap());
//! ```

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};

use crate::backend::{prefix_upper_bound, Batch, BatchOp, KvBackend, KvTree};
use crate::error::{Result, StorageError};

type ByteTable<'txn> = redb::Table<'txn, &'static [u8], &'static [u8]>;

fn write_ops(table: &mut ByteTable<'_>, batch: &Batch) -> Result<()> {
    for op in batch.ops() {
        match op {
            BatchOp::Insert(key, value) => {
                table.insert(key.as_slice(), value.as_slice())?;
            }
            BatchOp::Remove(key) => {
                table.remove(key.as_slice())?;
            }
        }
    }
    Ok(())
}

/// A redb database handing out named trees.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
    /// Backing file of a temporary store; removed when the last clone drops.
    _tempfile: Option<Arc<tempfile::NamedTempFile>>,
}

impl RedbStore {
    /// Open or create a redb database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = Database::create(path.as_ref())?;
        tracing::debug!(path = %path.as_ref().display(), "redb store opened");
        Ok(Self {
            db: Arc::new(db),
            _tempfile: None,
        })
    }

    /// Open a database on a fresh temporary file (for testing).
    pub fn open_temporary() -> Result<Self> {
        let tmpfile = tempfile::NamedTempFile::new()?;
        let db = Database::create(tmpfile.path())?;
        Ok(Self {
            db: Arc::new(db),
            _tempfile: Some(Arc::new(tmpfile)),
        })
    }

    /// Get the raw redb Database handle for advanced operations.
    pub fn raw(&self) -> &Database {
        &self.db
    }
}

impl KvBackend for RedbStore {
    type Tree = RedbTree;

    /// Get or create a named tree (table namespace).
    ///
    /// # Memory
    ///
    /// Uses `Box::leak` to satisfy redb's `&'static str` requirement for
    /// table names. Each call leaks the name for the process lifetime, so
    /// only call this with the handful of fixed tree names a directory uses.
    fn tree(&self, name: &str) -> Result<RedbTree> {
        let table_name: &'static str = Box::leak(name.to_owned().into_boxed_str());
        let table_def = TableDefinition::<&[u8], &[u8]>::new(table_name);
        // Opening the table in a write transaction creates it if missing.
        let write_txn = self.db.begin_write()?;
        let _ = write_txn.open_table(table_def)?;
        write_txn.commit()?;

        Ok(RedbTree {
            db: Arc::clone(&self.db),
            table_name,
        })
    }
}

/// A named tree (table) within a redb database.
#[derive(Clone)]
pub struct RedbTree {
    db: Arc<Database>,
    table_name: &'static str,
}

impl RedbTree {
    fn table_def(&self) -> TableDefinition<'static, &'static [u8], &'static [u8]> {
        TableDefinition::new(self.table_name)
    }

    pub fn name(&self) -> &str {
        self.table_name
    }

    /// Apply `batch` iff the presence of `guard` equals `want_present`,
    /// inside a single write transaction.
    fn commit_guarded(&self, guard: &[u8], want_present: bool, batch: &Batch) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let applied;
        {
            let mut table = write_txn.open_table(self.table_def())?;
            let present = table.get(guard)?.is_some();
            if present == want_present {
                write_ops(&mut table, batch)?;
                applied = true;
            } else {
                applied = false;
            }
        }
        write_txn.commit()?;
        Ok(applied)
    }
}

impl KvTree for RedbTree {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        match read_txn.open_table(self.table_def()) {
            Ok(table) => Ok(table.get(key)?.map(|v| v.value().to_vec())),
            Err(redb::TableError::TableDoesNotExist(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(self.table_def())?;
            table.insert(key, value)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let write_txn = self.db.begin_write()?;
        let old_value;
        {
            let mut table = write_txn.open_table(self.table_def())?;
            old_value = table.remove(key)?.map(|v| v.value().to_vec());
        }
        write_txn.commit()?;
        Ok(old_value)
    }

    fn commit_if_absent(&self, guard: &[u8], batch: &Batch) -> Result<bool> {
        self.commit_guarded(guard, false, batch)
    }

    fn commit_if_present(&self, guard: &[u8], batch: &Batch) -> Result<bool> {
        self.commit_guarded(guard, true, batch)
    }

    fn fetch_and_update(
        &self,
        key: &[u8],
        f: &mut dyn FnMut(Option<&[u8]>) -> Option<Vec<u8>>,
    ) -> Result<Option<Vec<u8>>> {
        let write_txn = self.db.begin_write()?;
        let old_value;
        {
            let mut table = write_txn.open_table(self.table_def())?;
            old_value = table.get(key)?.map(|v| v.value().to_vec());
            match f(old_value.as_deref()) {
                Some(val) => {
                    table.insert(key, val.as_slice())?;
                }
                None => {
                    table.remove(key)?;
                }
            }
        }
        write_txn.commit()?;
        Ok(old_value)
    }

    fn apply_batch(&self, batch: &Batch) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(self.table_def())?;
            write_ops(&mut table, batch)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Implemented as a range scan with a computed upper bound. redb
    /// iterators are tied to the transaction, so results are materialized.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(self.table_def()) {
            Ok(t) => t,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let iter = match prefix_upper_bound(prefix) {
            Some(upper) => table.range::<&[u8]>(prefix..upper.as_slice())?,
            // Prefix is all 0xFF (or empty): scan to the end
            None => table.range::<&[u8]>(prefix..)?,
        };

        iter.map(|entry| {
            let (k, v) = entry.map_err(StorageError::Storage)?;
            Ok((k.value().to_vec(), v.value().to_vec()))
        })
        .collect()
    }

    fn len(&self) -> Result<usize> {
        let read_txn = self.db.begin_read()?;
        match read_txn.open_table(self.table_def()) {
            Ok(table) => Ok(table.len()? as usize),
            Err(redb::TableError::TableDoesNotExist(_)) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}
