//! Backend contract shared by every storage implementation.

use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;

/// A single write inside a [`Batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Insert(Vec<u8>, Vec<u8>),
    Remove(Vec<u8>),
}

/// An ordered group of writes applied atomically to one tree.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

impl Batch {
    /// Create a new empty batch.
    pub fn new() -> Self {
        Self { ops: Vec::new() }
    }

    /// Add an insert operation to the batch.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) {
        self.ops.push(BatchOp::Insert(key.to_vec(), value.to_vec()));
    }

    /// Add a remove operation to the batch.
    pub fn remove(&mut self, key: &[u8]) {
        self.ops.push(BatchOp::Remove(key.to_vec()));
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// A named, isolated keyspace.
///
/// Every write primitive is atomic for the keys it names. Nothing is atomic
/// across two calls: callers that need two keys to change together use
/// [`KvTree::apply_batch`] or [`KvTree::commit_if_absent`].
pub trait KvTree: Send + Sync {
    /// Get a value by key.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Set a value by key, overwriting any previous value.
    fn set(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Delete a key, returning the value it held.
    fn delete(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Apply `batch` only if `guard` is currently absent.
    ///
    /// Returns `true` when the batch was applied. The absence check and the
    /// writes happen in one transaction, so two racing callers can never both
    /// observe the guard as missing.
    fn commit_if_absent(&self, guard: &[u8], batch: &Batch) -> Result<bool>;

    /// Apply `batch` only if `guard` is currently present.
    ///
    /// The mirror of [`KvTree::commit_if_absent`]: lets a caller remove a
    /// record together with its index entries and learn, atomically, whether
    /// the record existed.
    fn commit_if_present(&self, guard: &[u8], batch: &Batch) -> Result<bool>;

    /// Atomically replace the value at `key` with `f(current)`.
    ///
    /// `f` returning `None` removes the key. Returns the previous value.
    fn fetch_and_update(
        &self,
        key: &[u8],
        f: &mut dyn FnMut(Option<&[u8]>) -> Option<Vec<u8>>,
    ) -> Result<Option<Vec<u8>>>;

    /// Apply a batch of operations atomically.
    fn apply_batch(&self, batch: &Batch) -> Result<()>;

    /// All entries whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Number of entries in this tree.
    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Check if a key exists.
    fn contains(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Insert `value` only if `key` is absent. Returns `true` if inserted.
    fn insert_if_absent(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        let mut batch = Batch::new();
        batch.insert(key, value);
        self.commit_if_absent(key, &batch)
    }

    /// Get a value and deserialize it using bincode.
    fn get_bincode<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>>
    where
        Self: Sized,
    {
        match self.get(key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Serialize and set a value using bincode.
    fn set_bincode<T: Serialize>(&self, key: &[u8], value: &T) -> Result<()>
    where
        Self: Sized,
    {
        let bytes = bincode::serialize(value)?;
        self.set(key, &bytes)
    }

    /// Get a value and deserialize it from JSON.
    fn get_json<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>>
    where
        Self: Sized,
    {
        match self.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Serialize and set a value using JSON.
    fn set_json<T: Serialize>(&self, key: &[u8], value: &T) -> Result<()>
    where
        Self: Sized,
    {
        let bytes = serde_json::to_vec(value)?;
        self.set(key, &bytes)
    }
}

/// A database that hands out named trees.
pub trait KvBackend: Send + Sync {
    type Tree: KvTree + 'static;

    /// Get or create a named tree.
    fn tree(&self, name: &str) -> Result<Self::Tree>;
}

/// Compute the successor of a byte prefix for range scans.
///
/// Returns `None` if the prefix is all 0xFF bytes (no upper bound exists).
pub fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut upper = prefix.to_vec();
    while let Some(last) = upper.last_mut() {
        if *last == 0xFF {
            upper.pop();
        } else {
            *last += 1;
            return Some(upper);
        }
    }
    None
}
