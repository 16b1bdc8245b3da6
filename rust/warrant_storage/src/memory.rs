//! In-process key-value storage.
//!
//! Each tree is an ordered map behind a `RwLock`. Reads run in parallel,
//! writes are serialized per tree. Not durable: all state is lost when the
//! last handle drops.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::{Arc, Mutex, RwLock};

use crate::backend::{prefix_upper_bound, Batch, BatchOp, KvBackend, KvTree};
use crate::error::{Result, StorageError};

type Map = BTreeMap<Vec<u8>, Vec<u8>>;

fn poisoned<E: std::fmt::Display>(e: E) -> StorageError {
    StorageError::Poisoned(e.to_string())
}

fn write_ops(map: &mut Map, batch: &Batch) {
    for op in batch.ops() {
        match op {
            BatchOp::Insert(key, value) => {
                map.insert(key.clone(), value.clone());
            }
            BatchOp::Remove(key) => {
                map.remove(key);
            }
        }
    }
}

/// A set of named in-memory trees.
#[derive(Clone, Default)]
pub struct MemoryStore {
    trees: Arc<Mutex<HashMap<String, MemoryTree>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvBackend for MemoryStore {
    type Tree = MemoryTree;

    fn tree(&self, name: &str) -> Result<MemoryTree> {
        let mut trees = self.trees.lock().map_err(poisoned)?;
        Ok(trees.entry(name.to_string()).or_default().clone())
    }
}

/// A named in-memory tree. Clones share the same map.
#[derive(Clone, Default)]
pub struct MemoryTree {
    map: Arc<RwLock<Map>>,
}

impl KvTree for MemoryTree {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let map = self.map.read().map_err(poisoned)?;
        Ok(map.get(key).cloned())
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut map = self.map.write().map_err(poisoned)?;
        map.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut map = self.map.write().map_err(poisoned)?;
        Ok(map.remove(key))
    }

    fn commit_if_absent(&self, guard: &[u8], batch: &Batch) -> Result<bool> {
        let mut map = self.map.write().map_err(poisoned)?;
        if map.contains_key(guard) {
            return Ok(false);
        }
        write_ops(&mut map, batch);
        Ok(true)
    }

    fn commit_if_present(&self, guard: &[u8], batch: &Batch) -> Result<bool> {
        let mut map = self.map.write().map_err(poisoned)?;
        if !map.contains_key(guard) {
            return Ok(false);
        }
        write_ops(&mut map, batch);
        Ok(true)
    }

    fn fetch_and_update(
        &self,
        key: &[u8],
        f: &mut dyn FnMut(Option<&[u8]>) -> Option<Vec<u8>>,
    ) -> Result<Option<Vec<u8>>> {
        let mut map = self.map.write().map_err(poisoned)?;
        let old_value = map.get(key).cloned();
        match f(old_value.as_deref()) {
            Some(val) => {
                map.insert(key.to_vec(), val);
            }
            None => {
                map.remove(key);
            }
        }
        Ok(old_value)
    }

    fn apply_batch(&self, batch: &Batch) -> Result<()> {
        let mut map = self.map.write().map_err(poisoned)?;
        write_ops(&mut map, batch);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let map = self.map.read().map_err(poisoned)?;
        let upper = match prefix_upper_bound(prefix) {
            Some(upper) => Bound::Excluded(upper),
            None => Bound::Unbounded,
        };
        Ok(map
            .range((Bound::Included(prefix.to_vec()), upper))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.map.read().map_err(poisoned)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_name_shares_tree() {
        let store = MemoryStore::new();
        let a = store.tree("groups").unwrap();
        let b = store.tree("groups").unwrap();
        a.set(b"admins", b"1").unwrap();
        assert_eq!(b.get(b"admins").unwrap(), Some(b"1".to_vec()));
        assert!(store.tree("permissions").unwrap().is_empty().unwrap());
    }

    #[test]
    fn test_insert_if_absent_races_have_one_winner() {
        let store = MemoryStore::new();
        let tree = store.tree("race").unwrap();

        let winners: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let tree = tree.clone();
                    s.spawn(move || tree.insert_if_absent(b"admins", &[i]).unwrap())
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap() as usize)
                .sum()
        });
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_commit_if_present_removes_pair_once() {
        let tree = MemoryTree::default();
        tree.set(b"member\x1fa\x1fg", b"1").unwrap();
        tree.set(b"member_of\x1fg\x1fa", b"").unwrap();

        let mut batch = Batch::new();
        batch.remove(b"member\x1fa\x1fg");
        batch.remove(b"member_of\x1fg\x1fa");
        assert!(tree.commit_if_present(b"member\x1fa\x1fg", &batch).unwrap());
        assert!(tree.is_empty().unwrap());
        assert!(!tree.commit_if_present(b"member\x1fa\x1fg", &batch).unwrap());
    }

    #[test]
    fn test_scan_prefix_with_high_bytes() {
        let tree = MemoryTree::default();
        tree.set(b"\xff\xffa", b"1").unwrap();
        tree.set(b"\xff\xffb", b"2").unwrap();
        tree.set(b"\xfe", b"3").unwrap();
        assert_eq!(tree.scan_prefix(b"\xff\xff").unwrap().len(), 2);
        assert_eq!(tree.scan_prefix(b"").unwrap().len(), 3);
    }
}
