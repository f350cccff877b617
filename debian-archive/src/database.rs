// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Catalog key-value storage.

The catalog persists to an ordered byte-key/byte-value map with batched
writes and prefix scans. The embedded store itself is an external
collaborator; any ordered KV engine can implement [Database]. The in-memory
implementation backs tests and one-shot runs.

The store permits a single writer; batched writes form the transaction
boundary.
*/

use {
    crate::error::Result,
    std::{
        collections::BTreeMap,
        ops::Bound,
        sync::Mutex,
    },
};

/// A set of writes applied atomically.
#[derive(Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.ops.push(BatchOp::Put(key.to_vec(), value.to_vec()));
    }

    pub fn delete(&mut self, key: &[u8]) {
        self.ops.push(BatchOp::Delete(key.to_vec()));
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Ordered byte-key/byte-value persistent map.
pub trait Database: Send + Sync {
    /// Retrieve a value by exact key.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    fn delete(&self, key: &[u8]) -> Result<()>;

    /// All `(key, value)` pairs whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Keys starting with `prefix`, in order.
    fn keys_by_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        Ok(self
            .scan_prefix(prefix)?
            .into_iter()
            .map(|(k, _)| k)
            .collect())
    }

    /// Whether any key starts with `prefix`.
    fn has_prefix(&self, prefix: &[u8]) -> Result<bool> {
        Ok(!self.keys_by_prefix(prefix)?.is_empty())
    }

    /// Apply a batch of writes atomically.
    fn write(&self, batch: WriteBatch) -> Result<()>;
}

/// In-memory [Database] over an ordered map.
#[derive(Default)]
pub struct MemoryDatabase {
    map: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Database for MemoryDatabase {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.map.lock().expect("lock poisoned").get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.map
            .lock()
            .expect("lock poisoned")
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.map.lock().expect("lock poisoned").remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let map = self.map.lock().expect("lock poisoned");

        Ok(map
            .range::<Vec<u8>, _>((Bound::Included(&prefix.to_vec()), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        let mut map = self.map.lock().expect("lock poisoned");

        for op in batch.ops {
            match op {
                BatchOp::Put(k, v) => {
                    map.insert(k, v);
                }
                BatchOp::Delete(k) => {
                    map.remove(&k);
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_put_delete() {
        let db = MemoryDatabase::new();

        assert_eq!(db.get(b"a").unwrap(), None);
        db.put(b"a", b"1").unwrap();
        assert_eq!(db.get(b"a").unwrap(), Some(b"1".to_vec()));
        db.delete(b"a").unwrap();
        assert_eq!(db.get(b"a").unwrap(), None);
    }

    #[test]
    fn prefix_scan_is_ordered() {
        let db = MemoryDatabase::new();
        db.put(b"Pa 2", b"x").unwrap();
        db.put(b"Pa 1", b"y").unwrap();
        db.put(b"Q", b"z").unwrap();

        let keys = db.keys_by_prefix(b"P").unwrap();
        assert_eq!(keys, vec![b"Pa 1".to_vec(), b"Pa 2".to_vec()]);
        assert!(db.has_prefix(b"Q").unwrap());
        assert!(!db.has_prefix(b"R").unwrap());
    }

    #[test]
    fn batch_is_atomic_unit() {
        let db = MemoryDatabase::new();
        db.put(b"stale", b"1").unwrap();

        let mut batch = WriteBatch::new();
        batch.put(b"fresh", b"2");
        batch.delete(b"stale");
        db.write(batch).unwrap();

        assert_eq!(db.get(b"fresh").unwrap(), Some(b"2".to_vec()));
        assert_eq!(db.get(b"stale").unwrap(), None);
    }
}
