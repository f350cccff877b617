// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! File-backed catalog storage.

A minimal ordered KV store persisting the whole map as one JSON document.
Good enough for a single-process tool; heavier engines plug in through the
same [Database] trait.
*/

use {
    debian_archive::{
        database::{Database, MemoryDatabase, WriteBatch},
        error::{ArchiveError, Result},
    },
    std::path::{Path, PathBuf},
    std::sync::Mutex,
};

pub struct FileDatabase {
    inner: MemoryDatabase,
    path: PathBuf,
    flush_lock: Mutex<()>,
}

impl FileDatabase {
    /// Open (or create) the database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let inner = MemoryDatabase::new();

        if path.exists() {
            let data = std::fs::read(&path)
                .map_err(|e| ArchiveError::IoPath(path.display().to_string(), e))?;
            let entries: Vec<(String, String)> = serde_json::from_slice(&data)?;

            let mut batch = WriteBatch::new();
            for (key, value) in entries {
                // Keys and values are stored hex-encoded so arbitrary bytes
                // survive the JSON round trip.
                batch.put(&hex_decode(&key)?, &hex_decode(&value)?);
            }
            inner.write(batch)?;
        }

        Ok(Self {
            inner,
            path,
            flush_lock: Mutex::new(()),
        })
    }

    fn flush(&self) -> Result<()> {
        let _guard = self.flush_lock.lock().expect("lock poisoned");

        let entries: Vec<(String, String)> = self
            .inner
            .scan_prefix(b"")?
            .into_iter()
            .map(|(k, v)| (hex::encode(k), hex::encode(v)))
            .collect();

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ArchiveError::IoPath(parent.display().to_string(), e))?;
        }

        let staged = self.path.with_extension("tmp");
        std::fs::write(&staged, serde_json::to_vec(&entries)?)
            .map_err(|e| ArchiveError::IoPath(staged.display().to_string(), e))?;
        std::fs::rename(&staged, &self.path)
            .map_err(|e| ArchiveError::IoPath(self.path.display().to_string(), e))?;

        Ok(())
    }
}

fn hex_decode(s: &str) -> Result<Vec<u8>> {
    hex::decode(s).map_err(|_| {
        ArchiveError::ControlParse("invalid hex string in catalog file".to_string())
    })
}

impl Database for FileDatabase {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.inner.put(key, value)?;
        self.flush()
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.inner.delete(key)?;
        self.flush()
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.inner.scan_prefix(prefix)
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        self.inner.write(batch)?;
        self.flush()
    }
}
