// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The content-addressed package pool.

Package bodies live in a deduplicated store rooted at a directory. The
location of an artifact with file name `F` and SHA-256 `s` is
`<s[0:2]>/<s[2:4]>/<s[4:]>/F`, so identical content imported under the same
name occupies a single copy.

Reference counting for deletion is not maintained inside the pool; cleanup
is driven by the catalog, which knows every live reference.
*/

use {
    crate::{
        checksum::{checksums_for_file, ChecksumInfo},
        error::{ArchiveError, Result},
    },
    std::{
        collections::HashMap,
        fs,
        path::{Path, PathBuf},
        sync::Mutex,
    },
};

/// Maps a pool path to its full [ChecksumInfo].
///
/// Updated on import; consulted on verify.
pub trait ChecksumStorage: Send + Sync {
    fn get(&self, path: &str) -> Result<Option<ChecksumInfo>>;
    fn update(&self, path: &str, checksums: &ChecksumInfo) -> Result<()>;
}

/// In-memory [ChecksumStorage] for tests and one-shot runs.
#[derive(Default)]
pub struct MockChecksumStorage {
    map: Mutex<HashMap<String, ChecksumInfo>>,
}

impl MockChecksumStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChecksumStorage for MockChecksumStorage {
    fn get(&self, path: &str) -> Result<Option<ChecksumInfo>> {
        Ok(self.map.lock().expect("lock poisoned").get(path).cloned())
    }

    fn update(&self, path: &str, checksums: &ChecksumInfo) -> Result<()> {
        self.map
            .lock()
            .expect("lock poisoned")
            .insert(path.to_string(), checksums.clone());
        Ok(())
    }
}

/// Content-addressed package pool rooted at a directory.
pub struct PackagePool {
    root_path: PathBuf,
    support_legacy_paths: bool,
}

impl PackagePool {
    /// Create a pool rooted at `<root>/pool`.
    ///
    /// With `support_legacy_paths`, lookups additionally probe the older
    /// source-letter layout for read compatibility.
    pub fn new(root: impl AsRef<Path>, support_legacy_paths: bool) -> Self {
        Self {
            root_path: root.as_ref().join("pool"),
            support_legacy_paths,
        }
    }

    /// Absolute location of a pool-relative path.
    pub fn full_path(&self, path: &str) -> PathBuf {
        self.root_path.join(path)
    }

    /// Content-addressed relative path for a file.
    fn content_path(filename: &str, checksums: &ChecksumInfo) -> Result<String> {
        let sha256 = &checksums.sha256;
        if sha256.len() < 5 {
            return Err(ArchiveError::NotFound(format!(
                "SHA256 of file {}",
                filename
            )));
        }

        Ok(format!(
            "{}/{}/{}/{}",
            &sha256[0..2],
            &sha256[2..4],
            &sha256[4..],
            filename
        ))
    }

    /// The older layout location: `<letter-dir>/<source>/<filename>`.
    pub fn legacy_path(source: &str, filename: &str) -> Result<String> {
        if source.len() < 2 {
            return Err(ArchiveError::SourceNameTooShort(source.to_string()));
        }

        let subdir = if source.starts_with("lib") {
            &source[..std::cmp::min(4, source.len())]
        } else {
            &source[..1]
        };

        Ok(format!("{}/{}/{}", subdir, source, filename))
    }

    /// Resolve the pool-relative path for a file.
    ///
    /// When the content-addressed location does not exist and legacy support
    /// is enabled, the older layout is probed, deriving the directory from
    /// the package name embedded in the file name.
    pub fn path_for(&self, filename: &str, checksums: &ChecksumInfo) -> Result<String> {
        let path = Self::content_path(filename, checksums)?;

        if self.support_legacy_paths && !self.full_path(&path).exists() {
            let package = filename.split('_').next().unwrap_or(filename);
            if let Ok(legacy) = Self::legacy_path(package, filename) {
                if self.full_path(&legacy).exists() {
                    return Ok(legacy);
                }
            }
        }

        Ok(path)
    }

    /// Import a file into the pool.
    ///
    /// Missing digests of `checksums` are computed from the source file.
    /// The copy is staged as a temp file next to the destination and moved
    /// into place with an atomic rename, making concurrent imports of the
    /// same content safe: a loser observes the winner's file and accepts it.
    ///
    /// Returns the pool-relative path.
    pub fn import(
        &self,
        src_path: impl AsRef<Path>,
        filename: &str,
        checksums: &mut ChecksumInfo,
        move_not_copy: bool,
        checksum_storage: &dyn ChecksumStorage,
    ) -> Result<String> {
        let src_path = src_path.as_ref();
        checksums.complete(src_path)?;

        let pool_path = Self::content_path(filename, checksums)?;
        let dst = self.full_path(&pool_path);

        if dst.exists() {
            // Verify the existing copy instead of overwriting it.
            let metadata = fs::metadata(&dst)
                .map_err(|e| ArchiveError::IoPath(dst.display().to_string(), e))?;

            let known = checksum_storage.get(&pool_path)?;
            let md5_matches = match &known {
                Some(known) if !known.md5.is_empty() && !checksums.md5.is_empty() => {
                    known.md5 == checksums.md5
                }
                _ => true,
            };

            if metadata.len() != checksums.size || !md5_matches {
                if !move_not_copy {
                    return Err(ArchiveError::FileConflict(pool_path));
                }
            }

            if move_not_copy {
                let _ = fs::remove_file(src_path);
            }

            checksum_storage.update(&pool_path, checksums)?;
            return Ok(pool_path);
        }

        let dst_dir = dst.parent().expect("pool paths have parents");
        fs::create_dir_all(dst_dir)
            .map_err(|e| ArchiveError::IoPath(dst_dir.display().to_string(), e))?;

        if move_not_copy && fs::rename(src_path, &dst).is_ok() {
            checksum_storage.update(&pool_path, checksums)?;
            return Ok(pool_path);
        }

        // Stage in the destination directory so the final rename is atomic.
        let tmp = tempfile::NamedTempFile::new_in(dst_dir)
            .map_err(|e| ArchiveError::IoPath(dst_dir.display().to_string(), e))?;

        {
            let mut reader = fs::File::open(src_path)
                .map_err(|e| ArchiveError::IoPath(src_path.display().to_string(), e))?;
            let mut writer = tmp.as_file();
            std::io::copy(&mut reader, &mut writer)?;
        }

        tmp.persist(&dst)
            .map_err(|e| ArchiveError::IoPath(dst.display().to_string(), e.error))?;

        if move_not_copy {
            let _ = fs::remove_file(src_path);
        }

        checksum_storage.update(&pool_path, checksums)?;

        Ok(pool_path)
    }

    /// Verify that the pool holds a valid copy at `path`.
    ///
    /// Missing digest fields in the stored record are recomputed from the
    /// file and written back. Returns whether the file exists and matches
    /// `expected`.
    pub fn verify(
        &self,
        path: &str,
        expected: &ChecksumInfo,
        checksum_storage: &dyn ChecksumStorage,
    ) -> Result<bool> {
        let full = self.full_path(path);
        if !full.exists() {
            return Ok(false);
        }

        let mut stored = match checksum_storage.get(path)? {
            Some(stored) => stored,
            None => ChecksumInfo::default(),
        };

        if stored.is_partial() || stored.size == 0 {
            stored = checksums_for_file(&full)?;
            checksum_storage.update(path, &stored)?;
        }

        Ok(expected.matches(&stored))
    }

    /// Open a pool file for reading.
    pub fn open(&self, path: &str) -> Result<fs::File> {
        let full = self.full_path(path);
        fs::File::open(&full).map_err(|e| ArchiveError::IoPath(full.display().to_string(), e))
    }

    /// Size and link count of a pool file.
    pub fn stat(&self, path: &str) -> Result<(u64, u64)> {
        let full = self.full_path(path);
        let metadata =
            fs::metadata(&full).map_err(|e| ArchiveError::IoPath(full.display().to_string(), e))?;

        #[cfg(unix)]
        let nlink = {
            use std::os::unix::fs::MetadataExt;
            metadata.nlink()
        };
        #[cfg(not(unix))]
        let nlink = 1;

        Ok((metadata.len(), nlink))
    }

    /// Delete a single pool file, returning the bytes freed.
    pub fn remove(&self, path: &str) -> Result<u64> {
        let (size, _) = self.stat(path)?;
        let full = self.full_path(path);
        fs::remove_file(&full).map_err(|e| ArchiveError::IoPath(full.display().to_string(), e))?;

        Ok(size)
    }

    /// All pool-relative file paths, sorted.
    pub fn filepath_list(&self) -> Result<Vec<String>> {
        let mut result = Vec::new();

        if !self.root_path.exists() {
            return Ok(result);
        }

        let mut stack = vec![self.root_path.clone()];
        while let Some(dir) = stack.pop() {
            for entry in fs::read_dir(&dir)
                .map_err(|e| ArchiveError::IoPath(dir.display().to_string(), e))?
            {
                let entry = entry?;
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else {
                    let rel = path
                        .strip_prefix(&self.root_path)
                        .expect("walked paths live under the root");
                    result.push(rel.to_string_lossy().replace('\\', "/"));
                }
            }
        }

        result.sort();

        Ok(result)
    }
}
