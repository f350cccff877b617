// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Published storage backends.

A published repository is materialized onto a [PublishedStorage]: a local
filesystem, an S3 bucket, an Azure Blob container or an OpenStack Swift
container. The publish pipeline only sees this contract; backend selection
happens at the boundary through a [StorageProvider].
*/

use {
    crate::{checksum::ChecksumInfo, error::Result, pool::PackagePool},
    async_trait::async_trait,
    std::{collections::HashMap, path::Path, sync::Arc},
};

pub mod local;
#[cfg(feature = "s3")]
pub mod s3;
#[cfg(feature = "http")]
pub mod azure;
#[cfg(feature = "http")]
pub mod swift;

/// Storage for published repositories.
///
/// Paths are always relative to the storage root. `remove` and
/// `remove_dirs` refuse to operate on the root itself: an empty path is a
/// programming error and panics.
#[async_trait]
pub trait PublishedStorage: Send + Sync {
    /// Idempotently create a directory (no-op for object stores).
    async fn mkdir(&self, path: &str) -> Result<()>;

    /// Upload or stage a local file, overwriting any existing content.
    /// Atomic per file on local filesystems.
    async fn put_file(&self, path: &str, source: &Path) -> Result<()>;

    /// Recursive listing under `prefix`: sorted lexicographically, paths
    /// relative to the prefix, `+` characters and spaces preserved exactly.
    async fn filelist(&self, prefix: &str) -> Result<Vec<String>>;

    /// Recursive delete. Panics when asked to remove the storage root.
    async fn remove_dirs(&self, path: &str) -> Result<()>;

    /// Single-file delete. Panics on an empty path.
    async fn remove(&self, path: &str) -> Result<()>;

    /// Rename; atomic on local filesystems, emulated as copy + delete on
    /// object stores.
    async fn rename_file(&self, old_path: &str, new_path: &str) -> Result<()>;

    /// Create a symbolic link (or its object-store emulation).
    async fn symlink(&self, src: &str, dst: &str) -> Result<()>;

    /// Resolve a link created by [Self::symlink], relative to the root.
    async fn read_link(&self, path: &str) -> Result<String>;

    /// Create a hard link (or a server-side copy on object stores).
    async fn hard_link(&self, src: &str, dst: &str) -> Result<()>;

    async fn file_exists(&self, path: &str) -> Result<bool>;

    /// Place a pool file into the published tree under
    /// `<publish_prefix>/<publish_rel_dir>/<file_name>`.
    ///
    /// If the target already exists it is compared per the backend's
    /// verification method: equal content is a no-op; differing content
    /// fails unless `force` is set, in which case it is overwritten.
    #[allow(clippy::too_many_arguments)]
    async fn link_from_pool(
        &self,
        publish_prefix: &str,
        publish_rel_dir: &str,
        file_name: &str,
        pool: &PackagePool,
        pool_path: &str,
        checksums: &ChecksumInfo,
        force: bool,
    ) -> Result<()>;
}

/// Resolves named storage backends.
pub trait StorageProvider: Send + Sync {
    /// Obtain the published storage registered under `name`; the empty name
    /// denotes the default (local) storage.
    fn published_storage(&self, name: &str) -> Result<Arc<dyn PublishedStorage>>;
}

/// A [StorageProvider] over a fixed name→backend map.
#[derive(Default)]
pub struct MapStorageProvider {
    storages: HashMap<String, Arc<dyn PublishedStorage>>,
}

impl MapStorageProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, storage: Arc<dyn PublishedStorage>) {
        self.storages.insert(name.into(), storage);
    }
}

impl StorageProvider for MapStorageProvider {
    fn published_storage(&self, name: &str) -> Result<Arc<dyn PublishedStorage>> {
        self.storages
            .get(name)
            .cloned()
            .ok_or_else(|| crate::error::ArchiveError::NotFound(format!("storage {:?}", name)))
    }
}

/// Join path segments, skipping empty ones.
pub(crate) fn join_paths(segments: &[&str]) -> String {
    segments
        .iter()
        .filter(|s| !s.is_empty())
        .map(|s| s.trim_matches('/'))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}
