// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Tool runtime wiring.

Each subsystem gets a typed handle to just what it needs: the catalog
factory, the package pool and the storage provider are constructed once at
startup from the root directory.
*/

use {
    crate::db::FileDatabase,
    debian_archive::{
        collection::CollectionFactory,
        error::Result,
        pool::PackagePool,
        storage::{local::LocalPublishedStorage, MapStorageProvider},
    },
    std::{path::PathBuf, sync::Arc},
};

pub struct Context {
    pub root_dir: PathBuf,
    pub factory: CollectionFactory,
    pub pool: PackagePool,
    pub provider: MapStorageProvider,
}

impl Context {
    /// Build the runtime from a root directory.
    ///
    /// Defaults to `~/.debian-archive`; override with `--root` or the
    /// `DEBIAN_ARCHIVE_ROOT` environment variable.
    pub fn new(root_override: Option<&str>) -> Result<Self> {
        let root_dir = match root_override {
            Some(root) => PathBuf::from(root),
            None => match std::env::var("DEBIAN_ARCHIVE_ROOT") {
                Ok(root) => PathBuf::from(root),
                Err(_) => {
                    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                    PathBuf::from(home).join(".debian-archive")
                }
            },
        };

        let db = Arc::new(FileDatabase::open(root_dir.join("db").join("catalog.json"))?);
        let factory = CollectionFactory::new(db);
        let pool = PackagePool::new(&root_dir, false);

        let mut provider = MapStorageProvider::new();
        provider.register(
            "",
            Arc::new(LocalPublishedStorage::new(root_dir.join("public"), "", "")),
        );

        Ok(Self {
            root_dir,
            factory,
            pool,
            provider,
        })
    }
}
