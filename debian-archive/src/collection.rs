// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Persistent catalog collections.

Entities persist to the ordered KV store under one-byte key prefixes:
`P` packages (with `xD`/`xE`/`xF` side records for dependencies, extra
fields and file lists), `R` mirrors, `L` local repositories, `S` snapshots,
`U` published repositories, `E` reference lists, `C` pool checksums.

Values are a deterministic self-describing encoding (JSON).
*/

use {
    crate::{
        checksum::ChecksumInfo,
        database::{Database, WriteBatch},
        error::{ArchiveError, Result},
        local_repo::LocalRepo,
        package::{Package, PackageDependencies, PackageFiles},
        pool::ChecksumStorage,
        ref_list::PackageRefList,
        remote_repo::RemoteRepo,
        snapshot::Snapshot,
    },
    std::sync::Arc,
};

/// Prefixes of package side records.
const PREFIX_DEPS: &[u8] = b"xD";
const PREFIX_EXTRA: &[u8] = b"xE";
const PREFIX_FILES: &[u8] = b"xF";
const PREFIX_CONTENTS: &[u8] = b"xC";

fn side_key(prefix: &[u8], key: &[u8]) -> Vec<u8> {
    let mut result = prefix.to_vec();
    result.extend_from_slice(key);
    result
}

/// Collection of packages in the catalog.
pub struct PackageCollection {
    db: Arc<dyn Database>,
}

impl PackageCollection {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Persist a package, including its heavyweight attributes.
    pub fn update(&self, p: &Package) -> Result<()> {
        let key = p.key("");

        let mut batch = WriteBatch::new();
        batch.put(&key, &serde_json::to_vec(p)?);
        batch.put(&side_key(PREFIX_DEPS, &key), &serde_json::to_vec(p.deps())?);
        batch.put(&side_key(PREFIX_EXTRA, &key), &serde_json::to_vec(p.extra())?);
        batch.put(&side_key(PREFIX_FILES, &key), &serde_json::to_vec(p.files())?);
        if let Some(contents) = p.contents() {
            batch.put(&side_key(PREFIX_CONTENTS, &key), &serde_json::to_vec(contents)?);
        }

        self.db.write(batch)
    }

    /// Load the core package record.
    pub fn by_key(&self, key: &[u8]) -> Result<Package> {
        let data = self
            .db
            .get(key)?
            .ok_or_else(|| ArchiveError::NotFound(String::from_utf8_lossy(key).to_string()))?;

        Ok(serde_json::from_slice(&data)?)
    }

    pub fn load_deps(&self, p: &mut Package) -> Result<()> {
        if p.deps.is_some() {
            return Ok(());
        }

        let key = side_key(PREFIX_DEPS, &p.key(""));
        let data = self
            .db
            .get(&key)?
            .ok_or_else(|| ArchiveError::NotFound(format!("dependencies of {}", p)))?;
        p.deps = Some(serde_json::from_slice::<PackageDependencies>(&data)?);

        Ok(())
    }

    pub fn load_extra(&self, p: &mut Package) -> Result<()> {
        if p.extra.is_some() {
            return Ok(());
        }

        let key = side_key(PREFIX_EXTRA, &p.key(""));
        let data = self
            .db
            .get(&key)?
            .ok_or_else(|| ArchiveError::NotFound(format!("extra fields of {}", p)))?;
        p.extra = Some(serde_json::from_slice(&data)?);

        Ok(())
    }

    pub fn load_files(&self, p: &mut Package) -> Result<()> {
        if p.files.is_some() {
            return Ok(());
        }

        let key = side_key(PREFIX_FILES, &p.key(""));
        let data = self
            .db
            .get(&key)?
            .ok_or_else(|| ArchiveError::NotFound(format!("files of {}", p)))?;
        p.files = Some(serde_json::from_slice::<PackageFiles>(&data)?);

        Ok(())
    }

    /// Load cached package contents, when the catalog has them.
    pub fn load_contents(&self, p: &mut Package) -> Result<()> {
        if p.contents.is_some() || p.is_source {
            return Ok(());
        }

        let key = side_key(PREFIX_CONTENTS, &p.key(""));
        if let Some(data) = self.db.get(&key)? {
            p.contents = Some(serde_json::from_slice(&data)?);
        }

        Ok(())
    }

    /// Load all heavyweight attributes.
    pub fn load_complete(&self, p: &mut Package) -> Result<()> {
        self.load_deps(p)?;
        self.load_extra(p)?;
        self.load_files(p)?;
        self.load_contents(p)
    }

    /// Load a package with all attributes.
    pub fn by_key_complete(&self, key: &[u8]) -> Result<Package> {
        let mut p = self.by_key(key)?;
        self.load_complete(&mut p)?;
        Ok(p)
    }

    /// Remove a package and its side records.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        batch.delete(&side_key(PREFIX_DEPS, key));
        batch.delete(&side_key(PREFIX_EXTRA, key));
        batch.delete(&side_key(PREFIX_FILES, key));
        batch.delete(&side_key(PREFIX_CONTENTS, key));

        self.db.write(batch)
    }

    /// Keys of all packages in the catalog.
    pub fn all_keys(&self) -> Result<Vec<Vec<u8>>> {
        self.db.keys_by_prefix(b"P")
    }
}

/// Pool checksums persisted in the catalog.
pub struct DatabaseChecksumStorage {
    db: Arc<dyn Database>,
}

impl DatabaseChecksumStorage {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    fn key(path: &str) -> Vec<u8> {
        format!("C{}", path).into_bytes()
    }
}

impl ChecksumStorage for DatabaseChecksumStorage {
    fn get(&self, path: &str) -> Result<Option<ChecksumInfo>> {
        match self.db.get(&Self::key(path))? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    fn update(&self, path: &str, checksums: &ChecksumInfo) -> Result<()> {
        self.db
            .put(&Self::key(path), &serde_json::to_vec(checksums)?)
    }
}

fn load_ref_list(db: &dyn Database, ref_key: &[u8]) -> Result<Option<PackageRefList>> {
    match db.get(ref_key)? {
        Some(data) => Ok(Some(PackageRefList::decode(&data)?)),
        None => Ok(None),
    }
}

macro_rules! entity_collection {
    ($collection:ident, $entity:ident, $prefix:literal, $label:literal) => {
        pub struct $collection {
            db: Arc<dyn Database>,
        }

        impl $collection {
            pub fn new(db: Arc<dyn Database>) -> Self {
                Self { db }
            }

            /// Persist the entity and, when loaded, its reference list.
            pub fn add(&self, entity: &$entity) -> Result<()> {
                let mut batch = WriteBatch::new();
                batch.put(&entity.key(), &serde_json::to_vec(entity)?);
                if entity.has_ref_list() {
                    batch.put(&entity.ref_key(), &entity.ref_list().encode());
                }

                self.db.write(batch)
            }

            pub fn update(&self, entity: &$entity) -> Result<()> {
                self.add(entity)
            }

            pub fn by_uuid(&self, uuid: &str) -> Result<$entity> {
                let key = format!("{}{}", $prefix, uuid).into_bytes();
                let data = self.db.get(&key)?.ok_or_else(|| {
                    ArchiveError::NotFound(format!("{} {}", $label, uuid))
                })?;

                Ok(serde_json::from_slice(&data)?)
            }

            pub fn by_name(&self, name: &str) -> Result<$entity> {
                for (_, data) in self.db.scan_prefix($prefix.as_bytes())? {
                    let entity: $entity = serde_json::from_slice(&data)?;
                    if entity.name == name {
                        return Ok(entity);
                    }
                }

                Err(ArchiveError::NotFound(format!("{} {}", $label, name)))
            }

            /// All entities, without reference lists.
            pub fn list(&self) -> Result<Vec<$entity>> {
                self.db
                    .scan_prefix($prefix.as_bytes())?
                    .into_iter()
                    .map(|(_, data)| Ok(serde_json::from_slice(&data)?))
                    .collect()
            }

            /// Load the entity's reference list from the catalog.
            pub fn load_ref_list(&self, entity: &mut $entity) -> Result<()> {
                if entity.has_ref_list() {
                    return Ok(());
                }

                if let Some(refs) = load_ref_list(self.db.as_ref(), &entity.ref_key())? {
                    entity.set_ref_list(refs);
                }

                Ok(())
            }

            pub fn drop_entity(&self, entity: &$entity) -> Result<()> {
                let mut batch = WriteBatch::new();
                batch.delete(&entity.key());
                batch.delete(&entity.ref_key());

                self.db.write(batch)
            }
        }
    };
}

entity_collection!(RemoteRepoCollection, RemoteRepo, "R", "mirror");
entity_collection!(LocalRepoCollection, LocalRepo, "L", "local repo");
entity_collection!(SnapshotCollection, Snapshot, "S", "snapshot");

/// Hands out catalog collections sharing one KV store handle.
pub struct CollectionFactory {
    db: Arc<dyn Database>,
}

impl CollectionFactory {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    pub fn database(&self) -> Arc<dyn Database> {
        self.db.clone()
    }

    pub fn package_collection(&self) -> PackageCollection {
        PackageCollection::new(self.db.clone())
    }

    pub fn remote_repo_collection(&self) -> RemoteRepoCollection {
        RemoteRepoCollection::new(self.db.clone())
    }

    pub fn local_repo_collection(&self) -> LocalRepoCollection {
        LocalRepoCollection::new(self.db.clone())
    }

    pub fn snapshot_collection(&self) -> SnapshotCollection {
        SnapshotCollection::new(self.db.clone())
    }

    pub fn published_repo_collection(&self) -> crate::publish::PublishedRepoCollection {
        crate::publish::PublishedRepoCollection::new(self.db.clone())
    }

    pub fn checksum_storage(&self) -> DatabaseChecksumStorage {
        DatabaseChecksumStorage::new(self.db.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{control::Stanza, database::MemoryDatabase};

    fn factory() -> CollectionFactory {
        CollectionFactory::new(Arc::new(MemoryDatabase::new()))
    }

    fn sample_package() -> Package {
        let mut s = Stanza::new();
        s.set_field("Package", "alien-arena-common");
        s.set_field("Version", "7.40-2");
        s.set_field("Architecture", "i386");
        s.set_field("Section", "games");
        s.set_field("Filename", "pool/main/a/alien-arena/alien-arena-common_7.40-2_i386.deb");
        s.set_field("Size", "187518");
        s.set_field("MD5sum", "1e8cba92c41420aa7baa8a5718d67122");
        s.set_field("Depends", "libc6 (>= 2.7)");

        Package::from_control_stanza(s)
    }

    #[test]
    fn package_round_trip() {
        let f = factory();
        let collection = f.package_collection();

        let p = sample_package();
        collection.update(&p).unwrap();

        // Core record has no heavyweight attributes loaded.
        let core = collection.by_key(&p.key("")).unwrap();
        assert!(core.deps.is_none());
        assert!(core.extra.is_none());
        assert!(core.files.is_none());
        assert!(core.equals(&p));

        // Complete load restores everything.
        let complete = collection.by_key_complete(&p.key("")).unwrap();
        assert_eq!(complete.deps(), p.deps());
        assert_eq!(complete.extra(), p.extra());
        assert_eq!(complete.files(), p.files());

        assert_eq!(collection.all_keys().unwrap().len(), 1);

        collection.delete(&p.key("")).unwrap();
        assert!(collection.by_key(&p.key("")).is_err());
        assert!(collection.all_keys().unwrap().is_empty());
    }

    #[test]
    fn missing_package_is_not_found() {
        let f = factory();
        let collection = f.package_collection();
        assert!(matches!(
            collection.by_key(b"Pi386 ghost 1.0 00000000"),
            Err(ArchiveError::NotFound(_))
        ));
    }

    #[test]
    fn remote_repo_collection_round_trip() {
        let f = factory();
        let collection = f.remote_repo_collection();

        let mut repo = RemoteRepo::new(
            "wheezy-main",
            "http://deb.debian.org/debian/",
            "wheezy",
            vec!["main".to_string()],
            vec!["amd64".to_string()],
            false,
            false,
            false,
        );
        repo.set_ref_list(PackageRefList::from_refs(vec![b"Pamd64 app 1.0 aa".to_vec()]));
        collection.add(&repo).unwrap();

        let mut loaded = collection.by_name("wheezy-main").unwrap();
        assert_eq!(loaded.uuid, repo.uuid);
        assert!(!loaded.has_ref_list());

        collection.load_ref_list(&mut loaded).unwrap();
        assert_eq!(loaded.ref_list().len(), 1);

        assert!(collection.by_name("missing").is_err());
        assert_eq!(collection.list().unwrap().len(), 1);

        collection.drop_entity(&loaded).unwrap();
        assert!(collection.by_name("wheezy-main").is_err());
    }

    #[test]
    fn snapshot_collection_round_trip() {
        let f = factory();
        let collection = f.snapshot_collection();

        let snap = Snapshot::from_ref_list(
            "snap1",
            &[],
            PackageRefList::from_refs(vec![b"Pi386 app 1.0 aa".to_vec()]),
            "desc1",
        );
        collection.add(&snap).unwrap();

        let mut loaded = collection.by_uuid(&snap.uuid).unwrap();
        collection.load_ref_list(&mut loaded).unwrap();
        assert_eq!(loaded.num_packages(), 1);
    }

    #[test]
    fn checksum_storage_round_trip() {
        let f = factory();
        let storage = f.checksum_storage();

        assert!(storage.get("ab/cd/ef/file.deb").unwrap().is_none());

        let info = ChecksumInfo {
            size: 5,
            md5: "aa".into(),
            ..Default::default()
        };
        storage.update("ab/cd/ef/file.deb", &info).unwrap();
        assert_eq!(storage.get("ab/cd/ef/file.deb").unwrap().unwrap(), info);
    }
}
