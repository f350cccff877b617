// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Local filesystem published storage. */

use {
    crate::{
        checksum::{checksums_for_file, ChecksumInfo},
        error::{ArchiveError, Result},
        pool::PackagePool,
        storage::{join_paths, PublishedStorage},
    },
    async_trait::async_trait,
    std::{
        fs,
        path::{Path, PathBuf},
    },
};

/// How package files are placed into the published tree.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LinkMethod {
    HardLink,
    SymLink,
    Copy,
}

impl LinkMethod {
    fn from_config(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "symlink" => Self::SymLink,
            "copy" => Self::Copy,
            _ => Self::HardLink,
        }
    }
}

/// How an existing published file is compared against the pool copy.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VerificationMethod {
    Checksum,
    FileSize,
}

impl VerificationMethod {
    fn from_config(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "size" => Self::FileSize,
            _ => Self::Checksum,
        }
    }
}

/// Published storage on the local filesystem.
pub struct LocalPublishedStorage {
    root_path: PathBuf,
    link_method: LinkMethod,
    verify_method: VerificationMethod,
}

impl LocalPublishedStorage {
    /// Create an instance rooted at `root`.
    ///
    /// `link_method` is one of `""` (hardlink), `"symlink"`, `"copy"`;
    /// `verify_method` is `""` (checksum) or `"size"` (meaningful for copy
    /// mode only).
    pub fn new(root: impl AsRef<Path>, link_method: &str, verify_method: &str) -> Self {
        Self {
            root_path: root.as_ref().to_path_buf(),
            link_method: LinkMethod::from_config(link_method),
            verify_method: VerificationMethod::from_config(verify_method),
        }
    }

    /// The storage root.
    pub fn public_path(&self) -> &Path {
        &self.root_path
    }

    pub fn link_method(&self) -> LinkMethod {
        self.link_method
    }

    pub fn verification_method(&self) -> VerificationMethod {
        self.verify_method
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.root_path.join(path)
    }
}

#[async_trait]
impl PublishedStorage for LocalPublishedStorage {
    async fn mkdir(&self, path: &str) -> Result<()> {
        let full = self.full_path(path);
        fs::create_dir_all(&full).map_err(|e| ArchiveError::IoPath(full.display().to_string(), e))
    }

    async fn put_file(&self, path: &str, source: &Path) -> Result<()> {
        let dst = self.full_path(path);
        let dir = dst.parent().expect("published paths have parents");
        fs::create_dir_all(dir).map_err(|e| ArchiveError::IoPath(dir.display().to_string(), e))?;

        // Stage next to the destination; the rename is atomic.
        let tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| ArchiveError::IoPath(dir.display().to_string(), e))?;
        let mut reader = fs::File::open(source)
            .map_err(|e| ArchiveError::IoPath(source.display().to_string(), e))?;
        std::io::copy(&mut reader, &mut tmp.as_file())?;
        tmp.persist(&dst)
            .map_err(|e| ArchiveError::IoPath(dst.display().to_string(), e.error))?;

        Ok(())
    }

    async fn filelist(&self, prefix: &str) -> Result<Vec<String>> {
        let base = self.full_path(prefix);
        let mut result = Vec::new();

        if !base.exists() {
            return Ok(result);
        }

        let mut stack = vec![base.clone()];
        while let Some(dir) = stack.pop() {
            for entry in
                fs::read_dir(&dir).map_err(|e| ArchiveError::IoPath(dir.display().to_string(), e))?
            {
                let entry = entry?;
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else {
                    let rel = path.strip_prefix(&base).expect("walked under base");
                    result.push(rel.to_string_lossy().replace('\\', "/"));
                }
            }
        }

        result.sort();

        Ok(result)
    }

    async fn remove_dirs(&self, path: &str) -> Result<()> {
        if path.trim_matches('/').is_empty() {
            panic!("trying to remove the root directory");
        }

        let full = self.full_path(path);
        if full.exists() {
            fs::remove_dir_all(&full)
                .map_err(|e| ArchiveError::IoPath(full.display().to_string(), e))?;
        }

        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<()> {
        if path.trim_matches('/').is_empty() {
            panic!("trying to remove empty path");
        }

        let full = self.full_path(path);
        fs::remove_file(&full).map_err(|e| ArchiveError::IoPath(full.display().to_string(), e))
    }

    async fn rename_file(&self, old_path: &str, new_path: &str) -> Result<()> {
        let old = self.full_path(old_path);
        let new = self.full_path(new_path);

        fs::rename(&old, &new).map_err(|e| ArchiveError::IoPath(old.display().to_string(), e))
    }

    async fn symlink(&self, src: &str, dst: &str) -> Result<()> {
        let dst_full = self.full_path(dst);
        if dst_full.exists() {
            fs::remove_file(&dst_full)
                .map_err(|e| ArchiveError::IoPath(dst_full.display().to_string(), e))?;
        }

        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(self.full_path(src), &dst_full)
                .map_err(|e| ArchiveError::IoPath(dst_full.display().to_string(), e))?;
            Ok(())
        }
        #[cfg(not(unix))]
        {
            let _ = dst_full;
            Err(ArchiveError::Unsupported("symlinks"))
        }
    }

    async fn read_link(&self, path: &str) -> Result<String> {
        let full = self.full_path(path);
        let target = fs::read_link(&full)
            .map_err(|e| ArchiveError::IoPath(full.display().to_string(), e))?;

        let rel = target
            .strip_prefix(&self.root_path)
            .map(|p| p.to_path_buf())
            .unwrap_or(target);

        Ok(rel.to_string_lossy().replace('\\', "/"))
    }

    async fn hard_link(&self, src: &str, dst: &str) -> Result<()> {
        let dst_full = self.full_path(dst);
        fs::hard_link(self.full_path(src), &dst_full)
            .map_err(|e| ArchiveError::IoPath(dst_full.display().to_string(), e))
    }

    async fn file_exists(&self, path: &str) -> Result<bool> {
        Ok(self.full_path(path).symlink_metadata().is_ok())
    }

    async fn link_from_pool(
        &self,
        publish_prefix: &str,
        publish_rel_dir: &str,
        file_name: &str,
        pool: &PackagePool,
        pool_path: &str,
        checksums: &ChecksumInfo,
        force: bool,
    ) -> Result<()> {
        let rel_path = join_paths(&[publish_prefix, publish_rel_dir, file_name]);
        let dst = self.full_path(&rel_path);
        let source = pool.full_path(pool_path);

        if dst.exists() {
            let equal = match self.verify_method {
                VerificationMethod::FileSize => {
                    let metadata = fs::metadata(&dst)
                        .map_err(|e| ArchiveError::IoPath(dst.display().to_string(), e))?;
                    metadata.len() == checksums.size
                }
                VerificationMethod::Checksum => {
                    let existing = checksums_for_file(&dst)?;
                    checksums.matches(&existing)
                }
            };

            if equal {
                return Ok(());
            }
            if !force {
                return Err(ArchiveError::FileConflict(rel_path));
            }

            fs::remove_file(&dst)
                .map_err(|e| ArchiveError::IoPath(dst.display().to_string(), e))?;
        }

        let dir = dst.parent().expect("published paths have parents");
        fs::create_dir_all(dir).map_err(|e| ArchiveError::IoPath(dir.display().to_string(), e))?;

        match self.link_method {
            LinkMethod::HardLink => {
                fs::hard_link(&source, &dst)
                    .map_err(|e| ArchiveError::IoPath(dst.display().to_string(), e))?;
            }
            LinkMethod::SymLink => {
                #[cfg(unix)]
                std::os::unix::fs::symlink(&source, &dst)
                    .map_err(|e| ArchiveError::IoPath(dst.display().to_string(), e))?;
                #[cfg(not(unix))]
                return Err(ArchiveError::Unsupported("symlinks"));
            }
            LinkMethod::Copy => {
                let tmp = tempfile::NamedTempFile::new_in(dir)
                    .map_err(|e| ArchiveError::IoPath(dir.display().to_string(), e))?;
                let mut reader = fs::File::open(&source)
                    .map_err(|e| ArchiveError::IoPath(source.display().to_string(), e))?;
                std::io::copy(&mut reader, &mut tmp.as_file())?;
                tmp.persist(&dst)
                    .map_err(|e| ArchiveError::IoPath(dst.display().to_string(), e.error))?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::MockChecksumStorage;

    struct Fixture {
        root: tempfile::TempDir,
        storage: LocalPublishedStorage,
        storage_symlink: LocalPublishedStorage,
        storage_copy: LocalPublishedStorage,
        storage_copy_size: LocalPublishedStorage,
    }

    impl Fixture {
        fn new() -> Self {
            let root = tempfile::tempdir().unwrap();
            Self {
                storage: LocalPublishedStorage::new(root.path().join("public"), "", ""),
                storage_symlink: LocalPublishedStorage::new(
                    root.path().join("public_symlink"),
                    "symlink",
                    "",
                ),
                storage_copy: LocalPublishedStorage::new(root.path().join("public_copy"), "copy", ""),
                storage_copy_size: LocalPublishedStorage::new(
                    root.path().join("public_copysize"),
                    "copy",
                    "size",
                ),
                root,
            }
        }
    }

    fn write_source(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn config_mapping() {
        let f = Fixture::new();
        assert_eq!(f.storage.link_method(), LinkMethod::HardLink);
        assert_eq!(f.storage_symlink.link_method(), LinkMethod::SymLink);
        assert_eq!(f.storage_copy.link_method(), LinkMethod::Copy);
        assert_eq!(f.storage_copy.verification_method(), VerificationMethod::Checksum);
        assert_eq!(
            f.storage_copy_size.verification_method(),
            VerificationMethod::FileSize
        );
    }

    #[tokio::test]
    async fn mkdir_put_file_exists_remove() {
        let f = Fixture::new();

        f.storage.mkdir("ppa/dists/squeeze/").await.unwrap();
        assert!(f.storage.public_path().join("ppa/dists/squeeze").is_dir());

        assert!(!f.storage.file_exists("ppa/dists/squeeze/Release").await.unwrap());

        let src = write_source(f.root.path(), "src/Release", b"release");
        f.storage
            .put_file("ppa/dists/squeeze/Release", &src)
            .await
            .unwrap();
        assert!(f.storage.file_exists("ppa/dists/squeeze/Release").await.unwrap());

        f.storage.remove("ppa/dists/squeeze/Release").await.unwrap();
        assert!(!f.storage.file_exists("ppa/dists/squeeze/Release").await.unwrap());
    }

    #[tokio::test]
    async fn filelist_ordering_preserves_spaces_and_plus() {
        let f = Fixture::new();
        let src = write_source(f.root.path(), "src/f", b"x");

        for path in [
            "a", "b", "c", "testa", "test/a+1", "test/a 1", "lala/a+b", "lala/a b", "lala/c",
        ] {
            f.storage.put_file(path, &src).await.unwrap();
        }

        let list = f.storage.filelist("").await.unwrap();
        assert_eq!(
            list,
            vec![
                "a", "b", "c", "lala/a b", "lala/a+b", "lala/c", "test/a 1", "test/a+1", "testa"
            ]
        );

        let list = f.storage.filelist("lala").await.unwrap();
        assert_eq!(list, vec!["a b", "a+b", "c"]);

        let list = f.storage.filelist("doesntexist").await.unwrap();
        assert!(list.is_empty());
    }

    #[tokio::test]
    async fn rename_file() {
        let f = Fixture::new();
        let src = write_source(f.root.path(), "src/f", b"data");
        f.storage.put_file("ppa/dists/squeeze/Release", &src).await.unwrap();

        f.storage
            .rename_file("ppa/dists/squeeze/Release", "ppa/dists/squeeze/InRelease")
            .await
            .unwrap();

        assert!(f.storage.file_exists("ppa/dists/squeeze/InRelease").await.unwrap());
        assert!(!f.storage.file_exists("ppa/dists/squeeze/Release").await.unwrap());
    }

    #[tokio::test]
    async fn symlink_and_readlink() {
        let f = Fixture::new();
        let src = write_source(f.root.path(), "src/f", b"data");
        f.storage.put_file("ppa/dists/squeeze/Release", &src).await.unwrap();

        f.storage
            .symlink("ppa/dists/squeeze/Release", "ppa/dists/squeeze/InRelease")
            .await
            .unwrap();
        assert!(f.storage.file_exists("ppa/dists/squeeze/InRelease").await.unwrap());

        let target = f.storage.read_link("ppa/dists/squeeze/InRelease").await.unwrap();
        assert_eq!(target, "ppa/dists/squeeze/Release");
    }

    #[tokio::test]
    async fn hard_link_shares_inode() {
        let f = Fixture::new();
        let src = write_source(f.root.path(), "src/f", b"data");
        f.storage.put_file("ppa/dists/squeeze/Release", &src).await.unwrap();

        f.storage
            .hard_link("ppa/dists/squeeze/Release", "ppa/dists/squeeze/Release.1")
            .await
            .unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            let meta = fs::metadata(f.storage.public_path().join("ppa/dists/squeeze/Release")).unwrap();
            assert_eq!(meta.nlink(), 2);
        }
    }

    #[tokio::test]
    async fn remove_dirs() {
        let f = Fixture::new();
        let src = write_source(f.root.path(), "src/f", b"data");
        f.storage.put_file("ppa/dists/squeeze/Release", &src).await.unwrap();

        f.storage.remove_dirs("ppa/dists/").await.unwrap();
        assert!(!f.storage.file_exists("ppa/dists/squeeze/Release").await.unwrap());
    }

    #[test]
    fn root_removal_panics() {
        let f = Fixture::new();
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            rt.block_on(f.storage.remove(""))
        }));
        assert!(result.is_err());

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            rt.block_on(f.storage.remove_dirs(""))
        }));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn link_from_pool_methods() {
        let f = Fixture::new();
        let pool = PackagePool::new(f.root.path(), false);
        let cs = MockChecksumStorage::new();

        struct Case {
            prefix: &'static str,
            source_path: &'static str,
            published_directory: &'static str,
            expected_filename: &'static str,
        }

        let cases = [
            Case {
                prefix: "",
                source_path: "mars-invaders_1.03.deb",
                published_directory: "pool/main/m/mars-invaders",
                expected_filename: "pool/main/m/mars-invaders/mars-invaders_1.03.deb",
            },
            Case {
                prefix: "",
                source_path: "libmars-invaders_1.03.deb",
                published_directory: "pool/main/libm/libmars-invaders",
                expected_filename: "pool/main/libm/libmars-invaders/libmars-invaders_1.03.deb",
            },
            // Duplicate link must not fail.
            Case {
                prefix: "",
                source_path: "mars-invaders_1.03.deb",
                published_directory: "pool/main/m/mars-invaders",
                expected_filename: "pool/main/m/mars-invaders/mars-invaders_1.03.deb",
            },
            Case {
                prefix: "ppa",
                source_path: "libmars-invaders_1.04.deb",
                published_directory: "pool/contrib/libm/libmars-invaders",
                expected_filename: "pool/contrib/libm/libmars-invaders/libmars-invaders_1.04.deb",
            },
            Case {
                prefix: "",
                source_path: "netboot/boot.img.gz",
                published_directory: "dists/jessie/non-free/installer-i386/current/images",
                expected_filename:
                    "dists/jessie/non-free/installer-i386/current/images/netboot/boot.img.gz",
            },
        ];

        for case in &cases {
            let tmp_dir = tempfile::tempdir().unwrap();
            let src = write_source(tmp_dir.path(), case.source_path, b"Contents");

            let mut checksums = ChecksumInfo::default();
            let pool_path = pool
                .import(&src, case.source_path, &mut checksums, false, &cs)
                .unwrap();

            // Hardlink method.
            f.storage
                .link_from_pool(
                    case.prefix,
                    case.published_directory,
                    case.source_path,
                    &pool,
                    &pool_path,
                    &checksums,
                    false,
                )
                .await
                .unwrap();
            let published = f
                .storage
                .public_path()
                .join(join_paths(&[case.prefix, case.expected_filename]));
            assert!(published.exists(), "{}", published.display());

            // Symlink method.
            f.storage_symlink
                .link_from_pool(
                    case.prefix,
                    case.published_directory,
                    case.source_path,
                    &pool,
                    &pool_path,
                    &checksums,
                    false,
                )
                .await
                .unwrap();
            let published = f
                .storage_symlink
                .public_path()
                .join(join_paths(&[case.prefix, case.expected_filename]));
            assert!(published.symlink_metadata().unwrap().file_type().is_symlink());

            // Copy methods.
            for storage in [&f.storage_copy, &f.storage_copy_size] {
                storage
                    .link_from_pool(
                        case.prefix,
                        case.published_directory,
                        case.source_path,
                        &pool,
                        &pool_path,
                        &checksums,
                        false,
                    )
                    .await
                    .unwrap();
            }
        }
    }

    #[tokio::test]
    async fn link_from_pool_conflicts() {
        let f = Fixture::new();
        let pool = PackagePool::new(f.root.path(), false);
        let cs = MockChecksumStorage::new();

        let tmp_dir = tempfile::tempdir().unwrap();

        // Seed the published location with one content.
        let src1 = write_source(tmp_dir.path(), "mars-invaders_1.03.deb", b"Contents");
        let mut checksums1 = ChecksumInfo::default();
        let pool_path1 = pool
            .import(&src1, "mars-invaders_1.03.deb", &mut checksums1, false, &cs)
            .unwrap();
        f.storage
            .link_from_pool(
                "",
                "pool/main/m/mars-invaders",
                "mars-invaders_1.03.deb",
                &pool,
                &pool_path1,
                &checksums1,
                false,
            )
            .await
            .unwrap();

        // Identical link again: no-op, link count stays.
        let (_, nlink_before) = pool.stat(&pool_path1).unwrap();
        f.storage
            .link_from_pool(
                "",
                "pool/main/m/mars-invaders",
                "mars-invaders_1.03.deb",
                &pool,
                &pool_path1,
                &checksums1,
                false,
            )
            .await
            .unwrap();
        assert_eq!(pool.stat(&pool_path1).unwrap().1, nlink_before);

        // Different content under the same final name.
        let src2 = write_source(tmp_dir.path(), "two/mars-invaders_1.03.deb", b"cONTENTS");
        let mut checksums2 = ChecksumInfo::default();
        let pool_path2 = pool
            .import(&src2, "mars-invaders_1.03.deb", &mut checksums2, true, &cs)
            .unwrap();

        let (_, nlink) = pool.stat(&pool_path2).unwrap();

        let err = f
            .storage
            .link_from_pool(
                "",
                "pool/main/m/mars-invaders",
                "mars-invaders_1.03.deb",
                &pool,
                &pool_path2,
                &checksums2,
                false,
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("file already exists and is different"));
        assert_eq!(pool.stat(&pool_path2).unwrap().1, nlink);

        // Destination bytes are unchanged after the refused overwrite.
        let published = f
            .storage
            .public_path()
            .join("pool/main/m/mars-invaders/mars-invaders_1.03.deb");
        assert_eq!(fs::read(&published).unwrap(), b"Contents");

        // Forced overwrite bumps the pool link count by one.
        f.storage
            .link_from_pool(
                "",
                "pool/main/m/mars-invaders",
                "mars-invaders_1.03.deb",
                &pool,
                &pool_path2,
                &checksums2,
                true,
            )
            .await
            .unwrap();
        assert_eq!(pool.stat(&pool_path2).unwrap().1, nlink + 1);
        assert_eq!(fs::read(&published).unwrap(), b"cONTENTS");

        // Size-only verification does not detect the difference.
        let f2 = Fixture::new();
        let pool2 = PackagePool::new(f2.root.path(), false);
        let src3 = write_source(tmp_dir.path(), "three/f.deb", b"Contents");
        let mut c3 = ChecksumInfo::default();
        let p3 = pool2.import(&src3, "f.deb", &mut c3, false, &cs).unwrap();
        f2.storage_copy_size
            .link_from_pool("", "pool/main/f", "f.deb", &pool2, &p3, &c3, false)
            .await
            .unwrap();

        let src4 = write_source(tmp_dir.path(), "four/f.deb", b"cONTENTS");
        let mut c4 = ChecksumInfo::default();
        let p4 = pool2.import(&src4, "f.deb", &mut c4, false, &cs).unwrap();
        f2.storage_copy_size
            .link_from_pool("", "pool/main/f", "f.deb", &pool2, &p4, &c4, false)
            .await
            .unwrap();
    }
}
