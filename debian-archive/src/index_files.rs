// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Index file generation for publishing.

Publishing a distribution produces a family of index files (`Packages`,
`Sources`, `Contents-*`, per-architecture `Release` files and the top-level
`Release`). Index content is staged into a temp directory, compressed,
checksummed, uploaded under a random suffix and atomically switched into
place by a final rename pass.

The rename pass is a deterministic sequence: renames execute in insertion
order, and the publisher appends the `Release`/`InRelease`/`Release.gpg`
renames last so readers observe a consistent tree until the very end.
*/

use {
    crate::{
        cancel::CancellationToken,
        checksum::{checksums_for_file, ChecksumInfo},
        compression::compress_file,
        control::Stanza,
        error::{ArchiveError, Result},
        package::{ARCHITECTURE_SOURCE, DISTRIBUTION_FOCAL},
        signer::Signer,
        storage::PublishedStorage,
    },
    std::{
        collections::{BTreeMap, HashMap},
        fs,
        io::{BufWriter, Write},
        path::{Path, PathBuf},
    },
};

/// Hash directories maintained under `by-hash/`.
const BY_HASH_DIRS: &[&str] = &["MD5Sum", "SHA1", "SHA256", "SHA512"];

/// Generate a random suffix for staged uploads so concurrent publishes of
/// different distributions do not collide.
pub fn random_suffix() -> String {
    format!(".tmp{:08x}", rand::random::<u32>())
}

/// One logical index file.
pub struct IndexFile {
    discardable: bool,
    compressible: bool,
    only_gzip: bool,
    clear_sign: bool,
    detached_sign: bool,
    acquire_by_hash: bool,
    relative_path: String,
    temp_dir: PathBuf,
    temp_filename: PathBuf,
    writer: Option<BufWriter<fs::File>>,
}

impl IndexFile {
    fn new(temp_dir: &Path, relative_path: String) -> Self {
        Self {
            discardable: false,
            compressible: false,
            only_gzip: false,
            clear_sign: false,
            detached_sign: false,
            acquire_by_hash: false,
            relative_path,
            temp_dir: temp_dir.to_path_buf(),
            temp_filename: PathBuf::new(),
            writer: None,
        }
    }

    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    /// Obtain the buffered writer, creating the staging file on first use.
    pub fn writer(&mut self) -> Result<&mut BufWriter<fs::File>> {
        if self.writer.is_none() {
            self.temp_filename = self
                .temp_dir
                .join(self.relative_path.replace('/', "_"));
            let file = fs::File::create(&self.temp_filename).map_err(|e| {
                ArchiveError::IoPath(self.temp_filename.display().to_string(), e)
            })?;
            self.writer = Some(BufWriter::new(file));
        }

        Ok(self.writer.as_mut().expect("just created"))
    }

    /// Append a stanza followed by the separating blank line.
    pub fn write_stanza(&mut self, stanza: &Stanza, canonical: &[&str]) -> Result<()> {
        let w = self.writer()?;
        stanza.write_to(w, canonical)?;
        w.write_all(b"\n")?;

        Ok(())
    }

    /// Append a raw line.
    pub fn write_line(&mut self, line: &str) -> Result<()> {
        let w = self.writer()?;
        w.write_all(line.as_bytes())?;
        w.write_all(b"\n")?;

        Ok(())
    }
}

/// The transient collection of index files for one publish run.
pub struct IndexFiles<'a> {
    storage: &'a dyn PublishedStorage,
    base_path: String,
    temp_dir: PathBuf,
    suffix: String,
    acquire_by_hash: bool,
    skip_bz2: bool,
    indexes: HashMap<String, IndexFile>,
    index_order: Vec<String>,
    generated_files: BTreeMap<String, ChecksumInfo>,
    rename_map: Vec<(String, String)>,
}

impl<'a> IndexFiles<'a> {
    pub fn new(
        storage: &'a dyn PublishedStorage,
        base_path: impl Into<String>,
        temp_dir: impl AsRef<Path>,
        suffix: impl Into<String>,
        acquire_by_hash: bool,
        skip_bz2: bool,
    ) -> Self {
        Self {
            storage,
            base_path: base_path.into(),
            temp_dir: temp_dir.as_ref().to_path_buf(),
            suffix: suffix.into(),
            acquire_by_hash,
            skip_bz2,
            indexes: HashMap::new(),
            index_order: Vec::new(),
            generated_files: BTreeMap::new(),
            rename_map: Vec::new(),
        }
    }

    /// Checksums of every generated file, keyed by path relative to the
    /// distribution directory. Feeds the `Release` checksum sections.
    pub fn generated_files(&self) -> &BTreeMap<String, ChecksumInfo> {
        &self.generated_files
    }

    fn index(&mut self, key: String, build: impl FnOnce(&Path) -> IndexFile) -> &mut IndexFile {
        if !self.indexes.contains_key(&key) {
            let file = build(&self.temp_dir);
            self.indexes.insert(key.clone(), file);
            self.index_order.push(key.clone());
        }

        self.indexes.get_mut(&key).expect("just inserted")
    }

    /// The `Packages`/`Sources` (or installer `SHA256SUMS`) index for a
    /// component and architecture.
    pub fn package_index(
        &mut self,
        component: &str,
        arch: &str,
        udeb: bool,
        installer: bool,
        distribution: &str,
    ) -> &mut IndexFile {
        let udeb = if arch == ARCHITECTURE_SOURCE { false } else { udeb };
        let key = format!("pi-{}-{}-{}-{}", component, arch, udeb, installer);
        let acquire_by_hash = self.acquire_by_hash;
        let distribution = distribution.to_string();
        let component = component.to_string();
        let arch = arch.to_string();

        self.index(key, move |temp_dir| {
            let relative_path = if arch == ARCHITECTURE_SOURCE {
                format!("{}/source/Sources", component)
            } else if udeb {
                format!("{}/debian-installer/binary-{}/Packages", component, arch)
            } else if installer {
                if distribution == DISTRIBUTION_FOCAL {
                    format!(
                        "{}/installer-{}/current/legacy-images/SHA256SUMS",
                        component, arch
                    )
                } else {
                    format!("{}/installer-{}/current/images/SHA256SUMS", component, arch)
                }
            } else {
                format!("{}/binary-{}/Packages", component, arch)
            };

            let mut file = IndexFile::new(temp_dir, relative_path);
            file.compressible = !installer;
            file.detached_sign = installer;
            file.acquire_by_hash = acquire_by_hash;
            file
        })
    }

    /// The per-architecture `Release` index.
    pub fn release_index(&mut self, component: &str, arch: &str, udeb: bool) -> &mut IndexFile {
        let udeb = if arch == ARCHITECTURE_SOURCE { false } else { udeb };
        let key = format!("ri-{}-{}-{}", component, arch, udeb);
        let acquire_by_hash = self.acquire_by_hash;
        let component = component.to_string();
        let arch = arch.to_string();

        self.index(key, move |temp_dir| {
            let relative_path = if arch == ARCHITECTURE_SOURCE {
                format!("{}/source/Release", component)
            } else if udeb {
                format!("{}/debian-installer/binary-{}/Release", component, arch)
            } else {
                format!("{}/binary-{}/Release", component, arch)
            };

            let mut file = IndexFile::new(temp_dir, relative_path);
            file.discardable = udeb;
            file.acquire_by_hash = acquire_by_hash;
            file
        })
    }

    /// The per-component `Contents` index. Gzip only, dropped when empty.
    pub fn contents_index(&mut self, component: &str, arch: &str, udeb: bool) -> &mut IndexFile {
        let udeb = if arch == ARCHITECTURE_SOURCE { false } else { udeb };
        let key = format!("ci-{}-{}-{}", component, arch, udeb);
        let acquire_by_hash = self.acquire_by_hash;
        let component = component.to_string();
        let arch = arch.to_string();

        self.index(key, move |temp_dir| {
            let relative_path = if udeb {
                format!("{}/Contents-udeb-{}", component, arch)
            } else {
                format!("{}/Contents-{}", component, arch)
            };

            let mut file = IndexFile::new(temp_dir, relative_path);
            file.discardable = true;
            file.compressible = true;
            file.only_gzip = true;
            file.acquire_by_hash = acquire_by_hash;
            file
        })
    }

    /// The distribution-level `Contents` index kept for older clients.
    pub fn legacy_contents_index(&mut self, arch: &str, udeb: bool) -> &mut IndexFile {
        let udeb = if arch == ARCHITECTURE_SOURCE { false } else { udeb };
        let key = format!("lci-{}-{}", arch, udeb);
        let acquire_by_hash = self.acquire_by_hash;
        let arch = arch.to_string();

        self.index(key, move |temp_dir| {
            let relative_path = if udeb {
                format!("Contents-udeb-{}", arch)
            } else {
                format!("Contents-{}", arch)
            };

            let mut file = IndexFile::new(temp_dir, relative_path);
            file.discardable = true;
            file.compressible = true;
            file.only_gzip = true;
            file.acquire_by_hash = acquire_by_hash;
            file
        })
    }

    /// The top-level `Release` file.
    ///
    /// Not registered with the collection: the publisher finalizes it last,
    /// after the checksum sections are complete, so its renames land at the
    /// end of the rename sequence.
    pub fn release_file(&self) -> IndexFile {
        let mut file = IndexFile::new(&self.temp_dir, "Release".to_string());
        file.detached_sign = true;
        file.clear_sign = true;
        file
    }

    /// Finalize every registered index, in creation order.
    pub async fn finalize_all(
        &mut self,
        signer: Option<&dyn Signer>,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        let order = std::mem::take(&mut self.index_order);
        let mut indexes = std::mem::take(&mut self.indexes);

        for key in order {
            if let Some(token) = cancel {
                token.check()?;
            }

            let file = indexes.remove(&key).expect("ordered keys are present");
            self.finalize_file(file, signer).await?;
        }

        Ok(())
    }

    /// Flush, compress, checksum, upload and (optionally) sign one index.
    pub async fn finalize_file(
        &mut self,
        mut file: IndexFile,
        signer: Option<&dyn Signer>,
    ) -> Result<()> {
        if file.writer.is_none() {
            if file.discardable {
                return Ok(());
            }
            // Publish an empty index.
            file.writer()?;
        }

        let mut writer = file.writer.take().expect("ensured above");
        writer
            .flush()
            .map_err(|e| ArchiveError::IoPath(file.temp_filename.display().to_string(), e))?;
        drop(writer);

        if file.compressible {
            compress_file(&file.temp_filename, file.only_gzip || self.skip_bz2)?;
        }

        let mut exts: Vec<&str> = vec![""];
        let cksum_exts: Vec<&str>;
        if file.compressible {
            if file.only_gzip {
                exts = vec![".gz"];
                cksum_exts = vec!["", ".gz"];
            } else {
                exts.push(".gz");
                if !self.skip_bz2 {
                    exts.push(".bz2");
                }
                cksum_exts = exts.clone();
            }
        } else {
            cksum_exts = exts.clone();
        }

        for ext in &cksum_exts {
            let staged = path_with_ext(&file.temp_filename, ext);
            let checksums = checksums_for_file(&staged)?;
            self.generated_files
                .insert(format!("{}{}", file.relative_path, ext), checksums);
        }

        let file_dir = parent_dir(&join(&self.base_path, &file.relative_path));
        self.storage.mkdir(&file_dir).await?;

        if file.acquire_by_hash {
            for hash in BY_HASH_DIRS {
                self.storage
                    .mkdir(&format!("{}/by-hash/{}", file_dir, hash))
                    .await?;
            }
        }

        for ext in &exts {
            let staged = path_with_ext(&file.temp_filename, ext);
            let published = format!(
                "{}{}{}",
                join(&self.base_path, &file.relative_path),
                self.suffix,
                ext
            );

            self.storage.put_file(&published, &staged).await?;

            if !self.suffix.is_empty() {
                self.rename_map.push((
                    published.clone(),
                    format!("{}{}", join(&self.base_path, &file.relative_path), ext),
                ));
            }

            if file.acquire_by_hash {
                let sums = self.generated_files[&format!("{}{}", file.relative_path, ext)].clone();
                for (hash, sum) in [
                    ("SHA512", &sums.sha512),
                    ("SHA256", &sums.sha256),
                    ("SHA1", &sums.sha1),
                    ("MD5Sum", &sums.md5),
                ] {
                    self.publish_by_hash(&file, ext, hash, sum).await?;
                }
            }
        }

        if let Some(signer) = signer {
            if file.detached_sign {
                let signature = path_with_ext(&file.temp_filename, ".gpg");
                signer.detached_sign(&file.temp_filename, &signature)?;

                let published = format!(
                    "{}{}.gpg",
                    join(&self.base_path, &file.relative_path),
                    self.suffix
                );
                if !self.suffix.is_empty() {
                    self.rename_map.push((
                        published.clone(),
                        format!("{}.gpg", join(&self.base_path, &file.relative_path)),
                    ));
                }

                self.storage.put_file(&published, &signature).await?;
            }

            if file.clear_sign {
                let clearsigned = file.temp_filename.with_file_name(format!(
                    "In{}",
                    file.temp_filename
                        .file_name()
                        .expect("staged files have names")
                        .to_string_lossy()
                ));
                signer.clear_sign(&file.temp_filename, &clearsigned)?;

                let published = format!(
                    "{}{}",
                    join(&self.base_path, &format!("In{}", file.relative_path)),
                    self.suffix
                );
                if !self.suffix.is_empty() {
                    self.rename_map.push((
                        published.clone(),
                        join(&self.base_path, &format!("In{}", file.relative_path)),
                    ));
                }

                self.storage.put_file(&published, &clearsigned).await?;
            }
        }

        Ok(())
    }

    /// Publish one `(ext, hash)` variant into the `by-hash` tree and rotate
    /// the index symlinks.
    ///
    /// Rotation order is fixed: delete the stale target, delete `.old`,
    /// rename the current link to `.old`, create the new link. Readers that
    /// resolved `.old` before deletion still find the bytes through the
    /// digest-named hard link.
    async fn publish_by_hash(
        &mut self,
        file: &IndexFile,
        ext: &str,
        hash: &str,
        sum: &str,
    ) -> Result<()> {
        if sum.is_empty() {
            return Ok(());
        }

        let published_base = join(&self.base_path, &file.relative_path);
        let index_name = format!(
            "{}{}",
            Path::new(&file.relative_path)
                .file_name()
                .expect("index paths have names")
                .to_string_lossy(),
            ext
        );
        let src = format!("{}{}{}", published_base, self.suffix, ext);
        let hash_dir = format!("{}/by-hash/{}", parent_dir(&published_base), hash);
        let sum_path = format!("{}/{}", hash_dir, sum);

        // Content already present under its digest name: nothing to do.
        if self.storage.file_exists(&sum_path).await? {
            return Ok(());
        }

        self.storage.hard_link(&src, &sum_path).await?;

        let index_path = format!("{}/{}", hash_dir, index_name);
        let old_index_path = format!("{}.old", index_path);

        if self.storage.file_exists(&index_path).await? {
            if self.storage.file_exists(&old_index_path).await? {
                // The generation behind `.old` is no longer needed.
                if let Ok(target) = self.storage.read_link(&old_index_path).await {
                    let _ = self.storage.remove(&target).await;
                }
                let _ = self.storage.remove(&old_index_path).await;
            }
            self.storage
                .rename_file(&index_path, &old_index_path)
                .await?;
        }

        self.storage.symlink(&sum_path, &index_path).await?;

        Ok(())
    }

    /// Register an extra deferred rename (used by the publisher for the
    /// top-level `Release` family).
    pub fn defer_rename(&mut self, old_path: impl Into<String>, new_path: impl Into<String>) {
        self.rename_map.push((old_path.into(), new_path.into()));
    }

    /// Execute every deferred rename, in insertion order. This is the
    /// commit point of a publish.
    pub async fn rename_files(&mut self) -> Result<()> {
        for (old_path, new_path) in std::mem::take(&mut self.rename_map) {
            self.storage.rename_file(&old_path, &new_path).await?;
        }

        Ok(())
    }
}

fn join(base: &str, rel: &str) -> String {
    crate::storage::join_paths(&[base, rel])
}

fn parent_dir(path: &str) -> String {
    match path.rsplit_once('/') {
        Some((dir, _)) => dir.to_string(),
        None => String::new(),
    }
}

fn path_with_ext(path: &Path, ext: &str) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(ext);
    s.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::local::LocalPublishedStorage;

    fn fixture() -> (tempfile::TempDir, LocalPublishedStorage, tempfile::TempDir) {
        let root = tempfile::tempdir().unwrap();
        let storage = LocalPublishedStorage::new(root.path().join("public"), "", "");
        let temp = tempfile::tempdir().unwrap();
        (root, storage, temp)
    }

    #[test]
    fn keyed_accessors_paths() {
        let (_root, storage, temp) = fixture();
        let mut indexes = IndexFiles::new(&storage, "dists/squeeze", temp.path(), "", false, false);

        assert_eq!(
            indexes.package_index("main", "i386", false, false, "squeeze").relative_path(),
            "main/binary-i386/Packages"
        );
        assert_eq!(
            indexes.package_index("main", "i386", true, false, "squeeze").relative_path(),
            "main/debian-installer/binary-i386/Packages"
        );
        assert_eq!(
            indexes.package_index("main", "source", true, false, "squeeze").relative_path(),
            "main/source/Sources"
        );
        assert_eq!(
            indexes.package_index("main", "amd64", false, true, "squeeze").relative_path(),
            "main/installer-amd64/current/images/SHA256SUMS"
        );
        assert_eq!(
            indexes.package_index("main", "amd64", false, true, "focal").relative_path(),
            "main/installer-amd64/current/legacy-images/SHA256SUMS"
        );
        assert_eq!(
            indexes.release_index("main", "i386", false).relative_path(),
            "main/binary-i386/Release"
        );
        assert_eq!(
            indexes.contents_index("main", "i386", true).relative_path(),
            "main/Contents-udeb-i386"
        );
        assert_eq!(
            indexes.legacy_contents_index("i386", false).relative_path(),
            "Contents-i386"
        );
        assert_eq!(indexes.release_file().relative_path(), "Release");
    }

    #[tokio::test]
    async fn finalize_writes_all_variants() {
        let (root, storage, temp) = fixture();
        let mut indexes = IndexFiles::new(&storage, "dists/squeeze", temp.path(), "", false, false);

        let mut stanza = Stanza::new();
        stanza.set_field("Package", "demo");
        indexes
            .package_index("main", "i386", false, false, "squeeze")
            .write_stanza(&stanza, &[])
            .unwrap();

        indexes.finalize_all(None, None).await.unwrap();

        let public = root.path().join("public");
        for name in ["Packages", "Packages.gz", "Packages.bz2"] {
            assert!(
                public
                    .join("dists/squeeze/main/binary-i386")
                    .join(name)
                    .exists(),
                "{} missing",
                name
            );
        }

        let generated = indexes.generated_files();
        assert!(generated.contains_key("main/binary-i386/Packages"));
        assert!(generated.contains_key("main/binary-i386/Packages.gz"));
        assert!(generated.contains_key("main/binary-i386/Packages.bz2"));
        assert_eq!(
            generated["main/binary-i386/Packages"].size,
            "Package: demo\n\n".len() as u64
        );
    }

    #[tokio::test]
    async fn discardable_empty_index_is_skipped() {
        let (root, storage, temp) = fixture();
        let mut indexes = IndexFiles::new(&storage, "dists/squeeze", temp.path(), "", false, false);

        indexes.contents_index("main", "i386", false);
        indexes.release_index("main", "i386", false);
        indexes.finalize_all(None, None).await.unwrap();

        let public = root.path().join("public");
        assert!(!public.join("dists/squeeze/main/Contents-i386.gz").exists());
        // Non-discardable empty files are still published.
        assert!(public.join("dists/squeeze/main/binary-i386/Release").exists());
    }

    #[tokio::test]
    async fn contents_index_is_gzip_only() {
        let (root, storage, temp) = fixture();
        let mut indexes = IndexFiles::new(&storage, "dists/squeeze", temp.path(), "", false, false);

        indexes
            .contents_index("main", "i386", false)
            .write_line("usr/bin/app devel/app")
            .unwrap();
        indexes.finalize_all(None, None).await.unwrap();

        let public = root.path().join("public");
        assert!(public.join("dists/squeeze/main/Contents-i386.gz").exists());
        assert!(!public.join("dists/squeeze/main/Contents-i386").exists());
        assert!(!public.join("dists/squeeze/main/Contents-i386.bz2").exists());

        // Checksums cover both the plain and the gzip variant.
        assert!(indexes.generated_files().contains_key("main/Contents-i386"));
        assert!(indexes.generated_files().contains_key("main/Contents-i386.gz"));
    }

    #[tokio::test]
    async fn suffix_defers_renames_until_rename_files() {
        let (root, storage, temp) = fixture();
        let mut indexes =
            IndexFiles::new(&storage, "dists/squeeze", temp.path(), ".tmp123", false, true);

        let mut stanza = Stanza::new();
        stanza.set_field("Package", "demo");
        indexes
            .package_index("main", "i386", false, false, "squeeze")
            .write_stanza(&stanza, &[])
            .unwrap();

        indexes.finalize_all(None, None).await.unwrap();

        let dist = root.path().join("public/dists/squeeze/main/binary-i386");
        assert!(dist.join("Packages.tmp123").exists());
        assert!(!dist.join("Packages").exists());

        indexes.rename_files().await.unwrap();
        assert!(dist.join("Packages").exists());
        assert!(!dist.join("Packages.tmp123").exists());
    }

    #[tokio::test]
    async fn by_hash_layout_and_rotation() {
        let (root, storage, temp) = fixture();

        // First generation.
        let mut indexes =
            IndexFiles::new(&storage, "dists/squeeze", temp.path(), ".tmp1", true, true);
        let mut stanza = Stanza::new();
        stanza.set_field("Package", "demo");
        indexes
            .package_index("main", "i386", false, false, "squeeze")
            .write_stanza(&stanza, &[])
            .unwrap();
        indexes.finalize_all(None, None).await.unwrap();
        indexes.rename_files().await.unwrap();

        let by_hash = root
            .path()
            .join("public/dists/squeeze/main/binary-i386/by-hash/SHA256");
        let current = by_hash.join("Packages");
        assert!(current.symlink_metadata().unwrap().file_type().is_symlink());

        let sums1 = indexes.generated_files()["main/binary-i386/Packages"].clone();
        assert!(by_hash.join(&sums1.sha256).exists());

        // by-hash content equals the published index.
        assert_eq!(
            fs::read(by_hash.join(&sums1.sha256)).unwrap(),
            fs::read(root.path().join("public/dists/squeeze/main/binary-i386/Packages")).unwrap()
        );

        // Second generation rotates the previous link to `.old`.
        let temp2 = tempfile::tempdir().unwrap();
        let mut indexes =
            IndexFiles::new(&storage, "dists/squeeze", temp2.path(), ".tmp2", true, true);
        let mut stanza = Stanza::new();
        stanza.set_field("Package", "demo");
        stanza.set_field("Version", "2.0");
        indexes
            .package_index("main", "i386", false, false, "squeeze")
            .write_stanza(&stanza, &[])
            .unwrap();
        indexes.finalize_all(None, None).await.unwrap();
        indexes.rename_files().await.unwrap();

        let sums2 = indexes.generated_files()["main/binary-i386/Packages"].clone();
        assert_ne!(sums1.sha256, sums2.sha256);

        assert!(by_hash.join(&sums2.sha256).exists());
        assert!(by_hash.join("Packages.old").exists());
        // Both generations remain reachable by digest.
        assert!(by_hash.join(&sums1.sha256).exists());

        // Third generation drops the oldest digest file.
        let temp3 = tempfile::tempdir().unwrap();
        let mut indexes =
            IndexFiles::new(&storage, "dists/squeeze", temp3.path(), ".tmp3", true, true);
        let mut stanza = Stanza::new();
        stanza.set_field("Package", "demo");
        stanza.set_field("Version", "3.0");
        indexes
            .package_index("main", "i386", false, false, "squeeze")
            .write_stanza(&stanza, &[])
            .unwrap();
        indexes.finalize_all(None, None).await.unwrap();
        indexes.rename_files().await.unwrap();

        assert!(!by_hash.join(&sums1.sha256).exists());
        assert!(by_hash.join(&sums2.sha256).exists());
    }

    #[tokio::test]
    async fn signing_produces_release_family() {
        let (root, storage, temp) = fixture();
        let mut indexes =
            IndexFiles::new(&storage, "dists/squeeze", temp.path(), ".tmpX", false, true);

        let mut release = indexes.release_file();
        release.write_line("Origin: test").unwrap();
        indexes
            .finalize_file(release, Some(&crate::signer::NullSigner))
            .await
            .unwrap();
        indexes.rename_files().await.unwrap();

        let dist = root.path().join("public/dists/squeeze");
        assert!(dist.join("Release").exists());
        assert!(dist.join("Release.gpg").exists());
        assert!(dist.join("InRelease").exists());
    }
}
