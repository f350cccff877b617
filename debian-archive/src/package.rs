// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The package entity.

A [Package] is a single binary, source, udeb or installer package as tracked
by the catalog. Identity is the key `P<arch> <name> <version> <files-hash>`;
two packages are equal iff name, version, both architectures, source, the
source flag and the files hash all match.

Heavyweight attributes (remaining stanza fields, dependency lists, file
records) are kept as optional fields loaded on demand through the catalog;
accessors panic when the attribute was neither parsed nor loaded, which
indicates a programming error rather than a recoverable condition.
*/

use {
    crate::{
        checksum::{identity_hash, ChecksumInfo},
        control::Stanza,
        dependency::{
            parse_dependency, split_dependency_field, version_satisfies, Dependency,
            VersionRelation,
        },
        error::{ArchiveError, Result},
        pool::{ChecksumStorage, PackagePool},
        storage::PublishedStorage,
    },
    serde::{Deserialize, Serialize},
    std::fmt::Write as _,
};

/// Package types as reported by the `$PackageType` query field.
pub const PACKAGE_TYPE_BINARY: &str = "deb";
pub const PACKAGE_TYPE_UDEB: &str = "udeb";
pub const PACKAGE_TYPE_SOURCE: &str = "source";
pub const PACKAGE_TYPE_INSTALLER: &str = "installer";

/// Special architecture values.
pub const ARCHITECTURE_ALL: &str = "all";
pub const ARCHITECTURE_ANY: &str = "any";
pub const ARCHITECTURE_SOURCE: &str = "source";

/// The distribution whose installer images live under `legacy-images`.
pub const DISTRIBUTION_FOCAL: &str = "focal";

/// One file belonging to a package.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageFile {
    pub filename: String,
    pub checksums: ChecksumInfo,
    /// Directory the file is downloaded from / published under.
    pub download_path: String,
    /// Pool location once imported; empty until then.
    pub pool_path: String,
}

impl PackageFile {
    /// Relative download (or publish) location of this file.
    pub fn download_url(&self) -> String {
        if self.download_path.is_empty() {
            self.filename.clone()
        } else {
            format!("{}/{}", self.download_path.trim_end_matches('/'), self.filename)
        }
    }

    /// Resolve the pool location, probing the pool layout when not cached.
    pub fn pool_path(&self, pool: &PackagePool) -> Result<String> {
        if !self.pool_path.is_empty() {
            return Ok(self.pool_path.clone());
        }

        pool.path_for(&self.filename, &self.checksums)
    }

    /// Check whether the pool holds a verified copy of this file.
    pub fn verify(&self, pool: &PackagePool, storage: &dyn ChecksumStorage) -> Result<bool> {
        match self.pool_path(pool) {
            Ok(path) => pool.verify(&path, &self.checksums, storage),
            Err(ArchiveError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// The set of file records of a package.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageFiles(pub Vec<PackageFile>);

impl PackageFiles {
    /// Hash over the set of file records.
    ///
    /// Order-insensitive: records are sorted by filename before hashing so
    /// the hash identifies the set.
    pub fn hash(&self) -> u64 {
        let mut records = self
            .0
            .iter()
            .map(|f| {
                format!(
                    "{}|{}|{}|{}\n",
                    f.filename, f.checksums.size, f.checksums.md5, f.checksums.sha256
                )
            })
            .collect::<Vec<_>>();
        records.sort();

        identity_hash(records.concat().as_bytes())
    }

    /// Parse the `Files`/`Checksums-Sha1`/`Checksums-Sha256`/`Checksums-Sha512`
    /// fields of a source package stanza, merging records by filename.
    pub fn parse_sum_fields(stanza: &Stanza) -> Result<Self> {
        let mut files: Vec<PackageFile> = Vec::new();

        let mut apply = |field: &str, set: fn(&mut ChecksumInfo, String)| -> Result<()> {
            if let Some(value) = stanza.field(field) {
                for line in value.lines() {
                    let words = line.split_ascii_whitespace().collect::<Vec<_>>();
                    if words.len() != 3 {
                        if line.trim().is_empty() {
                            continue;
                        }
                        return Err(ArchiveError::ControlParse(format!(
                            "malformed checksum line: '{}'",
                            line
                        )));
                    }

                    let size = words[1].parse::<u64>().map_err(|_| {
                        ArchiveError::ControlParse(format!("bad size in checksum line: '{}'", line))
                    })?;

                    let entry = match files.iter_mut().find(|f| f.filename == words[2]) {
                        Some(entry) => entry,
                        None => {
                            files.push(PackageFile {
                                filename: words[2].to_string(),
                                ..Default::default()
                            });
                            files.last_mut().expect("just pushed")
                        }
                    };

                    entry.checksums.size = size;
                    set(&mut entry.checksums, words[0].to_string());
                }
            }

            Ok(())
        };

        apply("Files", |c, v| c.md5 = v)?;
        apply("Checksums-Sha1", |c, v| c.sha1 = v)?;
        apply("Checksums-Sha256", |c, v| c.sha256 = v)?;
        apply("Checksums-Sha512", |c, v| c.sha512 = v)?;

        Ok(Self(files))
    }
}

/// Parsed dependency fields of a package, kept as raw item strings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageDependencies {
    pub depends: Vec<String>,
    pub pre_depends: Vec<String>,
    pub suggests: Vec<String>,
    pub recommends: Vec<String>,
    pub build_depends: Vec<String>,
    pub build_depends_indep: Vec<String>,
}

/// A single instance of a Debian package.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    pub version: String,
    pub architecture: String,
    /// For source packages the "real" architecture value, while
    /// `architecture` equals `source`.
    pub source_architecture: String,
    /// For binary packages, name of the source package (possibly
    /// `name (version)`).
    pub source: String,
    /// Virtual packages this package provides.
    pub provides: Vec<String>,
    /// Hash of the files section.
    pub files_hash: u64,
    pub is_source: bool,
    pub is_udeb: bool,
    pub is_installer: bool,

    #[serde(skip)]
    pub(crate) deps: Option<PackageDependencies>,
    #[serde(skip)]
    pub(crate) extra: Option<Stanza>,
    #[serde(skip)]
    pub(crate) files: Option<PackageFiles>,
    #[serde(skip)]
    pub(crate) contents: Option<Vec<String>>,
}

impl Package {
    /// Create a binary package from a parsed control stanza.
    ///
    /// Consumes the stanza: recognized fields move into typed attributes,
    /// everything else is retained as extra fields.
    pub fn from_control_stanza(mut input: Stanza) -> Self {
        let mut result = Package {
            name: input.remove_field("Package").unwrap_or_default(),
            version: input.remove_field("Version").unwrap_or_default(),
            architecture: input.remove_field("Architecture").unwrap_or_default(),
            source: input.remove_field("Source").unwrap_or_default(),
            ..Default::default()
        };

        let size = input
            .remove_field("Size")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or_default();

        let filename = input.remove_field("Filename").unwrap_or_default();
        // Some broken repositories carry MD5 under the wrong field name.
        let md5 = input
            .remove_field("MD5sum")
            .or_else(|| input.remove_field("MD5Sum"))
            .unwrap_or_default();

        let (download_path, base_name) = match filename.rsplit_once('/') {
            Some((dir, base)) => (dir.to_string(), base.to_string()),
            None => (String::new(), filename),
        };

        result.update_files(PackageFiles(vec![PackageFile {
            filename: base_name,
            download_path,
            checksums: ChecksumInfo {
                size,
                md5: md5.trim().to_string(),
                sha1: input.remove_field("SHA1").unwrap_or_default().trim().to_string(),
                sha256: input
                    .remove_field("SHA256")
                    .unwrap_or_default()
                    .trim()
                    .to_string(),
                sha512: input
                    .remove_field("SHA512")
                    .unwrap_or_default()
                    .trim()
                    .to_string(),
            },
            pool_path: String::new(),
        }]));

        result.deps = Some(PackageDependencies {
            depends: take_dependency_field(&mut input, "Depends"),
            pre_depends: take_dependency_field(&mut input, "Pre-Depends"),
            suggests: take_dependency_field(&mut input, "Suggests"),
            recommends: take_dependency_field(&mut input, "Recommends"),
            ..Default::default()
        });

        result.provides = take_dependency_field(&mut input, "Provides");
        result.extra = Some(input);

        result
    }

    /// Create a source package from a parsed `Sources` stanza.
    pub fn from_source_stanza(mut input: Stanza) -> Result<Self> {
        let mut result = Package {
            is_source: true,
            name: input.remove_field("Package").unwrap_or_default(),
            version: input.remove_field("Version").unwrap_or_default(),
            architecture: ARCHITECTURE_SOURCE.to_string(),
            source_architecture: input.remove_field("Architecture").unwrap_or_default(),
            ..Default::default()
        };

        let mut files = PackageFiles::parse_sum_fields(&input)?;

        input.remove_field("Files");
        input.remove_field("Checksums-Sha1");
        input.remove_field("Checksums-Sha256");
        input.remove_field("Checksums-Sha512");

        let directory = input.field("Directory").unwrap_or_default().to_string();
        for f in &mut files.0 {
            f.download_path = directory.clone();
        }

        result.update_files(files);

        result.deps = Some(PackageDependencies {
            build_depends: take_dependency_field(&mut input, "Build-Depends"),
            build_depends_indep: take_dependency_field(&mut input, "Build-Depends-Indep"),
            ..Default::default()
        });

        result.extra = Some(input);

        Ok(result)
    }

    /// Create a udeb package from a parsed control stanza.
    pub fn from_udeb_stanza(input: Stanza) -> Self {
        let mut p = Self::from_control_stanza(input);
        p.is_udeb = true;
        p
    }

    /// Create a dummy installer package from the body of a `SHA256SUMS` file.
    ///
    /// File sizes are unknown at this point; the mirror update flow fills
    /// them in via the downloader's length probe.
    pub fn from_installer_sums(
        body: &str,
        distribution: &str,
        component: &str,
        architecture: &str,
    ) -> Result<Self> {
        let mut files = Vec::new();

        for line in body.lines() {
            let words = line.split_ascii_whitespace().collect::<Vec<_>>();
            if words.is_empty() {
                continue;
            }
            if words.len() != 2 {
                return Err(ArchiveError::ControlParse(format!(
                    "malformed sum line: '{}'",
                    line
                )));
            }

            files.push(PackageFile {
                filename: words[1].trim_start_matches("./").to_string(),
                checksums: ChecksumInfo {
                    sha256: words[0].to_string(),
                    ..Default::default()
                },
                ..Default::default()
            });
        }

        let images_dir = if distribution == DISTRIBUTION_FOCAL {
            "legacy-images"
        } else {
            "images"
        };
        let rel_path = format!(
            "dists/{}/{}/installer-{}/current/{}",
            distribution, component, architecture, images_dir
        );
        for f in &mut files {
            f.download_path = rel_path.clone();
        }

        let mut p = Package {
            name: "installer".to_string(),
            architecture: architecture.to_string(),
            is_installer: true,
            deps: Some(PackageDependencies::default()),
            extra: Some(Stanza::new()),
            ..Default::default()
        };
        p.update_files(PackageFiles(files));

        Ok(p)
    }

    /// Unique key identifying the package in the catalog.
    pub fn key(&self, prefix: &str) -> Vec<u8> {
        format!(
            "{}P{} {} {} {:08x}",
            prefix, self.architecture, self.name, self.version, self.files_hash
        )
        .into_bytes()
    }

    /// Key that should be unique within one list (drops the files hash).
    pub fn short_key(&self, prefix: &str) -> Vec<u8> {
        format!(
            "{}P{} {} {}",
            prefix, self.architecture, self.name, self.version
        )
        .into_bytes()
    }

    /// `{name}_{version}_{arch}`.
    pub fn full_name(&self) -> String {
        format!("{}_{}_{}", self.name, self.version, self.architecture)
    }

    /// Whether the package matches the given architecture.
    ///
    /// `all` matches any binary architecture but never `source`.
    pub fn matches_architecture(&self, arch: &str) -> bool {
        if self.architecture == ARCHITECTURE_ALL && arch != ARCHITECTURE_SOURCE {
            return true;
        }

        self.architecture == arch
    }

    /// Just the names of provided packages, version qualifiers stripped.
    pub fn provided_packages(&self) -> Vec<String> {
        self.provides
            .iter()
            .map(|p| match parse_dependency(p) {
                Ok(dep) => dep.pkg,
                Err(_) => p.clone(),
            })
            .collect()
    }

    /// Check whether the package `Provides:` the dependency, assuming the
    /// architecture already matched.
    ///
    /// A `Provides:` entry may carry a version (`name (= 1.2)`); that version
    /// participates in the dependency check, falling back to the package's
    /// own version when absent. Only `=` is allowed in `Provides`; anything
    /// else is reported and the entry skipped. Unparseable entries are
    /// likewise reported and skipped.
    fn provides_dependency(&self, dep: &Dependency) -> bool {
        for provided in &self.provides {
            let provided_dep = match parse_dependency(provided) {
                Ok(d) => d,
                Err(e) => {
                    log::warn!(
                        "error while checking if package provides dependency: {}",
                        e
                    );
                    continue;
                }
            };

            match provided_dep.effective_relation() {
                VersionRelation::Equal | VersionRelation::DontCare => {}
                _ => {
                    log::warn!(
                        "error while checking if package provides dependency: {}",
                        ArchiveError::ProvidesRelation(provided_dep.to_string())
                    );
                    continue;
                }
            }

            let provided_version = if provided_dep.version.is_empty() {
                self.version.as_str()
            } else {
                provided_dep.version.as_str()
            };

            if provided_dep.pkg == dep.pkg && version_satisfies(provided_version, dep) {
                return true;
            }
        }

        false
    }

    /// Whether the package satisfies the dependency.
    pub fn matches_dependency(&self, dep: &Dependency) -> bool {
        if !dep.architecture.is_empty() && !self.matches_architecture(&dep.architecture) {
            return false;
        }

        if self.provides_dependency(dep) {
            return true;
        }

        if dep.pkg != self.name {
            return false;
        }

        version_satisfies(&self.version, dep)
    }

    /// Obtain a field value, including the virtual query fields.
    pub fn get_field(&self, name: &str) -> String {
        match name {
            "$Source" => {
                if self.is_source {
                    return String::new();
                }
                if self.source.is_empty() {
                    self.name.clone()
                } else if let Some(pos) = self.source.find('(') {
                    self.source[..pos].trim().to_string()
                } else {
                    self.source.clone()
                }
            }
            "$SourceVersion" => {
                if self.is_source {
                    return String::new();
                }
                if let Some(pos) = self.source.find('(') {
                    if let Some(pos2) = self.source.rfind(')') {
                        if pos2 > pos {
                            return self.source[pos + 1..pos2].trim().to_string();
                        }
                    }
                }
                self.version.clone()
            }
            "$Architecture" => self.architecture.clone(),
            "$PackageType" => {
                if self.is_source {
                    PACKAGE_TYPE_SOURCE
                } else if self.is_udeb {
                    PACKAGE_TYPE_UDEB
                } else {
                    PACKAGE_TYPE_BINARY
                }
                .to_string()
            }
            "Name" => self.name.clone(),
            "Version" => self.version.clone(),
            "Architecture" => {
                if self.is_source {
                    self.source_architecture.clone()
                } else {
                    self.architecture.clone()
                }
            }
            "Source" => self.source.clone(),
            "Depends" => self.deps().depends.join(", "),
            "Pre-Depends" => self.deps().pre_depends.join(", "),
            "Suggests" => self.deps().suggests.join(", "),
            "Recommends" => self.deps().recommends.join(", "),
            "Provides" => self.provides.join(", "),
            "Build-Depends" => self.deps().build_depends.join(", "),
            "Build-Depends-Indep" => self.deps().build_depends_indep.join(", "),
            _ => self.extra().field(name).unwrap_or_default().to_string(),
        }
    }

    /// Compile the list of raw dependency items selected by `options`
    /// (`DEP_FOLLOW_*` flags).
    pub fn get_dependencies(&self, options: u32) -> Vec<String> {
        use crate::package_list::{
            DEP_FOLLOW_BUILD, DEP_FOLLOW_RECOMMENDS, DEP_FOLLOW_SOURCE, DEP_FOLLOW_SUGGESTS,
        };

        let deps = self.deps();
        let mut result = Vec::with_capacity(30);
        result.extend_from_slice(&deps.depends);
        result.extend_from_slice(&deps.pre_depends);

        if options & DEP_FOLLOW_RECOMMENDS != 0 {
            result.extend_from_slice(&deps.recommends);
        }
        if options & DEP_FOLLOW_SUGGESTS != 0 {
            result.extend_from_slice(&deps.suggests);
        }
        if options & DEP_FOLLOW_BUILD != 0 {
            result.extend_from_slice(&deps.build_depends);
            result.extend_from_slice(&deps.build_depends_indep);
        }
        if options & DEP_FOLLOW_SOURCE != 0 {
            let source = if self.source.is_empty() {
                self.name.as_str()
            } else {
                self.source.as_str()
            };
            if source.contains(')') {
                result.push(format!("{} {{source}}", source));
            } else {
                result.push(format!("{} (= {}) {{source}}", source, self.version));
            }
        }

        result
    }

    /// `[$SECTION/]$NAME`, the package name as used in `Contents` indexes.
    pub fn qualified_name(&self) -> String {
        match self.extra().field("Section") {
            Some(section) if !section.is_empty() => format!("{}/{}", section, self.name),
            _ => self.name.clone(),
        }
    }

    /// Extra stanza fields. Panics when not parsed or loaded.
    pub fn extra(&self) -> &Stanza {
        self.extra
            .as_ref()
            .expect("package extra fields not loaded")
    }

    /// Parsed dependency lists. Panics when not parsed or loaded.
    pub fn deps(&self) -> &PackageDependencies {
        self.deps.as_ref().expect("package dependencies not loaded")
    }

    /// File records. Panics when not parsed or loaded.
    pub fn files(&self) -> &PackageFiles {
        self.files.as_ref().expect("package files not loaded")
    }

    pub(crate) fn files_mut(&mut self) -> &mut PackageFiles {
        self.files.as_mut().expect("package files not loaded")
    }

    /// Save a new state of the file records and refresh the files hash.
    pub fn update_files(&mut self, files: PackageFiles) {
        self.files_hash = files.hash();
        self.files = Some(files);
    }

    /// Paths shipped inside the package body, when computed at ingestion.
    ///
    /// Source packages carry no contents.
    pub fn contents(&self) -> Option<&[String]> {
        if self.is_source {
            return None;
        }

        self.contents.as_deref()
    }

    /// Record the paths shipped inside the package body.
    pub fn set_contents(&mut self, contents: Vec<String>) {
        self.contents = Some(contents);
    }

    /// Reconstruct the original stanza from the package.
    pub fn stanza(&self) -> Stanza {
        let mut result = self.extra().clone();
        result.set_field("Package", self.name.clone());
        result.set_field("Version", self.version.clone());

        if self.is_source {
            result.set_field("Architecture", self.source_architecture.clone());
        } else {
            result.set_field("Architecture", self.architecture.clone());
            if !self.source.is_empty() {
                result.set_field("Source", self.source.clone());
            }
        }

        if self.is_source {
            let mut md5 = String::new();
            let mut sha1 = String::new();
            let mut sha256 = String::new();
            let mut sha512 = String::new();

            for f in &self.files().0 {
                if !f.checksums.md5.is_empty() {
                    let _ = write!(md5, "\n{} {} {}", f.checksums.md5, f.checksums.size, f.filename);
                }
                if !f.checksums.sha1.is_empty() {
                    let _ = write!(sha1, "\n{} {} {}", f.checksums.sha1, f.checksums.size, f.filename);
                }
                if !f.checksums.sha256.is_empty() {
                    let _ = write!(
                        sha256,
                        "\n{} {} {}",
                        f.checksums.sha256, f.checksums.size, f.filename
                    );
                }
                if !f.checksums.sha512.is_empty() {
                    let _ = write!(
                        sha512,
                        "\n{} {} {}",
                        f.checksums.sha512, f.checksums.size, f.filename
                    );
                }
            }

            result.set_field("Files", md5);
            if !sha1.is_empty() {
                result.set_field("Checksums-Sha1", sha1);
            }
            if !sha256.is_empty() {
                result.set_field("Checksums-Sha256", sha256);
            }
            if !sha512.is_empty() {
                result.set_field("Checksums-Sha512", sha512);
            }
        } else if !self.is_installer {
            let f = &self.files().0[0];
            result.set_field("Filename", f.download_url());
            if !f.checksums.md5.is_empty() {
                result.set_field("MD5sum", f.checksums.md5.clone());
            }
            if !f.checksums.sha1.is_empty() {
                result.set_field("SHA1", f.checksums.sha1.clone());
            }
            if !f.checksums.sha256.is_empty() {
                result.set_field("SHA256", f.checksums.sha256.clone());
            }
            if !f.checksums.sha512.is_empty() {
                result.set_field("SHA512", f.checksums.sha512.clone());
            }
            result.set_field("Size", f.checksums.size.to_string());
        }

        let deps = self.deps();
        if !deps.depends.is_empty() {
            result.set_field("Depends", deps.depends.join(", "));
        }
        if !deps.pre_depends.is_empty() {
            result.set_field("Pre-Depends", deps.pre_depends.join(", "));
        }
        if !deps.suggests.is_empty() {
            result.set_field("Suggests", deps.suggests.join(", "));
        }
        if !deps.recommends.is_empty() {
            result.set_field("Recommends", deps.recommends.join(", "));
        }
        if !self.provides.is_empty() {
            result.set_field("Provides", self.provides.join(", "));
        }
        if !deps.build_depends.is_empty() {
            result.set_field("Build-Depends", deps.build_depends.join(", "));
        }
        if !deps.build_depends_indep.is_empty() {
            result.set_field("Build-Depends-Indep", deps.build_depends_indep.join(", "));
        }

        result
    }

    /// `SHA256SUMS` body lines for an installer package.
    pub fn installer_sum_lines(&self) -> Vec<String> {
        self.files()
            .0
            .iter()
            .map(|f| format!("{}  {}", f.checksums.sha256, f.filename))
            .collect()
    }

    /// Compare two packages for identity.
    pub fn equals(&self, other: &Package) -> bool {
        self.name == other.name
            && self.version == other.version
            && self.source_architecture == other.source_architecture
            && self.architecture == other.architecture
            && self.source == other.source
            && self.is_source == other.is_source
            && self.files_hash == other.files_hash
    }

    /// Directory in the published pool for this package's files.
    ///
    /// `lib`-prefixed sources use a four-letter directory, everything else
    /// the first letter.
    pub fn pool_directory(&self) -> Result<String> {
        let source = if self.source.is_empty() {
            self.name.as_str()
        } else if let Some(pos) = self.source.find('(') {
            self.source[..pos].trim()
        } else {
            self.source.as_str()
        };

        if source.len() < 2 {
            return Err(ArchiveError::SourceNameTooShort(source.to_string()));
        }

        let subdir = if source.starts_with("lib") {
            &source[..4]
        } else {
            &source[..1]
        };

        Ok(format!("{}/{}", subdir, source))
    }

    /// Link all package files from the pool into the published location.
    pub async fn link_from_pool(
        &mut self,
        published_storage: &dyn PublishedStorage,
        pool: &PackagePool,
        prefix: &str,
        rel_path: &str,
        force: bool,
    ) -> Result<()> {
        for i in 0..self.files().0.len() {
            let f = self.files().0[i].clone();
            let source_pool_path = f.pool_path(pool)?;

            published_storage
                .link_from_pool(
                    prefix,
                    rel_path,
                    &f.filename,
                    pool,
                    &source_pool_path,
                    &f.checksums,
                    force,
                )
                .await?;

            if self.is_source {
                self.extra
                    .as_mut()
                    .expect("package extra fields not loaded")
                    .set_field("Directory", rel_path.to_string());
            } else {
                self.files_mut().0[i].download_path = rel_path.to_string();
            }
        }

        Ok(())
    }

    /// List of files still to be downloaded into the pool.
    pub fn download_list(
        &self,
        pool: &PackagePool,
        checksum_storage: &dyn ChecksumStorage,
    ) -> Result<Vec<PackageDownloadTask>> {
        let mut result = Vec::with_capacity(1);

        for (index, f) in self.files().0.iter().enumerate() {
            if !f.verify(pool, checksum_storage)? {
                result.push(PackageDownloadTask {
                    file_index: index,
                    download_url: f.download_url(),
                    expected: f.checksums.clone(),
                });
            }
        }

        Ok(result)
    }

    /// Verify that all package files are present and correct in the pool.
    pub fn verify_files(
        &self,
        pool: &PackagePool,
        checksum_storage: &dyn ChecksumStorage,
    ) -> Result<bool> {
        for f in &self.files().0 {
            if !f.verify(pool, checksum_storage)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Paths to this package's files inside the pool.
    pub fn filepath_list(&self, pool: &PackagePool) -> Result<Vec<String>> {
        self.files()
            .0
            .iter()
            .map(|f| f.pool_path(pool))
            .collect()
    }
}

impl std::fmt::Display for Package {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}_{}", self.name, self.version, self.architecture)
    }
}

/// An element of the download queue for a package.
#[derive(Clone, Debug)]
pub struct PackageDownloadTask {
    /// Index into the package's file records.
    pub file_index: usize,
    /// Relative URL to fetch.
    pub download_url: String,
    /// Checksums the downloaded file must match.
    pub expected: ChecksumInfo,
}

fn take_dependency_field(stanza: &mut Stanza, name: &str) -> Vec<String> {
    stanza
        .remove_field(name)
        .map(|v| split_dependency_field(&v))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn package_stanza() -> Stanza {
        let mut s = Stanza::new();
        s.set_field("Package", "alien-arena-common");
        s.set_field("Priority", "extra");
        s.set_field("Section", "games");
        s.set_field("Installed-Size", "456");
        s.set_field("Maintainer", "Debian Games Team <pkg-games-devel@lists.alioth.debian.org>");
        s.set_field("Architecture", "i386");
        s.set_field("Source", "alien-arena");
        s.set_field("Version", "7.40-2");
        s.set_field("Depends", "libc6 (>= 2.7), alien-arena-data (>= 7.40)");
        s.set_field("Filename", "pool/contrib/a/alien-arena/alien-arena-common_7.40-2_i386.deb");
        s.set_field("Size", "187518");
        s.set_field("MD5sum", "1e8cba92c41420aa7baa8a5718d67122");
        s.set_field("SHA1", "46955e48cad27410a83740a21d766ce362364024");
        s.set_field(
            "SHA256",
            "eb4afb9885cba6dc70cccd05b910b2dbccc02c5900578be5e99f0d3dbf9d76a5",
        );
        s.set_field("Description", "Common files for Alien Arena client and server");
        s
    }

    #[test]
    fn from_control_stanza_basics() {
        let p = Package::from_control_stanza(package_stanza());

        assert_eq!(p.name, "alien-arena-common");
        assert_eq!(p.version, "7.40-2");
        assert_eq!(p.architecture, "i386");
        assert_eq!(p.source, "alien-arena");
        assert!(!p.is_source);

        let f = &p.files().0[0];
        assert_eq!(f.filename, "alien-arena-common_7.40-2_i386.deb");
        assert_eq!(f.download_path, "pool/contrib/a/alien-arena");
        assert_eq!(f.checksums.size, 187518);
        assert_eq!(f.checksums.md5, "1e8cba92c41420aa7baa8a5718d67122");

        assert_eq!(
            p.deps().depends,
            vec!["libc6 (>= 2.7)", "alien-arena-data (>= 7.40)"]
        );
        assert!(p.extra().field("Depends").is_none());
        assert_eq!(p.extra().field("Section"), Some("games"));
    }

    #[test]
    fn keys() {
        let p = Package::from_control_stanza(package_stanza());

        let key = String::from_utf8(p.key("")).unwrap();
        assert!(key.starts_with("Pi386 alien-arena-common 7.40-2 "));
        assert_eq!(
            p.short_key(""),
            b"Pi386 alien-arena-common 7.40-2".to_vec()
        );
        assert_eq!(
            String::from_utf8(p.key("xD")).unwrap(),
            format!("xD{}", key)
        );
    }

    #[test]
    fn equality() {
        let p1 = Package::from_control_stanza(package_stanza());
        let p2 = Package::from_control_stanza(package_stanza());
        assert!(p1.equals(&p2));

        let mut stanza = package_stanza();
        stanza.set_field("Source", "unknown-planet");
        let p3 = Package::from_control_stanza(stanza);
        assert!(!p1.equals(&p3));
    }

    #[test]
    fn architecture_matching() {
        let mut p = Package::from_control_stanza(package_stanza());
        assert!(p.matches_architecture("i386"));
        assert!(!p.matches_architecture("amd64"));

        p.architecture = ARCHITECTURE_ALL.to_string();
        assert!(p.matches_architecture("amd64"));
        assert!(!p.matches_architecture(ARCHITECTURE_SOURCE));
    }

    #[test]
    fn dependency_matching() {
        let p = Package::from_control_stanza(package_stanza());

        assert!(p.matches_dependency(&parse_dependency("alien-arena-common").unwrap()));
        assert!(p.matches_dependency(&parse_dependency("alien-arena-common (>= 7.40)").unwrap()));
        assert!(!p.matches_dependency(&parse_dependency("alien-arena-common (>= 7.41)").unwrap()));
        assert!(!p.matches_dependency(&parse_dependency("other").unwrap()));
        assert!(!p.matches_dependency(&parse_dependency("alien-arena-common [amd64]").unwrap()));
    }

    #[test]
    fn provides_with_version() {
        let p = Package {
            name: "python3-cffi-backend".into(),
            version: "1.15.1-5+b1".into(),
            architecture: "amd64".into(),
            provides: vec![
                "python3-cffi-backend-api-9729".into(),
                "python3-cffi-backend-api-max (= 10495)".into(),
                "python3-cffi-backend-api-min (= 9729)".into(),
            ],
            deps: Some(PackageDependencies::default()),
            ..Default::default()
        };

        assert!(p.matches_dependency(
            &parse_dependency("python3-cffi-backend-api-max (>= 9729)").unwrap()
        ));
        assert!(!p.matches_dependency(
            &parse_dependency("python3-cffi-backend-api-max (<< 9729)").unwrap()
        ));
        assert!(p.matches_dependency(&parse_dependency("python3-cffi-backend-api-max").unwrap()));
        // Unversioned provides fall back to the package version.
        assert!(p.matches_dependency(
            &parse_dependency("python3-cffi-backend-api-9729 (>= 1.15)").unwrap()
        ));
    }

    #[test]
    fn virtual_fields() {
        let mut p = Package::from_control_stanza(package_stanza());
        assert_eq!(p.get_field("$Source"), "alien-arena");
        assert_eq!(p.get_field("$SourceVersion"), "7.40-2");
        assert_eq!(p.get_field("$Architecture"), "i386");
        assert_eq!(p.get_field("$PackageType"), PACKAGE_TYPE_BINARY);
        assert_eq!(p.get_field("Section"), "games");

        p.source = "alien-arena (7.40-1)".to_string();
        assert_eq!(p.get_field("$Source"), "alien-arena");
        assert_eq!(p.get_field("$SourceVersion"), "7.40-1");
    }

    #[test]
    fn stanza_round_trip() {
        let original = package_stanza();
        let p = Package::from_control_stanza(original.clone());
        let rebuilt = p.stanza();

        for (name, value) in original.iter_fields() {
            if name == "Filename" {
                continue;
            }
            assert_eq!(rebuilt.field(name), Some(value), "field {}", name);
        }
        assert_eq!(
            rebuilt.field("Filename"),
            Some("pool/contrib/a/alien-arena/alien-arena-common_7.40-2_i386.deb")
        );
    }

    #[test]
    fn source_stanza_files() {
        let mut s = Stanza::new();
        s.set_field("Package", "access-modifier-checker");
        s.set_field("Version", "1.0-4");
        s.set_field("Architecture", "all");
        s.set_field("Directory", "pool/main/a/access-modifier-checker");
        s.set_field(
            "Files",
            "\nd57b5b9ded0bb77d39ea0b1bb08dd0cc 1884 access-modifier-checker_1.0-4.dsc\nf95ebfb59e4d4ca butterfly 2344 bad",
        );

        assert!(Package::from_source_stanza(s.clone()).is_err());

        s.set_field(
            "Files",
            "\nd57b5b9ded0bb77d39ea0b1bb08dd0cc 1884 access-modifier-checker_1.0-4.dsc",
        );
        s.set_field(
            "Checksums-Sha1",
            "\na3b2c1d4e5f60718293a4b5c6d7e8f9012345678 1884 access-modifier-checker_1.0-4.dsc",
        );

        let p = Package::from_source_stanza(s).unwrap();
        assert!(p.is_source);
        assert_eq!(p.architecture, ARCHITECTURE_SOURCE);
        assert_eq!(p.source_architecture, "all");

        let files = &p.files().0;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].checksums.size, 1884);
        assert_eq!(files[0].checksums.md5, "d57b5b9ded0bb77d39ea0b1bb08dd0cc");
        assert_eq!(
            files[0].checksums.sha1,
            "a3b2c1d4e5f60718293a4b5c6d7e8f9012345678"
        );
        assert_eq!(files[0].download_path, "pool/main/a/access-modifier-checker");
    }

    #[test]
    fn pool_directory_rules() {
        let mut p = Package::from_control_stanza(package_stanza());
        assert_eq!(p.pool_directory().unwrap(), "a/alien-arena");

        p.source = "libmars-invaders (1.03)".to_string();
        assert_eq!(p.pool_directory().unwrap(), "libm/libmars-invaders");

        p.source = String::new();
        p.name = "x".to_string();
        assert!(p.pool_directory().is_err());
    }

    #[test]
    fn files_hash_is_order_insensitive() {
        let f1 = PackageFile {
            filename: "a.deb".into(),
            checksums: ChecksumInfo {
                size: 10,
                md5: "aa".into(),
                ..Default::default()
            },
            ..Default::default()
        };
        let f2 = PackageFile {
            filename: "b.deb".into(),
            checksums: ChecksumInfo {
                size: 20,
                md5: "bb".into(),
                ..Default::default()
            },
            ..Default::default()
        };

        let a = PackageFiles(vec![f1.clone(), f2.clone()]).hash();
        let b = PackageFiles(vec![f2, f1]).hash();
        assert_eq!(a, b);
    }

    #[test]
    fn installer_sums() {
        let p = Package::from_installer_sums(
            "d41d8cd98f00b204e9800998ecf8427e0  ./netboot/boot.img.gz\n",
            "jessie",
            "non-free",
            "i386",
        )
        .unwrap();

        assert!(p.is_installer);
        let f = &p.files().0[0];
        assert_eq!(f.filename, "netboot/boot.img.gz");
        assert_eq!(
            f.download_path,
            "dists/jessie/non-free/installer-i386/current/images"
        );

        let focal = Package::from_installer_sums("abc  f", DISTRIBUTION_FOCAL, "main", "amd64")
            .unwrap();
        assert_eq!(
            focal.files().0[0].download_path,
            "dists/focal/main/installer-amd64/current/legacy-images"
        );
    }
}
