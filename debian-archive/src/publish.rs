// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Published repositories.

A [PublishedRepo] binds components to sources (snapshots or local
repositories) and materializes them as an APT-consumable tree at a
`(storage, prefix, distribution)` coordinate: `dists/<distribution>` holds
the generated indexes, `pool/` holds package bodies linked from the package
pool.

Publishing stages everything under a random suffix and commits with a
deterministic rename pass; a failure before the commit point leaves the
existing tree untouched.
*/

use {
    crate::{
        cancel::CancellationToken,
        collection::CollectionFactory,
        control::{Stanza, CANONICAL_BINARY, CANONICAL_RELEASE, CANONICAL_SOURCE},
        database::{Database, WriteBatch},
        error::{ArchiveError, Result},
        index_files::{random_suffix, IndexFiles},
        local_repo::LocalRepo,
        package::{Package, ARCHITECTURE_SOURCE},
        package_list::PackageList,
        pool::PackagePool,
        ref_list::PackageRefList,
        signer::Signer,
        snapshot::Snapshot,
        storage::{join_paths, PublishedStorage, StorageProvider},
    },
    chrono::Utc,
    serde::{Deserialize, Serialize},
    std::{
        collections::{BTreeMap, BTreeSet, HashMap, HashSet},
        sync::Arc,
    },
    uuid::Uuid,
};

/// Source kinds of a published repository.
pub const SOURCE_KIND_SNAPSHOT: &str = "snapshot";
pub const SOURCE_KIND_LOCAL: &str = "local";

/// A source feeding one component.
#[derive(Clone, Debug)]
pub enum PublishSource {
    Snapshot(Snapshot),
    LocalRepo(LocalRepo),
}

impl PublishSource {
    fn kind(&self) -> &'static str {
        match self {
            Self::Snapshot(_) => SOURCE_KIND_SNAPSHOT,
            Self::LocalRepo(_) => SOURCE_KIND_LOCAL,
        }
    }

    fn uuid(&self) -> &str {
        match self {
            Self::Snapshot(s) => &s.uuid,
            Self::LocalRepo(l) => &l.uuid,
        }
    }

    fn name(&self) -> &str {
        match self {
            Self::Snapshot(s) => &s.name,
            Self::LocalRepo(l) => &l.name,
        }
    }

    fn ref_list(&self) -> PackageRefList {
        match self {
            Self::Snapshot(s) => s.ref_list(),
            Self::LocalRepo(l) => l.ref_list(),
        }
    }

    fn default_component(&self) -> String {
        match self {
            Self::Snapshot(_) => String::new(),
            Self::LocalRepo(l) => l.default_component.clone(),
        }
    }
}

/// Uncommitted component→source changes.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct PublishRevision {
    /// component -> source name.
    pub sources: BTreeMap<String, String>,
}

impl PublishRevision {
    pub fn components(&self) -> Vec<String> {
        self.sources.keys().cloned().collect()
    }

    pub fn source_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sources.values().cloned().collect();
        names.sort();
        names.dedup();
        names
    }
}

/// Result of applying a [PublishRevision].
#[derive(Clone, Debug, Default)]
pub struct UpdateResult {
    pub added_sources: BTreeMap<String, String>,
    pub updated_sources: BTreeMap<String, String>,
    pub removed_sources: BTreeMap<String, String>,
}

impl UpdateResult {
    pub fn added_components(&self) -> Vec<String> {
        self.added_sources.keys().cloned().collect()
    }

    pub fn updated_components(&self) -> Vec<String> {
        self.updated_sources.keys().cloned().collect()
    }

    pub fn removed_components(&self) -> Vec<String> {
        self.removed_sources.keys().cloned().collect()
    }
}

#[derive(Clone, Debug)]
struct SourceItem {
    name: String,
    package_refs: PackageRefList,
}

/// A materialized view of components→sources published at a
/// `(storage, prefix, distribution)` coordinate.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PublishedRepo {
    pub uuid: String,
    /// Named storage backend; empty means the default local storage.
    pub storage: String,
    pub prefix: String,
    pub distribution: String,
    pub origin: String,
    pub label: String,
    pub suite: String,
    pub codename: String,
    pub architectures: Vec<String>,
    pub source_kind: String,
    /// component -> source UUID.
    pub sources: BTreeMap<String, String>,
    pub skip_contents: bool,
    pub acquire_by_hash: bool,
    pub multi_dist: bool,
    pub revision: Option<PublishRevision>,

    #[serde(skip)]
    source_items: HashMap<String, SourceItem>,
}

/// Normalize a publish prefix.
///
/// `.` denotes the root. The normalized prefix may not escape the root,
/// and no segment may be named `dists` or `pool`.
fn normalize_prefix(prefix: &str) -> Result<String> {
    let mut segments: Vec<&str> = Vec::new();

    for segment in prefix.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(ArchiveError::InvalidPrefix(prefix.to_string()));
                }
            }
            other => segments.push(other),
        }
    }

    if segments.iter().any(|s| *s == "dists" || *s == "pool") {
        return Err(ArchiveError::InvalidPrefix(prefix.to_string()));
    }

    Ok(if segments.is_empty() {
        ".".to_string()
    } else {
        segments.join("/")
    })
}

impl PublishedRepo {
    /// Create a published repository from components and sources.
    ///
    /// Empty component names are filled from the source's default component
    /// (falling back to `main`); an empty distribution is guessed from the
    /// source chain.
    pub fn new(
        storage: impl Into<String>,
        prefix: &str,
        distribution: &str,
        architectures: Option<Vec<String>>,
        components: Vec<String>,
        sources: Vec<PublishSource>,
        collection_factory: &CollectionFactory,
        multi_dist: bool,
    ) -> Result<Self> {
        if sources.is_empty() {
            panic!("publish with empty sources");
        }
        if sources.len() != components.len() {
            panic!("sources and components should be equal in size");
        }

        let source_kind = sources[0].kind();
        for source in &sources {
            if source.kind() != source_kind {
                panic!("mixed source kinds in publish");
            }
        }

        let prefix = normalize_prefix(prefix)?;

        let mut distribution = distribution.to_string();
        if distribution.is_empty() {
            distribution = guess_distribution(&sources, collection_factory)?;
        }

        let mut source_map = BTreeMap::new();
        let mut source_items = HashMap::new();

        for (component, source) in components.into_iter().zip(sources.into_iter()) {
            let component = if component.is_empty() {
                let default = source.default_component();
                if default.is_empty() {
                    "main".to_string()
                } else {
                    default
                }
            } else {
                component
            };

            if source_map.contains_key(&component) {
                return Err(ArchiveError::DuplicateComponent(component));
            }

            source_items.insert(
                component.clone(),
                SourceItem {
                    name: source.name().to_string(),
                    package_refs: source.ref_list(),
                },
            );
            source_map.insert(component, source.uuid().to_string());
        }

        Ok(Self {
            uuid: Uuid::new_v4().to_string(),
            storage: storage.into(),
            prefix,
            distribution,
            origin: String::new(),
            label: String::new(),
            suite: String::new(),
            codename: String::new(),
            architectures: architectures.unwrap_or_default(),
            source_kind: source_kind.to_string(),
            sources: source_map,
            skip_contents: false,
            acquire_by_hash: false,
            multi_dist,
            revision: None,
            source_items,
        })
    }

    /// `storage:prefix` coordinate of this repository.
    pub fn storage_prefix(&self) -> String {
        if self.storage.is_empty() {
            self.prefix.clone()
        } else {
            format!("{}:{}", self.storage, self.prefix)
        }
    }

    /// Catalog key of the repository record.
    pub fn key(&self) -> Vec<u8> {
        format!("U{}>>{}", self.storage_prefix(), self.distribution).into_bytes()
    }

    /// Catalog key of a component's reference list.
    pub fn ref_key(&self, component: &str) -> Vec<u8> {
        format!("E{}{}", self.uuid, component).into_bytes()
    }

    /// Component names, sorted.
    pub fn components(&self) -> Vec<String> {
        self.sources.keys().cloned().collect()
    }

    /// Reference list of a component (empty when not loaded).
    pub fn ref_list(&self, component: &str) -> PackageRefList {
        self.source_items
            .get(component)
            .map(|item| item.package_refs.clone())
            .unwrap_or_default()
    }

    pub fn set_ref_list(&mut self, component: &str, refs: PackageRefList) {
        self.source_items
            .entry(component.to_string())
            .and_modify(|item| item.package_refs = refs.clone())
            .or_insert_with(|| SourceItem {
                name: String::new(),
                package_refs: refs,
            });
    }

    /// The `Origin:` value, defaulting to `<prefix> <distribution>`.
    pub fn origin_value(&self) -> String {
        if self.origin.is_empty() {
            format!("{} {}", self.prefix, self.distribution)
        } else {
            self.origin.clone()
        }
    }

    fn prefix_for_paths(&self) -> &str {
        if self.prefix == "." {
            ""
        } else {
            &self.prefix
        }
    }

    /// Published directory of the distribution indexes, relative to the
    /// storage root.
    pub fn dists_path(&self) -> String {
        join_paths(&[self.prefix_for_paths(), "dists", &self.distribution])
    }

    /// Published pool directory of a component, relative to the prefix.
    fn component_pool_path(&self, component: &str) -> String {
        if self.multi_dist {
            let codename = if self.codename.is_empty() {
                &self.distribution
            } else {
                &self.codename
            };
            format!("pool/{}/{}", codename, component)
        } else {
            format!("pool/{}", component)
        }
    }

    /// Obtain the pending revision, creating one from the current sources.
    pub fn obtain_revision(&mut self) -> &mut PublishRevision {
        if self.revision.is_none() {
            let sources = self
                .sources
                .keys()
                .map(|component| {
                    let name = self
                        .source_items
                        .get(component)
                        .map(|item| item.name.clone())
                        .unwrap_or_default();
                    (component.clone(), name)
                })
                .collect();

            self.revision = Some(PublishRevision { sources });
        }

        self.revision.as_mut().expect("just created")
    }

    /// Discard the pending revision.
    pub fn drop_revision(&mut self) -> Option<PublishRevision> {
        self.revision.take()
    }

    /// Apply the pending revision: resolve source names through the catalog
    /// and replace the component map.
    pub fn update(&mut self, collection_factory: &CollectionFactory) -> Result<UpdateResult> {
        let revision = match self.revision.take() {
            Some(revision) => revision,
            None => return Err(ArchiveError::NotFound("pending revision".to_string())),
        };

        let mut result = UpdateResult::default();

        let mut new_sources = BTreeMap::new();
        let mut new_items = HashMap::new();

        for (component, name) in &revision.sources {
            let (uuid, refs) = match self.source_kind.as_str() {
                SOURCE_KIND_SNAPSHOT => {
                    let collection = collection_factory.snapshot_collection();
                    let mut snapshot = collection.by_name(name)?;
                    collection.load_ref_list(&mut snapshot)?;
                    (snapshot.uuid.clone(), snapshot.ref_list())
                }
                _ => {
                    let collection = collection_factory.local_repo_collection();
                    let mut repo = collection.by_name(name)?;
                    collection.load_ref_list(&mut repo)?;
                    (repo.uuid.clone(), repo.ref_list())
                }
            };

            match self.sources.get(component) {
                Some(_) => {
                    result
                        .updated_sources
                        .insert(component.clone(), name.clone());
                }
                None => {
                    result.added_sources.insert(component.clone(), name.clone());
                }
            }

            new_items.insert(
                component.clone(),
                SourceItem {
                    name: name.clone(),
                    package_refs: refs,
                },
            );
            new_sources.insert(component.clone(), uuid);
        }

        for component in self.sources.keys() {
            if !revision.sources.contains_key(component) {
                let name = self
                    .source_items
                    .get(component)
                    .map(|item| item.name.clone())
                    .unwrap_or_default();
                result.removed_sources.insert(component.clone(), name);
            }
        }

        self.sources = new_sources;
        self.source_items = new_items;

        Ok(result)
    }

    /// Materialize the published tree.
    ///
    /// Steps: build per-component package lists, link pool files, write
    /// `Packages`/`Sources`/`Contents` and per-architecture `Release`
    /// indexes, assemble and sign the top-level `Release`, then commit by
    /// executing the deferred renames with the `Release` family last.
    pub async fn publish(
        &mut self,
        pool: &PackagePool,
        provider: &dyn StorageProvider,
        collection_factory: &CollectionFactory,
        signer: Option<&dyn Signer>,
        cancel: Option<&CancellationToken>,
        force_overwrite: bool,
    ) -> Result<()> {
        let storage = provider.published_storage(&self.storage)?;
        let package_collection = collection_factory.package_collection();

        // Load per-component package lists.
        let mut component_lists: BTreeMap<String, PackageList> = BTreeMap::new();
        for component in self.components() {
            let refs = self.ref_list(&component);
            let mut list = PackageList::from_ref_list(&refs, &package_collection)?;
            list.prepare_index();
            component_lists.insert(component, list);
        }

        // Discover architectures when not set explicitly.
        if self.architectures.is_empty() {
            let mut archs = BTreeSet::new();
            let mut have_sources = false;
            for list in component_lists.values() {
                for arch in list.architectures(false) {
                    archs.insert(arch);
                }
                have_sources = have_sources || list.iter().any(|p| p.is_source);
            }
            if have_sources {
                archs.insert(ARCHITECTURE_SOURCE.to_string());
            }

            self.architectures = archs.into_iter().collect();
        }
        if self.architectures.is_empty() {
            return Err(ArchiveError::NoArchitectures);
        }

        let temp_dir = tempfile::tempdir()?;
        let suffix = random_suffix();

        let mut indexes = IndexFiles::new(
            storage.as_ref(),
            self.dists_path(),
            temp_dir.path(),
            suffix,
            self.acquire_by_hash,
            false,
        );

        for (component, list) in &component_lists {
            let pool_rel = self.component_pool_path(component);

            // Track linked packages so `all` packages are linked once even
            // though they appear in every binary architecture index.
            let mut linked: HashSet<Vec<u8>> = HashSet::new();

            for arch in self.architectures.clone() {
                if let Some(token) = cancel {
                    token.check()?;
                }

                // Touch the package index so empty components still publish
                // an (empty) Packages/Sources file.
                indexes.package_index(component, &arch, false, false, &self.distribution);

                for pkg in list.iter_indexed() {
                    if !pkg.matches_architecture(&arch) {
                        continue;
                    }

                    let mut pkg = pkg.clone();

                    if !pkg.is_installer {
                        let rel_dir = format!("{}/{}", pool_rel, pkg.pool_directory()?);

                        if linked.insert(pkg.key("")) {
                            pkg.link_from_pool(
                                storage.as_ref(),
                                pool,
                                self.prefix_for_paths(),
                                &rel_dir,
                                force_overwrite,
                            )
                            .await?;
                        } else {
                            // Already linked for another architecture; point
                            // the stanza at the same published location.
                            let mut files = pkg.files().clone();
                            for f in &mut files.0 {
                                f.download_path = rel_dir.clone();
                            }
                            pkg.update_files(files);
                        }
                    }

                    if pkg.is_installer {
                        let index =
                            indexes.package_index(component, &arch, false, true, &self.distribution);
                        for line in pkg.installer_sum_lines() {
                            index.write_line(&line)?;
                        }
                    } else {
                        let stanza = pkg.stanza();
                        let canonical = if pkg.is_source {
                            CANONICAL_SOURCE
                        } else {
                            CANONICAL_BINARY
                        };
                        indexes
                            .package_index(
                                component,
                                &arch,
                                pkg.is_udeb,
                                false,
                                &self.distribution,
                            )
                            .write_stanza(&stanza, canonical)?;
                    }

                    // Contents accumulate per component and architecture.
                    if !self.skip_contents && arch != ARCHITECTURE_SOURCE && !pkg.is_installer {
                        if let Some(paths) = pkg.contents() {
                            let qualified = pkg.qualified_name();
                            let lines: Vec<String> = paths
                                .iter()
                                .map(|path| format!("{} {}", path, qualified))
                                .collect();

                            let index = indexes.contents_index(component, &arch, pkg.is_udeb);
                            for line in &lines {
                                index.write_line(line)?;
                            }
                        }
                    }
                }

                // Per-architecture Release file.
                let udebs_present = list.iter().any(|p| p.is_udeb);
                for udeb in [false, true] {
                    if udeb && (!udebs_present || arch == ARCHITECTURE_SOURCE) {
                        continue;
                    }

                    let mut release = Stanza::new();
                    release.set_field("Archive", self.distribution.clone());
                    release.set_field("Origin", self.origin_value());
                    if !self.label.is_empty() {
                        release.set_field("Label", self.label.clone());
                    }
                    release.set_field("Component", component.clone());
                    release.set_field("Architecture", arch.clone());
                    if self.acquire_by_hash {
                        release.set_field("Acquire-By-Hash", "yes");
                    }

                    let index = indexes.release_index(component, &arch, udeb);
                    // A Release stanza carries no trailing blank line.
                    release.write_to(index.writer()?, CANONICAL_RELEASE)?;
                }
            }
        }

        indexes.finalize_all(signer, cancel).await?;

        // Assemble the top-level Release.
        let mut release = Stanza::new();
        release.set_field("Origin", self.origin_value());
        release.set_field(
            "Label",
            if self.label.is_empty() {
                format!("{} {}", self.prefix, self.distribution)
            } else {
                self.label.clone()
            },
        );
        if !self.suite.is_empty() {
            release.set_field("Suite", self.suite.clone());
        }
        if !self.codename.is_empty() {
            release.set_field("Codename", self.codename.clone());
        }
        release.set_field(
            "Date",
            Utc::now().format("%a, %d %b %Y %H:%M:%S UTC").to_string(),
        );
        release.set_field("Architectures", self.architectures.join(" "));
        release.set_field("Components", self.components().join(" "));
        release.set_field("Description", "Generated by debian-archive".to_string());
        if self.acquire_by_hash {
            release.set_field("Acquire-By-Hash", "yes");
        }

        let generated = indexes.generated_files().clone();
        let sections: [(&str, fn(&crate::checksum::ChecksumInfo) -> &str); 4] = [
            ("MD5Sum", |c| c.md5.as_str()),
            ("SHA1", |c| c.sha1.as_str()),
            ("SHA256", |c| c.sha256.as_str()),
            ("SHA512", |c| c.sha512.as_str()),
        ];
        for (field, digest) in sections {
            let mut value = String::new();
            for (path, checksums) in &generated {
                let sum = digest(checksums);
                if sum.is_empty() {
                    continue;
                }
                value.push_str(&format!("\n{} {:>8} {}", sum, checksums.size, path));
            }
            if !value.is_empty() {
                release.set_field(field, value);
            }
        }

        let mut release_file = indexes.release_file();
        release.write_to(release_file.writer()?, CANONICAL_RELEASE)?;
        indexes.finalize_file(release_file, signer).await?;

        // Commit point.
        indexes.rename_files().await?;

        Ok(())
    }

    /// Pool-relative published paths referenced by one component.
    pub fn referenced_files_by_component(
        &self,
        component: &str,
        collection_factory: &CollectionFactory,
    ) -> Result<Vec<String>> {
        let package_collection = collection_factory.package_collection();
        let mut result = BTreeSet::new();

        let pool_rel = self.component_pool_path(component);

        self.ref_list(component).for_each(|key| {
            let mut pkg = package_collection.by_key(key)?;
            package_collection.load_files(&mut pkg)?;
            package_collection.load_extra(&mut pkg)?;
            package_collection.load_deps(&mut pkg)?;

            if pkg.is_installer {
                return Ok(());
            }

            let dir = pkg.pool_directory()?;
            for f in &pkg.files().0 {
                result.insert(format!("{}/{}/{}", pool_rel, dir, f.filename));
            }

            Ok(())
        })?;

        Ok(result.into_iter().collect())
    }

    /// Delete the published tree.
    ///
    /// Removes `dists/<distribution>`; pool contents shared with other
    /// publish points are left for [PublishedRepoCollection::cleanup].
    pub async fn remove_files(&self, provider: &dyn StorageProvider) -> Result<()> {
        let storage = provider.published_storage(&self.storage)?;
        storage.remove_dirs(&self.dists_path()).await
    }
}

impl std::fmt::Display for PublishedRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.storage_prefix(), self.distribution)?;
        if !self.origin.is_empty() || !self.label.is_empty() {
            write!(f, " (")?;
            if !self.origin.is_empty() {
                write!(f, "origin: {}", self.origin)?;
            }
            if !self.label.is_empty() {
                if !self.origin.is_empty() {
                    write!(f, ", ")?;
                }
                write!(f, "label: {}", self.label)?;
            }
            write!(f, ")")?;
        }
        write!(f, " [{}] publishes", self.architectures.join(", "))?;

        let mut first = true;
        for component in self.components() {
            let name = self
                .source_items
                .get(&component)
                .map(|item| item.name.clone())
                .unwrap_or_default();
            write!(
                f,
                "{} {{{}: [{}]}}",
                if first { "" } else { "," },
                component,
                name
            )?;
            first = false;
        }

        Ok(())
    }
}

fn guess_distribution(
    sources: &[PublishSource],
    collection_factory: &CollectionFactory,
) -> Result<String> {
    let mut guess = String::new();

    for source in sources {
        let candidate = match source {
            PublishSource::LocalRepo(repo) => repo.default_distribution.clone(),
            PublishSource::Snapshot(snapshot) => {
                snapshot_distribution(snapshot, collection_factory)?
            }
        };

        if !candidate.is_empty() {
            if !guess.is_empty() && guess != candidate {
                return Err(ArchiveError::DistributionUnknown);
            }
            guess = candidate;
        }
    }

    if guess.is_empty() {
        return Err(ArchiveError::DistributionUnknown);
    }

    Ok(guess)
}

/// Walk a snapshot's source chain looking for the originating mirror's
/// distribution.
fn snapshot_distribution(
    snapshot: &Snapshot,
    collection_factory: &CollectionFactory,
) -> Result<String> {
    match snapshot.source_kind.as_str() {
        crate::snapshot::SOURCE_KIND_REPO => {
            for uuid in &snapshot.source_ids {
                if let Ok(repo) = collection_factory.remote_repo_collection().by_uuid(uuid) {
                    return Ok(repo.distribution);
                }
            }
            Ok(String::new())
        }
        crate::snapshot::SOURCE_KIND_SNAPSHOT => {
            for uuid in &snapshot.source_ids {
                if let Ok(parent) = collection_factory.snapshot_collection().by_uuid(uuid) {
                    let guess = snapshot_distribution(&parent, collection_factory)?;
                    if !guess.is_empty() {
                        return Ok(guess);
                    }
                }
            }
            Ok(String::new())
        }
        _ => Ok(String::new()),
    }
}

/// Collection of published repositories.
pub struct PublishedRepoCollection {
    db: Arc<dyn Database>,
}

impl PublishedRepoCollection {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Persist the repository record and its per-component reference lists.
    pub fn add(&self, repo: &PublishedRepo) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(&repo.key(), &serde_json::to_vec(repo)?);

        for component in repo.components() {
            batch.put(
                &repo.ref_key(&component),
                &repo.ref_list(&component).encode(),
            );
        }

        self.db.write(batch)
    }

    pub fn update(&self, repo: &PublishedRepo) -> Result<()> {
        self.add(repo)
    }

    pub fn by_storage_prefix_distribution(
        &self,
        storage_prefix: &str,
        distribution: &str,
    ) -> Result<PublishedRepo> {
        let key = format!("U{}>>{}", storage_prefix, distribution).into_bytes();
        let data = self.db.get(&key)?.ok_or_else(|| {
            ArchiveError::NotFound(format!("published repo {}/{}", storage_prefix, distribution))
        })?;

        let mut repo: PublishedRepo = serde_json::from_slice(&data)?;
        self.load_ref_lists(&mut repo)?;

        Ok(repo)
    }

    pub fn list(&self) -> Result<Vec<PublishedRepo>> {
        self.db
            .scan_prefix(b"U")?
            .into_iter()
            .map(|(_, data)| {
                let mut repo: PublishedRepo = serde_json::from_slice(&data)?;
                self.load_ref_lists(&mut repo)?;
                Ok(repo)
            })
            .collect()
    }

    fn load_ref_lists(&self, repo: &mut PublishedRepo) -> Result<()> {
        for component in repo.components() {
            if let Some(data) = self.db.get(&repo.ref_key(&component))? {
                repo.set_ref_list(&component, PackageRefList::decode(&data)?);
            }
        }

        Ok(())
    }

    pub fn drop_entity(&self, repo: &PublishedRepo) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(&repo.key());
        for component in repo.components() {
            batch.delete(&repo.ref_key(&component));
        }

        self.db.write(batch)
    }

    /// Delete published pool files under `prefix` that no live published
    /// repository on the same storage references.
    ///
    /// References from multiple publish points sharing a source deduplicate
    /// naturally through the set union.
    pub async fn cleanup_prefix_pool_files(
        &self,
        storage_name: &str,
        prefix: &str,
        provider: &dyn StorageProvider,
        collection_factory: &CollectionFactory,
    ) -> Result<Vec<String>> {
        let mut referenced: BTreeSet<String> = BTreeSet::new();

        for repo in self.list()? {
            if repo.storage != storage_name || repo.prefix != prefix {
                continue;
            }
            for component in repo.components() {
                for path in repo.referenced_files_by_component(&component, collection_factory)? {
                    referenced.insert(path);
                }
            }
        }

        let storage = provider.published_storage(storage_name)?;
        let prefix_for_paths = if prefix == "." { "" } else { prefix };
        let pool_root = join_paths(&[prefix_for_paths, "pool"]);

        let mut removed = Vec::new();
        for file in storage.filelist(&pool_root).await? {
            let published = format!("pool/{}", file);
            if !referenced.contains(&published) {
                storage
                    .remove(&join_paths(&[prefix_for_paths, &published]))
                    .await?;
                removed.push(published);
            }
        }

        Ok(removed)
    }
}

/// Remove catalog packages (and their pool files) referenced by no mirror,
/// local repository, snapshot or published repository.
pub fn database_cleanup(
    collection_factory: &CollectionFactory,
    pool: &PackagePool,
) -> Result<(usize, usize)> {
    let db = collection_factory.database();

    // Every reference list lives under the `E` prefix.
    let mut referenced: HashSet<Vec<u8>> = HashSet::new();
    for (_, data) in db.scan_prefix(b"E")? {
        let refs = PackageRefList::decode(&data)?;
        for key in refs.iter() {
            referenced.insert(key.to_vec());
        }
    }

    let package_collection = collection_factory.package_collection();
    let mut packages_removed = 0;
    let mut files_removed = 0;

    for key in package_collection.all_keys()? {
        if referenced.contains(&key) {
            continue;
        }

        let mut pkg = package_collection.by_key(&key)?;
        package_collection.load_files(&mut pkg)?;

        for f in &pkg.files().0 {
            if let Ok(path) = f.pool_path(pool) {
                if pool.full_path(&path).exists() && pool.remove(&path).is_ok() {
                    files_removed += 1;
                }
            }
        }

        package_collection.delete(&key)?;
        packages_removed += 1;
    }

    Ok((packages_removed, files_removed))
}
