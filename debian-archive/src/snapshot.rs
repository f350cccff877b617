// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Snapshots.

A snapshot freezes the contents of a mirror, a local repository or a
computation over other snapshots into an immutable reference list. Only the
descriptive metadata of a snapshot may change after creation.
*/

use {
    crate::{
        error::Result,
        local_repo::LocalRepo,
        package_list::{
            ref_list_from_package_list, FilterOptions, PackageList, DEP_FOLLOW_ALL_VARIANTS,
        },
        package_version::compare_versions,
        query::PackageQuery,
        ref_list::PackageRefList,
        remote_repo::RemoteRepo,
    },
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::cmp::Ordering,
    uuid::Uuid,
};

/// What a snapshot was created from.
pub const SOURCE_KIND_REPO: &str = "repo";
pub const SOURCE_KIND_LOCAL: &str = "local";
pub const SOURCE_KIND_SNAPSHOT: &str = "snapshot";

/// An immutable set of package references.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub uuid: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub description: String,
    pub source_kind: String,
    pub source_ids: Vec<String>,

    #[serde(skip)]
    package_refs: Option<PackageRefList>,
}

impl Snapshot {
    /// Freeze the current contents of a mirror.
    pub fn from_repo(name: impl Into<String>, repo: &RemoteRepo) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            name: name.into(),
            created_at: Utc::now(),
            description: format!("Snapshot from mirror {}", repo),
            source_kind: SOURCE_KIND_REPO.to_string(),
            source_ids: vec![repo.uuid.clone()],
            package_refs: Some(repo.ref_list()),
        }
    }

    /// Freeze the current contents of a local repository.
    pub fn from_local_repo(name: impl Into<String>, repo: &LocalRepo) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            name: name.into(),
            created_at: Utc::now(),
            description: format!("Snapshot from local repo {}", repo),
            source_kind: SOURCE_KIND_LOCAL.to_string(),
            source_ids: vec![repo.uuid.clone()],
            package_refs: Some(repo.ref_list()),
        }
    }

    /// Create from a raw reference list.
    pub fn from_ref_list(
        name: impl Into<String>,
        sources: &[&Snapshot],
        refs: PackageRefList,
        description: impl Into<String>,
    ) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            name: name.into(),
            created_at: Utc::now(),
            description: description.into(),
            source_kind: SOURCE_KIND_SNAPSHOT.to_string(),
            source_ids: sources.iter().map(|s| s.uuid.clone()).collect(),
            package_refs: Some(refs),
        }
    }

    /// Merge the contents of several snapshots into a new one.
    ///
    /// Sources are merged left to right with the reference-list collision
    /// rules: `override_matching` makes later sources win on matching
    /// packages, `ignore_conflicting` keeps the earliest reference.
    pub fn merge(
        name: impl Into<String>,
        sources: &[&Snapshot],
        override_matching: bool,
        ignore_conflicting: bool,
    ) -> Self {
        let mut refs = PackageRefList::new();
        for source in sources {
            refs = refs.merge(&source.ref_list(), override_matching, ignore_conflicting);
        }

        let names = sources
            .iter()
            .map(|s| format!("'{}'", s.name))
            .collect::<Vec<_>>()
            .join(", ");

        Self::from_ref_list(
            name,
            sources,
            refs,
            format!("Merged from sources: {}", names),
        )
    }

    pub fn key(&self) -> Vec<u8> {
        format!("S{}", self.uuid).into_bytes()
    }

    pub fn ref_key(&self) -> Vec<u8> {
        format!("E{}", self.uuid).into_bytes()
    }

    pub fn ref_list(&self) -> PackageRefList {
        self.package_refs.clone().unwrap_or_default()
    }

    pub fn has_ref_list(&self) -> bool {
        self.package_refs.is_some()
    }

    pub fn set_ref_list(&mut self, refs: PackageRefList) {
        self.package_refs = Some(refs);
    }

    pub fn num_packages(&self) -> usize {
        self.package_refs.as_ref().map(|r| r.len()).unwrap_or(0)
    }
}

impl std::fmt::Display for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]: {}", self.name, self.description)
    }
}

/// Options for [pull].
#[derive(Default)]
pub struct PullOptions {
    /// Follow dependencies of matched packages.
    pub with_dependencies: bool,
    /// `DEP_FOLLOW_*` flags for dependency traversal.
    pub dependency_options: u32,
    /// Keep all matching candidates instead of replacing existing packages.
    pub all_matches: bool,
}

/// Pull packages matching `queries` (and optionally their dependency
/// closure) from `source` into `target`, producing the new contents.
///
/// Candidates replace target packages with the same name and architecture;
/// ambiguities resolve to the highest version. Under
/// `DEP_FOLLOW_ALL_VARIANTS` every candidate variant is kept.
pub fn pull(
    source: &PackageList,
    target: &PackageList,
    queries: Vec<PackageQuery>,
    architectures: &[String],
    options: &PullOptions,
) -> Result<(PackageList, PackageRefList)> {
    let candidates = source.filter(FilterOptions {
        queries,
        with_dependencies: options.with_dependencies,
        source: Some(target),
        dependency_options: options.dependency_options,
        architectures: architectures.to_vec(),
        ..Default::default()
    })?;

    let follow_all = options.dependency_options & DEP_FOLLOW_ALL_VARIANTS != 0;

    // Resolve ambiguities: a single candidate per (name, architecture),
    // preferring the highest version, unless variants are followed broadly.
    let mut chosen: Vec<crate::package::Package> = Vec::new();
    for candidate in candidates.into_packages() {
        if follow_all || options.all_matches {
            chosen.push(candidate);
            continue;
        }

        match chosen
            .iter_mut()
            .find(|p| p.name == candidate.name && p.architecture == candidate.architecture)
        {
            Some(existing) => {
                if compare_versions(&candidate.version, &existing.version) == Ordering::Greater {
                    *existing = candidate;
                }
            }
            None => chosen.push(candidate),
        }
    }

    let mut result = PackageList::new();
    result.append(target)?;

    let mut added = PackageList::new();

    for candidate in chosen {
        let stale: Vec<_> = result
            .iter()
            .filter(|p| {
                p.name == candidate.name
                    && p.architecture == candidate.architecture
                    && !p.equals(&candidate)
            })
            .cloned()
            .collect();
        for p in stale {
            result.remove(&p);
        }

        if !result.has(&candidate) {
            added.add(candidate.clone())?;
        }
        result.add(candidate)?;
    }

    let refs = ref_list_from_package_list(&result);

    Ok((added, refs))
}
