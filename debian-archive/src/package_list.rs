// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Lists of unique packages.

A [PackageList] is a set of packages keyed by package key. It backs snapshot
contents, mirror contents, filter results and merges. When indexed, the list
additionally maintains a sorted vector (name ascending, version descending,
architecture ascending) and a provides index, enabling dependency search.
*/

use {
    crate::{
        collection::PackageCollection,
        dependency::{dedup_dependencies, parse_dependency_variants, Dependency},
        error::{ArchiveError, Result},
        package::{Package, ARCHITECTURE_ALL, ARCHITECTURE_SOURCE},
        package_version::compare_versions,
        query::PackageQuery,
        ref_list::PackageRefList,
    },
    once_cell::sync::Lazy,
    regex::Regex,
    std::cmp::Ordering,
    std::collections::{HashMap, HashSet},
};

/// Dependency following options.
///
/// `DEP_FOLLOW_SOURCE` pulls source packages when required.
pub const DEP_FOLLOW_SOURCE: u32 = 1 << 0;
/// Pull from `Suggests:`.
pub const DEP_FOLLOW_SUGGESTS: u32 = 1 << 1;
/// Pull from `Recommends:`.
pub const DEP_FOLLOW_RECOMMENDS: u32 = 1 << 2;
/// Follow all variants of `a | b` dependencies.
pub const DEP_FOLLOW_ALL_VARIANTS: u32 = 1 << 3;
/// Pull build dependencies.
pub const DEP_FOLLOW_BUILD: u32 = 1 << 4;

/// Regular expression matching the `Source:` field of a binary package:
/// a source package name, optionally followed by a version in parentheses.
static SOURCE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([a-z0-9][-+.a-z0-9]+)(?:\s+\(([^)]+)\))?$").unwrap());

#[derive(Clone, Debug)]
struct IndexEntry {
    name: String,
    version: String,
    architecture: String,
    key: String,
}

fn index_order(a: &IndexEntry, b: &IndexEntry) -> Ordering {
    a.name
        .cmp(&b.name)
        // Latest version first.
        .then_with(|| compare_versions(&b.version, &a.version))
        .then_with(|| a.architecture.cmp(&b.architecture))
}

/// List of unique (by key) packages.
#[derive(Clone, Debug, Default)]
pub struct PackageList {
    packages: HashMap<String, Package>,
    packages_index: Vec<IndexEntry>,
    provides_index: HashMap<String, Vec<String>>,
    duplicates_allowed: bool,
    indexed: bool,
}

/// Options for [PackageList::filter].
#[derive(Default)]
pub struct FilterOptions<'a> {
    pub queries: Vec<PackageQuery>,
    pub with_dependencies: bool,
    /// Include source packages corresponding to binary packages.
    pub with_sources: bool,
    pub source: Option<&'a PackageList>,
    pub dependency_options: u32,
    pub architectures: Vec<String>,
}

impl PackageList {
    /// Create an empty list rejecting duplicate packages (keyed by short key).
    pub fn new() -> Self {
        Self::with_duplicates(false)
    }

    /// Create an empty list, optionally allowing duplicates (keyed by full
    /// key, so identical (arch, name, version) with differing files may
    /// coexist).
    pub fn with_duplicates(duplicates: bool) -> Self {
        Self {
            duplicates_allowed: duplicates,
            ..Default::default()
        }
    }

    /// Load a package list from a reference list, resolving every key
    /// through the catalog.
    pub fn from_ref_list(
        reflist: &PackageRefList,
        collection: &PackageCollection,
    ) -> Result<Self> {
        let mut result = Self::new();

        for key in reflist.iter() {
            let p = collection.by_key_complete(key).map_err(|e| {
                ArchiveError::ControlParse(format!(
                    "unable to load package with key {}: {}",
                    String::from_utf8_lossy(key),
                    e
                ))
            })?;
            result.add(p)?;
        }

        Ok(result)
    }

    fn key_for(&self, p: &Package) -> String {
        let key = if self.duplicates_allowed {
            p.key("")
        } else {
            p.short_key("")
        };

        String::from_utf8(key).expect("package keys are valid UTF-8")
    }

    /// Whether the package is already in the list.
    pub fn has(&self, p: &Package) -> bool {
        self.packages.contains_key(&self.key_for(p))
    }

    /// Number of packages in the list.
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Append a package, checking for uniqueness.
    ///
    /// Adding an equal package again is a no-op; adding a different package
    /// under an occupied key is a conflict.
    pub fn add(&mut self, p: Package) -> Result<()> {
        let key = self.key_for(&p);

        if let Some(existing) = self.packages.get(&key) {
            if !existing.equals(&p) {
                return Err(ArchiveError::PackageConflict(p.to_string()));
            }
            return Ok(());
        }

        if self.indexed {
            for provides in p.provided_packages() {
                self.provides_index
                    .entry(provides)
                    .or_default()
                    .push(key.clone());
            }

            let entry = IndexEntry {
                name: p.name.clone(),
                version: p.version.clone(),
                architecture: p.architecture.clone(),
                key: key.clone(),
            };
            let pos = self
                .packages_index
                .partition_point(|e| index_order(e, &entry) == Ordering::Less);
            self.packages_index.insert(pos, entry);
        }

        self.packages.insert(key, p);

        Ok(())
    }

    /// Add the contents of another list to this one.
    ///
    /// Panics when this list is indexed.
    pub fn append(&mut self, other: &PackageList) -> Result<()> {
        if self.indexed {
            panic!("append not supported when indexed");
        }

        for p in other.packages.values() {
            let key = self.key_for(p);
            if let Some(existing) = self.packages.get(&key) {
                if !existing.equals(p) {
                    return Err(ArchiveError::PackageConflict(p.to_string()));
                }
            } else {
                self.packages.insert(key, p.clone());
            }
        }

        Ok(())
    }

    /// Remove a package, updating indexes when present.
    pub fn remove(&mut self, p: &Package) {
        let key = self.key_for(p);
        if self.packages.remove(&key).is_none() {
            return;
        }

        if self.indexed {
            for provides in p.provided_packages() {
                if let Some(keys) = self.provides_index.get_mut(&provides) {
                    keys.retain(|k| k != &key);
                }
            }

            if let Some(pos) = self.packages_index.iter().position(|e| e.key == key) {
                self.packages_index.remove(pos);
            }
        }
    }

    /// Iterate over packages in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = &Package> {
        self.packages.values()
    }

    /// Iterate over packages in index order.
    ///
    /// Panics when the list is not indexed.
    pub fn iter_indexed(&self) -> impl Iterator<Item = &Package> {
        if !self.indexed {
            panic!("list not indexed, can't iterate");
        }

        self.packages_index
            .iter()
            .map(|e| &self.packages[&e.key])
    }

    /// Consume the list, yielding its packages.
    pub fn into_packages(self) -> impl Iterator<Item = Package> {
        self.packages.into_values()
    }

    /// Architectures present in the list.
    ///
    /// `all` never appears; `source` only when `include_source` is set.
    pub fn architectures(&self, include_source: bool) -> Vec<String> {
        let mut result = Vec::with_capacity(10);
        for p in self.packages.values() {
            if p.architecture != ARCHITECTURE_ALL
                && (p.architecture != ARCHITECTURE_SOURCE || include_source)
                && !result.contains(&p.architecture)
            {
                result.push(p.architecture.clone());
            }
        }

        result
    }

    /// Full keys of all packages.
    pub fn strings(&self) -> Vec<String> {
        self.packages
            .values()
            .map(|p| String::from_utf8(p.key("")).expect("keys are UTF-8"))
            .collect()
    }

    /// `{name}_{version}_{arch}` for all packages.
    pub fn full_names(&self) -> Vec<String> {
        self.packages.values().map(|p| p.full_name()).collect()
    }

    /// Prepare the search index. Idempotent.
    pub fn prepare_index(&mut self) {
        if self.indexed {
            return;
        }

        self.packages_index = self
            .packages
            .iter()
            .map(|(key, p)| IndexEntry {
                name: p.name.clone(),
                version: p.version.clone(),
                architecture: p.architecture.clone(),
                key: key.clone(),
            })
            .collect();
        self.packages_index.sort_by(index_order);

        self.provides_index = HashMap::with_capacity(128);
        for (key, p) in &self.packages {
            for provides in p.provided_packages() {
                self.provides_index
                    .entry(provides)
                    .or_default()
                    .push(key.clone());
            }
        }

        self.indexed = true;
    }

    /// Whether [Self::search] may be used.
    pub fn search_supported(&self) -> bool {
        self.indexed
    }

    /// Evaluate a query by scanning all packages.
    pub fn scan(&self, q: &PackageQuery) -> PackageList {
        let mut result = PackageList::with_duplicates(self.duplicates_allowed);
        for p in self.packages.values() {
            if q.matches(p) {
                let _ = result.add(p.clone());
            }
        }

        result
    }

    /// Look up a package by its exact (arch, name, version) triple.
    pub fn search_by_key(&self, arch: &str, name: &str, version: &str) -> PackageList {
        let mut result = PackageList::with_duplicates(self.duplicates_allowed);

        if self.duplicates_allowed {
            let prefix = format!("P{} {} {} ", arch, name, version);
            for (key, p) in &self.packages {
                if key.starts_with(&prefix) {
                    let _ = result.add(p.clone());
                }
            }
        } else if let Some(p) = self
            .packages
            .get(&format!("P{} {} {}", arch, name, version))
        {
            let _ = result.add(p.clone());
        }

        result
    }

    /// Search the index for packages satisfying the dependency.
    ///
    /// Walks the name run in the sorted index, then (when `search_provided`)
    /// the provides index. Returns after the first match unless `all_matches`
    /// is set. Searching by bare name yields the highest version first, a
    /// consequence of the index ordering.
    ///
    /// Panics when the list is not indexed.
    pub fn search(&self, dep: &Dependency, all_matches: bool, search_provided: bool) -> Vec<&Package> {
        if !self.indexed {
            panic!("list not indexed, can't search");
        }

        let mut results: Vec<&Package> = Vec::new();

        let start = self
            .packages_index
            .partition_point(|e| e.name.as_str() < dep.pkg.as_str());

        for entry in &self.packages_index[start..] {
            if entry.name != dep.pkg {
                break;
            }

            let p = &self.packages[&entry.key];
            if p.matches_dependency(dep) {
                results.push(p);

                if !all_matches {
                    return results;
                }
            }
        }

        if search_provided {
            if let Some(keys) = self.provides_index.get(&dep.pkg) {
                for key in keys {
                    let p = &self.packages[key];
                    if dep.architecture.is_empty() || p.matches_architecture(&dep.architecture) {
                        if p.matches_dependency(dep) {
                            results.push(p);
                        }

                        if !all_matches && !results.is_empty() {
                            return results;
                        }
                    }
                }
            }
        }

        results
    }

    /// Look for missing dependencies in the list.
    ///
    /// Analysis is performed per architecture, resolving against `sources`.
    /// Both this list and `sources` must be indexed.
    pub fn verify_dependencies(
        &self,
        options: u32,
        architectures: &[String],
        sources: &PackageList,
    ) -> Result<Vec<Dependency>> {
        if !self.indexed {
            panic!("list not indexed, can't verify dependencies");
        }

        if architectures.is_empty() {
            return Err(ArchiveError::NoArchitectures);
        }

        let mut missing = Vec::with_capacity(128);

        for arch in architectures {
            let mut cache: HashMap<String, bool> = HashMap::with_capacity(2048);

            for entry in &self.packages_index {
                let p = &self.packages[&entry.key];

                if !p.matches_architecture(arch) {
                    continue;
                }

                for dep_str in p.get_dependencies(options) {
                    let variants = parse_dependency_variants(&dep_str).map_err(|e| {
                        ArchiveError::PackageProcessing(p.to_string(), Box::new(e))
                    })?;
                    let variants = dedup_dependencies(variants);

                    let mut variants_missing = Vec::with_capacity(variants.len());

                    for mut dep in variants {
                        if dep.architecture.is_empty() {
                            dep.architecture = arch.clone();
                        }

                        let hash = dep.hash_key();
                        let satisfied = match cache.get(&hash) {
                            Some(v) => *v,
                            None => {
                                let v = !sources.search(&dep, false, true).is_empty();
                                cache.insert(hash, v);
                                v
                            }
                        };

                        if !satisfied {
                            variants_missing.push(dep);
                        } else if options & DEP_FOLLOW_ALL_VARIANTS == 0 {
                            variants_missing.clear();
                            break;
                        }
                    }

                    missing.extend(variants_missing);
                }
            }
        }

        Ok(dedup_dependencies(missing))
    }

    /// Filter the list by queries (ORed together), optionally pulling
    /// corresponding source packages and transitive dependencies.
    ///
    /// Panics when the list is not indexed.
    pub fn filter(&self, options: FilterOptions<'_>) -> Result<PackageList> {
        if !self.indexed {
            panic!("list not indexed, can't filter");
        }

        let mut result = PackageList::new();

        for query in &options.queries {
            result.append(&query.query(self))?;
        }

        // The queries above already find source packages named equal to
        // their binary package; account for those named differently.
        if options.with_sources {
            let mut source_queries = Vec::new();

            for p in result.packages.values() {
                if p.source.is_empty() {
                    continue;
                }

                let captures = SOURCE_REGEX
                    .captures(&p.source)
                    .ok_or_else(|| ArchiveError::InvalidSourceField(p.source.clone()))?;

                let source_name = captures.get(1).expect("group 1 always present").as_str();
                if source_name == p.name {
                    continue;
                }

                let source_version = captures
                    .get(2)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_else(|| p.version.clone());

                source_queries.push(PackageQuery::Dependency(Dependency {
                    pkg: source_name.to_string(),
                    relation: Some(crate::dependency::VersionRelation::Equal),
                    version: source_version,
                    architecture: ARCHITECTURE_SOURCE.to_string(),
                    regexp: None,
                }));
            }

            for query in &source_queries {
                result.append(&query.query(self))?;
            }
        }

        if options.with_dependencies {
            let mut added = result.len();
            result.prepare_index();

            let mut dependency_source = PackageList::new();
            if let Some(source) = options.source {
                dependency_source.append(source)?;
            }
            dependency_source.append(&result)?;
            dependency_source.prepare_index();

            // Loop while new dependencies are discovered.
            while added > 0 {
                added = 0;

                let missing = result.verify_dependencies(
                    options.dependency_options,
                    &options.architectures,
                    &dependency_source,
                )?;

                for dep in missing {
                    if options.dependency_options & DEP_FOLLOW_ALL_VARIANTS == 0 {
                        // The dependency might have been satisfied by a
                        // package added in this round. With
                        // follow-all-variants, expansion continues anyway:
                        // there may be other ways to satisfy it.
                        if !result.search(&dep, false, true).is_empty() {
                            continue;
                        }
                    }

                    let candidates = self
                        .search(&dep, true, true)
                        .into_iter()
                        .cloned()
                        .collect::<Vec<_>>();
                    if candidates.is_empty() {
                        log::debug!("unsatisfied dependency: {}", dep);
                        continue;
                    }

                    for p in candidates {
                        if result.has(&p) {
                            continue;
                        }

                        result.add(p.clone())?;
                        dependency_source.add(p)?;
                        added += 1;
                        if options.dependency_options & DEP_FOLLOW_ALL_VARIANTS == 0 {
                            break;
                        }
                    }
                }
            }
        }

        Ok(result)
    }

    /// Ensure every package's heavyweight attributes are loaded.
    pub fn load_complete(&mut self, collection: &PackageCollection) -> Result<()> {
        for p in self.packages.values_mut() {
            collection.load_complete(p)?;
        }

        Ok(())
    }
}

/// Build a reference list capturing the current contents of a package list.
pub fn ref_list_from_package_list(list: &PackageList) -> PackageRefList {
    let mut refs: Vec<Vec<u8>> = list.iter().map(|p| p.key("")).collect();
    refs.sort();
    PackageRefList::from_refs(refs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::Stanza;
    use crate::dependency::parse_dependency;
    use crate::package::PackageDependencies;

    fn simple(name: &str, version: &str, arch: &str) -> Package {
        Package {
            name: name.into(),
            version: version.into(),
            architecture: arch.into(),
            deps: Some(PackageDependencies::default()),
            extra: Some(Stanza::new()),
            ..Default::default()
        }
    }

    fn with_deps(mut p: Package, pre: &[&str], depends: &[&str]) -> Package {
        p.deps = Some(PackageDependencies {
            pre_depends: pre.iter().map(|s| s.to_string()).collect(),
            depends: depends.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        });
        p
    }

    fn with_provides(mut p: Package, provides: &[&str]) -> Package {
        p.provides = provides.iter().map(|s| s.to_string()).collect();
        p
    }

    fn with_source(mut p: Package, source: &str) -> Package {
        p.source = source.into();
        p
    }

    fn source_pkg(name: &str, version: &str) -> Package {
        let mut p = simple(name, version, ARCHITECTURE_SOURCE);
        p.source_architecture = "any".into();
        p.is_source = true;
        p
    }

    /// The fixture list mirroring a small mixed-architecture universe.
    fn fixture() -> (PackageList, Vec<Package>) {
        let packages = vec![
            with_source(
                with_deps(simple("lib", "1.0", "i386"), &["dpkg (>= 1.6)"], &["mail-agent"]),
                "lib (0.9)",
            ),
            with_provides(simple("dpkg", "1.7", "i386"), &["package-installer"]),
            with_source(
                with_deps(simple("data", "1.1~bp1", "all"), &["dpkg (>= 1.6)"], &[]),
                "app",
            ),
            with_deps(
                simple("app", "1.1~bp1", "i386"),
                &["dpkg (>= 1.6)"],
                &["lib (>> 0.9)", "data (>= 1.0)"],
            ),
            with_source(
                with_provides(simple("mailer", "3.5.8", "i386"), &["mail-agent"]),
                "postfix (1.3)",
            ),
            with_deps(
                simple("app", "1.1~bp1", "amd64"),
                &["dpkg (>= 1.6)"],
                &["lib (>> 0.9)", "data (>= 1.0)"],
            ),
            with_deps(
                simple("app", "1.1~bp1", "arm"),
                &["dpkg (>= 1.6)"],
                &["lib (>> 0.9) | libx (>= 1.5)", "data (>= 1.0) | mail-agent"],
            ),
            with_deps(
                simple("app", "1.0", "s390"),
                &["dpkg >= 1.6)"],
                &["lib (>> 0.9)", "data (>= 1.0)"],
            ),
            with_deps(simple("aa", "2.0-1", "i386"), &["dpkg (>= 1.6)"], &[]),
            with_provides(simple("dpkg", "1.6.1-3", "amd64"), &["package-installer"]),
            with_deps(simple("libx", "1.5", "arm"), &["dpkg (>= 1.6)"], &[]),
            with_provides(simple("dpkg", "1.6.1-3", "arm"), &["package-installer"]),
            source_pkg("dpkg", "1.6.1-3"),
            source_pkg("dpkg", "1.7"),
        ];

        let mut list = PackageList::new();
        for p in &packages {
            list.add(p.clone()).unwrap();
        }
        list.prepare_index();

        (list, packages)
    }

    fn source_packages() -> Vec<Package> {
        vec![
            source_pkg("postfix", "1.3"),
            source_pkg("app", "1.1~bp1"),
            source_pkg("aa", "2.0-1"),
            source_pkg("lib", "0.9"),
        ]
    }

    fn names_sorted(list: &PackageList) -> String {
        let mut names = list.full_names();
        names.sort();
        names.join(" ")
    }

    #[test]
    fn add_len_conflict() {
        let mut list = PackageList::new();
        assert_eq!(list.len(), 0);

        let p1 = simple("alien-arena-common", "7.40-2", "i386");
        list.add(p1.clone()).unwrap();
        assert_eq!(list.len(), 1);

        // Equal add is a no-op.
        list.add(p1.clone()).unwrap();
        assert_eq!(list.len(), 1);

        list.add(simple("mars-invaders", "7.40-2", "i386")).unwrap();
        assert_eq!(list.len(), 2);

        let different = with_source(simple("alien-arena-common", "7.40-2", "i386"), "unknown-planet");
        assert!(matches!(
            list.add(different),
            Err(ArchiveError::PackageConflict(_))
        ));
    }

    #[test]
    fn remove() {
        let mut list = PackageList::new();
        let p1 = simple("a", "1.0", "i386");
        let p2 = simple("b", "1.0", "i386");
        list.add(p1.clone()).unwrap();
        list.add(p2).unwrap();
        assert_eq!(list.len(), 2);

        list.remove(&p1);
        assert_eq!(list.len(), 1);
        assert!(!list.has(&p1));
    }

    #[test]
    fn add_when_indexed() {
        let mut list = PackageList::new();
        list.prepare_index();

        list.add(with_provides(simple("a1st", "1.0", "i386"), &["fa", "fb"]))
            .unwrap();
        list.add(with_provides(simple("c3rd", "1.0", "i386"), &["fa"]))
            .unwrap();
        list.add(simple("b2nd", "1.0", "i386")).unwrap();

        let names = list.iter_indexed().map(|p| p.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["a1st", "b2nd", "c3rd"]);

        let fa = list
            .search(&parse_dependency("fa").unwrap(), true, true)
            .iter()
            .map(|p| p.name.clone())
            .collect::<Vec<_>>();
        assert_eq!(fa, vec!["a1st", "c3rd"]);
    }

    #[test]
    fn remove_when_indexed() {
        let (mut list, packages) = fixture();

        list.remove(&packages[4]);
        assert!(list
            .search(&parse_dependency("mail-agent").unwrap(), true, true)
            .is_empty());

        list.remove(&packages[9]);
        let installers = list.search(&parse_dependency("package-installer").unwrap(), true, true);
        assert_eq!(installers.len(), 2);
    }

    #[test]
    fn index_ordering() {
        let (list, _) = fixture();

        let ordered = list
            .iter_indexed()
            .map(|p| p.full_name())
            .collect::<Vec<_>>();

        // Name ascending; within a name version descending, then arch.
        assert_eq!(ordered[0], "aa_2.0-1_i386");
        let dpkg = ordered
            .iter()
            .filter(|n| n.starts_with("dpkg"))
            .collect::<Vec<_>>();
        assert_eq!(
            dpkg,
            vec![
                "dpkg_1.7_i386",
                "dpkg_1.7_source",
                "dpkg_1.6.1-3_amd64",
                "dpkg_1.6.1-3_arm",
                "dpkg_1.6.1-3_source"
            ]
        );
    }

    #[test]
    fn search_matrix() {
        let (list, packages) = fixture();

        let dep = |s: &str| parse_dependency(s).unwrap();

        let found = list.search(&dep("app [i386]"), false, true);
        assert_eq!(found.len(), 1);
        assert!(found[0].equals(&packages[3]));

        // Provided package search.
        let found = list.search(&dep("mail-agent [i386]"), false, true);
        assert!(found[0].equals(&packages[4]));

        assert!(list.search(&dep("puppy [i386]"), false, true).is_empty());

        assert!(!list.search(&dep("app (= 1.1~bp1) [i386]"), false, true).is_empty());
        assert!(list.search(&dep("app (= 1.1~bp2) [i386]"), false, true).is_empty());
        assert!(!list.search(&dep("app (<< 1.1) [i386]"), false, true).is_empty());
        assert!(list.search(&dep("app (<< 1.1~~) [i386]"), false, true).is_empty());
        assert!(!list.search(&dep("app (>= 1.0) [i386]"), false, true).is_empty());
        assert!(list.search(&dep("app (>> 1.2) [i386]"), false, true).is_empty());

        // Search without version returns the highest version.
        let found = list.search(&dep("dpkg [source]"), false, true);
        assert_eq!(found[0].version, "1.7");

        // allMatches = true.
        let found = list.search(&dep("app"), true, true);
        assert_eq!(found.len(), 4);
    }

    #[test]
    fn search_panics_unindexed() {
        let list = PackageList::new();
        let result = std::panic::catch_unwind(|| {
            list.search(&parse_dependency("app").unwrap(), false, true)
        });
        assert!(result.is_err());
    }

    #[test]
    fn verify_dependencies_cases() {
        let (list, _) = fixture();

        let missing = list
            .verify_dependencies(0, &["i386".to_string()], &list)
            .unwrap();
        assert!(missing.is_empty());

        let missing = list
            .verify_dependencies(0, &["i386".to_string(), "amd64".to_string()], &list)
            .unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].pkg, "lib");
        assert_eq!(missing[0].architecture, "amd64");

        let missing = list
            .verify_dependencies(0, &["arm".to_string()], &list)
            .unwrap();
        assert!(missing.is_empty());

        // All variants are reported when requested.
        let missing = list
            .verify_dependencies(DEP_FOLLOW_ALL_VARIANTS, &["arm".to_string()], &list)
            .unwrap();
        let missing_names = missing.iter().map(|d| d.pkg.clone()).collect::<Vec<_>>();
        assert_eq!(missing_names, vec!["lib", "mail-agent"]);

        // No architectures is an error.
        assert!(matches!(
            list.verify_dependencies(0, &[], &list),
            Err(ArchiveError::NoArchitectures)
        ));

        // Malformed dependency of app_1.0_s390 surfaces.
        let archs = vec!["i386".to_string(), "amd64".to_string(), "s390".to_string()];
        assert!(matches!(
            list.verify_dependencies(0, &archs, &list),
            Err(ArchiveError::PackageProcessing(_, _))
        ));
    }

    #[test]
    fn verify_dependencies_follow_source() {
        let (mut list, _) = fixture();
        for p in source_packages() {
            list.add(p).unwrap();
        }

        let missing = list
            .verify_dependencies(
                DEP_FOLLOW_SOURCE,
                &["i386".to_string(), "amd64".to_string()],
                &list,
            )
            .unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].pkg, "lib");

        let missing = list
            .verify_dependencies(DEP_FOLLOW_SOURCE, &["arm".to_string()], &list)
            .unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].pkg, "libx");
        assert_eq!(missing[0].architecture, ARCHITECTURE_SOURCE);
    }

    #[test]
    fn filter_queries() {
        let (list, _) = fixture();

        let result = list
            .filter(FilterOptions {
                queries: vec![PackageQuery::Pkg {
                    name: "app".into(),
                    version: "1.1~bp1".into(),
                    architecture: "i386".into(),
                }],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(names_sorted(&result), "app_1.1~bp1_i386");

        let result = list
            .filter(FilterOptions {
                queries: vec![
                    PackageQuery::Dependency(parse_dependency("app").unwrap()),
                    PackageQuery::Dependency(parse_dependency("dpkg (>> 1.6.1-3)").unwrap()),
                    PackageQuery::Dependency(parse_dependency("xyz").unwrap()),
                ],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(
            names_sorted(&result),
            "app_1.0_s390 app_1.1~bp1_amd64 app_1.1~bp1_arm app_1.1~bp1_i386 dpkg_1.7_i386 dpkg_1.7_source"
        );
    }

    #[test]
    fn filter_with_dependencies() {
        let (list, _) = fixture();

        let result = list
            .filter(FilterOptions {
                queries: vec![PackageQuery::Dependency(
                    parse_dependency("app [i386]").unwrap(),
                )],
                with_dependencies: true,
                architectures: vec!["i386".to_string()],
                ..Default::default()
            })
            .unwrap();

        assert_eq!(
            names_sorted(&result),
            "app_1.1~bp1_i386 data_1.1~bp1_all dpkg_1.7_i386 lib_1.0_i386 mailer_3.5.8_i386"
        );
    }

    #[test]
    fn filter_composites() {
        let (list, _) = fixture();

        let result = list
            .filter(FilterOptions {
                queries: vec![PackageQuery::Or(
                    Box::new(PackageQuery::Pkg {
                        name: "app".into(),
                        version: "1.1~bp1".into(),
                        architecture: "i386".into(),
                    }),
                    Box::new(PackageQuery::Field {
                        field: "$Architecture".into(),
                        relation: Some(crate::dependency::VersionRelation::Equal),
                        value: "s390".into(),
                        regexp: None,
                    }),
                )],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(
            names_sorted(&result),
            "app_1.0_s390 app_1.1~bp1_i386 data_1.1~bp1_all"
        );

        let result = list
            .filter(FilterOptions {
                queries: vec![PackageQuery::Not(Box::new(PackageQuery::Field {
                    field: "$Architecture".into(),
                    relation: Some(crate::dependency::VersionRelation::PatternMatch),
                    value: "i*6".into(),
                    regexp: None,
                }))],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(
            names_sorted(&result),
            "app_1.0_s390 app_1.1~bp1_amd64 app_1.1~bp1_arm data_1.1~bp1_all dpkg_1.6.1-3_amd64 dpkg_1.6.1-3_arm dpkg_1.6.1-3_source dpkg_1.7_source libx_1.5_arm"
        );
    }

    #[test]
    fn filter_with_sources() {
        let (mut list, _) = fixture();
        for p in source_packages() {
            list.add(p).unwrap();
        }
        list.prepare_index();

        // Source package with a version differing from the binary.
        let result = list
            .filter(FilterOptions {
                queries: vec![PackageQuery::Dependency(parse_dependency("lib").unwrap())],
                with_sources: true,
                architectures: vec!["i386".to_string(), "amd64".to_string()],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(names_sorted(&result), "lib_0.9_source lib_1.0_i386");

        // Source package named differently from the binary.
        let mut list = list;
        list.add(source_pkg("glibc", "1.0")).unwrap();
        list.add(with_source(simple("libc1", "1.0", "i386"), "glibc"))
            .unwrap();

        let result = list
            .filter(FilterOptions {
                queries: vec![PackageQuery::Dependency(parse_dependency("libc1").unwrap())],
                with_sources: true,
                architectures: vec!["i386".to_string()],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(names_sorted(&result), "glibc_1.0_source libc1_1.0_i386");
    }

    #[test]
    fn architectures_listing() {
        let (list, _) = fixture();

        let mut archs = list.architectures(true);
        archs.sort();
        assert_eq!(archs, vec!["amd64", "arm", "i386", "s390", "source"]);

        let mut archs = list.architectures(false);
        archs.sort();
        assert_eq!(archs, vec!["amd64", "arm", "i386", "s390"]);
    }

    #[test]
    fn append_panics_when_indexed() {
        let (list, _) = fixture();
        let mut indexed = PackageList::new();
        indexed.prepare_index();

        let result = std::panic::catch_unwind(move || {
            let _ = indexed.append(&list);
        });
        assert!(result.is_err());
    }
}
