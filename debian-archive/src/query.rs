// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Package queries.

Queries select packages out of a [crate::package_list::PackageList]. The
supported shapes are an exact `(name, version, architecture)` triple, a
dependency expression (which consults the list's search index, including
provides), field predicates over stanza fields and the virtual fields
`$Source`, `$SourceVersion`, `$Architecture` and `$PackageType`, and the
`And`/`Or`/`Not` composites.
*/

use {
    crate::{
        dependency::{version_satisfies, Dependency, VersionRelation},
        package::Package,
        package_list::PackageList,
        package_version::compare_versions,
    },
    std::cmp::Ordering,
};

/// A query over a package list.
#[derive(Clone, Debug)]
pub enum PackageQuery {
    /// Exact (name, version, architecture) triple.
    Pkg {
        name: String,
        version: String,
        architecture: String,
    },
    /// Dependency expression, evaluated through the search index.
    Dependency(Dependency),
    And(Box<PackageQuery>, Box<PackageQuery>),
    Or(Box<PackageQuery>, Box<PackageQuery>),
    Not(Box<PackageQuery>),
    /// Predicate over a stanza field or virtual field.
    Field {
        field: String,
        relation: Option<VersionRelation>,
        value: String,
        regexp: Option<regex::Regex>,
    },
}

impl PackageQuery {
    /// Whether the package matches this query.
    pub fn matches(&self, pkg: &Package) -> bool {
        match self {
            Self::Pkg {
                name,
                version,
                architecture,
            } => {
                pkg.name == *name && pkg.version == *version && pkg.architecture == *architecture
            }
            Self::Dependency(dep) => pkg.matches_dependency(dep),
            Self::And(a, b) => a.matches(pkg) && b.matches(pkg),
            Self::Or(a, b) => a.matches(pkg) || b.matches(pkg),
            Self::Not(q) => !q.matches(pkg),
            Self::Field {
                field,
                relation,
                value,
                regexp,
            } => {
                let field_value = pkg.get_field(field);

                match relation.unwrap_or(VersionRelation::DontCare) {
                    VersionRelation::DontCare => !field_value.is_empty(),
                    VersionRelation::Equal => field_value == *value,
                    VersionRelation::Less => {
                        compare_versions(&field_value, value) == Ordering::Less
                    }
                    VersionRelation::Greater => {
                        compare_versions(&field_value, value) == Ordering::Greater
                    }
                    VersionRelation::LessOrEqual => {
                        compare_versions(&field_value, value) != Ordering::Greater
                    }
                    VersionRelation::GreaterOrEqual => {
                        compare_versions(&field_value, value) != Ordering::Less
                    }
                    VersionRelation::PatternMatch => {
                        let dep = Dependency {
                            pkg: String::new(),
                            relation: Some(VersionRelation::PatternMatch),
                            version: value.clone(),
                            ..Default::default()
                        };
                        version_satisfies(&field_value, &dep)
                    }
                    VersionRelation::Regexp => regexp
                        .as_ref()
                        .map(|re| re.is_match(&field_value))
                        .unwrap_or(false),
                }
            }
        }
    }

    /// Evaluate the query against an indexed list, producing a new list.
    pub fn query(&self, list: &PackageList) -> PackageList {
        match self {
            Self::Pkg {
                name,
                version,
                architecture,
            } => list.search_by_key(architecture, name, version),
            Self::Dependency(dep) => {
                let mut result = PackageList::new();
                for pkg in list.search(dep, true, true) {
                    let _ = result.add(pkg.clone());
                }
                result
            }
            Self::And(a, b) => {
                let mut result = PackageList::new();
                for pkg in a.query(list).into_packages() {
                    if b.matches(&pkg) {
                        let _ = result.add(pkg);
                    }
                }
                result
            }
            Self::Or(a, b) => {
                let mut result = a.query(list);
                let _ = result.append(&b.query(list));
                result
            }
            _ => list.scan(self),
        }
    }
}
