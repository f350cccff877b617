// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Package dependency syntax handling.

See <https://www.debian.org/doc/debian-policy/ch-relationships.html> for the
specification of the dependency meta language.

A dependency item is `name[:arch] [(rel version)]` with
`rel ∈ {<<, <=, =, >=, >>}` (legacy `<` and `>` are accepted as `<<` and
`>>`). Alternatives within one requirement are separated by `|`. Two extra
relations exist for query evaluation only: glob pattern match and regular
expression match.
*/

use {
    crate::{error::{ArchiveError, Result}, package_version::compare_versions},
    once_cell::sync::Lazy,
    regex::Regex,
    std::{
        cmp::Ordering,
        fmt::{Display, Formatter},
    },
};

/// Regular expression to parse dependency expressions.
static RE_DEPENDENCY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?x)
        ^
        # Package name terminates at whitespace, colon, ( [ or {.
        (?P<package>[^\s:(\[{]+)
        # Optional colon-qualified architecture.
        (?::(?P<colonarch>[^\s(\[{]+))?
        \s*
        # Optional version restriction in parenthesis. A bare version with
        # no operator means exact equality.
        (?:\(
            \s*
            (?P<relop>(<<|<=|=|>=|>>|<|>))?
            \s*
            (?P<version>[^\s)]+)
            \s*
        \))?
        \s*
        # Optional architecture restriction, [arch] or the internal {arch}.
        (?:
            \[\s*(?P<brackarch>[^\]]+?)\s*\] |
            \{\s*(?P<bracearch>[^}]+?)\s*\}
        )?
        \s*
        $
        "#,
    )
    .unwrap()
});

/// Relation between a package version and a dependency's version operand.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum VersionRelation {
    Equal,
    Less,
    Greater,
    LessOrEqual,
    GreaterOrEqual,
    PatternMatch,
    Regexp,
    DontCare,
}

impl Display for VersionRelation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Equal => write!(f, "="),
            Self::Less => write!(f, "<<"),
            Self::Greater => write!(f, ">>"),
            Self::LessOrEqual => write!(f, "<="),
            Self::GreaterOrEqual => write!(f, ">="),
            Self::PatternMatch => write!(f, "%"),
            Self::Regexp => write!(f, "~"),
            Self::DontCare => Ok(()),
        }
    }
}

/// A single parsed dependency item.
#[derive(Clone, Debug, Default)]
pub struct Dependency {
    pub pkg: String,
    pub relation: Option<VersionRelation>,
    pub version: String,
    pub architecture: String,
    /// Compiled expression when `relation` is [VersionRelation::Regexp].
    pub regexp: Option<Regex>,
}

impl PartialEq for Dependency {
    fn eq(&self, other: &Self) -> bool {
        self.pkg == other.pkg
            && self.effective_relation() == other.effective_relation()
            && self.version == other.version
            && self.architecture == other.architecture
    }
}

impl Eq for Dependency {}

impl Display for Dependency {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.pkg)?;
        let relation = self.effective_relation();
        if relation != VersionRelation::DontCare {
            write!(f, " ({} {})", relation, self.version)?;
        }
        if !self.architecture.is_empty() {
            write!(f, " [{}]", self.architecture)?;
        }

        Ok(())
    }
}

impl Dependency {
    /// The relation, defaulting to "don't care" when no version was given.
    pub fn effective_relation(&self) -> VersionRelation {
        self.relation.unwrap_or(VersionRelation::DontCare)
    }

    /// A stable string used to deduplicate dependencies.
    pub fn hash_key(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.architecture,
            self.pkg,
            self.effective_relation(),
            self.version
        )
    }
}

/// Check whether a raw version string satisfies a dependency's restriction.
pub fn version_satisfies(version: &str, dep: &Dependency) -> bool {
    match dep.effective_relation() {
        VersionRelation::DontCare => true,
        VersionRelation::Equal => compare_versions(version, &dep.version) == Ordering::Equal,
        VersionRelation::Less => compare_versions(version, &dep.version) == Ordering::Less,
        VersionRelation::Greater => compare_versions(version, &dep.version) == Ordering::Greater,
        VersionRelation::LessOrEqual => {
            compare_versions(version, &dep.version) != Ordering::Greater
        }
        VersionRelation::GreaterOrEqual => {
            compare_versions(version, &dep.version) != Ordering::Less
        }
        VersionRelation::PatternMatch => glob::Pattern::new(&dep.version)
            .map(|p| p.matches(version))
            .unwrap_or(false),
        VersionRelation::Regexp => dep
            .regexp
            .as_ref()
            .map(|re| re.is_match(version))
            .unwrap_or(false),
    }
}

/// Parse a single dependency item.
pub fn parse_dependency(s: &str) -> Result<Dependency> {
    let caps = RE_DEPENDENCY
        .captures(s.trim())
        .ok_or_else(|| ArchiveError::DependencyParse(s.to_string()))?;

    let pkg = caps["package"].to_string();
    if pkg.is_empty() {
        return Err(ArchiveError::DependencyParse(s.to_string()));
    }

    let (relation, version) = match caps.name("version") {
        Some(version) => {
            let relation = match caps.name("relop").map(|m| m.as_str()) {
                Some("=") | None => VersionRelation::Equal,
                Some("<<") | Some("<") => VersionRelation::Less,
                Some(">>") | Some(">") => VersionRelation::Greater,
                Some("<=") => VersionRelation::LessOrEqual,
                Some(">=") => VersionRelation::GreaterOrEqual,
                Some(other) => {
                    return Err(ArchiveError::DependencyParse(format!(
                        "{}: unexpected relation {}",
                        s, other
                    )))
                }
            };

            (Some(relation), version.as_str().to_string())
        }
        None => (None, String::new()),
    };

    let architecture = caps
        .name("colonarch")
        .or_else(|| caps.name("brackarch"))
        .or_else(|| caps.name("bracearch"))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();

    Ok(Dependency {
        pkg,
        relation,
        version,
        architecture,
        regexp: None,
    })
}

/// Parse a dependency item with alternatives (`a | b | c`).
pub fn parse_dependency_variants(s: &str) -> Result<Vec<Dependency>> {
    s.split('|').map(parse_dependency).collect()
}

/// Split a raw dependency field value into its comma-separated items.
///
/// Items are kept as raw strings; they are parsed into [Dependency] values
/// when the resolver needs them.
pub fn split_dependency_field(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Remove duplicate dependencies, preserving the order of first occurrence.
pub fn dedup_dependencies(deps: Vec<Dependency>) -> Vec<Dependency> {
    let mut seen = std::collections::HashSet::with_capacity(deps.len());
    deps.into_iter()
        .filter(|d| seen.insert(d.hash_key()))
        .collect()
}
