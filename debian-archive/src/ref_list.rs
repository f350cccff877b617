// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Lists of package references.

A [PackageRefList] is the durable identity of a set of packages: a vector of
package keys sorted lexicographically as byte sequences. Snapshots, mirrors
and local repositories all persist their contents this way.
*/

use {
    crate::error::Result,
    serde::{Deserialize, Serialize},
    std::cmp::Ordering,
};

/// A sorted list of package keys.
///
/// Invariant: keys are strictly ascending.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct PackageRefList {
    refs: Vec<Vec<u8>>,
}

/// One entry of a [PackageRefList::diff] change-set.
///
/// `left`-only entries have `right == None`, `right`-only entries have
/// `left == None`; entries where the same `<arch> <name>` resolves to
/// different references carry both sides.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PackageDiff {
    pub left: Option<Vec<u8>>,
    pub right: Option<Vec<u8>>,
}

/// Strip the trailing files-hash token, yielding the short key.
fn short_ref(r: &[u8]) -> &[u8] {
    // Keys are `P<arch> <name> <version>[ <hash>]`; the short form drops the
    // fourth token.
    let mut spaces = r
        .iter()
        .enumerate()
        .filter(|(_, &b)| b == b' ')
        .map(|(i, _)| i);

    let (_first, _second, third) = (spaces.next(), spaces.next(), spaces.next());

    match third {
        Some(pos) => &r[..pos],
        None => r,
    }
}

/// The `P<arch> <name>` prefix of a key.
fn arch_name(r: &[u8]) -> &[u8] {
    let mut spaces = r
        .iter()
        .enumerate()
        .filter(|(_, &b)| b == b' ')
        .map(|(i, _)| i);

    let (_first, second) = (spaces.next(), spaces.next());

    match second {
        Some(pos) => &r[..pos],
        None => r,
    }
}

impl PackageRefList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct from raw keys, establishing the sort invariant.
    pub fn from_refs(mut refs: Vec<Vec<u8>>) -> Self {
        refs.sort();
        refs.dedup();
        Self { refs }
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    /// Iterate over keys in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.refs.iter().map(|r| r.as_slice())
    }

    /// Call `handler` for each key, stopping at the first error.
    pub fn for_each<F>(&self, mut handler: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        for r in &self.refs {
            handler(r)?;
        }

        Ok(())
    }

    pub fn has(&self, key: &[u8]) -> bool {
        self.refs.binary_search_by(|r| r.as_slice().cmp(key)).is_ok()
    }

    /// Merge `right` into this list, producing a new list.
    ///
    /// A classical sorted merge. When the same short key exists on both
    /// sides with differing full keys (differing files hash):
    /// `ignore_conflicting` keeps the left reference, otherwise
    /// `override_matching` takes the right one, otherwise both are included.
    pub fn merge(
        &self,
        right: &PackageRefList,
        override_matching: bool,
        ignore_conflicting: bool,
    ) -> PackageRefList {
        let mut result = Vec::with_capacity(self.refs.len() + right.refs.len());

        let (mut il, mut ir) = (0, 0);
        let (nl, nr) = (self.refs.len(), right.refs.len());

        while il < nl || ir < nr {
            if il == nl {
                result.push(right.refs[ir].clone());
                ir += 1;
            } else if ir == nr {
                result.push(self.refs[il].clone());
                il += 1;
            } else {
                let rl = &self.refs[il];
                let rr = &right.refs[ir];

                match rl.cmp(rr) {
                    Ordering::Equal => {
                        result.push(rl.clone());
                        il += 1;
                        ir += 1;
                    }
                    rel => {
                        if short_ref(rl) == short_ref(rr) {
                            // Same package, different files hash.
                            if ignore_conflicting {
                                result.push(rl.clone());
                            } else if override_matching {
                                result.push(rr.clone());
                            } else if rel == Ordering::Less {
                                result.push(rl.clone());
                                result.push(rr.clone());
                            } else {
                                result.push(rr.clone());
                                result.push(rl.clone());
                            }
                            il += 1;
                            ir += 1;
                        } else if rel == Ordering::Less {
                            result.push(rl.clone());
                            il += 1;
                        } else {
                            result.push(rr.clone());
                            ir += 1;
                        }
                    }
                }
            }
        }

        PackageRefList { refs: result }
    }

    /// Remove from this list every reference whose short key appears in
    /// `right`.
    pub fn subtract(&self, right: &PackageRefList) -> PackageRefList {
        let right_short: std::collections::HashSet<&[u8]> =
            right.refs.iter().map(|r| short_ref(r)).collect();

        PackageRefList {
            refs: self
                .refs
                .iter()
                .filter(|r| !right_short.contains(short_ref(r)))
                .cloned()
                .collect(),
        }
    }

    /// Compute the change-set between this list (left) and `right`.
    ///
    /// Entries are keyed on `<arch> <name>`: a reference present on one side
    /// only produces a one-sided entry, while the same package resolving to
    /// different references produces an entry carrying both sides.
    pub fn diff(&self, right: &PackageRefList) -> Vec<PackageDiff> {
        let mut result = Vec::new();

        let (mut il, mut ir) = (0, 0);
        let (nl, nr) = (self.refs.len(), right.refs.len());

        while il < nl || ir < nr {
            if il == nl {
                result.push(PackageDiff {
                    left: None,
                    right: Some(right.refs[ir].clone()),
                });
                ir += 1;
            } else if ir == nr {
                result.push(PackageDiff {
                    left: Some(self.refs[il].clone()),
                    right: None,
                });
                il += 1;
            } else {
                let rl = &self.refs[il];
                let rr = &right.refs[ir];

                if rl == rr {
                    il += 1;
                    ir += 1;
                } else if arch_name(rl) == arch_name(rr) {
                    result.push(PackageDiff {
                        left: Some(rl.clone()),
                        right: Some(rr.clone()),
                    });
                    il += 1;
                    ir += 1;
                } else if rl < rr {
                    result.push(PackageDiff {
                        left: Some(rl.clone()),
                        right: None,
                    });
                    il += 1;
                } else {
                    result.push(PackageDiff {
                        left: None,
                        right: Some(rr.clone()),
                    });
                    ir += 1;
                }
            }
        }

        result
    }

    /// Replace references whose short key matches one of `keys` with the
    /// given replacements, keeping the list sorted.
    pub fn replace(&mut self, remove: &[Vec<u8>], insert: Vec<Vec<u8>>) {
        let remove_short: std::collections::HashSet<&[u8]> =
            remove.iter().map(|r| short_ref(r)).collect();

        self.refs.retain(|r| !remove_short.contains(short_ref(r)));
        self.refs.extend(insert);
        self.refs.sort();
        self.refs.dedup();
    }

    /// Serialize for catalog storage.
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("reflist serialization cannot fail")
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reflist(keys: &[&str]) -> PackageRefList {
        PackageRefList::from_refs(keys.iter().map(|k| k.as_bytes().to_vec()).collect())
    }

    fn keys(list: &PackageRefList) -> Vec<String> {
        list.iter()
            .map(|r| String::from_utf8(r.to_vec()).unwrap())
            .collect()
    }

    #[test]
    fn short_ref_strips_hash() {
        assert_eq!(short_ref(b"Pi386 app 1.0 91b1a1480b90b9e2"), b"Pi386 app 1.0");
        assert_eq!(short_ref(b"Pi386 app 1.0"), b"Pi386 app 1.0");
        assert_eq!(arch_name(b"Pi386 app 1.0 91b1a1480b90b9e2"), b"Pi386 app");
    }

    #[test]
    fn from_refs_sorts() {
        let l = reflist(&["Pi386 b 1.0 22", "Pi386 a 1.0 11"]);
        assert_eq!(keys(&l), vec!["Pi386 a 1.0 11", "Pi386 b 1.0 22"]);
        assert!(l.has(b"Pi386 a 1.0 11"));
        assert!(!l.has(b"Pi386 c 1.0 33"));
    }

    #[test]
    fn merge_identity() {
        let l = reflist(&["Pamd64 app 1.0 aa", "Pi386 app 1.0 bb"]);
        let empty = PackageRefList::new();

        assert_eq!(l.merge(&empty, false, false), l);
        assert_eq!(empty.merge(&l, false, false), l);
    }

    #[test]
    fn merge_disjoint_commutative() {
        let l = reflist(&["Pi386 app 1.0 aa"]);
        let r = reflist(&["Pamd64 lib 2.0 bb"]);

        assert_eq!(l.merge(&r, false, false), r.merge(&l, false, false));
        assert_eq!(l.merge(&r, false, false).len(), 2);
    }

    #[test]
    fn merge_conflicts() {
        let l = reflist(&["Pi386 app 1.0 aa"]);
        let r = reflist(&["Pi386 app 1.0 bb"]);

        // Default: both sides are kept.
        assert_eq!(
            keys(&l.merge(&r, false, false)),
            vec!["Pi386 app 1.0 aa", "Pi386 app 1.0 bb"]
        );

        // Override: right side wins.
        assert_eq!(keys(&l.merge(&r, true, false)), vec!["Pi386 app 1.0 bb"]);

        // Ignore conflicting: left side wins.
        assert_eq!(keys(&l.merge(&r, false, true)), vec!["Pi386 app 1.0 aa"]);
    }

    #[test]
    fn subtract_by_short_key() {
        let l = reflist(&["Pi386 app 1.0 aa", "Pi386 lib 1.0 bb"]);
        let r = reflist(&["Pi386 app 1.0 zz"]);

        assert_eq!(keys(&l.subtract(&r)), vec!["Pi386 lib 1.0 bb"]);
    }

    #[test]
    fn diff_triples() {
        let l = reflist(&[
            "Pi386 app 1.0 aa",
            "Pi386 lib 1.0 bb",
            "Pi386 only-left 1.0 cc",
        ]);
        let r = reflist(&[
            "Pi386 app 1.0 aa",
            "Pi386 lib 1.1 dd",
            "Pi386 only-right 1.0 ee",
        ]);

        let diff = l.diff(&r);
        assert_eq!(diff.len(), 3);

        // lib changed.
        assert_eq!(
            diff[0],
            PackageDiff {
                left: Some(b"Pi386 lib 1.0 bb".to_vec()),
                right: Some(b"Pi386 lib 1.1 dd".to_vec()),
            }
        );
        // only-left disappeared.
        assert_eq!(diff[1].right, None);
        // only-right appeared.
        assert_eq!(diff[2].left, None);
    }

    #[test]
    fn encode_decode_round_trip() {
        let l = reflist(&["Pi386 app 1.0 aa", "Pi386 lib 1.0 bb"]);
        let decoded = PackageRefList::decode(&l.encode()).unwrap();
        assert_eq!(l, decoded);
    }

    #[test]
    fn replace_keeps_sorted() {
        let mut l = reflist(&["Pi386 app 1.0 aa", "Pi386 lib 1.0 bb"]);
        l.replace(
            &[b"Pi386 app 1.0 aa".to_vec()],
            vec![b"Pi386 app 2.0 cc".to_vec()],
        );

        assert_eq!(keys(&l), vec!["Pi386 app 2.0 cc", "Pi386 lib 1.0 bb"]);
    }
}
