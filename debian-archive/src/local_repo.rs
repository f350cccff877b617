// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Local package repositories.

A local repository is a mutable, locally-managed set of packages: uploads
land here, and published trees can be fed from it directly.
*/

use {
    crate::{package_list::ref_list_from_package_list, package_list::PackageList, ref_list::PackageRefList},
    serde::{Deserialize, Serialize},
    uuid::Uuid,
};

/// A mutable local repository.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LocalRepo {
    pub uuid: String,
    pub name: String,
    pub comment: String,
    pub default_distribution: String,
    pub default_component: String,

    #[serde(skip)]
    package_refs: Option<PackageRefList>,
}

impl LocalRepo {
    pub fn new(name: impl Into<String>, comment: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            name: name.into(),
            comment: comment.into(),
            default_distribution: String::new(),
            default_component: String::new(),
            package_refs: None,
        }
    }

    /// Key of the repository record.
    pub fn key(&self) -> Vec<u8> {
        format!("L{}", self.uuid).into_bytes()
    }

    /// Key of the repository's reference list.
    pub fn ref_key(&self) -> Vec<u8> {
        format!("E{}", self.uuid).into_bytes()
    }

    /// Current contents; empty until loaded or updated.
    pub fn ref_list(&self) -> PackageRefList {
        self.package_refs.clone().unwrap_or_default()
    }

    pub fn has_ref_list(&self) -> bool {
        self.package_refs.is_some()
    }

    pub fn set_ref_list(&mut self, refs: PackageRefList) {
        self.package_refs = Some(refs);
    }

    /// Replace contents with the given package list.
    pub fn update_ref_list(&mut self, list: &PackageList) {
        self.package_refs = Some(ref_list_from_package_list(list));
    }

    pub fn num_packages(&self) -> usize {
        self.package_refs.as_ref().map(|r| r.len()).unwrap_or(0)
    }
}

impl std::fmt::Display for LocalRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]: {}", self.name, self.comment)
    }
}
