// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Remote repository mirrors.

A [RemoteRepo] mirrors a subset of a remote APT repository: selected
components and architectures, optionally including sources, udebs and
installer images. `fetch_indexes` pulls the remote index files through a
[crate::download::Downloader] and produces the package set; the caller
imports package bodies into the pool and commits the new reference list.
*/

use {
    crate::{
        control::{Stanza, StanzaReader},
        download::Downloader,
        error::{ArchiveError, Result},
        package::{Package, ARCHITECTURE_SOURCE},
        package_list::{ref_list_from_package_list, PackageList},
        ref_list::PackageRefList,
    },
    serde::{Deserialize, Serialize},
    std::io::BufReader,
    uuid::Uuid,
};

/// A mirror of (a subset of) a remote repository.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RemoteRepo {
    pub uuid: String,
    pub name: String,
    pub archive_root: String,
    pub distribution: String,
    pub components: Vec<String>,
    pub architectures: Vec<String>,
    pub download_sources: bool,
    pub download_udebs: bool,
    pub download_installer: bool,

    #[serde(skip)]
    package_refs: Option<PackageRefList>,
}

impl RemoteRepo {
    pub fn new(
        name: impl Into<String>,
        archive_root: impl Into<String>,
        distribution: impl Into<String>,
        components: Vec<String>,
        architectures: Vec<String>,
        download_sources: bool,
        download_udebs: bool,
        download_installer: bool,
    ) -> Self {
        let mut archive_root = archive_root.into();
        if !archive_root.ends_with('/') {
            archive_root.push('/');
        }

        Self {
            uuid: Uuid::new_v4().to_string(),
            name: name.into(),
            archive_root,
            distribution: distribution.into(),
            components,
            architectures,
            download_sources,
            download_udebs,
            download_installer,
            package_refs: None,
        }
    }

    pub fn key(&self) -> Vec<u8> {
        format!("R{}", self.uuid).into_bytes()
    }

    pub fn ref_key(&self) -> Vec<u8> {
        format!("E{}", self.uuid).into_bytes()
    }

    /// Absolute URL of a repository-relative path.
    pub fn package_url(&self, path: &str) -> String {
        format!("{}{}", self.archive_root, path.trim_start_matches('/'))
    }

    fn index_url(&self, component: &str, arch: &str, udeb: bool) -> String {
        let rel = if arch == ARCHITECTURE_SOURCE {
            format!("dists/{}/{}/source/Sources", self.distribution, component)
        } else if udeb {
            format!(
                "dists/{}/{}/debian-installer/binary-{}/Packages",
                self.distribution, component, arch
            )
        } else {
            format!(
                "dists/{}/{}/binary-{}/Packages",
                self.distribution, component, arch
            )
        };

        self.package_url(&rel)
    }

    fn installer_url(&self, component: &str, arch: &str) -> String {
        let images_dir = if self.distribution == crate::package::DISTRIBUTION_FOCAL {
            "legacy-images"
        } else {
            "images"
        };

        self.package_url(&format!(
            "dists/{}/{}/installer-{}/current/{}/SHA256SUMS",
            self.distribution, component, arch, images_dir
        ))
    }

    /// Current contents; empty until the first update.
    pub fn ref_list(&self) -> PackageRefList {
        self.package_refs.clone().unwrap_or_default()
    }

    pub fn has_ref_list(&self) -> bool {
        self.package_refs.is_some()
    }

    pub fn set_ref_list(&mut self, refs: PackageRefList) {
        self.package_refs = Some(refs);
    }

    /// Fetch and parse the remote index files, producing the package set of
    /// this mirror.
    pub async fn fetch_indexes(
        &self,
        downloader: &dyn Downloader,
        temp_dir: &std::path::Path,
    ) -> Result<PackageList> {
        let mut list = PackageList::new();

        for component in &self.components {
            for arch in &self.architectures {
                let url = self.index_url(component, arch, false);
                let staged = temp_dir.join(format!("{}_{}_Packages", component, arch));
                downloader.download(&url, &staged).await?;

                for stanza in read_stanzas(&staged)? {
                    list.add(Package::from_control_stanza(stanza))?;
                }

                if self.download_udebs && arch != ARCHITECTURE_SOURCE {
                    let url = self.index_url(component, arch, true);
                    let staged = temp_dir.join(format!("{}_{}_uPackages", component, arch));
                    downloader.download(&url, &staged).await?;

                    for stanza in read_stanzas(&staged)? {
                        list.add(Package::from_udeb_stanza(stanza))?;
                    }
                }

                if self.download_installer && arch != ARCHITECTURE_SOURCE {
                    let url = self.installer_url(component, arch);
                    let staged = temp_dir.join(format!("{}_{}_SHA256SUMS", component, arch));
                    downloader.download(&url, &staged).await?;

                    let body = std::fs::read_to_string(&staged)
                        .map_err(|e| ArchiveError::IoPath(staged.display().to_string(), e))?;
                    let mut installer = Package::from_installer_sums(
                        &body,
                        &self.distribution,
                        component,
                        arch,
                    )?;

                    // Sizes are not part of the sum file; probe them.
                    let mut files = installer.files().clone();
                    for f in &mut files.0 {
                        let url = self.package_url(&f.download_url());
                        f.checksums.size = downloader.get_length(&url).await?;
                    }
                    installer.update_files(files);

                    list.add(installer)?;
                }
            }

            if self.download_sources {
                let url = self.index_url(component, ARCHITECTURE_SOURCE, false);
                let staged = temp_dir.join(format!("{}_Sources", component));
                downloader.download(&url, &staged).await?;

                for stanza in read_stanzas(&staged)? {
                    list.add(Package::from_source_stanza(stanza)?)?;
                }
            }
        }

        Ok(list)
    }

    /// Commit a fetched package list as the mirror's new contents.
    pub fn finalize_update(&mut self, list: &PackageList) {
        self.package_refs = Some(ref_list_from_package_list(list));
    }
}

impl std::fmt::Display for RemoteRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]: {} {}", self.name, self.archive_root, self.distribution)
    }
}

fn read_stanzas(path: &std::path::Path) -> Result<Vec<Stanza>> {
    let file = std::fs::File::open(path)
        .map_err(|e| ArchiveError::IoPath(path.display().to_string(), e))?;

    StanzaReader::new(BufReader::new(file)).collect()
}
