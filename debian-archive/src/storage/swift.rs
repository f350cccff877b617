// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! OpenStack Swift published storage.

Talks to a Swift object endpoint with a pre-authenticated token. The storage
URL and token come from `OS_STORAGE_URL` and `OS_AUTH_TOKEN`; wider Keystone
auth flows are the operator's concern.
*/

use {
    crate::{
        checksum::ChecksumInfo,
        error::{ArchiveError, Result},
        pool::PackagePool,
        storage::{join_paths, PublishedStorage},
    },
    async_trait::async_trait,
    reqwest::{Method, StatusCode},
    std::{collections::HashMap, path::Path, sync::Mutex},
};

const SYMLINK_META_HEADER: &str = "x-object-meta-symlink-target";

/// Published storage backed by a Swift container.
pub struct SwiftPublishedStorage {
    client: reqwest::Client,
    storage_url: String,
    token: String,
    container: String,
    prefix: String,
    // path -> ETag MD5 from the container listing.
    path_cache: Mutex<Option<HashMap<String, String>>>,
}

impl SwiftPublishedStorage {
    pub fn new(
        storage_url: impl ToString,
        token: impl ToString,
        container: impl ToString,
        prefix: Option<&str>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            storage_url: storage_url.to_string().trim_end_matches('/').to_string(),
            token: token.to_string(),
            container: container.to_string(),
            prefix: prefix.map(|p| p.trim_matches('/').to_string()).unwrap_or_default(),
            path_cache: Mutex::new(None),
        }
    }

    /// Construct from the standard environment variables.
    pub fn from_env(container: impl ToString, prefix: Option<&str>) -> Result<Self> {
        let storage_url = std::env::var("OS_STORAGE_URL").map_err(|_| {
            ArchiveError::NotFound("OS_STORAGE_URL environment variable".to_string())
        })?;
        let token = std::env::var("OS_AUTH_TOKEN").map_err(|_| {
            ArchiveError::NotFound("OS_AUTH_TOKEN environment variable".to_string())
        })?;

        Ok(Self::new(storage_url, token, container, prefix))
    }

    fn object_name(&self, path: &str) -> String {
        join_paths(&[&self.prefix, path])
    }

    fn object_url(&self, path: &str) -> String {
        format!(
            "{}/{}/{}",
            self.storage_url,
            self.container,
            self.object_name(path)
        )
    }

    /// Drop the cached listing.
    pub fn invalidate_cache(&self) {
        *self.path_cache.lock().expect("lock poisoned") = None;
    }

    async fn request(
        &self,
        method: Method,
        url: &str,
        headers: Vec<(&str, String)>,
        body: Option<Vec<u8>>,
    ) -> Result<reqwest::Response> {
        let mut request = self
            .client
            .request(method, url)
            .header("X-Auth-Token", &self.token);

        for (name, value) in headers {
            request = request.header(name, value);
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        Ok(request.send().await?)
    }

    async fn list_with_etags(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let full_prefix = {
            let p = self.object_name(prefix);
            if p.is_empty() {
                p
            } else {
                format!("{}/", p)
            }
        };

        let mut result = Vec::new();
        let mut marker = String::new();

        loop {
            let mut url = format!(
                "{}/{}?format=json&prefix={}",
                self.storage_url, self.container, full_prefix
            );
            if !marker.is_empty() {
                url.push_str("&marker=");
                url.push_str(&marker);
            }

            let response = self.request(Method::GET, &url, vec![], None).await?;
            if response.status() == StatusCode::NO_CONTENT {
                break;
            }
            if !response.status().is_success() {
                return Err(ArchiveError::Transport(
                    url,
                    format!("Swift list failed: {}", response.status()),
                ));
            }

            #[derive(serde::Deserialize)]
            struct Entry {
                name: String,
                #[serde(default)]
                hash: String,
            }

            let entries: Vec<Entry> = response.json().await?;
            if entries.is_empty() {
                break;
            }

            marker = entries.last().expect("non-empty").name.clone();

            for entry in entries {
                if let Some(rel) = entry.name.strip_prefix(&full_prefix) {
                    if !rel.is_empty() {
                        result.push((rel.to_string(), entry.hash));
                    }
                }
            }
        }

        result.sort();

        Ok(result)
    }

    async fn copy_object(&self, src: &str, dst: &str, metadata: Vec<(&str, String)>) -> Result<()> {
        let mut headers = vec![(
            "Destination",
            format!("/{}/{}", self.container, self.object_name(dst)),
        )];
        headers.extend(metadata);

        let response = self
            .request(
                Method::from_bytes(b"COPY").expect("COPY is a valid method"),
                &self.object_url(src),
                headers,
                None,
            )
            .await?;

        if !response.status().is_success() {
            return Err(ArchiveError::Transport(
                self.object_name(dst),
                format!("Swift copy failed: {}", response.status()),
            ));
        }

        self.invalidate_cache();

        Ok(())
    }
}

#[async_trait]
impl PublishedStorage for SwiftPublishedStorage {
    async fn mkdir(&self, _path: &str) -> Result<()> {
        Ok(())
    }

    async fn put_file(&self, path: &str, source: &Path) -> Result<()> {
        let body = std::fs::read(source)
            .map_err(|e| ArchiveError::IoPath(source.display().to_string(), e))?;

        let response = self
            .request(Method::PUT, &self.object_url(path), vec![], Some(body))
            .await?;

        if !response.status().is_success() {
            return Err(ArchiveError::Transport(
                self.object_name(path),
                format!("Swift upload failed: {}", response.status()),
            ));
        }

        self.invalidate_cache();

        Ok(())
    }

    async fn filelist(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .list_with_etags(prefix)
            .await?
            .into_iter()
            .map(|(path, _)| path)
            .collect())
    }

    async fn remove_dirs(&self, path: &str) -> Result<()> {
        if path.trim_matches('/').is_empty() {
            panic!("trying to remove the root directory");
        }

        for file in self.filelist(path).await? {
            self.remove(&join_paths(&[path, &file])).await?;
        }

        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<()> {
        if path.trim_matches('/').is_empty() {
            panic!("trying to remove empty path");
        }

        let response = self
            .request(Method::DELETE, &self.object_url(path), vec![], None)
            .await?;

        if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
            return Err(ArchiveError::Transport(
                self.object_name(path),
                format!("Swift delete failed: {}", response.status()),
            ));
        }

        self.invalidate_cache();

        Ok(())
    }

    async fn rename_file(&self, old_path: &str, new_path: &str) -> Result<()> {
        self.copy_object(old_path, new_path, vec![]).await?;
        self.remove(old_path).await
    }

    async fn symlink(&self, src: &str, dst: &str) -> Result<()> {
        self.copy_object(src, dst, vec![(SYMLINK_META_HEADER, src.to_string())])
            .await
    }

    async fn read_link(&self, path: &str) -> Result<String> {
        let response = self
            .request(Method::HEAD, &self.object_url(path), vec![], None)
            .await?;

        response
            .headers()
            .get(SYMLINK_META_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
            .ok_or_else(|| ArchiveError::NotFound(format!("symlink target of {}", path)))
    }

    async fn hard_link(&self, src: &str, dst: &str) -> Result<()> {
        self.copy_object(src, dst, vec![]).await
    }

    async fn file_exists(&self, path: &str) -> Result<bool> {
        let response = self
            .request(Method::HEAD, &self.object_url(path), vec![], None)
            .await?;

        Ok(response.status().is_success())
    }

    async fn link_from_pool(
        &self,
        publish_prefix: &str,
        publish_rel_dir: &str,
        file_name: &str,
        pool: &PackagePool,
        pool_path: &str,
        checksums: &ChecksumInfo,
        force: bool,
    ) -> Result<()> {
        let rel_path = join_paths(&[publish_prefix, publish_rel_dir, file_name]);

        if self.path_cache.lock().expect("lock poisoned").is_none() {
            let listing = self.list_with_etags(publish_prefix).await?;
            let mut cache = HashMap::with_capacity(listing.len());
            for (path, md5) in listing {
                cache.insert(join_paths(&[publish_prefix, &path]), md5);
            }
            *self.path_cache.lock().expect("lock poisoned") = Some(cache);
        }

        if let Some(cache) = self.path_cache.lock().expect("lock poisoned").as_ref() {
            match cache.get(&rel_path) {
                Some(md5) if *md5 == checksums.md5 => return Ok(()),
                Some(_) if !force => return Err(ArchiveError::FileConflict(rel_path)),
                _ => {}
            }
        }

        let source = pool.full_path(pool_path);
        self.put_file(&rel_path, &source).await?;

        let mut guard = self.path_cache.lock().expect("lock poisoned");
        guard
            .get_or_insert_with(HashMap::new)
            .insert(rel_path, checksums.md5.clone());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_naming() {
        let storage = SwiftPublishedStorage::new(
            "https://swift.example.com/v1/AUTH_x/",
            "token",
            "repo",
            Some("ppa"),
        );

        assert_eq!(storage.object_name("dists/squeeze/Release"), "ppa/dists/squeeze/Release");
        assert_eq!(
            storage.object_url("a.deb"),
            "https://swift.example.com/v1/AUTH_x/repo/ppa/a.deb"
        );
    }
}
