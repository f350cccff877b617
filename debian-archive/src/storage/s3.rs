// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! S3-backed published storage. */

use {
    crate::{
        checksum::ChecksumInfo,
        error::{ArchiveError, Result},
        pool::PackagePool,
        storage::{join_paths, PublishedStorage},
    },
    async_trait::async_trait,
    rusoto_core::{Region, RusotoError},
    rusoto_s3::{
        CopyObjectRequest, DeleteObjectRequest, HeadObjectRequest, ListObjectsV2Request,
        PutObjectRequest, S3Client, S3,
    },
    std::{collections::HashMap, path::Path, sync::Mutex},
};

const SYMLINK_META_KEY: &str = "symlink-target";

/// Published storage backed by an S3 bucket.
///
/// Renames and links are emulated with server-side copies. Listings under
/// the published prefix are cached to short-circuit `link_from_pool` no-ops;
/// the cache is invalidated on every write through this instance.
pub struct S3PublishedStorage {
    client: S3Client,
    bucket: String,
    prefix: String,
    acl: Option<String>,
    // path -> ETag-derived MD5, filled lazily.
    path_cache: Mutex<Option<HashMap<String, String>>>,
}

impl S3PublishedStorage {
    pub fn new(region: Region, bucket: impl ToString, prefix: Option<&str>, acl: Option<&str>) -> Self {
        Self {
            client: S3Client::new(region),
            bucket: bucket.to_string(),
            prefix: prefix.map(|p| p.trim_matches('/').to_string()).unwrap_or_default(),
            acl: acl.map(|a| a.to_string()),
            path_cache: Mutex::new(None),
        }
    }

    fn key(&self, path: &str) -> String {
        join_paths(&[&self.prefix, path])
    }

    /// Drop the cached listing. Always safe: the next `link_from_pool`
    /// rebuilds it from the live bucket.
    pub fn invalidate_cache(&self) {
        *self.path_cache.lock().expect("lock poisoned") = None;
    }

    fn transport(&self, path: &str, e: impl std::fmt::Debug) -> ArchiveError {
        ArchiveError::Transport(self.key(path), format!("S3 error: {:?}", e))
    }

    async fn list_with_etags(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let full_prefix = {
            let p = self.key(prefix);
            if p.is_empty() {
                p
            } else {
                format!("{}/", p)
            }
        };

        let mut result = Vec::new();
        let mut continuation_token = None;

        loop {
            let request = ListObjectsV2Request {
                bucket: self.bucket.clone(),
                prefix: Some(full_prefix.clone()),
                continuation_token: continuation_token.clone(),
                ..Default::default()
            };

            let output = self
                .client
                .list_objects_v2(request)
                .await
                .map_err(|e| self.transport(prefix, e))?;

            for object in output.contents.unwrap_or_default() {
                if let Some(key) = object.key {
                    let rel = key
                        .strip_prefix(&full_prefix)
                        .unwrap_or(key.as_str())
                        .to_string();
                    if rel.is_empty() {
                        continue;
                    }
                    let md5 = object
                        .e_tag
                        .unwrap_or_default()
                        .trim_matches('"')
                        .to_string();
                    result.push((rel, md5));
                }
            }

            if output.is_truncated == Some(true) {
                continuation_token = output.next_continuation_token;
                if continuation_token.is_none() {
                    break;
                }
            } else {
                break;
            }
        }

        result.sort();

        Ok(result)
    }

    async fn copy_object(&self, src: &str, dst: &str, metadata: Option<HashMap<String, String>>) -> Result<()> {
        let request = CopyObjectRequest {
            bucket: self.bucket.clone(),
            copy_source: format!("{}/{}", self.bucket, self.key(src)),
            key: self.key(dst),
            acl: self.acl.clone(),
            metadata_directive: metadata.as_ref().map(|_| "REPLACE".to_string()),
            metadata,
            ..Default::default()
        };

        self.client
            .copy_object(request)
            .await
            .map_err(|e| self.transport(dst, e))?;

        self.invalidate_cache();

        Ok(())
    }

    async fn put_object_from_file(&self, path: &str, source: &Path) -> Result<()> {
        let body = std::fs::read(source)
            .map_err(|e| ArchiveError::IoPath(source.display().to_string(), e))?;

        let request = PutObjectRequest {
            bucket: self.bucket.clone(),
            key: self.key(path),
            body: Some(body.into()),
            acl: self.acl.clone(),
            ..Default::default()
        };

        self.client
            .put_object(request)
            .await
            .map_err(|e| self.transport(path, e))?;

        Ok(())
    }

    async fn delete_object(&self, path: &str) -> Result<()> {
        let request = DeleteObjectRequest {
            bucket: self.bucket.clone(),
            key: self.key(path),
            ..Default::default()
        };

        self.client
            .delete_object(request)
            .await
            .map_err(|e| self.transport(path, e))?;

        self.invalidate_cache();

        Ok(())
    }
}

#[async_trait]
impl PublishedStorage for S3PublishedStorage {
    async fn mkdir(&self, _path: &str) -> Result<()> {
        // Object stores have no directories.
        Ok(())
    }

    async fn put_file(&self, path: &str, source: &Path) -> Result<()> {
        self.put_object_from_file(path, source).await?;
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
            self.delete_object(&join_paths(&[path, &file])).await?;
        }

        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<()> {
        if path.trim_matches('/').is_empty() {
            panic!("trying to remove empty path");
        }

        self.delete_object(path).await
    }

    async fn rename_file(&self, old_path: &str, new_path: &str) -> Result<()> {
        self.copy_object(old_path, new_path, None).await?;
        self.delete_object(old_path).await
    }

    async fn symlink(&self, src: &str, dst: &str) -> Result<()> {
        let mut metadata = HashMap::new();
        metadata.insert(SYMLINK_META_KEY.to_string(), src.to_string());

        self.copy_object(src, dst, Some(metadata)).await
    }

    async fn read_link(&self, path: &str) -> Result<String> {
        let request = HeadObjectRequest {
            bucket: self.bucket.clone(),
            key: self.key(path),
            ..Default::default()
        };

        let output = self
            .client
            .head_object(request)
            .await
            .map_err(|e| self.transport(path, e))?;

        output
            .metadata
            .and_then(|m| m.get(SYMLINK_META_KEY).cloned())
            .ok_or_else(|| ArchiveError::NotFound(format!("symlink target of {}", path)))
    }

    async fn hard_link(&self, src: &str, dst: &str) -> Result<()> {
        self.copy_object(src, dst, None).await
    }

    async fn file_exists(&self, path: &str) -> Result<bool> {
        let request = HeadObjectRequest {
            bucket: self.bucket.clone(),
            key: self.key(path),
            ..Default::default()
        };

        match self.client.head_object(request).await {
            Ok(_) => Ok(true),
            Err(RusotoError::Service(_)) => Ok(false),
            Err(RusotoError::Unknown(response)) if response.status.as_u16() == 404 => Ok(false),
            Err(e) => Err(self.transport(path, e)),
        }
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
                Some(_) if !force => {
                    return Err(ArchiveError::FileConflict(rel_path));
                }
                _ => {}
            }
        }

        let source = pool.full_path(pool_path);
        self.put_object_from_file(&rel_path, &source).await?;

        if let Some(cache) = self.path_cache.lock().expect("lock poisoned").as_mut() {
            cache.insert(rel_path, checksums.md5.clone());
        }

        Ok(())
    }
}
