// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Azure Blob published storage.

Talks to the Blob REST endpoint directly, authenticating with the
SharedKeyLite scheme. Credentials come from `AZURE_STORAGE_ACCOUNT` and
`AZURE_STORAGE_ACCESS_KEY`.
*/

use {
    crate::{
        checksum::ChecksumInfo,
        error::{ArchiveError, Result},
        pool::PackagePool,
        storage::{join_paths, PublishedStorage},
    },
    async_trait::async_trait,
    base64::Engine,
    hmac::{Hmac, Mac},
    once_cell::sync::Lazy,
    regex::Regex,
    reqwest::{header::HeaderMap, Method, StatusCode},
    sha2::Sha256,
    std::{collections::HashMap, path::Path, sync::Mutex},
};

const API_VERSION: &str = "2019-12-12";
const SYMLINK_META_HEADER: &str = "x-ms-meta-symlink_target";

static RE_BLOB_ENTRY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<Blob>.*?<Name>([^<]*)</Name>.*?(?:<Content-MD5>([^<]*)</Content-MD5>.*?)?</Blob>")
        .unwrap()
});
static RE_NEXT_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<NextMarker>([^<]+)</NextMarker>").unwrap());

fn xml_unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Published storage backed by an Azure Blob container.
pub struct AzurePublishedStorage {
    client: reqwest::Client,
    account: String,
    key: Vec<u8>,
    container: String,
    prefix: String,
    endpoint: String,
    // path -> hex MD5 from the container listing.
    path_cache: Mutex<Option<HashMap<String, String>>>,
}

impl AzurePublishedStorage {
    pub fn new(
        account: impl ToString,
        access_key: &str,
        container: impl ToString,
        prefix: Option<&str>,
        endpoint: Option<&str>,
    ) -> Result<Self> {
        let account = account.to_string();
        let key = base64::engine::general_purpose::STANDARD
            .decode(access_key)
            .map_err(|e| {
                ArchiveError::Transport("azure".to_string(), format!("bad access key: {}", e))
            })?;

        let endpoint = endpoint
            .map(|e| e.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("https://{}.blob.core.windows.net", account));

        Ok(Self {
            client: reqwest::Client::new(),
            account,
            key,
            container: container.to_string(),
            prefix: prefix.map(|p| p.trim_matches('/').to_string()).unwrap_or_default(),
            endpoint,
            path_cache: Mutex::new(None),
        })
    }

    /// Construct from the standard environment variables.
    pub fn from_env(container: impl ToString, prefix: Option<&str>) -> Result<Self> {
        let account = std::env::var("AZURE_STORAGE_ACCOUNT").map_err(|_| {
            ArchiveError::NotFound("AZURE_STORAGE_ACCOUNT environment variable".to_string())
        })?;
        let key = std::env::var("AZURE_STORAGE_ACCESS_KEY").map_err(|_| {
            ArchiveError::NotFound("AZURE_STORAGE_ACCESS_KEY environment variable".to_string())
        })?;

        Self::new(account, &key, container, prefix, None)
    }

    fn blob_name(&self, path: &str) -> String {
        join_paths(&[&self.prefix, path])
    }

    fn blob_url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.container, self.blob_name(path))
    }

    /// Drop the cached listing.
    pub fn invalidate_cache(&self) {
        *self.path_cache.lock().expect("lock poisoned") = None;
    }

    fn sign(&self, method: &Method, resource: &str, headers: &HeaderMap) -> String {
        // SharedKeyLite: VERB, Content-MD5, Content-Type, Date, then the
        // canonicalized x-ms-* headers and the canonicalized resource.
        let mut ms_headers: Vec<(String, String)> = headers
            .iter()
            .filter(|(name, _)| name.as_str().starts_with("x-ms-"))
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        ms_headers.sort();

        let canonicalized_headers = ms_headers
            .iter()
            .map(|(name, value)| format!("{}:{}\n", name, value))
            .collect::<String>();

        let string_to_sign = format!(
            "{}\n\n\n\n{}{}",
            method.as_str(),
            canonicalized_headers,
            resource
        );

        let mut mac = Hmac::<Sha256>::new_from_slice(&self.key).expect("any key length works");
        mac.update(string_to_sign.as_bytes());
        let signature = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());

        format!("SharedKeyLite {}:{}", self.account, signature)
    }

    async fn request(
        &self,
        method: Method,
        url: &str,
        resource: &str,
        extra_headers: Vec<(&str, String)>,
        body: Option<Vec<u8>>,
    ) -> Result<reqwest::Response> {
        let date = chrono::Utc::now()
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string();

        let mut headers = HeaderMap::new();
        headers.insert("x-ms-date", date.parse().expect("valid header"));
        headers.insert("x-ms-version", API_VERSION.parse().expect("valid header"));
        for (name, value) in extra_headers {
            headers.insert(
                reqwest::header::HeaderName::from_bytes(name.as_bytes())
                    .expect("static header names"),
                value.parse().map_err(|_| {
                    ArchiveError::Transport(url.to_string(), "bad header value".to_string())
                })?,
            );
        }

        let authorization = self.sign(&method, resource, &headers);
        headers.insert(
            reqwest::header::AUTHORIZATION,
            authorization.parse().expect("valid header"),
        );

        let mut request = self.client.request(method, url).headers(headers);
        if let Some(body) = body {
            request = request.body(body);
        }

        Ok(request.send().await?)
    }

    fn canonical_resource(&self, path: &str, comp: Option<&str>) -> String {
        let mut resource = format!("/{}/{}", self.account, self.container);
        if !path.is_empty() {
            resource.push('/');
            resource.push_str(path);
        }
        if let Some(comp) = comp {
            resource.push_str("?comp=");
            resource.push_str(comp);
        }

        resource
    }

    async fn list_with_md5(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let full_prefix = {
            let p = self.blob_name(prefix);
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
                "{}/{}?restype=container&comp=list&prefix={}",
                self.endpoint,
                self.container,
                urlencode(&full_prefix)
            );
            if !marker.is_empty() {
                url.push_str("&marker=");
                url.push_str(&urlencode(&marker));
            }

            let response = self
                .request(
                    Method::GET,
                    &url,
                    &self.canonical_resource("", Some("list")),
                    vec![],
                    None,
                )
                .await?;

            if !response.status().is_success() {
                return Err(ArchiveError::Transport(
                    url,
                    format!("Azure list failed: {}", response.status()),
                ));
            }

            let text = response.text().await?;

            for caps in RE_BLOB_ENTRY.captures_iter(&text) {
                let name = xml_unescape(&caps[1]);
                if let Some(rel) = name.strip_prefix(&full_prefix) {
                    if rel.is_empty() {
                        continue;
                    }
                    let md5 = caps
                        .get(2)
                        .map(|m| base64_md5_to_hex(m.as_str()))
                        .unwrap_or_default();
                    result.push((rel.to_string(), md5));
                }
            }

            match RE_NEXT_MARKER.captures(&text) {
                Some(caps) => marker = xml_unescape(&caps[1]),
                None => break,
            }
        }

        result.sort();

        Ok(result)
    }

    async fn copy_blob(&self, src: &str, dst: &str, metadata: Vec<(&str, String)>) -> Result<()> {
        let mut headers = vec![
            ("x-ms-copy-source", self.blob_url(src)),
            ("x-ms-requires-sync", "true".to_string()),
        ];
        headers.extend(metadata);

        let response = self
            .request(
                Method::PUT,
                &self.blob_url(dst),
                &self.canonical_resource(&self.blob_name(dst), None),
                headers,
                None,
            )
            .await?;

        if !response.status().is_success() {
            return Err(ArchiveError::Transport(
                self.blob_name(dst),
                format!("Azure copy failed: {}", response.status()),
            ));
        }

        self.invalidate_cache();

        Ok(())
    }
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' | b'/' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

fn base64_md5_to_hex(encoded: &str) -> String {
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map(hex::encode)
        .unwrap_or_default()
}

#[async_trait]
impl PublishedStorage for AzurePublishedStorage {
    async fn mkdir(&self, _path: &str) -> Result<()> {
        Ok(())
    }

    async fn put_file(&self, path: &str, source: &Path) -> Result<()> {
        let body = std::fs::read(source)
            .map_err(|e| ArchiveError::IoPath(source.display().to_string(), e))?;

        let response = self
            .request(
                Method::PUT,
                &self.blob_url(path),
                &self.canonical_resource(&self.blob_name(path), None),
                vec![("x-ms-blob-type", "BlockBlob".to_string())],
                Some(body),
            )
            .await?;

        if !response.status().is_success() {
            return Err(ArchiveError::Transport(
                self.blob_name(path),
                format!("Azure upload failed: {}", response.status()),
            ));
        }

        self.invalidate_cache();

        Ok(())
    }

    async fn filelist(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .list_with_md5(prefix)
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
            .request(
                Method::DELETE,
                &self.blob_url(path),
                &self.canonical_resource(&self.blob_name(path), None),
                vec![],
                None,
            )
            .await?;

        if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
            return Err(ArchiveError::Transport(
                self.blob_name(path),
                format!("Azure delete failed: {}", response.status()),
            ));
        }

        self.invalidate_cache();

        Ok(())
    }

    async fn rename_file(&self, old_path: &str, new_path: &str) -> Result<()> {
        self.copy_blob(old_path, new_path, vec![]).await?;
        self.remove(old_path).await
    }

    async fn symlink(&self, src: &str, dst: &str) -> Result<()> {
        self.copy_blob(src, dst, vec![(SYMLINK_META_HEADER, src.to_string())])
            .await
    }

    async fn read_link(&self, path: &str) -> Result<String> {
        let response = self
            .request(
                Method::HEAD,
                &self.blob_url(path),
                &self.canonical_resource(&self.blob_name(path), None),
                vec![],
                None,
            )
            .await?;

        response
            .headers()
            .get(SYMLINK_META_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
            .ok_or_else(|| ArchiveError::NotFound(format!("symlink target of {}", path)))
    }

    async fn hard_link(&self, src: &str, dst: &str) -> Result<()> {
        self.copy_blob(src, dst, vec![]).await
    }

    async fn file_exists(&self, path: &str) -> Result<bool> {
        let response = self
            .request(
                Method::HEAD,
                &self.blob_url(path),
                &self.canonical_resource(&self.blob_name(path), None),
                vec![],
                None,
            )
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
            let listing = self.list_with_md5(publish_prefix).await?;
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

        // put_file dropped the cache; reseed the entry we just created.
        let mut guard = self.path_cache.lock().expect("lock poisoned");
        guard
            .get_or_insert_with(HashMap::new)
            .insert(rel_path, checksums.md5.clone());

        Ok(())
    }
}
