// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! HTTP downloader. */

use {
    crate::{
        download::Downloader,
        error::{ArchiveError, Result},
    },
    async_trait::async_trait,
    futures::StreamExt,
    std::{io::Write, path::Path},
};

/// [Downloader] over HTTP(S), streaming bodies to disk.
pub struct HttpDownloader {
    client: reqwest::Client,
}

impl Default for HttpDownloader {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpDownloader {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub fn new_with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn get_length(&self, url: &str) -> Result<u64> {
        let response = self.client.head(url).send().await?;

        if !response.status().is_success() {
            return Err(ArchiveError::Transport(
                url.to_string(),
                format!("HTTP status {}", response.status()),
            ));
        }

        response
            .content_length()
            .ok_or_else(|| ArchiveError::Transport(url.to_string(), "no content length".to_string()))
    }

    async fn download(&self, url: &str, destination: &Path) -> Result<()> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(ArchiveError::Transport(
                url.to_string(),
                format!("HTTP status {}", response.status()),
            ));
        }

        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ArchiveError::IoPath(parent.display().to_string(), e))?;
        }

        // Stream into a temp file next to the destination, then rename, so
        // aborted transfers never leave a partial file under the final name.
        let dir = destination.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| ArchiveError::IoPath(dir.display().to_string(), e))?;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            tmp.write_all(&chunk)
                .map_err(|e| ArchiveError::IoPath(destination.display().to_string(), e))?;
        }

        tmp.persist(destination)
            .map_err(|e| ArchiveError::IoPath(destination.display().to_string(), e.error))?;

        Ok(())
    }
}
