// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The download contract.

The HTTP transfer machinery is an external collaborator; mirror updates only
need a length probe and a streamed download with checksum verification.
Transient transport failures are retried with exponential backoff at this
layer; all other failures surface to the caller.
*/

use {
    crate::{
        cancel::CancellationToken,
        checksum::{checksums_for_file, ChecksumInfo},
        error::{ArchiveError, Result},
    },
    async_trait::async_trait,
    std::{
        collections::HashMap,
        path::Path,
        sync::Mutex,
        time::Duration,
    },
};

/// Downloads remote files.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Content length of the resource, from a length probe.
    async fn get_length(&self, url: &str) -> Result<u64>;

    /// Stream the resource to `destination`.
    async fn download(&self, url: &str, destination: &Path) -> Result<()>;

    /// Stream the resource to `destination` and verify its checksums.
    ///
    /// Only fields known in `expected` participate in verification. With
    /// `ignore_mismatch`, a mismatch is reported and tolerated.
    async fn download_with_checksum(
        &self,
        url: &str,
        destination: &Path,
        expected: &ChecksumInfo,
        ignore_mismatch: bool,
    ) -> Result<()> {
        self.download(url, destination).await?;

        let actual = checksums_for_file(destination)?;
        if !expected.matches(&actual) {
            if ignore_mismatch {
                log::warn!(
                    "checksums don't match: {:?} != {:?} for {}",
                    expected,
                    actual,
                    url
                );
            } else {
                return Err(ArchiveError::ChecksumMismatch {
                    path: url.to_string(),
                    expected: format!("{:?}", expected),
                    actual: format!("{:?}", actual),
                });
            }
        }

        Ok(())
    }
}

/// Retry a download with exponential backoff.
///
/// Transport errors are retried up to `max_tries`; every other error kind
/// aborts immediately, as does cancellation.
pub async fn download_with_retry(
    downloader: &dyn Downloader,
    url: &str,
    destination: &Path,
    expected: &ChecksumInfo,
    max_tries: u32,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut delay = Duration::from_millis(500);

    for attempt in 0.. {
        cancel.check()?;

        match downloader
            .download_with_checksum(url, destination, expected, false)
            .await
        {
            Ok(()) => return Ok(()),
            Err(e @ (ArchiveError::Transport(_, _) | ArchiveError::Io(_)))
                if attempt + 1 < max_tries =>
            {
                log::warn!("retrying download of {}: {}", url, e);
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => return Err(e),
        }
    }

    unreachable!("loop exits via return")
}

#[derive(Clone, Debug)]
struct ExpectedRequest {
    response: Option<String>,
    error: Option<String>,
}

/// A [Downloader] for tests, replaying installed expectations.
#[derive(Default)]
pub struct FakeDownloader {
    expected: Mutex<Vec<(String, ExpectedRequest)>>,
    any_expected: Mutex<HashMap<String, ExpectedRequest>>,
}

impl FakeDownloader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install an expectation on an upcoming download, in order.
    pub fn expect_response(self, url: impl Into<String>, response: impl Into<String>) -> Self {
        self.expected.lock().expect("lock poisoned").push((
            url.into(),
            ExpectedRequest {
                response: Some(response.into()),
                error: None,
            },
        ));
        self
    }

    /// Install an expectation satisfiable in any order (url must be unique).
    pub fn any_expect_response(self, url: impl Into<String>, response: impl Into<String>) -> Self {
        self.any_expected.lock().expect("lock poisoned").insert(
            url.into(),
            ExpectedRequest {
                response: Some(response.into()),
                error: None,
            },
        );
        self
    }

    /// Install an expectation that fails with an error.
    pub fn expect_error(self, url: impl Into<String>, error: impl Into<String>) -> Self {
        self.expected.lock().expect("lock poisoned").push((
            url.into(),
            ExpectedRequest {
                response: None,
                error: Some(error.into()),
            },
        ));
        self
    }

    /// Whether all planned downloads have happened.
    pub fn is_empty(&self) -> bool {
        self.expected.lock().expect("lock poisoned").is_empty()
    }

    fn next_expectation(&self, url: &str) -> Result<ExpectedRequest> {
        let mut expected = self.expected.lock().expect("lock poisoned");

        let expectation = if expected.first().map(|(u, _)| u.as_str()) == Some(url) {
            expected.remove(0).1
        } else if let Some(e) = self.any_expected.lock().expect("lock poisoned").remove(url) {
            e
        } else {
            return Err(ArchiveError::UnexpectedRequest(url.to_string()));
        };

        if let Some(error) = expectation.error {
            return Err(ArchiveError::Transport(url.to_string(), error));
        }

        Ok(expectation)
    }
}

#[async_trait]
impl Downloader for FakeDownloader {
    async fn get_length(&self, url: &str) -> Result<u64> {
        let expectation = self.next_expectation(url)?;
        Ok(expectation.response.unwrap_or_default().len() as u64)
    }

    async fn download(&self, url: &str, destination: &Path) -> Result<()> {
        let expectation = self.next_expectation(url)?;

        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ArchiveError::IoPath(parent.display().to_string(), e))?;
        }

        std::fs::write(destination, expectation.response.unwrap_or_default())
            .map_err(|e| ArchiveError::IoPath(destination.display().to_string(), e))?;

        Ok(())
    }
}
