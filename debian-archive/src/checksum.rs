// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Checksum records and multi-digest computation.

Every artifact tracked by the catalog carries a [ChecksumInfo] describing its
size and its MD5/SHA-1/SHA-256/SHA-512 digests. Fields may be individually
empty when a source (e.g. a remote index) did not advertise them; missing
fields are filled in on demand by re-reading the file.
*/

use {
    crate::error::Result,
    md5::Md5,
    serde::{Deserialize, Serialize},
    sha1::Sha1,
    sha2::{Digest, Sha256, Sha512},
    std::{
        io::{Read, Write},
        path::Path,
    },
};

/// Size and digests of a single file.
///
/// Digests are stored as lower-case hex strings; an empty string means the
/// digest is unknown.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChecksumInfo {
    #[serde(rename = "Size")]
    pub size: u64,
    #[serde(rename = "MD5", default)]
    pub md5: String,
    #[serde(rename = "SHA1", default)]
    pub sha1: String,
    #[serde(rename = "SHA256", default)]
    pub sha256: String,
    #[serde(rename = "SHA512", default)]
    pub sha512: String,
}

impl ChecksumInfo {
    /// Whether any digest field is missing.
    pub fn is_partial(&self) -> bool {
        self.md5.is_empty()
            || self.sha1.is_empty()
            || self.sha256.is_empty()
            || self.sha512.is_empty()
    }

    /// Compare against another record, looking only at fields both sides know.
    ///
    /// Size always participates; digests participate when non-empty on both
    /// sides.
    pub fn matches(&self, other: &ChecksumInfo) -> bool {
        if self.size != other.size {
            return false;
        }

        for (a, b) in [
            (&self.md5, &other.md5),
            (&self.sha1, &other.sha1),
            (&self.sha256, &other.sha256),
            (&self.sha512, &other.sha512),
        ] {
            if !a.is_empty() && !b.is_empty() && a != b {
                return false;
            }
        }

        true
    }

    /// Fill in any missing digest fields by reading the file at `path`.
    pub fn complete(&mut self, path: &Path) -> Result<()> {
        if !self.is_partial() {
            return Ok(());
        }

        let computed = checksums_for_file(path)?;
        self.size = computed.size;

        if self.md5.is_empty() {
            self.md5 = computed.md5;
        }
        if self.sha1.is_empty() {
            self.sha1 = computed.sha1;
        }
        if self.sha256.is_empty() {
            self.sha256 = computed.sha256;
        }
        if self.sha512.is_empty() {
            self.sha512 = computed.sha512;
        }

        Ok(())
    }
}

/// A writer computing all supported digests for content passing through it.
pub struct ChecksumWriter {
    size: u64,
    md5: Md5,
    sha1: Sha1,
    sha256: Sha256,
    sha512: Sha512,
}

impl Default for ChecksumWriter {
    fn default() -> Self {
        Self {
            size: 0,
            md5: Md5::new(),
            sha1: Sha1::new(),
            sha256: Sha256::new(),
            sha512: Sha512::new(),
        }
    }
}

impl ChecksumWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finish digesting and produce the complete [ChecksumInfo].
    pub fn finish(self) -> ChecksumInfo {
        ChecksumInfo {
            size: self.size,
            md5: hex::encode(self.md5.finalize()),
            sha1: hex::encode(self.sha1.finalize()),
            sha256: hex::encode(self.sha256.finalize()),
            sha512: hex::encode(self.sha512.finalize()),
        }
    }
}

impl Write for ChecksumWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.size += buf.len() as u64;
        self.md5.update(buf);
        self.sha1.update(buf);
        self.sha256.update(buf);
        self.sha512.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Compute the full set of checksums for the file at `path`.
pub fn checksums_for_file(path: &Path) -> Result<ChecksumInfo> {
    let mut file = std::fs::File::open(path)
        .map_err(|e| crate::error::ArchiveError::IoPath(path.display().to_string(), e))?;

    let mut writer = ChecksumWriter::new();
    let mut buf = [0u8; 32768];

    loop {
        let size = file.read(&mut buf)?;
        if size == 0 {
            break;
        }
        writer.write_all(&buf[0..size])?;
    }

    Ok(writer.finish())
}

/// Derive a stable 64-bit identity hash from a byte stream.
///
/// Used for the `files_hash` component of package keys. Taken as the leading
/// 8 bytes of the SHA-256 of the input so identical file sets produce the
/// same key across runs and machines.
pub fn identity_hash(data: &[u8]) -> u64 {
    let digest = Sha256::digest(data);
    u64::from_be_bytes(digest[0..8].try_into().expect("digest is 32 bytes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_writer_digests() {
        let mut w = ChecksumWriter::new();
        w.write_all(b"Welcome to Azure!").unwrap();
        let info = w.finish();

        assert_eq!(info.size, 17);
        assert_eq!(info.md5.len(), 32);
        assert_eq!(info.sha1.len(), 40);
        assert_eq!(info.sha256.len(), 64);
        assert_eq!(info.sha512.len(), 128);
        assert!(!info.is_partial());
    }

    #[test]
    fn file_checksums_match_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload");
        std::fs::write(&path, b"Quick brown fox jumps over black dog").unwrap();

        let from_file = checksums_for_file(&path).unwrap();

        let mut w = ChecksumWriter::new();
        w.write_all(b"Quick brown fox jumps over black dog").unwrap();
        assert_eq!(from_file, w.finish());
    }

    #[test]
    fn matches_ignores_unknown_fields() {
        let a = ChecksumInfo {
            size: 5,
            md5: "aa".into(),
            ..Default::default()
        };
        let b = ChecksumInfo {
            size: 5,
            sha256: "bb".into(),
            ..Default::default()
        };

        assert!(a.matches(&b));

        let c = ChecksumInfo {
            size: 5,
            md5: "cc".into(),
            ..Default::default()
        };
        assert!(!a.matches(&c));

        let d = ChecksumInfo {
            size: 6,
            ..Default::default()
        };
        assert!(!a.matches(&d));
    }

    #[test]
    fn identity_hash_is_stable() {
        assert_eq!(identity_hash(b"abc"), identity_hash(b"abc"));
        assert_ne!(identity_hash(b"abc"), identity_hash(b"abd"));
    }
}
