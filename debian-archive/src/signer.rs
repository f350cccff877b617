// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Release signing.

Signing is performed by an external GPG implementation; the publish pipeline
only needs detached and cleartext signatures written to supplied paths.
*/

use {
    crate::error::{ArchiveError, Result},
    std::path::Path,
    std::process::Command,
};

/// Produces signatures over staged index files.
pub trait Signer: Send + Sync {
    /// Write a detached armored signature of `source` to `destination`.
    fn detached_sign(&self, source: &Path, destination: &Path) -> Result<()>;

    /// Write a cleartext-signed copy of `source` to `destination`.
    fn clear_sign(&self, source: &Path, destination: &Path) -> Result<()>;
}

/// Signer shelling out to the `gpg` binary.
pub struct GpgSigner {
    key_ref: Option<String>,
    passphrase_file: Option<String>,
    batch: bool,
}

impl Default for GpgSigner {
    fn default() -> Self {
        Self {
            key_ref: None,
            passphrase_file: None,
            batch: true,
        }
    }
}

impl GpgSigner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_key(&mut self, key_ref: impl Into<String>) {
        self.key_ref = Some(key_ref.into());
    }

    pub fn set_passphrase_file(&mut self, path: impl Into<String>) {
        self.passphrase_file = Some(path.into());
    }

    pub fn set_batch(&mut self, batch: bool) {
        self.batch = batch;
    }

    fn run(&self, mode: &str, source: &Path, destination: &Path) -> Result<()> {
        let mut cmd = Command::new("gpg");
        cmd.arg(mode).arg("--armor").arg("--yes");

        if self.batch {
            cmd.arg("--batch").arg("--pinentry-mode").arg("loopback");
        }
        if let Some(key) = &self.key_ref {
            cmd.arg("--local-user").arg(key);
        }
        if let Some(passphrase_file) = &self.passphrase_file {
            cmd.arg("--passphrase-file").arg(passphrase_file);
        }

        cmd.arg("--output").arg(destination).arg(source);

        let status = cmd.status()?;
        if !status.success() {
            return Err(ArchiveError::Transport(
                source.display().to_string(),
                format!("gpg exited with {}", status),
            ));
        }

        Ok(())
    }
}

impl Signer for GpgSigner {
    fn detached_sign(&self, source: &Path, destination: &Path) -> Result<()> {
        self.run("--detach-sign", source, destination)
    }

    fn clear_sign(&self, source: &Path, destination: &Path) -> Result<()> {
        self.run("--clearsign", source, destination)
    }
}

/// Signer producing empty signature files. Used by tests and unsigned
/// publishes that still want the full file layout.
pub struct NullSigner;

impl Signer for NullSigner {
    fn detached_sign(&self, _source: &Path, destination: &Path) -> Result<()> {
        std::fs::write(destination, b"")?;
        Ok(())
    }

    fn clear_sign(&self, _source: &Path, destination: &Path) -> Result<()> {
        std::fs::write(destination, b"")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_signer_writes_empty_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("Release");
        std::fs::write(&source, b"Origin: test\n").unwrap();

        let signature = dir.path().join("Release.gpg");
        NullSigner.detached_sign(&source, &signature).unwrap();
        assert_eq!(std::fs::read(&signature).unwrap(), b"");

        let inline = dir.path().join("InRelease");
        NullSigner.clear_sign(&source, &inline).unwrap();
        assert!(inline.exists());
    }
}
