// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Index file compression.

Index files are staged on disk before publication; compressed variants are
produced as sibling files (`.gz`, `.bz2`) next to the plain one.
*/

use {
    crate::error::{ArchiveError, Result},
    bzip2::write::BzEncoder,
    flate2::{write::GzEncoder, Compression as GzLevel},
    std::{
        fs,
        io::{self, Write},
        path::Path,
    },
};

/// Produce compressed siblings of a staged file.
///
/// Always generates `<path>.gz`; also generates `<path>.bz2` unless
/// `only_gzip` is set.
pub fn compress_file(path: &Path, only_gzip: bool) -> Result<()> {
    let mut source = fs::File::open(path)
        .map_err(|e| ArchiveError::IoPath(path.display().to_string(), e))?;

    let gz_path = sibling(path, ".gz");
    let gz_file = fs::File::create(&gz_path)
        .map_err(|e| ArchiveError::IoPath(gz_path.display().to_string(), e))?;
    let mut encoder = GzEncoder::new(gz_file, GzLevel::default());
    io::copy(&mut source, &mut encoder)?;
    encoder.finish()?.flush()?;

    if !only_gzip {
        let mut source = fs::File::open(path)
            .map_err(|e| ArchiveError::IoPath(path.display().to_string(), e))?;

        let bz2_path = sibling(path, ".bz2");
        let bz2_file = fs::File::create(&bz2_path)
            .map_err(|e| ArchiveError::IoPath(bz2_path.display().to_string(), e))?;
        let mut encoder = BzEncoder::new(bz2_file, bzip2::Compression::default());
        io::copy(&mut source, &mut encoder)?;
        encoder.finish()?.flush()?;
    }

    Ok(())
}

fn sibling(path: &Path, ext: &str) -> std::path::PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(ext);
    s.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    const TEST_STRING: &str =
        "Quick brown fox jumps over black dog and runs away... Really far away... who knows?";

    #[test]
    fn compress_produces_both_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Packages");
        fs::write(&path, TEST_STRING).unwrap();

        compress_file(&path, false).unwrap();

        let gz = fs::File::open(dir.path().join("Packages.gz")).unwrap();
        let mut decoded = String::new();
        GzDecoder::new(gz).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, TEST_STRING);

        let bz2 = fs::File::open(dir.path().join("Packages.bz2")).unwrap();
        let mut decoded = String::new();
        bzip2::read::BzDecoder::new(bz2)
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, TEST_STRING);
    }

    #[test]
    fn only_gzip_skips_bz2() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Contents-i386");
        fs::write(&path, TEST_STRING).unwrap();

        compress_file(&path, true).unwrap();

        assert!(dir.path().join("Contents-i386.gz").exists());
        assert!(!dir.path().join("Contents-i386.bz2").exists());
    }
}
