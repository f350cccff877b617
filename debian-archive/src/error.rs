// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use thiserror::Error;

/// Primary crate error type.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("I/O error on path {0}: {1:?}")]
    IoPath(String, std::io::Error),

    #[error("hex parsing error: {0:?}")]
    Hex(#[from] hex::FromHexError),

    #[error("encoding error: {0:?}")]
    Encode(#[from] serde_json::Error),

    #[cfg(feature = "http")]
    #[error("HTTP error: {0:?}")]
    Reqwest(#[from] reqwest::Error),

    #[error("{0} not found")]
    NotFound(String),

    #[error("package already exists and is different: {0}")]
    PackageConflict(String),

    #[error("file already exists and is different: {0}")]
    FileConflict(String),

    #[error("duplicate component name: {0}")]
    DuplicateComponent(String),

    #[error("checksum mismatch on {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("control file parse error: {0}")]
    ControlParse(String),

    #[error("failed to parse dependency expression: {0}")]
    DependencyParse(String),

    #[error("unsupported relation in Provides: {0}")]
    ProvidesRelation(String),

    #[error("invalid prefix {0}")]
    InvalidPrefix(String),

    #[error("invalid Source field: {0}")]
    InvalidSourceField(String),

    #[error("package source {0} too short")]
    SourceNameTooShort(String),

    #[error("no architectures defined, cannot verify dependencies")]
    NoArchitectures,

    #[error("unable to guess distribution name, please specify explicitly")]
    DistributionUnknown,

    #[error("unable to process package {0}: {1}")]
    PackageProcessing(String, Box<ArchiveError>),

    #[error("operation not supported by storage backend: {0}")]
    Unsupported(&'static str),

    #[error("transport error on {0}: {1}")]
    Transport(String, String),

    #[error("unexpected request for {0}")]
    UnexpectedRequest(String),

    #[error("operation cancelled")]
    Cancelled,
}

/// Result wrapper for this crate.
pub type Result<T> = std::result::Result<T, ArchiveError>;
