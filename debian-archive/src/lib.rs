// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian archive management.

This crate implements a Debian-style archive manager: it ingests binary,
source and udeb packages from remote mirrors or local uploads, stores their
bodies in a deduplicated content-addressed pool, organizes them into
immutable snapshots and mutable local repositories, resolves inter-package
dependencies across those sets, and publishes them as a signed,
standards-conforming APT repository that unmodified `apt` clients can
consume.

# A Tour of Functionality

Control files consist of *stanzas* of `Field: value` lines; [control]
defines the [control::Stanza] type and the streaming
[control::StanzaReader]. Debian version ordering lives in [package_version];
the dependency meta language (`libc6 (>= 2.4) | libc6.1`) in [dependency].

A [package::Package] is the catalog entity for a single package. Packages
aggregate into a [package_list::PackageList], which when indexed supports
dependency search ([package_list::PackageList::search]), dependency
verification and query-driven filtering. The durable identity of a package
set is a [ref_list::PackageRefList], a sorted list of package keys with
merge/subtract/diff algebra.

Package bodies live in the content-addressed [pool::PackagePool]. Catalog
entities ([remote_repo::RemoteRepo], [local_repo::LocalRepo],
[snapshot::Snapshot], [publish::PublishedRepo]) persist through the
collections in [collection] over any ordered key-value store implementing
[database::Database].

Publishing is driven by [publish::PublishedRepo::publish]: index files are
built through [index_files::IndexFiles], compressed, checksummed, uploaded
under a temporary suffix onto a [storage::PublishedStorage] backend (local
filesystem, S3, Azure Blob or OpenStack Swift) and committed with an atomic
rename pass, optionally signed through a [signer::Signer] and exposed via
the APT `by-hash` layout.

# Crate Features

The enabled-by-default `http` feature provides the reqwest-based downloader
and the Azure/Swift storage backends; `s3` provides the S3 backend.
*/

pub mod cancel;
pub mod checksum;
pub mod collection;
pub mod compression;
pub mod control;
pub mod database;
pub mod dependency;
pub mod download;
pub mod error;
#[cfg(feature = "http")]
pub mod http;
pub mod index_files;
pub mod local_repo;
pub mod package;
pub mod package_list;
pub mod package_version;
pub mod pool;
pub mod publish;
pub mod query;
pub mod ref_list;
pub mod remote_repo;
pub mod signer;
pub mod snapshot;
pub mod storage;
