// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! Random-access reads over a HipChat export tarball.
//!
//! Exports are tar archives, usually gzip-compressed. The conversion
//! pipeline reads descriptor entries out of catalog order and scans the
//! private-message histories twice, so [`Archive::open`] unpacks the
//! container into a temporary staging directory once and serves every
//! later read from there. The staging directory is removed when the
//! [`Archive`] is dropped.

use flate2::read::GzDecoder;
use snafu::prelude::*;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Error type for archive access failures.
#[derive(Debug, Snafu)]
pub enum ArchiveError {
    /// The archive file could not be opened or read.
    #[snafu(display("failed to open archive {}: {source}", path.display()))]
    Open {
        /// Path of the archive file.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The container could not be unpacked (truncated or not a tar).
    #[snafu(display("failed to unpack archive {}: {source}", path.display()))]
    Unpack {
        /// Path of the archive file.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The staging directory could not be created.
    #[snafu(display("failed to create staging directory: {source}"))]
    Staging {
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A named entry is absent from the archive.
    #[snafu(display("archive has no entry {entry}"))]
    EntryNotFound {
        /// The entry name that was requested.
        entry: String,
    },

    /// An entry's bytes could not be read back from staging.
    #[snafu(display("failed to read entry {entry}: {source}"))]
    ReadEntry {
        /// The entry name that was requested.
        entry: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Extracted bytes could not be written to their destination.
    #[snafu(display("failed to write {}: {source}", path.display()))]
    Write {
        /// The destination path.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// A HipChat export archive staged for random-access reads.
#[derive(Debug)]
pub struct Archive {
    staging: TempDir,
}

impl Archive {
    /// Opens `path` as a tar or gzip-compressed tar archive.
    ///
    /// Compression is sniffed from the gzip magic bytes, not the file
    /// name. The whole container is unpacked into a temporary staging
    /// directory that lives as long as the returned value.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Open`] when the file cannot be read and
    /// [`ArchiveError::Unpack`] when it is not a valid archive.
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let mut file = File::open(path).context(OpenSnafu { path })?;

        let mut magic = [0_u8; 2];
        let n = file.read(&mut magic).context(OpenSnafu { path })?;
        file.seek(SeekFrom::Start(0)).context(OpenSnafu { path })?;

        let staging = TempDir::new().context(StagingSnafu)?;
        let reader = BufReader::new(file);
        if n == magic.len() && magic == GZIP_MAGIC {
            let mut container = tar::Archive::new(GzDecoder::new(reader));
            container.unpack(staging.path()).context(UnpackSnafu { path })?;
        } else {
            let mut container = tar::Archive::new(reader);
            container.unpack(staging.path()).context(UnpackSnafu { path })?;
        }

        Ok(Self { staging })
    }

    /// Reads the named entry into memory.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::EntryNotFound`] if the archive has no
    /// such member.
    pub fn read_entry(&self, entry: &str) -> Result<Vec<u8>, ArchiveError> {
        let path = self.staging.path().join(entry);
        ensure!(path.is_file(), EntryNotFoundSnafu { entry });
        std::fs::read(&path).context(ReadEntrySnafu { entry })
    }

    /// Copies the named entry's raw bytes to `dest`.
    ///
    /// The destination's parent directory must already exist; no
    /// transformation is applied to the contents.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::EntryNotFound`] if the archive has no
    /// such member, or [`ArchiveError::Write`] if the copy fails.
    pub fn extract_entry_to(&self, entry: &str, dest: &Path) -> Result<(), ArchiveError> {
        let path = self.staging.path().join(entry);
        ensure!(path.is_file(), EntryNotFoundSnafu { entry });
        std::fs::copy(&path, dest).context(WriteSnafu { path: dest })?;
        Ok(())
    }
}
