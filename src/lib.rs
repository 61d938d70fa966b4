// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! Convert HipChat export archives to the Mattermost bulk-import format.
//!
//! A HipChat export is a tar archive (usually gzip-compressed) bundling
//! JSON descriptors — rooms, users, emoticons, per-room and per-user
//! message histories — with the media files they reference. This crate:
//!
//! 1. Stages the archive for random-access entry reads
//! 2. Maps rooms to channels, users to accounts, and both kinds of
//!    message history to posts, deduplicating direct-message channels
//!    down to one per user pair
//! 3. Emits a newline-delimited JSON document plus a mirrored
//!    `export-files/` media tree, ready for `mattermost import bulk`
//!
//! # Example
//!
//! ```no_run
//! use hc2mm::archive::Archive;
//! use hc2mm::convert::{ConvertOptions, convert};
//! use hc2mm::export::ExportWriter;
//! use std::path::Path;
//!
//! let archive = Archive::open(Path::new("export.tar.gz")).unwrap();
//! let mut writer = ExportWriter::open(Path::new("out")).unwrap();
//!
//! let summary = convert(&archive, &mut writer, &ConvertOptions::default()).unwrap();
//! writer.finish().unwrap();
//!
//! println!("{} posts migrated", summary.posts);
//! ```
//!
//! # Modules
//!
//! - [`archive`]: staged random-access reads over the export tarball
//! - [`parser`]: typed representations of the HipChat descriptors
//! - [`export`]: bulk-import records and the output document writer
//! - [`convert`]: the staged transformation pipeline

#![deny(missing_docs)]

pub mod archive;
pub mod convert;
pub mod export;
pub mod parser;
