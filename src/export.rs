// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! Mattermost bulk-import records and the output document writer.
//!
//! The bulk-import format is newline-delimited JSON: a leading version
//! record followed by one record per line, each shaped
//! `{"type": "<kind>", "<kind>": {...}}`. Media files referenced by
//! records live in a parallel `export-files/` tree inside the output
//! directory, and records carry output-relative paths into it.
//!
//! [`ExportWriter`] owns the output directory and the document handle
//! for the whole run. Records append in call order; the media copy
//! operations re-read and rewrite on every call and never deduplicate.
//!
//! # Example
//!
//! ```
//! use hc2mm::export::{Emoji, Record};
//!
//! let record = Record::Emoji {
//!     emoji: Emoji {
//!         name: "shipit".into(),
//!         image: "export-files/emojis/77/shipit.gif".into(),
//!     },
//! };
//!
//! let line = serde_json::to_string(&record).unwrap();
//! assert!(line.starts_with(r#"{"type":"emoji","emoji":"#));
//! ```

use crate::archive::{Archive, ArchiveError};
use serde::Serialize;
use snafu::prelude::*;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Name of the bulk-import document inside the output directory.
pub const EXPORT_FILENAME: &str = "hipchat-export.json";

/// Error type for export output failures.
#[derive(Debug, Snafu)]
pub enum ExportError {
    /// An output directory could not be created.
    #[snafu(display("failed to create output directory {}: {source}", path.display()))]
    CreateDir {
        /// The directory that could not be created.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The output document could not be created.
    #[snafu(display("failed to create {}: {source}", path.display()))]
    CreateFile {
        /// The document path.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A record could not be serialized or written.
    #[snafu(display("failed to write export record: {source}"))]
    WriteRecord {
        /// The underlying serialization or I/O error.
        source: serde_json::Error,
    },

    /// The document could not be written or flushed.
    #[snafu(display("failed to write export document: {source}"))]
    Document {
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A media reference did not have the expected segment count.
    #[snafu(display("invalid media path {path:?}"))]
    MediaPath {
        /// The malformed reference.
        path: String,
    },

    /// A referenced media file could not be copied out of the archive.
    #[snafu(display("failed to copy media file: {source}"))]
    CopyMedia {
        /// The underlying archive error.
        source: ArchiveError,
    },
}

/// The synthetic team record. Every migrated channel and membership
/// references this team by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Team {
    /// Unique team slug.
    pub name: String,

    /// Human-readable name.
    pub display_name: String,

    /// `"I"` (invite-only) or `"O"` (open).
    #[serde(rename = "type")]
    pub team_type: String,

    /// Free-form description.
    pub description: String,

    /// Whether anyone may join without an invite.
    pub allow_open_invite: bool,
}

/// A channel derived from a source room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Channel {
    /// Owning team slug.
    pub team: String,

    /// Unique channel slug, from the room's canonical name.
    pub name: String,

    /// Human-readable name.
    pub display_name: String,

    /// `"O"` for open channels, `"P"` for private ones.
    #[serde(rename = "type")]
    pub channel_type: String,

    /// Channel header, from the room topic.
    pub header: String,

    /// Channel purpose; the source has no equivalent.
    pub purpose: String,
}

/// One channel membership inside a user's team entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelMembership {
    /// Channel slug.
    pub name: String,

    /// `"channel_user"`, or `"channel_admin channel_user"` for admins.
    pub roles: String,
}

/// A user's membership in the synthetic team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeamMembership {
    /// Team slug.
    pub name: String,

    /// Always `"team_user"`.
    pub roles: String,

    /// Per-channel memberships.
    pub channels: Vec<ChannelMembership>,
}

/// An account derived from a source user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    /// Output-relative avatar path, empty when the user had none.
    pub profile_image: String,

    /// Lowercased mention handle.
    pub username: String,

    /// Account email address.
    pub email: String,

    /// Full display name.
    pub nickname: String,

    /// Job title.
    pub position: String,

    /// `"system_admin system_user"` or `"system_user"`.
    pub roles: String,

    /// Team memberships; exactly one entry for the synthetic team.
    pub teams: Vec<TeamMembership>,
}

/// A custom emoji.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Emoji {
    /// Emoji name, from the emoticon shortcut.
    pub name: String,

    /// Output-relative image path.
    pub image: String,
}

/// An attachment reference carried by a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    /// Output-relative file path.
    pub path: String,
}

/// A channel message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Post {
    /// Owning team slug.
    pub team: String,

    /// Channel slug.
    pub channel: String,

    /// Author username.
    pub user: String,

    /// Message body.
    pub message: String,

    /// Creation time in whole Unix-epoch seconds.
    pub create_at: i64,

    /// Zero or one attachments.
    pub attachments: Vec<Attachment>,
}

/// A deduplicated one-on-one messaging context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectChannel {
    /// The two member usernames, in ascending source-id order.
    pub members: Vec<String>,
}

/// A private message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectPost {
    /// `[sender, receiver]`, sender first — unlike the channel's
    /// `members`, which is id-ordered.
    pub channel_members: Vec<String>,

    /// Author username.
    pub user: String,

    /// Message body.
    pub message: String,

    /// Creation time in whole Unix-epoch seconds.
    pub create_at: i64,

    /// Zero or one attachments.
    pub attachments: Vec<Attachment>,
}

/// One line of the bulk-import document.
///
/// Serializes as `{"type": "<kind>", "<kind>": {...}}`; the importer
/// dispatches on the `type` tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Record {
    /// Format version marker, the first line of every export.
    Version {
        /// Bulk-import format version.
        version: u32,
    },

    /// The synthetic team.
    Team {
        /// Team payload.
        team: Team,
    },

    /// A channel derived from a room.
    Channel {
        /// Channel payload.
        channel: Channel,
    },

    /// An account derived from a user.
    User {
        /// User payload.
        user: User,
    },

    /// A custom emoji.
    Emoji {
        /// Emoji payload.
        emoji: Emoji,
    },

    /// A channel message.
    Post {
        /// Post payload.
        post: Post,
    },

    /// A deduplicated direct-message channel.
    DirectChannel {
        /// Direct channel payload.
        direct_channel: DirectChannel,
    },

    /// A private message.
    DirectPost {
        /// Direct post payload.
        direct_post: DirectPost,
    },
}

/// Writes the bulk-import document and the mirrored media tree.
pub struct ExportWriter {
    output_dir: PathBuf,
    document: BufWriter<File>,
}

impl ExportWriter {
    /// Opens `output_dir` for writing.
    ///
    /// The directory tree is created if needed (an existing directory
    /// is reused, not purged), the document is truncated, and the
    /// version record is written as the first line.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or document cannot be created.
    pub fn open(output_dir: &Path) -> Result<Self, ExportError> {
        fs::create_dir_all(output_dir).context(CreateDirSnafu { path: output_dir })?;

        let document_path = output_dir.join(EXPORT_FILENAME);
        let document = File::create(&document_path).context(CreateFileSnafu {
            path: document_path.as_path(),
        })?;

        let mut writer = Self {
            output_dir: output_dir.to_path_buf(),
            document: BufWriter::new(document),
        };
        writer.write_record(&Record::Version { version: 1 })?;
        Ok(writer)
    }

    /// Appends one record line to the document.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn write_record(&mut self, record: &Record) -> Result<(), ExportError> {
        serde_json::to_writer(&mut self.document, record).context(WriteRecordSnafu)?;
        self.document.write_all(b"\n").context(DocumentSnafu)
    }

    /// Copies an emoticon image into the output tree.
    ///
    /// `path` has shape `<emoticonId>/<filename>` and maps to the
    /// archive entry `files/img/emoticons/<emoticonId>/<filename>`.
    /// Returns the output-relative path of the copy.
    ///
    /// # Errors
    ///
    /// Returns an error if the reference is malformed or the copy
    /// fails.
    pub fn copy_emoji_image(&self, archive: &Archive, path: &str) -> Result<String, ExportError> {
        let (emoji_id, filename) = media_segments(path, 0)?;
        self.copy_media(
            archive,
            &format!("files/img/emoticons/{emoji_id}/{filename}"),
            "emojis",
            emoji_id,
            filename,
        )
    }

    /// Copies a post attachment into the output tree.
    ///
    /// `path` has shape `<directoryId>/<filename>` and maps to the
    /// archive entry `users/files/<directoryId>/<filename>`. Returns
    /// the output-relative path of the copy.
    ///
    /// # Errors
    ///
    /// Returns an error if the reference is malformed or the copy
    /// fails.
    pub fn copy_post_attachment(
        &self,
        archive: &Archive,
        path: &str,
    ) -> Result<String, ExportError> {
        let (directory, filename) = media_segments(path, 0)?;
        self.copy_media(
            archive,
            &format!("users/files/{directory}/{filename}"),
            "attachments",
            directory,
            filename,
        )
    }

    /// Copies a user avatar into the output tree.
    ///
    /// `path` is a four-segment reference whose 3rd and 4th segments
    /// are `<userId>/<filename>`, mapping to the archive entry
    /// `users/<userId>/avatars/<filename>`. Returns the
    /// output-relative path of the copy.
    ///
    /// # Errors
    ///
    /// Returns an error if the reference is malformed or the copy
    /// fails.
    pub fn copy_user_avatar(&self, archive: &Archive, path: &str) -> Result<String, ExportError> {
        let (user_id, filename) = media_segments(path, 2)?;
        self.copy_media(
            archive,
            &format!("users/{user_id}/avatars/{filename}"),
            "users",
            user_id,
            filename,
        )
    }

    /// Flushes the buffered document.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub fn finish(mut self) -> Result<(), ExportError> {
        self.document.flush().context(DocumentSnafu)
    }

    fn copy_media(
        &self,
        archive: &Archive,
        entry: &str,
        kind_dir: &str,
        directory: &str,
        filename: &str,
    ) -> Result<String, ExportError> {
        let target_dir = self
            .output_dir
            .join("export-files")
            .join(kind_dir)
            .join(directory);
        fs::create_dir_all(&target_dir).context(CreateDirSnafu {
            path: target_dir.as_path(),
        })?;

        archive
            .extract_entry_to(entry, &target_dir.join(filename))
            .context(CopyMediaSnafu)?;

        Ok(format!("export-files/{kind_dir}/{directory}/{filename}"))
    }
}

/// Splits a media reference into the directory and filename segments
/// the output tree is keyed on, skipping `skip` leading segments.
fn media_segments(path: &str, skip: usize) -> Result<(&str, &str), ExportError> {
    let mut segments = path.split('/').skip(skip);
    match (segments.next(), segments.next()) {
        (Some(directory), Some(filename)) if !directory.is_empty() && !filename.is_empty() => {
            Ok((directory, filename))
        }
        _ => MediaPathSnafu { path }.fail(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn archive_with(entries: &[(&str, &[u8])]) -> (tempfile::TempDir, Archive) {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        let path = dir.path().join("export.tar");
        std::fs::write(&path, builder.into_inner().unwrap()).unwrap();
        let archive = Archive::open(&path).unwrap();
        (dir, archive)
    }

    #[test]
    fn version_record_shape() {
        let line = serde_json::to_string(&Record::Version { version: 1 }).unwrap();
        assert_eq!(line, r#"{"type":"version","version":1}"#);
    }

    #[test]
    fn record_payload_nests_under_kind_field() {
        let record = Record::DirectChannel {
            direct_channel: DirectChannel {
                members: vec!["alice".into(), "bob".into()],
            },
        };
        let line = serde_json::to_string(&record).unwrap();
        assert_eq!(
            line,
            r#"{"type":"direct_channel","direct_channel":{"members":["alice","bob"]}}"#
        );
    }

    #[test]
    fn team_record_uses_type_field_name() {
        let record = Record::Team {
            team: Team {
                name: "hipchat".into(),
                display_name: "Hipchat".into(),
                team_type: "I".into(),
                description: String::new(),
                allow_open_invite: false,
            },
        };
        let line = serde_json::to_string(&record).unwrap();
        assert!(line.contains(r#""type":"team""#));
        // The payload's team_type field serializes as "type" too.
        assert!(line.contains(r#""team":{"name":"hipchat","display_name":"Hipchat","type":"I""#));
    }

    #[test]
    fn open_writes_version_first_and_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");

        let mut writer = ExportWriter::open(&out).unwrap();
        writer
            .write_record(&Record::Emoji {
                emoji: Emoji {
                    name: "shipit".into(),
                    image: "export-files/emojis/77/shipit.gif".into(),
                },
            })
            .unwrap();
        writer.finish().unwrap();

        // Reopening the same directory starts the document over.
        let writer = ExportWriter::open(&out).unwrap();
        writer.finish().unwrap();

        let document = std::fs::read_to_string(out.join(EXPORT_FILENAME)).unwrap();
        assert_eq!(document, "{\"type\":\"version\",\"version\":1}\n");
    }

    #[test]
    fn copies_emoji_image() {
        let (dir, archive) = archive_with(&[("files/img/emoticons/77/shipit.gif", b"gif-bytes")]);
        let out = dir.path().join("out");
        let writer = ExportWriter::open(&out).unwrap();

        let copied = writer.copy_emoji_image(&archive, "77/shipit.gif").unwrap();
        assert_eq!(copied, "export-files/emojis/77/shipit.gif");
        assert_eq!(std::fs::read(out.join(&copied)).unwrap(), b"gif-bytes");
    }

    #[test]
    fn copies_post_attachment() {
        let (dir, archive) = archive_with(&[("users/files/abc123/log.txt", b"deploy log")]);
        let out = dir.path().join("out");
        let writer = ExportWriter::open(&out).unwrap();

        let copied = writer
            .copy_post_attachment(&archive, "abc123/log.txt")
            .unwrap();
        assert_eq!(copied, "export-files/attachments/abc123/log.txt");
        assert_eq!(std::fs::read(out.join(&copied)).unwrap(), b"deploy log");
    }

    #[test]
    fn copies_user_avatar_from_four_segment_path() {
        let (dir, archive) = archive_with(&[("users/42/avatars/alice.png", b"png-bytes")]);
        let out = dir.path().join("out");
        let writer = ExportWriter::open(&out).unwrap();

        let copied = writer
            .copy_user_avatar(&archive, "photos/original/42/alice.png")
            .unwrap();
        assert_eq!(copied, "export-files/users/42/alice.png");
        assert_eq!(std::fs::read(out.join(&copied)).unwrap(), b"png-bytes");
    }

    #[test]
    fn repeated_copies_rewrite_the_same_file() {
        let (dir, archive) = archive_with(&[("users/files/abc123/log.txt", b"deploy log")]);
        let out = dir.path().join("out");
        let writer = ExportWriter::open(&out).unwrap();

        let first = writer
            .copy_post_attachment(&archive, "abc123/log.txt")
            .unwrap();
        let second = writer
            .copy_post_attachment(&archive, "abc123/log.txt")
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(std::fs::read(out.join(&second)).unwrap(), b"deploy log");
    }

    #[test]
    fn malformed_media_path_is_an_error() {
        let (dir, archive) = archive_with(&[]);
        let writer = ExportWriter::open(&dir.path().join("out")).unwrap();

        let err = writer.copy_emoji_image(&archive, "no-filename").unwrap_err();
        assert!(matches!(err, ExportError::MediaPath { .. }));

        let err = writer
            .copy_user_avatar(&archive, "photos/original")
            .unwrap_err();
        assert!(matches!(err, ExportError::MediaPath { .. }));
    }

    #[test]
    fn missing_media_entry_is_an_error() {
        let (dir, archive) = archive_with(&[]);
        let writer = ExportWriter::open(&dir.path().join("out")).unwrap();

        let err = writer
            .copy_emoji_image(&archive, "77/shipit.gif")
            .unwrap_err();
        assert!(matches!(err, ExportError::CopyMedia { .. }));
    }
}
