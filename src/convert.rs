// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! The HipChat-to-Mattermost transformation pipeline.
//!
//! [`convert`] runs seven stages strictly in sequence: team emission,
//! emoticons, rooms, users, channel histories, direct-channel
//! discovery, and direct posts. Each stage fully consumes its
//! descriptor and fills the lookup tables later stages resolve
//! against, so a record is never emitted before everything it
//! references. The private-message histories are scanned twice —
//! discovery first, emission second — so every `direct_channel`
//! precedes every `direct_post` in the output stream.
//!
//! Lookup tables are explicit values passed between stage functions,
//! not ambient state, and are discarded when the run completes.

use crate::archive::{Archive, ArchiveError};
use crate::export::{self, ExportWriter, Record};
use crate::parser::{self, MessageAttachment, ParseError};
use snafu::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Name of the synthetic team all migrated records belong to.
pub const TEAM_NAME: &str = "hipchat";

/// Behavior switches for a conversion run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConvertOptions {
    /// Abort when a message references a user outside the accepted
    /// set, instead of skipping the message with a warning.
    pub strict: bool,

    /// Emit messages flagged deleted instead of skipping them.
    pub keep_deleted: bool,

    /// Suppress informational stderr lines.
    pub quiet: bool,
}

/// Error type for conversion failures.
#[derive(Debug, Snafu)]
pub enum ConvertError {
    /// An archive entry could not be read.
    #[snafu(display("failed to read {entry}: {source}"))]
    ReadEntry {
        /// The entry name.
        entry: String,
        /// The underlying archive error.
        source: ArchiveError,
    },

    /// A descriptor did not parse.
    #[snafu(display("failed to parse {entry}: {source}"))]
    ParseEntry {
        /// The entry name.
        entry: String,
        /// The underlying parse error.
        source: ParseError,
    },

    /// A message carried an unusable timestamp.
    #[snafu(display("message {id} in {entry} has an invalid timestamp: {source}"))]
    MessageTimestamp {
        /// The history entry name.
        entry: String,
        /// The message id.
        id: String,
        /// The underlying parse error.
        source: ParseError,
    },

    /// A record or media file could not be written.
    #[snafu(display("failed to write export: {source}"))]
    WriteExport {
        /// The underlying export error.
        source: export::ExportError,
    },

    /// Strict mode: a message referenced a user outside the accepted
    /// set.
    #[snafu(display("message {id} references unknown user {user}"))]
    UnknownUser {
        /// The message id.
        id: String,
        /// The unresolvable user id.
        user: u64,
    },

    /// Strict mode: a direct channel referenced a user outside the
    /// accepted set.
    #[snafu(display("direct channel references unknown user {member}"))]
    UnknownMember {
        /// The unresolvable user id.
        member: u64,
    },
}

/// Counts of what a conversion run emitted and skipped.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Summary {
    /// Channels emitted.
    pub channels: usize,

    /// Users emitted.
    pub users: usize,

    /// Custom emoji emitted.
    pub emojis: usize,

    /// Channel posts emitted.
    pub posts: usize,

    /// Direct channels emitted.
    pub direct_channels: usize,

    /// Direct posts emitted.
    pub direct_posts: usize,

    /// Messages dropped because they were deleted or referenced an
    /// unknown user.
    pub skipped_messages: usize,
}

/// Cross-reference tables built by the room stage.
///
/// Deleted rooms never enter any of these, which is what keeps their
/// histories and memberships out of every later stage.
#[derive(Debug, Default)]
struct RoomTables {
    /// Room id → canonical channel name.
    names: BTreeMap<u64, String>,

    /// User id → channels the user is a member of, in catalog order.
    members: BTreeMap<u64, Vec<String>>,

    /// User id → channels the user administers, in catalog order.
    admins: BTreeMap<u64, Vec<String>>,
}

/// User id → lowercased username, for every accepted (non-guest,
/// non-deleted) account.
type UserNames = BTreeMap<u64, String>;

/// Runs the full conversion pipeline.
///
/// # Errors
///
/// Returns an error when a descriptor is missing or malformed, when
/// output cannot be written, or — in strict mode — when a message
/// references a user outside the accepted set.
pub fn convert(
    archive: &Archive,
    writer: &mut ExportWriter,
    options: &ConvertOptions,
) -> Result<Summary, ConvertError> {
    let mut summary = Summary::default();

    writer.write_record(&team_record()).context(WriteExportSnafu)?;

    convert_emoticons(archive, writer, &mut summary)?;
    let tables = convert_rooms(archive, writer, options, &mut summary)?;
    let user_names = convert_users(archive, writer, &tables, options, &mut summary)?;
    convert_room_histories(archive, writer, &tables.names, &user_names, options, &mut summary)?;

    let pairs = discover_direct_channels(archive, &user_names)?;
    emit_direct_channels(writer, &pairs, &user_names, options, &mut summary)?;
    convert_private_histories(archive, writer, &user_names, options, &mut summary)?;

    Ok(summary)
}

fn team_record() -> Record {
    Record::Team {
        team: export::Team {
            name: TEAM_NAME.to_owned(),
            display_name: "Hipchat".to_owned(),
            team_type: "I".to_owned(),
            description: String::new(),
            allow_open_invite: false,
        },
    }
}

/// Prints an informational line unless the run is quiet.
fn info(options: &ConvertOptions, message: fmt::Arguments) {
    if !options.quiet {
        eprintln!("{message}");
    }
}

fn read_entry(archive: &Archive, entry: &str) -> Result<Vec<u8>, ConvertError> {
    archive.read_entry(entry).context(ReadEntrySnafu { entry })
}

fn convert_emoticons(
    archive: &Archive,
    writer: &mut ExportWriter,
    summary: &mut Summary,
) -> Result<(), ConvertError> {
    let entry = "emoticons.json";
    let bytes = read_entry(archive, entry)?;
    let emoticons = parser::parse_emoticons(&bytes).context(ParseEntrySnafu { entry })?;

    for emoticon in emoticons {
        let image = writer
            .copy_emoji_image(archive, &emoticon.path)
            .context(WriteExportSnafu)?;
        writer
            .write_record(&Record::Emoji {
                emoji: export::Emoji {
                    name: emoticon.shortcut,
                    image,
                },
            })
            .context(WriteExportSnafu)?;
        summary.emojis += 1;
    }
    Ok(())
}

fn convert_rooms(
    archive: &Archive,
    writer: &mut ExportWriter,
    options: &ConvertOptions,
    summary: &mut Summary,
) -> Result<RoomTables, ConvertError> {
    let entry = "rooms.json";
    let bytes = read_entry(archive, entry)?;
    let rooms = parser::parse_rooms(&bytes).context(ParseEntrySnafu { entry })?;

    let mut tables = RoomTables::default();
    for room in rooms {
        if room.is_deleted {
            info(options, format_args!("deleted room {} not imported", room.name));
            continue;
        }
        if room.is_archived {
            info(
                options,
                format_args!(
                    "archived room {} imported as active; the import format has no archived state",
                    room.name
                ),
            );
        }

        let channel_type = if room.privacy == "public" { "O" } else { "P" };
        writer
            .write_record(&Record::Channel {
                channel: export::Channel {
                    team: TEAM_NAME.to_owned(),
                    name: room.canonical_name.clone(),
                    display_name: room.name,
                    channel_type: channel_type.to_owned(),
                    header: room.topic,
                    purpose: String::new(),
                },
            })
            .context(WriteExportSnafu)?;
        summary.channels += 1;

        for member in room.members {
            tables
                .members
                .entry(member)
                .or_default()
                .push(room.canonical_name.clone());
        }
        for admin in room.room_admins {
            tables
                .admins
                .entry(admin)
                .or_default()
                .push(room.canonical_name.clone());
        }
        tables.names.insert(room.id, room.canonical_name);
    }
    Ok(tables)
}

/// Builds the per-channel membership list for one user: member-table
/// entries first with the plain role, then admin-table entries with
/// the admin role. A user on both lists for a room keeps both
/// entries, which the import format accepts.
fn channel_memberships(user_id: u64, tables: &RoomTables) -> Vec<export::ChannelMembership> {
    let mut channels = Vec::new();
    if let Some(names) = tables.members.get(&user_id) {
        channels.extend(names.iter().map(|name| export::ChannelMembership {
            name: name.clone(),
            roles: "channel_user".to_owned(),
        }));
    }
    if let Some(names) = tables.admins.get(&user_id) {
        channels.extend(names.iter().map(|name| export::ChannelMembership {
            name: name.clone(),
            roles: "channel_admin channel_user".to_owned(),
        }));
    }
    channels
}

fn convert_users(
    archive: &Archive,
    writer: &mut ExportWriter,
    tables: &RoomTables,
    options: &ConvertOptions,
    summary: &mut Summary,
) -> Result<UserNames, ConvertError> {
    let entry = "users.json";
    let bytes = read_entry(archive, entry)?;
    let users = parser::parse_users(&bytes).context(ParseEntrySnafu { entry })?;

    let mut user_names = UserNames::new();
    for user in users {
        if user.account_type == "guest" {
            info(
                options,
                format_args!("guest account {} not imported", user.name),
            );
            continue;
        }
        if user.is_deleted {
            info(
                options,
                format_args!("deleted account {} not imported", user.name),
            );
            continue;
        }

        let profile_image = if user.avatar.is_empty() {
            String::new()
        } else {
            writer
                .copy_user_avatar(archive, &user.avatar)
                .context(WriteExportSnafu)?
        };

        let roles = if user.account_type == "admin" {
            "system_admin system_user"
        } else {
            "system_user"
        };

        // Authorship lookups use the same lowercased form as the
        // emitted username, so posts always resolve to an account.
        let username = user.mention_name.to_lowercase();

        writer
            .write_record(&Record::User {
                user: export::User {
                    profile_image,
                    username: username.clone(),
                    email: user.email,
                    nickname: user.name,
                    position: user.title,
                    roles: roles.to_owned(),
                    teams: vec![export::TeamMembership {
                        name: TEAM_NAME.to_owned(),
                        roles: "team_user".to_owned(),
                        channels: channel_memberships(user.id, tables),
                    }],
                },
            })
            .context(WriteExportSnafu)?;
        summary.users += 1;

        user_names.insert(user.id, username);
    }
    Ok(user_names)
}

/// Resolves a message participant against the accepted-user table.
///
/// A miss is fatal in strict mode; otherwise the message is dropped
/// with a warning so history from guests and deleted accounts never
/// gets misattributed.
fn resolve_user<'a>(
    user_id: u64,
    message_id: &str,
    user_names: &'a UserNames,
    options: &ConvertOptions,
    summary: &mut Summary,
) -> Result<Option<&'a str>, ConvertError> {
    match user_names.get(&user_id) {
        Some(name) => Ok(Some(name.as_str())),
        None if options.strict => UnknownUserSnafu {
            id: message_id,
            user: user_id,
        }
        .fail(),
        None => {
            info(
                options,
                format_args!("skipping message {message_id}: unknown user {user_id}"),
            );
            summary.skipped_messages += 1;
            Ok(None)
        }
    }
}

fn copy_attachment(
    archive: &Archive,
    writer: &ExportWriter,
    attachment: Option<&MessageAttachment>,
) -> Result<Vec<export::Attachment>, ConvertError> {
    match attachment {
        Some(attachment) => {
            let path = writer
                .copy_post_attachment(archive, &attachment.path)
                .context(WriteExportSnafu)?;
            Ok(vec![export::Attachment { path }])
        }
        None => Ok(Vec::new()),
    }
}

fn convert_room_histories(
    archive: &Archive,
    writer: &mut ExportWriter,
    room_names: &BTreeMap<u64, String>,
    user_names: &UserNames,
    options: &ConvertOptions,
    summary: &mut Summary,
) -> Result<(), ConvertError> {
    for (room_id, channel) in room_names {
        let entry = format!("rooms/{room_id}/history.json");
        let bytes = read_entry(archive, &entry)?;
        let history = parser::parse_room_history(&bytes).context(ParseEntrySnafu {
            entry: entry.as_str(),
        })?;

        for msg in history.into_iter().filter_map(|e| e.user_message) {
            if msg.deleted && !options.keep_deleted {
                info(options, format_args!("skipping deleted message {}", msg.id));
                summary.skipped_messages += 1;
                continue;
            }

            let Some(author) = resolve_user(msg.sender.id, &msg.id, user_names, options, summary)?
            else {
                continue;
            };
            let author = author.to_owned();

            let create_at =
                parser::parse_timestamp(&msg.timestamp).context(MessageTimestampSnafu {
                    entry: entry.as_str(),
                    id: msg.id.as_str(),
                })?;
            let attachments = copy_attachment(archive, writer, msg.attachment.as_ref())?;

            writer
                .write_record(&Record::Post {
                    post: export::Post {
                        team: TEAM_NAME.to_owned(),
                        channel: channel.clone(),
                        user: author,
                        message: msg.message,
                        create_at,
                        attachments,
                    },
                })
                .context(WriteExportSnafu)?;
            summary.posts += 1;
        }
    }
    Ok(())
}

/// First pass over the private-message histories: collect the
/// deduplicated set of user pairs. The key is the ascending id pair,
/// so direction and message count never produce a second channel.
fn discover_direct_channels(
    archive: &Archive,
    user_names: &UserNames,
) -> Result<BTreeSet<(u64, u64)>, ConvertError> {
    let mut pairs = BTreeSet::new();
    for user_id in user_names.keys() {
        let entry = format!("users/{user_id}/history.json");
        let bytes = read_entry(archive, &entry)?;
        let history = parser::parse_private_history(&bytes).context(ParseEntrySnafu {
            entry: entry.as_str(),
        })?;

        for msg in history.into_iter().filter_map(|e| e.private_message) {
            let low = msg.sender.id.min(msg.receiver.id);
            let high = msg.sender.id.max(msg.receiver.id);
            pairs.insert((low, high));
        }
    }
    Ok(pairs)
}

fn emit_direct_channels(
    writer: &mut ExportWriter,
    pairs: &BTreeSet<(u64, u64)>,
    user_names: &UserNames,
    options: &ConvertOptions,
    summary: &mut Summary,
) -> Result<(), ConvertError> {
    for &(low, high) in pairs {
        let (Some(first), Some(second)) = (user_names.get(&low), user_names.get(&high)) else {
            let missing = if user_names.contains_key(&low) { high } else { low };
            ensure!(!options.strict, UnknownMemberSnafu { member: missing });
            info(
                options,
                format_args!("skipping direct channel for unknown user {missing}"),
            );
            continue;
        };

        writer
            .write_record(&Record::DirectChannel {
                direct_channel: export::DirectChannel {
                    members: vec![first.clone(), second.clone()],
                },
            })
            .context(WriteExportSnafu)?;
        summary.direct_channels += 1;
    }
    Ok(())
}

/// Second pass over the private-message histories: emit the posts.
/// Runs only after every direct channel is out, so no post ever
/// precedes the channel it belongs to.
fn convert_private_histories(
    archive: &Archive,
    writer: &mut ExportWriter,
    user_names: &UserNames,
    options: &ConvertOptions,
    summary: &mut Summary,
) -> Result<(), ConvertError> {
    for user_id in user_names.keys() {
        let entry = format!("users/{user_id}/history.json");
        let bytes = read_entry(archive, &entry)?;
        let history = parser::parse_private_history(&bytes).context(ParseEntrySnafu {
            entry: entry.as_str(),
        })?;

        for msg in history.into_iter().filter_map(|e| e.private_message) {
            if msg.deleted && !options.keep_deleted {
                info(options, format_args!("skipping deleted message {}", msg.id));
                summary.skipped_messages += 1;
                continue;
            }

            let Some(sender) = resolve_user(msg.sender.id, &msg.id, user_names, options, summary)?
            else {
                continue;
            };
            let sender = sender.to_owned();
            let Some(receiver) =
                resolve_user(msg.receiver.id, &msg.id, user_names, options, summary)?
            else {
                continue;
            };
            let receiver = receiver.to_owned();

            let create_at =
                parser::parse_timestamp(&msg.timestamp).context(MessageTimestampSnafu {
                    entry: entry.as_str(),
                    id: msg.id.as_str(),
                })?;
            let attachments = copy_attachment(archive, writer, msg.attachment.as_ref())?;

            writer
                .write_record(&Record::DirectPost {
                    direct_post: export::DirectPost {
                        channel_members: vec![sender.clone(), receiver],
                        user: sender,
                        message: msg.message,
                        create_at,
                        attachments,
                    },
                })
                .context(WriteExportSnafu)?;
            summary.direct_posts += 1;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables_with(members: &[(u64, &str)], admins: &[(u64, &str)]) -> RoomTables {
        let mut tables = RoomTables::default();
        for (id, name) in members {
            tables.members.entry(*id).or_default().push((*name).to_owned());
        }
        for (id, name) in admins {
            tables.admins.entry(*id).or_default().push((*name).to_owned());
        }
        tables
    }

    #[test]
    fn member_and_admin_yield_two_entries() {
        let tables = tables_with(&[(2, "ops")], &[(2, "ops")]);
        let channels = channel_memberships(2, &tables);

        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].name, "ops");
        assert_eq!(channels[0].roles, "channel_user");
        assert_eq!(channels[1].name, "ops");
        assert_eq!(channels[1].roles, "channel_admin channel_user");
    }

    #[test]
    fn member_only_yields_plain_role() {
        let tables = tables_with(&[(1, "ops"), (1, "dev")], &[]);
        let channels = channel_memberships(1, &tables);

        assert_eq!(channels.len(), 2);
        assert!(channels.iter().all(|c| c.roles == "channel_user"));
    }

    #[test]
    fn unknown_id_yields_no_memberships() {
        let tables = tables_with(&[(1, "ops")], &[]);
        assert!(channel_memberships(9, &tables).is_empty());
    }

    #[test]
    fn resolve_user_hits() {
        let user_names = UserNames::from([(1, "alice".to_owned())]);
        let options = ConvertOptions::default();
        let mut summary = Summary::default();

        let name = resolve_user(1, "m1", &user_names, &options, &mut summary).unwrap();
        assert_eq!(name, Some("alice"));
        assert_eq!(summary.skipped_messages, 0);
    }

    #[test]
    fn resolve_user_miss_skips_by_default() {
        let user_names = UserNames::new();
        let options = ConvertOptions {
            quiet: true,
            ..ConvertOptions::default()
        };
        let mut summary = Summary::default();

        let name = resolve_user(7, "m1", &user_names, &options, &mut summary).unwrap();
        assert_eq!(name, None);
        assert_eq!(summary.skipped_messages, 1);
    }

    #[test]
    fn resolve_user_miss_fails_in_strict_mode() {
        let user_names = UserNames::new();
        let options = ConvertOptions {
            strict: true,
            quiet: true,
            ..ConvertOptions::default()
        };
        let mut summary = Summary::default();

        let err = resolve_user(7, "m1", &user_names, &options, &mut summary).unwrap_err();
        assert!(matches!(err, ConvertError::UnknownUser { user: 7, .. }));
    }

    #[test]
    fn team_record_is_constant() {
        let line = serde_json::to_string(&team_record()).unwrap();
        assert_eq!(
            line,
            r#"{"type":"team","team":{"name":"hipchat","display_name":"Hipchat","type":"I","description":"","allow_open_invite":false}}"#
        );
    }
}
