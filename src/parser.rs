// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! Typed representations of the HipChat export descriptors.
//!
//! An export carries five kinds of JSON documents: the emoticon
//! catalog (`emoticons.json`), the room catalog (`rooms.json`), the
//! user catalog (`users.json`), one history file per room
//! (`rooms/<id>/history.json`), and one private-message history file
//! per user (`users/<id>/history.json`). This module deserializes each
//! of them and converts the history timestamp strings to Unix-epoch
//! seconds.
//!
//! Catalog entries wrap their payload in a single-key object
//! (`{"Room": {...}}`, `{"User": {...}}`); the parse entry points
//! unwrap that layer so callers see the payload types directly.
//!
//! # Example
//!
//! ```
//! use hc2mm::parser::parse_rooms;
//!
//! let rooms = parse_rooms(
//!     br#"[{"Room": {
//!         "id": 1,
//!         "name": "Ops",
//!         "canonical_name": "ops",
//!         "topic": "on call",
//!         "privacy": "public",
//!         "members": [4, 5],
//!         "room_admins": [4]
//!     }}]"#,
//! )
//! .unwrap();
//!
//! assert_eq!(rooms[0].canonical_name, "ops");
//! ```

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Deserialize;
use snafu::prelude::*;

/// Error type for descriptor parsing failures.
#[derive(Debug, Snafu)]
pub enum ParseError {
    /// A descriptor did not match the expected schema.
    #[snafu(display("failed to parse JSON: {source}"))]
    Json {
        /// The underlying JSON parsing error.
        source: serde_json::Error,
    },

    /// A message timestamp was in no recognized shape.
    #[snafu(display("unrecognized timestamp {value:?}"))]
    Timestamp {
        /// The raw timestamp string.
        value: String,
    },
}

/// One entry of the emoticon catalog.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Emoticon {
    /// The text shortcut, e.g. `"shipit"`.
    pub shortcut: String,

    /// Image reference of shape `<emoticonId>/<filename>`.
    pub path: String,
}

#[derive(Debug, Deserialize)]
struct EmoticonCatalog {
    #[serde(rename = "Emoticons")]
    emoticons: Vec<Emoticon>,
}

/// A room from the room catalog.
///
/// Flags HipChat omits when unset (`is_deleted`, `is_archived`) and
/// lists it omits when empty default rather than fail.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Room {
    /// Numeric room id; keys the room's history file.
    pub id: u64,

    /// Human-readable room name.
    pub name: String,

    /// Unique slug; becomes the channel name.
    pub canonical_name: String,

    /// Room topic; becomes the channel header.
    #[serde(default)]
    pub topic: String,

    /// `"public"` for open rooms; anything else is private.
    pub privacy: String,

    /// Deleted rooms are not migrated.
    #[serde(default)]
    pub is_deleted: bool,

    /// Archived rooms are migrated as active.
    #[serde(default)]
    pub is_archived: bool,

    /// Ids of the room's members.
    #[serde(default)]
    pub members: Vec<u64>,

    /// Ids of the room's admins.
    #[serde(default)]
    pub room_admins: Vec<u64>,
}

#[derive(Debug, Deserialize)]
struct RoomEntry {
    #[serde(rename = "Room")]
    room: Room,
}

/// A user from the user catalog.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct User {
    /// Numeric user id; keys the user's private history file.
    pub id: u64,

    /// Full display name.
    pub name: String,

    /// Unique handle; becomes the username after lowercasing.
    pub mention_name: String,

    /// Account email address.
    #[serde(default)]
    pub email: String,

    /// Job title.
    #[serde(default)]
    pub title: String,

    /// `"admin"`, `"user"`, or `"guest"`.
    pub account_type: String,

    /// Deleted accounts are not migrated.
    #[serde(default)]
    pub is_deleted: bool,

    /// Four-segment avatar reference, or empty when the user has none.
    #[serde(default)]
    pub avatar: String,
}

#[derive(Debug, Deserialize)]
struct UserEntry {
    #[serde(rename = "User")]
    user: User,
}

/// The author or recipient reference embedded in a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct MessageSender {
    /// Numeric user id, resolved through the accepted-user table.
    pub id: u64,
}

/// An attachment reference on a message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MessageAttachment {
    /// File reference of shape `<directoryId>/<filename>`.
    pub path: String,
}

/// A message posted in a room.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserMessage {
    /// Message id, a GUID string in real exports.
    #[serde(default)]
    pub id: String,

    /// Message body.
    pub message: String,

    /// Raw timestamp string; see [`parse_timestamp`].
    pub timestamp: String,

    /// The author.
    pub sender: MessageSender,

    /// Set when the message was deleted on the source side.
    #[serde(default)]
    pub deleted: bool,

    /// At most one attachment in practice.
    #[serde(default)]
    pub attachment: Option<MessageAttachment>,
}

/// One entry of a room history file.
///
/// Only `UserMessage` entries are migrated; other kinds (topic
/// changes, notifications) leave `user_message` unset and are skipped
/// by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RoomHistoryEntry {
    /// The message payload, when this entry is a user message.
    #[serde(rename = "UserMessage", default)]
    pub user_message: Option<UserMessage>,
}

/// A one-on-one message between two users.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PrivateUserMessage {
    /// Message id, a GUID string in real exports.
    #[serde(default)]
    pub id: String,

    /// Message body.
    pub message: String,

    /// Raw timestamp string; see [`parse_timestamp`].
    pub timestamp: String,

    /// The author.
    pub sender: MessageSender,

    /// The other member of the conversation.
    pub receiver: MessageSender,

    /// Set when the message was deleted on the source side.
    #[serde(default)]
    pub deleted: bool,

    /// At most one attachment in practice.
    #[serde(default)]
    pub attachment: Option<MessageAttachment>,
}

/// One entry of a private-message history file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PrivateHistoryEntry {
    /// The message payload, when this entry is a private user message.
    #[serde(rename = "PrivateUserMessage", default)]
    pub private_message: Option<PrivateUserMessage>,
}

/// Parses the `emoticons.json` catalog.
///
/// # Errors
///
/// Returns an error if the JSON is malformed or does not match the
/// expected schema.
pub fn parse_emoticons(bytes: &[u8]) -> Result<Vec<Emoticon>, ParseError> {
    let catalog: EmoticonCatalog = serde_json::from_slice(bytes).context(JsonSnafu)?;
    Ok(catalog.emoticons)
}

/// Parses the `rooms.json` catalog.
///
/// # Errors
///
/// Returns an error if the JSON is malformed or does not match the
/// expected schema.
pub fn parse_rooms(bytes: &[u8]) -> Result<Vec<Room>, ParseError> {
    let entries: Vec<RoomEntry> = serde_json::from_slice(bytes).context(JsonSnafu)?;
    Ok(entries.into_iter().map(|entry| entry.room).collect())
}

/// Parses the `users.json` catalog.
///
/// # Errors
///
/// Returns an error if the JSON is malformed or does not match the
/// expected schema.
pub fn parse_users(bytes: &[u8]) -> Result<Vec<User>, ParseError> {
    let entries: Vec<UserEntry> = serde_json::from_slice(bytes).context(JsonSnafu)?;
    Ok(entries.into_iter().map(|entry| entry.user).collect())
}

/// Parses a `rooms/<id>/history.json` file.
///
/// # Errors
///
/// Returns an error if the JSON is malformed or does not match the
/// expected schema.
pub fn parse_room_history(bytes: &[u8]) -> Result<Vec<RoomHistoryEntry>, ParseError> {
    serde_json::from_slice(bytes).context(JsonSnafu)
}

/// Parses a `users/<id>/history.json` file.
///
/// # Errors
///
/// Returns an error if the JSON is malformed or does not match the
/// expected schema.
pub fn parse_private_history(bytes: &[u8]) -> Result<Vec<PrivateHistoryEntry>, ParseError> {
    serde_json::from_slice(bytes).context(JsonSnafu)
}

/// Converts a HipChat history timestamp to whole Unix-epoch seconds.
///
/// Exports carry two shapes: ISO-8601 with an offset
/// (`2017-05-04T10:22:31.123456+00:00`) and a space-separated form
/// with a trailing zone name (`2017-05-04 10:22:31.123 UTC`). Both
/// keep their time of day; a missing offset is treated as UTC; a
/// date-only stamp resolves to midnight UTC. Fractional seconds are
/// truncated, not rounded.
///
/// # Errors
///
/// Returns [`ParseError::Timestamp`] when the string matches none of
/// the known shapes.
pub fn parse_timestamp(raw: &str) -> Result<i64, ParseError> {
    let mut tokens = raw.split_whitespace();
    let Some(first) = tokens.next() else {
        return TimestampSnafu { value: raw }.fail();
    };

    if let Ok(stamp) = DateTime::parse_from_rfc3339(first) {
        return Ok(stamp.timestamp());
    }

    // ISO-8601 without an offset.
    if let Ok(stamp) = NaiveDateTime::parse_from_str(first, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(stamp.and_utc().timestamp());
    }

    // Space-separated date and time, e.g. "2017-05-04 10:22:31.123 UTC".
    if let Some(time) = tokens.next()
        && let Ok(stamp) =
            NaiveDateTime::parse_from_str(&format!("{first} {time}"), "%Y-%m-%d %H:%M:%S%.f")
    {
        return Ok(stamp.and_utc().timestamp());
    }

    if let Ok(date) = NaiveDate::parse_from_str(first, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN).and_utc().timestamp());
    }

    TimestampSnafu { value: raw }.fail()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room_json(fields: &str) -> String {
        format!(
            r#"[{{"Room": {{
                "id": 1,
                "name": "Ops",
                "canonical_name": "ops",
                "topic": "on call",
                "privacy": "public",
                "members": [],
                "room_admins": []{fields}
            }}}}]"#
        )
    }

    fn user_json(fields: &str) -> String {
        format!(
            r#"[{{"User": {{
                "id": 4,
                "name": "Alice Adams",
                "mention_name": "Alice",
                "email": "alice@example.com",
                "title": "SRE",
                "account_type": "user"{fields}
            }}}}]"#
        )
    }

    #[test]
    fn parses_emoticon_catalog() {
        let emoticons = parse_emoticons(
            br#"{"Emoticons": [{"shortcut": "shipit", "path": "77/shipit.gif"}]}"#,
        )
        .unwrap();

        assert_eq!(emoticons.len(), 1);
        assert_eq!(emoticons[0].shortcut, "shipit");
        assert_eq!(emoticons[0].path, "77/shipit.gif");
    }

    #[test]
    fn parses_room_with_flags_absent() {
        let rooms = parse_rooms(room_json("").as_bytes()).unwrap();

        assert_eq!(rooms[0].id, 1);
        assert!(!rooms[0].is_deleted);
        assert!(!rooms[0].is_archived);
    }

    #[test]
    fn parses_room_flags() {
        let rooms = parse_rooms(
            room_json(r#", "is_deleted": true, "is_archived": true"#).as_bytes(),
        )
        .unwrap();

        assert!(rooms[0].is_deleted);
        assert!(rooms[0].is_archived);
    }

    #[test]
    fn parses_room_without_topic() {
        let json = r#"[{"Room": {
            "id": 2,
            "name": "Dev",
            "canonical_name": "dev",
            "privacy": "private"
        }}]"#;
        let rooms = parse_rooms(json.as_bytes()).unwrap();

        assert_eq!(rooms[0].topic, "");
        assert!(rooms[0].members.is_empty());
    }

    #[test]
    fn parses_user_with_defaults() {
        let users = parse_users(user_json("").as_bytes()).unwrap();

        assert_eq!(users[0].mention_name, "Alice");
        assert!(!users[0].is_deleted);
        assert_eq!(users[0].avatar, "");
    }

    #[test]
    fn parses_user_avatar() {
        let users = parse_users(
            user_json(r#", "avatar": "photos/original/4/alice.png""#).as_bytes(),
        )
        .unwrap();

        assert_eq!(users[0].avatar, "photos/original/4/alice.png");
    }

    #[test]
    fn parses_room_history_message() {
        let history = parse_room_history(
            br#"[{"UserMessage": {
                "id": "m1",
                "message": "hello",
                "timestamp": "2017-05-04T10:22:31.123456+00:00",
                "sender": {"id": 4, "name": "Alice Adams"}
            }}]"#,
        )
        .unwrap();

        let msg = history[0].user_message.as_ref().unwrap();
        assert_eq!(msg.message, "hello");
        assert_eq!(msg.sender.id, 4);
        assert!(!msg.deleted);
        assert!(msg.attachment.is_none());
    }

    #[test]
    fn parses_room_history_attachment() {
        let history = parse_room_history(
            br#"[{"UserMessage": {
                "id": "m2",
                "message": "see file",
                "timestamp": "2017-05-04T10:22:31+00:00",
                "sender": {"id": 4},
                "attachment": {"path": "abc/log.txt"}
            }}]"#,
        )
        .unwrap();

        let msg = history[0].user_message.as_ref().unwrap();
        assert_eq!(msg.attachment.as_ref().unwrap().path, "abc/log.txt");
    }

    #[test]
    fn null_attachment_is_none() {
        let history = parse_room_history(
            br#"[{"UserMessage": {
                "id": "m3",
                "message": "plain",
                "timestamp": "2017-05-04T10:22:31+00:00",
                "sender": {"id": 4},
                "attachment": null
            }}]"#,
        )
        .unwrap();

        assert!(history[0].user_message.as_ref().unwrap().attachment.is_none());
    }

    #[test]
    fn skips_unrecognized_history_kinds() {
        let history = parse_room_history(
            br#"[{"TopicRoomMessage": {"topic": "new topic"}}]"#,
        )
        .unwrap();

        assert!(history[0].user_message.is_none());
    }

    #[test]
    fn parses_private_history_message() {
        let history = parse_private_history(
            br#"[{"PrivateUserMessage": {
                "id": "p1",
                "message": "hi",
                "timestamp": "2017-05-04T10:22:31+00:00",
                "sender": {"id": 4},
                "receiver": {"id": 5}
            }}]"#,
        )
        .unwrap();

        let msg = history[0].private_message.as_ref().unwrap();
        assert_eq!(msg.sender.id, 4);
        assert_eq!(msg.receiver.id, 5);
    }

    #[test]
    fn returns_error_for_invalid_json() {
        assert!(parse_rooms(b"not valid json").is_err());
    }

    #[test]
    fn returns_error_for_wrong_shape() {
        assert!(parse_users(br#"[{"Room": {"id": 1}}]"#).is_err());
    }

    #[test]
    fn timestamp_space_separated_keeps_time_of_day() {
        // 2017-05-04T10:22:31 UTC, fraction dropped.
        assert_eq!(
            parse_timestamp("2017-05-04 10:22:31.123 UTC").unwrap(),
            1_493_893_351
        );
    }

    #[test]
    fn timestamp_space_separated_without_fraction() {
        assert_eq!(
            parse_timestamp("2017-05-04 10:22:31 UTC").unwrap(),
            1_493_893_351
        );
    }

    #[test]
    fn timestamp_iso_with_offset_truncates_fraction() {
        assert_eq!(
            parse_timestamp("2017-05-04T10:22:31.999999+00:00").unwrap(),
            1_493_893_351
        );
    }

    #[test]
    fn timestamp_iso_honors_nonzero_offset() {
        // 10:22:31 at +02:00 is 08:22:31 UTC.
        assert_eq!(
            parse_timestamp("2017-05-04T10:22:31+02:00").unwrap(),
            1_493_886_151
        );
    }

    #[test]
    fn timestamp_iso_without_offset_is_utc() {
        assert_eq!(
            parse_timestamp("2017-05-04T10:22:31.5").unwrap(),
            1_493_893_351
        );
    }

    #[test]
    fn timestamp_date_only_is_midnight_utc() {
        assert_eq!(parse_timestamp("2017-05-04").unwrap(), 1_493_856_000);
    }

    #[test]
    fn timestamp_garbage_is_an_error() {
        assert!(matches!(
            parse_timestamp("yesterday at noon"),
            Err(ParseError::Timestamp { .. })
        ));
        assert!(matches!(
            parse_timestamp(""),
            Err(ParseError::Timestamp { .. })
        ));
    }
}
