//! Core data models shared by the ingestion, indexing, and search paths.
//!
//! A [`Document`] is the unit of both logging and indexing. Every document
//! belongs to exactly one [`PartitionKey`] (`channel.YYYY-MM-DD`), which names
//! both its plaintext log file and its index in the search backend.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Date format used in partition keys and log file names.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Time-of-day format used at the start of every log line.
pub const TIME_FORMAT: &str = "%H:%M:%S";

/// Characters that may prefix a channel name on the wire.
pub const CHANNEL_PREFIXES: &[char] = &['#', '&'];

/// Strip leading join-prefix characters (`#`, `&`) from a channel name.
pub fn unprefixed_channel(channel: &str) -> &str {
    channel.trim_start_matches(CHANNEL_PREFIXES)
}

/// Reduce a `nick!user@host` prefix to the bare nick.
pub fn nick_of(user: &str) -> &str {
    user.split_once('!').map(|(nick, _)| nick).unwrap_or(user)
}

/// Truncate a timestamp to whole seconds.
pub fn to_seconds(ts: NaiveDateTime) -> NaiveDateTime {
    ts.with_nanosecond(0).unwrap_or(ts)
}

/// A normalized record of one channel event.
///
/// `formatted`, `received_at`, and `channel` are always present. The
/// remaining fields are only set when the source event carries them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// The human-readable line, exactly as written to the log file.
    pub formatted: String,
    /// Local wall-clock time of ingestion, second resolution.
    pub received_at: NaiveDateTime,
    /// Channel name without its join prefix.
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kicker: Option<String>,
}

impl Document {
    /// A document carrying only the required fields.
    pub fn new(channel: impl Into<String>, received_at: NaiveDateTime, formatted: String) -> Self {
        Self {
            formatted,
            received_at: to_seconds(received_at),
            channel: channel.into(),
            actor: None,
            message: None,
            topic: None,
            reason: None,
            old_name: None,
            kicker: None,
        }
    }

    pub fn partition_key(&self) -> PartitionKey {
        PartitionKey::new(self.channel.clone(), self.received_at.date())
    }

    /// Stable content id used as the backend document id.
    ///
    /// Two documents with the same partition, timestamp, and formatted line
    /// are the same event, so replays and re-imports overwrite instead of
    /// duplicating.
    pub fn content_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.partition_key().to_string().as_bytes());
        hasher.update(b"\n");
        hasher.update(self.received_at.format("%Y-%m-%dT%H:%M:%S").to_string().as_bytes());
        hasher.update(b"\n");
        hasher.update(self.formatted.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// `HH:MM:SS` of `received_at`.
    pub fn timestamp(&self) -> String {
        self.received_at.format(TIME_FORMAT).to_string()
    }

    /// True when the required fields are all non-empty.
    pub fn is_well_formed(&self) -> bool {
        !self.formatted.is_empty() && !self.channel.is_empty()
    }
}

/// Identifies one channel-day: one log file and one backend index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey {
    pub channel: String,
    pub date: NaiveDate,
}

impl PartitionKey {
    pub fn new(channel: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            channel: channel.into(),
            date,
        }
    }

    /// Parse `channel.YYYY-MM-DD`, splitting on the last `.` so channel
    /// names containing dots survive.
    pub fn parse(s: &str) -> Option<Self> {
        let (channel, date) = s.rsplit_once('.')?;
        if channel.is_empty() {
            return None;
        }
        let date = NaiveDate::parse_from_str(date, DATE_FORMAT).ok()?;
        Some(Self::new(channel, date))
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.channel, self.date.format(DATE_FORMAT))
    }
}

/// One parsed transport callback.
///
/// Actor fields may hold full `nick!user@host` prefixes; the builder keeps
/// only the nick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    Message {
        actor: String,
        text: String,
    },
    Action {
        actor: String,
        text: String,
    },
    Join {
        actor: String,
    },
    Part {
        actor: String,
    },
    Quit {
        actor: String,
        #[serde(default)]
        reason: String,
    },
    Kick {
        kickee: String,
        kicker: String,
        #[serde(default)]
        reason: String,
    },
    Rename {
        old_name: String,
        new_name: String,
    },
    Topic {
        actor: String,
        topic: String,
    },
    Mode {
        actor: String,
        adding: bool,
        modes: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Message { .. } => "message",
            EventKind::Action { .. } => "action",
            EventKind::Join { .. } => "join",
            EventKind::Part { .. } => "part",
            EventKind::Quit { .. } => "quit",
            EventKind::Kick { .. } => "kick",
            EventKind::Rename { .. } => "rename",
            EventKind::Topic { .. } => "topic",
            EventKind::Mode { .. } => "mode",
        }
    }
}
