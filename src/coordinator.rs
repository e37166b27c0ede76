//! Routes channel events to the log writer and the indexer.
//!
//! The coordinator is the single entry point for live events. It filters by
//! the channel allow-list, builds the [`Document`], appends it to the
//! channel's day file, and queues it for indexing. The log write comes first
//! and is the durability floor; indexing is best effort and never blocks it.
//!
//! Quits and renames arrive without a channel. The coordinator keeps a
//! presence registry (who is in which channel) and fans those events out to
//! every channel the nick was seen in.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Local;

use chanlog_core::builder::build;
use chanlog_core::models::{nick_of, to_seconds, unprefixed_channel};
use chanlog_core::{Document, EventKind};

use crate::error::{ConfigurationError, LogWriteError};
use crate::indexer::BulkIndexer;
use crate::log_writer::ChannelLogWriter;

/// Nick prefixes in a names reply that denote channel modes, not the nick.
const NICK_MODE_PREFIXES: &[char] = &['~', '&', '@', '%', '+'];

/// The fixed set of channels that may be logged and indexed.
///
/// Lookups ignore the join prefix and ASCII case. Each entry resolves to the
/// unprefixed name as configured, which is what directories and partition
/// keys use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowList {
    by_lower: BTreeMap<String, String>,
}

impl AllowList {
    pub fn new(channels: &[String]) -> Result<Self, ConfigurationError> {
        if channels.is_empty() {
            return Err(ConfigurationError::NoChannels);
        }
        let mut by_lower = BTreeMap::new();
        for raw in channels {
            let name = unprefixed_channel(raw.trim());
            if name.is_empty() {
                return Err(ConfigurationError::EmptyChannel(raw.clone()));
            }
            if name.contains('/') || name.contains('\\') || name.contains("..") || name.contains('\0')
            {
                return Err(ConfigurationError::UnsafeChannel(raw.clone()));
            }
            by_lower.insert(name.to_ascii_lowercase(), name.to_string());
        }
        Ok(Self { by_lower })
    }

    /// Canonical name for `channel`, or `None` when it is not allowed.
    pub fn resolve(&self, channel: &str) -> Option<&str> {
        let name = unprefixed_channel(channel.trim());
        self.by_lower
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Canonical channel names, sorted.
    pub fn channels(&self) -> Vec<String> {
        self.by_lower.values().cloned().collect()
    }
}

/// Which nicks are currently in which channel.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    channels: BTreeMap<String, BTreeSet<String>>,
}

impl PresenceRegistry {
    /// Replace a channel's member list from a names reply.
    pub fn seed<I, S>(&mut self, channel: &str, nicks: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let members = nicks
            .into_iter()
            .map(|n| n.as_ref().trim_start_matches(NICK_MODE_PREFIXES).to_string())
            .filter(|n| !n.is_empty())
            .collect();
        self.channels.insert(channel.to_string(), members);
    }

    pub fn join(&mut self, channel: &str, nick: &str) {
        self.channels
            .entry(channel.to_string())
            .or_default()
            .insert(nick.to_string());
    }

    pub fn leave(&mut self, channel: &str, nick: &str) {
        if let Some(members) = self.channels.get_mut(channel) {
            members.remove(nick);
        }
    }

    /// Channels `nick` is present in, sorted.
    pub fn channels_of(&self, nick: &str) -> Vec<String> {
        self.channels
            .iter()
            .filter(|(_, members)| members.contains(nick))
            .map(|(channel, _)| channel.clone())
            .collect()
    }

    pub fn remove_everywhere(&mut self, nick: &str) {
        for members in self.channels.values_mut() {
            members.remove(nick);
        }
    }

    pub fn rename(&mut self, old: &str, new: &str) {
        for members in self.channels.values_mut() {
            if members.remove(old) {
                members.insert(new.to_string());
            }
        }
    }

    pub fn members(&self, channel: &str) -> Vec<String> {
        self.channels
            .get(channel)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// What happened to one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// The channel is not allow-listed; nothing was written or queued.
    Dropped,
    /// Appended to `path` and queued for indexing.
    Logged { path: PathBuf },
}

pub struct IngestionCoordinator {
    allow: AllowList,
    writer: Arc<ChannelLogWriter>,
    indexer: Arc<BulkIndexer>,
    presence: Mutex<PresenceRegistry>,
}

impl IngestionCoordinator {
    pub fn new(allow: AllowList, writer: Arc<ChannelLogWriter>, indexer: Arc<BulkIndexer>) -> Self {
        Self {
            allow,
            writer,
            indexer,
            presence: Mutex::new(PresenceRegistry::default()),
        }
    }

    pub fn allow_list(&self) -> &AllowList {
        &self.allow
    }

    pub fn indexer(&self) -> &Arc<BulkIndexer> {
        &self.indexer
    }

    /// Log and index an already-built document.
    ///
    /// The document is queued for indexing even when the log write fails;
    /// the write error is returned afterwards.
    pub fn on_document(&self, channel: &str, document: Document) -> Result<Dispatch, LogWriteError> {
        let Some(channel) = self.allow.resolve(channel) else {
            tracing::trace!(channel, "dropping event for channel outside allow-list");
            return Ok(Dispatch::Dropped);
        };
        let written = self.writer.write(channel, &document);
        if let Err(e) = &written {
            tracing::error!(
                channel,
                partition = %document.partition_key(),
                timestamp = %document.received_at,
                error = %e,
                "channel log write failed"
            );
        }
        self.indexer.submit(document);
        written.map(|path| Dispatch::Logged { path })
    }

    /// Handle one event observed on `channel` now.
    pub fn on_event(&self, channel: &str, event: &EventKind) -> Result<Dispatch, LogWriteError> {
        let Some(channel) = self.allow.resolve(channel).map(str::to_string) else {
            tracing::trace!(channel, kind = event.name(), "dropping event for channel outside allow-list");
            return Ok(Dispatch::Dropped);
        };
        self.track(&channel, event);
        let document = build(&channel, event, now());
        self.on_document(&channel, document)
    }

    /// A user quit the network: log it in every channel they were in.
    pub fn on_quit(&self, user: &str, reason: &str) -> Result<Vec<Dispatch>, LogWriteError> {
        let nick = nick_of(user).to_string();
        let channels = self.lock_presence().channels_of(&nick);
        let event = EventKind::Quit {
            actor: user.to_string(),
            reason: reason.to_string(),
        };
        let result = self.fan_out(&channels, &event);
        self.lock_presence().remove_everywhere(&nick);
        result
    }

    /// A user changed nick: log it in every channel they were in.
    pub fn on_rename(&self, old: &str, new: &str) -> Result<Vec<Dispatch>, LogWriteError> {
        let old_nick = nick_of(old).to_string();
        let channels = self.lock_presence().channels_of(&old_nick);
        let event = EventKind::Rename {
            old_name: old.to_string(),
            new_name: new.to_string(),
        };
        let result = self.fan_out(&channels, &event);
        self.lock_presence().rename(&old_nick, nick_of(new));
        result
    }

    /// Seed presence for `channel` from a names reply.
    pub fn on_names(&self, channel: &str, nicks: &[String]) {
        if let Some(channel) = self.allow.resolve(channel) {
            self.lock_presence().seed(channel, nicks);
        }
    }

    /// Current members of `channel` as far as presence tracking knows.
    pub fn members(&self, channel: &str) -> Vec<String> {
        match self.allow.resolve(channel) {
            Some(channel) => self.lock_presence().members(channel),
            None => Vec::new(),
        }
    }

    fn fan_out(&self, channels: &[String], event: &EventKind) -> Result<Vec<Dispatch>, LogWriteError> {
        let received_at = now();
        let mut dispatched = Vec::with_capacity(channels.len());
        let mut first_error = None;
        for channel in channels {
            let document = build(channel, event, received_at);
            match self.on_document(channel, document) {
                Ok(d) => dispatched.push(d),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(dispatched),
        }
    }

    fn track(&self, channel: &str, event: &EventKind) {
        let mut presence = self.lock_presence();
        match event {
            EventKind::Join { actor } => presence.join(channel, nick_of(actor)),
            EventKind::Part { actor } => presence.leave(channel, nick_of(actor)),
            EventKind::Kick { kickee, .. } => presence.leave(channel, nick_of(kickee)),
            EventKind::Quit { actor, .. } => presence.remove_everywhere(nick_of(actor)),
            EventKind::Rename { old_name, new_name } => {
                presence.rename(nick_of(old_name), nick_of(new_name))
            }
            EventKind::Message { actor, .. } | EventKind::Action { actor, .. } => {
                presence.join(channel, nick_of(actor))
            }
            EventKind::Topic { .. } | EventKind::Mode { .. } => {}
        }
    }

    fn lock_presence(&self) -> std::sync::MutexGuard<'_, PresenceRegistry> {
        self.presence.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn now() -> chrono::NaiveDateTime {
    to_seconds(Local::now().naive_local())
}
