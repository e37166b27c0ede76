//! Durable per-channel, per-day plaintext logs.
//!
//! Each channel gets one file per calendar day at
//! `<root>/<channel>/<channel>.<YYYY-MM-DD>`, one line per event:
//! `HH:MM:SS <formatted>`. Files are only ever appended to.
//!
//! The writer owns a registry of open handles, one per channel. Looking up
//! a channel's slot takes the registry lock briefly; the append itself only
//! holds that channel's lock, so different channels never contend while
//! writes to one channel are serialized.
//!
//! Rotation happens on write: when a document's partition key differs from
//! the key the open handle was created for, the old file is closed and the
//! new one opened. Nothing is moved or rewritten.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chanlog_core::builder::format_line;
use chanlog_core::{Document, PartitionKey};

use crate::error::LogWriteError;

/// Path of the log file for one partition.
pub fn log_file_path(root: &Path, key: &PartitionKey) -> PathBuf {
    root.join(&key.channel).join(key.to_string())
}

struct ChannelLog {
    key: PartitionKey,
    path: PathBuf,
    file: File,
}

impl ChannelLog {
    fn open(root: &Path, key: PartitionKey) -> Result<Self, LogWriteError> {
        let path = log_file_path(root, &key);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| LogWriteError::CreateDir {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| LogWriteError::Open {
                path: path.clone(),
                source,
            })?;
        tracing::debug!(partition = %key, path = %path.display(), "opened channel log");
        Ok(Self { key, path, file })
    }

    fn append(&mut self, line: &str) -> Result<(), LogWriteError> {
        self.file
            .write_all(line.as_bytes())
            .and_then(|()| self.file.flush())
            .map_err(|source| LogWriteError::Append {
                path: self.path.clone(),
                source,
            })
    }
}

type Slot = Arc<Mutex<Option<ChannelLog>>>;

/// Appends documents to their channel's current day file.
pub struct ChannelLogWriter {
    root: PathBuf,
    handles: Mutex<HashMap<String, Slot>>,
}

impl ChannelLogWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            handles: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, channel: &str) -> Slot {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        handles.entry(channel.to_string()).or_default().clone()
    }

    /// Append one line for `document` to `channel`'s file for the document's
    /// day. Returns the path written.
    pub fn write(&self, channel: &str, document: &Document) -> Result<PathBuf, LogWriteError> {
        let key = PartitionKey::new(channel, document.received_at.date());
        let slot = self.slot(channel);
        let mut current = slot.lock().unwrap_or_else(PoisonError::into_inner);

        let log = match current.take() {
            Some(log) if log.key == key => log,
            previous => {
                if let Some(old) = previous {
                    tracing::info!(
                        channel,
                        from = %old.key,
                        to = %key,
                        "rotating channel log"
                    );
                }
                ChannelLog::open(&self.root, key)?
            }
        };
        let log = current.insert(log);

        let mut line = format_line(document);
        line.push('\n');
        log.append(&line)?;
        Ok(log.path.clone())
    }

    /// Number of channels with an open file.
    pub fn open_channels(&self) -> usize {
        let handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        handles
            .values()
            .filter(|slot| {
                slot.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .is_some()
            })
            .count()
    }

    /// Close every open file. Later writes reopen lazily.
    pub fn close_all(&self) {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        handles.clear();
    }
}
