//! The live event feed consumed by `chanlog run`.
//!
//! The transport (an IRC client, a bridge, a test script) writes one JSON
//! object per line to stdin:
//!
//! ```text
//! {"kind":"message","channel":"#general","actor":"alice","text":"hi"}
//! {"kind":"names","channel":"#general","nicks":["@alice","bob"]}
//! {"kind":"quit","actor":"alice!a@host","reason":"bye"}
//! ```
//!
//! `quit` and `rename` may omit `channel`; they are then fanned out to every
//! channel the nick is known to be in. A line that is not a valid record is
//! logged with its line number and skipped. A failed log write stops the
//! loop.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use chanlog_core::{EventKind, ParseError};

use crate::backend::open_backend;
use crate::config::Config;
use crate::coordinator::{Dispatch, IngestionCoordinator};
use crate::error::LogWriteError;
use crate::indexer::{BulkIndexer, FlushOutcome, IndexerSettings};
use crate::log_writer::ChannelLogWriter;

/// One decoded feed line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedRecord {
    Event {
        channel: Option<String>,
        event: EventKind,
    },
    Names {
        channel: String,
        nicks: Vec<String>,
    },
}

/// Decode one feed line.
pub fn parse_feed_line(line: &str) -> Result<FeedRecord, ParseError> {
    let value: Value =
        serde_json::from_str(line).map_err(|e| ParseError::Feed(e.to_string()))?;
    let kind = value
        .get("kind")
        .and_then(Value::as_str)
        .ok_or_else(|| ParseError::Feed("missing \"kind\"".to_string()))?;
    let channel = match value.get("channel") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => return Err(ParseError::Feed("\"channel\" must be a string".to_string())),
    };

    if kind == "names" {
        let channel =
            channel.ok_or_else(|| ParseError::Feed("names without \"channel\"".to_string()))?;
        let nicks = value
            .get("nicks")
            .cloned()
            .map(serde_json::from_value::<Vec<String>>)
            .transpose()
            .map_err(|e| ParseError::Feed(format!("names: {}", e)))?
            .unwrap_or_default();
        return Ok(FeedRecord::Names { channel, nicks });
    }

    let event: EventKind =
        serde_json::from_value(value).map_err(|e| ParseError::Feed(e.to_string()))?;
    let channel_optional = matches!(event, EventKind::Quit { .. } | EventKind::Rename { .. });
    if channel.is_none() && !channel_optional {
        return Err(ParseError::Feed(format!("{} without \"channel\"", event.name())));
    }
    Ok(FeedRecord::Event { channel, event })
}

/// Apply one record; returns how many log lines were written.
pub fn apply(coordinator: &IngestionCoordinator, record: FeedRecord) -> Result<usize, LogWriteError> {
    let dispatched = match record {
        FeedRecord::Names { channel, nicks } => {
            coordinator.on_names(&channel, &nicks);
            Vec::new()
        }
        FeedRecord::Event {
            channel: Some(channel),
            event,
        } => vec![coordinator.on_event(&channel, &event)?],
        FeedRecord::Event {
            channel: None,
            event: EventKind::Quit { actor, reason },
        } => coordinator.on_quit(&actor, &reason)?,
        FeedRecord::Event {
            channel: None,
            event: EventKind::Rename { old_name, new_name },
        } => coordinator.on_rename(&old_name, &new_name)?,
        FeedRecord::Event {
            channel: None,
            event,
        } => {
            tracing::warn!(kind = event.name(), "channel-less event ignored");
            Vec::new()
        }
    };
    Ok(dispatched
        .iter()
        .filter(|d| matches!(d, Dispatch::Logged { .. }))
        .count())
}

/// Counters for one `run` session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedStats {
    pub lines: u64,
    pub logged: u64,
    pub skipped: u64,
}

/// Consume records until end of input or the first log write failure.
pub async fn consume<R>(
    coordinator: &IngestionCoordinator,
    reader: R,
    stats: &mut FeedStats,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await.context("Failed to read event feed")? {
        stats.lines += 1;
        if line.trim().is_empty() {
            continue;
        }
        let record = match parse_feed_line(&line) {
            Ok(record) => record,
            Err(e) => {
                stats.skipped += 1;
                tracing::warn!(line = stats.lines, error = %e, "skipping malformed feed record");
                continue;
            }
        };
        stats.logged += apply(coordinator, record)? as u64;
    }
    Ok(())
}

/// `chanlog run`: log stdin events until end of input or Ctrl-C.
pub async fn run_feed(config: &Config) -> Result<()> {
    let backend = open_backend(config).await?;
    // Logging does not depend on the index; undeliverable batches are persisted.
    if let Err(e) = backend.prepare(false).await {
        tracing::warn!(backend = backend.name(), error = %e, "search index is not ready");
    }

    let indexer = Arc::new(BulkIndexer::new(
        backend,
        IndexerSettings::from(&config.indexer),
    ));
    let flush_task = indexer.spawn_flush_task();
    let writer = Arc::new(ChannelLogWriter::new(&config.logs.root));
    let coordinator = IngestionCoordinator::new(
        config.allow_list()?,
        Arc::clone(&writer),
        Arc::clone(&indexer),
    );

    tracing::info!(
        channels = ?coordinator.allow_list().channels(),
        logs = %config.logs.root.display(),
        "logging events from stdin"
    );

    let mut stats = FeedStats::default();
    let result = {
        let reader = BufReader::new(tokio::io::stdin());
        tokio::select! {
            result = consume(&coordinator, reader, &mut stats) => result,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                Ok(())
            }
        }
    };

    let outcome = indexer
        .shutdown(Some(flush_task), config.indexer.shutdown_timeout())
        .await;
    writer.close_all();
    let indexed = indexer.stats();

    println!("run");
    println!("  lines read: {}", stats.lines);
    println!("  lines logged: {}", stats.logged);
    println!("  records skipped: {}", stats.skipped);
    println!("  documents indexed: {}", indexed.indexed);
    if indexed.persisted > 0 {
        println!(
            "  documents persisted for replay: {} ({})",
            indexed.persisted,
            config.indexer.failure_dir.display()
        );
    }
    if indexed.lost > 0 {
        println!("  documents lost: {}", indexed.lost);
    }
    if let FlushOutcome::Persisted { path, .. } = &outcome {
        println!("  final batch: {}", path.display());
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_message() {
        let record =
            parse_feed_line(r##"{"kind":"message","channel":"#general","actor":"alice","text":"hi"}"##)
                .unwrap();
        assert_eq!(
            record,
            FeedRecord::Event {
                channel: Some("#general".into()),
                event: EventKind::Message {
                    actor: "alice".into(),
                    text: "hi".into()
                }
            }
        );
    }

    #[test]
    fn test_parse_channel_less_quit() {
        let record = parse_feed_line(r#"{"kind":"quit","actor":"alice"}"#).unwrap();
        assert_eq!(
            record,
            FeedRecord::Event {
                channel: None,
                event: EventKind::Quit {
                    actor: "alice".into(),
                    reason: String::new()
                }
            }
        );
    }

    #[test]
    fn test_parse_names() {
        let record =
            parse_feed_line(r##"{"kind":"names","channel":"#general","nicks":["@alice","bob"]}"##)
                .unwrap();
        assert_eq!(
            record,
            FeedRecord::Names {
                channel: "#general".into(),
                nicks: vec!["@alice".into(), "bob".into()]
            }
        );
    }

    #[test]
    fn test_malformed_records() {
        for line in [
            "not json",
            r##"{"channel":"#general"}"##,
            r##"{"kind":"dance","channel":"#general"}"##,
            r#"{"kind":"join","actor":"alice"}"#,
            r##"{"kind":"message","channel":"#general","actor":"alice"}"##,
            r#"{"kind":"names"}"#,
        ] {
            assert!(
                matches!(parse_feed_line(line), Err(ParseError::Feed(_))),
                "{}",
                line
            );
        }
    }
}
