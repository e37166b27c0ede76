//! Batched submission of documents to the search backend.
//!
//! # Buffer and flush
//!
//! ```text
//!  submit() ──push──▶ ┌──────────────┐  mem::take   ┌────────────┐
//!                     │ Mutex<Vec<_>>│ ───────────▶ │ BulkPayload│──▶ backend.bulk()
//!  size threshold ─┐  └──────────────┘              └─────┬──────┘
//!  timer tick ─────┴──▶ flush task ──▶ flush()            │ failure
//!                                                         ▼
//!                                          <failure_dir>/<timestamp>_<random>
//! ```
//!
//! `submit` only pushes onto the shared buffer and, once the buffer reaches
//! the batch size, wakes the flush task. It never does I/O, so a slow or
//! unreachable backend cannot stall the event path.
//!
//! `flush` swaps the whole buffer out under the lock before serializing, so
//! documents submitted during a flush land in the next batch. Two flushes
//! racing each other (size signal and timer) are harmless: the loser sees
//! an empty buffer and returns [`FlushOutcome::Empty`] without calling the
//! backend.
//!
//! A batch the backend does not accept is written verbatim (the NDJSON bulk
//! body) to a new file in the failure directory and logged. It is never
//! retried automatically; `chanlog replay` resubmits it.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use uuid::Uuid;

use chanlog_core::backend::SearchBackend;
use chanlog_core::bulk::BulkPayload;
use chanlog_core::{BackendError, Document};

use crate::config::IndexerConfig;
use crate::error::IndexSubmissionError;

/// Indexer tuning, decoupled from the TOML layout.
#[derive(Debug, Clone)]
pub struct IndexerSettings {
    /// Flush once this many documents are buffered. `0` disables.
    pub batch_size: usize,
    /// Flush on this period. `None` disables.
    pub flush_interval: Option<Duration>,
    pub failure_dir: PathBuf,
    /// Upper bound on one bulk request.
    pub submit_timeout: Duration,
    pub doc_type: String,
}

impl From<&IndexerConfig> for IndexerSettings {
    fn from(config: &IndexerConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            flush_interval: config.flush_interval(),
            failure_dir: config.failure_dir.clone(),
            submit_timeout: config.submit_timeout(),
            doc_type: config.doc_type.clone(),
        }
    }
}

/// What one flush did.
#[derive(Debug)]
pub enum FlushOutcome {
    /// Nothing was buffered; the backend was not called.
    Empty,
    /// The backend accepted every document.
    Indexed { documents: usize },
    /// The backend failed; the batch is safe in `path`.
    Persisted {
        documents: usize,
        path: PathBuf,
        error: IndexSubmissionError,
    },
    /// The backend failed and the failure file could not be written either.
    Lost {
        documents: usize,
        error: IndexSubmissionError,
        persist_error: String,
    },
}

impl FlushOutcome {
    /// True unless documents were persisted instead of indexed, or lost.
    pub fn is_success(&self) -> bool {
        matches!(self, FlushOutcome::Empty | FlushOutcome::Indexed { .. })
    }
}

/// Running totals since startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexerStats {
    pub submitted: u64,
    pub indexed: u64,
    pub persisted: u64,
    pub lost: u64,
    pub flushes: u64,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    indexed: AtomicU64,
    persisted: AtomicU64,
    lost: AtomicU64,
    flushes: AtomicU64,
}

/// Buffers documents and submits them to a [`SearchBackend`] in batches.
pub struct BulkIndexer {
    backend: Arc<dyn SearchBackend>,
    settings: IndexerSettings,
    buffer: Mutex<Vec<Document>>,
    flush_wanted: Notify,
    counters: Counters,
}

impl BulkIndexer {
    pub fn new(backend: Arc<dyn SearchBackend>, settings: IndexerSettings) -> Self {
        Self {
            backend,
            settings,
            buffer: Mutex::new(Vec::new()),
            flush_wanted: Notify::new(),
            counters: Counters::default(),
        }
    }

    pub fn settings(&self) -> &IndexerSettings {
        &self.settings
    }

    /// Queue one document. Never blocks on I/O and never fails.
    pub fn submit(&self, document: Document) {
        let buffered = {
            let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
            buffer.push(document);
            buffer.len()
        };
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        if self.settings.batch_size > 0 && buffered >= self.settings.batch_size {
            self.flush_wanted.notify_one();
        }
    }

    /// Number of documents waiting for the next flush.
    pub fn buffered(&self) -> usize {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn stats(&self) -> IndexerStats {
        IndexerStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            indexed: self.counters.indexed.load(Ordering::Relaxed),
            persisted: self.counters.persisted.load(Ordering::Relaxed),
            lost: self.counters.lost.load(Ordering::Relaxed),
            flushes: self.counters.flushes.load(Ordering::Relaxed),
        }
    }

    /// Send everything buffered so far as one bulk request.
    pub async fn flush(&self) -> FlushOutcome {
        self.flush_within(self.settings.submit_timeout).await
    }

    /// Like [`flush`](Self::flush), bounded by `limit` instead of the
    /// configured submission timeout. A timed-out batch is persisted.
    pub async fn flush_within(&self, limit: Duration) -> FlushOutcome {
        let started = Local::now();
        let batch = std::mem::take(&mut *self.buffer.lock().unwrap_or_else(PoisonError::into_inner));
        if batch.is_empty() {
            return FlushOutcome::Empty;
        }
        self.counters.flushes.fetch_add(1, Ordering::Relaxed);

        let payload = BulkPayload::from_documents(&self.settings.doc_type, batch);
        let documents = payload.len();
        let result = match tokio::time::timeout(limit, self.backend.bulk(&payload)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(IndexSubmissionError::from(err)),
            Err(_) => Err(IndexSubmissionError::from(BackendError::Timeout(limit))),
        };

        match result {
            Ok(()) => {
                self.counters
                    .indexed
                    .fetch_add(documents as u64, Ordering::Relaxed);
                tracing::debug!(
                    backend = self.backend.name(),
                    documents,
                    partitions = ?payload.indexes(),
                    "bulk submission indexed"
                );
                FlushOutcome::Indexed { documents }
            }
            Err(error) => self.persist_failure(started, &payload, error),
        }
    }

    fn persist_failure(
        &self,
        started: DateTime<Local>,
        payload: &BulkPayload,
        error: IndexSubmissionError,
    ) -> FlushOutcome {
        let documents = payload.len();
        match write_failure_file(&self.settings.failure_dir, started, payload) {
            Ok(path) => {
                self.counters
                    .persisted
                    .fetch_add(documents as u64, Ordering::Relaxed);
                tracing::error!(
                    backend = self.backend.name(),
                    documents,
                    partitions = ?payload.indexes(),
                    flush_started = %started.format("%Y-%m-%dT%H:%M:%S"),
                    failure_file = %path.display(),
                    error = %error,
                    "bulk submission failed; batch persisted for replay"
                );
                FlushOutcome::Persisted {
                    documents,
                    path,
                    error,
                }
            }
            Err(persist_error) => {
                self.counters
                    .lost
                    .fetch_add(documents as u64, Ordering::Relaxed);
                tracing::error!(
                    backend = self.backend.name(),
                    documents,
                    partitions = ?payload.indexes(),
                    flush_started = %started.format("%Y-%m-%dT%H:%M:%S"),
                    failure_dir = %self.settings.failure_dir.display(),
                    error = %error,
                    persist_error = %format!("{:#}", persist_error),
                    "bulk submission failed and the batch could not be persisted"
                );
                FlushOutcome::Lost {
                    documents,
                    error,
                    persist_error: format!("{:#}", persist_error),
                }
            }
        }
    }

    /// Start the background task that flushes on the size signal and on the
    /// timer.
    pub fn spawn_flush_task(self: &Arc<Self>) -> FlushTask {
        let (stop, mut stopped) = oneshot::channel::<()>();
        let indexer = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = indexer.settings.flush_interval.map(|period| {
                let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                interval
            });
            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = indexer.flush_wanted.notified() => {}
                    _ = next_tick(&mut ticker) => {}
                }
                indexer.flush().await;
            }
        });
        FlushTask { stop, handle }
    }

    /// Stop the flush task (if any) and make one final bounded flush.
    pub async fn shutdown(&self, task: Option<FlushTask>, limit: Duration) -> FlushOutcome {
        if let Some(task) = task {
            task.stop().await;
        }
        let outcome = self.flush_within(limit).await;
        tracing::info!(stats = ?self.stats(), "indexer stopped");
        outcome
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Handle to the background flush task.
pub struct FlushTask {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl FlushTask {
    /// Ask the task to stop and wait for any flush in progress to finish.
    pub async fn stop(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "flush task ended abnormally");
        }
    }
}

/// Write `payload` to a new, never-reused file named after the flush start.
fn write_failure_file(
    dir: &Path,
    started: DateTime<Local>,
    payload: &BulkPayload,
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating failure directory {}", dir.display()))?;
    let body = payload.to_ndjson().context("serializing bulk payload")?;

    let suffix = Uuid::new_v4().simple().to_string();
    let name = format!("{}_{}", started.format("%Y-%m-%dT%H:%M:%S%.6f"), &suffix[..8]);
    let path = dir.join(name);

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .with_context(|| format!("creating failure file {}", path.display()))?;
    file.write_all(body.as_bytes())
        .and_then(|()| file.sync_all())
        .with_context(|| format!("writing failure file {}", path.display()))?;
    Ok(path)
}
