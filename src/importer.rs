//! Batch import of historical log files.
//!
//! Reparses plaintext logs (`<channel>.<YYYY-MM-DD>`) back into documents
//! and submits them through the [`BulkIndexer`], bypassing the log writer.
//! Channel and date come from the file name; each line carries the time.
//!
//! Import is all-or-nothing with respect to parsing: every file is
//! validated before anything is submitted. The first line that does not
//! match the log grammar aborts the run with its file and line number, and
//! so does a file whose channel is not on the allow-list.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use walkdir::WalkDir;

use chanlog_core::grammar::{parse_line, parse_log_file_name};
use chanlog_core::Document;

use crate::backend::open_backend;
use crate::config::Config;
use crate::coordinator::AllowList;
use crate::error::ConfigurationError;
use crate::indexer::{BulkIndexer, FlushOutcome, IndexerSettings};

/// Totals for one import run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub files: usize,
    pub documents: usize,
    /// Flushes whose batch was persisted to the failure directory or lost.
    pub failed_flushes: usize,
}

/// Parse every line of one log file. The channel named by the file must be
/// on the allow-list; documents carry its configured spelling.
pub fn read_log_file(path: &Path, allow: &AllowList) -> Result<Vec<Document>> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .with_context(|| format!("{} has no file name", path.display()))?;
    let (channel, date) = parse_log_file_name(&name)?;
    let channel = allow
        .resolve(&channel)
        .ok_or_else(|| ConfigurationError::ChannelNotAllowed(channel.clone()))
        .with_context(|| format!("{} cannot be imported", path.display()))?
        .to_string();

    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let text = String::from_utf8_lossy(&bytes);

    let mut documents = Vec::new();
    for (n, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let parsed =
            parse_line(line).with_context(|| format!("{}:{}", path.display(), n + 1))?;
        documents.push(parsed.into_document(&channel, date));
    }
    Ok(documents)
}

/// Every log file under `root`, sorted by path.
pub fn discover_log_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let is_log = parse_log_file_name(&entry.file_name().to_string_lossy()).is_ok();
        if is_log {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

/// Validate all `files`, then submit their documents and flush.
pub async fn import_files(
    indexer: &BulkIndexer,
    allow: &AllowList,
    files: &[PathBuf],
) -> Result<ImportSummary> {
    for path in files {
        read_log_file(path, allow)?;
    }

    let batch_size = indexer.settings().batch_size;
    let mut summary = ImportSummary::default();
    for path in files {
        let documents = read_log_file(path, allow)?;
        tracing::info!(file = %path.display(), documents = documents.len(), "indexing");
        summary.files += 1;
        summary.documents += documents.len();
        for document in documents {
            indexer.submit(document);
            if batch_size > 0 && indexer.buffered() >= batch_size {
                record(&mut summary, indexer.flush().await);
            }
        }
    }
    record(&mut summary, indexer.flush().await);
    Ok(summary)
}

fn record(summary: &mut ImportSummary, outcome: FlushOutcome) {
    if !outcome.is_success() {
        summary.failed_flushes += 1;
    }
}

/// `chanlog import`.
pub async fn run_import(
    config: &Config,
    files: Vec<PathBuf>,
    all: bool,
    create_index: bool,
) -> Result<()> {
    let allow = config.allow_list()?;
    let mut files = files;
    if all {
        files.extend(discover_log_files(&config.logs.root)?);
    }
    if files.is_empty() {
        bail!("No log files given. Pass files or --all.");
    }

    let backend = open_backend(config).await?;
    backend
        .prepare(create_index)
        .await
        .with_context(|| format!("{} index is not ready", backend.name()))?;

    let indexer = BulkIndexer::new(Arc::clone(&backend), IndexerSettings::from(&config.indexer));
    let summary = import_files(&indexer, &allow, &files).await?;

    println!("import");
    println!("  files: {}", summary.files);
    println!("  documents: {}", summary.documents);
    if summary.failed_flushes > 0 {
        println!("  failed batches: {}", summary.failed_flushes);
        bail!(
            "{} batch(es) were not indexed; see {}",
            summary.failed_flushes,
            config.indexer.failure_dir.display()
        );
    }
    println!("ok");
    Ok(())
}
