//! Resubmission of failed-batch files.
//!
//! Each file holds one NDJSON bulk payload exactly as it would have been
//! sent. Replaying parses it back and sends it as one bulk request. Entries
//! keep their document ids, so replaying a file twice indexes nothing new.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use chanlog_core::backend::SearchBackend;
use chanlog_core::bulk::BulkPayload;

use crate::backend::open_backend;
use crate::config::Config;

/// Result of replaying one file.
#[derive(Debug)]
pub enum ReplayOutcome {
    Indexed { documents: usize, removed: bool },
    Failed { error: anyhow::Error },
}

/// Resubmit one failed-batch file; delete it afterwards only when `remove`
/// is set and the backend accepted it.
pub async fn replay_file(backend: &dyn SearchBackend, path: &Path, remove: bool) -> ReplayOutcome {
    match try_replay(backend, path).await {
        Ok(documents) => {
            let removed = remove
                && match std::fs::remove_file(path) {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(file = %path.display(), error = %e, "replayed file could not be removed");
                        false
                    }
                };
            ReplayOutcome::Indexed { documents, removed }
        }
        Err(error) => ReplayOutcome::Failed { error },
    }
}

async fn try_replay(backend: &dyn SearchBackend, path: &Path) -> Result<usize> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let payload = BulkPayload::parse_ndjson(&text)
        .with_context(|| format!("{} is not a bulk payload", path.display()))?;
    if payload.is_empty() {
        return Ok(0);
    }
    backend
        .bulk(&payload)
        .await
        .with_context(|| format!("{} backend refused {}", backend.name(), path.display()))?;
    Ok(payload.len())
}

/// `chanlog replay`.
pub async fn run_replay(config: &Config, files: Vec<PathBuf>, remove: bool) -> Result<()> {
    if files.is_empty() {
        bail!("No failure files given.");
    }
    let backend = open_backend(config).await?;

    let mut failed = 0;
    for path in &files {
        match replay_file(backend.as_ref(), path, remove).await {
            ReplayOutcome::Indexed { documents, removed } => {
                println!(
                    "replayed {} ({} documents{})",
                    path.display(),
                    documents,
                    if removed { ", removed" } else { "" }
                );
            }
            ReplayOutcome::Failed { error } => {
                failed += 1;
                tracing::error!(file = %path.display(), error = %format!("{:#}", error), "replay failed");
                println!("failed {}: {:#}", path.display(), error);
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} file(s) could not be replayed", failed, files.len());
    }
    println!("ok");
    Ok(())
}
