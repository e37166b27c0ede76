//! Search over indexed channel events.
//!
//! [`SearchFacade::search`] takes the recognised filters of a request and a
//! channel selection, restricts the selection to the allow-list, builds a
//! backend-neutral [`Query`](chanlog_core::query::Query), and groups the
//! hits by the log file they came from.
//!
//! The backend returns at most `max_hits` documents, newest first; grouping
//! then orders groups by date and channel and hits within a group by time.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;

use chanlog_core::backend::SearchBackend;
use chanlog_core::query::{build_query, resolve_channels, SearchFilters};
use chanlog_core::results::{group_hits, GroupedResults};

use crate::backend::open_backend;
use crate::config::Config;
use crate::coordinator::AllowList;
use crate::error::SearchError;
use crate::log_writer::log_file_path;

pub struct SearchFacade {
    backend: Arc<dyn SearchBackend>,
    allowed: Vec<String>,
    log_root: PathBuf,
    max_hits: usize,
}

impl SearchFacade {
    pub fn new(
        backend: Arc<dyn SearchBackend>,
        allow: &AllowList,
        log_root: impl Into<PathBuf>,
        max_hits: usize,
    ) -> Self {
        Self {
            backend,
            allowed: allow.channels(),
            log_root: log_root.into(),
            max_hits,
        }
    }

    /// Run one search. No recognised filter yields an empty result without
    /// touching the backend.
    pub async fn search(
        &self,
        filters: &SearchFilters,
        selected_channels: &[String],
    ) -> Result<GroupedResults, SearchError> {
        if filters.is_empty() {
            return Ok(GroupedResults::empty());
        }
        let channels = resolve_channels(&self.allowed, selected_channels)?;
        let Some(query) = build_query(filters, &channels)? else {
            return Ok(GroupedResults::empty());
        };

        let started = Instant::now();
        let hits = self.backend.search(&query, self.max_hits).await?;
        let took = started.elapsed().as_secs_f64();
        tracing::debug!(
            backend = self.backend.name(),
            channels = ?channels,
            hits = hits.len(),
            took_seconds = took,
            "search finished"
        );

        Ok(group_hits(hits, took, |key| {
            log_file_path(&self.log_root, key).display().to_string()
        }))
    }
}

/// `chanlog search`: run one query and print the grouped results.
pub async fn run_search(
    config: &Config,
    actor: Option<String>,
    text: Option<String>,
    channels: Vec<String>,
    json: bool,
) -> Result<()> {
    let filters = SearchFilters::from_pairs(
        [("actor", actor), ("text", text)]
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k, v))),
    );
    if filters.is_empty() {
        println!("No results.");
        return Ok(());
    }

    let backend = open_backend(config).await?;
    let facade = SearchFacade::new(
        backend,
        &config.allow_list()?,
        &config.logs.root,
        config.search.max_hits,
    );
    let results = facade.search(&filters, &channels).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for group in &results.groups {
        println!(
            "== {} {} ({} hits)",
            group.channel,
            group.date.format("%Y-%m-%d"),
            group.hits.len()
        );
        println!("   log: {}", group.log_file_path);
        for hit in &group.hits {
            println!("   {} {}", hit.timestamp, hit.document.formatted);
        }
        println!();
    }
    println!(
        "{} hits in {} files ({:.3}s)",
        results.total_hits(),
        results.groups.len(),
        results.took_seconds
    );
    Ok(())
}
