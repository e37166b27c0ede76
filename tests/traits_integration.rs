//! Integration tests for the `SearchBackend` seam.
//!
//! These tests plug custom backends (implemented outside the crate) into
//! the real pipeline: coordinator → log writer + indexer → backend, and
//! back out through the search facade.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chanlog::coordinator::{AllowList, Dispatch, IngestionCoordinator};
use chanlog::feed::{apply, consume, parse_feed_line, FeedStats};
use chanlog::indexer::{BulkIndexer, FlushOutcome, IndexerSettings};
use chanlog::log_writer::ChannelLogWriter;
use chanlog::replay::{replay_file, ReplayOutcome};
use chanlog::search::SearchFacade;
use chanlog_core::backend::memory::{matches, InMemoryBackend};
use chanlog_core::backend::{PartitionStats, SearchBackend};
use chanlog_core::bulk::BulkPayload;
use chanlog_core::query::{Query, SearchFilters};
use chanlog_core::{BackendError, Document, EventKind};
use tempfile::TempDir;

// ─── Test Backend ───────────────────────────────────────────────────

/// Wraps the in-memory backend, counting calls and optionally refusing
/// every bulk request.
#[derive(Default)]
struct FlakyBackend {
    inner: InMemoryBackend,
    down: AtomicBool,
    bulk_calls: AtomicUsize,
    payloads: Mutex<Vec<usize>>,
}

#[async_trait]
impl SearchBackend for FlakyBackend {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn bulk(&self, payload: &BulkPayload) -> Result<(), BackendError> {
        self.bulk_calls.fetch_add(1, Ordering::SeqCst);
        self.payloads.lock().unwrap().push(payload.len());
        if self.down.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("connection refused".into()));
        }
        self.inner.bulk(payload).await
    }

    async fn search(&self, query: &Query, limit: usize) -> Result<Vec<Document>, BackendError> {
        self.inner.search(query, limit).await
    }

    async fn partitions(&self) -> Result<Vec<PartitionStats>, BackendError> {
        self.inner.partitions().await
    }
}

fn strings(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

fn settings(failure_dir: &Path) -> IndexerSettings {
    IndexerSettings {
        batch_size: 0,
        flush_interval: None,
        failure_dir: failure_dir.to_path_buf(),
        submit_timeout: Duration::from_secs(5),
        doc_type: "irc".to_string(),
    }
}

struct Pipeline {
    _tmp: TempDir,
    backend: Arc<FlakyBackend>,
    indexer: Arc<BulkIndexer>,
    coordinator: IngestionCoordinator,
    allow: AllowList,
}

impl Pipeline {
    fn new(allow: &[&str]) -> Self {
        let tmp = TempDir::new().unwrap();
        let backend = Arc::new(FlakyBackend::default());
        let indexer = Arc::new(BulkIndexer::new(
            backend.clone(),
            settings(&tmp.path().join("failed")),
        ));
        let allow = AllowList::new(&strings(allow)).unwrap();
        let coordinator = IngestionCoordinator::new(
            allow.clone(),
            Arc::new(ChannelLogWriter::new(tmp.path().join("logs"))),
            Arc::clone(&indexer),
        );
        Self {
            _tmp: tmp,
            backend,
            indexer,
            coordinator,
            allow,
        }
    }

    fn root(&self) -> &Path {
        self._tmp.path()
    }

    fn failure_files(&self) -> Vec<std::path::PathBuf> {
        match std::fs::read_dir(self.root().join("failed")) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => Vec::new(),
        }
    }

    fn facade(&self) -> SearchFacade {
        SearchFacade::new(self.backend.clone(), &self.allow, self.root().join("logs"), 100)
    }
}

fn message(actor: &str, text: &str) -> EventKind {
    EventKind::Message {
        actor: actor.to_string(),
        text: text.to_string(),
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_events_flow_to_custom_backend_and_back() {
    let p = Pipeline::new(&["#general", "#dev"]);
    p.coordinator
        .on_event("#general", &message("alice", "deploy finished"))
        .unwrap();
    p.coordinator
        .on_event("#dev", &message("bob", "deploy started"))
        .unwrap();
    p.coordinator
        .on_event("#general", &message("bob", "thanks"))
        .unwrap();

    assert!(matches!(
        p.indexer.flush().await,
        FlushOutcome::Indexed { documents: 3 }
    ));
    assert_eq!(p.backend.bulk_calls.load(Ordering::SeqCst), 1);

    let results = p
        .facade()
        .search(&SearchFilters::from_pairs([("text", "deploy")]), &[])
        .await
        .unwrap();
    assert_eq!(results.total_hits(), 2);
    let channels: Vec<&str> = results.groups.iter().map(|g| g.channel.as_str()).collect();
    assert_eq!(channels, vec!["dev", "general"]);
    assert!(Path::new(&results.groups[1].log_file_path).exists());
}

#[tokio::test]
async fn test_disallowed_channel_reaches_neither_log_nor_backend() {
    let p = Pipeline::new(&["#general"]);
    let dispatch = p
        .coordinator
        .on_event("#random", &message("alice", "secret"))
        .unwrap();
    assert_eq!(dispatch, Dispatch::Dropped);

    assert!(matches!(p.indexer.flush().await, FlushOutcome::Empty));
    assert_eq!(p.backend.bulk_calls.load(Ordering::SeqCst), 0);
    assert!(!p.root().join("logs").exists());
}

#[tokio::test]
async fn test_backend_outage_persists_batch_and_replay_recovers() {
    let p = Pipeline::new(&["#general"]);
    p.backend.down.store(true, Ordering::SeqCst);

    for n in 0..4 {
        p.coordinator
            .on_event("#general", &message("alice", &format!("line {}", n)))
            .unwrap();
    }
    let outcome = p.indexer.flush().await;
    assert!(matches!(outcome, FlushOutcome::Persisted { documents: 4, .. }));

    // The plaintext log is complete regardless.
    let log_dir = p.root().join("logs/general");
    let log = std::fs::read_dir(&log_dir).unwrap().next().unwrap().unwrap().path();
    assert_eq!(std::fs::read_to_string(log).unwrap().lines().count(), 4);

    let files = p.failure_files();
    assert_eq!(files.len(), 1);
    let payload = BulkPayload::parse_ndjson(&std::fs::read_to_string(&files[0]).unwrap()).unwrap();
    assert_eq!(payload.len(), 4);
    assert!(payload.entries.iter().all(|e| e.document.actor.as_deref() == Some("alice")));

    p.backend.down.store(false, Ordering::SeqCst);
    match replay_file(p.backend.as_ref(), &files[0], true).await {
        ReplayOutcome::Indexed { documents, removed } => {
            assert_eq!(documents, 4);
            assert!(removed);
        }
        ReplayOutcome::Failed { error } => panic!("replay failed: {:#}", error),
    }
    assert!(p.failure_files().is_empty());
    assert_eq!(p.backend.inner.len(), 4);
}

#[tokio::test]
async fn test_feed_drives_presence_fan_out() {
    let p = Pipeline::new(&["#general", "#dev"]);
    let feed = concat!(
        r##"{"kind":"names","channel":"#general","nicks":["@alice","bob"]}"##, "\n",
        r##"{"kind":"join","channel":"#dev","actor":"alice"}"##, "\n",
        "not json\n",
        r##"{"kind":"quit","actor":"alice","reason":"bye"}"##, "\n",
    );

    let mut stats = FeedStats::default();
    consume(&p.coordinator, feed.as_bytes(), &mut stats)
        .await
        .unwrap();
    assert_eq!(
        stats,
        FeedStats {
            lines: 4,
            logged: 3,
            skipped: 1
        }
    );
    p.indexer.flush().await;

    let results = p
        .facade()
        .search(&SearchFilters::from_pairs([("text", "quit bye")]), &[])
        .await
        .unwrap();
    assert_eq!(results.total_hits(), 2);
    for group in &results.groups {
        assert_eq!(group.hits[0].document.formatted, "(-) alice quit (bye)");
    }
    assert!(p.coordinator.members("#dev").is_empty());
    assert_eq!(p.coordinator.members("#general"), strings(&["bob"]));
}

#[tokio::test]
async fn test_flush_task_delivers_in_background() {
    let tmp = TempDir::new().unwrap();
    let backend = Arc::new(FlakyBackend::default());
    let mut s = settings(tmp.path());
    s.batch_size = 3;
    let indexer = Arc::new(BulkIndexer::new(backend.clone(), s));
    let task = indexer.spawn_flush_task();

    let coordinator = IngestionCoordinator::new(
        AllowList::new(&strings(&["#general"])).unwrap(),
        Arc::new(ChannelLogWriter::new(tmp.path().join("logs"))),
        Arc::clone(&indexer),
    );
    for n in 0..7 {
        let record = parse_feed_line(&format!(
            r##"{{"kind":"message","channel":"#general","actor":"alice","text":"n{}"}}"##,
            n
        ))
        .unwrap();
        apply(&coordinator, record).unwrap();
        tokio::task::yield_now().await;
    }

    let final_outcome = indexer.shutdown(Some(task), Duration::from_secs(2)).await;
    assert!(final_outcome.is_success());
    assert_eq!(backend.inner.len(), 7);
    assert_eq!(indexer.stats().indexed, 7);
    let sent: usize = backend.payloads.lock().unwrap().iter().sum();
    assert_eq!(sent, 7);
}

#[test]
fn test_memory_matches_is_public_for_custom_backends() {
    let doc = chanlog_core::builder::build(
        "general",
        &message("alice", "hi there"),
        chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap(),
    );
    let query = Query::Match {
        field: chanlog_core::query::Field::Formatted,
        tokens: strings(&["there"]),
    };
    assert!(matches(&query, &doc));
}

#[tokio::test]
async fn test_search_matches_channel_spelling_used_on_ingest() {
    let p = Pipeline::new(&["#General"]);
    let dispatch = p
        .coordinator
        .on_event("#general", &message("alice", "mixed case channel"))
        .unwrap();
    assert!(matches!(dispatch, Dispatch::Logged { .. }));
    assert!(p.indexer.flush().await.is_success());

    let filters = SearchFilters::from_pairs([("actor", "alice")]);
    for selection in [&["#general"][..], &["GENERAL"][..], &[][..]] {
        let results = p
            .facade()
            .search(&filters, &strings(selection))
            .await
            .unwrap();
        assert_eq!(results.total_hits(), 1, "{:?}", selection);
        assert_eq!(results.groups[0].channel, "General");
    }
}
