//! Search backend abstraction.
//!
//! The [`SearchBackend`] trait is the seam between the pipeline and
//! whatever actually stores and searches documents: SQLite FTS5,
//! Elasticsearch, or the in-memory backend used in tests.
//!
//! Implementations must be `Send + Sync`; the indexer's flush task and the
//! search facade share one instance behind an `Arc`.

pub mod memory;

use async_trait::async_trait;
use serde::Serialize;

use crate::bulk::BulkPayload;
use crate::error::BackendError;
use crate::models::Document;
use crate::query::{Field, Query};

/// Document count for one partition, as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionStats {
    pub partition_key: String,
    pub documents: u64,
}

/// Abstract search backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`prepare`](SearchBackend::prepare) | Create or verify the target index |
/// | [`bulk`](SearchBackend::bulk) | Submit one batch of documents |
/// | [`search`](SearchBackend::search) | Run a [`Query`], newest hits first |
/// | [`partitions`](SearchBackend::partitions) | List indexed partitions |
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Short label for logs (`"sqlite"`, `"elasticsearch"`, ...).
    fn name(&self) -> &str;

    /// Create the index when `create` is set, otherwise check it exists.
    async fn prepare(&self, _create: bool) -> Result<(), BackendError> {
        Ok(())
    }

    /// Submit one batch. Either the whole batch is accepted or an error is
    /// returned; entries already present (same id) are overwritten or kept.
    async fn bulk(&self, payload: &BulkPayload) -> Result<(), BackendError>;

    /// Return at most `limit` matching documents, most recent first.
    async fn search(&self, query: &Query, limit: usize) -> Result<Vec<Document>, BackendError>;

    /// Per-partition document counts, ordered by partition key.
    async fn partitions(&self) -> Result<Vec<PartitionStats>, BackendError>;
}

/// Value of a queryable field on a document.
pub fn field_value<'a>(doc: &'a Document, field: Field) -> Option<&'a str> {
    match field {
        Field::Channel => Some(doc.channel.as_str()),
        Field::Actor => doc.actor.as_deref(),
        Field::Formatted => Some(doc.formatted.as_str()),
    }
}
