//! In-memory [`SearchBackend`] for tests and dry runs.
//!
//! Documents live in a `BTreeMap` keyed by content id behind a
//! `std::sync::RwLock`. Queries are evaluated directly against the stored
//! documents; full-text matching is token equality after the same
//! tokenization the query builder uses.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use crate::bulk::BulkPayload;
use crate::error::BackendError;
use crate::models::Document;
use crate::query::{tokenize, Query};

use super::{field_value, PartitionStats, SearchBackend};

struct StoredDoc {
    index: String,
    document: Document,
}

/// In-memory search backend.
#[derive(Default)]
pub struct InMemoryBackend {
    docs: RwLock<BTreeMap<String, StoredDoc>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.docs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every stored document, ordered by id.
    pub fn documents(&self) -> Vec<Document> {
        self.docs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|s| s.document.clone())
            .collect()
    }
}

/// Evaluate a query against one document.
pub fn matches(query: &Query, doc: &Document) -> bool {
    match query {
        Query::And(qs) => qs.iter().all(|q| matches(q, doc)),
        Query::Or(qs) => qs.iter().any(|q| matches(q, doc)),
        Query::Term { field, value } => field_value(doc, *field) == Some(value.as_str()),
        Query::Match { field, tokens } => match field_value(doc, *field) {
            Some(text) => {
                let have = tokenize(text);
                tokens.iter().all(|t| have.contains(t))
            }
            None => false,
        },
    }
}

#[async_trait]
impl SearchBackend for InMemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn bulk(&self, payload: &BulkPayload) -> Result<(), BackendError> {
        let mut docs = self.docs.write().unwrap_or_else(PoisonError::into_inner);
        for entry in &payload.entries {
            docs.insert(
                entry.id.clone(),
                StoredDoc {
                    index: entry.index.clone(),
                    document: entry.document.clone(),
                },
            );
        }
        Ok(())
    }

    async fn search(&self, query: &Query, limit: usize) -> Result<Vec<Document>, BackendError> {
        let docs = self.docs.read().unwrap_or_else(PoisonError::into_inner);
        let mut hits: Vec<Document> = docs
            .values()
            .filter(|s| matches(query, &s.document))
            .map(|s| s.document.clone())
            .collect();
        hits.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn partitions(&self) -> Result<Vec<PartitionStats>, BackendError> {
        let docs = self.docs.read().unwrap_or_else(PoisonError::into_inner);
        let mut counts: BTreeMap<&str, u64> = BTreeMap::new();
        for stored in docs.values() {
            *counts.entry(stored.index.as_str()).or_default() += 1;
        }
        Ok(counts
            .into_iter()
            .map(|(key, documents)| PartitionStats {
                partition_key: key.to_string(),
                documents,
            })
            .collect())
    }
}
