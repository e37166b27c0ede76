//! Elasticsearch implementation of [`SearchBackend`] over its HTTP API.
//!
//! Each partition key is its own index (lowercased, as Elasticsearch
//! requires). `prepare(true)` installs an index template so every
//! partition index gets the same mapping: `channel` and `actor` as
//! keywords, `formatted` as analysed text, `receivedAt` as a date.
//!
//! | Operation | Request |
//! |-----------|---------|
//! | bulk | `POST /_bulk` with the NDJSON payload |
//! | search | `POST /<channel>.*,…/_search` with a `bool` query |
//! | partitions | `GET /_cat/indices?format=json` |

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use chanlog_core::backend::{PartitionStats, SearchBackend};
use chanlog_core::bulk::BulkPayload;
use chanlog_core::query::{Field, Query};
use chanlog_core::{BackendError, Document, PartitionKey};

use crate::config::ElasticsearchConfig;

const TEMPLATE_NAME: &str = "chanlog";

pub struct ElasticsearchBackend {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
    send_type: bool,
}

impl ElasticsearchBackend {
    pub fn new(config: &ElasticsearchConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            timeout,
            send_type: config.send_type,
        })
    }

    fn request_err(&self, err: reqwest::Error) -> BackendError {
        if err.is_timeout() {
            BackendError::Timeout(self.timeout)
        } else {
            BackendError::Unavailable(format!(
                "Elasticsearch connection error (is it running at {}?): {}",
                self.url, err
            ))
        }
    }

    /// The `_bulk` request body: index names lowercased, `_type` only when
    /// the cluster accepts it.
    fn bulk_body(&self, payload: &BulkPayload) -> Result<String, BackendError> {
        let mut lowered = payload.clone();
        for entry in &mut lowered.entries {
            entry.index = entry.index.to_lowercase();
        }
        let body = if self.send_type {
            lowered.to_ndjson()
        } else {
            lowered.to_typeless_ndjson()
        };
        body.map_err(|e| BackendError::Malformed(format!("cannot serialize payload: {}", e)))
    }

    /// Send a request and return the JSON body of a 2xx response.
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, BackendError> {
        let response = request.send().await.map_err(|e| self.request_err(e))?;
        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| BackendError::Malformed(format!("invalid response body: {}", e)));
        }
        let body_text = response.text().await.unwrap_or_default();
        if status.is_client_error() {
            Err(BackendError::Rejected(format!(
                "Elasticsearch error {}: {}",
                status, body_text
            )))
        } else {
            Err(BackendError::Unavailable(format!(
                "Elasticsearch error {}: {}",
                status, body_text
            )))
        }
    }
}

/// Index template applied to every partition index.
fn index_template() -> Value {
    json!({
        "index_patterns": ["*.*-*-*"],
        "template": {
            "mappings": {
                "properties": {
                    "channel": { "type": "keyword" },
                    "actor": { "type": "keyword" },
                    "kicker": { "type": "keyword" },
                    "oldName": { "type": "keyword" },
                    "formatted": { "type": "text" },
                    "message": { "type": "text" },
                    "topic": { "type": "text" },
                    "reason": { "type": "text" },
                    "receivedAt": {
                        "type": "date",
                        "format": "yyyy-MM-dd'T'HH:mm:ss||strict_date_optional_time"
                    }
                }
            }
        }
    })
}

fn field_name(field: Field) -> &'static str {
    field.as_str()
}

/// Translate a [`Query`] into the Elasticsearch query DSL.
pub fn query_dsl(query: &Query) -> Value {
    match query {
        Query::And(parts) => json!({
            "bool": { "must": parts.iter().map(query_dsl).collect::<Vec<_>>() }
        }),
        Query::Or(parts) => json!({
            "bool": {
                "should": parts.iter().map(query_dsl).collect::<Vec<_>>(),
                "minimum_should_match": 1
            }
        }),
        Query::Term { field, value } => json!({
            "term": { field_name(*field): value }
        }),
        Query::Match { field, tokens } => json!({
            "match": {
                field_name(*field): { "query": tokens.join(" "), "operator": "and" }
            }
        }),
    }
}

/// Index expression covering every partition of the queried channels.
fn target_indexes(query: &Query) -> String {
    let mut channels: Vec<String> = query
        .channels()
        .into_iter()
        .map(|c| format!("{}.*", c.to_lowercase()))
        .collect();
    channels.sort();
    channels.dedup();
    if channels.is_empty() {
        "*".to_string()
    } else {
        channels.join(",")
    }
}

/// First per-item error of a bulk response that reported `errors: true`.
fn bulk_item_error(body: &Value) -> Option<String> {
    if !body.get("errors").and_then(Value::as_bool).unwrap_or(false) {
        return None;
    }
    let first = body
        .get("items")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|item| item.as_object().and_then(|o| o.values().next()))
        .find_map(|action| action.get("error"));
    Some(match first {
        Some(error) => error
            .get("reason")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
        None => "bulk response reported errors".to_string(),
    })
}

fn parse_hits(body: &Value) -> Result<Vec<Document>, BackendError> {
    let hits = body
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .ok_or_else(|| BackendError::Malformed("search response missing hits.hits".to_string()))?;
    hits.iter()
        .map(|hit| {
            let source = hit
                .get("_source")
                .cloned()
                .ok_or_else(|| BackendError::Malformed("hit without _source".to_string()))?;
            serde_json::from_value(source)
                .map_err(|e| BackendError::Malformed(format!("invalid document in hit: {}", e)))
        })
        .collect()
}

fn parse_cat_indices(body: &Value) -> Vec<PartitionStats> {
    let mut stats: Vec<PartitionStats> = body
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|row| {
            let index = row.get("index")?.as_str()?;
            if index.starts_with('.') {
                return None;
            }
            PartitionKey::parse(index)?;
            let documents = row
                .get("docs.count")
                .and_then(|v| v.as_str().and_then(|s| s.parse().ok()).or_else(|| v.as_u64()))
                .unwrap_or(0);
            Some(PartitionStats {
                partition_key: index.to_string(),
                documents,
            })
        })
        .collect();
    stats.sort_by(|a, b| a.partition_key.cmp(&b.partition_key));
    stats
}

#[async_trait]
impl SearchBackend for ElasticsearchBackend {
    fn name(&self) -> &str {
        "elasticsearch"
    }

    async fn prepare(&self, create: bool) -> Result<(), BackendError> {
        let template_url = format!("{}/_index_template/{}", self.url, TEMPLATE_NAME);
        if create {
            self.send(self.client.put(&template_url).json(&index_template()))
                .await?;
            tracing::info!(url = %self.url, template = TEMPLATE_NAME, "index template installed");
            return Ok(());
        }
        match self.send(self.client.get(&template_url)).await {
            Ok(_) => Ok(()),
            Err(BackendError::Rejected(_)) => Err(BackendError::Rejected(format!(
                "index template '{}' does not exist; run `chanlog init` first",
                TEMPLATE_NAME
            ))),
            Err(other) => Err(other),
        }
    }

    async fn bulk(&self, payload: &BulkPayload) -> Result<(), BackendError> {
        let body = self.bulk_body(payload)?;

        let response = self
            .send(
                self.client
                    .post(format!("{}/_bulk", self.url))
                    .header("Content-Type", "application/x-ndjson")
                    .body(body),
            )
            .await?;
        match bulk_item_error(&response) {
            Some(reason) => Err(BackendError::Rejected(reason)),
            None => Ok(()),
        }
    }

    async fn search(&self, query: &Query, limit: usize) -> Result<Vec<Document>, BackendError> {
        let body = json!({
            "query": query_dsl(query),
            "sort": [{ "receivedAt": { "order": "desc" } }],
            "size": limit,
        });
        let url = format!(
            "{}/{}/_search?ignore_unavailable=true&allow_no_indices=true",
            self.url,
            target_indexes(query)
        );
        let response = self.send(self.client.post(url).json(&body)).await?;
        parse_hits(&response)
    }

    async fn partitions(&self) -> Result<Vec<PartitionStats>, BackendError> {
        let response = self
            .send(
                self.client
                    .get(format!("{}/_cat/indices?format=json&h=index,docs.count", self.url)),
            )
            .await?;
        Ok(parse_cat_indices(&response))
    }
}
