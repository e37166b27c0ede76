//! Grouping of raw search hits by source log file.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::models::{Document, PartitionKey, DATE_FORMAT};

/// One matched line, with its `HH:MM:SS` timestamp for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Hit {
    pub timestamp: String,
    #[serde(flatten)]
    pub document: Document,
}

/// All hits that came from one log file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultGroup {
    pub partition_key: String,
    pub channel: String,
    #[serde(serialize_with = "serialize_date")]
    pub date: NaiveDate,
    pub log_file_path: String,
    pub hits: Vec<Hit>,
}

/// A grouped search response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupedResults {
    pub groups: Vec<ResultGroup>,
    /// Backend round-trip latency.
    pub took_seconds: f64,
}

impl GroupedResults {
    pub fn empty() -> Self {
        Self {
            groups: Vec::new(),
            took_seconds: 0.0,
        }
    }

    pub fn total_hits(&self) -> usize {
        self.groups.iter().map(|g| g.hits.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

fn serialize_date<S: serde::Serializer>(date: &NaiveDate, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&date.format(DATE_FORMAT).to_string())
}

/// Group hits by partition key.
///
/// Groups come out ordered by date, then channel; hits inside a group by
/// `received_at` ascending. `log_path` maps a partition to its file.
///
/// `hits` are expected newest first, as backends return them; hits that
/// share a timestamp keep the reverse of that order.
pub fn group_hits<F>(hits: Vec<Document>, took_seconds: f64, log_path: F) -> GroupedResults
where
    F: Fn(&PartitionKey) -> String,
{
    let mut by_partition: BTreeMap<(NaiveDate, String), Vec<Document>> = BTreeMap::new();
    for doc in hits.into_iter().rev() {
        by_partition
            .entry((doc.received_at.date(), doc.channel.clone()))
            .or_default()
            .push(doc);
    }

    let groups = by_partition
        .into_iter()
        .map(|((date, channel), mut docs)| {
            docs.sort_by_key(|d| d.received_at);
            let key = PartitionKey::new(channel.clone(), date);
            ResultGroup {
                partition_key: key.to_string(),
                log_file_path: log_path(&key),
                channel,
                date,
                hits: docs
                    .into_iter()
                    .map(|document| Hit {
                        timestamp: document.timestamp(),
                        document,
                    })
                    .collect(),
            }
        })
        .collect();

    GroupedResults {
        groups,
        took_seconds,
    }
}
