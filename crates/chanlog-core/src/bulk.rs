//! The bulk-submission payload.
//!
//! One flush produces one [`BulkPayload`]. Its serialized form is the
//! Elasticsearch bulk NDJSON format: an action line naming the target index
//! (the document's partition key), the document type, and the content id,
//! followed by the document itself. The same text is what lands in a
//! failed-batch file, so [`BulkPayload::parse_ndjson`] can rebuild the batch
//! for replay.
//!
//! Elasticsearch 8 refuses action lines that carry `_type`; clusters of that
//! generation are sent [`BulkPayload::to_typeless_ndjson`] instead.

use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::models::Document;

/// Default document type label sent with every bulk entry.
pub const DEFAULT_DOC_TYPE: &str = "irc";

/// One document bound for one index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkEntry {
    pub index: String,
    pub id: String,
    pub document: Document,
}

impl BulkEntry {
    pub fn new(document: Document) -> Self {
        Self {
            index: document.partition_key().to_string(),
            id: document.content_id(),
            document,
        }
    }
}

/// All entries of one bulk request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkPayload {
    pub doc_type: String,
    pub entries: Vec<BulkEntry>,
}

#[derive(Serialize, Deserialize)]
struct ActionLine {
    index: ActionMeta,
}

#[derive(Serialize, Deserialize)]
struct ActionMeta {
    #[serde(rename = "_index")]
    index: String,
    #[serde(rename = "_type", default, skip_serializing_if = "Option::is_none")]
    doc_type: Option<String>,
    #[serde(rename = "_id")]
    id: String,
}

impl BulkPayload {
    pub fn from_documents(doc_type: &str, documents: Vec<Document>) -> Self {
        Self {
            doc_type: doc_type.to_string(),
            entries: documents.into_iter().map(BulkEntry::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct target indexes, in first-seen order.
    pub fn indexes(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for entry in &self.entries {
            if !seen.contains(&entry.index.as_str()) {
                seen.push(&entry.index);
            }
        }
        seen
    }

    /// Serialize to newline-delimited JSON with a trailing newline.
    pub fn to_ndjson(&self) -> Result<String, serde_json::Error> {
        self.write_ndjson(true)
    }

    /// Same as [`to_ndjson`](Self::to_ndjson) without `_type` in the action lines.
    pub fn to_typeless_ndjson(&self) -> Result<String, serde_json::Error> {
        self.write_ndjson(false)
    }

    fn write_ndjson(&self, with_type: bool) -> Result<String, serde_json::Error> {
        let mut out = String::new();
        for entry in &self.entries {
            let action = ActionLine {
                index: ActionMeta {
                    index: entry.index.clone(),
                    doc_type: with_type.then(|| self.doc_type.clone()),
                    id: entry.id.clone(),
                },
            };
            out.push_str(&serde_json::to_string(&action)?);
            out.push('\n');
            out.push_str(&serde_json::to_string(&entry.document)?);
            out.push('\n');
        }
        Ok(out)
    }

    /// Rebuild a payload from its NDJSON form. Blank lines are ignored.
    pub fn parse_ndjson(text: &str) -> Result<Self, ParseError> {
        let mut lines = text
            .lines()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty());
        let mut entries = Vec::new();
        let mut doc_type: Option<String> = None;

        while let Some((n, action_line)) = lines.next() {
            let action: ActionLine =
                serde_json::from_str(action_line).map_err(|e| ParseError::Bulk {
                    line: n + 1,
                    reason: e.to_string(),
                })?;
            let (m, doc_line) = lines.next().ok_or_else(|| ParseError::Bulk {
                line: n + 1,
                reason: "action line without a document".to_string(),
            })?;
            let document: Document =
                serde_json::from_str(doc_line).map_err(|e| ParseError::Bulk {
                    line: m + 1,
                    reason: e.to_string(),
                })?;
            if let Some(label) = action.index.doc_type {
                doc_type.get_or_insert(label);
            }
            entries.push(BulkEntry {
                index: action.index.index,
                id: action.index.id,
                document,
            });
        }

        Ok(Self {
            doc_type: doc_type.unwrap_or_else(|| DEFAULT_DOC_TYPE.to_string()),
            entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn doc(channel: &str, at: &str, line: &str) -> Document {
        let ts = NaiveDateTime::parse_from_str(at, "%Y-%m-%d %H:%M:%S").unwrap();
        let mut d = Document::new(channel, ts, line.to_string());
        d.actor = Some("alice".into());
        d
    }

    #[test]
    fn test_ndjson_layout() {
        let payload = BulkPayload::from_documents(
            "irc",
            vec![doc("general", "2024-01-01 10:00:00", "<alice> hi")],
        );
        let text = payload.to_ndjson().unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(text.ends_with('\n'));

        let action: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(action["index"]["_index"], "general.2024-01-01");
        assert_eq!(action["index"]["_type"], "irc");
        assert_eq!(action["index"]["_id"], payload.entries[0].id);

        let body: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(body["formatted"], "<alice> hi");
        assert_eq!(body["actor"], "alice");
    }

    #[test]
    fn test_typeless_action_lines() {
        let payload = BulkPayload::from_documents(
            "irc",
            vec![doc("general", "2024-01-01 10:00:00", "<alice> hi")],
        );
        let text = payload.to_typeless_ndjson().unwrap();
        let action: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        assert!(action["index"].get("_type").is_none());
        assert_eq!(action["index"]["_index"], "general.2024-01-01");

        // A typeless file still replays, under the default label.
        let parsed = BulkPayload::parse_ndjson(&text).unwrap();
        assert_eq!(parsed.doc_type, DEFAULT_DOC_TYPE);
        assert_eq!(parsed.entries, payload.entries);
    }

    #[test]
    fn test_parse_restores_payload() {
        let payload = BulkPayload::from_documents(
            "irc",
            vec![
                doc("general", "2024-01-01 10:00:00", "<alice> hi"),
                doc("dev", "2024-01-02 11:00:00", "* alice waves"),
            ],
        );
        let parsed = BulkPayload::parse_ndjson(&payload.to_ndjson().unwrap()).unwrap();
        assert_eq!(parsed, payload);
        assert_eq!(parsed.indexes(), vec!["general.2024-01-01", "dev.2024-01-02"]);
    }

    #[test]
    fn test_parse_reports_line() {
        let err = BulkPayload::parse_ndjson("{\"index\":{\"_index\":\"a\",\"_type\":\"irc\",\"_id\":\"x\"}}\n{oops}\n")
            .unwrap_err();
        assert!(matches!(err, ParseError::Bulk { line: 2, .. }));

        let err = BulkPayload::parse_ndjson("{\"index\":{\"_index\":\"a\",\"_type\":\"irc\",\"_id\":\"x\"}}\n")
            .unwrap_err();
        assert!(matches!(err, ParseError::Bulk { line: 1, .. }));
    }

    #[test]
    fn test_empty_payload_serializes_to_nothing() {
        let payload = BulkPayload::from_documents("irc", Vec::new());
        assert!(payload.is_empty());
        assert_eq!(payload.to_ndjson().unwrap(), "");
    }
}
