//! SQLite FTS5 implementation of [`SearchBackend`].
//!
//! Documents go into the `events` table with their partition key in a
//! column; the `formatted` line is also indexed in `events_fts`. A bulk
//! payload is applied in one transaction with `INSERT OR IGNORE` on the
//! content id, so replays and re-imports never duplicate rows.
//!
//! Queries are translated to SQL with bound parameters. Full-text clauses
//! become an FTS5 `MATCH` over quoted tokens, which keeps user text out of
//! the FTS query syntax.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::sqlite::{Sqlite, SqliteRow};
use sqlx::{QueryBuilder, Row, SqlitePool};

use chanlog_core::backend::{PartitionStats, SearchBackend};
use chanlog_core::bulk::BulkPayload;
use chanlog_core::query::{Field, Query};
use chanlog_core::{BackendError, Document};

use crate::db;
use crate::migrate;

const STORED_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Open (or create) the database file. The schema is only created by
    /// [`SearchBackend::prepare`] with `create` set.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        Ok(Self { pool })
    }
}

fn backend_err(err: sqlx::Error) -> BackendError {
    match err {
        sqlx::Error::Database(db) => BackendError::Rejected(db.message().to_string()),
        sqlx::Error::ColumnNotFound(_) | sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            BackendError::Malformed(err.to_string())
        }
        other => BackendError::Unavailable(other.to_string()),
    }
}

/// FTS5 expression requiring every token, each quoted as a literal string.
fn fts_expression(tokens: &[String]) -> String {
    tokens
        .iter()
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

fn push_condition(qb: &mut QueryBuilder<'_, Sqlite>, query: &Query) {
    match query {
        Query::And(parts) | Query::Or(parts) if parts.is_empty() => {
            // Empty AND is vacuously true; empty OR matches nothing.
            qb.push(if matches!(query, Query::And(_)) { "1" } else { "0" });
        }
        Query::And(parts) | Query::Or(parts) => {
            let joiner = if matches!(query, Query::And(_)) {
                " AND "
            } else {
                " OR "
            };
            qb.push("(");
            for (i, part) in parts.iter().enumerate() {
                if i > 0 {
                    qb.push(joiner);
                }
                push_condition(qb, part);
            }
            qb.push(")");
        }
        Query::Term { field, value } => {
            qb.push(format!("e.{} = ", field.as_str()));
            qb.push_bind(value.clone());
        }
        Query::Match {
            field: Field::Formatted,
            tokens,
        } => {
            qb.push("e.id IN (SELECT event_id FROM events_fts WHERE events_fts MATCH ");
            qb.push_bind(fts_expression(tokens));
            qb.push(")");
        }
        Query::Match { field, tokens } => {
            qb.push("(");
            for (i, token) in tokens.iter().enumerate() {
                if i > 0 {
                    qb.push(" AND ");
                }
                qb.push(format!("lower(e.{}) LIKE ", field.as_str()));
                qb.push_bind(format!("%{}%", token));
            }
            qb.push(")");
        }
    }
}

fn row_to_document(row: &SqliteRow) -> Result<Document, BackendError> {
    let received_at: String = row.try_get("received_at").map_err(backend_err)?;
    let received_at = NaiveDateTime::parse_from_str(&received_at, STORED_TIME_FORMAT)
        .map_err(|e| BackendError::Malformed(format!("received_at {:?}: {}", received_at, e)))?;
    let mut doc = Document::new(
        row.try_get::<String, _>("channel").map_err(backend_err)?,
        received_at,
        row.try_get("formatted").map_err(backend_err)?,
    );
    doc.actor = row.try_get("actor").map_err(backend_err)?;
    doc.message = row.try_get("message").map_err(backend_err)?;
    doc.topic = row.try_get("topic").map_err(backend_err)?;
    doc.reason = row.try_get("reason").map_err(backend_err)?;
    doc.old_name = row.try_get("old_name").map_err(backend_err)?;
    doc.kicker = row.try_get("kicker").map_err(backend_err)?;
    Ok(doc)
}

#[async_trait]
impl SearchBackend for SqliteBackend {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn prepare(&self, create: bool) -> Result<(), BackendError> {
        if create {
            return migrate::run_migrations(&self.pool)
                .await
                .map_err(|e| BackendError::Unavailable(format!("{:#}", e)));
        }
        match migrate::schema_exists(&self.pool).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(BackendError::Rejected(
                "index does not exist; run `chanlog init` first".to_string(),
            )),
            Err(e) => Err(BackendError::Unavailable(format!("{:#}", e))),
        }
    }

    async fn bulk(&self, payload: &BulkPayload) -> Result<(), BackendError> {
        let mut tx = self.pool.begin().await.map_err(backend_err)?;

        for entry in &payload.entries {
            let doc = &entry.document;
            let inserted = sqlx::query(
                r#"
                INSERT OR IGNORE INTO events
                    (id, partition_key, doc_type, channel, received_at, formatted,
                     actor, message, topic, reason, old_name, kicker)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&entry.id)
            .bind(&entry.index)
            .bind(&payload.doc_type)
            .bind(&doc.channel)
            .bind(doc.received_at.format(STORED_TIME_FORMAT).to_string())
            .bind(&doc.formatted)
            .bind(&doc.actor)
            .bind(&doc.message)
            .bind(&doc.topic)
            .bind(&doc.reason)
            .bind(&doc.old_name)
            .bind(&doc.kicker)
            .execute(&mut *tx)
            .await
            .map_err(backend_err)?
            .rows_affected();

            if inserted > 0 {
                sqlx::query("INSERT INTO events_fts (event_id, formatted) VALUES (?, ?)")
                    .bind(&entry.id)
                    .bind(&doc.formatted)
                    .execute(&mut *tx)
                    .await
                    .map_err(backend_err)?;
            }
        }

        tx.commit().await.map_err(backend_err)?;
        Ok(())
    }

    async fn search(&self, query: &Query, limit: usize) -> Result<Vec<Document>, BackendError> {
        let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
            "SELECT e.channel, e.received_at, e.formatted, e.actor, e.message, e.topic, \
             e.reason, e.old_name, e.kicker FROM events e WHERE ",
        );
        push_condition(&mut qb, query);
        qb.push(" ORDER BY e.received_at DESC, e.rowid DESC LIMIT ");
        qb.push_bind(limit as i64);

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;
        rows.iter().map(row_to_document).collect()
    }

    async fn partitions(&self) -> Result<Vec<PartitionStats>, BackendError> {
        let rows = sqlx::query(
            "SELECT partition_key, COUNT(*) AS documents FROM events GROUP BY partition_key ORDER BY partition_key",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(backend_err)?;

        rows.iter()
            .map(|row| {
                let documents: i64 = row.try_get("documents").map_err(backend_err)?;
                Ok(PartitionStats {
                    partition_key: row.try_get("partition_key").map_err(backend_err)?,
                    documents: documents as u64,
                })
            })
            .collect()
    }
}
