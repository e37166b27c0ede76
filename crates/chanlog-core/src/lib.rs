//! # chanlog core
//!
//! Pure logic shared by every chanlog entry point: the [`Document`] model,
//! text sanitizing, the event → document builder and its inverse line
//! grammar, the backend-neutral query model, result grouping, the bulk
//! payload codec, and the [`SearchBackend`] trait.
//!
//! This crate has no tokio, sqlx, HTTP, or filesystem dependencies.
//!
//! [`Document`]: models::Document
//! [`SearchBackend`]: backend::SearchBackend

pub mod backend;
pub mod builder;
pub mod bulk;
pub mod error;
pub mod grammar;
pub mod models;
pub mod query;
pub mod results;
pub mod sanitize;

pub use error::{BackendError, ParseError, QueryError};
pub use models::{Document, EventKind, PartitionKey};
