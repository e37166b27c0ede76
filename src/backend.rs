//! Backend selection from configuration.

use std::sync::Arc;

use anyhow::{bail, Context, Result};

use chanlog_core::backend::SearchBackend;

use crate::config::Config;
use crate::elasticsearch::ElasticsearchBackend;
use crate::sqlite_backend::SqliteBackend;

/// Open the backend named by `backend.kind`.
pub async fn open_backend(config: &Config) -> Result<Arc<dyn SearchBackend>> {
    match config.backend.kind.as_str() {
        "sqlite" => {
            let db = config
                .db
                .as_ref()
                .context("[db] path must be set when backend.kind is 'sqlite'")?;
            Ok(Arc::new(SqliteBackend::open(&db.path).await?))
        }
        "elasticsearch" => {
            let es = config
                .elasticsearch
                .as_ref()
                .context("[elasticsearch] url must be set when backend.kind is 'elasticsearch'")?;
            Ok(Arc::new(ElasticsearchBackend::new(es)?))
        }
        other => bail!(
            "Unknown backend kind: '{}'. Must be sqlite or elasticsearch.",
            other
        ),
    }
}

/// `chanlog init`: create the log and failure directories and the index.
pub async fn run_init(config: &Config) -> Result<()> {
    std::fs::create_dir_all(&config.logs.root).with_context(|| {
        format!("Failed to create log root {}", config.logs.root.display())
    })?;
    std::fs::create_dir_all(&config.indexer.failure_dir).with_context(|| {
        format!(
            "Failed to create failure directory {}",
            config.indexer.failure_dir.display()
        )
    })?;

    let backend = open_backend(config).await?;
    backend
        .prepare(true)
        .await
        .with_context(|| format!("Failed to create {} index", backend.name()))?;

    println!("init");
    println!("  logs: {}", config.logs.root.display());
    println!("  failures: {}", config.indexer.failure_dir.display());
    println!("  backend: {}", backend.name());
    println!("ok");
    Ok(())
}
