//! Configuration parsing and validation.
//!
//! chanlog is configured via a TOML file (default `config/chanlog.toml`).
//! Every component receives the slice of configuration it needs through its
//! constructor; nothing reads the file after startup.
//!
//! # Example
//!
//! ```toml
//! [logs]
//! root = "./data/logs"
//!
//! [channels]
//! allow = ["#general", "#dev"]
//!
//! [indexer]
//! batch_size = 200
//! flush_interval_secs = 5
//! failure_dir = "./data/failed"
//!
//! [backend]
//! kind = "sqlite"
//!
//! [db]
//! path = "./data/chanlog.sqlite"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chanlog_core::bulk::DEFAULT_DOC_TYPE;

use crate::coordinator::AllowList;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub logs: LogsConfig,
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub indexer: IndexerConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub db: Option<DbConfig>,
    #[serde(default)]
    pub elasticsearch: Option<ElasticsearchConfig>,
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogsConfig {
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChannelsConfig {
    pub allow: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexerConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
    #[serde(default = "default_failure_dir")]
    pub failure_dir: PathBuf,
    #[serde(default = "default_submit_timeout_secs")]
    pub submit_timeout_secs: u64,
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    #[serde(default = "default_doc_type")]
    pub doc_type: String,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            flush_interval_secs: default_flush_interval_secs(),
            failure_dir: default_failure_dir(),
            submit_timeout_secs: default_submit_timeout_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            doc_type: default_doc_type(),
        }
    }
}

impl IndexerConfig {
    pub fn flush_interval(&self) -> Option<Duration> {
        (self.flush_interval_secs > 0).then(|| Duration::from_secs(self.flush_interval_secs))
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_secs(self.submit_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

fn default_batch_size() -> usize {
    200
}
fn default_flush_interval_secs() -> u64 {
    5
}
fn default_failure_dir() -> PathBuf {
    PathBuf::from("./data/failed")
}
fn default_submit_timeout_secs() -> u64 {
    30
}
fn default_shutdown_timeout_secs() -> u64 {
    10
}
fn default_doc_type() -> String {
    DEFAULT_DOC_TYPE.to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    #[serde(default = "default_backend_kind")]
    pub kind: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: default_backend_kind(),
        }
    }
}

fn default_backend_kind() -> String {
    "sqlite".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ElasticsearchConfig {
    pub url: String,
    #[serde(default = "default_submit_timeout_secs")]
    pub timeout_secs: u64,
    /// Send `_type` in bulk action lines. Elasticsearch 7 accepts it;
    /// Elasticsearch 8 rejects it, so set this to false there.
    #[serde(default = "default_send_type")]
    pub send_type: bool,
}

fn default_send_type() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_max_hits")]
    pub max_hits: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_hits: default_max_hits(),
        }
    }
}

fn default_max_hits() -> usize {
    200
}

impl Config {
    /// The validated channel allow-list.
    pub fn allow_list(&self) -> Result<AllowList> {
        Ok(AllowList::new(&self.channels.allow)?)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate channels
    config.allow_list()?;

    // Validate indexer
    if config.indexer.batch_size == 0 && config.indexer.flush_interval_secs == 0 {
        bail!("indexer.batch_size and indexer.flush_interval_secs cannot both be 0: nothing would ever flush");
    }
    if config.indexer.submit_timeout_secs == 0 {
        bail!("indexer.submit_timeout_secs must be > 0");
    }
    if config.indexer.doc_type.trim().is_empty() {
        bail!("indexer.doc_type must not be empty");
    }

    // Validate search
    if config.search.max_hits == 0 {
        bail!("search.max_hits must be >= 1");
    }

    // Validate backend
    match config.backend.kind.as_str() {
        "sqlite" => {
            if config.db.is_none() {
                bail!("[db] path must be set when backend.kind is 'sqlite'");
            }
        }
        "elasticsearch" => match &config.elasticsearch {
            Some(es) if es.url.starts_with("http://") || es.url.starts_with("https://") => {}
            Some(es) => bail!("elasticsearch.url must be an http(s) URL, got '{}'", es.url),
            None => bail!("[elasticsearch] url must be set when backend.kind is 'elasticsearch'"),
        },
        other => bail!(
            "Unknown backend kind: '{}'. Must be sqlite or elasticsearch.",
            other
        ),
    }

    Ok(())
}
