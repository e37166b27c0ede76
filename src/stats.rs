//! Index overview for `chanlog partitions`.
//!
//! Lists every partition (channel-day) the backend holds with its document
//! count, and flags partitions whose plaintext log file is missing.

use anyhow::Result;

use chanlog_core::backend::PartitionStats;
use chanlog_core::PartitionKey;

use crate::backend::open_backend;
use crate::config::Config;
use crate::log_writer::log_file_path;

/// Totals across partitions, grouped per channel.
pub fn channel_totals(partitions: &[PartitionStats]) -> Vec<(String, u64)> {
    let mut totals: std::collections::BTreeMap<String, u64> = Default::default();
    for p in partitions {
        let channel = PartitionKey::parse(&p.partition_key)
            .map(|k| k.channel)
            .unwrap_or_else(|| p.partition_key.clone());
        *totals.entry(channel).or_default() += p.documents;
    }
    totals.into_iter().collect()
}

pub async fn run_partitions(config: &Config, json: bool) -> Result<()> {
    let backend = open_backend(config).await?;
    let partitions = backend.partitions().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&partitions)?);
        return Ok(());
    }

    if partitions.is_empty() {
        println!("No partitions indexed.");
        return Ok(());
    }

    println!("{:<32} {:>8}   {}", "PARTITION", "DOCS", "LOG FILE");
    println!("{}", "-".repeat(72));
    for p in &partitions {
        let log = match PartitionKey::parse(&p.partition_key) {
            Some(key) => {
                let path = log_file_path(&config.logs.root, &key);
                if path.exists() {
                    path.display().to_string()
                } else {
                    format!("{} (missing)", path.display())
                }
            }
            None => "-".to_string(),
        };
        println!("{:<32} {:>8}   {}", p.partition_key, p.documents, log);
    }

    println!();
    println!("  By channel:");
    for (channel, documents) in channel_totals(&partitions) {
        println!("  {:<30} {:>8}", channel, documents);
    }
    println!();
    Ok(())
}
