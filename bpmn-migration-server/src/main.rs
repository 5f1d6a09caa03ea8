//! bpmn-migration-server: hosts in-memory partitions and replays a command
//! journal against them.
//!
//! Journal commands are grouped into batches separated by blank lines.
//!
//! Reads config from `BPMN_MIGRATION_CONFIG` (YAML), overridable through
//!   BPMN_MIGRATION_PARTITIONS         number of partitions (default: 1)
//!   BPMN_MIGRATION_TIMER_INTERVAL_MS  timer check interval (default: 100)

use anyhow::{Context, Result};
use bpmn_migration_core::clock::SystemClock;
use bpmn_migration_core::{Broker, Command, EngineConfig, MemoryStore, Partition, ProcessRepository};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,bpmn_migration_core=debug".into()),
        )
        .init();

    let config = EngineConfig::from_env().context("invalid engine configuration")?;
    tracing::info!(
        partitions = config.partitions,
        timer_check_interval_ms = config.timer_check_interval_ms,
        "configuration loaded"
    );

    let repository = Arc::new(ProcessRepository::new());
    if let Some(dir) = &config.definitions_dir {
        let deployed = deploy_dir(&repository, dir)?;
        tracing::info!(count = deployed, dir = %dir.display(), "definitions deployed");
    }

    let clock = Arc::new(SystemClock);
    let interval = Duration::from_millis(config.timer_check_interval_ms);
    let partitions: Vec<Partition> = (1..=config.partitions)
        .map(|id| {
            Partition::start(
                id,
                Arc::new(MemoryStore::new()),
                repository.clone(),
                clock.clone(),
                interval,
            )
        })
        .collect();
    let broker = Broker::new(partitions.iter().map(Partition::handle).collect());

    if let Some(journal) = &config.command_journal {
        let content = std::fs::read_to_string(journal)
            .with_context(|| format!("failed to read command journal {}", journal.display()))?;
        let batches = parse_journal(&content)?;
        tracing::info!(batches = batches.len(), "replaying command journal");
        let rejected = replay(&broker, batches, &mut std::io::stdout()).await?;
        tracing::info!(rejected, "command journal replayed");
    }

    tracing::info!("bpmn-migration-server running, ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    for partition in partitions {
        partition.shutdown().await?;
    }
    Ok(())
}

/// Deploy every `*.yaml` file of `dir` in file name order.
fn deploy_dir(repository: &ProcessRepository, dir: &Path) -> Result<usize> {
    let mut paths: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read definitions dir {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "yaml" || ext == "yml"))
        .collect();
    paths.sort();

    for path in &paths {
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read definition {}", path.display()))?;
        repository
            .deploy_yaml(&yaml)
            .with_context(|| format!("failed to deploy {}", path.display()))?;
    }
    Ok(paths.len())
}

/// One JSON command per line; `#` starts a comment line. Blank lines
/// separate batches: the commands of a batch are queued together, so they
/// run as concurrent writes against the partitions.
fn parse_journal(content: &str) -> Result<Vec<Vec<Command>>> {
    let mut batches = Vec::new();
    let mut batch = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            if !batch.is_empty() {
                batches.push(std::mem::take(&mut batch));
            }
            continue;
        }
        if line.starts_with('#') {
            continue;
        }
        let command =
            serde_json::from_str(line).with_context(|| format!("journal line {}", idx + 1))?;
        batch.push(command);
    }
    if !batch.is_empty() {
        batches.push(batch);
    }
    Ok(batches)
}

/// Submit each batch and wait for all of its responses before the next one.
/// Writes one JSON line per record, and one per rejected response. Returns
/// the number of rejections.
async fn replay(
    broker: &Broker,
    batches: Vec<Vec<Command>>,
    out: &mut impl Write,
) -> Result<usize> {
    let mut rejected = 0;
    for batch in batches {
        for response in broker.submit_batch(batch).await?.into_iter().flatten() {
            if let Some(rejection) = response.rejection() {
                tracing::warn!(
                    rejection_type = %rejection.rejection_type,
                    reason = %rejection.reason,
                    "journal command rejected"
                );
                writeln!(out, "{}", serde_json::to_string(&response)?)?;
                rejected += 1;
            }
            for record in response.records() {
                writeln!(out, "{}", serde_json::to_string(record)?)?;
            }
        }
    }
    Ok(rejected)
}
