//! Failures command - List or reset per-item failure counters
//!
//! `docsync failures` lists every path with a failure record, the counter of
//! each operation type and whether the item is suspended. `--clear PATH`
//! drops the record so the next pass retries the item regardless of its
//! local modification time.

use anyhow::{Context as _, Result};
use clap::Args;
use tracing::info;

use docsync_core::domain::{
    failure::{FailureRecord, OperationKind},
    newtypes::RelativePath,
};
use docsync_core::ports::IStateCache;

use crate::commands::open_cache;
use crate::output::{get_formatter, OutputFormat};
use crate::Context;

#[derive(Debug, Args)]
pub struct FailuresCommand {
    /// Reset the failure record of this path (relative to the root)
    #[arg(long, value_name = "PATH")]
    pub clear: Option<String>,
}

/// Whether any counter reached the ceiling
fn is_suspended(record: &FailureRecord, ceiling: u32) -> bool {
    record.is_quarantined(record.last_local_modification, ceiling)
}

fn failure_json(record: &FailureRecord, ceiling: u32) -> serde_json::Value {
    let counters: serde_json::Map<String, serde_json::Value> = OperationKind::ALL
        .iter()
        .map(|kind| {
            let counter = record.counter(*kind);
            (
                kind.as_str().to_string(),
                serde_json::json!({ "count": counter.count, "message": counter.message }),
            )
        })
        .collect();

    serde_json::json!({
        "path": record.path.as_str(),
        "last_local_modification": record.last_local_modification.map(|t| t.to_rfc3339()),
        "last_remote_modification": record.last_remote_modification.map(|t| t.to_rfc3339()),
        "suspended": is_suspended(record, ceiling),
        "counters": counters,
    })
}

/// One line per non-zero counter: `upload x3: message`
fn counter_lines(record: &FailureRecord) -> Vec<String> {
    OperationKind::ALL
        .iter()
        .filter_map(|kind| {
            let counter = record.counter(*kind);
            (counter.count > 0).then(|| {
                format!(
                    "{kind} x{}: {}",
                    counter.count,
                    counter.message.as_deref().unwrap_or("-")
                )
            })
        })
        .collect()
}

impl FailuresCommand {
    pub async fn execute(&self, ctx: &Context) -> Result<()> {
        let formatter = get_formatter(ctx.format, ctx.quiet);
        let config = ctx.load_config();
        let db_path = config.database_path();

        let Some(cache) = open_cache(&db_path).await? else {
            formatter.error(&format!("No state cache at {}", db_path.display()));
            return Ok(());
        };

        match &self.clear {
            Some(path) => {
                let path = RelativePath::new(path.as_str())
                    .with_context(|| format!("Invalid path '{path}'"))?;
                let existed = clear_failure(&cache, &path).await?;
                info!(%path, existed, "Cleared failure record");

                if ctx.format == OutputFormat::Json {
                    formatter.print_json(&serde_json::json!({
                        "path": path.as_str(),
                        "cleared": existed,
                    }));
                } else if existed {
                    formatter.success(&format!("Cleared failures of {path}"));
                } else {
                    formatter.info(&format!("No failures recorded for {path}"));
                }
            }
            None => {
                let ceiling = config.sync.failure_ceiling;
                let failures = cache
                    .list_failures()
                    .await
                    .context("Failed to list failure records")?;

                if ctx.format == OutputFormat::Json {
                    let items: Vec<_> = failures.iter().map(|f| failure_json(f, ceiling)).collect();
                    formatter.print_json(&serde_json::json!({
                        "failure_ceiling": ceiling,
                        "failures": items,
                    }));
                    return Ok(());
                }

                if failures.is_empty() {
                    formatter.success("No failed items");
                    return Ok(());
                }

                formatter.error(&format!("{} item(s) with failures:", failures.len()));
                for record in &failures {
                    let marker = if is_suspended(record, ceiling) {
                        " [suspended]"
                    } else {
                        ""
                    };
                    formatter.info(&format!("{}{}", record.path, marker));
                    for line in counter_lines(record) {
                        formatter.info(&format!("    {line}"));
                    }
                }
            }
        }

        Ok(())
    }
}

/// Drops the failure record of `path`; returns whether one existed
async fn clear_failure(cache: &dyn IStateCache, path: &RelativePath) -> Result<bool> {
    let existed = cache
        .get_failure(path)
        .await
        .context("Failed to read failure record")?
        .is_some();
    cache
        .clear_failures(path)
        .await
        .context("Failed to clear failure record")?;
    Ok(existed)
}
