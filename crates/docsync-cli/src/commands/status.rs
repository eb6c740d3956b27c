//! Status command - Display the state cache summary
//!
//! Provides the `docsync status` CLI command which shows:
//! 1. The configured root and repository folder
//! 2. The root the cache was last anchored to
//! 3. The stored change cursor (or that the next pass will crawl)
//! 4. Record, pending-download and failure counts

use anyhow::{Context as _, Result};
use clap::Args;
use tracing::info;

use docsync_core::ports::{IStateCache, RecordCounts};

use crate::commands::open_cache;
use crate::output::{get_formatter, OutputFormat};
use crate::Context;

#[derive(Debug, Args)]
pub struct StatusCommand {}

/// What the cache knows about the last passes
#[derive(Debug, Clone, PartialEq)]
struct CacheStatus {
    anchored_root: Option<String>,
    cursor: Option<String>,
    counts: RecordCounts,
}

impl CacheStatus {
    async fn collect(cache: &dyn IStateCache) -> Result<Self> {
        let anchored_root = cache
            .get_path_prefix()
            .await
            .context("Failed to read the path prefix")?
            .map(|p| p.to_string());
        let cursor = cache
            .get_change_cursor()
            .await
            .context("Failed to read the change cursor")?
            .map(|c| c.to_string());
        let counts = cache
            .count_records()
            .await
            .context("Failed to count records")?;

        Ok(Self {
            anchored_root,
            cursor,
            counts,
        })
    }

    fn next_pass(&self) -> &'static str {
        match self.cursor.as_deref() {
            Some(c) if !c.is_empty() => "incremental",
            _ => "full crawl",
        }
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "anchored_root": self.anchored_root,
            "cursor": self.cursor,
            "next_pass": self.next_pass(),
            "files": self.counts.files,
            "folders": self.counts.folders,
            "pending_downloads": self.counts.downloads,
            "failures": self.counts.failures,
        })
    }
}

impl StatusCommand {
    pub async fn execute(&self, ctx: &Context) -> Result<()> {
        let formatter = get_formatter(ctx.format, ctx.quiet);
        let config = ctx.load_config();
        let db_path = config.database_path();

        info!(db_path = %db_path.display(), "Showing cache status");

        let Some(cache) = open_cache(&db_path).await? else {
            formatter.error(&format!(
                "No state cache at {}. Nothing has been synchronized yet.",
                db_path.display()
            ));
            return Ok(());
        };
        let status = CacheStatus::collect(&cache).await?;

        if ctx.format == OutputFormat::Json {
            let mut json = status.to_json();
            json["root"] = serde_json::json!(config.sync_root().display().to_string());
            json["remote_folder"] = serde_json::json!(config.sync.remote_folder);
            formatter.print_json(&json);
            return Ok(());
        }

        formatter.success("docsync status");
        formatter.field("Root", &config.sync_root().display().to_string());
        formatter.field("Repository", &config.sync.remote_folder);
        if let Some(anchored) = &status.anchored_root {
            if anchored != &config.sync_root().display().to_string() {
                formatter.info(&format!(
                    "Cache anchored at {anchored}; the next pass relocates it"
                ));
            }
        }
        formatter.field("Cursor", status.cursor.as_deref().unwrap_or("none"));
        formatter.field("Next pass", status.next_pass());
        formatter.field("Files", &status.counts.files.to_string());
        formatter.field("Folders", &status.counts.folders.to_string());
        formatter.field("Downloads", &status.counts.downloads.to_string());
        formatter.field("Failures", &status.counts.failures.to_string());

        if status.counts.failures > 0 {
            formatter.info("");
            formatter.info("Run 'docsync failures' for details.");
        }

        Ok(())
    }
}
