use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use relay_core::{RecordStore, StatusLedger, SyncStatus};
use relay_daemon::PlatformKind;
use relay_sync::ledger;

use super::StorageArgs;

const PROCESSED_SUFFIX: &str = "_processed.json";

#[derive(Args, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    storage: StorageArgs,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusReport {
    storage_dir: String,
    catch_up: Option<SyncStatus>,
    records: usize,
    available_records: usize,
    platforms: Vec<PlatformReport>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PlatformReport {
    platform: String,
    processed: usize,
    deleted: usize,
    backlog: usize,
}

#[derive(Tabled)]
struct PlatformRow {
    #[tabled(rename = "Platform")]
    platform: String,
    #[tabled(rename = "Processed")]
    processed: usize,
    #[tabled(rename = "Deleted")]
    deleted: usize,
    #[tabled(rename = "Backlog")]
    backlog: String,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let storage_dir = self.storage.resolve()?;
        let report = collect(&storage_dir)?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }

        println!("Storage: {}", report.storage_dir);
        match &report.catch_up {
            None => println!("Catch-up: {}", "never run".dimmed()),
            Some(status @ SyncStatus::InProgress { start_time, limit }) => println!(
                "Catch-up: {} since {}, running for {} (limit {})",
                status.label().yellow(),
                start_time.format("%Y-%m-%d %H:%M:%S UTC"),
                running_for(*start_time, Utc::now()),
                limit
            ),
            Some(
                status @ SyncStatus::Completed {
                    end_time,
                    new_posts,
                    updated_posts,
                    skipped_posts,
                    ..
                },
            ) => println!(
                "Catch-up: {} at {} ({} new, {} updated, {} skipped)",
                status.label().green(),
                end_time.format("%Y-%m-%d %H:%M:%S UTC"),
                new_posts,
                updated_posts,
                skipped_posts
            ),
            Some(status @ SyncStatus::Failed { end_time, error, .. }) => println!(
                "Catch-up: {} at {}: {}",
                status.label().red(),
                end_time.format("%Y-%m-%d %H:%M:%S UTC"),
                error
            ),
        }
        println!(
            "Records: {} ({} available)",
            report.records, report.available_records
        );

        if report.platforms.is_empty() {
            println!("No platform ledgers yet.");
            return Ok(());
        }

        let rows: Vec<PlatformRow> = report
            .platforms
            .iter()
            .map(|p| PlatformRow {
                platform: p.platform.clone(),
                processed: p.processed,
                deleted: p.deleted,
                backlog: if p.backlog == 0 {
                    "0".green().to_string()
                } else {
                    p.backlog.to_string().yellow().to_string()
                },
            })
            .collect();
        println!("{}", Table::new(rows).with(Style::rounded()));
        Ok(())
    }
}

fn collect(storage_dir: &Path) -> Result<StatusReport> {
    let store = RecordStore::open(storage_dir)
        .with_context(|| format!("opening storage {}", storage_dir.display()))?;
    let status = StatusLedger::at(storage_dir);
    let records = store.list()?.len();
    let available = store.load_ordered()?;

    let mut platforms = Vec::new();
    for platform in ledger_platforms(storage_dir) {
        if !ledger::path_at(storage_dir, &platform).exists() {
            continue;
        }
        let processed = ledger::load_at(storage_dir, &platform)?;
        let deleted = processed.posts.values().filter(|e| e.deleted).count();
        let backlog = available
            .iter()
            .filter(|record| !processed.contains(&record.id))
            .count();
        platforms.push(PlatformReport {
            platform,
            processed: processed.len(),
            deleted,
            backlog,
        });
    }

    Ok(StatusReport {
        storage_dir: storage_dir.display().to_string(),
        catch_up: status.read(),
        records,
        available_records: available.len(),
        platforms,
    })
}

/// Coarse age of a running pass, e.g. `4m 12s` or `2h 5m`.
fn running_for(since: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = now.signed_duration_since(since).num_seconds().max(0);
    match secs {
        s if s < 60 => format!("{s}s"),
        s if s < 3600 => format!("{}m {}s", s / 60, s % 60),
        s => format!("{}h {}m", s / 3600, (s % 3600) / 60),
    }
}

/// Built-in platforms plus any other `<platform>_processed.json` found.
fn ledger_platforms(storage_dir: &Path) -> BTreeSet<String> {
    let mut names: BTreeSet<String> = PlatformKind::ALL
        .iter()
        .map(|kind| kind.name().to_string())
        .collect();
    if let Ok(entries) = fs::read_dir(storage_dir) {
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(platform) = name.strip_suffix(PROCESSED_SUFFIX) {
                if !platform.is_empty() {
                    names.insert(platform.to_string());
                }
            }
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn running_for_scales_units() {
        let now = Utc::now();
        assert_eq!(running_for(now - Duration::seconds(42), now), "42s");
        assert_eq!(running_for(now - Duration::seconds(252), now), "4m 12s");
        assert_eq!(running_for(now - Duration::minutes(125), now), "2h 5m");
    }

    #[test]
    fn future_start_reads_as_zero() {
        let now = Utc::now();
        assert_eq!(running_for(now + Duration::minutes(3), now), "0s");
    }
}
