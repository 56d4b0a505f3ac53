//! Create a snapshot of a directory under a new tag

use crate::util;
use anyhow::{Context, Result};
use bv_engine::config::Config;
use bv_engine::snapshot::create_snapshot;
use owo_colors::OwoColorize;
use std::path::Path;

pub async fn run(dir: &Path, tag: &str, workers: Option<usize>) -> Result<()> {
    let repo = util::find_repo()?;

    let mut config =
        Config::load(repo.bv_dir()).context("Failed to load repository configuration")?;
    if let Some(workers) = workers {
        config.snapshot.workers = workers.max(1);
    }

    let source = dir
        .canonicalize()
        .with_context(|| format!("Cannot read snapshot source {}", dir.display()))?;

    println!(
        "Snapshotting {} as {}...",
        source.display().to_string().dimmed(),
        tag.yellow()
    );

    let (record, summary) = create_snapshot(&repo, &config, &source, tag)
        .with_context(|| format!("Snapshot {tag} failed"))?;

    println!();
    println!(
        "{} {} committed ({})",
        "✓".green(),
        tag.yellow().bold(),
        record.id.to_string()[..8].to_string().dimmed()
    );
    println!(
        "  {} files scanned, {} new objects, {} written",
        summary.files_scanned,
        summary.objects_stored,
        util::format_size(summary.bytes_stored)
    );

    if !summary.skipped.is_empty() {
        println!();
        println!(
            "{} {} entries skipped:",
            "⚠".yellow(),
            summary.skipped.len()
        );
        for skip in summary.skipped.iter().take(10) {
            println!("  {}: {}", skip.path.display(), skip.reason.red());
        }
        if summary.skipped.len() > 10 {
            println!("  ... and {} more", summary.skipped.len() - 10);
        }
    }

    Ok(())
}
