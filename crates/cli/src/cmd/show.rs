//! Inspect a snapshot's manifest without extracting content

use crate::util;
use anyhow::{Context, Result};
use bv_core::EntryKind;
use bv_engine::index::PatchIndex;
use owo_colors::OwoColorize;

pub async fn run(tag: &str) -> Result<()> {
    let repo = util::find_repo()?;
    let index = PatchIndex::new(&repo);

    let record = index.resolve(tag)?;
    let manifest = index
        .load_manifest(&record)
        .with_context(|| format!("Failed to load manifest for {tag}"))?;

    println!("{}", tag.yellow().bold());
    println!(
        "  created {}  patch {}  manifest {}",
        util::format_relative_time(record.created_ms).dimmed(),
        record.id.to_string()[..8].to_string().dimmed(),
        record.manifest.short().dimmed()
    );
    println!();

    for entry in manifest.entries() {
        let marker = match entry.kind {
            EntryKind::File => " ",
            EntryKind::Symlink => "@",
        };
        println!(
            "  {} {:>10}  {}  {}",
            marker,
            util::format_size(entry.size),
            entry.id.short().dimmed(),
            entry.path
        );
    }

    println!();
    println!(
        "{} entries, {} total",
        manifest.len(),
        util::format_size(manifest.total_size())
    );

    Ok(())
}
