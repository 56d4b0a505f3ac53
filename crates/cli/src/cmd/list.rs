//! List all tags in the repository

use crate::util;
use anyhow::Result;
use bv_engine::index::PatchIndex;
use owo_colors::OwoColorize;

pub async fn run() -> Result<()> {
    let repo = util::find_repo()?;
    let index = PatchIndex::new(&repo);

    let tags = index.list()?;
    if tags.is_empty() {
        println!("{}", "No tags yet".dimmed());
        println!();
        println!("{}", "Tip: create one with bv add <dir> --tag <tag>".dimmed());
        return Ok(());
    }

    for tag in &tags {
        match index.resolve(tag) {
            Ok(record) => {
                println!(
                    "{} {} - {} files, {}",
                    tag.yellow().bold(),
                    util::format_relative_time(record.created_ms).dimmed(),
                    record.stats.files,
                    util::format_size(record.stats.total_bytes)
                );
            }
            Err(e) => {
                println!("{} {}", tag.yellow().bold(), format!("({e})").red());
            }
        }
    }

    Ok(())
}
