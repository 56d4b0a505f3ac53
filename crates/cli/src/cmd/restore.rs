//! Materialize a tagged snapshot into a destination directory

use crate::util;
use anyhow::{Context, Result};
use bv_engine::checkout::{checkout, CheckoutError};
use owo_colors::OwoColorize;
use std::io::Write;
use std::path::Path;

pub async fn run(tag: &str, dest: &Path, yes: bool) -> Result<()> {
    let repo = util::find_repo()?;

    if !yes && dir_is_nonempty(dest) {
        println!(
            "{}",
            format!(
                "⚠️  Destination {} is not empty; existing files may be overwritten",
                dest.display()
            )
            .yellow()
        );
        print!("Continue? [y/N] ");
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("{}", "Restore cancelled".yellow());
            return Ok(());
        }
    }

    println!(
        "Restoring {} into {}...",
        tag.yellow(),
        dest.display().to_string().dimmed()
    );

    match checkout(&repo, tag, dest) {
        Ok(summary) => {
            println!(
                "{} Restored {} files ({})",
                "✓".green(),
                summary.files_written.to_string().green(),
                util::format_size(summary.bytes_written)
            );
            Ok(())
        }
        Err(CheckoutError::ObjectMissing { tag, missing }) => {
            println!(
                "{} Store integrity failure: {} object(s) referenced by {} are missing",
                "✗".red(),
                missing.len(),
                tag.yellow()
            );
            for (path, id) in &missing {
                println!("  {}  {}", id.short().red(), path);
            }
            println!();
            println!("{}", "Nothing was restored.".dimmed());
            anyhow::bail!("checkout aborted: store and index have drifted")
        }
        Err(e) => Err(e).with_context(|| format!("Restore of {tag} failed")),
    }
}

fn dir_is_nonempty(path: &Path) -> bool {
    match std::fs::read_dir(path) {
        Ok(mut entries) => entries.next().is_some(),
        Err(_) => false,
    }
}
