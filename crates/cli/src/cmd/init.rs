//! Initialize a BinVault repository

use crate::locks::InitLock;
use anyhow::Result;
use bv_core::Repo;
use owo_colors::OwoColorize;
use std::env;

pub async fn run() -> Result<()> {
    let current_dir = env::current_dir()?;

    let _lock = InitLock::acquire(&current_dir)?;

    if current_dir.join(bv_core::store::REPO_DIR).exists() {
        println!("{}", "Error: repository already initialized".red());
        println!("Location: {}/.bv/", current_dir.display());
        std::process::exit(1);
    }

    let repo = Repo::init(&current_dir)?;

    println!("{}", "Initialized BinVault repository".bold());
    println!("  {}", repo.bv_dir().display().to_string().dimmed());
    println!();
    println!("Next steps:");
    println!("  {} snapshot a directory", "bv add <dir> --tag <tag>".cyan());
    println!("  {} list tags", "bv list".cyan());

    Ok(())
}
