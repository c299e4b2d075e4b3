//! Single-cycle command handler

use std::sync::Arc;

use crate::config::Config;
use crate::daemon::AppState;
use crate::domain::events::TracingSink;

pub async fn cmd_sync(config: &Config) -> anyhow::Result<()> {
    let state = AppState::new(config.clone(), Arc::new(TracingSink))?;

    println!("Running reconcile cycle...");
    let stats = state.run_cycle().await?;

    println!();
    println!("{:-<70}", "");
    println!("Cycle complete!");
    println!("  Candidates: {}", stats.candidates);
    println!("  Fetched:    {}", stats.fetched);
    println!("  Skipped:    {}", stats.skipped);
    println!("  Repaired:   {}", stats.repaired);
    println!("  Stubbed:    {}", stats.stubbed);
    println!("  Dropped:    {}", stats.dropped);
    if stats.links_approved > 0 || stats.links_retracted > 0 {
        println!(
            "  Links:      +{} / -{}",
            stats.links_approved, stats.links_retracted
        );
    }
    if stats.warnings > 0 {
        println!("  Warnings:   {} (see log)", stats.warnings);
    }

    Ok(())
}
