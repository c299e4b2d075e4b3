//! List reconciled games command handler

use std::sync::Arc;

use crate::config::Config;
use crate::domain::events::NullSink;
use crate::reconcile::unifier::GameUnifier;
use crate::reconcile::validator::ReferenceValidator;
use crate::store::Store;

pub async fn cmd_list(config: &Config) -> anyhow::Result<()> {
    let store = Store::open(
        &config.general.data_dir,
        ReferenceValidator,
        Arc::new(NullSink),
    )?;

    let unifier = GameUnifier::new(config.matching.min_review_sample, Arc::new(NullSink));
    let unified = unifier.unify(store.apps(), store.free_games(), &store.all_videos());

    if unified.is_empty() {
        println!("No games reconciled yet.");
        println!();
        println!("Run 'demoarr sync' to fetch the catalog.");
        return Ok(());
    }

    println!("Reconciled Games ({} total)", unified.len());
    println!("{:-<70}", "");

    for entry in unified.values() {
        if entry.absorbed_into.is_some() {
            continue;
        }

        let indicator = match &entry.app {
            Some(app) if app.is_stub => "✗",
            Some(app) if app.is_coming_soon() => "📅",
            Some(_) => "🟢",
            None => "•",
        };
        let videos = entry.videos.len();

        println!("{} {} [{} videos]", indicator, entry.name, videos);
        if let Some(app) = &entry.app {
            let pair = match (&entry.demo_id, &entry.full_id) {
                (Some(demo), Some(full)) if demo != full => {
                    format!(" | Demo: {demo} / Full: {full}")
                }
                _ => String::new(),
            };
            let summary = app.reviews.summary.as_deref().unwrap_or("No reviews");
            println!("  ID: {} | {}{}", entry.key, summary, pair);
        } else {
            println!("  URL: {}", entry.key);
        }
    }

    println!();
    println!("Legend: 🟢 Released | 📅 Coming soon | ✗ Stub | • Free listing");

    Ok(())
}
