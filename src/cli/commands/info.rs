//! Catalog entry info command handler

use std::sync::Arc;

use crate::config::Config;
use crate::domain::events::NullSink;
use crate::reconcile::unifier::GameUnifier;
use crate::reconcile::validator::ReferenceValidator;
use crate::store::Store;

pub async fn cmd_info(config: &Config, id: &str) -> anyhow::Result<()> {
    let store = Store::open(
        &config.general.data_dir,
        ReferenceValidator,
        Arc::new(NullSink),
    )?;

    let Some(app) = store.app(id) else {
        println!("Catalog entry {id} not found.");
        println!("Run 'demoarr sync' if it was referenced recently.");
        return Ok(());
    };

    println!("Catalog Entry");
    println!("{:-<70}", "");
    println!("Name:     {}", app.name);
    println!("ID:       {}", app.id);
    println!(
        "Status:   {}",
        if app.is_coming_soon() {
            "Coming soon"
        } else {
            "Released"
        }
    );
    if let Some(date) = &app.release_date {
        let display = date.raw.clone().unwrap_or_else(|| {
            date.earliest()
                .map(|d| d.to_string())
                .unwrap_or_else(|| "?".to_string())
        });
        println!("Release:  {display}");
    }
    if let Some(percent) = app.reviews.percent_positive {
        let count = app.reviews.count.unwrap_or(0);
        let inferred = if app.reviews.inferred { " (inferred)" } else { "" };
        println!("Reviews:  {percent}% positive ({count} reviews){inferred}");
    }
    if !app.genres.is_empty() {
        println!("Genres:   {}", app.genres.join(", "));
    }
    if !app.developers.is_empty() {
        println!("Devs:     {}", app.developers.join(", "));
    }

    if app.has_demo {
        println!("Demo:     {}", app.demo_id.as_deref().unwrap_or("?"));
    }
    if app.is_demo {
        println!("Full:     {}", app.full_game_id.as_deref().unwrap_or("?"));
    }
    if app.is_stub {
        println!(
            "Stub:     yes ({})",
            app.stub_reason.as_deref().unwrap_or("no reason recorded")
        );
        if let Some(target) = &app.resolved_to {
            println!("Resolves: {target}");
        }
    }
    for (platform, url) in &app.free_links {
        println!("Link:     {platform}: {url}");
    }

    let unifier = GameUnifier::new(config.matching.min_review_sample, Arc::new(NullSink));
    let unified = unifier.unify(store.apps(), store.free_games(), &store.all_videos());
    let videos = unified
        .values()
        .find(|entry| entry.matches_catalog_id(id))
        .map(|entry| entry.videos.clone())
        .unwrap_or_default();

    println!();
    if videos.is_empty() {
        println!("No videos reference this entry.");
    } else {
        println!("Referenced by {} video(s):", videos.len());
        for video_id in videos.iter().take(10) {
            println!("  • {video_id}");
        }
        if videos.len() > 10 {
            println!("  ... and {} more", videos.len() - 10);
        }
    }

    Ok(())
}
