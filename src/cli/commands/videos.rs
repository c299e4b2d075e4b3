//! Video listing command handler

use std::sync::Arc;

use crate::config::Config;
use crate::domain::events::NullSink;
use crate::reconcile::validator::ReferenceValidator;
use crate::store::Store;

pub async fn cmd_videos(config: &Config, source: Option<&str>) -> anyhow::Result<()> {
    let store = Store::open(
        &config.general.data_dir,
        ReferenceValidator,
        Arc::new(NullSink),
    )?;

    let videos: Vec<_> = match source {
        Some(source) => match store.videos_for_source(source) {
            Some(videos) => videos.values().collect(),
            None => {
                println!("No videos recorded for source '{source}'.");
                return Ok(());
            }
        },
        None => store.all_videos(),
    };

    if videos.is_empty() {
        println!("No videos recorded.");
        return Ok(());
    }

    let mut ordered = videos;
    ordered.sort_by(|a, b| b.published.cmp(&a.published));

    println!("Videos ({} total)", ordered.len());
    println!("{:-<70}", "");

    for video in ordered {
        let refs = video.effective_refs();
        println!("• {} ({})", video.title, video.published.date_naive());
        println!("  ID: {} | {} game reference(s)", video.id, refs.len());
        for game_ref in refs.iter().take(5) {
            let flags = match (game_ref.inferred, game_ref.via_detection) {
                (true, true) => " [inferred, detected]",
                (true, false) => " [inferred]",
                (false, true) => " [detected]",
                (false, false) => "",
            };
            println!("    {}: {}{}", game_ref.platform, game_ref.id, flags);
        }
        if refs.len() > 5 {
            println!("    ... and {} more", refs.len() - 5);
        }
    }

    Ok(())
}
