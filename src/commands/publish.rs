use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;

use crate::audio::{synthesizer_from_config, AudioLibrary};
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::publish::Publisher;

use super::open_store;

/// Publish one day's episodes now, regardless of the schedule.
pub async fn publish(config: &Config, date: NaiveDate) -> Result<()> {
    let store = open_store(config).await?;
    let publisher = Publisher::from_config(config, store)?;

    let cancel = CancellationToken::new();
    let counters = tokio::select! {
        counters = publisher.publish_date(date, &cancel) => counters?,
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            return Err(AppError::Cancelled);
        }
    };

    println!(
        "Published {date}: {} episodes, {} files uploaded ({} bytes), {} audio files generated",
        counters.episodes, counters.audio_uploaded, counters.bytes_uploaded, counters.audio_generated
    );
    Ok(())
}

/// Write audio files for digests that have none: legacy inline data is
/// moved out first, anything else is synthesized.
pub async fn export_audio(config: &Config) -> Result<()> {
    let dir = config
        .audio_dir()
        .ok_or_else(|| AppError::Config("audio_dir is not set".into()))?;
    let library = AudioLibrary::new(dir);
    let synthesizer = synthesizer_from_config(config)?;
    let store = open_store(config).await?;

    let digests = store.digests.get_missing_audio().await?;
    println!("{} digests without audio", digests.len());

    let (mut written, mut skipped, mut failed) = (0, 0, 0);
    for digest in digests {
        let Some(feed) = store.feeds.get(digest.feed_id).await? else {
            tracing::warn!(digest = %digest.id, "digest belongs to a missing feed");
            skipped += 1;
            continue;
        };
        match library
            .ensure(&store, Some(synthesizer.as_ref()), &feed, &digest)
            .await
        {
            Ok(Some(path)) => {
                println!("Wrote {}", path.display());
                written += 1;
            }
            Ok(None) => skipped += 1,
            Err(e) => {
                eprintln!("Failed {}: {e}", digest.url);
                failed += 1;
            }
        }
    }

    println!("{written} written, {skipped} skipped, {failed} failed");
    if failed > 0 {
        return Err(AppError::Audio(format!("{failed} digests could not be exported")));
    }
    Ok(())
}
