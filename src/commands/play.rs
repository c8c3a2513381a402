use chrono::{Local, NaiveDate};

use crate::audio::{
    speech_text, synthesizer_from_config, within_budget, AudioLibrary, SpeechSynthesizer,
};
use crate::config::Config;
use crate::db::Store;
use crate::error::{AppError, Result};
use crate::models::{Digest, Feed};

use super::open_store;

const WRAP_WIDTH: usize = 80;

/// Read out every unlistened digest, oldest first, marking each one
/// listened after it has played. Ctrl-C stops without marking the current
/// digest.
pub async fn play(config: &Config, date: Option<NaiveDate>) -> Result<()> {
    let store = open_store(config).await?;
    let digests = store.digests.get_unlistened(date, &Local).await?;
    if digests.is_empty() {
        println!("No unlistened digests.");
        return Ok(());
    }

    let synthesizer = synthesizer_from_config(config)?;
    let library = config.audio_dir().map(AudioLibrary::new);
    let total = digests.len();

    for (index, digest) in digests.into_iter().enumerate() {
        let Some(feed) = store.feeds.get(digest.feed_id).await? else {
            tracing::warn!(digest = %digest.id, "digest belongs to a missing feed");
            continue;
        };

        println!();
        println!("[{}/{}] {}: {}", index + 1, total, feed.title, digest.title_str());
        println!("{}", textwrap::fill(digest.body_str(), WRAP_WIDTH));
        println!("{}", digest.url);

        let audio = load_audio(&store, library.as_ref(), synthesizer.as_ref(), &feed, &digest).await?;
        match audio {
            Some(mp3) => {
                tokio::select! {
                    played = synthesizer.play(&mp3) => played?,
                    _ = tokio::signal::ctrl_c() => {
                        println!("\nStopped.");
                        return Ok(());
                    }
                }
            }
            None => println!("(no audio)"),
        }

        store.digests.update_listened(digest.id).await?;
    }
    Ok(())
}

/// The digest's MP3: from the audio library when one is configured,
/// otherwise inline data or synthesized in memory.
async fn load_audio(
    store: &Store,
    library: Option<&AudioLibrary>,
    synthesizer: &dyn SpeechSynthesizer,
    feed: &Feed,
    digest: &Digest,
) -> Result<Option<Vec<u8>>> {
    if let Some(library) = library {
        return match library.ensure(store, Some(synthesizer), feed, digest).await? {
            Some(path) => Ok(Some(tokio::fs::read(path).await?)),
            None => Ok(None),
        };
    }

    if let Some(data) = digest.audio_data.as_ref().filter(|d| !d.is_empty()) {
        return Ok(Some(data.clone()));
    }
    let (title, body) = (digest.title_str(), digest.body_str());
    if !within_budget(title, body) {
        return Ok(None);
    }
    match synthesizer.synthesize(&speech_text(title, body)).await {
        Ok(mp3) => Ok(Some(mp3)),
        Err(AppError::CredentialsMissing(provider)) => {
            tracing::debug!(%provider, "no speech credentials");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
