use std::sync::Arc;

use crate::app::{App, ReaderServices};
use crate::audio::{synthesizer_from_config, AudioLibrary};
use crate::config::Config;
use crate::daemon::{build_scheduler, StatsTracker};
use crate::error::Result;
use crate::tui;

use super::open_store;

/// Open the reader. A background refresh starts right away when a
/// summarizer is configured.
pub async fn read(config: &Config) -> Result<()> {
    let store = open_store(config).await?;

    let scheduler = match build_scheduler(config, store.clone(), StatsTracker::new()) {
        Ok(scheduler) => Some(Arc::new(scheduler)),
        Err(e) => {
            tracing::warn!("background refresh disabled: {}", e);
            None
        }
    };
    let synthesizer = match synthesizer_from_config(config) {
        Ok(synthesizer) => Some(synthesizer),
        Err(e) => {
            tracing::warn!("speech synthesis disabled: {}", e);
            None
        }
    };
    let services = ReaderServices {
        scheduler,
        library: config.audio_dir().map(AudioLibrary::new),
        synthesizer,
    };

    let mut app = App::new(store, services).await?;
    app.start_refresh();
    tui::run(&mut app).await
}
