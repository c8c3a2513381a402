//! One function per CLI subcommand. `main` parses arguments and hands the
//! loaded config to these.

mod bookmark;
mod config;
mod daemon;
mod feeds;
mod play;
mod publish;
mod read;

use crate::config::Config;
use crate::db::Store;
use crate::error::Result;

pub use bookmark::bookmark;
pub use config::{show_config, ConfigFormat};
pub use daemon::{restart, start, status, stop, StartOptions};
pub use feeds::{add, export_opml, fetch, import};
pub use play::play;
pub use publish::{export_audio, publish};
pub use read::read;

pub(crate) async fn open_store(config: &Config) -> Result<Store> {
    let path = config.db_path();
    tracing::debug!(path = %path.display(), "opening database");
    Store::open(&path).await
}
