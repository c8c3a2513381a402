use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter};

use crate::daemon::LogToggle;
use crate::error::AppError;

fn base_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

/// Install the stderr subscriber. `RUST_LOG` wins over `level`.
///
/// The returned toggle swaps the filter between the base one and `debug`.
pub fn init(level: Level) -> LogToggle {
    let (filter, handle) = reload::Layer::new(base_filter(level));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();

    let debug = Arc::new(AtomicBool::new(false));
    Arc::new(move || {
        let on = !debug.load(Ordering::SeqCst);
        let next = if on { EnvFilter::new("debug") } else { base_filter(level) };
        handle
            .reload(next)
            .map_err(|e| AppError::Daemon(format!("log filter reload failed: {e}")))?;
        debug.store(on, Ordering::SeqCst);
        Ok(on)
    })
}
