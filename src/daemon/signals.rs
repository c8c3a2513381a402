use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use crate::error::Result;

use super::scheduler::SchedulerHandle;

/// Route process signals to the scheduler until `done` fires or a
/// termination signal has been handled.
///
/// TERM and INT shut down gracefully, HUP reloads, USR1 dumps statistics
/// and USR2 toggles debug logging.
pub async fn dispatch(handle: SchedulerHandle, done: CancellationToken) -> Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut hangup = signal(SignalKind::hangup())?;
    let mut user1 = signal(SignalKind::user_defined1())?;
    let mut user2 = signal(SignalKind::user_defined2())?;

    loop {
        let sent = tokio::select! {
            _ = done.cancelled() => return Ok(()),
            _ = terminate.recv() => {
                tracing::info!("received SIGTERM, shutting down");
                return handle.shutdown().await;
            }
            _ = interrupt.recv() => {
                tracing::info!("received SIGINT, shutting down");
                return handle.shutdown().await;
            }
            _ = hangup.recv() => handle.reload().await,
            _ = user1.recv() => handle.dump_stats().await,
            _ = user2.recv() => handle.toggle_debug().await,
        };
        if let Err(e) = sent {
            tracing::warn!("signal not delivered: {}", e);
        }
    }
}
