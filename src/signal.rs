//! Turning process shutdown signals into run cancellation.

use std::future::Future;
use std::io;
use std::thread::JoinHandle;
use tracing::{info, warn};

use crate::scheduler::CancelToken;

/// Cancel `token` once `signal` resolves.
///
/// The future is driven by a single-threaded runtime on a dedicated thread,
/// so the caller stays free to block on a run.
pub fn cancel_on<F>(token: CancelToken, signal: F) -> io::Result<JoinHandle<()>>
where
    F: Future<Output = ()> + Send + 'static,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    std::thread::Builder::new()
        .name("invariant-scan-signal".to_string())
        .spawn(move || {
            runtime.block_on(signal);
            info!("shutdown signal received, cancelling scan");
            token.cancel();
        })
}

/// Cancel `token` on SIGINT or SIGTERM (Ctrl-C elsewhere).
pub fn cancel_on_shutdown_signal(token: CancelToken) -> io::Result<JoinHandle<()>> {
    cancel_on(token, wait_for_shutdown_signal())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(err), _) | (_, Err(err)) => {
                    warn!(%err, "cannot listen for shutdown signals");
                    return std::future::pending().await;
                }
            };
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(%err, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    }
}
