//! Shutdown signals

use std::future::Future;

use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Cancel `shutdown` on SIGINT or SIGTERM.
///
/// A signal that cannot be listened for is logged and never fires; it does
/// not count as a shutdown request.
pub async fn wait_for_signal(shutdown: CancellationToken) {
    let terminate = match signal(SignalKind::terminate()) {
        Ok(mut term) => Some(async move {
            term.recv().await;
        }),
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            None
        }
    };

    cancel_on_signal(shutdown, tokio::signal::ctrl_c(), terminate).await;
}

pub(crate) async fn cancel_on_signal<I, T>(
    shutdown: CancellationToken,
    interrupt: I,
    terminate: Option<T>,
) where
    I: Future<Output = std::io::Result<()>>,
    T: Future<Output = ()>,
{
    let interrupt = async {
        if let Err(e) = interrupt.await {
            error!("Cannot listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let terminate = async {
        match terminate {
            Some(term) => term.await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = interrupt => info!("Received SIGINT, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
    shutdown.cancel();
}
