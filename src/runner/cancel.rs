//! Process-level cancellation sources
//!
//! SIGINT, SIGTERM and panics all funnel into the run token. Nothing else
//! in the crate listens for signals directly.

use std::sync::Once;

use tokio_util::sync::CancellationToken;

/// Cancel `token` on the first Ctrl+C or SIGTERM
pub fn spawn_signal_listener(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
            _ = token.cancelled() => return,
        }

        tracing::info!("Shutdown signal received, cancelling run");
        token.cancel();
    })
}

/// Cancel `token` when any thread panics. Installed once per process.
pub fn cancel_on_panic(token: CancellationToken) {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(move || {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            token.cancel();
            previous(info);
        }));
    });
}

/// Install every cancellation source for `token`
pub fn install_cancellation(token: &CancellationToken) -> tokio::task::JoinHandle<()> {
    cancel_on_panic(token.clone());
    spawn_signal_listener(token.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listener_exits_with_token() {
        let token = CancellationToken::new();
        let listener = spawn_signal_listener(token.clone());
        token.cancel();
        listener.await.unwrap();
        assert!(token.is_cancelled());
    }
}
