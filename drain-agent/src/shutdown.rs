use tokio::signal;
use tracing::{info, warn};

/// Completes when SIGTERM or SIGINT is received.
///
/// If a handler cannot be installed the failure is logged and that signal is ignored, the
/// process then only stops on the other one.
pub async fn graceful_shutdown() {
    let interrupt = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("received SIGINT"),
            Err(err) => {
                warn!(error = %err, "failed to register SIGINT handler");
                std::future::pending::<()>().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
                info!("received SIGTERM");
            }
            Err(err) => {
                warn!(error = %err, "failed to register SIGTERM handler");
                std::future::pending::<()>().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {},
        _ = terminate => {},
    }
}
