//! Signal handling for the keylease CLI

use keylease_core::Canceller;
use tracing::{info, warn};

/// Cancel `canceller` on Ctrl+C or SIGTERM
pub fn cancel_on_signal(canceller: Canceller) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to install Ctrl+C handler");
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
                    warn!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, cancelling"),
            _ = terminate => info!("Received SIGTERM, cancelling"),
        }

        canceller.cancel();
    });
}
