use super::server::AutosslServer;
use autossl_database::DbConnection;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const SHUTDOWN_MESSAGE: &str = "Server shutdown";

/// Resolves on Ctrl+C
pub async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown..."),
        Err(e) => {
            // without a signal handler the server runs until killed
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

/// Stops background work and settles records the process can no longer finish
pub struct ShutdownCleanup {
    timeout: Duration,
    server: AutosslServer,
    db: Arc<DbConnection>,
}

impl ShutdownCleanup {
    pub fn new(timeout: Duration, server: AutosslServer, db: Arc<DbConnection>) -> Self {
        Self {
            timeout,
            server,
            db,
        }
    }

    pub async fn run(self) {
        info!("Starting resource cleanup...");
        let timeout = self.timeout;

        let cleanup = async move {
            self.server.scheduler.stop().await;
            debug!("Renewal scheduler stopped");

            match self.server.jobs.fail_unfinished(SHUTDOWN_MESSAGE).await {
                Ok(0) => debug!("No unfinished jobs"),
                Ok(count) => info!("Failed {} unfinished job(s) during shutdown", count),
                Err(e) => warn!("Failed to settle unfinished jobs: {}", e),
            }

            match self.server.deployments.fail_running(SHUTDOWN_MESSAGE).await {
                Ok(0) => debug!("No running deployments"),
                Ok(count) => info!("Failed {} running deployment(s) during shutdown", count),
                Err(e) => warn!("Failed to settle running deployments: {}", e),
            }

            // the router still holds service handles, so release them first
            drop(self.server);
            match Arc::try_unwrap(self.db) {
                Ok(db) => {
                    if let Err(e) = db.close().await {
                        warn!("Error closing database connection: {}", e);
                    } else {
                        debug!("Database connection closed");
                    }
                }
                Err(_) => debug!("Database still has other references, skipping close"),
            }
        };

        match tokio::time::timeout(timeout, cleanup).await {
            Ok(()) => info!("Resource cleanup completed"),
            Err(_) => warn!("Cleanup timeout exceeded ({:?}), forcing shutdown", timeout),
        }
    }
}
