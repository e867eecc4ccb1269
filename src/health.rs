//! Database health monitor (spec §5): a five-minute-cadence background
//! check that logs pool health, grounded on the original's
//! `database_health_monitor`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use crate::catalog::Catalog;

const CHECK_INTERVAL_SECS: u64 = 300;
const ERROR_BACKOFF_SECS: u64 = 60;

pub async fn run(catalog: Arc<Catalog>, mut shutdown: watch::Receiver<bool>) {
    loop {
        let interval = match run_check(&catalog).await {
            Ok(()) => Duration::from_secs(CHECK_INTERVAL_SECS),
            Err(()) => Duration::from_secs(ERROR_BACKOFF_SECS),
        };

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!("database health monitor shut down");
}

async fn run_check(catalog: &Catalog) -> Result<(), ()> {
    let healthy = catalog.check_health().await;
    let stats = catalog.pool_stats().await;

    if healthy {
        info!(?stats, "database health check: OK");
        Ok(())
    } else {
        error!(?stats, "database health check: FAILED");
        Err(())
    }
}
