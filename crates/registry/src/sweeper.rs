//! Background expiry sweeper.
//!
//! Lazy expiry on the read and write paths is authoritative; this task
//! just bounds how long an overdue record can sit in `PENDING` before
//! anything touches it.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::service::TransferService;

/// Interval between sweep runs (seconds).
const SWEEP_INTERVAL_SECS: u64 = 60;

/// Spawn the background task that expires overdue pending transfers.
pub fn spawn_expiry_sweeper(service: Arc<TransferService>) -> tokio::task::JoinHandle<()> {
    info!(
        "Starting expiry sweeper (interval: {}s)",
        SWEEP_INTERVAL_SECS
    );

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
        // The first tick fires immediately and sweeps anything that
        // went overdue while the server was down.
        loop {
            interval.tick().await;

            match service.expire_due() {
                Ok(0) => debug!("Expiry sweep found nothing overdue"),
                Ok(n) => info!("Expiry sweep moved {} transfer(s) to EXPIRED", n),
                Err(e) => warn!("Expiry sweep failed: {}", e),
            }
        }
    })
}
