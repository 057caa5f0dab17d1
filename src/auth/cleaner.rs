/// Expiration Cleaner
///
/// Background task that periodically purges refresh records and blacklist
/// entries past their expiry. Failures are logged and the next tick tries
/// again.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::auth::session::SessionManager;

/// Start the background task that drops expired refresh records and
/// blacklist entries
pub fn start_expiration_cleaner(sessions: SessionManager, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval_timer = tokio::time::interval(interval);

        loop {
            interval_timer.tick().await;
            run_cleanup(&sessions).await;
        }
    })
}

async fn run_cleanup(sessions: &SessionManager) {
    debug!("Running expiration cleanup");

    match sessions.purge_expired().await {
        Ok((records, entries)) if records > 0 || entries > 0 => debug!(
            refresh_records_cleaned = records,
            blacklist_entries_cleaned = entries,
            "Expired session state cleaned"
        ),
        Err(e) => error!(error = %e, "Failed to clean up expired session state"),
        _ => {}
    }
}
