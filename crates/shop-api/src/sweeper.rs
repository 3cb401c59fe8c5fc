//! # Background Sweeper
//!
//! Periodic housekeeping: drops idle carts and cancels bank-transfer
//! invoices whose payment never arrived, putting their stock back.

use crate::state::AppState;
use shop_core::SweepReport;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

/// One pass over carts and abandoned invoices
pub async fn sweep_once(state: &AppState) -> SweepReport {
    let purged = state.cart_store.purge_expired();
    if purged > 0 {
        debug!(purged, "Expired carts dropped");
    }

    match state
        .orchestrator
        .sweep_abandoned(state.config.abandoned_after)
        .await
    {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "Abandoned invoice sweep failed");
            SweepReport::default()
        }
    }
}

/// Run `sweep_once` every `sweep_interval` until the runtime shuts down
pub fn spawn_sweeper(state: AppState) -> JoinHandle<()> {
    let period = state.config.sweep_interval;
    info!(every_secs = period.as_secs(), "Starting background sweeper");

    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            sweep_once(&state).await;
        }
    })
}
