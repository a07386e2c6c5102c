use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use {
    serde_json::json,
    tokio::time::{Instant, MissedTickBehavior},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info},
};

use tether_protocol::ServerFrame;

use crate::state::GatewayState;

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Push one `companion_update` to every open session. The facade is not
/// consulted when nobody is listening.
pub async fn broadcast_status(state: &GatewayState) -> usize {
    if state.sessions.count() == 0 {
        return 0;
    }
    let companions = state.simulation.list().await;
    let frame = ServerFrame::CompanionUpdate {
        data: json!({ "companions": companions }),
        timestamp: now_ms(),
    };
    state.sessions.broadcast(&frame)
}

/// Periodic status loop. The first broadcast happens one `period` after
/// start; the loop exits when `shutdown` is cancelled.
pub async fn run_status_broadcaster(
    state: Arc<GatewayState>,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(period_secs = period.as_secs(), "status broadcaster started");

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let delivered = broadcast_status(&state).await;
                if delivered > 0 {
                    debug!(delivered, "broadcast companion status");
                }
            },
        }
    }
    info!("status broadcaster stopped");
}
