use std::time::Duration;

use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::presence::Presence;

/// Keeps `user_id` marked online while `token` is live.
///
/// Each tick renews the online marker and the activity timestamp. The first
/// tick happens one `interval` after spawning; the caller marks the user
/// online on connect.
pub fn spawn_heartbeat(
    presence: Presence,
    user_id: String,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    let cadence = interval.max(Duration::from_secs(1));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + cadence, cadence);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => {
                    debug!(user_id, "heartbeat stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(err) = presence.set_online(&user_id).await {
                        warn!(user_id, error = %err, "heartbeat failed to renew presence");
                    }
                    presence.touch_activity(&user_id).await;
                }
            }
        }
    })
}
