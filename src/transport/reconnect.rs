//! Per-peer reconnection: bounded-backoff redial plus `txQueue` draining on
//! success (spec §4.2's `ReconnectionManager`).

use std::time::Duration;

use tokio::sync::Notify;
use tracing::{info, warn};

/// Backoff bounds for reconnection attempts (SPEC_FULL §9's
/// `config::EndpointConfig`).
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial: Duration,
    /// Upper bound the delay is capped at after repeated doubling.
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(200),
            max: Duration::from_secs(30),
        }
    }
}

impl BackoffConfig {
    /// The delay to wait before attempt number `attempt` (0-indexed),
    /// doubling each time up to [`Self::max`].
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.initial.checked_mul(factor).filter(|delay| *delay <= self.max).unwrap_or(self.max)
    }
}

/// Signals that the active connection to a peer was lost, replaced fresh on
/// every reconnect so a single "connection lost" wait can be cancelled by a
/// later loss without racing a later success (spec §4.2: "Holds a
/// cancellable 'connection-lost' token replaced on each reconnect").
///
/// Backed by `notify_one` rather than `notify_waiters`: a loss signalled
/// between the supervisor re-checking the connection and it reaching
/// [`Self::notified`] must still wake the next wait rather than vanish, so
/// the permit has to be stored, not just delivered to whoever happens to be
/// parked already.
#[derive(Default)]
pub struct ConnectionLost {
    notify: Notify,
}

impl ConnectionLost {
    /// Signal loss to the next (or already-waiting) call to
    /// [`Self::notified`].
    pub fn signal(&self) { self.notify.notify_one(); }

    /// Wait for the next loss signal, consuming an already-stored permit
    /// immediately if [`Self::signal`] fired before this call.
    pub async fn notified(&self) { self.notify.notified().await; }
}

/// Drive repeated dial attempts with bounded exponential backoff until
/// `dial` succeeds, logging each failure at the teacher's granularity (spec
/// SPEC_FULL §9: `warn!` on transient failures). This loop never gives up on
/// its own (spec §4.2: "serially attempts reconnection with bounded
/// backoff") — the caller disposes of it by aborting the task it runs in
/// (spec §5: "Disposal cancels all child tasks"), not by a cancellation
/// signal threaded through here.
pub async fn reconnect_with_backoff<T, E, Fut>(peer_label: &str, backoff: BackoffConfig, mut dial: impl FnMut() -> Fut) -> T
where
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt: u32 = 0;
    loop {
        match dial().await {
            Ok(value) => {
                info!(peer = peer_label, attempt, "reconnected");
                return value;
            }
            Err(err) => {
                warn!(peer = peer_label, attempt, error = %err, "reconnect attempt failed");
                let delay = backoff.delay_for(attempt);
                attempt = attempt.saturating_add(1);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn backoff_doubles_up_to_the_configured_max() {
        let cfg = BackoffConfig {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(500),
        };
        assert_eq!(cfg.delay_for(0), Duration::from_millis(100));
        assert_eq!(cfg.delay_for(1), Duration::from_millis(200));
        assert_eq!(cfg.delay_for(2), Duration::from_millis(400));
        assert_eq!(cfg.delay_for(3), Duration::from_millis(500));
        assert_eq!(cfg.delay_for(10), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn connection_lost_wakes_a_waiter_on_signal() {
        let lost = std::sync::Arc::new(ConnectionLost::default());
        let waiter = {
            let lost = lost.clone();
            tokio::spawn(async move { lost.notified().await })
        };
        tokio::task::yield_now().await;
        lost.signal();
        waiter.await.expect("waiter task");
    }

    #[tokio::test]
    async fn a_signal_before_the_wait_starts_is_not_lost() {
        let lost = ConnectionLost::default();
        lost.signal();
        tokio::time::timeout(Duration::from_millis(50), lost.notified())
            .await
            .expect("stored permit wakes the wait immediately");
    }

    #[tokio::test]
    async fn retries_until_dial_succeeds() {
        let attempts = AtomicU32::new(0);
        let backoff = BackoffConfig {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(2),
        };
        let result: u32 = reconnect_with_backoff("peer", backoff, || async {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err::<u32, &'static str>("not yet")
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result, 7);
    }
}
