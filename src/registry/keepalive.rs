// ABOUTME: Periodic health pings for upstreams that need them.
// ABOUTME: Each loop stops on the shared cancellation token or when its connection drops.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::upstream::{ConnectionState, Upstream};

pub(crate) async fn run(conn: Arc<dyn Upstream>, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; the connection was just verified.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if conn.state() != ConnectionState::Connected {
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = conn.health_check() => {
                if let Err(e) = result {
                    warn!(upstream = %conn.name(), error = %e, "Keep-alive ping failed");
                }
            }
        }
    }

    debug!(upstream = %conn.name(), "Keep-alive stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::upstream::fake::FakeUpstream;

    #[tokio::test]
    async fn test_cancel_interrupts_slow_ping() {
        let mut fake = FakeUpstream::new("remote").connected();
        fake.ping_delay = Duration::from_secs(30);
        let fake = Arc::new(fake);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run(fake.clone(), Duration::from_millis(10), cancel.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fake.pings.load(Ordering::SeqCst), 1);

        cancel.cancel();
        let stopped = tokio::time::timeout(Duration::from_secs(1), task).await;
        assert!(stopped.is_ok(), "keep-alive kept waiting on the ping");
    }
}
