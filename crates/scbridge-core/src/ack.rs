// ── Outbound acknowledgement tracking ──
//
// Every tracked outbound message registers a waiter under its counter
// value; the router resolves it when the matching ACK/NACK arrives. On
// disconnect or teardown the whole map is dropped, which resolves every
// waiter as closed.

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::config::Timing;
use crate::error::BridgeError;
use crate::session::Outbound;

/// Terminal outcome for a tracked outbound message.
#[derive(Debug)]
pub(crate) enum AckOutcome {
    Ack,
    Nack { info: Option<String> },
}

#[derive(Default)]
pub(crate) struct AckTracker {
    waiters: DashMap<u64, oneshot::Sender<AckOutcome>>,
}

impl AckTracker {
    pub fn register(&self, mc: u64) -> oneshot::Receiver<AckOutcome> {
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(mc, tx);
        rx
    }

    pub fn resolve(&self, reference: u64, outcome: AckOutcome) {
        match self.waiters.remove(&reference) {
            Some((_, tx)) => {
                let _ = tx.send(outcome);
            }
            // Normal after a timeout has already abandoned the waiter.
            None => debug!(reference, "acknowledgement for unknown message"),
        }
    }

    pub fn forget(&self, mc: u64) {
        self.waiters.remove(&mc);
    }

    /// Drop every pending waiter; their receivers resolve as closed.
    pub fn abort_all(&self) {
        self.waiters.clear();
    }

    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.waiters.len()
    }
}

/// Send a command and wait for its acknowledgement, retrying on NACK or
/// timeout. Each attempt goes out under a fresh counter value.
///
/// A successful return means the bridge *accepted* the command; whether
/// the physical action happened is reported asynchronously via
/// StateUpdate.
pub(crate) async fn send_with_retry(
    outbound: &Outbound,
    timing: &Timing,
    payload: Value,
) -> Result<(), BridgeError> {
    for attempt in 1..=timing.max_attempts {
        let (mc, waiter) = outbound.send_tracked(payload.clone())?;

        match tokio::time::timeout(timing.ack_timeout, waiter).await {
            Ok(Ok(AckOutcome::Ack)) => {
                debug!(mc, attempt, "command acknowledged");
                return Ok(());
            }
            Ok(Ok(AckOutcome::Nack { info })) => {
                warn!(
                    mc,
                    attempt,
                    info = info.as_deref().unwrap_or(""),
                    "command rejected by bridge"
                );
            }
            // Waiters are dropped wholesale on disconnect or teardown;
            // retrying into a dead session is pointless.
            Ok(Err(_)) => return Err(BridgeError::NotConnected),
            Err(_) => {
                outbound.forget(mc);
                warn!(mc, attempt, "acknowledgement timed out");
            }
        }

        if attempt < timing.max_attempts {
            tokio::time::sleep(timing.retry_delay).await;
        }
    }

    Err(BridgeError::AckTimeout {
        attempts: timing.max_attempts,
    })
}
