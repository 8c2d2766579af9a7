// Trigger coordinator: latency-compensated synchronized start.
// `notify_all` fires a local rendezvous after `max_reaction_time_ms`
// and, concurrently, tells each peer to fire after
// `max_reaction_time_ms - one_way_delay_to_peer` (clamped to zero) so
// every node's local `start` handler lands at approximately the same
// wall-clock instant despite differing network latency.
// `server_begin_protocol` races that local deadline against an inbound
// `start` (see `install_start_handler`): whichever side notices first
// unblocks, so a node can act as initiator and receiver at once.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use musique_common::logging::Logger;

use crate::codec::Request;
use crate::membership::{MembershipStore, Peer};
use crate::router::Router;
use crate::rpc;

/// Rendezvous point between the inbound `start` handler and a local
/// `server_begin_protocol` call waiting on its own deadline. Shared via
/// `Arc` between the router's handler closure and the coordinator.
#[derive(Default)]
pub struct TriggerCoordinator {
    pinger: Notify,
}

impl TriggerCoordinator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { pinger: Notify::new() })
    }

    /// Broadcast a compensated `start` to every known peer and return the
    /// self-deadline (`max_reaction_time_ms`) as the rendezvous duration.
    /// Per-peer failures are logged and ignored.
    pub fn notify_all(&self, store: &MembershipStore, max_reaction_time_ms: i64, logger: &Logger) -> Duration {
        for peer in store.snapshot() {
            let start_offset_ms = start_offset_ms(max_reaction_time_ms, &peer);
            let target = peer.address.clone();
            let logger = logger.clone();
            tokio::spawn(async move {
                let deadline = Duration::from_millis(start_offset_ms as u64);
                if let Err(e) = rpc::command_timeout_no_reply(&target, &Request::start(start_offset_ms), deadline).await {
                    logger.warn(format!("trigger: start to {target} failed: {e}"));
                }
            });
        }

        Duration::from_millis(max_reaction_time_ms.max(0) as u64)
    }

    /// Compose the rendezvous: broadcast via `notify_all`, then wait for
    /// whichever fires first -- the self-deadline, or an inbound `start`
    /// arriving on `pinger` ahead of it.
    pub async fn server_begin_protocol(&self, store: &MembershipStore, max_reaction_time_ms: i64, logger: &Logger) {
        let self_deadline = self.notify_all(store, max_reaction_time_ms, logger);

        tokio::select! {
            _ = tokio::time::sleep(self_deadline) => {}
            _ = self.pinger.notified() => {
                logger.debug("trigger: fired by an inbound start ahead of our own deadline");
            }
        }
    }
}

/// `max_reaction_time_ms - one_way_delay_ms`, clamped to zero: if the
/// peer's measured round trip exceeds `2 * max_reaction_time_ms` the naive
/// offset goes negative, and a negative `start_time_ms` isn't meaningful
/// to send.
fn start_offset_ms(max_reaction_time_ms: i64, peer: &Peer) -> i64 {
    let one_way_delay_ms = peer.latency_sample.map(|s| s.one_way_delay_ms()).unwrap_or(0);
    (max_reaction_time_ms - one_way_delay_ms).max(0)
}

/// Register the inbound `start` handler on `router`: schedule a local
/// fire after `StartTime` milliseconds and notify `coordinator`'s pinger
/// so a concurrent `server_begin_protocol` on this same node stops
/// waiting on its own deadline.
pub fn install_start_handler(router: &mut Router, coordinator: Arc<TriggerCoordinator>) {
    router.add("start", move |_addr, req| {
        let coordinator = Arc::clone(&coordinator);
        async move {
            if let Request::Start { start_time_ms, .. } = req {
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(start_time_ms.max(0) as u64)).await;
                    coordinator.pinger.notify_one();
                });
            }
            Some(crate::codec::Response::Start { succeeded: true })
        }
    });
}
