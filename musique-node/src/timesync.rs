// Time exchange: Cristian-style round-trip estimate of a peer's clock
// and the one-way delay to it.

use std::time::Duration;

use crate::codec::{Request, Response};
use crate::error::{NodeError, Result};
use crate::membership::{LatencySample, MembershipStore};
use crate::rpc;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Send a `time` request to `target`, bracketing the call with local
/// timestamps so the sample carries both endpoints of the round trip.
/// `before_ms`/`after_ms` are this node's clock; `remote_ms` is whatever
/// `target` reported handling the request.
pub async fn estimate_for(target: &str, deadline: Duration) -> Result<LatencySample> {
    let before_ms = now_ms();
    let response = rpc::command_timeout(target, &Request::time(), deadline).await?;
    let after_ms = now_ms();

    let remote_ms = match response {
        Response::Time { time_ms } => time_ms,
        other => return Err(NodeError::Decode(format!("{target}: expected a time response, got {other:?}"))),
    };

    Ok(LatencySample { before_ms, after_ms, remote_ms })
}

/// Handle a `time` request: reply with this node's current clock.
/// No state is read or written; the handler is pure.
pub fn handle_time_request() -> Response {
    Response::Time { time_ms: now_ms() }
}

/// Concurrently `estimate_for` every peer currently in `store` and wait
/// for all of them to finish. Failures are logged and leave that peer's
/// latency sample untouched, possibly stale or absent.
pub async fn timesync(store: &MembershipStore, deadline: Duration) {
    let mut probes = tokio::task::JoinSet::new();

    for peer in store.snapshot() {
        let deadline = deadline;
        probes.spawn(async move {
            let result = estimate_for(&peer.address, deadline).await;
            (peer.address, result)
        });
    }

    while let Some(outcome) = probes.join_next().await {
        match outcome {
            Ok((address, Ok(sample))) => store.set_latency_sample(&address, sample),
            Ok((address, Err(e))) => log::debug!("[timesync] estimate_for {address} failed: {e}"),
            Err(e) => log::debug!("[timesync] probe task panicked: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::Router;

    #[tokio::test]
    async fn estimate_for_reports_a_plausible_one_way_delay() {
        let mut router = Router::new();
        router.add("time", |_addr, _req| async move { Some(handle_time_request()) });
        let handle = router.run("127.0.0.1", 0).await.unwrap();
        let target = format!("127.0.0.1:{}", handle.port());

        let sample = estimate_for(&target, Duration::from_secs(1)).await.unwrap();
        assert!(sample.after_ms >= sample.before_ms);
        assert!(sample.one_way_delay_ms() >= 0);
    }

    #[tokio::test]
    async fn estimate_for_unreachable_target_times_out_or_fails_to_connect() {
        let err = estimate_for("127.0.0.1:1", Duration::from_millis(200)).await.unwrap_err();
        assert!(matches!(err, NodeError::ConnectFailure { .. } | NodeError::Timeout { .. }));
    }

    #[tokio::test]
    async fn timesync_populates_latency_samples_for_every_known_peer() {
        let mut router = Router::new();
        router.add("time", |_addr, _req| async move { Some(handle_time_request()) });
        let handle = router.run("127.0.0.1", 0).await.unwrap();
        let target = format!("127.0.0.1:{}", handle.port());

        let store = crate::membership::MembershipStore::new();
        store.insert_if_absent(crate::membership::Peer::new(target.clone(), "a", "musique/1"));

        timesync(&store, Duration::from_secs(1)).await;

        assert!(store.latency_sample(&target).is_some());
    }
}
