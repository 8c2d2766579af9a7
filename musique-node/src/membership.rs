// Membership store: in-memory map of known peers. Writes are infrequent
// and batched (discovery replace, gossip merge), so a concurrent map is
// enough -- no dedicated owning task is needed.

use dashmap::DashMap;

use crate::codec::{HostsEntry, HostsResponse};

/// A per-peer round-trip timing sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencySample {
    pub before_ms: i64,
    pub after_ms: i64,
    pub remote_ms: i64,
}

impl LatencySample {
    /// One-way delay estimate, `(after - before) / 2`.
    pub fn one_way_delay_ms(&self) -> i64 {
        (self.after_ms - self.before_ms) / 2
    }
}

/// A peer known to this node, identified by its `address` key in
/// [`MembershipStore`].
#[derive(Debug, Clone)]
pub struct Peer {
    pub address: String,
    pub nick: String,
    pub version: String,
    pub latency_sample: Option<LatencySample>,
}

impl Peer {
    pub fn new(address: impl Into<String>, nick: impl Into<String>, version: impl Into<String>) -> Self {
        Self { address: address.into(), nick: nick.into(), version: version.into(), latency_sample: None }
    }

    fn to_hosts_entry(&self) -> HostsEntry {
        HostsEntry { nick: self.nick.clone(), address: self.address.clone(), version: self.version.clone() }
    }
}

/// Process-wide mutable peer set, keyed by `address` (`ip:port`). Excludes
/// this node's own listening addresses by construction -- callers that
/// insert peers are expected to have already applied
/// [`crate::selfaddr::is_self_address`].
#[derive(Default)]
pub struct MembershipStore {
    peers: DashMap<String, Peer>,
}

impl MembershipStore {
    pub fn new() -> Self {
        Self { peers: DashMap::new() }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.peers.contains_key(address)
    }

    /// Insert a peer if its address isn't already known. First-write-wins:
    /// an existing entry's `nick`/`version` is never overwritten.
    pub fn insert_if_absent(&self, peer: Peer) {
        self.peers.entry(peer.address.clone()).or_insert(peer);
    }

    /// Atomically replace the whole store with `peers` (used after a
    /// discovery cycle finishes).
    pub fn replace(&self, peers: Vec<Peer>) {
        self.peers.clear();
        for peer in peers {
            self.peers.insert(peer.address.clone(), peer);
        }
    }

    /// Record a round-trip latency sample for a known peer. No-op if the
    /// peer isn't in the store (e.g. it was evicted by a concurrent
    /// discovery replace).
    pub fn set_latency_sample(&self, address: &str, sample: LatencySample) {
        if let Some(mut peer) = self.peers.get_mut(address) {
            peer.latency_sample = Some(sample);
        }
    }

    pub fn latency_sample(&self, address: &str) -> Option<LatencySample> {
        self.peers.get(address).and_then(|p| p.latency_sample)
    }

    /// A point-in-time copy of every known peer.
    pub fn snapshot(&self) -> Vec<Peer> {
        self.peers.iter().map(|entry| entry.value().clone()).collect()
    }

    /// The current membership rendered as the wire `HostsResponse` shape.
    pub fn snapshot_as_hosts_response(&self) -> HostsResponse {
        HostsResponse { hosts: self.peers.iter().map(|entry| entry.value().to_hosts_entry()).collect() }
    }

    /// `nick@address` lines sorted by `(nick, address)`.
    pub fn list_known_remotes(&self) -> Vec<String> {
        let mut peers = self.snapshot();
        peers.sort_by(|a, b| (&a.nick, &a.address).cmp(&(&b.nick, &b.address)));
        peers.into_iter().map(|p| format!("{}@{}", p.nick, p.address)).collect()
    }
}
