// Gossip synchronizer: fixed-point union of membership views across all
// known peers.

use std::net::IpAddr;
use std::time::Duration;

use musique_common::logging::Logger;

use crate::codec::{HostsEntry, HostsResponse, Request, Response};
use crate::error::{NodeError, Result};
use crate::membership::{MembershipStore, Peer};
use crate::selfaddr;
use crate::{config, rpc};

/// Per-call RPC deadline used inside the broadcast loop. Every outbound
/// RPC carries a deadline, so a generous fixed bound is used here instead
/// of an unbounded call.
const GOSSIP_RPC_TIMEOUT: Duration = Duration::from_secs(5);

/// Inbound merge (`synchronize-hosts` handler): union `incoming` into the
/// membership store (skipping self and already-known addresses), and
/// reply with the set of locally-known peers `incoming` didn't mention.
/// Idempotent and commutative over the address key.
pub fn merge_in(store: &MembershipStore, local_port: u16, incoming: HostsResponse) -> HostsResponse {
    let mut mentioned = std::collections::HashSet::new();

    for entry in incoming.hosts {
        if !selfaddr::is_self_address(&entry.address, local_port) {
            store.insert_if_absent(Peer::new(entry.address.clone(), entry.nick, entry.version));
        }
        mentioned.insert(entry.address);
    }

    let hosts = store
        .snapshot()
        .into_iter()
        .filter(|peer| !mentioned.contains(&peer.address))
        .map(|peer| HostsEntry { nick: peer.nick, address: peer.address, version: peer.version })
        .collect();

    HostsResponse { hosts }
}

/// Find the local IPv4 address that shares a /24 with `remote_address`'s
/// host part, formatted as `ip:local_port`. Returns
/// `AddressResolutionFailure` if none of the local interfaces are on that
/// subnet.
fn local_address_in_same_network(remote_address: &str, local_port: u16) -> Result<String> {
    let remote_host = remote_address.rsplit_once(':').map(|(host, _)| host).unwrap_or(remote_address);
    let remote_ip: IpAddr = remote_host
        .parse()
        .map_err(|_| NodeError::AddressResolutionFailure { remote: remote_address.to_string() })?;

    let addrs = if_addrs::get_if_addrs()
        .map_err(|_| NodeError::AddressResolutionFailure { remote: remote_address.to_string() })?;

    addrs
        .into_iter()
        .find(|iface| same_ipv4_subnet(iface.addr.ip(), iface.addr.netmask(), remote_ip))
        .map(|iface| format!("{}:{}", iface.addr.ip(), local_port))
        .ok_or_else(|| NodeError::AddressResolutionFailure { remote: remote_address.to_string() })
}

fn same_ipv4_subnet(local: IpAddr, netmask: IpAddr, remote: IpAddr) -> bool {
    match (local, netmask, remote) {
        (IpAddr::V4(local), IpAddr::V4(mask), IpAddr::V4(remote)) => {
            let mask = u32::from(mask);
            u32::from(local) & mask == u32::from(remote) & mask
        }
        _ => false,
    }
}

/// Outbound fixed-point broadcast (`synchronize-hosts-with-remotes`):
/// iterate sending the full local snapshot (plus a self entry reachable
/// on each target's subnet) to every known peer and merging back their
/// differences, until the membership size stops growing. Terminates in
/// at most `diameter(graph)` iterations because the membership set only
/// grows and is bounded by the reachable LAN.
pub async fn broadcast_fixed_point(store: &MembershipStore, local_port: u16, nick: &str, logger: &Logger) {
    let mut previous_len = usize::MAX;

    loop {
        let current_len = store.len();
        if current_len == previous_len {
            return;
        }
        previous_len = current_len;

        let snapshot = store.snapshot_as_hosts_response();
        let targets: Vec<String> = snapshot.hosts.iter().map(|h| h.address.clone()).collect();

        for target in &targets {
            let mut outgoing = snapshot.clone();
            match local_address_in_same_network(target, local_port) {
                Ok(my_address) => outgoing.hosts.push(HostsEntry {
                    nick: nick.to_string(),
                    address: my_address,
                    version: config::PROTOCOL_VERSION.to_string(),
                }),
                Err(e) => logger.debug(format!("gossip: {e} (sending without a self entry this round)")),
            }

            match rpc::command_timeout(target, &Request::synchronize_hosts(outgoing), GOSSIP_RPC_TIMEOUT).await {
                Ok(Response::Hosts(reply)) => {
                    merge_in(store, local_port, reply);
                }
                Ok(_) => logger.warn(format!("gossip: unexpected response shape from {target}")),
                Err(e) => logger.warn(format!("gossip: synchronize-hosts to {target} failed: {e}")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::HostsEntry;

    #[test]
    fn merge_is_idempotent_over_address() {
        let store = MembershipStore::new();
        let incoming = HostsResponse {
            hosts: vec![HostsEntry { nick: "b".into(), address: "10.0.0.2:8081".into(), version: "v1".into() }],
        };

        merge_in(&store, 8081, incoming.clone());
        let first_len = store.len();
        merge_in(&store, 8081, incoming);
        assert_eq!(store.len(), first_len);
    }

    #[test]
    fn merge_reply_excludes_entries_incoming_already_knew() {
        let store = MembershipStore::new();
        store.insert_if_absent(Peer::new("10.0.0.5:8081", "existing", "v1"));

        let incoming = HostsResponse {
            hosts: vec![HostsEntry { nick: "existing".into(), address: "10.0.0.5:8081".into(), version: "v1".into() }],
        };
        let reply = merge_in(&store, 8081, incoming);
        assert!(reply.hosts.is_empty());
    }

    #[test]
    fn merge_reply_contains_what_incoming_did_not_know() {
        let store = MembershipStore::new();
        store.insert_if_absent(Peer::new("10.0.0.5:8081", "existing", "v1"));

        let reply = merge_in(&store, 8081, HostsResponse::default());
        assert_eq!(reply.hosts.len(), 1);
        assert_eq!(reply.hosts[0].address, "10.0.0.5:8081");
    }

    #[test]
    fn merge_first_write_wins_on_existing_address() {
        let store = MembershipStore::new();
        store.insert_if_absent(Peer::new("10.0.0.5:8081", "original", "v1"));

        let incoming = HostsResponse {
            hosts: vec![HostsEntry { nick: "renamed".into(), address: "10.0.0.5:8081".into(), version: "v2".into() }],
        };
        merge_in(&store, 8081, incoming);

        let snapshot = store.snapshot();
        assert_eq!(snapshot[0].nick, "original");
    }
}
