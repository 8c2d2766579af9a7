// Discovery -- sweep: enumerate local IPv4 /24s and probe every address
// with a handshake.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::codec::Request;
use crate::rpc;

const SWEEP_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// A subnet sweep descriptor: `first_address` is the `.1` host of the
/// interface's /24, `max_hosts_count` bounds how many addresses from
/// there are probed. Always 254 here -- the interface's actual mask is
/// not consulted, so larger networks are under-scanned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Network {
    pub first_address: Ipv4Addr,
    pub max_hosts_count: u16,
}

/// A successful handshake observed during a sweep.
#[derive(Debug, Clone)]
pub struct SweepHit {
    pub address: String,
    pub nick: String,
    pub version: String,
}

/// Enumerate local interfaces and emit one sweep descriptor per globally
/// unicast IPv4 address found.
pub fn available_networks() -> Vec<Network> {
    if_addrs::get_if_addrs()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|iface| match iface.addr.ip() {
            IpAddr::V4(ip) if is_global_unicast_v4(ip) => Some(Network { first_address: next_ip(ip), max_hosts_count: 254 }),
            _ => None,
        })
        .collect()
}

fn is_global_unicast_v4(ip: Ipv4Addr) -> bool {
    !ip.is_loopback() && !ip.is_link_local() && !ip.is_multicast() && !ip.is_broadcast() && !ip.is_unspecified()
}

fn next_ip(ip: Ipv4Addr) -> Ipv4Addr {
    let mut octets = ip.octets();
    octets[3] = octets[3].wrapping_add(1);
    Ipv4Addr::from(octets)
}

/// Probe every `(address, port)` pair across `networks` concurrently with
/// an unbounded fan-out, streaming successful handshakes to the returned
/// channel; the channel closes once every probe has completed. Failures
/// (refused, timed out, decode error) are silently dropped -- a sweep is
/// expected to miss far more than it hits.
pub fn tcp_hosts(networks: Vec<Network>, ports: Vec<u16>) -> mpsc::Receiver<SweepHit> {
    let (tx, rx) = mpsc::channel(32);

    tokio::spawn(async move {
        let mut probes = tokio::task::JoinSet::new();

        for network in networks {
            let mut octets = network.first_address.octets();
            for _ in 0..network.max_hosts_count {
                let candidate = Ipv4Addr::from(octets);
                for &port in &ports {
                    let tx = tx.clone();
                    probes.spawn(async move {
                        let target = format!("{candidate}:{port}");
                        if let Ok(crate::codec::Response::Handshake { nick, version }) =
                            rpc::command_timeout(&target, &Request::handshake(), SWEEP_HANDSHAKE_TIMEOUT).await
                        {
                            let _ = tx.send(SweepHit { address: target, nick, version }).await;
                        }
                    });
                }
                octets[3] = octets[3].wrapping_add(1);
            }
        }

        while probes.join_next().await.is_some() {}
    });

    rx
}
