// Self-address filter: decide whether a candidate `host:port` is this
// node's own listening address. Used by discovery so a node never adds
// itself to its own membership store.

use std::net::IpAddr;

/// Enumerate the IPv4 addresses bound to local interfaces.
pub fn local_ipv4_addrs() -> Vec<IpAddr> {
    if_addrs::get_if_addrs()
        .map(|addrs| {
            addrs
                .into_iter()
                .map(|iface| iface.addr.ip())
                .filter(IpAddr::is_ipv4)
                .collect()
        })
        .unwrap_or_default()
}

/// Is `candidate` (`"ip:port"`) one of this node's own listening addresses?
pub fn is_self_address(candidate: &str, local_port: u16) -> bool {
    let Some((host, port)) = candidate.rsplit_once(':') else {
        return false;
    };
    let Ok(port) = port.parse::<u16>() else {
        return false;
    };
    if port != local_port {
        return false;
    }
    let Ok(host_ip) = host.parse::<IpAddr>() else {
        return false;
    };
    local_ipv4_addrs().iter().any(|local| *local == host_ip)
}
