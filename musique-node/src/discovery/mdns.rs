// Discovery -- advertise / browse: register this node as a multicast
// DNS-SD service and discover others, bridging a generic register/browse
// contract onto the `mdns-sd` crate.

use std::net::Ipv4Addr;
use std::time::Duration;

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::sync::mpsc;

use crate::codec::Request;
use crate::error::{NodeError, Result};
use crate::membership::{MembershipStore, Peer};
use crate::rpc;
use crate::selfaddr;

/// A service announcement observed while browsing.
#[derive(Debug, Clone)]
pub struct ServiceEntry {
    pub host_name: String,
    pub addrs_ipv4: Vec<Ipv4Addr>,
    pub port: u16,
}

/// Handle to a registered service; unregisters on `shutdown` so a node
/// doesn't leave a stale advertisement behind on exit.
pub struct RegisteredService {
    daemon: ServiceDaemon,
    fullname: String,
}

impl RegisteredService {
    pub fn shutdown(&self) {
        if let Err(e) = self.daemon.unregister(&self.fullname) {
            log::warn!("[discovery] failed to unregister mDNS service: {e}");
        }
    }
}

/// A generic "browse/register" contract, factored out so the engine
/// depends on this trait rather than directly on `mdns-sd` (a test
/// double can stand in for it).
pub trait DiscoveryBackend: Send + Sync {
    fn register(&self, instance_name: &str, service_type: &str, port: u16) -> Result<RegisteredService>;
    fn browse(&self, service_type: &str) -> Result<mpsc::Receiver<ServiceEntry>>;
}

/// `DiscoveryBackend` backed by the real `mdns-sd` multicast daemon.
pub struct MdnsBackend {
    daemon: ServiceDaemon,
}

impl MdnsBackend {
    pub fn new() -> Result<Self> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| NodeError::DiscoveryBackendFailure(format!("failed to start mDNS daemon: {e}")))?;
        Ok(Self { daemon })
    }
}

impl DiscoveryBackend for MdnsBackend {
    fn register(&self, instance_name: &str, service_type: &str, port: u16) -> Result<RegisteredService> {
        let host_name = format!("{instance_name}.local.");
        let info = ServiceInfo::new(service_type, instance_name, &host_name, "", port, None)
            .map_err(|e| NodeError::DiscoveryBackendFailure(format!("failed to build service descriptor: {e}")))?
            .enable_addr_auto();

        let fullname = info.get_fullname().to_string();
        self.daemon
            .register(info)
            .map_err(|e| NodeError::DiscoveryBackendFailure(format!("failed to register mDNS service: {e}")))?;

        Ok(RegisteredService { daemon: self.daemon.clone(), fullname })
    }

    fn browse(&self, service_type: &str) -> Result<mpsc::Receiver<ServiceEntry>> {
        let events = self
            .daemon
            .browse(service_type)
            .map_err(|e| NodeError::DiscoveryBackendFailure(format!("failed to start mDNS browse: {e}")))?;

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            while let Ok(event) = events.recv_async().await {
                if let ServiceEvent::ServiceResolved(info) = event {
                    let entry = ServiceEntry {
                        host_name: info.get_hostname().to_string(),
                        addrs_ipv4: info.get_addresses_v4().into_iter().copied().collect(),
                        port: info.get_port(),
                    };
                    if tx.send(entry).await.is_err() {
                        break;
                    }
                }
            }
        });

        Ok(rx)
    }
}

/// A single bounded discovery cycle: browse for `wait_seconds`,
/// handshake every announced IPv4 address concurrently within the same
/// deadline, then atomically replace the membership store with the
/// self-filtered union of everything that answered.
pub async fn register_remotes(
    backend: &dyn DiscoveryBackend,
    store: &MembershipStore,
    service_type: &str,
    local_port: u16,
    wait_seconds: u64,
) -> Result<()> {
    let deadline = Duration::from_secs(wait_seconds);
    let mut browse_rx = backend.browse(service_type)?;
    let mut handshakes = tokio::task::JoinSet::new();

    let browse_deadline = tokio::time::Instant::now() + deadline;
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(browse_deadline) => break,
            entry = browse_rx.recv() => {
                let Some(entry) = entry else { break };
                for ip in entry.addrs_ipv4 {
                    let target = format!("{ip}:{}", entry.port);
                    if selfaddr::is_self_address(&target, local_port) {
                        continue;
                    }
                    handshakes.spawn(async move {
                        rpc::command_timeout(&target, &Request::handshake(), deadline)
                            .await
                            .ok()
                            .and_then(|response| match response {
                                crate::codec::Response::Handshake { nick, version } => {
                                    Some(Peer::new(target, nick, version))
                                }
                                _ => None,
                            })
                    });
                }
            }
        }
    }

    let mut staged = Vec::new();
    while let Some(result) = handshakes.join_next().await {
        if let Ok(Some(peer)) = result {
            staged.push(peer);
        }
    }

    store.replace(staged);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoOpBackend;

    impl DiscoveryBackend for NoOpBackend {
        fn register(&self, _instance_name: &str, _service_type: &str, _port: u16) -> Result<RegisteredService> {
            unreachable!("not exercised by this test")
        }

        fn browse(&self, _service_type: &str) -> Result<mpsc::Receiver<ServiceEntry>> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }
    }

    #[tokio::test]
    async fn register_remotes_returns_when_browse_deadline_elapses_with_nothing_found() {
        let backend = NoOpBackend;
        let store = MembershipStore::new();
        let result = register_remotes(&backend, &store, "_musique._tcp.local.", 8081, 0).await;
        assert!(result.is_ok());
        assert!(store.is_empty());
    }
}
