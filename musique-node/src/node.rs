// Host-facing facade: the lifecycle surface an embedding application (the
// CLI binary, or a native host through `musique-ffi`) drives this engine
// through.

use std::io::Write;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicU16, Ordering};
use std::sync::Arc;

use musique_common::logging::{Component, Logger};

use crate::codec::{HostsResponse, Request, Response};
use crate::config::NodeConfig;
use crate::discovery::mdns::{DiscoveryBackend, MdnsBackend};
use crate::error::Result;
use crate::gossip;
use crate::membership::MembershipStore;
use crate::router::{Router, RouterHandle};
use crate::timesync;
use crate::trigger::TriggerCoordinator;

const INITIAL_DISCOVERY_WAIT_SECS: u64 = 2;
const USER_DISCOVERY_WAIT_SECS: u64 = 5;

/// The running peer-coordination engine for one node. Constructed by
/// [`MusiqueNode::server_init`]; every host-facing operation is an
/// inherent method here so both `musique-cli` (direct calls) and
/// `musique-ffi` (`extern "C"` wrappers blocking on a shared runtime) can
/// drive the same instance.
pub struct MusiqueNode {
    nick: String,
    store: Arc<MembershipStore>,
    router: RouterHandle,
    trigger: Arc<TriggerCoordinator>,
    discovery: Arc<dyn DiscoveryBackend>,
    service_type: String,
    registered_service: std::sync::Mutex<Option<crate::discovery::mdns::RegisteredService>>,
    max_reaction_time_ms: AtomicI64,
    logger: Logger,
}

impl MusiqueNode {
    /// Bind the router (port 0 lets the OS assign one), register the mDNS
    /// service, run a short initial discovery cycle, then run `timesync()`
    /// once against whatever that cycle found.
    pub async fn server_init(config: NodeConfig) -> Result<Self> {
        let logger = Logger::new_root(Component::Node);
        let store = Arc::new(MembershipStore::new());
        let trigger = TriggerCoordinator::new();

        let router = build_router(
            Arc::clone(&store),
            Arc::clone(&trigger),
            config.nick.clone(),
            &config.bind_ip,
            config.bind_port,
        )
        .await?;
        let bind_port = router.port();

        let discovery: Arc<dyn DiscoveryBackend> = Arc::new(MdnsBackend::new()?);
        let registered_service = discovery.register(&config.instance_name, &config.service_type, bind_port)?;

        let node = Self {
            nick: config.nick.clone(),
            store,
            router,
            trigger,
            discovery,
            service_type: config.service_type.clone(),
            registered_service: std::sync::Mutex::new(Some(registered_service)),
            max_reaction_time_ms: AtomicI64::new(config.max_reaction_time_ms),
            logger,
        };

        node.run_discovery_cycle(INITIAL_DISCOVERY_WAIT_SECS).await?;
        timesync::timesync(&node.store, rpc_timeout_for(INITIAL_DISCOVERY_WAIT_SECS)).await;

        Ok(node)
    }

    /// Update `max_reaction_time_ms` for subsequent
    /// `server_begin_protocol` calls.
    pub fn set_timeout(&self, ms: i64) {
        self.max_reaction_time_ms.store(ms, Ordering::SeqCst);
    }

    /// A longer discovery cycle than the one `server_init` ran, for a
    /// user-triggered re-scan.
    pub async fn discover(&self) -> Result<()> {
        self.run_discovery_cycle(USER_DISCOVERY_WAIT_SECS).await?;
        timesync::timesync(&self.store, rpc_timeout_for(USER_DISCOVERY_WAIT_SECS)).await;
        Ok(())
    }

    /// Broadcast a latency-compensated `start` to every known peer and
    /// wait for the rendezvous (self-deadline or an inbound `start`,
    /// whichever first).
    pub async fn server_begin_protocol(&self) {
        let max_reaction_time_ms = self.max_reaction_time_ms.load(Ordering::SeqCst);
        self.trigger.server_begin_protocol(&self.store, max_reaction_time_ms, &self.logger).await;
    }

    /// `nick@address` lines, sorted by `(nick, address)`, written to
    /// stdout and flushed.
    pub fn list_known_remotes(&self) {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        for line in self.store.list_known_remotes() {
            let _ = writeln!(handle, "{line}");
        }
        let _ = handle.flush();
    }

    /// Broadcast the full membership to every known peer and merge back
    /// their differences until the set stops growing. Exposed alongside
    /// `server_begin_protocol` since that call alone never converges
    /// membership by itself.
    pub async fn synchronize_hosts_with_remotes(&self) {
        gossip::broadcast_fixed_point(&self.store, self.router.port(), &self.nick, &self.logger).await;
    }

    pub fn port(&self) -> u16 {
        self.router.port()
    }

    async fn run_discovery_cycle(&self, wait_seconds: u64) -> Result<()> {
        crate::discovery::mdns::register_remotes(
            self.discovery.as_ref(),
            &self.store,
            &self.service_type,
            self.router.port(),
            wait_seconds,
        )
        .await
    }
}

impl Drop for MusiqueNode {
    fn drop(&mut self) {
        if let Some(service) = self.registered_service.lock().unwrap().take() {
            service.shutdown();
        }
        self.router.shutdown();
    }
}

fn rpc_timeout_for(wait_seconds: u64) -> std::time::Duration {
    std::time::Duration::from_secs(wait_seconds.max(1))
}

/// Register every wire handler the protocol names and bind the router.
async fn build_router(
    store: Arc<MembershipStore>,
    trigger: Arc<TriggerCoordinator>,
    nick: String,
    bind_ip: &str,
    port: u16,
) -> Result<RouterHandle> {
    let mut router = Router::new();

    // `port` is whatever the caller asked to bind (possibly 0, for "pick
    // one"); the handlers below need the port actually bound, which is
    // only known once `router.run` returns. They share this cell instead
    // of closing over `port` directly, and it's updated to the real value
    // right after bind, before any connection can be dispatched against
    // a stale one.
    let local_port = Arc::new(AtomicU16::new(port));

    {
        let nick = nick.clone();
        router.add("handshake", move |_addr: SocketAddr, _req: Request| {
            let nick = nick.clone();
            async move { Some(Response::Handshake { nick, version: crate::config::PROTOCOL_VERSION.to_string() }) }
        });
    }

    {
        let store = Arc::clone(&store);
        router.add("hosts", move |_addr: SocketAddr, _req: Request| {
            let store = Arc::clone(&store);
            async move { Some(Response::Hosts(store.snapshot_as_hosts_response())) }
        });
    }

    {
        let store = Arc::clone(&store);
        let local_port = Arc::clone(&local_port);
        router.add("synchronize-hosts", move |_addr: SocketAddr, req: Request| {
            let store = Arc::clone(&store);
            let local_port = Arc::clone(&local_port);
            async move {
                let Request::SynchronizeHosts { hosts_response, .. } = req else {
                    return Some(Response::Hosts(HostsResponse::default()));
                };
                let port = local_port.load(Ordering::SeqCst);
                Some(Response::Hosts(gossip::merge_in(&store, port, hosts_response)))
            }
        });
    }

    router.add("time", |_addr: SocketAddr, _req: Request| async move { Some(timesync::handle_time_request()) });

    {
        let store = Arc::clone(&store);
        let nick = nick.clone();
        let local_port = Arc::clone(&local_port);
        router.add("synchronize-hosts-with-remotes", move |_addr: SocketAddr, _req: Request| {
            let store = Arc::clone(&store);
            let nick = nick.clone();
            let local_port = Arc::clone(&local_port);
            let logger = Logger::new_root(Component::Gossip);
            async move {
                let port = local_port.load(Ordering::SeqCst);
                gossip::broadcast_fixed_point(&store, port, &nick, &logger).await;
                None
            }
        });
    }

    crate::trigger::install_start_handler(&mut router, trigger);

    let bind_ip = if bind_ip.is_empty() { "0.0.0.0" } else { bind_ip };
    let handle = router.run(bind_ip, port).await?;
    local_port.store(handle.port(), Ordering::SeqCst);
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn router_handlers_answer_handshake_hosts_and_time() {
        let store = Arc::new(MembershipStore::new());
        let trigger = TriggerCoordinator::new();
        let router = build_router(Arc::clone(&store), trigger, "tester".to_string(), "127.0.0.1", 0).await.unwrap();
        let target = format!("127.0.0.1:{}", router.port());

        let response = crate::rpc::command(&target, &Request::handshake()).await.unwrap();
        assert!(matches!(response, Response::Handshake { nick, .. } if nick == "tester"));

        let response = crate::rpc::command(&target, &Request::hosts()).await.unwrap();
        assert!(matches!(response, Response::Hosts(hosts) if hosts.hosts.is_empty()));

        let response = crate::rpc::command(&target, &Request::time()).await.unwrap();
        assert!(matches!(response, Response::Time { .. }));
    }
}
