// Request router: accept inbound TCP connections, dispatch by request type
// to a registered handler, encode the response.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};

use crate::codec::{self, Request, Response};
use crate::error::{NodeError, Result};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A registered handler: given the peer's address and the decoded request,
/// produce an optional response. Handlers are pure functions; returning
/// `None` suppresses the reply.
pub type Handler = Arc<dyn Fn(SocketAddr, Request) -> BoxFuture<'static, Option<Response>> + Send + Sync>;

/// Dispatch table keyed by request type name (`"handshake"`, `"hosts"`, ...).
#[derive(Default)]
pub struct Router {
    routes: HashMap<&'static str, Handler>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: HashMap::new() }
    }

    /// Register a handler for a request type. `name` must match
    /// [`Request::type_name`] for the requests it should receive.
    pub fn add<F, Fut>(&mut self, name: &'static str, handler: F)
    where
        F: Fn(SocketAddr, Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<Response>> + Send + 'static,
    {
        self.routes.insert(name, Arc::new(move |addr, req| Box::pin(handler(addr, req))));
    }

    /// Bind `ip:port` (port 0 lets the OS choose) and start accepting
    /// connections on a background task. Returns a [`RouterHandle`] that
    /// reports the actual bound port, so callers (advertise, self-filter)
    /// agree on the same value even when `port == 0`.
    pub async fn run(self, ip: &str, port: u16) -> Result<RouterHandle> {
        let listener = TcpListener::bind((ip, port))
            .await
            .map_err(|e| NodeError::FatalStartup(format!("failed to bind {ip}:{port}: {e}")))?;
        let actual_port = listener
            .local_addr()
            .map_err(|e| NodeError::FatalStartup(e.to_string()))?
            .port();

        let routes = Arc::new(self.routes);
        let task = tokio::spawn(accept_loop(listener, routes));

        Ok(RouterHandle { port: actual_port, task })
    }
}

async fn accept_loop(listener: TcpListener, routes: Arc<HashMap<&'static str, Handler>>) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                log::warn!("[router] failed to accept connection: {e}");
                continue;
            }
        };
        let routes = Arc::clone(&routes);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, addr, routes).await {
                log::debug!("[router] connection from {addr} dropped: {e}");
            }
        });
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    addr: SocketAddr,
    routes: Arc<HashMap<&'static str, Handler>>,
) -> Result<()> {
    let request = codec::decode_request(&mut stream).await?;
    let type_name = request.type_name();

    let Some(handler) = routes.get(type_name) else {
        log::warn!("[router] unrecognized request type: {type_name}");
        return Ok(());
    };

    if let Some(response) = handler(addr, request).await {
        codec::encode_response(&mut stream, &response).await?;
    }
    Ok(())
}

/// A running router. Dropping this does not stop the accept loop -- call
/// [`RouterHandle::shutdown`] for that (used by tests and the FFI
/// lifecycle, which must be able to tear a node down deterministically).
pub struct RouterHandle {
    port: u16,
    task: tokio::task::JoinHandle<()>,
}

impl RouterHandle {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn shutdown(&self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc;

    #[tokio::test]
    async fn port_zero_is_assigned_and_observable() {
        let mut router = Router::new();
        router.add("handshake", |_addr, _req| async move {
            Some(Response::Handshake { nick: "a".into(), version: "musique/1".into() })
        });
        let handle = router.run("127.0.0.1", 0).await.unwrap();
        assert_ne!(handle.port(), 0);
    }

    #[tokio::test]
    async fn unknown_request_type_closes_with_no_response() {
        let router = Router::new();
        let handle = router.run("127.0.0.1", 0).await.unwrap();
        let target = format!("127.0.0.1:{}", handle.port());

        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let mut stream = tokio::net::TcpStream::connect(&target).await.unwrap();
        stream.write_all(br#"{"Type":"frobnicate"}"#).await.unwrap();

        let mut buf = Vec::new();
        let n = stream.read_to_end(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn start_handler_with_zero_delay_fires_immediately() {
        let mut router = Router::new();
        let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(12);
        router.add("start", move |_addr, req| {
            let tx = tx.clone();
            async move {
                if let crate::codec::Request::Start { start_time_ms, .. } = req {
                    tokio::spawn(async move {
                        tokio::time::sleep(std::time::Duration::from_millis(start_time_ms.max(0) as u64)).await;
                        let _ = tx.send(()).await;
                    });
                }
                Some(Response::Start { succeeded: true })
            }
        });
        let handle = router.run("127.0.0.1", 0).await.unwrap();
        let target = format!("127.0.0.1:{}", handle.port());

        let response = rpc::command(&target, &crate::codec::Request::start(0)).await.unwrap();
        assert!(matches!(response, Response::Start { succeeded: true }));

        tokio::time::timeout(std::time::Duration::from_millis(200), rx.recv())
            .await
            .expect("pinger fired")
            .expect("channel open");
    }
}
