// RPC client: open a connection, send one request, optionally read one
// response, honor a per-call deadline.

use std::time::Duration;

use tokio::net::TcpStream;

use crate::codec::{self, Request, Response};
use crate::error::{NodeError, Result};

/// Open TCP to `target`, write the encoded request, read and decode the
/// response, then close. Uses the OS default connect timeout.
///
/// The request decoder on the far end stops reading as soon as it has a
/// balanced JSON object (see [`crate::codec`]), so the connection is never
/// half-closed here -- request and response share the same full-duplex
/// socket, exactly like the original `proto.Command`.
pub async fn command(target: &str, request: &Request) -> Result<Response> {
    let mut stream = connect(target).await?;
    codec::encode_request(&mut stream, request).await?;
    codec::decode_response(&mut stream)
        .await?
        .ok_or_else(|| NodeError::Decode(format!("{target}: empty response body")))
}

/// Identical to [`command`], but the whole dial+write+read exchange must
/// complete within `deadline`. The connection is closed on every exit path,
/// including the timeout branch, so an expired call never leaks a
/// half-open socket (an earlier variant of this client leaked one on
/// timeout).
pub async fn command_timeout(target: &str, request: &Request, deadline: Duration) -> Result<Response> {
    match tokio::time::timeout(deadline, command(target, request)).await {
        Ok(result) => result,
        Err(_) => Err(NodeError::Timeout { target: target.to_string() }),
    }
}

/// Fire a request and ignore whatever comes back (or nothing, for handlers
/// like `start` that reply with an empty body). Used by the fixed-point
/// gossip broadcast and the trigger coordinator, both of which only care
/// that the call was attempted within its deadline.
pub async fn command_timeout_no_reply(target: &str, request: &Request, deadline: Duration) -> Result<()> {
    match command_timeout(target, request, deadline).await {
        Ok(_) | Err(NodeError::Decode(_)) => Ok(()),
        Err(other) => Err(other),
    }
}

async fn connect(target: &str) -> Result<TcpStream> {
    TcpStream::connect(target)
        .await
        .map_err(|e| NodeError::ConnectFailure { target: target.to_string(), source: e })
}
