// Wire codec: one JSON-encoded `Request` per TCP connection, optionally
// followed by one JSON-encoded `Response`. Modelled as tagged enums over a
// single wire format, even though the wire shape underneath is the flatter
// `{"Type": ..., ...}` record the original Go `proto.Request` struct used.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{NodeError, Result};

/// One entry of a `HostsResponse` peer listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostsEntry {
    #[serde(rename = "Nick")]
    pub nick: String,
    #[serde(rename = "Address")]
    pub address: String,
    #[serde(rename = "Version")]
    pub version: String,
}

/// Reply carried by `hosts` and `synchronize-hosts`. `deny_unknown_fields`
/// plus the required (non-`default`) `Hosts` key keep this shape from
/// silently swallowing a `time` or `start` reply when decoded through the
/// untagged `Response` enum below.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostsResponse {
    #[serde(rename = "Hosts")]
    pub hosts: Vec<HostsEntry>,
}

/// A request envelope. `Type` selects the variant; field names match the
/// original wire shape (`Version`, `HostsResponse`, `StartTime`) so this
/// crate interoperates with any peer speaking the same JSON protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "Type")]
pub enum Request {
    #[serde(rename = "handshake")]
    Handshake { #[serde(rename = "Version")] version: String },

    #[serde(rename = "hosts")]
    Hosts { #[serde(rename = "Version")] version: String },

    #[serde(rename = "synchronize-hosts")]
    SynchronizeHosts {
        #[serde(rename = "Version")]
        version: String,
        #[serde(rename = "HostsResponse")]
        hosts_response: HostsResponse,
    },

    #[serde(rename = "synchronize-hosts-with-remotes")]
    SynchronizeHostsWithRemotes { #[serde(rename = "Version")] version: String },

    #[serde(rename = "time")]
    Time { #[serde(rename = "Version")] version: String },

    #[serde(rename = "start")]
    Start {
        #[serde(rename = "Version")]
        version: String,
        #[serde(rename = "StartTime")]
        start_time_ms: i64,
    },
}

impl Request {
    pub fn version(&self) -> &str {
        match self {
            Request::Handshake { version }
            | Request::Hosts { version }
            | Request::SynchronizeHosts { version, .. }
            | Request::SynchronizeHostsWithRemotes { version }
            | Request::Time { version }
            | Request::Start { version, .. } => version,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Request::Handshake { .. } => "handshake",
            Request::Hosts { .. } => "hosts",
            Request::SynchronizeHosts { .. } => "synchronize-hosts",
            Request::SynchronizeHostsWithRemotes { .. } => "synchronize-hosts-with-remotes",
            Request::Time { .. } => "time",
            Request::Start { .. } => "start",
        }
    }

    pub fn handshake() -> Self {
        Request::Handshake { version: crate::config::PROTOCOL_VERSION.to_string() }
    }

    pub fn hosts() -> Self {
        Request::Hosts { version: crate::config::PROTOCOL_VERSION.to_string() }
    }

    pub fn synchronize_hosts(hosts_response: HostsResponse) -> Self {
        Request::SynchronizeHosts {
            version: crate::config::PROTOCOL_VERSION.to_string(),
            hosts_response,
        }
    }

    pub fn synchronize_hosts_with_remotes() -> Self {
        Request::SynchronizeHostsWithRemotes { version: crate::config::PROTOCOL_VERSION.to_string() }
    }

    pub fn time() -> Self {
        Request::Time { version: crate::config::PROTOCOL_VERSION.to_string() }
    }

    pub fn start(start_time_ms: i64) -> Self {
        Request::Start {
            version: crate::config::PROTOCOL_VERSION.to_string(),
            start_time_ms,
        }
    }
}

/// Response envelopes, one shape per request type. Handlers that have
/// nothing to say return `None` from the router instead of a `Response`
/// variant.
///
/// `untagged` means serde tries each variant in declaration order and
/// keeps the first one that parses, so every variant (and `HostsResponse`
/// above) carries `deny_unknown_fields` and only its own required keys --
/// otherwise a `{"Time":...}` body would satisfy `Hosts` first, since an
/// object with no recognized fields used to deserialize into an empty
/// `HostsResponse` by default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    #[serde(deny_unknown_fields)]
    Handshake { #[serde(rename = "Nick")] nick: String, #[serde(rename = "Version")] version: String },
    Hosts(HostsResponse),
    #[serde(deny_unknown_fields)]
    Time { #[serde(rename = "Time")] time_ms: i64 },
    #[serde(deny_unknown_fields)]
    Start { #[serde(rename = "Succeeded")] succeeded: bool },
}

/// Read exactly one JSON value from `reader` and decode it as a `Request`.
///
/// Connections stay open after the request so the caller can still read a
/// response on the same socket, so this cannot read to EOF the way a naive
/// implementation would -- it scans for a single balanced `{...}` object,
/// mirroring what `encoding/json`'s streaming `Decoder.Decode` does on the
/// Go side of this protocol.
pub async fn decode_request<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Request> {
    let bytes = read_one_json_value(reader).await?.ok_or_else(truncated_json_error)?;
    serde_json::from_slice(&bytes).map_err(|e| NodeError::Decode(e.to_string()))
}

fn truncated_json_error() -> NodeError {
    NodeError::Decode("connection closed before a JSON value was received".to_string())
}

/// Read exactly one JSON value from `reader` and decode it as a `Response`.
/// Returns `Ok(None)` for a zero-length body -- the RPC client tolerates
/// this for fire-and-forget calls.
pub async fn decode_response<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Response>> {
    match read_one_json_value(reader).await? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| NodeError::Decode(e.to_string())),
        None => Ok(None),
    }
}

/// Scan `reader` for the next complete `{...}` JSON object, respecting
/// string literals and escapes so that braces inside string values don't
/// confuse the depth count. Returns `Ok(None)` if the stream is empty
/// (EOF before any non-whitespace byte), and a decode error if it ends
/// mid-object.
async fn read_one_json_value<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];

    // Skip leading whitespace; EOF here means an empty body.
    loop {
        let n = reader
            .read(&mut byte)
            .await
            .map_err(|e| NodeError::ConnectFailure { target: String::new(), source: e })?;
        if n == 0 {
            return Ok(None);
        }
        if !byte[0].is_ascii_whitespace() {
            break;
        }
    }

    if byte[0] != b'{' {
        return Err(NodeError::Decode("expected a JSON object".to_string()));
    }

    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escaped = false;

    loop {
        buf.push(byte[0]);
        if in_string {
            if escaped {
                escaped = false;
            } else if byte[0] == b'\\' {
                escaped = true;
            } else if byte[0] == b'"' {
                in_string = false;
            }
        } else {
            match byte[0] {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(Some(buf));
                    }
                }
                _ => {}
            }
        }

        let n = reader
            .read(&mut byte)
            .await
            .map_err(|e| NodeError::ConnectFailure { target: String::new(), source: e })?;
        if n == 0 {
            return Err(truncated_json_error());
        }
    }
}

pub async fn encode_request<W: AsyncWrite + Unpin>(writer: &mut W, request: &Request) -> Result<()> {
    let bytes = serde_json::to_vec(request).map_err(NodeError::Encode)?;
    writer
        .write_all(&bytes)
        .await
        .map_err(|e| NodeError::ConnectFailure { target: String::new(), source: e })?;
    Ok(())
}

pub async fn encode_response<W: AsyncWrite + Unpin>(writer: &mut W, response: &Response) -> Result<()> {
    let bytes = serde_json::to_vec(response).map_err(NodeError::Encode)?;
    writer
        .write_all(&bytes)
        .await
        .map_err(|e| NodeError::ConnectFailure { target: String::new(), source: e })?;
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn handshake_round_trips() {
        let request = Request::handshake();
        let mut buf = Vec::new();
        encode_request(&mut buf, &request).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let decoded = decode_request(&mut cursor).await.unwrap();
        assert_eq!(decoded.type_name(), "handshake");
        assert_eq!(decoded.version(), crate::config::PROTOCOL_VERSION);
    }

    #[tokio::test]
    async fn handshake_response_round_trips() {
        let response = Response::Handshake { nick: "a".into(), version: "musique/1".into() };
        let mut buf = Vec::new();
        encode_response(&mut buf, &response).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let decoded = decode_response(&mut cursor).await.unwrap().expect("non-empty body");
        match decoded {
            Response::Handshake { nick, version } => {
                assert_eq!(nick, "a");
                assert_eq!(version, "musique/1");
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_response_body_is_tolerated() {
        let mut cursor = std::io::Cursor::new(Vec::new());
        let decoded = decode_response(&mut cursor).await.unwrap();
        assert!(decoded.is_none());
    }

    #[tokio::test]
    async fn synchronize_hosts_round_trips_payload() {
        let hosts = HostsResponse {
            hosts: vec![HostsEntry {
                nick: "b".into(),
                address: "127.0.0.1:8082".into(),
                version: "musique/1".into(),
            }],
        };
        let request = Request::synchronize_hosts(hosts.clone());
        let mut buf = Vec::new();
        encode_request(&mut buf, &request).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let decoded = decode_request(&mut cursor).await.unwrap();
        match decoded {
            Request::SynchronizeHosts { hosts_response, .. } => assert_eq!(hosts_response, hosts),
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_request_is_decode_error() {
        let mut cursor = std::io::Cursor::new(b"not json".to_vec());
        let err = decode_request(&mut cursor).await.unwrap_err();
        assert!(matches!(err, NodeError::Decode(_)));
    }

    #[tokio::test]
    async fn time_response_does_not_decode_as_hosts() {
        let response = Response::Time { time_ms: 1_700_000_000_000 };
        let mut buf = Vec::new();
        encode_response(&mut buf, &response).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let decoded = decode_response(&mut cursor).await.unwrap().expect("non-empty body");
        match decoded {
            Response::Time { time_ms } => assert_eq!(time_ms, 1_700_000_000_000),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn start_response_does_not_decode_as_handshake() {
        let response = Response::Start { succeeded: true };
        let mut buf = Vec::new();
        encode_response(&mut buf, &response).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let decoded = decode_response(&mut cursor).await.unwrap().expect("non-empty body");
        assert!(matches!(decoded, Response::Start { succeeded: true }));
    }

    #[tokio::test]
    async fn hosts_response_round_trips_through_the_untagged_enum() {
        let response = Response::Hosts(HostsResponse::default());
        let mut buf = Vec::new();
        encode_response(&mut buf, &response).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let decoded = decode_response(&mut cursor).await.unwrap().expect("non-empty body");
        match decoded {
            Response::Hosts(hosts) => assert!(hosts.hosts.is_empty()),
            other => panic!("unexpected response: {other:?}"),
        }
    }
}
