use thiserror::Error;

/// Error taxonomy for the peer-coordination engine.
///
/// Per-peer failures inside discovery, gossip, timesync and the trigger
/// coordinator are logged and dropped by their callers; they are never
/// propagated past the batch that produced them. This type exists for the
/// failures that *do* need to reach a caller: a single RPC, a bind, or
/// startup.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("rpc to {target} timed out")]
    Timeout { target: String },

    #[error("failed to connect to {target}: {source}")]
    ConnectFailure {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode wire payload: {0}")]
    Decode(String),

    #[error("failed to encode wire payload: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("could not find a local address in the same subnet as {remote}")]
    AddressResolutionFailure { remote: String },

    #[error("mDNS discovery backend failed: {0}")]
    DiscoveryBackendFailure(String),

    #[error("fatal startup error: {0}")]
    FatalStartup(String),
}

pub type Result<T> = std::result::Result<T, NodeError>;
