//! Core peer-coordination engine for the musique LAN rendezvous service.
//!
//! [`node::MusiqueNode`] is the host-facing facade; everything else is an
//! implementation detail it composes: wire [`codec`], [`rpc`] client,
//! request [`router`], [`selfaddr`] filter, [`discovery`] (subnet sweep +
//! mDNS), the [`membership`] store, the [`gossip`] synchronizer, the
//! [`timesync`] exchange and the [`trigger`] coordinator.

pub mod codec;
pub mod config;
pub mod discovery;
pub mod error;
pub mod gossip;
pub mod membership;
pub mod node;
pub mod router;
pub mod rpc;
pub mod selfaddr;
pub mod timesync;
pub mod trigger;

pub use config::NodeConfig;
pub use error::{NodeError, Result};
pub use node::MusiqueNode;
