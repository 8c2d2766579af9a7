//! Peer discovery: active subnet sweeping ([`sweep`]) and multicast
//! service advertise/browse ([`mdns`]).

pub mod mdns;
pub mod sweep;
