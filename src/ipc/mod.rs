//! Wire formats shared by networked transports and the simulation server.
//!
//! Length-prefixed msgpack frames for stream transports, single-message
//! datagrams for UDP, and the RPC envelope carried inside frames.

pub mod codec;
pub mod envelope;
