//! Core types for the simlink client.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed integer handles (ClientId, BodyId, ShapeId, ...)
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Configuration structures for the registry, server and wire

mod config;
mod errors;
mod ids;

pub use config::{
    ClientConfig, Config, IpcConfig, LogFormat, ObservabilityConfig, ServerConfig,
    DEFAULT_MAX_CONNECTIONS, DEFAULT_MAX_FRAME_BYTES, DEFAULT_SHARED_MEMORY_KEY, DEFAULT_TCP_PORT,
    DEFAULT_UDP_PORT, SHARED_MEMORY_MAGIC,
};
pub use errors::{Error, Result};
pub use ids::{BodyId, ClientId, ShapeId, UserDataId};
