//! # simlink - client connection registry for a simulation service
//!
//! Provides:
//! - A registry of client connections addressed by small integer ids
//! - Pluggable transports (in-process, shared memory, UDP, TCP, RPC channel)
//! - A typed Command/Status protocol with exactly one status per command
//! - A reference engine and a server hosting it behind the wire formats
//!
//! ## Architecture
//!
//! ```text
//!                  ┌──────────────────────────────────────┐
//!   connect(...) → │          ConnectionRegistry          │
//!   submit(cmd)  → │  id → ClientSlot { transport, ... }  │
//!                  └───────────────┬──────────────────────┘
//!                                  │ Transport::exchange
//!          ┌───────────────┬───────┴───────┬───────────────┐
//!          ▼               ▼               ▼               ▼
//!     in-process      shared memory     TCP / RPC         UDP
//!          │               │               │               │
//!          └───────────────┴───────┬───────┴───────────────┘
//!                                  ▼
//!                          SimulationEngine
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

// Re-export public API
pub mod client;
pub mod engine;
pub mod ipc;
pub mod protocol;
pub mod server;
pub mod transport;
pub mod types;

// Internal utilities
pub mod observability;

pub use client::{interactive_connection_open, ConnectionInfo, ConnectionRegistry};
pub use protocol::{Command, CommandKind, Completion, Status, StatusKind};
pub use server::SimulationServer;
pub use transport::{ConnectOptions, ConnectionMethod};
pub use types::{ClientId, Config, Error, Result};
