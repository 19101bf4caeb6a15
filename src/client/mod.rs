//! Client side: the connection registry and command submission.
//!
//! ```text
//! connect(method, options)
//!   → reserve lowest free id (capacity check)
//!   → interactive lease (exclusivity check)
//!   → transport::open
//!   → handshake: SyncBodyInfo, SyncUserData
//!   → slot stored under id
//!
//! submit(command) → resolve(id) → lock slot transport → dispatcher → Status
//! ```

mod dispatcher;
mod exclusivity;
mod registry;

pub use exclusivity::interactive_connection_open;
pub use registry::{ConnectionInfo, ConnectionRegistry};

#[cfg(test)]
pub(crate) mod tests {
    /// Serializes unit tests that take the process-wide interactive lease.
    pub(crate) static INTERACTIVE_TESTS: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());
}
