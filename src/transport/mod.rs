//! Pluggable transports between a client slot and a simulation engine.
//!
//! Every connection method maps to one concrete [`Transport`]. The registry
//! owns the boxed transport and drives it one request at a time; the
//! `&mut self` receiver of [`Transport::exchange`] makes a second in-flight
//! request on the same transport impossible.

mod in_process;
mod rpc;
mod shared_memory;
mod tcp;
mod udp;

pub use in_process::{DirectTransport, ThreadedTransport, VisualSurface};
pub use rpc::RpcTransport;
pub use shared_memory::{SegmentPublication, SharedMemoryTransport};
pub use tcp::TcpTransport;
pub use udp::UdpTransport;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::engine::{BackendCatalog, EngineOptions};
use crate::protocol::{Reply, Request};
use crate::types::{
    ClientConfig, Error, Result, DEFAULT_TCP_PORT, DEFAULT_UDP_PORT, SHARED_MEMORY_MAGIC,
};

/// Host used by networked methods when options name none.
pub const DEFAULT_HOST: &str = "127.0.0.1";

// =============================================================================
// Connection method
// =============================================================================

/// How a client slot reaches its engine. Fixed for the life of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMethod {
    InProcessDirect,
    InteractiveGui,
    InteractiveGuiServer,
    InteractiveGuiMainThread,
    SharedMemory,
    SharedMemoryServer,
    SharedMemoryGui,
    Udp,
    Tcp,
    RpcChannel,
    AlternateBackend,
}

impl ConnectionMethod {
    pub const ALL: [ConnectionMethod; 11] = [
        ConnectionMethod::InProcessDirect,
        ConnectionMethod::InteractiveGui,
        ConnectionMethod::InteractiveGuiServer,
        ConnectionMethod::InteractiveGuiMainThread,
        ConnectionMethod::SharedMemory,
        ConnectionMethod::SharedMemoryServer,
        ConnectionMethod::SharedMemoryGui,
        ConnectionMethod::Udp,
        ConnectionMethod::Tcp,
        ConnectionMethod::RpcChannel,
        ConnectionMethod::AlternateBackend,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionMethod::InProcessDirect => "in_process_direct",
            ConnectionMethod::InteractiveGui => "interactive_gui",
            ConnectionMethod::InteractiveGuiServer => "interactive_gui_server",
            ConnectionMethod::InteractiveGuiMainThread => "interactive_gui_main_thread",
            ConnectionMethod::SharedMemory => "shared_memory",
            ConnectionMethod::SharedMemoryServer => "shared_memory_server",
            ConnectionMethod::SharedMemoryGui => "shared_memory_gui",
            ConnectionMethod::Udp => "udp",
            ConnectionMethod::Tcp => "tcp",
            ConnectionMethod::RpcChannel => "rpc_channel",
            ConnectionMethod::AlternateBackend => "alternate_backend",
        }
    }

    /// Methods limited to one open connection per process.
    pub fn is_interactive(self) -> bool {
        matches!(
            self,
            ConnectionMethod::InteractiveGui | ConnectionMethod::InteractiveGuiServer
        )
    }

    /// Methods that drive a visual surface of their own.
    pub fn owns_surface(self) -> bool {
        matches!(
            self,
            ConnectionMethod::InteractiveGui
                | ConnectionMethod::InteractiveGuiServer
                | ConnectionMethod::InteractiveGuiMainThread
        )
    }
}

impl fmt::Display for ConnectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Connect options
// =============================================================================

/// Method-specific parameters for `connect`.
///
/// Shared-memory methods read `shared_memory_key` and `magic`, networked
/// methods `host` and `port`, in-process methods the tokenized `args`.
/// Unset fields fall back to the registry configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectOptions {
    #[serde(default)]
    pub shared_memory_key: Option<i32>,
    #[serde(default)]
    pub magic: Option<u32>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ConnectOptions {
    pub fn shared_memory(key: i32) -> Self {
        Self {
            shared_memory_key: Some(key),
            ..Self::default()
        }
    }

    pub fn network(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: Some(host.into()),
            port: Some(port),
            ..Self::default()
        }
    }

    /// Split a free-form options string on whitespace.
    pub fn tokenized(options: &str) -> Self {
        Self {
            args: options.split_whitespace().map(str::to_string).collect(),
            ..Self::default()
        }
    }

    pub fn with_magic(mut self, magic: u32) -> Self {
        self.magic = Some(magic);
        self
    }

    pub fn with_args(mut self, options: &str) -> Self {
        self.args = options.split_whitespace().map(str::to_string).collect();
        self
    }

    pub(crate) fn key_or(&self, config: &ClientConfig) -> i32 {
        self.shared_memory_key.unwrap_or(config.shared_memory_key)
    }

    pub(crate) fn magic_or_default(&self) -> u32 {
        self.magic.unwrap_or(SHARED_MEMORY_MAGIC)
    }

    /// `host:port`, defaulting the port per method.
    pub(crate) fn address(&self, default_port: u16) -> String {
        let host = self.host.as_deref().unwrap_or(DEFAULT_HOST);
        let port = self.port.unwrap_or(default_port);
        if host.contains(':') && !host.starts_with('[') {
            format!("[{}]:{}", host, port)
        } else {
            format!("{}:{}", host, port)
        }
    }

    pub(crate) fn engine_options(&self) -> Result<EngineOptions> {
        EngineOptions::parse(&self.args)
    }
}

// =============================================================================
// Transport trait
// =============================================================================

/// One live link to an engine.
#[async_trait]
pub trait Transport: Send + fmt::Debug {
    fn method(&self) -> ConnectionMethod;

    /// Liveness probe. False once the link is known to be broken.
    fn can_submit(&self) -> bool;

    /// Send one request and wait for its reply.
    ///
    /// An `Err` means the link broke; a `Reply::Failed` means the engine
    /// handled the request and rejected it.
    async fn exchange(&mut self, request: Request) -> Result<Reply>;

    /// Advisory bound on how long `exchange` waits for a reply.
    fn set_timeout(&mut self, timeout: Duration);

    /// Release the link. Idempotent.
    async fn close(&mut self);
}

/// What `open` needs besides the options themselves.
#[derive(Debug, Clone, Copy)]
pub(crate) struct OpenContext<'a> {
    pub catalog: &'a BackendCatalog,
    pub config: &'a ClientConfig,
}

/// Construct the transport for `method`.
pub(crate) async fn open(
    method: ConnectionMethod,
    options: &ConnectOptions,
    ctx: OpenContext<'_>,
) -> Result<Box<dyn Transport>> {
    let timeout = ctx.config.default_timeout;
    let mut transport: Box<dyn Transport> = match method {
        ConnectionMethod::InProcessDirect | ConnectionMethod::InteractiveGuiMainThread => {
            let engine = ctx.catalog.create(&options.engine_options()?)?;
            let surface = method.owns_surface().then(|| VisualSurface::new(method));
            Box::new(DirectTransport::new(method, engine, surface))
        }
        ConnectionMethod::AlternateBackend => {
            let engine_options = options.engine_options()?;
            if !engine_options.has_backend() {
                return Err(Error::invalid_options(
                    "alternate backend connections need a --backend=<name> token",
                ));
            }
            let engine = ctx.catalog.create(&engine_options)?;
            Box::new(DirectTransport::new(method, engine, None))
        }
        ConnectionMethod::SharedMemoryServer => {
            let engine = ctx.catalog.create(&options.engine_options()?)?;
            let mut transport = DirectTransport::new(method, engine, None);
            let publication = SegmentPublication::publish(
                options.key_or(ctx.config),
                options.magic_or_default(),
                ctx.config.shared_memory_capacity,
                transport.engine(),
            )
            .map_err(|e| Error::transport_open(method, e.to_string()))?;
            transport.attach_publication(publication);
            Box::new(transport)
        }
        ConnectionMethod::InteractiveGui | ConnectionMethod::InteractiveGuiServer => {
            let engine = ctx.catalog.create(&options.engine_options()?)?;
            let publish_key = (method == ConnectionMethod::InteractiveGuiServer).then(|| {
                (
                    options.key_or(ctx.config),
                    options.magic_or_default(),
                    ctx.config.shared_memory_capacity,
                )
            });
            Box::new(ThreadedTransport::spawn(method, engine, publish_key)?)
        }
        ConnectionMethod::SharedMemory | ConnectionMethod::SharedMemoryGui => {
            Box::new(SharedMemoryTransport::attach(
                method,
                options.key_or(ctx.config),
                options.magic_or_default(),
            )?)
        }
        ConnectionMethod::Tcp => Box::new(
            TcpTransport::connect(
                &options.address(DEFAULT_TCP_PORT),
                timeout,
                ctx.config.max_frame_bytes,
            )
            .await?,
        ),
        ConnectionMethod::RpcChannel => Box::new(
            RpcTransport::connect(
                &options.address(DEFAULT_TCP_PORT),
                timeout,
                ctx.config.max_frame_bytes,
            )
            .await?,
        ),
        ConnectionMethod::Udp => {
            Box::new(UdpTransport::connect(&options.address(DEFAULT_UDP_PORT), timeout).await?)
        }
    };
    transport.set_timeout(timeout);
    tracing::debug!(method = %method, "transport opened");
    Ok(transport)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interactive_set() {
        let interactive: Vec<_> = ConnectionMethod::ALL
            .into_iter()
            .filter(|m| m.is_interactive())
            .collect();
        assert_eq!(
            interactive,
            vec![
                ConnectionMethod::InteractiveGui,
                ConnectionMethod::InteractiveGuiServer
            ]
        );
        assert!(ConnectionMethod::InteractiveGuiMainThread.owns_surface());
        assert!(!ConnectionMethod::InteractiveGuiMainThread.is_interactive());
        assert!(!ConnectionMethod::SharedMemoryGui.owns_surface());
    }

    #[test]
    fn test_method_names() {
        assert_eq!(ConnectionMethod::Tcp.to_string(), "tcp");
        assert_eq!(
            serde_json::to_string(&ConnectionMethod::RpcChannel).unwrap(),
            "\"rpc_channel\""
        );
    }

    #[test]
    fn test_options_defaults() {
        let config = ClientConfig::default();
        let opts = ConnectOptions::default();
        assert_eq!(opts.key_or(&config), config.shared_memory_key);
        assert_eq!(opts.magic_or_default(), SHARED_MEMORY_MAGIC);
        assert_eq!(opts.address(DEFAULT_UDP_PORT), "127.0.0.1:1234");

        let v6 = ConnectOptions::network("::1", 7000);
        assert_eq!(v6.address(DEFAULT_TCP_PORT), "[::1]:7000");
    }

    #[test]
    fn test_tokenized_options() {
        let opts = ConnectOptions::tokenized("  --backend=reference   --time-step=0.01 ");
        assert_eq!(opts.args, vec!["--backend=reference", "--time-step=0.01"]);
        let engine = opts.engine_options().unwrap();
        assert_eq!(engine.backend(), "reference");

        assert!(ConnectOptions::tokenized("gui").engine_options().is_err());
    }
}
