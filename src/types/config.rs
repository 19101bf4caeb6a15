//! Configuration structures.
//!
//! Configuration is built from defaults and overridden from `SIMLINK_*`
//! environment variables.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Versioned magic stamped into every shared-memory segment header. Bump when
/// the mailbox layout or the `Request`/`Reply` encoding changes.
pub const SHARED_MEMORY_MAGIC: u32 = 0x5349_0007;

/// Default shared-memory connection key.
pub const DEFAULT_SHARED_MEMORY_KEY: i32 = 12347;

/// Default UDP port of a simulation server.
pub const DEFAULT_UDP_PORT: u16 = 1234;

/// Default TCP port of a simulation server (also used by the RPC channel).
pub const DEFAULT_TCP_PORT: u16 = 6667;

/// Default largest frame payload accepted on either end of a stream.
pub const DEFAULT_MAX_FRAME_BYTES: u32 = 5 * 1024 * 1024;

/// Default maximum number of simultaneously open client connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 1024;

/// Global configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Client registry configuration.
    #[serde(default)]
    pub client: ClientConfig,

    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Wire transport configuration.
    #[serde(default)]
    pub ipc: IpcConfig,
}

impl Config {
    /// Defaults overridden by any `SIMLINK_*` variables present in the
    /// environment. Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        let vars: Vec<(String, String)> = std::env::vars()
            .filter(|(k, _)| k.starts_with("SIMLINK_"))
            .collect();
        config.apply_overrides(vars);
        config
    }

    fn apply_overrides<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            match key.as_str() {
                "SIMLINK_MAX_CONNECTIONS" => {
                    set_parsed(&key, &value, &mut self.client.max_connections)
                }
                "SIMLINK_SHARED_MEMORY_KEY" => {
                    set_parsed(&key, &value, &mut self.client.shared_memory_key)
                }
                "SIMLINK_TIMEOUT" => match humantime_serde::re::humantime::parse_duration(&value) {
                    Ok(d) => self.client.default_timeout = d,
                    Err(e) => tracing::warn!(%key, %value, "ignoring override: {}", e),
                },
                "SIMLINK_TCP_ADDR" => self.server.tcp_addr = value,
                "SIMLINK_UDP_ADDR" => self.server.udp_addr = value,
                "SIMLINK_MAX_FRAME_BYTES" => {
                    set_parsed(&key, &value, &mut self.ipc.max_frame_bytes);
                    self.client.max_frame_bytes = self.ipc.max_frame_bytes;
                }
                "SIMLINK_LOG_LEVEL" => self.observability.log_level = value,
                "SIMLINK_LOG_FORMAT" => match LogFormat::from_name(&value) {
                    Some(format) => self.observability.log_format = format,
                    None => tracing::warn!(%key, %value, "ignoring override: unknown log format"),
                },
                _ => {}
            }
        }
    }
}

fn set_parsed<T: std::str::FromStr>(key: &str, value: &str, slot: &mut T)
where
    T::Err: std::fmt::Display,
{
    match value.parse() {
        Ok(v) => *slot = v,
        Err(e) => tracing::warn!(%key, %value, "ignoring override: {}", e),
    }
}

/// Client registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Maximum simultaneously open connections.
    pub max_connections: usize,

    /// Advisory time-out applied to each new transport.
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,

    /// Key used by shared-memory methods when options omit one.
    pub shared_memory_key: i32,

    /// Byte capacity of each direction of a shared-memory mailbox.
    pub shared_memory_capacity: usize,

    /// Largest reply frame the TCP and RPC channel transports will read.
    /// Keep in step with the server's `ipc.max_frame_bytes`.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: u32,
}

fn default_max_frame_bytes() -> u32 {
    DEFAULT_MAX_FRAME_BYTES
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            default_timeout: Duration::from_secs(10),
            shared_memory_key: DEFAULT_SHARED_MEMORY_KEY,
            shared_memory_capacity: 4 * 1024 * 1024,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// TCP (plain + RPC) listen address.
    pub tcp_addr: String,

    /// UDP listen address.
    pub udp_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tcp_addr: format!("127.0.0.1:{}", DEFAULT_TCP_PORT),
            udp_addr: format!("127.0.0.1:{}", DEFAULT_UDP_PORT),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Output format of the fmt layer.
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl LogFormat {
    /// Case-insensitive `compact` / `text` / `json`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "compact" | "text" => Some(LogFormat::Compact),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
        }
    }
}

/// Wire transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcConfig {
    /// Maximum frame payload size in bytes.
    pub max_frame_bytes: u32,

    /// Maximum concurrent TCP connections accepted by a server.
    pub max_connections: usize,

    /// Read timeout in seconds per frame on the server side. Idle
    /// connections beyond this duration are dropped.
    pub read_timeout_secs: u64,

    /// Write timeout in seconds per frame on the server side.
    pub write_timeout_secs: u64,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            max_connections: 1000,
            read_timeout_secs: 300,
            write_timeout_secs: 10,
        }
    }
}
