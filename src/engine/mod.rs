//! Simulation engines reachable through in-process connections.
//!
//! The client core never computes physics; it routes [`Request`]s to an
//! engine and carries its [`Reply`] back. In-process methods call an engine
//! directly, servers host one behind a wire format, and the
//! [`BackendCatalog`] lets alternate engines be picked by name from a
//! tokenized options string (`--backend=<name> --key=value ...`).

mod reference;

pub use reference::ReferenceEngine;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::protocol::{Reply, Request};
use crate::types::{Error, Result};

/// Name of the engine used when options do not select one.
pub const DEFAULT_BACKEND: &str = "reference";

/// Something that answers protocol requests.
pub trait SimulationEngine: Send + fmt::Debug {
    /// Backend name, for logs and connection diagnostics.
    fn name(&self) -> &str;

    /// Handle one request. Always produces exactly one reply.
    fn handle(&mut self, request: Request) -> Reply;
}

/// Engine shared between an in-process transport and a published segment or
/// server. Async callers use `lock().await`, worker threads `blocking_lock()`.
pub type SharedEngine = Arc<Mutex<Box<dyn SimulationEngine>>>;

/// Wrap an engine for sharing.
pub fn shared(engine: impl SimulationEngine + 'static) -> SharedEngine {
    Arc::new(Mutex::new(Box::new(engine)))
}

// =============================================================================
// Engine options
// =============================================================================

/// Parsed `--key=value` / `--flag` tokens of an in-process options string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineOptions {
    values: BTreeMap<String, String>,
}

impl EngineOptions {
    /// Parse whitespace-separated tokens. Bare `--flag` is stored as `"true"`.
    pub fn parse<I, S>(tokens: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut values = BTreeMap::new();
        for token in tokens {
            let token = token.as_ref();
            let body = token.strip_prefix("--").ok_or_else(|| {
                Error::invalid_options(format!("expected --key[=value], got `{}`", token))
            })?;
            let (key, value) = match body.split_once('=') {
                Some((k, v)) => (k, v),
                None => (body, "true"),
            };
            if key.is_empty() {
                return Err(Error::invalid_options(format!("empty option name in `{}`", token)));
            }
            values.insert(key.to_string(), value.to_string());
        }
        Ok(Self { values })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Parse an option value, `Ok(None)` when absent.
    pub fn parsed<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw.parse().map(Some).map_err(|e| {
                Error::invalid_options(format!("--{}={}: {}", key, raw, e))
            }),
        }
    }

    /// Selected backend name, defaulting to [`DEFAULT_BACKEND`].
    pub fn backend(&self) -> &str {
        self.get("backend").unwrap_or(DEFAULT_BACKEND)
    }

    pub fn has_backend(&self) -> bool {
        self.values.contains_key("backend")
    }
}

// =============================================================================
// Backend catalog
// =============================================================================

/// Constructor for an engine from parsed options.
pub type EngineFactory =
    Arc<dyn Fn(&EngineOptions) -> Result<Box<dyn SimulationEngine>> + Send + Sync>;

/// Named engine factories available to in-process connections.
#[derive(Clone)]
pub struct BackendCatalog {
    factories: BTreeMap<String, EngineFactory>,
}

impl fmt::Debug for BackendCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendCatalog")
            .field("backends", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl BackendCatalog {
    /// Catalog with no backends registered.
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Register (or replace) a backend.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&EngineOptions) -> Result<Box<dyn SimulationEngine>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Build the engine selected by `options`.
    pub fn create(&self, options: &EngineOptions) -> Result<Box<dyn SimulationEngine>> {
        let name = options.backend();
        let factory = self.factories.get(name).ok_or_else(|| {
            Error::invalid_options(format!(
                "unknown backend `{}` (available: {})",
                name,
                self.names().collect::<Vec<_>>().join(", ")
            ))
        })?;
        factory(options)
    }
}

impl Default for BackendCatalog {
    /// Catalog with the reference engine registered under [`DEFAULT_BACKEND`].
    fn default() -> Self {
        let mut catalog = Self::empty();
        catalog.register(DEFAULT_BACKEND, |opts| {
            Ok(Box::new(ReferenceEngine::from_options(opts)?) as Box<dyn SimulationEngine>)
        });
        catalog
    }
}
