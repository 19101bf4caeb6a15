//! Connection registry - owns every client slot and its transport.
//!
//! Ids are small integers handed out lowest-free-first. A slot is live while
//! the registry holds it and its transport's probe succeeds; `resolve` is the
//! one place a broken slot is evicted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::dispatcher::CommandDispatcher;
use super::exclusivity::InteractiveLease;
use crate::engine::BackendCatalog;
use crate::protocol::{
    BodyInfo, Command, CommandKind, CommandParams, Completion, Request, Status, UserDataEntry,
};
use crate::transport::{self, ConnectOptions, ConnectionMethod, OpenContext, Transport};
use crate::types::{ClientConfig, ClientId, Error, Result};

// =============================================================================
// Slots
// =============================================================================

/// One live connection.
#[derive(Debug)]
pub(crate) struct ClientSlot {
    id: ClientId,
    method: ConnectionMethod,
    connected_at: DateTime<Utc>,
    transport: tokio::sync::Mutex<Box<dyn Transport>>,
    bodies: Vec<BodyInfo>,
    user_data: Vec<UserDataEntry>,
    lease: Mutex<Option<InteractiveLease>>,
}

impl ClientSlot {
    /// Release the interactive lease and close the transport. Waits for an
    /// in-flight exchange to finish first.
    async fn teardown(&self) {
        drop(
            self.lease
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        self.transport.lock().await.close().await;
    }
}

#[derive(Debug)]
enum Entry {
    Vacant,
    Reserved,
    Occupied(Arc<ClientSlot>),
}

/// Slot storage with a free-list of vacated ids.
#[derive(Debug, Default)]
struct SlotTable {
    entries: Vec<Entry>,
    free: BTreeSet<u32>,
    /// Reserved plus occupied entries.
    len: usize,
}

impl SlotTable {
    fn reserve(&mut self, capacity: usize) -> Option<ClientId> {
        if self.len >= capacity {
            return None;
        }
        let raw = match self.free.pop_first() {
            Some(raw) => {
                self.entries[raw as usize] = Entry::Reserved;
                raw
            }
            None => {
                let raw = u32::try_from(self.entries.len()).ok()?;
                self.entries.push(Entry::Reserved);
                raw
            }
        };
        self.len += 1;
        Some(ClientId::new(raw))
    }

    fn fill(&mut self, slot: Arc<ClientSlot>) {
        if let Some(entry) = self.entries.get_mut(slot.id.index()) {
            *entry = Entry::Occupied(slot);
        }
    }

    fn get(&self, id: ClientId) -> Option<Arc<ClientSlot>> {
        match self.entries.get(id.index()) {
            Some(Entry::Occupied(slot)) => Some(slot.clone()),
            _ => None,
        }
    }

    /// Vacate `id`, returning the slot it held.
    fn release(&mut self, id: ClientId) -> Option<Arc<ClientSlot>> {
        let entry = self.entries.get_mut(id.index())?;
        match std::mem::replace(entry, Entry::Vacant) {
            Entry::Vacant => None,
            Entry::Reserved => {
                self.free.insert(id.get());
                self.len -= 1;
                None
            }
            Entry::Occupied(slot) => {
                self.free.insert(id.get());
                self.len -= 1;
                Some(slot)
            }
        }
    }

    /// Vacate `slot.id` only if it still holds this very slot.
    fn release_if_current(&mut self, slot: &Arc<ClientSlot>) -> bool {
        let current = self.get(slot.id).is_some_and(|held| Arc::ptr_eq(&held, slot));
        if current {
            self.release(slot.id);
        }
        current
    }

    fn occupied(&self) -> impl Iterator<Item = &Arc<ClientSlot>> {
        self.entries.iter().filter_map(|entry| match entry {
            Entry::Occupied(slot) => Some(slot),
            _ => None,
        })
    }
}

/// Frees a reserved id unless the connect that reserved it completes.
struct Reservation<'a> {
    registry: &'a ConnectionRegistry,
    id: ClientId,
    armed: bool,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.registry.lock_table().release(self.id);
        }
    }
}

/// Snapshot answer of [`ConnectionRegistry::connection_info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub connected: bool,
    pub method: Option<ConnectionMethod>,
    pub connected_at: Option<DateTime<Utc>>,
}

impl ConnectionInfo {
    fn disconnected() -> Self {
        Self {
            connected: false,
            method: None,
            connected_at: None,
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Owner of all client connections.
///
/// Operations take `&self`; share the registry between tasks with an `Arc`.
/// Commands to different ids proceed concurrently, commands to the same id
/// queue on that slot's transport.
pub struct ConnectionRegistry {
    config: ClientConfig,
    catalog: BackendCatalog,
    table: Mutex<SlotTable>,
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("max_connections", &self.config.max_connections)
            .field("len", &self.len())
            .field("catalog", &self.catalog)
            .finish()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl ConnectionRegistry {
    pub fn new(config: ClientConfig) -> Self {
        Self::with_catalog(config, BackendCatalog::default())
    }

    /// Registry whose in-process connections build engines from `catalog`.
    pub fn with_catalog(config: ClientConfig, catalog: BackendCatalog) -> Self {
        Self {
            config,
            catalog,
            table: Mutex::new(SlotTable::default()),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn lock_table(&self) -> MutexGuard<'_, SlotTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Open a connection, run the handshake and return the new slot's id.
    pub async fn connect(&self, method: ConnectionMethod, options: ConnectOptions) -> Result<ClientId> {
        let capacity = self.config.max_connections;
        let id = self
            .lock_table()
            .reserve(capacity)
            .ok_or(Error::CapacityExceeded { capacity })?;
        let mut reservation = Reservation {
            registry: self,
            id,
            armed: true,
        };

        match self.establish(id, method, &options).await {
            Ok(slot) => {
                let bodies = slot.bodies.len();
                self.lock_table().fill(Arc::new(slot));
                reservation.armed = false;
                tracing::info!(
                    "client_connected: id={}, method={}, bodies={}",
                    id,
                    method,
                    bodies
                );
                Ok(id)
            }
            Err(e) => {
                tracing::warn!("client_connect_failed: method={}, error={}", method, e);
                Err(e)
            }
        }
    }

    async fn establish(
        &self,
        id: ClientId,
        method: ConnectionMethod,
        options: &ConnectOptions,
    ) -> Result<ClientSlot> {
        let lease = if method.is_interactive() {
            Some(InteractiveLease::acquire().ok_or(Error::ExclusivityViolation(method))?)
        } else {
            None
        };

        let ctx = OpenContext {
            catalog: &self.catalog,
            config: &self.config,
        };
        let mut transport = transport::open(method, options, ctx).await?;

        let (bodies, user_data) = match handshake(transport.as_mut(), method).await {
            Ok(synced) => synced,
            Err(e) => {
                transport.close().await;
                return Err(e);
            }
        };

        Ok(ClientSlot {
            id,
            method,
            connected_at: Utc::now(),
            transport: tokio::sync::Mutex::new(transport),
            bodies,
            user_data,
            lease: Mutex::new(lease),
        })
    }

    /// Close the connection and free its id. Unknown ids are ignored.
    pub async fn disconnect(&self, id: ClientId) {
        let released = self.lock_table().release(id);
        if let Some(slot) = released {
            slot.teardown().await;
            tracing::info!("client_disconnected: id={}, method={}", id, slot.method);
        }
    }

    /// Close every connection.
    pub async fn disconnect_all(&self) {
        let slots: Vec<Arc<ClientSlot>> = {
            let mut table = self.lock_table();
            let ids: Vec<ClientId> = table.occupied().map(|slot| slot.id).collect();
            ids.into_iter().filter_map(|id| table.release(id)).collect()
        };
        for slot in slots {
            slot.teardown().await;
            tracing::info!("client_disconnected: id={}, method={}", slot.id, slot.method);
        }
    }

    /// Look up a live slot, evicting it when its transport is broken.
    ///
    /// A slot whose transport is mid-exchange counts as live.
    pub(crate) async fn resolve(&self, id: ClientId) -> Result<Arc<ClientSlot>> {
        let slot = self.lock_table().get(id).ok_or(Error::NotConnected(id))?;
        let alive = match slot.transport.try_lock() {
            Ok(transport) => transport.can_submit(),
            Err(_) => true,
        };
        if alive {
            return Ok(slot);
        }

        let evicted = self.lock_table().release_if_current(&slot);
        if evicted {
            tracing::warn!("client_evicted: id={}, method={}", id, slot.method);
            slot.teardown().await;
        }
        Err(Error::NotConnected(id))
    }

    pub async fn is_connected(&self, id: ClientId) -> bool {
        self.resolve(id).await.is_ok()
    }

    pub async fn connection_info(&self, id: ClientId) -> ConnectionInfo {
        match self.resolve(id).await {
            Ok(slot) => ConnectionInfo {
                connected: true,
                method: Some(slot.method),
                connected_at: Some(slot.connected_at),
            },
            Err(_) => ConnectionInfo::disconnected(),
        }
    }

    /// Bound how long the connection's transport waits for each reply.
    pub async fn set_timeout(&self, id: ClientId, timeout: Duration) -> Result<()> {
        let slot = self.resolve(id).await?;
        slot.transport.lock().await.set_timeout(timeout);
        tracing::debug!("client_timeout_set: id={}, timeout={:?}", id, timeout);
        Ok(())
    }

    /// Body table captured by the connect handshake.
    pub async fn synced_bodies(&self, id: ClientId) -> Result<Vec<BodyInfo>> {
        Ok(self.resolve(id).await?.bodies.clone())
    }

    /// User data captured by the connect handshake.
    pub async fn synced_user_data(&self, id: ClientId) -> Result<Vec<UserDataEntry>> {
        Ok(self.resolve(id).await?.user_data.clone())
    }

    /// Ids currently held, ascending. Does not probe transports.
    pub fn live_ids(&self) -> Vec<ClientId> {
        self.lock_table().occupied().map(|slot| slot.id).collect()
    }

    /// Number of held slots, including connects still in progress.
    pub fn len(&self) -> usize {
        self.lock_table().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Start a command for a live connection.
    pub async fn init_command<P: CommandParams>(&self, id: ClientId, params: P) -> Result<Command<P>> {
        self.resolve(id).await?;
        Ok(Command::new(id, params))
    }

    /// Submit a command and wait for its status.
    ///
    /// `Err(NotConnected)` when the target does not resolve; otherwise
    /// exactly one [`Status`].
    pub async fn submit<P: CommandParams>(&self, command: Command<P>) -> Result<Status> {
        let id = command.target();
        let slot = self.resolve(id).await?;
        let request = command.into_request();
        let kind = request.kind();

        let mut transport = slot.transport.lock().await;
        let current = self
            .lock_table()
            .get(id)
            .is_some_and(|held| Arc::ptr_eq(&held, &slot));
        if !current {
            return Err(Error::NotConnected(id));
        }

        let status = CommandDispatcher::submit(&mut **transport, request).await;
        tracing::debug!("command_submitted: id={}, kind={}, status={}", id, kind, status.kind());
        Ok(status)
    }
}

impl Drop for ConnectionRegistry {
    fn drop(&mut self) {
        let table = self.table.get_mut().unwrap_or_else(PoisonError::into_inner);
        for slot in table.occupied() {
            drop(
                slot.lease
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take(),
            );
        }
    }
}

/// SyncBodyInfo then SyncUserData; each must return its own completion.
async fn handshake(
    transport: &mut dyn Transport,
    method: ConnectionMethod,
) -> Result<(Vec<BodyInfo>, Vec<UserDataEntry>)> {
    let status = CommandDispatcher::submit(transport, Request::SyncBodyInfo).await;
    let Completion::BodyInfoSynced { bodies } = expect_completion(status, CommandKind::SyncBodyInfo, method)?
    else {
        return Err(Error::handshake(method, "sync body info returned no body table"));
    };

    let status = CommandDispatcher::submit(transport, Request::SyncUserData).await;
    let Completion::UserDataSynced { entries } = expect_completion(status, CommandKind::SyncUserData, method)?
    else {
        return Err(Error::handshake(method, "sync user data returned no entries"));
    };

    tracing::debug!(
        "handshake_completed: method={}, bodies={}, user_data={}",
        method,
        bodies.len(),
        entries.len()
    );
    Ok((bodies, entries))
}

fn expect_completion(status: Status, kind: CommandKind, method: ConnectionMethod) -> Result<Completion> {
    status
        .into_completion(kind)
        .map_err(|e| Error::handshake(method, e.to_string()))
}
