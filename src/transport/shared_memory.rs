//! Shared-memory transport.
//!
//! A server publishes its engine as a segment under an integer key; a client
//! attaches to the segment by key and checks its magic. The segment is a
//! fixed-capacity mailbox holding at most one command and one status, with
//! monotonically increasing client/processed counters:
//!
//! ```text
//! client                          segment                          server
//!   │ post_command ──────▶ command, num_client_commands += 1           │
//!   │                      command_posted ─────────────────▶ take_command
//!   │                                                 engine.handle ◀──┤
//!   │                      status, num_processed_commands += 1 ◀── post_status
//!   │ take_status ◀─────── status_posted                               │
//! ```
//!
//! Segments live in a process-wide table; a key can be published once at a
//! time and attached by one client at a time.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::{ConnectionMethod, Transport};
use crate::engine::SharedEngine;
use crate::ipc::codec::{decode_msgpack, encode_msgpack};
use crate::protocol::{Reply, Request};
use crate::types::{Error, Result};

type SegmentTable = Mutex<HashMap<i32, Weak<Segment>>>;

fn segments() -> &'static SegmentTable {
    static SEGMENTS: OnceLock<SegmentTable> = OnceLock::new();
    SEGMENTS.get_or_init(|| Mutex::new(HashMap::new()))
}

fn lock_segments() -> MutexGuard<'static, HashMap<i32, Weak<Segment>>> {
    segments().lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct Mailbox {
    command: Option<Vec<u8>>,
    status: Option<Vec<u8>>,
    num_client_commands: u64,
    num_processed_commands: u64,
}

struct Segment {
    key: i32,
    magic: u32,
    capacity: usize,
    mailbox: Mutex<Mailbox>,
    command_posted: Notify,
    status_posted: Notify,
    closed: AtomicBool,
    attached: AtomicBool,
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("key", &self.key)
            .field("magic", &format_args!("{:#x}", self.magic))
            .field("capacity", &self.capacity)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Segment {
    fn mailbox(&self) -> MutexGuard<'_, Mailbox> {
        self.mailbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn post_command(&self, command: Vec<u8>) {
        {
            let mut mailbox = self.mailbox();
            mailbox.status = None;
            mailbox.command = Some(command);
            mailbox.num_client_commands += 1;
        }
        self.command_posted.notify_one();
    }

    fn take_command(&self) -> Option<Vec<u8>> {
        self.mailbox().command.take()
    }

    fn post_status(&self, status: Vec<u8>) {
        {
            let mut mailbox = self.mailbox();
            mailbox.status = Some(status);
            mailbox.num_processed_commands += 1;
        }
        self.status_posted.notify_one();
    }

    fn take_status(&self) -> Option<Vec<u8>> {
        self.mailbox().status.take()
    }

    fn counters(&self) -> (u64, u64) {
        let mailbox = self.mailbox();
        (mailbox.num_client_commands, mailbox.num_processed_commands)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.status_posted.notify_waiters();
        self.command_posted.notify_waiters();
    }

    async fn next_command(&self, cancel: &CancellationToken) -> Option<Vec<u8>> {
        loop {
            let notified = self.command_posted.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(command) = self.take_command() {
                return Some(command);
            }
            if self.is_closed() {
                return None;
            }
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = &mut notified => {}
            }
        }
    }

    async fn next_status(&self) -> Result<Vec<u8>> {
        loop {
            let notified = self.status_posted.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(status) = self.take_status() {
                return Ok(status);
            }
            if self.is_closed() {
                return Err(Error::protocol(format!(
                    "shared memory segment {} was closed",
                    self.key
                )));
            }
            notified.await;
        }
    }
}

// =============================================================================
// Server side
// =============================================================================

/// A published segment. Services commands against the engine until dropped.
#[derive(Debug)]
pub struct SegmentPublication {
    segment: Arc<Segment>,
    cancel: CancellationToken,
}

impl SegmentPublication {
    /// Publish `engine` under `key`. Fails when the key is already published.
    /// Must be called within a tokio runtime.
    pub fn publish(key: i32, magic: u32, capacity: usize, engine: SharedEngine) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;

        let segment = {
            let mut table = lock_segments();
            if table
                .get(&key)
                .and_then(Weak::upgrade)
                .is_some_and(|s| !s.is_closed())
            {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::AddrInUse,
                    format!("shared memory key {} is already published", key),
                )));
            }
            let segment = Arc::new(Segment {
                key,
                magic,
                capacity,
                mailbox: Mutex::new(Mailbox::default()),
                command_posted: Notify::new(),
                status_posted: Notify::new(),
                closed: AtomicBool::new(false),
                attached: AtomicBool::new(false),
            });
            table.insert(key, Arc::downgrade(&segment));
            segment
        };

        let cancel = CancellationToken::new();
        runtime.spawn(service(segment.clone(), engine, cancel.clone()));
        tracing::info!(key, capacity, "shared memory segment published");
        Ok(Self { segment, cancel })
    }

    pub fn key(&self) -> i32 {
        self.segment.key
    }

    /// `(num_client_commands, num_processed_commands)`.
    pub fn counters(&self) -> (u64, u64) {
        self.segment.counters()
    }
}

impl Drop for SegmentPublication {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.segment.close();
        let mut table = lock_segments();
        let ours = table
            .get(&self.segment.key)
            .is_some_and(|w| std::ptr::eq(w.as_ptr(), Arc::as_ptr(&self.segment)));
        if ours {
            table.remove(&self.segment.key);
        }
        tracing::info!(key = self.segment.key, "shared memory segment unpublished");
    }
}

async fn service(segment: Arc<Segment>, engine: SharedEngine, cancel: CancellationToken) {
    while let Some(command) = segment.next_command(&cancel).await {
        let status = match decode_msgpack::<Request>(&command) {
            Ok(request) => {
                let kind = request.kind();
                let reply = engine.lock().await.handle(request);
                match encode_msgpack(&reply) {
                    Ok(bytes) if bytes.len() <= segment.capacity => bytes,
                    Ok(_) => encode_msgpack(&Reply::failed(
                        kind,
                        "status exceeds shared memory capacity",
                    ))
                    .unwrap_or_default(),
                    Err(_) => Vec::new(),
                }
            }
            Err(e) => {
                tracing::warn!(key = segment.key, "undecodable shared memory command: {}", e);
                Vec::new()
            }
        };
        segment.post_status(status);
    }
    tracing::debug!(key = segment.key, "shared memory service stopped");
}

// =============================================================================
// Client side
// =============================================================================

/// Client end of a published segment. Used by `SharedMemory` and
/// `SharedMemoryGui`.
#[derive(Debug)]
pub struct SharedMemoryTransport {
    method: ConnectionMethod,
    segment: Option<Arc<Segment>>,
    timeout: Duration,
    broken: bool,
}

impl SharedMemoryTransport {
    pub fn attach(method: ConnectionMethod, key: i32, magic: u32) -> Result<Self> {
        let segment = lock_segments()
            .get(&key)
            .and_then(Weak::upgrade)
            .filter(|s| !s.is_closed())
            .ok_or_else(|| {
                Error::transport_open(
                    method,
                    format!("no shared memory segment published under key {}", key),
                )
            })?;
        if segment.magic != magic {
            return Err(Error::transport_open(
                method,
                format!(
                    "segment {} has magic {:#x}, expected {:#x}",
                    key, segment.magic, magic
                ),
            ));
        }
        if segment.attached.swap(true, Ordering::AcqRel) {
            return Err(Error::transport_open(
                method,
                format!("segment {} already has an attached client", key),
            ));
        }
        tracing::debug!(key, "attached to shared memory segment");
        Ok(Self {
            method,
            segment: Some(segment),
            timeout: Duration::from_secs(10),
            broken: false,
        })
    }

    async fn round_trip(&mut self, request: Request) -> Result<Reply> {
        let segment = self
            .segment
            .as_ref()
            .ok_or_else(|| Error::protocol("shared memory transport closed"))?;
        if segment.is_closed() {
            return Err(Error::protocol(format!(
                "shared memory segment {} was closed",
                segment.key
            )));
        }

        let kind = request.kind();
        let command = encode_msgpack(&request)?;
        if command.len() > segment.capacity {
            return Ok(Reply::failed(
                kind,
                format!(
                    "command of {} bytes exceeds shared memory capacity {}",
                    command.len(),
                    segment.capacity
                ),
            ));
        }

        segment.post_command(command);
        let status = tokio::time::timeout(self.timeout, segment.next_status())
            .await
            .map_err(|_| {
                Error::timeout(format!("no status from segment {} within {:?}", segment.key, self.timeout))
            })??;
        if status.is_empty() {
            return Err(Error::protocol("server could not process the command"));
        }
        decode_msgpack(&status)
    }

    fn detach(&mut self) {
        if let Some(segment) = self.segment.take() {
            segment.attached.store(false, Ordering::Release);
        }
    }
}

#[async_trait]
impl Transport for SharedMemoryTransport {
    fn method(&self) -> ConnectionMethod {
        self.method
    }

    fn can_submit(&self) -> bool {
        !self.broken && self.segment.as_ref().is_some_and(|s| !s.is_closed())
    }

    async fn exchange(&mut self, request: Request) -> Result<Reply> {
        let result = self.round_trip(request).await;
        if result.is_err() {
            self.broken = true;
        }
        result
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    async fn close(&mut self) {
        self.detach();
    }
}

impl Drop for SharedMemoryTransport {
    fn drop(&mut self) {
        self.detach();
    }
}
