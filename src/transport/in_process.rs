//! In-process transports: the engine lives in this process.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};

use super::shared_memory::SegmentPublication;
use super::{ConnectionMethod, Transport};
use crate::engine::{SharedEngine, SimulationEngine};
use crate::protocol::{Reply, Request};
use crate::types::{Error, Result};

/// Stand-in for the window an interactive connection renders into.
/// Counts presented frames; one frame per simulation step.
#[derive(Debug)]
pub struct VisualSurface {
    title: String,
    frames: AtomicU64,
}

impl VisualSurface {
    pub fn new(method: ConnectionMethod) -> Self {
        Self {
            title: format!("simlink {}", method),
            frames: AtomicU64::new(0),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    fn present(&self) {
        let frame = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::trace!(surface = %self.title, frame, "frame presented");
    }
}

fn share(engine: Box<dyn SimulationEngine>) -> SharedEngine {
    Arc::new(Mutex::new(engine))
}

// =============================================================================
// Direct
// =============================================================================

/// Calls the engine on the caller's task. Used by `InProcessDirect`,
/// `InteractiveGuiMainThread`, `SharedMemoryServer` and `AlternateBackend`.
#[derive(Debug)]
pub struct DirectTransport {
    method: ConnectionMethod,
    engine: SharedEngine,
    surface: Option<VisualSurface>,
    publication: Option<SegmentPublication>,
    closed: bool,
}

impl DirectTransport {
    pub fn new(
        method: ConnectionMethod,
        engine: Box<dyn SimulationEngine>,
        surface: Option<VisualSurface>,
    ) -> Self {
        Self {
            method,
            engine: share(engine),
            surface,
            publication: None,
            closed: false,
        }
    }

    /// Handle to the engine, for publishing it elsewhere.
    pub fn engine(&self) -> SharedEngine {
        self.engine.clone()
    }

    pub fn surface(&self) -> Option<&VisualSurface> {
        self.surface.as_ref()
    }

    /// Keep a shared-memory publication alive for as long as this transport.
    pub fn attach_publication(&mut self, publication: SegmentPublication) {
        self.publication = Some(publication);
    }
}

#[async_trait]
impl Transport for DirectTransport {
    fn method(&self) -> ConnectionMethod {
        self.method
    }

    fn can_submit(&self) -> bool {
        !self.closed
    }

    async fn exchange(&mut self, request: Request) -> Result<Reply> {
        if self.closed {
            return Err(Error::protocol("in-process engine already closed"));
        }
        let stepped = matches!(request, Request::StepSimulation);
        let reply = self.engine.lock().await.handle(request);
        if stepped {
            if let Some(surface) = &self.surface {
                surface.present();
            }
        }
        Ok(reply)
    }

    fn set_timeout(&mut self, _timeout: Duration) {}

    async fn close(&mut self) {
        self.closed = true;
        self.publication = None;
    }
}

// =============================================================================
// Threaded
// =============================================================================

type Job = (Request, oneshot::Sender<Reply>);

/// Runs the engine on a dedicated worker thread that owns the surface.
/// Used by `InteractiveGui` and `InteractiveGuiServer`.
#[derive(Debug)]
pub struct ThreadedTransport {
    method: ConnectionMethod,
    jobs: Option<mpsc::Sender<Job>>,
    worker: Option<JoinHandle<()>>,
    surface: Arc<VisualSurface>,
    publication: Option<SegmentPublication>,
    timeout: Duration,
    broken: bool,
}

impl ThreadedTransport {
    /// Start the worker. `publish` is `(key, magic, capacity)` of a segment
    /// to expose the engine through.
    pub fn spawn(
        method: ConnectionMethod,
        engine: Box<dyn SimulationEngine>,
        publish: Option<(i32, u32, usize)>,
    ) -> Result<Self> {
        let engine = share(engine);
        let publication = match publish {
            Some((key, magic, capacity)) => Some(
                SegmentPublication::publish(key, magic, capacity, engine.clone())
                    .map_err(|e| Error::transport_open(method, e.to_string()))?,
            ),
            None => None,
        };

        let surface = Arc::new(VisualSurface::new(method));
        let (jobs, mut rx) = mpsc::channel::<Job>(1);
        let worker_surface = surface.clone();
        let worker = std::thread::Builder::new()
            .name(format!("simlink-{}", method))
            .spawn(move || {
                while let Some((request, reply_tx)) = rx.blocking_recv() {
                    let stepped = matches!(request, Request::StepSimulation);
                    let reply = engine.blocking_lock().handle(request);
                    if stepped {
                        worker_surface.present();
                    }
                    // Caller may have timed out and dropped the receiver.
                    let _ = reply_tx.send(reply);
                }
                tracing::debug!(surface = %worker_surface.title(), "worker stopped");
            })
            .map_err(|e| Error::transport_open(method, e.to_string()))?;

        Ok(Self {
            method,
            jobs: Some(jobs),
            worker: Some(worker),
            surface,
            publication,
            timeout: Duration::from_secs(10),
            broken: false,
        })
    }

    pub fn surface(&self) -> &VisualSurface {
        &self.surface
    }

    async fn round_trip(&mut self, request: Request) -> Result<Reply> {
        let jobs = self
            .jobs
            .as_ref()
            .ok_or_else(|| Error::protocol("worker already stopped"))?;
        let (reply_tx, reply_rx) = oneshot::channel();
        jobs.send((request, reply_tx))
            .await
            .map_err(|_| Error::protocol("worker stopped"))?;
        match tokio::time::timeout(self.timeout, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(Error::protocol("worker dropped the request")),
            Err(_) => Err(Error::timeout(format!(
                "no reply from worker within {:?}",
                self.timeout
            ))),
        }
    }
}

#[async_trait]
impl Transport for ThreadedTransport {
    fn method(&self) -> ConnectionMethod {
        self.method
    }

    fn can_submit(&self) -> bool {
        !self.broken
            && self.jobs.is_some()
            && self.worker.as_ref().is_some_and(|w| !w.is_finished())
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
        self.jobs = None;
        self.publication = None;
        if let Some(worker) = self.worker.take() {
            if tokio::task::spawn_blocking(move || worker.join()).await.is_err() {
                tracing::warn!(method = %self.method, "worker join failed");
            }
        }
    }
}
