//! Simulation server - hosts one engine behind the networked wire formats.
//!
//! TCP accepts plain `MSG_REQUEST` frames and `MSG_RPC_REQUEST` envelopes on
//! the same port, one task per connection. UDP answers one datagram with one
//! datagram. Shared-memory segments are published on demand.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::engine::SharedEngine;
use crate::ipc::codec::{
    decode_datagram, decode_msgpack, encode_datagram, encode_msgpack, read_frame, write_frame,
    MAX_DATAGRAM_BYTES, MSG_ERROR, MSG_REQUEST, MSG_RESPONSE, MSG_RPC_REQUEST, MSG_RPC_RESPONSE,
};
use crate::ipc::envelope::{RpcRequest, RpcResponse, COMMAND_FAILED_CODE, SIMULATION_SERVICE};
use crate::protocol::{CommandKind, Reply, Request};
use crate::transport::SegmentPublication;
use crate::types::{IpcConfig, Result, SHARED_MEMORY_MAGIC};

/// Server wrapping a shared engine.
#[derive(Debug)]
pub struct SimulationServer {
    engine: SharedEngine,
    cancel: CancellationToken,
    ipc_config: IpcConfig,
}

impl SimulationServer {
    pub fn new(engine: SharedEngine, ipc_config: IpcConfig) -> Self {
        Self {
            engine,
            cancel: CancellationToken::new(),
            ipc_config,
        }
    }

    pub fn engine(&self) -> SharedEngine {
        self.engine.clone()
    }

    /// Bind `addr` and serve TCP until cancelled.
    pub async fn serve_tcp(&self, addr: SocketAddr) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve_tcp_on(listener).await
    }

    /// Serve TCP on an already bound listener until cancelled.
    pub async fn serve_tcp_on(&self, listener: TcpListener) -> std::io::Result<()> {
        let conn_semaphore = Arc::new(Semaphore::new(self.ipc_config.max_connections));
        tracing::info!(
            "TCP server listening on {} (max_connections={})",
            listener.local_addr()?,
            self.ipc_config.max_connections,
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("TCP server shutting down");
                    break;
                }
                accept = listener.accept() => {
                    let (stream, peer) = accept?;

                    let permit = match conn_semaphore.clone().try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            tracing::warn!(
                                "Connection from {} rejected: at max_connections ({})",
                                peer,
                                self.ipc_config.max_connections,
                            );
                            drop(stream);
                            continue;
                        }
                    };

                    tracing::debug!("TCP connection from {} (active={})",
                        peer,
                        self.ipc_config.max_connections - conn_semaphore.available_permits(),
                    );
                    let engine = self.engine.clone();
                    let cancel = self.cancel.clone();
                    let ipc_config = self.ipc_config.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, engine, cancel, ipc_config, permit).await {
                            tracing::warn!("Connection from {} error: {}", peer, e);
                        }
                    });
                }
            }
        }
        Ok(())
    }

    /// Bind `addr` and serve UDP until cancelled.
    pub async fn serve_udp(&self, addr: SocketAddr) -> std::io::Result<()> {
        let socket = UdpSocket::bind(addr).await?;
        self.serve_udp_on(socket).await
    }

    /// Serve UDP on an already bound socket until cancelled.
    pub async fn serve_udp_on(&self, socket: UdpSocket) -> std::io::Result<()> {
        tracing::info!("UDP server listening on {}", socket.local_addr()?);
        let mut buf = vec![0u8; MAX_DATAGRAM_BYTES];

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("UDP server shutting down");
                    break;
                }
                received = socket.recv_from(&mut buf) => {
                    let (len, peer) = match received {
                        Ok(received) => received,
                        Err(e) => {
                            tracing::warn!("UDP receive error: {}", e);
                            continue;
                        }
                    };
                    let (msg_type, payload) = match answer_datagram(&self.engine, &buf[..len]).await {
                        Ok(answer) => answer,
                        Err(e) => {
                            tracing::error!("UDP reply encoding failed for {}: {}", peer, e);
                            continue;
                        }
                    };
                    if let Err(e) = socket.send_to(&encode_datagram(msg_type, &payload), peer).await {
                        tracing::warn!("UDP send to {} failed: {}", peer, e);
                    }
                }
            }
        }
        Ok(())
    }

    /// Publish the engine as a shared-memory segment under `key`.
    pub fn publish_shared_memory(&self, key: i32, capacity: usize) -> Result<SegmentPublication> {
        SegmentPublication::publish(key, SHARED_MEMORY_MAGIC, capacity, self.engine.clone())
    }

    /// Request graceful shutdown of every serve loop and connection.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Handle a single TCP connection: read frames → run → write replies.
async fn handle_connection(
    stream: TcpStream,
    engine: SharedEngine,
    cancel: CancellationToken,
    ipc_config: IpcConfig,
    _permit: OwnedSemaphorePermit, // held for connection lifetime
) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();
    let read_timeout = Duration::from_secs(ipc_config.read_timeout_secs);
    let write_timeout = Duration::from_secs(ipc_config.write_timeout_secs);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame_result = tokio::time::timeout(read_timeout, read_frame(&mut reader, ipc_config.max_frame_bytes)) => {
                let frame = match frame_result {
                    Err(_elapsed) => {
                        tracing::debug!("Read timeout ({}s), dropping connection", ipc_config.read_timeout_secs);
                        break;
                    }
                    Ok(result) => match result? {
                        Some(f) => f,
                        None => break, // clean EOF
                    },
                };

                let (msg_type, payload) = frame;
                let (reply_type, reply) = match msg_type {
                    MSG_REQUEST => answer_request(&engine, &payload).await?,
                    MSG_RPC_REQUEST => answer_rpc(&engine, &payload).await?,
                    other => error_frame(format!("Unexpected message type: 0x{:02X}", other))?,
                };
                timed_write(&mut writer, reply_type, &reply, write_timeout).await?;
            }
        }
    }

    Ok(())
}

/// `MSG_REQUEST` payload → `MSG_RESPONSE`, or `MSG_ERROR` when undecodable.
async fn answer_request(engine: &SharedEngine, payload: &[u8]) -> Result<(u8, Vec<u8>)> {
    let request: Request = match decode_msgpack(payload) {
        Ok(request) => request,
        Err(e) => return error_frame(format!("Invalid msgpack: {}", e)),
    };
    let reply = engine.lock().await.handle(request);
    Ok((MSG_RESPONSE, encode_msgpack(&reply)?))
}

/// Like [`answer_request`], but keeps the reply within one datagram.
async fn answer_datagram(engine: &SharedEngine, datagram: &[u8]) -> Result<(u8, Vec<u8>)> {
    let payload = match decode_datagram(datagram) {
        Ok((MSG_REQUEST, payload)) => payload,
        Ok((other, _)) => return error_frame(format!("Unexpected message type: 0x{:02X}", other)),
        Err(e) => return error_frame(e.to_string()),
    };
    let request: Request = match decode_msgpack(payload) {
        Ok(request) => request,
        Err(e) => return error_frame(format!("Invalid msgpack: {}", e)),
    };
    let kind = request.kind();
    let reply = engine.lock().await.handle(request);
    let encoded = encode_msgpack(&reply)?;
    if encoded.len() + 1 > MAX_DATAGRAM_BYTES {
        let failed = Reply::failed(
            kind,
            format!("reply of {} bytes exceeds the datagram limit", encoded.len()),
        );
        return Ok((MSG_RESPONSE, encode_msgpack(&failed)?));
    }
    Ok((MSG_RESPONSE, encoded))
}

/// `MSG_RPC_REQUEST` envelope → `MSG_RPC_RESPONSE` envelope.
async fn answer_rpc(engine: &SharedEngine, payload: &[u8]) -> Result<(u8, Vec<u8>)> {
    let envelope: RpcRequest = match decode_msgpack(payload) {
        Ok(envelope) => envelope,
        Err(e) => return error_frame(format!("Invalid msgpack: {}", e)),
    };
    let response = match rpc_request(&envelope) {
        Err(response) => response,
        Ok(request) => {
            let reply = engine.lock().await.handle(request);
            match reply {
                Reply::Completed(_) => {
                    RpcResponse::success(&envelope.id, serde_json::to_value(&reply)?)
                }
                Reply::Failed { reason, .. } => {
                    RpcResponse::failure(&envelope.id, COMMAND_FAILED_CODE, reason)
                }
            }
        }
    };
    Ok((MSG_RPC_RESPONSE, encode_msgpack(&response)?))
}

/// Validate an envelope's routing and decode its body.
fn rpc_request(envelope: &RpcRequest) -> std::result::Result<Request, RpcResponse> {
    if envelope.service != SIMULATION_SERVICE {
        return Err(RpcResponse::failure(
            &envelope.id,
            "NOT_FOUND",
            format!("Unknown service: {}", envelope.service),
        ));
    }
    let kind = CommandKind::from_name(&envelope.method).ok_or_else(|| {
        RpcResponse::failure(
            &envelope.id,
            "NOT_FOUND",
            format!("Unknown method: {}", envelope.method),
        )
    })?;
    let request: Request = serde_json::from_value(envelope.body.clone()).map_err(|e| {
        RpcResponse::failure(&envelope.id, "INVALID_ARGUMENT", format!("Invalid body: {}", e))
    })?;
    if request.kind() != kind {
        return Err(RpcResponse::failure(
            &envelope.id,
            "INVALID_ARGUMENT",
            format!("Body is a {} request, method is {}", request.kind(), kind),
        ));
    }
    Ok(request)
}

fn error_frame(message: String) -> Result<(u8, Vec<u8>)> {
    let response = RpcResponse::failure("", "INVALID_ARGUMENT", message);
    Ok((MSG_ERROR, encode_msgpack(&response)?))
}

/// Write a frame with a timeout. Returns an error if the write takes too long
/// (prevents slow consumers from holding connections indefinitely).
async fn timed_write<W: tokio::io::AsyncWriteExt + Unpin>(
    writer: &mut W,
    msg_type: u8,
    payload: &[u8],
    timeout: Duration,
) -> std::io::Result<()> {
    tokio::time::timeout(timeout, write_frame(writer, msg_type, payload))
        .await
        .map_err(|_| {
            tracing::warn!("Write timeout ({}s), dropping connection", timeout.as_secs());
            std::io::Error::new(std::io::ErrorKind::TimedOut, "write timeout")
        })?
}
