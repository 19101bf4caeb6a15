//! TCP transport: one length-prefixed frame per request and per reply.

use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;

use super::{ConnectionMethod, Transport};
use crate::ipc::codec::{
    decode_msgpack, encode_msgpack, read_frame, write_frame, MSG_ERROR, MSG_REQUEST, MSG_RESPONSE,
};
use crate::ipc::envelope::RpcResponse;
use crate::protocol::{Reply, Request};
use crate::types::{Error, Result};

/// A connected stream speaking the frame codec. Shared by the TCP and RPC
/// channel transports.
#[derive(Debug)]
pub(super) struct FramedStream {
    stream: Option<TcpStream>,
    peer: String,
    max_frame_bytes: u32,
}

impl FramedStream {
    pub(super) async fn connect(
        method: ConnectionMethod,
        addr: &str,
        timeout: Duration,
        max_frame_bytes: u32,
    ) -> Result<Self> {
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(Error::transport_open(method, format!("{}: {}", addr, e))),
            Err(_) => {
                return Err(Error::transport_open(
                    method,
                    format!("connect to {} timed out after {:?}", addr, timeout),
                ))
            }
        };
        stream.set_nodelay(true)?;
        tracing::debug!(method = %method, peer = addr, "stream connected");
        Ok(Self {
            stream: Some(stream),
            peer: addr.to_string(),
            max_frame_bytes,
        })
    }

    pub(super) fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Write one frame and read the answering frame.
    pub(super) async fn call(
        &mut self,
        msg_type: u8,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<(u8, Vec<u8>)> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| Error::protocol("stream already closed"))?;
        let max_frame_bytes = self.max_frame_bytes;
        let exchange = async {
            write_frame(stream, msg_type, payload).await?;
            read_frame(stream, max_frame_bytes).await
        };
        match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(Some(frame))) => Ok(frame),
            Ok(Ok(None)) => Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("{} closed the connection", self.peer),
            ))),
            Ok(Err(e)) => Err(Error::Io(e)),
            Err(_) => Err(Error::timeout(format!(
                "no reply from {} within {:?}",
                self.peer, timeout
            ))),
        }
    }

    pub(super) fn shutdown(&mut self) {
        self.stream = None;
    }
}

/// Decode the server's `MSG_ERROR` payload into a protocol error.
pub(super) fn error_frame(payload: &[u8]) -> Error {
    match decode_msgpack::<RpcResponse>(payload) {
        Ok(RpcResponse {
            error: Some(error), ..
        }) => Error::protocol(format!("server rejected request: {} ({})", error.message, error.code)),
        _ => Error::protocol("server rejected request"),
    }
}

/// `Tcp` connections.
#[derive(Debug)]
pub struct TcpTransport {
    framed: FramedStream,
    timeout: Duration,
    broken: bool,
}

impl TcpTransport {
    /// Connect to `addr`; replies larger than `max_frame_bytes` break the link.
    pub async fn connect(addr: &str, timeout: Duration, max_frame_bytes: u32) -> Result<Self> {
        Ok(Self {
            framed: FramedStream::connect(ConnectionMethod::Tcp, addr, timeout, max_frame_bytes)
                .await?,
            timeout,
            broken: false,
        })
    }

    async fn round_trip(&mut self, request: Request) -> Result<Reply> {
        let payload = encode_msgpack(&request)?;
        let (msg_type, body) = self.framed.call(MSG_REQUEST, &payload, self.timeout).await?;
        match msg_type {
            MSG_RESPONSE => decode_msgpack(&body),
            MSG_ERROR => Err(error_frame(&body)),
            other => Err(Error::protocol(format!(
                "unexpected message type 0x{:02X}",
                other
            ))),
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn method(&self) -> ConnectionMethod {
        ConnectionMethod::Tcp
    }

    fn can_submit(&self) -> bool {
        !self.broken && self.framed.is_open()
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
        self.framed.shutdown();
    }
}
