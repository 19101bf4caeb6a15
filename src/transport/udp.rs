//! UDP transport: one datagram per request and per reply.

use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{lookup_host, UdpSocket};

use super::{ConnectionMethod, Transport};
use crate::ipc::codec::{
    decode_datagram, decode_msgpack, encode_datagram, encode_msgpack, MAX_DATAGRAM_BYTES,
    MSG_ERROR, MSG_REQUEST, MSG_RESPONSE,
};
use crate::protocol::{Reply, Request};
use crate::types::{Error, Result};

/// `Udp` connections.
#[derive(Debug)]
pub struct UdpTransport {
    socket: Option<UdpSocket>,
    peer: SocketAddr,
    timeout: Duration,
    broken: bool,
}

impl UdpTransport {
    pub async fn connect(addr: &str, timeout: Duration) -> Result<Self> {
        let open_err = |reason: String| Error::transport_open(ConnectionMethod::Udp, reason);
        let peer = lookup_host(addr)
            .await
            .map_err(|e| open_err(format!("{}: {}", addr, e)))?
            .next()
            .ok_or_else(|| open_err(format!("{} resolved to no address", addr)))?;
        let local = if peer.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| open_err(e.to_string()))?;
        socket
            .connect(peer)
            .await
            .map_err(|e| open_err(format!("{}: {}", peer, e)))?;
        tracing::debug!(%peer, "udp socket connected");
        Ok(Self {
            socket: Some(socket),
            peer,
            timeout,
            broken: false,
        })
    }

    async fn round_trip(&mut self, request: Request) -> Result<Reply> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| Error::protocol("socket already closed"))?;
        let kind = request.kind();
        let datagram = encode_datagram(MSG_REQUEST, &encode_msgpack(&request)?);
        if datagram.len() > MAX_DATAGRAM_BYTES {
            return Ok(Reply::failed(
                kind,
                format!(
                    "request of {} bytes exceeds the datagram limit",
                    datagram.len()
                ),
            ));
        }

        let mut buf = vec![0u8; MAX_DATAGRAM_BYTES];
        let received = tokio::time::timeout(self.timeout, async {
            socket.send(&datagram).await?;
            socket.recv(&mut buf).await
        })
        .await
        .map_err(|_| {
            Error::timeout(format!("no datagram from {} within {:?}", self.peer, self.timeout))
        })??;

        let (msg_type, payload) = decode_datagram(&buf[..received])?;
        match msg_type {
            MSG_RESPONSE => decode_msgpack(payload),
            MSG_ERROR => Err(Error::protocol(format!("{} rejected the datagram", self.peer))),
            other => Err(Error::protocol(format!(
                "unexpected message type 0x{:02X}",
                other
            ))),
        }
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn method(&self) -> ConnectionMethod {
        ConnectionMethod::Udp
    }

    fn can_submit(&self) -> bool {
        !self.broken && self.socket.is_some()
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
        self.socket = None;
    }
}
