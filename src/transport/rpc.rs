//! RPC channel transport: frames carrying `{id, service, method, body}`
//! envelopes. Replies must echo the request id.

use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

use super::tcp::{error_frame, FramedStream};
use super::{ConnectionMethod, Transport};
use crate::ipc::codec::{decode_msgpack, encode_msgpack, MSG_ERROR, MSG_RPC_REQUEST, MSG_RPC_RESPONSE};
use crate::ipc::envelope::{RpcRequest, RpcResponse, COMMAND_FAILED_CODE, SIMULATION_SERVICE};
use crate::protocol::{Reply, Request};
use crate::types::{Error, Result};

/// `RpcChannel` connections.
#[derive(Debug)]
pub struct RpcTransport {
    framed: FramedStream,
    timeout: Duration,
    broken: bool,
}

impl RpcTransport {
    pub async fn connect(addr: &str, timeout: Duration, max_frame_bytes: u32) -> Result<Self> {
        Ok(Self {
            framed: FramedStream::connect(
                ConnectionMethod::RpcChannel,
                addr,
                timeout,
                max_frame_bytes,
            )
            .await?,
            timeout,
            broken: false,
        })
    }

    async fn round_trip(&mut self, request: Request) -> Result<Reply> {
        let kind = request.kind();
        let envelope = RpcRequest {
            id: Uuid::new_v4().to_string(),
            service: SIMULATION_SERVICE.to_string(),
            method: kind.as_str().to_string(),
            body: serde_json::to_value(&request)?,
        };
        let payload = encode_msgpack(&envelope)?;
        let (msg_type, body) = self
            .framed
            .call(MSG_RPC_REQUEST, &payload, self.timeout)
            .await?;

        let response: RpcResponse = match msg_type {
            MSG_RPC_RESPONSE => decode_msgpack(&body)?,
            MSG_ERROR => return Err(error_frame(&body)),
            other => {
                return Err(Error::protocol(format!(
                    "unexpected message type 0x{:02X}",
                    other
                )))
            }
        };
        if response.id != envelope.id {
            return Err(Error::protocol(format!(
                "reply id {} does not match request id {}",
                response.id, envelope.id
            )));
        }

        match (response.ok, response.body, response.error) {
            (true, Some(body), _) => Ok(serde_json::from_value(body)?),
            (false, _, Some(error)) if error.code == COMMAND_FAILED_CODE => {
                Ok(Reply::failed(kind, error.message))
            }
            (false, _, Some(error)) => Err(Error::protocol(format!(
                "{} failed remotely: {} ({})",
                kind, error.message, error.code
            ))),
            _ => Err(Error::protocol("malformed rpc response")),
        }
    }
}

#[async_trait]
impl Transport for RpcTransport {
    fn method(&self) -> ConnectionMethod {
        ConnectionMethod::RpcChannel
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
