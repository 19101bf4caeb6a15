//! RPC envelope carried by `MSG_RPC_REQUEST` / `MSG_RPC_RESPONSE` frames.
//!
//! ```text
//! request:  { id, service, method, body }
//! response: { id, ok: true,  body }
//!           { id, ok: false, error: { code, message } }
//! ```
//! `method` is the command kind name and `body` the JSON form of the
//! `Request`; a successful `body` is the JSON form of the `Reply`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Service name every simulation RPC is addressed to.
pub const SIMULATION_SERVICE: &str = "simulation";

/// Error code used when the engine answered with a failed reply.
pub const COMMAND_FAILED_CODE: &str = "COMMAND_FAILED";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: String,
    pub service: String,
    pub method: String,
    #[serde(default)]
    pub body: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn success(id: impl Into<String>, body: Value) -> Self {
        Self {
            id: id.into(),
            ok: true,
            body: Some(body),
            error: None,
        }
    }

    pub fn failure(id: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ok: false,
            body: None,
            error: Some(RpcError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::codec::{decode_msgpack, encode_msgpack};

    #[test]
    fn test_failure_omits_body() {
        let response = RpcResponse::failure("r-1", "NOT_FOUND", "no such method");
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["ok"], false);
        assert!(json.get("body").is_none());
        assert_eq!(json["error"]["code"], "NOT_FOUND");
    }

    #[test]
    fn test_envelope_through_msgpack() {
        let request = RpcRequest {
            id: "r-2".to_string(),
            service: SIMULATION_SERVICE.to_string(),
            method: "step_simulation".to_string(),
            body: serde_json::json!("step_simulation"),
        };
        let decoded: RpcRequest = decode_msgpack(&encode_msgpack(&request).unwrap()).unwrap();
        assert_eq!(decoded, request);
    }
}
