//! Simulcast RPC payloads.
//!
//! A receiver asks the server to switch which simulcast layer it gets by
//! calling `RequestSimulcastRid`. The call travels as a JSON-RPC 2.0 request
//! on a data channel, so only the payload shapes live here.

use super::types::SimulcastRequestRid;
use crate::error::CodecError;
use serde::{Deserialize, Serialize};

/// Versioned method name understood by the server.
pub const REQUEST_SIMULCAST_RID: &str = "2025.2.0/RequestSimulcastRid";

const JSONRPC_VERSION: &str = "2.0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSimulcastRidParams {
    pub rid: SimulcastRequestRid,
    /// Restrict the switch to one sender; all senders when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_connection_id: Option<String>,
}

impl RequestSimulcastRidParams {
    pub fn new(rid: SimulcastRequestRid) -> Self {
        Self { rid, sender_connection_id: None }
    }

    pub fn with_sender(mut self, sender_connection_id: impl Into<String>) -> Self {
        self.sender_connection_id = Some(sender_connection_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSimulcastRidResult {
    pub channel_id: String,
    pub receiver_connection_id: String,
    pub rid: SimulcastRequestRid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_connection_id: Option<String>,
}

impl RequestSimulcastRidResult {
    pub fn from_json(json: &str) -> Result<Self, CodecError> {
        serde_json::from_str(json).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest<P> {
    pub jsonrpc: String,
    pub method: String,
    pub params: P,
    /// Absent for notifications, which get no response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

impl RpcRequest<RequestSimulcastRidParams> {
    pub fn request_simulcast_rid(id: u64, params: RequestSimulcastRidParams) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: REQUEST_SIMULCAST_RID.to_string(),
            params,
            id: Some(id),
        }
    }
}

impl<P: Serialize> RpcRequest<P> {
    pub fn to_json(&self) -> Result<String, CodecError> {
        serde_json::to_string(self).map_err(|e| CodecError::Encode(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RpcResponse<R> {
    pub id: Option<u64>,
    #[serde(default = "Option::default")]
    pub result: Option<R>,
    #[serde(default)]
    pub error: Option<RpcErrorObject>,
}

impl RpcResponse<RequestSimulcastRidResult> {
    pub fn from_json(json: &str) -> Result<Self, CodecError> {
        serde_json::from_str(json).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::types::Rid;
    use serde_json::{json, Value};

    #[test]
    fn decode_result_with_sender() {
        let result = RequestSimulcastRidResult::from_json(
            r#"{"channel_id":"test-channel","receiver_connection_id":"receiver-123","rid":"r1","sender_connection_id":"sender-456"}"#,
        )
        .unwrap();
        assert_eq!(result.channel_id, "test-channel");
        assert_eq!(result.receiver_connection_id, "receiver-123");
        assert_eq!(result.rid, Rid::R1);
        assert_eq!(result.sender_connection_id.as_deref(), Some("sender-456"));
    }

    #[test]
    fn decode_result_without_sender() {
        let result = RequestSimulcastRidResult::from_json(
            r#"{"channel_id":"test-channel","receiver_connection_id":"receiver-123","rid":"r1"}"#,
        )
        .unwrap();
        assert_eq!(result.rid, Rid::R1);
        assert_eq!(result.sender_connection_id, None);
    }

    #[test]
    fn invalid_rid_fails_everywhere() {
        assert!(RequestSimulcastRidResult::from_json(
            r#"{"channel_id":"c","receiver_connection_id":"r","rid":"invalid"}"#
        )
        .is_err());
        assert!(serde_json::from_str::<RequestSimulcastRidParams>(r#"{"rid":"invalid"}"#).is_err());
    }

    #[test]
    fn params_omit_absent_sender() {
        let params = serde_json::to_value(RequestSimulcastRidParams::new(Rid::R2)).unwrap();
        assert_eq!(params, json!({"rid": "r2"}));

        let params = RequestSimulcastRidParams::new(Rid::None).with_sender("sender-456");
        let params = serde_json::to_value(params).unwrap();
        assert_eq!(params, json!({"rid": "none", "sender_connection_id": "sender-456"}));
    }

    #[test]
    fn request_envelope() {
        let request = RpcRequest::request_simulcast_rid(7, RequestSimulcastRidParams::new(Rid::R0));
        let value: Value = serde_json::from_str(&request.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "jsonrpc": "2.0",
                "method": "2025.2.0/RequestSimulcastRid",
                "params": {"rid": "r0"},
                "id": 7,
            })
        );
    }

    #[test]
    fn response_envelope() {
        let response = RpcResponse::from_json(
            r#"{"jsonrpc":"2.0","id":7,"result":{"channel_id":"c","receiver_connection_id":"r","rid":"r0"}}"#,
        )
        .unwrap();
        assert_eq!(response.id, Some(7));
        assert_eq!(response.result.map(|r| r.rid), Some(Rid::R0));
        assert!(response.error.is_none());

        let response = RpcResponse::from_json(
            r#"{"jsonrpc":"2.0","id":8,"error":{"code":-32602,"message":"Invalid params"}}"#,
        )
        .unwrap();
        assert!(response.result.is_none());
        assert_eq!(response.error.map(|e| e.code), Some(-32602));
    }
}
