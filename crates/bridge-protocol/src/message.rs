//! Bridge message envelopes.
//!
//! Every frame crossing the bridge is a tagged envelope
//! `{scope, type, ...payload}`. The scope string is reserved for this
//! protocol; frames carrying any other scope belong to unrelated
//! traffic sharing the same bus and are ignored by every handler.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

use crate::body::SerializedBody;
use crate::correlation::{RequestId, SocketId};

/// Scope tag reserved for bridge traffic.
pub const PROTOCOL_SCOPE: &str = "netbridge/v1";

/// Protocol-level errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("frame decode failed: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Credentials mode carried verbatim from the original call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialsMode {
    Omit,
    SameOrigin,
    Include,
}

/// Serialized `RequestInit`: headers flattened to an ordered pair list,
/// body in wire form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchInit {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<CredentialsMode>,
    #[serde(default, skip_serializing_if = "SerializedBody::is_none")]
    pub body: SerializedBody,
}

/// One proxied fetch call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRequest {
    pub request_id: RequestId,
    pub payload: FetchRequestPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchRequestPayload {
    pub url: String,
    pub init: FetchInit,
}

/// Reply to one proxied fetch call, tagged with the same request id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchResponse {
    pub request_id: RequestId,
    pub payload: FetchResponsePayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchResponsePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// WebSocket payload: text passes through as given, binary always as a
/// byte sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WsPayload {
    Text(String),
    Binary(Vec<u8>),
}

/// Open a real socket backing the virtual one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsOpen {
    pub ws_id: SocketId,
    pub url: String,
    pub protocols: Vec<String>,
}

/// Forward one frame from page code to the real socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsSend {
    pub ws_id: SocketId,
    pub data: WsPayload,
}

/// Close the real socket, optionally with code and reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsClose {
    pub ws_id: SocketId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Lifecycle event kinds reported by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WsEventKind {
    Open,
    Message,
    Error,
    Close,
}

/// One real-socket lifecycle event, routed back by socket id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsEvent {
    pub ws_id: SocketId,
    pub event: WsEventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<WsPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub was_clean: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WsEvent {
    /// A bare lifecycle event with no payload fields.
    pub fn bare(ws_id: SocketId, event: WsEventKind) -> Self {
        Self {
            ws_id,
            event,
            data: None,
            code: None,
            reason: None,
            was_clean: None,
            error: None,
        }
    }

    /// An error event carrying a message.
    pub fn error(ws_id: SocketId, message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::bare(ws_id, WsEventKind::Error)
        }
    }
}

/// All bridge frame types, discriminated by the wire `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BridgeMessage {
    #[serde(rename = "fetch-request")]
    FetchRequest(FetchRequest),
    #[serde(rename = "fetch-response")]
    FetchResponse(FetchResponse),
    #[serde(rename = "ws-open")]
    WsOpen(WsOpen),
    #[serde(rename = "ws-send")]
    WsSend(WsSend),
    #[serde(rename = "ws-close")]
    WsClose(WsClose),
    #[serde(rename = "ws-event")]
    WsEvent(WsEvent),
}

/// Scope-tagged wire envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub scope: String,
    #[serde(flatten)]
    pub message: BridgeMessage,
}

impl Envelope {
    /// Wrap a message in this protocol's scope.
    pub fn wrap(message: BridgeMessage) -> Self {
        Self {
            scope: PROTOCOL_SCOPE.to_string(),
            message,
        }
    }

    /// Encode to wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(self).map_err(ProtocolError::Encode)
    }

    /// Decode wire bytes.
    ///
    /// Returns `Ok(None)` for frames that belong to some other protocol
    /// sharing the bus; only same-scope frames that fail to parse are
    /// reported as errors.
    pub fn decode(bytes: &[u8]) -> Result<Option<BridgeMessage>, ProtocolError> {
        let value: serde_json::Value =
            serde_json::from_slice(bytes).map_err(ProtocolError::Decode)?;
        match value.get("scope").and_then(|s| s.as_str()) {
            Some(scope) if scope == PROTOCOL_SCOPE => {}
            other => {
                trace!(scope = ?other, "ignoring frame with foreign scope");
                return Ok(None);
            }
        }
        let envelope: Envelope = serde_json::from_value(value).map_err(ProtocolError::Decode)?;
        Ok(Some(envelope.message))
    }
}
