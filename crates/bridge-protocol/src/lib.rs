//! netbridge wire protocol
//!
//! Everything that crosses the bridge between the page-side interceptor
//! and the privileged relay is defined here:
//! 1. Scope-tagged envelopes so unrelated bus traffic is ignored
//! 2. The six bridge message shapes (fetch + WebSocket framing)
//! 3. The serialized-body sum type and its lossless codec
//! 4. Correlation-id minting for outstanding requests and sockets

mod body;
mod codec;
mod correlation;
mod message;

pub use body::{Blob, Body, FormData, FormField, SerializedBody};
pub use codec::{deserialize_body, serialize_body};
pub use correlation::{RequestId, SocketId};
pub use message::{
    BridgeMessage, CredentialsMode, Envelope, FetchInit, FetchRequest, FetchRequestPayload,
    FetchResponse, FetchResponsePayload, ProtocolError, WsClose, WsEvent, WsEventKind, WsOpen,
    WsPayload, WsSend, PROTOCOL_SCOPE,
};
