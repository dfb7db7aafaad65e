//! netbridge transport layer
//!
//! The two message channels connecting the page-side interceptor and the
//! privileged relay:
//! 1. A one-shot request/response channel for fetch proxying
//! 2. A long-lived bidirectional channel for WebSocket framing
//!
//! Each logical protocol gets its own typed channel pair, so routing
//! never depends on string filtering against unrelated listeners. Frames
//! still cross as serialized scope-tagged envelopes — there is no shared
//! memory between the two halves, and foreign-scope or malformed frames
//! arriving on a channel are dropped, never surfaced as errors.

mod channel;

pub use channel::{
    fetch_channel, socket_channel, FetchPageEnd, FetchRelayEnd, FetchRequestSender,
    FetchResponseSender, SocketCommand, SocketCommandSender, SocketEventSender, SocketPageEnd,
    SocketRelayEnd, TransportError,
};
