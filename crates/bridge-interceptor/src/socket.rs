//! Virtual sockets: the page-facing WebSocket stand-in.
//!
//! A virtual socket is a finite state machine driven only by remote
//! events. It starts in `Connecting` the moment the page constructs it
//! and moves to `Open` or `Closed` exclusively when the relay says so —
//! state is never predicted locally. Exactly one real socket in the
//! relay backs one virtual socket for its whole lifetime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, trace};

use bridge_protocol::{SocketId, WsClose, WsEvent, WsEventKind, WsPayload, WsSend};
use bridge_transport::{SocketCommand, SocketCommandSender, TransportError};

/// Socket ready states, numbered like the native constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ReadyState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// How binary frames are handed to page code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BinaryType {
    /// Bytes pass through as given.
    #[default]
    Blob,
    /// Bytes are converted to an array-buffer-shaped value.
    ArrayBuffer,
}

/// Payload of a message event, shaped per the socket's binary type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageData {
    Text(String),
    Bytes(Vec<u8>),
    ArrayBuffer(Vec<u8>),
}

/// Synthesized native-style events.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    Open,
    Message {
        data: MessageData,
    },
    Error {
        message: String,
    },
    Close {
        code: Option<u16>,
        reason: Option<String>,
        was_clean: bool,
    },
}

impl SocketEvent {
    pub fn kind(&self) -> WsEventKind {
        match self {
            Self::Open => WsEventKind::Open,
            Self::Message { .. } => WsEventKind::Message,
            Self::Error { .. } => WsEventKind::Error,
            Self::Close { .. } => WsEventKind::Close,
        }
    }
}

/// Errors surfaced synchronously by socket operations.
#[derive(Debug, Error)]
pub enum SocketError {
    /// `send` outside the open state raises, matching native semantics.
    #[error("socket is not open (readyState {0})")]
    NotOpen(u8),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Event callback invoked on dispatch.
pub type EventListener = Arc<dyn Fn(&SocketEvent) + Send + Sync>;

#[derive(Default)]
struct Handlers {
    /// Single-slot `on*` handler fields, one per event kind.
    on_open: Option<EventListener>,
    on_message: Option<EventListener>,
    on_error: Option<EventListener>,
    on_close: Option<EventListener>,
    /// Generic listener registry, invoked after the slot handler.
    listeners: Vec<(WsEventKind, EventListener)>,
}

impl Handlers {
    fn slot(&self, kind: WsEventKind) -> Option<&EventListener> {
        match kind {
            WsEventKind::Open => self.on_open.as_ref(),
            WsEventKind::Message => self.on_message.as_ref(),
            WsEventKind::Error => self.on_error.as_ref(),
            WsEventKind::Close => self.on_close.as_ref(),
        }
    }
}

pub(crate) struct SocketShared {
    id: SocketId,
    url: String,
    protocols: Vec<String>,
    ready_state: AtomicU8,
    binary_type: AtomicU8,
    handlers: Mutex<Handlers>,
    commands: SocketCommandSender,
}

impl SocketShared {
    fn new(
        id: SocketId,
        url: String,
        protocols: Vec<String>,
        commands: SocketCommandSender,
    ) -> Self {
        Self {
            id,
            url,
            protocols,
            ready_state: AtomicU8::new(ReadyState::Connecting as u8),
            binary_type: AtomicU8::new(0),
            handlers: Mutex::new(Handlers::default()),
            commands,
        }
    }

    fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.ready_state.load(Ordering::SeqCst))
    }

    fn binary_type(&self) -> BinaryType {
        if self.binary_type.load(Ordering::SeqCst) == 1 {
            BinaryType::ArrayBuffer
        } else {
            BinaryType::Blob
        }
    }

    /// Translate one wire event, advance the state machine, and invoke
    /// the slot handler plus every subscribed listener for its kind.
    pub(crate) fn dispatch(&self, wire: WsEvent) {
        let event = match wire.event {
            WsEventKind::Open => {
                self.ready_state.store(ReadyState::Open as u8, Ordering::SeqCst);
                SocketEvent::Open
            }
            WsEventKind::Message => {
                let data = match wire.data {
                    Some(WsPayload::Text(text)) => MessageData::Text(text),
                    Some(WsPayload::Binary(bytes)) => match self.binary_type() {
                        BinaryType::ArrayBuffer => MessageData::ArrayBuffer(bytes),
                        BinaryType::Blob => MessageData::Bytes(bytes),
                    },
                    None => {
                        trace!(ws_id = %self.id, "message event without data dropped");
                        return;
                    }
                };
                SocketEvent::Message { data }
            }
            WsEventKind::Error => SocketEvent::Error {
                message: wire.error.unwrap_or_else(|| "socket error".to_string()),
            },
            WsEventKind::Close => {
                self.ready_state.store(ReadyState::Closed as u8, Ordering::SeqCst);
                SocketEvent::Close {
                    code: wire.code,
                    reason: wire.reason,
                    was_clean: wire.was_clean.unwrap_or(false),
                }
            }
        };
        trace!(ws_id = %self.id, event = ?event.kind(), "dispatching socket event");

        // Callbacks are invoked outside the lock: a handler may
        // register further handlers on its own socket.
        let callbacks: Vec<EventListener> = {
            let handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
            handlers
                .slot(event.kind())
                .cloned()
                .into_iter()
                .chain(
                    handlers
                        .listeners
                        .iter()
                        .filter(|(kind, _)| *kind == event.kind())
                        .map(|(_, listener)| listener.clone()),
                )
                .collect()
        };
        for callback in &callbacks {
            callback(&event);
        }
    }
}

/// The proxied WebSocket object handed to page code.
#[derive(Clone)]
pub struct VirtualSocket {
    shared: Arc<SocketShared>,
}

impl VirtualSocket {
    pub fn id(&self) -> &SocketId {
        &self.shared.id
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    pub fn protocols(&self) -> &[String] {
        &self.shared.protocols
    }

    pub fn ready_state(&self) -> ReadyState {
        self.shared.ready_state()
    }

    pub fn binary_type(&self) -> BinaryType {
        self.shared.binary_type()
    }

    pub fn set_binary_type(&self, binary_type: BinaryType) {
        let value = match binary_type {
            BinaryType::Blob => 0,
            BinaryType::ArrayBuffer => 1,
        };
        self.shared.binary_type.store(value, Ordering::SeqCst);
    }

    /// Set the single-slot handler for an event kind.
    pub fn set_handler(&self, kind: WsEventKind, listener: EventListener) {
        let mut handlers = self.shared.handlers.lock().unwrap_or_else(|e| e.into_inner());
        match kind {
            WsEventKind::Open => handlers.on_open = Some(listener),
            WsEventKind::Message => handlers.on_message = Some(listener),
            WsEventKind::Error => handlers.on_error = Some(listener),
            WsEventKind::Close => handlers.on_close = Some(listener),
        }
    }

    /// Subscribe an additional listener for an event kind.
    pub fn add_event_listener(&self, kind: WsEventKind, listener: EventListener) {
        self.shared
            .handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .listeners
            .push((kind, listener));
    }

    /// Forward a frame to the real socket.
    ///
    /// Raises synchronously unless the socket is open.
    pub fn send(&self, data: WsPayload) -> Result<(), SocketError> {
        let state = self.shared.ready_state();
        if state != ReadyState::Open {
            return Err(SocketError::NotOpen(state as u8));
        }
        self.shared.commands.send(SocketCommand::Send(WsSend {
            ws_id: self.shared.id.clone(),
            data,
        }))?;
        Ok(())
    }

    /// Begin closing the socket.
    ///
    /// A no-op when already closing or closed; the `Closed` state is
    /// only ever entered via the remote close event.
    pub fn close(&self, code: Option<u16>, reason: Option<String>) -> Result<(), SocketError> {
        match self.shared.ready_state() {
            ReadyState::Closing | ReadyState::Closed => return Ok(()),
            _ => {}
        }
        self.shared
            .ready_state
            .store(ReadyState::Closing as u8, Ordering::SeqCst);
        self.shared.commands.send(SocketCommand::Close(WsClose {
            ws_id: self.shared.id.clone(),
            code,
            reason,
        }))?;
        Ok(())
    }
}

/// Table of live virtual sockets, keyed by socket id.
///
/// Owned by one page context; entries are removed when the remote close
/// event arrives.
#[derive(Default)]
pub(crate) struct SocketTable {
    sockets: Mutex<HashMap<SocketId, Arc<SocketShared>>>,
}

impl SocketTable {
    pub(crate) fn register(
        &self,
        id: SocketId,
        url: String,
        protocols: Vec<String>,
        commands: SocketCommandSender,
    ) -> VirtualSocket {
        let shared = Arc::new(SocketShared::new(id.clone(), url, protocols, commands));
        self.lock().insert(id, shared.clone());
        VirtualSocket { shared }
    }

    /// Route one wire event to its socket; close events also tear the
    /// entry down. Lost correlations are dropped, never a failure.
    pub(crate) fn dispatch(&self, event: WsEvent) {
        let shared = self.lock().get(&event.ws_id).cloned();
        let Some(shared) = shared else {
            debug!(ws_id = %event.ws_id, "event for unknown socket dropped");
            return;
        };
        let closing = event.event == WsEventKind::Close;
        shared.dispatch(event);
        if closing {
            self.remove(&shared.id);
        }
    }

    pub(crate) fn remove(&self, id: &SocketId) {
        self.lock().remove(id);
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SocketId, Arc<SocketShared>>> {
        self.sockets.lock().unwrap_or_else(|e| e.into_inner())
    }
}
