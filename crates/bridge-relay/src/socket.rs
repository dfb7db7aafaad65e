//! Real WebSocket handling behind virtual sockets.
//!
//! One table per long-lived channel, keyed by the interceptor-minted
//! socket ids. Each open spawns a task owning the real connection; its
//! lifecycle callbacks are wired straight into ws-event emissions. The
//! 1:1 mapping holds for the socket's lifetime and is torn down on
//! close from either side.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

use bridge_protocol::{SocketId, WsClose, WsEvent, WsEventKind, WsOpen, WsPayload, WsSend};
use bridge_transport::{SocketCommand, SocketEventSender};

/// Commands forwarded to one real-socket task.
enum RealSocketCommand {
    Forward(WsPayload),
    Close {
        code: Option<u16>,
        reason: Option<String>,
    },
}

struct SocketHandle {
    commands: mpsc::UnboundedSender<RealSocketCommand>,
    /// Set by the task once the real handshake completes.
    open: Arc<AtomicBool>,
}

/// Relay-side socket table. Owned by the single relay loop, so no
/// locking is needed.
pub(crate) struct SocketTable {
    sockets: HashMap<SocketId, SocketHandle>,
    events: SocketEventSender,
    done_tx: mpsc::UnboundedSender<SocketId>,
}

impl SocketTable {
    pub(crate) fn new(events: SocketEventSender, done_tx: mpsc::UnboundedSender<SocketId>) -> Self {
        Self {
            sockets: HashMap::new(),
            events,
            done_tx,
        }
    }

    pub(crate) fn handle(&mut self, command: SocketCommand) {
        match command {
            SocketCommand::Open(open) => self.open(open),
            SocketCommand::Send(send) => self.forward(send),
            SocketCommand::Close(close) => self.close(close),
        }
    }

    fn open(&mut self, open: WsOpen) {
        if self.sockets.contains_key(&open.ws_id) {
            warn!(ws_id = %open.ws_id, "duplicate ws-open rejected");
            let _ = self
                .events
                .send(WsEvent::error(open.ws_id, "socket id already in use"));
            return;
        }
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let open_flag = Arc::new(AtomicBool::new(false));
        let handle = SocketHandle {
            commands: commands_tx,
            open: open_flag.clone(),
        };
        info!(ws_id = %open.ws_id, url = %open.url, "opening real socket");
        tokio::spawn(run_socket(
            open.ws_id.clone(),
            open.url,
            open.protocols,
            commands_rx,
            self.events.clone(),
            open_flag,
            self.done_tx.clone(),
        ));
        self.sockets.insert(open.ws_id, handle);
    }

    fn forward(&mut self, send: WsSend) {
        let Some(handle) = self.sockets.get(&send.ws_id) else {
            let _ = self
                .events
                .send(WsEvent::error(send.ws_id, "no such socket"));
            return;
        };
        if !handle.open.load(Ordering::SeqCst) {
            let _ = self
                .events
                .send(WsEvent::error(send.ws_id, "socket is not open"));
            return;
        }
        if handle
            .commands
            .send(RealSocketCommand::Forward(send.data))
            .is_err()
        {
            let _ = self
                .events
                .send(WsEvent::error(send.ws_id, "socket task has gone away"));
        }
    }

    fn close(&mut self, close: WsClose) {
        let Some(handle) = self.sockets.get(&close.ws_id) else {
            debug!(ws_id = %close.ws_id, "ws-close for unknown socket");
            return;
        };
        // The entry must outlive the close handshake: the task stays in
        // its loop until the remote confirmation arrives, emits the
        // close event, and is then reaped through the done channel.
        if handle
            .commands
            .send(RealSocketCommand::Close {
                code: close.code,
                reason: close.reason,
            })
            .is_err()
        {
            // Task already gone; synthesize the close so the page is
            // not stuck in the closing state.
            let _ = self.events.send(WsEvent {
                was_clean: Some(false),
                ..WsEvent::bare(close.ws_id.clone(), WsEventKind::Close)
            });
            self.sockets.remove(&close.ws_id);
        }
    }

    /// Idempotent removal, also driven by task completion.
    pub(crate) fn remove(&mut self, id: &SocketId) {
        self.sockets.remove(id);
    }

    pub(crate) fn len(&self) -> usize {
        self.sockets.len()
    }

    /// Force-close everything. No orphaned real connection survives a
    /// disconnected bridge.
    pub(crate) fn shutdown(&mut self) {
        for (id, handle) in self.sockets.drain() {
            debug!(ws_id = %id, "force-closing socket after bridge disconnect");
            let _ = handle.commands.send(RealSocketCommand::Close {
                code: Some(1001),
                reason: Some("bridge disconnected".to_string()),
            });
        }
    }
}

/// One real socket's lifetime: connect, pump both directions, report
/// every transition as a ws-event under the same id.
async fn run_socket(
    id: SocketId,
    url: String,
    protocols: Vec<String>,
    mut commands: mpsc::UnboundedReceiver<RealSocketCommand>,
    events: SocketEventSender,
    open_flag: Arc<AtomicBool>,
    done: mpsc::UnboundedSender<SocketId>,
) {
    let stream = match connect(&url, &protocols).await {
        Ok(stream) => stream,
        Err(message) => {
            warn!(ws_id = %id, url, "socket connect failed: {}", message);
            let _ = events.send(WsEvent::error(id.clone(), message));
            let _ = events.send(WsEvent {
                was_clean: Some(false),
                ..WsEvent::bare(id.clone(), WsEventKind::Close)
            });
            let _ = done.send(id);
            return;
        }
    };

    open_flag.store(true, Ordering::SeqCst);
    let _ = events.send(WsEvent::bare(id.clone(), WsEventKind::Open));
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(RealSocketCommand::Forward(payload)) => {
                    let message = match payload {
                        WsPayload::Text(text) => Message::text(text),
                        WsPayload::Binary(bytes) => Message::binary(bytes),
                    };
                    if let Err(e) = write.send(message).await {
                        let _ = events.send(WsEvent::error(id.clone(), e.to_string()));
                        break;
                    }
                }
                Some(RealSocketCommand::Close { code, reason }) => {
                    let frame = CloseFrame {
                        code: code.map(CloseCode::from).unwrap_or(CloseCode::Normal),
                        reason: reason.unwrap_or_default().into(),
                    };
                    if let Err(e) = write.send(Message::Close(Some(frame))).await {
                        let _ = events.send(WsEvent::error(id.clone(), e.to_string()));
                        break;
                    }
                    // Stay in the loop: the close event is only emitted
                    // once the remote side confirms.
                }
                None => {
                    // Force-close path: the table has already dropped us.
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    trace!(ws_id = %id, "text frame relayed to page");
                    let _ = events.send(WsEvent {
                        data: Some(WsPayload::Text(text.to_string())),
                        ..WsEvent::bare(id.clone(), WsEventKind::Message)
                    });
                }
                Some(Ok(Message::Binary(bytes))) => {
                    trace!(ws_id = %id, bytes = bytes.len(), "binary frame relayed to page");
                    let _ = events.send(WsEvent {
                        data: Some(WsPayload::Binary(bytes.to_vec())),
                        ..WsEvent::bare(id.clone(), WsEventKind::Message)
                    });
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(frame) => (
                            Some(u16::from(frame.code)),
                            Some(frame.reason.to_string()),
                        ),
                        None => (None, None),
                    };
                    let _ = events.send(WsEvent {
                        code,
                        reason,
                        was_clean: Some(true),
                        ..WsEvent::bare(id.clone(), WsEventKind::Close)
                    });
                    break;
                }
                // Ping/pong are answered by the protocol layer.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = events.send(WsEvent::error(id.clone(), e.to_string()));
                    let _ = events.send(WsEvent {
                        was_clean: Some(false),
                        ..WsEvent::bare(id.clone(), WsEventKind::Close)
                    });
                    break;
                }
                None => {
                    let _ = events.send(WsEvent {
                        was_clean: Some(false),
                        ..WsEvent::bare(id.clone(), WsEventKind::Close)
                    });
                    break;
                }
            },
        }
    }

    open_flag.store(false, Ordering::SeqCst);
    debug!(ws_id = %id, "real socket task finished");
    let _ = done.send(id);
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn connect(url: &str, protocols: &[String]) -> Result<WsStream, String> {
    let mut request = url.into_client_request().map_err(|e| e.to_string())?;
    if !protocols.is_empty() {
        // Subprotocols pass through verbatim; negotiation is the
        // server's business.
        let value =
            HeaderValue::from_str(&protocols.join(", ")).map_err(|e| e.to_string())?;
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", value);
    }
    let (stream, _response) = connect_async(request).await.map_err(|e| e.to_string())?;
    Ok(stream)
}
