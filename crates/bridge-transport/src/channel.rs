//! Typed channel pairs built on tokio mpsc.
//!
//! Per-channel ordering is FIFO, which gives the protocol its only
//! ordering guarantee: frames for a single correlation id arrive in the
//! order they were sent. Dropping either end of a channel is the
//! disconnect signal — the surviving side's `recv` returns `None`.
//!
//! The fetch channel is bounded and async. The socket channel is
//! unbounded so the page side can post frames synchronously, matching
//! the native WebSocket API's synchronous `send`/`close`.

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use bridge_protocol::{
    BridgeMessage, Envelope, FetchRequest, FetchResponse, WsClose, WsEvent, WsOpen, WsSend,
};

/// Transport-level errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("channel disconnected")]
    Disconnected,

    #[error(transparent)]
    Protocol(#[from] bridge_protocol::ProtocolError),
}

const FETCH_CHANNEL_CAPACITY: usize = 64;

/// Wire frame: one serialized envelope.
type Frame = Vec<u8>;

fn encode(message: BridgeMessage) -> Result<Frame, TransportError> {
    Ok(Envelope::wrap(message).encode()?)
}

/// Decode a frame, dropping anything that is not a bridge message.
fn decode_or_skip(frame: &[u8]) -> Option<BridgeMessage> {
    match Envelope::decode(frame) {
        Ok(Some(message)) => Some(message),
        Ok(None) => None,
        Err(e) => {
            debug!("dropping malformed frame: {}", e);
            None
        }
    }
}

/// Page → relay messages on the socket channel.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketCommand {
    Open(WsOpen),
    Send(WsSend),
    Close(WsClose),
}

/// Clonable handle for posting fetch requests.
#[derive(Debug, Clone)]
pub struct FetchRequestSender {
    tx: mpsc::Sender<Frame>,
}

impl FetchRequestSender {
    /// Post one fetch-request frame.
    pub async fn send(&self, request: FetchRequest) -> Result<(), TransportError> {
        let frame = encode(BridgeMessage::FetchRequest(request))?;
        self.tx
            .send(frame)
            .await
            .map_err(|_| TransportError::Disconnected)
    }
}

/// Page end of the one-shot fetch channel.
pub struct FetchPageEnd {
    tx: mpsc::Sender<Frame>,
    rx: mpsc::Receiver<Frame>,
    raw_tx: mpsc::Sender<Frame>,
}

impl FetchPageEnd {
    /// Clonable request sender for concurrent callers.
    pub fn sender(&self) -> FetchRequestSender {
        FetchRequestSender {
            tx: self.tx.clone(),
        }
    }

    /// Receive the next fetch-response frame, skipping foreign traffic.
    ///
    /// Returns `None` once the relay end is gone.
    pub async fn recv(&mut self) -> Option<FetchResponse> {
        loop {
            let frame = self.rx.recv().await?;
            match decode_or_skip(&frame) {
                Some(BridgeMessage::FetchResponse(response)) => return Some(response),
                Some(other) => {
                    debug!("unexpected message on fetch channel: {:?}", other);
                }
                None => {}
            }
        }
    }

    /// Push raw bytes toward the relay end, bypassing typed encode.
    ///
    /// Exists so shared-bus noise (foreign scopes, malformed frames) can
    /// be simulated.
    pub async fn send_raw(&self, frame: Frame) -> Result<(), TransportError> {
        self.raw_tx
            .send(frame)
            .await
            .map_err(|_| TransportError::Disconnected)
    }
}

/// Clonable handle for posting fetch responses.
#[derive(Debug, Clone)]
pub struct FetchResponseSender {
    tx: mpsc::Sender<Frame>,
}

impl FetchResponseSender {
    /// Post one fetch-response frame.
    pub async fn send(&self, response: FetchResponse) -> Result<(), TransportError> {
        let frame = encode(BridgeMessage::FetchResponse(response))?;
        self.tx
            .send(frame)
            .await
            .map_err(|_| TransportError::Disconnected)
    }
}

/// Relay end of the one-shot fetch channel.
pub struct FetchRelayEnd {
    tx: mpsc::Sender<Frame>,
    rx: mpsc::Receiver<Frame>,
    raw_tx: mpsc::Sender<Frame>,
}

impl FetchRelayEnd {
    /// Clonable response sender for concurrent request handlers.
    pub fn sender(&self) -> FetchResponseSender {
        FetchResponseSender {
            tx: self.tx.clone(),
        }
    }

    /// Receive the next fetch-request frame, skipping foreign traffic.
    pub async fn recv(&mut self) -> Option<FetchRequest> {
        loop {
            let frame = self.rx.recv().await?;
            match decode_or_skip(&frame) {
                Some(BridgeMessage::FetchRequest(request)) => return Some(request),
                Some(other) => {
                    debug!("unexpected message on fetch channel: {:?}", other);
                }
                None => {}
            }
        }
    }

    /// Post one fetch-response frame back to the page.
    pub async fn send(&self, response: FetchResponse) -> Result<(), TransportError> {
        let frame = encode(BridgeMessage::FetchResponse(response))?;
        self.tx
            .send(frame)
            .await
            .map_err(|_| TransportError::Disconnected)
    }

    /// Push raw bytes toward the page end, bypassing typed encode.
    pub async fn send_raw(&self, frame: Frame) -> Result<(), TransportError> {
        self.raw_tx
            .send(frame)
            .await
            .map_err(|_| TransportError::Disconnected)
    }
}

/// Create the one-shot fetch request/response channel pair.
pub fn fetch_channel() -> (FetchPageEnd, FetchRelayEnd) {
    let (to_relay_tx, to_relay_rx) = mpsc::channel(FETCH_CHANNEL_CAPACITY);
    let (to_page_tx, to_page_rx) = mpsc::channel(FETCH_CHANNEL_CAPACITY);
    (
        FetchPageEnd {
            tx: to_relay_tx.clone(),
            rx: to_page_rx,
            raw_tx: to_relay_tx,
        },
        FetchRelayEnd {
            tx: to_page_tx.clone(),
            rx: to_relay_rx,
            raw_tx: to_page_tx,
        },
    )
}

/// Clonable handle for posting socket commands synchronously.
#[derive(Debug, Clone)]
pub struct SocketCommandSender {
    tx: mpsc::UnboundedSender<Frame>,
}

impl SocketCommandSender {
    /// Post one page → relay socket frame. Never blocks.
    pub fn send(&self, command: SocketCommand) -> Result<(), TransportError> {
        let message = match command {
            SocketCommand::Open(open) => BridgeMessage::WsOpen(open),
            SocketCommand::Send(send) => BridgeMessage::WsSend(send),
            SocketCommand::Close(close) => BridgeMessage::WsClose(close),
        };
        self.tx
            .send(encode(message)?)
            .map_err(|_| TransportError::Disconnected)
    }
}

/// Clonable handle for emitting socket events from the relay.
#[derive(Debug, Clone)]
pub struct SocketEventSender {
    tx: mpsc::UnboundedSender<Frame>,
}

impl SocketEventSender {
    /// Emit one ws-event frame toward the page. Never blocks.
    pub fn send(&self, event: WsEvent) -> Result<(), TransportError> {
        self.tx
            .send(encode(BridgeMessage::WsEvent(event))?)
            .map_err(|_| TransportError::Disconnected)
    }
}

/// Page end of the long-lived socket channel.
pub struct SocketPageEnd {
    tx: mpsc::UnboundedSender<Frame>,
    rx: mpsc::UnboundedReceiver<Frame>,
}

impl SocketPageEnd {
    /// Clonable command sender shared by every virtual socket.
    pub fn sender(&self) -> SocketCommandSender {
        SocketCommandSender {
            tx: self.tx.clone(),
        }
    }

    /// Receive the next ws-event frame, skipping foreign traffic.
    ///
    /// Returns `None` once the relay end is gone.
    pub async fn recv(&mut self) -> Option<WsEvent> {
        loop {
            let frame = self.rx.recv().await?;
            match decode_or_skip(&frame) {
                Some(BridgeMessage::WsEvent(event)) => return Some(event),
                Some(other) => {
                    debug!("unexpected message on socket channel: {:?}", other);
                }
                None => {}
            }
        }
    }

    /// Push raw bytes toward the relay end, bypassing typed encode.
    pub fn send_raw(&self, frame: Frame) -> Result<(), TransportError> {
        self.tx.send(frame).map_err(|_| TransportError::Disconnected)
    }
}

/// Relay end of the long-lived socket channel.
pub struct SocketRelayEnd {
    tx: mpsc::UnboundedSender<Frame>,
    rx: mpsc::UnboundedReceiver<Frame>,
}

impl SocketRelayEnd {
    /// Clonable event sender shared by every real-socket task.
    pub fn sender(&self) -> SocketEventSender {
        SocketEventSender {
            tx: self.tx.clone(),
        }
    }

    /// Receive the next socket command, skipping foreign traffic.
    ///
    /// `None` means the page side is gone: the channel disconnect that
    /// must tear down every socket it was backing.
    pub async fn recv(&mut self) -> Option<SocketCommand> {
        loop {
            let frame = self.rx.recv().await?;
            match decode_or_skip(&frame) {
                Some(BridgeMessage::WsOpen(open)) => return Some(SocketCommand::Open(open)),
                Some(BridgeMessage::WsSend(send)) => return Some(SocketCommand::Send(send)),
                Some(BridgeMessage::WsClose(close)) => return Some(SocketCommand::Close(close)),
                Some(other) => {
                    debug!("unexpected message on socket channel: {:?}", other);
                }
                None => {}
            }
        }
    }

    /// Push raw bytes toward the page end, bypassing typed encode.
    pub fn send_raw(&self, frame: Frame) -> Result<(), TransportError> {
        self.tx.send(frame).map_err(|_| TransportError::Disconnected)
    }
}

/// Create the long-lived socket framing channel pair.
pub fn socket_channel() -> (SocketPageEnd, SocketRelayEnd) {
    let (to_relay_tx, to_relay_rx) = mpsc::unbounded_channel();
    let (to_page_tx, to_page_rx) = mpsc::unbounded_channel();
    (
        SocketPageEnd {
            tx: to_relay_tx,
            rx: to_page_rx,
        },
        SocketRelayEnd {
            tx: to_page_tx,
            rx: to_relay_rx,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_protocol::{
        FetchInit, FetchResponsePayload, RequestId, SocketId, WsEventKind, WsPayload,
    };

    fn request(url: &str) -> FetchRequest {
        FetchRequest {
            request_id: RequestId::mint(),
            payload: bridge_protocol::FetchRequestPayload {
                url: url.to_string(),
                init: FetchInit::default(),
            },
        }
    }

    #[tokio::test]
    async fn test_fetch_round_trip() {
        let (page, mut relay) = fetch_channel();
        let sender = page.sender();

        let sent = request("https://svc.local/api");
        sender.send(sent.clone()).await.unwrap();

        let received = relay.recv().await.unwrap();
        assert_eq!(received, sent);
    }

    #[tokio::test]
    async fn test_fetch_response_round_trip() {
        let (mut page, relay) = fetch_channel();
        let response = FetchResponse {
            request_id: RequestId::mint(),
            payload: FetchResponsePayload {
                ok: Some(true),
                status: 200,
                status_text: "OK".to_string(),
                headers: vec![],
                body: "ok".to_string(),
                error: None,
            },
            error: None,
        };
        relay.send(response.clone()).await.unwrap();
        assert_eq!(page.recv().await.unwrap(), response);
    }

    #[tokio::test]
    async fn test_foreign_scope_frames_are_skipped() {
        let (page, mut relay) = fetch_channel();
        let noise = serde_json::to_vec(&serde_json::json!({
            "scope": "other-extension",
            "type": "fetch-request",
        }))
        .unwrap();
        page.send_raw(noise).await.unwrap();
        page.send_raw(b"not even json".to_vec()).await.unwrap();
        page.sender().send(request("https://svc.local/")).await.unwrap();

        // Only the real frame comes out.
        let received = relay.recv().await.unwrap();
        assert_eq!(received.payload.url, "https://svc.local/");
    }

    #[tokio::test]
    async fn test_socket_commands_in_order() {
        let (page, mut relay) = socket_channel();
        let sender = page.sender();
        let id = SocketId::mint();

        sender
            .send(SocketCommand::Open(WsOpen {
                ws_id: id.clone(),
                url: "wss://svc.local/ws".to_string(),
                protocols: vec![],
            }))
            .unwrap();
        sender
            .send(SocketCommand::Send(WsSend {
                ws_id: id.clone(),
                data: WsPayload::Binary(vec![9, 8, 7]),
            }))
            .unwrap();
        sender
            .send(SocketCommand::Close(WsClose {
                ws_id: id.clone(),
                code: Some(1000),
                reason: None,
            }))
            .unwrap();

        assert!(matches!(relay.recv().await, Some(SocketCommand::Open(_))));
        assert!(matches!(
            relay.recv().await,
            Some(SocketCommand::Send(WsSend { data: WsPayload::Binary(b), .. })) if b == vec![9, 8, 7]
        ));
        assert!(matches!(relay.recv().await, Some(SocketCommand::Close(_))));
    }

    #[tokio::test]
    async fn test_dropping_page_end_disconnects_relay() {
        let (page, mut relay) = socket_channel();
        drop(page);
        assert!(relay.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dropping_relay_end_fails_page_sends() {
        let (page, relay) = socket_channel();
        let sender = page.sender();
        drop(relay);
        // rx half of the page end still holds the to-page channel open;
        // the to-relay direction is what reports the disconnect.
        let result = sender.send(SocketCommand::Close(WsClose {
            ws_id: SocketId::mint(),
            code: None,
            reason: None,
        }));
        assert!(matches!(result, Err(TransportError::Disconnected)));
    }

    #[tokio::test]
    async fn test_event_delivery() {
        let (mut page, relay) = socket_channel();
        let id = SocketId::mint();
        relay
            .sender()
            .send(WsEvent::bare(id.clone(), WsEventKind::Open))
            .unwrap();
        let event = page.recv().await.unwrap();
        assert_eq!(event.ws_id, id);
        assert_eq!(event.event, WsEventKind::Open);
    }
}
