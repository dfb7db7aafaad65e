//! The relay loop: one per bridged page instance.
//!
//! Single-task event dispatch over both transport channels. Fetches are
//! handled concurrently in spawned tasks; socket commands are applied to
//! the table in arrival order, which preserves per-socket ordering. The
//! loop ends when the long-lived socket channel disconnects, and every
//! socket it was backing is force-closed on the way out.

use tokio::sync::mpsc;
use tracing::{debug, info};

use bridge_protocol::FetchResponse;
use bridge_transport::{FetchRelayEnd, SocketRelayEnd};

use crate::http::{HttpPerformer, RelayHttpConfig};
use crate::socket::SocketTable;

/// The privileged relay for one page instance.
pub struct Relay {
    http: HttpPerformer,
}

impl Relay {
    pub fn new(config: RelayHttpConfig) -> Self {
        Self {
            http: HttpPerformer::new(config),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RelayHttpConfig::default())
    }

    /// Serve the bridge until the long-lived channel disconnects.
    pub async fn run(self, mut fetch_end: FetchRelayEnd, mut socket_end: SocketRelayEnd) {
        let responder = fetch_end.sender();
        let events = socket_end.sender();
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let mut table = SocketTable::new(events, done_tx);
        let mut fetch_open = true;

        info!("relay serving bridge");
        loop {
            tokio::select! {
                request = fetch_end.recv(), if fetch_open => match request {
                    Some(request) => {
                        let http = self.http.clone();
                        let responder = responder.clone();
                        tokio::spawn(async move {
                            let request_id = request.request_id.clone();
                            let payload = http.perform(request.payload).await;
                            let reply = FetchResponse {
                                request_id,
                                payload,
                                error: None,
                            };
                            if responder.send(reply).await.is_err() {
                                debug!("page gone before fetch reply could be delivered");
                            }
                        });
                    }
                    None => {
                        debug!("fetch channel closed");
                        fetch_open = false;
                    }
                },
                command = socket_end.recv() => match command {
                    Some(command) => table.handle(command),
                    None => break,
                },
                Some(id) = done_rx.recv() => table.remove(&id),
            }
        }

        info!(sockets = table.len(), "bridge disconnected; tearing down");
        table.shutdown();
    }
}
