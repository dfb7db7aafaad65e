//! netbridge page-side interceptor
//!
//! A drop-in stand-in for the page's fetch function and WebSocket
//! constructor. Non-eligible calls pass through to the captured native
//! implementations unchanged; eligible calls are serialized, tagged
//! with a correlation id, and proxied over the bridge to the privileged
//! relay, which owns the real network I/O.
//!
//! Flow:
//! 1. Page code calls fetch / opens a socket
//! 2. Eligibility check against the cached configuration
//! 3. If eligible: serialize, correlate, post over the transport
//! 4. Resolve the caller when the matching reply/events arrive

mod config;
mod eligibility;
mod fetch;
mod socket;

pub use config::{BridgeConfig, ConfigCache};
pub use eligibility::{should_proxy_url, DomainRuleEvaluator};
pub use fetch::{FetchError, FetchOptions, NativeFetch, PageResponse};
pub use socket::{
    BinaryType, EventListener, MessageData, ReadyState, SocketError, SocketEvent, VirtualSocket,
};

use std::sync::{Arc, OnceLock};

use tracing::{debug, info, trace};

use bridge_protocol::{
    serialize_body, FetchInit, FetchRequest, FetchRequestPayload, RequestId, SocketId, WsOpen,
    WsPayload,
};
use bridge_transport::{
    FetchPageEnd, FetchRequestSender, SocketCommand, SocketCommandSender, SocketPageEnd,
};

use crate::fetch::{into_page_response, PendingTable};
use crate::socket::SocketTable;

/// The captured original WebSocket implementation, used for
/// pass-through construction.
pub trait NativeSocket: Send + Sync {
    fn send(&self, data: WsPayload) -> Result<(), SocketError>;
    fn close(&self, code: Option<u16>, reason: Option<String>) -> Result<(), SocketError>;
    fn ready_state(&self) -> ReadyState;
}

/// Factory over the captured native WebSocket constructor.
pub trait NativeSocketFactory: Send + Sync {
    fn connect(&self, url: &str, protocols: &[String]) -> Box<dyn NativeSocket>;
}

/// What the intercepted constructor hands back: a proxied virtual
/// socket, or the native implementation untouched.
pub enum PageSocket {
    Proxied(VirtualSocket),
    Native(Box<dyn NativeSocket>),
}

impl PageSocket {
    pub fn send(&self, data: WsPayload) -> Result<(), SocketError> {
        match self {
            Self::Proxied(socket) => socket.send(data),
            Self::Native(socket) => socket.send(data),
        }
    }

    pub fn close(&self, code: Option<u16>, reason: Option<String>) -> Result<(), SocketError> {
        match self {
            Self::Proxied(socket) => socket.close(code, reason),
            Self::Native(socket) => socket.close(code, reason),
        }
    }

    pub fn ready_state(&self) -> ReadyState {
        match self {
            Self::Proxied(socket) => socket.ready_state(),
            Self::Native(socket) => socket.ready_state(),
        }
    }

    pub fn as_virtual(&self) -> Option<&VirtualSocket> {
        match self {
            Self::Proxied(socket) => Some(socket),
            Self::Native(_) => None,
        }
    }
}

/// Collaborators the interceptor is built from.
pub struct InterceptorOptions {
    /// Cached configuration snapshot, refreshed by the privileged side.
    pub config: ConfigCache,
    /// External domain-rule evaluator.
    pub evaluator: Arc<dyn DomainRuleEvaluator>,
    /// Captured native fetch, for pass-through.
    pub native_fetch: Arc<dyn NativeFetch>,
    /// Captured native WebSocket constructor, for pass-through.
    pub native_sockets: Arc<dyn NativeSocketFactory>,
}

struct Shared {
    page_origin: String,
    config: ConfigCache,
    evaluator: Arc<dyn DomainRuleEvaluator>,
    native_fetch: Arc<dyn NativeFetch>,
    native_sockets: Arc<dyn NativeSocketFactory>,
    pending: PendingTable,
    sockets: SocketTable,
    fetch_tx: FetchRequestSender,
    socket_tx: SocketCommandSender,
}

/// The installed interceptor for one page context.
#[derive(Clone)]
pub struct Interceptor {
    shared: Arc<Shared>,
}

impl Interceptor {
    fn spawn(
        page_origin: String,
        options: InterceptorOptions,
        mut fetch_end: FetchPageEnd,
        mut socket_end: SocketPageEnd,
    ) -> Self {
        let shared = Arc::new(Shared {
            page_origin,
            config: options.config,
            evaluator: options.evaluator,
            native_fetch: options.native_fetch,
            native_sockets: options.native_sockets,
            pending: PendingTable::default(),
            sockets: SocketTable::default(),
            fetch_tx: fetch_end.sender(),
            socket_tx: socket_end.sender(),
        });

        let dispatcher = shared.clone();
        tokio::spawn(async move {
            while let Some(response) = fetch_end.recv().await {
                dispatcher.pending.resolve(response);
            }
            debug!("fetch channel closed; pending entries will never resolve");
        });

        let dispatcher = shared.clone();
        tokio::spawn(async move {
            while let Some(event) = socket_end.recv().await {
                dispatcher.sockets.dispatch(event);
            }
            debug!("socket channel closed");
        });

        Self { shared }
    }

    /// Eligibility gate shared by fetch and socket construction.
    pub fn should_proxy(&self, url: &str) -> bool {
        should_proxy_url(
            self.shared.config.snapshot().as_ref(),
            &*self.shared.evaluator,
            &self.shared.page_origin,
            url,
        )
    }

    /// The intercepted fetch function.
    ///
    /// Behaves identically to the native implementation for
    /// non-eligible URLs; proxies eligible ones over the bridge and
    /// suspends until the matching reply arrives.
    pub async fn fetch(&self, url: &str, options: FetchOptions) -> Result<PageResponse, FetchError> {
        if !self.should_proxy(url) {
            trace!(url, "fetch passed through to native implementation");
            return self.shared.native_fetch.fetch(url, options).await;
        }

        let request_id = RequestId::mint();
        let init = FetchInit {
            headers: options.headers,
            method: options.method,
            credentials: options.credentials,
            body: serialize_body(options.body),
        };
        let rx = self.shared.pending.register(request_id.clone());
        let request = FetchRequest {
            request_id: request_id.clone(),
            payload: FetchRequestPayload {
                url: url.to_string(),
                init,
            },
        };
        if let Err(e) = self.shared.fetch_tx.send(request).await {
            self.shared.pending.discard(&request_id);
            return Err(e.into());
        }
        debug!(request_id = %request_id, url, "fetch proxied over bridge");

        let response = rx.await.map_err(|_| FetchError::BridgeClosed)?;
        into_page_response(response)
    }

    /// The intercepted WebSocket constructor.
    ///
    /// Registers the virtual socket and posts ws-open without blocking:
    /// the returned object starts in `Connecting` exactly like the
    /// native API.
    pub fn open_socket(
        &self,
        url: &str,
        protocols: Vec<String>,
    ) -> Result<PageSocket, SocketError> {
        if !self.should_proxy(url) {
            trace!(url, "socket passed through to native implementation");
            return Ok(PageSocket::Native(
                self.shared.native_sockets.connect(url, &protocols),
            ));
        }

        let ws_id = SocketId::mint();
        let socket = self.shared.sockets.register(
            ws_id.clone(),
            url.to_string(),
            protocols.clone(),
            self.shared.socket_tx.clone(),
        );
        if let Err(e) = self.shared.socket_tx.send(SocketCommand::Open(WsOpen {
            ws_id: ws_id.clone(),
            url: url.to_string(),
            protocols,
        })) {
            self.shared.sockets.remove(&ws_id);
            return Err(e.into());
        }
        info!(ws_id = %ws_id, url, "virtual socket opened");
        Ok(PageSocket::Proxied(socket))
    }

    /// The configuration cache the privileged side refreshes.
    pub fn config(&self) -> &ConfigCache {
        &self.shared.config
    }

    /// Outstanding proxied fetches (observability).
    pub fn pending_fetches(&self) -> usize {
        self.shared.pending.len()
    }

    /// Live virtual sockets (observability).
    pub fn live_sockets(&self) -> usize {
        self.shared.sockets.len()
    }
}

/// Whether an install call actually installed.
pub enum InstallOutcome {
    Installed(Interceptor),
    AlreadyInstalled(Interceptor),
}

impl InstallOutcome {
    pub fn interceptor(&self) -> &Interceptor {
        match self {
            Self::Installed(i) | Self::AlreadyInstalled(i) => i,
        }
    }

    pub fn newly_installed(&self) -> bool {
        matches!(self, Self::Installed(_))
    }
}

/// One page execution context.
///
/// Installation is idempotent: the first call captures the native
/// implementations and spawns the dispatchers, later calls return the
/// existing interceptor and discard their transport ends.
pub struct PageContext {
    origin: String,
    slot: OnceLock<Interceptor>,
}

impl PageContext {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            slot: OnceLock::new(),
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Install the interceptor into this context.
    pub fn install(
        &self,
        options: InterceptorOptions,
        fetch_end: FetchPageEnd,
        socket_end: SocketPageEnd,
    ) -> InstallOutcome {
        let mut newly = false;
        let interceptor = self.slot.get_or_init(|| {
            newly = true;
            Interceptor::spawn(self.origin.clone(), options, fetch_end, socket_end)
        });
        if newly {
            info!(origin = %self.origin, "interceptor installed");
            InstallOutcome::Installed(interceptor.clone())
        } else {
            debug!(origin = %self.origin, "install skipped, already present");
            InstallOutcome::AlreadyInstalled(interceptor.clone())
        }
    }

    /// The installed interceptor, if any.
    pub fn interceptor(&self) -> Option<&Interceptor> {
        self.slot.get()
    }
}
