//! Proxied fetch: correlation table and result plumbing.
//!
//! Each proxied call registers a pending resolver keyed by a fresh
//! request id, posts a fetch-request frame, and suspends until the
//! matching fetch-response arrives. Resolution is at-most-once: the
//! entry is removed before the caller is woken, duplicates are dropped,
//! and an abandoned caller just resolves into the void.

use std::collections::HashMap;
use std::sync::Mutex;

use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;

use bridge_protocol::{Body, CredentialsMode, FetchResponse, RequestId};
use bridge_transport::TransportError;

/// Native-side `RequestInit`: what page code hands to fetch.
#[derive(Debug, Default)]
pub struct FetchOptions {
    pub method: Option<String>,
    pub headers: Vec<(String, String)>,
    pub credentials: Option<CredentialsMode>,
    pub body: Body,
}

/// The response value handed back to page code, proxied or not.
#[derive(Debug, Clone, PartialEq)]
pub struct PageResponse {
    pub ok: bool,
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// Errors a page-side fetch call can reject with.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The relay reported a failure (network error, rebuild error, or a
    /// non-ok reply).
    #[error("{0}")]
    Relay(String),

    /// The bridge went away before a response arrived.
    #[error("bridge closed before a response arrived")]
    BridgeClosed,

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Pass-through failure from the captured native implementation.
    #[error("native fetch failed: {0}")]
    Native(String),
}

/// The captured original fetch implementation, used for pass-through.
pub trait NativeFetch: Send + Sync {
    fn fetch(
        &self,
        url: &str,
        options: FetchOptions,
    ) -> BoxFuture<'static, Result<PageResponse, FetchError>>;
}

/// Outstanding proxied fetches, keyed by request id.
#[derive(Default)]
pub(crate) struct PendingTable {
    entries: Mutex<HashMap<RequestId, oneshot::Sender<FetchResponse>>>,
}

impl PendingTable {
    /// Register a pending resolver for a freshly minted id.
    pub(crate) fn register(&self, id: RequestId) -> oneshot::Receiver<FetchResponse> {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(id, tx);
        rx
    }

    /// Resolve the matching caller, removing the entry first.
    ///
    /// Unknown or already-resolved ids are dropped with a log line; an
    /// abandoned caller makes the send a harmless no-op.
    pub(crate) fn resolve(&self, response: FetchResponse) {
        let Some(tx) = self.lock().remove(&response.request_id) else {
            debug!(request_id = %response.request_id, "response for unknown request dropped");
            return;
        };
        if tx.send(response).is_err() {
            debug!("caller abandoned its fetch; response resolved into the void");
        }
    }

    /// Drop a pending entry without resolving it.
    pub(crate) fn discard(&self, id: &RequestId) {
        self.lock().remove(id);
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<RequestId, oneshot::Sender<FetchResponse>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Turn a fetch-response frame into the caller's resolution.
pub(crate) fn into_page_response(response: FetchResponse) -> Result<PageResponse, FetchError> {
    if let Some(error) = response.error {
        return Err(FetchError::Relay(error));
    }
    let payload = response.payload;
    if let Some(error) = payload.error {
        return Err(FetchError::Relay(error));
    }
    if payload.ok == Some(false) {
        return Err(FetchError::Relay(format!(
            "fetch failed with status {} {}",
            payload.status, payload.status_text
        )));
    }
    let ok = payload
        .ok
        .unwrap_or(payload.status >= 200 && payload.status < 300);
    Ok(PageResponse {
        ok,
        status: payload.status,
        status_text: payload.status_text,
        headers: payload.headers,
        body: payload.body,
    })
}
