//! Correlation behavior across the bridge, driven by a scripted relay.
//!
//! These tests hold the relay ends of both channels and answer frames
//! by hand, so completion order and duplicate replies can be forced
//! deterministically.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::time::timeout;

use bridge_interceptor::{
    BridgeConfig, ConfigCache, FetchError, FetchOptions, Interceptor, InterceptorOptions,
    NativeFetch, NativeSocket, NativeSocketFactory, PageContext, PageResponse, ReadyState,
    SocketError,
};
use bridge_protocol::{FetchResponse, FetchResponsePayload, WsEvent, WsEventKind, WsPayload};
use bridge_transport::{fetch_channel, socket_channel, FetchRelayEnd, SocketRelayEnd};

struct UnreachableNativeFetch;

impl NativeFetch for UnreachableNativeFetch {
    fn fetch(
        &self,
        url: &str,
        _options: FetchOptions,
    ) -> BoxFuture<'static, Result<PageResponse, FetchError>> {
        panic!("native fetch reached for {}", url);
    }
}

struct UnreachableSocketFactory;

impl NativeSocketFactory for UnreachableSocketFactory {
    fn connect(&self, url: &str, _protocols: &[String]) -> Box<dyn NativeSocket> {
        panic!("native socket constructor reached for {}", url);
    }
}

fn proxied_config() -> ConfigCache {
    let cache = ConfigCache::new();
    cache.set(BridgeConfig {
        domain_rules: "*.example.com".to_string(),
        enable_ssl: true,
        service_address: "svc.local".to_string(),
    });
    cache
}

fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

fn install() -> (Interceptor, FetchRelayEnd, SocketRelayEnd) {
    init_tracing();
    let (fetch_page, fetch_relay) = fetch_channel();
    let (socket_page, socket_relay) = socket_channel();
    let context = PageContext::new("https://app.example.com");
    let outcome = context.install(
        InterceptorOptions {
            config: proxied_config(),
            evaluator: Arc::new(|_: &str, _: &str| true),
            native_fetch: Arc::new(UnreachableNativeFetch),
            native_sockets: Arc::new(UnreachableSocketFactory),
        },
        fetch_page,
        socket_page,
    );
    assert!(outcome.newly_installed());
    (outcome.interceptor().clone(), fetch_relay, socket_relay)
}

fn reply(body: &str, request_id: bridge_protocol::RequestId) -> FetchResponse {
    FetchResponse {
        request_id,
        payload: FetchResponsePayload {
            ok: Some(true),
            status: 200,
            status_text: "OK".to_string(),
            headers: vec![],
            body: body.to_string(),
            error: None,
        },
        error: None,
    }
}

#[tokio::test]
async fn test_reverse_order_replies_resolve_their_own_callers() {
    let (interceptor, mut fetch_relay, _socket_relay) = install();

    let fetches: Vec<_> = (0..5)
        .map(|i| {
            let interceptor = interceptor.clone();
            tokio::spawn(async move {
                interceptor
                    .fetch(
                        &format!("https://svc.local/call/{}", i),
                        FetchOptions::default(),
                    )
                    .await
            })
        })
        .collect();

    // Collect all five outstanding requests, then answer them in
    // reverse arrival order, each tagged with its request's path.
    let mut requests = Vec::new();
    for _ in 0..5 {
        requests.push(
            timeout(Duration::from_secs(5), fetch_relay.recv())
                .await
                .unwrap()
                .unwrap(),
        );
    }
    assert_eq!(interceptor.pending_fetches(), 5);

    for request in requests.into_iter().rev() {
        let body = request.payload.url.clone();
        fetch_relay
            .send(reply(&body, request.request_id))
            .await
            .unwrap();
    }

    for (i, handle) in fetches.into_iter().enumerate() {
        let response = handle.await.unwrap().unwrap();
        assert_eq!(response.body, format!("https://svc.local/call/{}", i));
    }
    assert_eq!(interceptor.pending_fetches(), 0);
}

#[tokio::test]
async fn test_duplicate_reply_is_ignored() {
    let (interceptor, mut fetch_relay, _socket_relay) = install();

    let call = {
        let interceptor = interceptor.clone();
        tokio::spawn(async move {
            interceptor
                .fetch("https://svc.local/api", FetchOptions::default())
                .await
        })
    };

    let request = timeout(Duration::from_secs(5), fetch_relay.recv())
        .await
        .unwrap()
        .unwrap();
    fetch_relay
        .send(reply("first", request.request_id.clone()))
        .await
        .unwrap();
    // A second reply for the same id must be silently dropped.
    fetch_relay
        .send(reply("second", request.request_id))
        .await
        .unwrap();

    let response = call.await.unwrap().unwrap();
    assert_eq!(response.body, "first");
    assert_eq!(interceptor.pending_fetches(), 0);
}

#[tokio::test]
async fn test_error_reply_rejects_only_its_own_caller() {
    let (interceptor, mut fetch_relay, _socket_relay) = install();

    let failing = {
        let interceptor = interceptor.clone();
        tokio::spawn(async move {
            interceptor
                .fetch("https://svc.local/fails", FetchOptions::default())
                .await
        })
    };
    let succeeding = {
        let interceptor = interceptor.clone();
        tokio::spawn(async move {
            interceptor
                .fetch("https://svc.local/works", FetchOptions::default())
                .await
        })
    };

    for _ in 0..2 {
        let request = timeout(Duration::from_secs(5), fetch_relay.recv())
            .await
            .unwrap()
            .unwrap();
        if request.payload.url.ends_with("/fails") {
            fetch_relay
                .send(FetchResponse {
                    request_id: request.request_id,
                    payload: FetchResponsePayload {
                        ok: Some(false),
                        status: 0,
                        status_text: String::new(),
                        headers: vec![],
                        body: String::new(),
                        error: Some("connection refused".to_string()),
                    },
                    error: None,
                })
                .await
                .unwrap();
        } else {
            fetch_relay
                .send(reply("fine", request.request_id))
                .await
                .unwrap();
        }
    }

    let failed = failing.await.unwrap();
    assert!(matches!(failed, Err(FetchError::Relay(m)) if m == "connection refused"));
    let succeeded = succeeding.await.unwrap().unwrap();
    assert_eq!(succeeded.body, "fine");
}

#[tokio::test]
async fn test_socket_lifecycle_follows_remote_events() {
    let (interceptor, _fetch_relay, mut socket_relay) = install();

    let socket = interceptor
        .open_socket("wss://svc.local/stream", vec!["debug.v1".to_string()])
        .unwrap();
    let socket = socket.as_virtual().expect("eligible socket is proxied");
    assert_eq!(socket.ready_state(), ReadyState::Connecting);
    assert_eq!(interceptor.live_sockets(), 1);

    // The relay sees the open command carrying the protocol list.
    let command = timeout(Duration::from_secs(5), socket_relay.recv())
        .await
        .unwrap()
        .unwrap();
    let open = match command {
        bridge_transport::SocketCommand::Open(open) => open,
        other => panic!("expected ws-open, got {:?}", other),
    };
    assert_eq!(open.protocols, vec!["debug.v1".to_string()]);

    // send before the open event raises, like the native API.
    assert!(matches!(
        socket.send(WsPayload::Text("early".to_string())),
        Err(SocketError::NotOpen(0))
    ));

    socket_relay
        .sender()
        .send(WsEvent::bare(open.ws_id.clone(), WsEventKind::Open))
        .unwrap();
    // Event dispatch runs on the interceptor's background task.
    timeout(Duration::from_secs(5), async {
        while socket.ready_state() != ReadyState::Open {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    socket.send(WsPayload::Binary(vec![1, 2, 3])).unwrap();
    let command = timeout(Duration::from_secs(5), socket_relay.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        command,
        bridge_transport::SocketCommand::Send(send)
            if send.data == WsPayload::Binary(vec![1, 2, 3])
    ));

    socket.close(Some(1000), Some("done".to_string())).unwrap();
    assert_eq!(socket.ready_state(), ReadyState::Closing);

    socket_relay
        .sender()
        .send(WsEvent {
            code: Some(1000),
            reason: Some("done".to_string()),
            was_clean: Some(true),
            ..WsEvent::bare(open.ws_id, WsEventKind::Close)
        })
        .unwrap();
    timeout(Duration::from_secs(5), async {
        while socket.ready_state() != ReadyState::Closed {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(interceptor.live_sockets(), 0);

    // Closing again is a no-op.
    socket.close(None, None).unwrap();
}
