//! Real fetch execution on behalf of the interceptor.
//!
//! Reconstructs a native request from its serialized form, performs it
//! over TCP (with rustls for https), and shapes the outcome into a
//! fetch-response payload. Failures of any kind — bad input, connect
//! errors, timeouts, oversized bodies — become `{ok:false, error}`
//! replies so the page-side promise is never leaked.

use std::sync::Arc;
use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE, HOST, USER_AGENT};
use hyper::{Method, Request, Uri};
use rustls::ClientConfig;
use thiserror::Error;
use tokio_rustls::TlsConnector;
use tracing::{debug, trace, warn};

use bridge_protocol::{
    deserialize_body, Body, FetchRequestPayload, FetchResponsePayload, SerializedBody,
};

use crate::multipart::{encode_multipart, generate_boundary};

/// Relay-side HTTP errors. These never escape: each becomes the
/// `error` field of a reply.
#[derive(Debug, Error)]
pub enum RelayHttpError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("request timeout")]
    Timeout,

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("response body too large ({0} bytes)")]
    BodyTooLarge(usize),

    #[error("body read error: {0}")]
    BodyError(String),
}

/// Relay HTTP configuration.
#[derive(Debug, Clone)]
pub struct RelayHttpConfig {
    /// Overall request timeout.
    pub timeout: Duration,
    /// User-Agent string sent with relayed requests.
    pub user_agent: String,
    /// Maximum buffered response body size.
    pub max_body_size: usize,
}

impl Default for RelayHttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: "netbridge-relay/0.1".to_string(),
            max_body_size: 10 * 1024 * 1024, // 10 MB
        }
    }
}

/// Performs real fetches for the relay.
#[derive(Clone)]
pub struct HttpPerformer {
    config: RelayHttpConfig,
}

impl HttpPerformer {
    pub fn new(config: RelayHttpConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(RelayHttpConfig::default())
    }

    /// Perform one serialized fetch and shape the reply.
    ///
    /// Infallible by design: errors are folded into the payload.
    pub async fn perform(&self, payload: FetchRequestPayload) -> FetchResponsePayload {
        let url = payload.url.clone();
        match tokio::time::timeout(self.config.timeout, self.perform_inner(payload)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(url, "relayed fetch failed: {}", e);
                error_payload(e.to_string())
            }
            Err(_) => {
                warn!(url, "relayed fetch timed out");
                error_payload(RelayHttpError::Timeout.to_string())
            }
        }
    }

    async fn perform_inner(
        &self,
        payload: FetchRequestPayload,
    ) -> Result<FetchResponsePayload, RelayHttpError> {
        let uri: Uri = payload
            .url
            .parse()
            .map_err(|e: hyper::http::uri::InvalidUri| RelayHttpError::InvalidUrl(e.to_string()))?;
        let host = uri
            .host()
            .ok_or_else(|| RelayHttpError::InvalidUrl("no host in URL".to_string()))?
            .to_string();
        let is_https = uri.scheme_str() == Some("https");
        let port = uri.port_u16().unwrap_or(if is_https { 443 } else { 80 });

        let init = payload.init;
        let method = match &init.method {
            Some(m) => Method::from_bytes(m.as_bytes())
                .map_err(|e| RelayHttpError::InvalidRequest(e.to_string()))?,
            None => Method::GET,
        };
        if let Some(credentials) = init.credentials {
            // Carried verbatim for fidelity; the relay has no cookie jar.
            trace!(?credentials, "credentials mode forwarded");
        }

        let (body_bytes, body_content_type) = rebuild_body(init.body);
        let has_content_type = init
            .headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("content-type"));

        let mut builder = Request::builder()
            .method(method)
            .uri(&uri)
            .header(USER_AGENT, &self.config.user_agent)
            .header(HOST, &host);
        for (name, value) in &init.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| RelayHttpError::InvalidRequest(e.to_string()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| RelayHttpError::InvalidRequest(e.to_string()))?;
            builder = builder.header(name, value);
        }
        if !has_content_type {
            if let Some(content_type) = &body_content_type {
                builder = builder.header(
                    CONTENT_TYPE,
                    HeaderValue::from_str(content_type)
                        .map_err(|e| RelayHttpError::InvalidRequest(e.to_string()))?,
                );
            }
        }
        let request = builder
            .body(Full::new(Bytes::from(body_bytes)))
            .map_err(|e| RelayHttpError::HttpError(e.to_string()))?;

        let addr = format!("{}:{}", host, port);
        let stream = tokio::net::TcpStream::connect(&addr)
            .await
            .map_err(|e| RelayHttpError::ConnectionFailed(e.to_string()))?;

        let response = if is_https {
            let mut root_store = rustls::RootCertStore::empty();
            root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            let tls_config = ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth();
            let connector = TlsConnector::from(Arc::new(tls_config));
            let server_name = rustls::pki_types::ServerName::try_from(host.clone())
                .map_err(|_| RelayHttpError::TlsError("invalid server name".to_string()))?;
            let tls_stream = connector
                .connect(server_name, stream)
                .await
                .map_err(|e| RelayHttpError::TlsError(e.to_string()))?;

            let io = hyper_util::rt::TokioIo::new(tls_stream);
            let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
                .await
                .map_err(|e| RelayHttpError::HttpError(e.to_string()))?;
            tokio::spawn(async move {
                if let Err(e) = conn.await {
                    debug!("connection error: {}", e);
                }
            });
            sender.send_request(request).await
        } else {
            let io = hyper_util::rt::TokioIo::new(stream);
            let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
                .await
                .map_err(|e| RelayHttpError::HttpError(e.to_string()))?;
            tokio::spawn(async move {
                if let Err(e) = conn.await {
                    debug!("connection error: {}", e);
                }
            });
            sender.send_request(request).await
        }
        .map_err(|e| RelayHttpError::HttpError(e.to_string()))?;

        let status = response.status();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).to_string(),
                )
            })
            .collect();

        // Buffer frame by frame so the size cap bounds memory, not just
        // the reply.
        let mut incoming = response.into_body();
        let mut body_bytes: Vec<u8> = Vec::new();
        while let Some(frame) = incoming.frame().await {
            let frame = frame.map_err(|e| RelayHttpError::BodyError(e.to_string()))?;
            if let Some(data) = frame.data_ref() {
                if body_bytes.len() + data.len() > self.config.max_body_size {
                    return Err(RelayHttpError::BodyTooLarge(body_bytes.len() + data.len()));
                }
                body_bytes.extend_from_slice(data);
            }
        }
        let body = String::from_utf8_lossy(&body_bytes).to_string();

        debug!(
            url = %uri,
            status = status.as_u16(),
            bytes = body_bytes.len(),
            "relayed fetch completed"
        );

        Ok(FetchResponsePayload {
            ok: Some(status.is_success()),
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            headers,
            body,
            error: None,
        })
    }
}

fn error_payload(message: String) -> FetchResponsePayload {
    FetchResponsePayload {
        ok: Some(false),
        status: 0,
        status_text: String::new(),
        headers: vec![],
        body: String::new(),
        error: Some(message),
    }
}

/// Rebuild request bytes and an implied content type from the wire body.
///
/// Exact inverse of the page-side serialization: blobs come back with
/// their mime, forms are re-encoded as multipart in original field
/// order.
fn rebuild_body(body: SerializedBody) -> (Vec<u8>, Option<String>) {
    match deserialize_body(body) {
        Body::None => (vec![], None),
        Body::Text(text) => (text.into_bytes(), None),
        Body::Bytes(bytes) => (bytes, None),
        Body::Blob(blob) => (blob.bytes, Some(blob.mime)),
        Body::FormData(form) => {
            let boundary = generate_boundary();
            let encoded = encode_multipart(form.fields(), &boundary);
            (
                encoded,
                Some(format!("multipart/form-data; boundary={}", boundary)),
            )
        }
        // Never produced by deserialization; the wire union has no
        // url-encoded or stream variant.
        Body::UrlEncoded(_) | Body::Stream => (vec![], None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_protocol::{Blob, FetchInit, FormData};

    #[test]
    fn test_rebuild_text_body() {
        let (bytes, content_type) = rebuild_body(SerializedBody::Text {
            value: "hello".to_string(),
        });
        assert_eq!(bytes, b"hello");
        assert!(content_type.is_none());
    }

    #[test]
    fn test_rebuild_blob_carries_mime() {
        let blob = Blob::new("image/png", vec![1, 2, 3]);
        let (bytes, content_type) = rebuild_body(SerializedBody::Blob {
            mime: blob.mime.clone(),
            bytes: blob.bytes.clone(),
        });
        assert_eq!(bytes, vec![1, 2, 3]);
        assert_eq!(content_type.as_deref(), Some("image/png"));
    }

    #[test]
    fn test_rebuild_form_is_multipart() {
        let mut form = FormData::new();
        form.append_text("a", "1");
        let (bytes, content_type) = rebuild_body(SerializedBody::FormData {
            fields: form.into_fields(),
        });
        let content_type = content_type.unwrap();
        assert!(content_type.starts_with("multipart/form-data; boundary="));
        let boundary = content_type.split('=').nth(1).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains(boundary));
        assert!(text.contains("name=\"a\""));
    }

    #[tokio::test]
    async fn test_unreachable_host_becomes_error_reply() {
        let performer = HttpPerformer::new(RelayHttpConfig {
            timeout: Duration::from_secs(2),
            ..RelayHttpConfig::default()
        });
        let payload = performer
            .perform(FetchRequestPayload {
                // Reserved TEST-NET-1 address: nothing listens there.
                url: "http://192.0.2.1:9/".to_string(),
                init: FetchInit::default(),
            })
            .await;
        assert_eq!(payload.ok, Some(false));
        assert!(payload.error.is_some());
    }

    #[tokio::test]
    async fn test_slow_server_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Accept and then stall without ever answering.
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
            drop(stream);
        });

        let performer = HttpPerformer::new(RelayHttpConfig {
            timeout: Duration::from_millis(200),
            ..RelayHttpConfig::default()
        });
        let payload = performer
            .perform(FetchRequestPayload {
                url: format!("http://{}/", addr),
                init: FetchInit::default(),
            })
            .await;
        assert_eq!(payload.ok, Some(false));
        assert_eq!(payload.error.as_deref(), Some("request timeout"));
    }

    #[tokio::test]
    async fn test_oversized_body_becomes_error_reply() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut head = [0u8; 1024];
            let _ = stream.read(&mut head).await;
            let body = vec![b'x'; 4096];
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.write_all(&body).await.unwrap();
        });

        let performer = HttpPerformer::new(RelayHttpConfig {
            max_body_size: 1024,
            ..RelayHttpConfig::default()
        });
        let payload = performer
            .perform(FetchRequestPayload {
                url: format!("http://{}/", addr),
                init: FetchInit::default(),
            })
            .await;
        assert_eq!(payload.ok, Some(false));
        assert!(payload.error.unwrap().contains("too large"));
    }

    #[tokio::test]
    async fn test_invalid_url_becomes_error_reply() {
        let performer = HttpPerformer::with_defaults();
        let payload = performer
            .perform(FetchRequestPayload {
                url: "not a url at all".to_string(),
                init: FetchInit::default(),
            })
            .await;
        assert_eq!(payload.ok, Some(false));
        assert!(payload.error.unwrap().contains("invalid URL"));
    }
}
