//! Body codec: lossless two-way conversion between the native body view
//! and the wire-safe tagged union.
//!
//! Serialize and deserialize are exact inverses for every supported
//! variant. The only lossy path is `Body::Stream`, which the bridge
//! cannot buffer-and-forward; it degrades to no body with a warning
//! rather than failing the whole request.

use tracing::warn;
use url::form_urlencoded;

use crate::body::{Blob, Body, FormData, SerializedBody};

/// Convert a native body into its wire representation.
pub fn serialize_body(body: Body) -> SerializedBody {
    match body {
        Body::None => SerializedBody::None,
        Body::Text(value) => SerializedBody::Text { value },
        Body::UrlEncoded(pairs) => {
            let mut encoder = form_urlencoded::Serializer::new(String::new());
            for (name, value) in &pairs {
                encoder.append_pair(name, value);
            }
            SerializedBody::Text {
                value: encoder.finish(),
            }
        }
        Body::Bytes(bytes) => SerializedBody::RawBytes { bytes },
        Body::Blob(blob) => SerializedBody::Blob {
            mime: blob.mime,
            bytes: blob.bytes,
        },
        Body::FormData(form) => SerializedBody::FormData {
            fields: form.into_fields(),
        },
        Body::Stream => {
            warn!("unsupported streaming body degraded to empty body");
            SerializedBody::None
        }
    }
}

/// Reconstruct a native body from its wire representation.
///
/// Exact inverse of [`serialize_body`]: multipart fields come back in
/// original order, files keep their name and mime type.
pub fn deserialize_body(body: SerializedBody) -> Body {
    match body {
        SerializedBody::None => Body::None,
        SerializedBody::Text { value } => Body::Text(value),
        SerializedBody::RawBytes { bytes } => Body::Bytes(bytes),
        SerializedBody::Blob { mime, bytes } => Body::Blob(Blob { mime, bytes }),
        SerializedBody::FormData { fields } => Body::FormData(FormData::from_fields(fields)),
    }
}
