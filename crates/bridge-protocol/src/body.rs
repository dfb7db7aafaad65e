//! Request-body representations.
//!
//! `Body` is the native-side view: the kinds of payload the intercepted
//! fetch accepts from page code. `SerializedBody` is the wire view: a
//! tagged union safe to ship across the bridge. Binary payloads are
//! always byte sequences, never strings, so no encoding step can corrupt
//! them. Multipart field order is preserved end to end because some
//! servers are order-sensitive.

use serde::{Deserialize, Serialize};

/// A blob-like payload: raw bytes plus their declared mime type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl Blob {
    pub fn new(mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime: mime.into(),
            bytes,
        }
    }
}

/// One field of a multipart form, in submission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FormField {
    /// Plain text field.
    Text { name: String, value: String },
    /// File field with its original file name and mime type.
    #[serde(rename_all = "camelCase")]
    File {
        name: String,
        file_name: String,
        mime: String,
        bytes: Vec<u8>,
    },
}

impl FormField {
    pub fn name(&self) -> &str {
        match self {
            Self::Text { name, .. } | Self::File { name, .. } => name,
        }
    }
}

/// An ordered multipart form body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormData {
    fields: Vec<FormField>,
}

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a text field, preserving insertion order.
    pub fn append_text(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push(FormField::Text {
            name: name.into(),
            value: value.into(),
        });
    }

    /// Append a file field, preserving insertion order.
    pub fn append_file(
        &mut self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        mime: impl Into<String>,
        bytes: Vec<u8>,
    ) {
        self.fields.push(FormField::File {
            name: name.into(),
            file_name: file_name.into(),
            mime: mime.into(),
            bytes,
        });
    }

    /// Fields in original append order.
    pub fn fields(&self) -> &[FormField] {
        &self.fields
    }

    pub fn into_fields(self) -> Vec<FormField> {
        self.fields
    }

    pub fn from_fields(fields: Vec<FormField>) -> Self {
        Self { fields }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Native-side body: what page code hands to the intercepted fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Body {
    /// No body at all.
    #[default]
    None,
    /// Plain text.
    Text(String),
    /// URL-encoded parameter pairs (reduces to text on the wire).
    UrlEncoded(Vec<(String, String)>),
    /// A raw binary buffer or typed view over one.
    Bytes(Vec<u8>),
    /// Blob/file-like content, fully read into memory.
    Blob(Blob),
    /// Multipart form, walked field by field.
    FormData(FormData),
    /// A streaming body. The bridge buffers everything up front, so
    /// streams are unsupported and degrade to no body.
    Stream,
}

/// Wire-side body: the transport-safe tagged union.
///
/// Re-serializing a reconstructed body must be indistinguishable from
/// the original: same byte content, same field order, same mime types.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SerializedBody {
    #[default]
    None,
    Text {
        value: String,
    },
    RawBytes {
        bytes: Vec<u8>,
    },
    Blob {
        mime: String,
        bytes: Vec<u8>,
    },
    FormData {
        fields: Vec<FormField>,
    },
}

impl SerializedBody {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}
