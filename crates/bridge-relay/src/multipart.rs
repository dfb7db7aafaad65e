//! Multipart re-encoding for reconstructed form bodies.
//!
//! The wire form carries an ordered field list; this rebuilds the
//! multipart/form-data byte stream in that exact order, since some
//! servers are order-sensitive. Files keep their original file name and
//! mime type.

use bridge_protocol::FormField;
use uuid::Uuid;

/// Generate a fresh multipart boundary.
pub fn generate_boundary() -> String {
    format!("----netbridge{}", Uuid::new_v4().simple())
}

/// Encode an ordered field list as a multipart/form-data body.
pub fn encode_multipart(fields: &[FormField], boundary: &str) -> Vec<u8> {
    let mut out = Vec::new();
    for field in fields {
        out.extend_from_slice(b"--");
        out.extend_from_slice(boundary.as_bytes());
        out.extend_from_slice(b"\r\n");
        match field {
            FormField::Text { name, value } => {
                out.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name)
                        .as_bytes(),
                );
                out.extend_from_slice(value.as_bytes());
            }
            FormField::File {
                name,
                file_name,
                mime,
                bytes,
            } => {
                out.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                        name, file_name
                    )
                    .as_bytes(),
                );
                out.extend_from_slice(format!("Content-Type: {}\r\n\r\n", mime).as_bytes());
                out.extend_from_slice(bytes);
            }
        }
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"--");
    out.extend_from_slice(boundary.as_bytes());
    out.extend_from_slice(b"--\r\n");
    out
}
