//! netbridge privileged relay
//!
//! The higher-trust half of the bridge: receives serialized fetch and
//! WebSocket frames from the page-side interceptor, performs the real
//! network I/O, and streams outcomes back under the same correlation
//! ids. Every failure is caught and reported as a reply — nothing is
//! ever allowed to escape the relay's execution context unhandled.

mod http;
mod multipart;
mod relay;
mod socket;

pub use http::{HttpPerformer, RelayHttpConfig, RelayHttpError};
pub use multipart::{encode_multipart, generate_boundary};
pub use relay::Relay;
