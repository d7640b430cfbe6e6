//! Small shared utilities: base64 header payloads and graceful shutdown.

pub mod b64;
pub mod sig_down;

pub use b64::Base64Bytes;
pub use sig_down::SigDown;
