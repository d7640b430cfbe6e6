//! Base64 payloads as they travel in HTTP headers.
//!
//! The x402 wire format base64-encodes whole JSON documents into single
//! header values (`PAYMENT-SIGNATURE`, `PAYMENT-REQUIRED`,
//! `X-Payment-Response`). [`Base64Bytes`] holds the encoded form and
//! converts in both directions without committing to an owned allocation on
//! the read path.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as b64;
use std::borrow::Cow;
use std::fmt::Display;

/// Bytes that are the base64 encoding of some other bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base64Bytes<'a>(pub Cow<'a, [u8]>);

impl Base64Bytes<'_> {
    /// Decode to the raw binary payload.
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        b64.decode(&self.0)
    }

    /// Encode raw binary input into base64 bytes.
    pub fn encode<T: AsRef<[u8]>>(input: T) -> Base64Bytes<'static> {
        let encoded = b64.encode(input.as_ref());
        Base64Bytes(Cow::Owned(encoded.into_bytes()))
    }
}

impl AsRef<[u8]> for Base64Bytes<'_> {
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl<'a> From<&'a [u8]> for Base64Bytes<'a> {
    fn from(slice: &'a [u8]) -> Self {
        Base64Bytes(Cow::Borrowed(slice))
    }
}

impl Display for Base64Bytes<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.0.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let encoded = Base64Bytes::encode(b"{\"valid\":true}");
        assert_eq!(encoded.decode().unwrap(), b"{\"valid\":true}");
    }

    #[test]
    fn borrowed_input_decodes_without_copy_of_encoding() {
        let raw: &[u8] = b"eDQwMg==";
        let encoded = Base64Bytes::from(raw);
        assert_eq!(encoded.decode().unwrap(), b"x402");
    }

    #[test]
    fn invalid_base64_is_an_error() {
        assert!(Base64Bytes::from(&b"!!!"[..]).decode().is_err());
    }
}
