//! `Sec-WebSocket-Key`/`Sec-WebSocket-Accept` computation.
//!
//! `XAPI_GetWSKey` in the original C generates the client nonce via
//! `xstrrand` into a fixed-size stack buffer before base64-encoding it; we
//! generate 16 random bytes and base64-encode them the same way, which
//! yields the RFC 6455-mandated 24-character (22 + `==` padding) value.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use sha1::{Digest, Sha1};

/// The fixed GUID RFC 6455 §1.3 appends to the client key before hashing.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Generates a fresh client `Sec-WebSocket-Key` nonce: 16 random bytes,
/// base64-encoded.
pub fn client_key() -> String {
    let mut nonce = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut nonce);
    STANDARD.encode(nonce)
}

/// Computes the `Sec-WebSocket-Accept` value a compliant server/client
/// derives from a client's `Sec-WebSocket-Key`: `base64(sha1(key ++
/// GUID))`.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    let digest = hasher.finalize();
    STANDARD.encode(digest)
}

/// Validates a server's `Sec-WebSocket-Accept` response value against the
/// key this client sent.
pub fn validate_accept(sent_key: &str, received_accept: &str) -> bool {
    accept_key(sent_key) == received_accept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_rfc6455_example_vector() {
        // RFC 6455 §1.3 worked example.
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn client_key_is_24_chars_and_validates_itself() {
        let key = client_key();
        assert_eq!(key.len(), 24);
        let accept = accept_key(&key);
        assert!(validate_accept(&key, &accept));
        assert!(!validate_accept(&key, "wrong"));
    }
}
