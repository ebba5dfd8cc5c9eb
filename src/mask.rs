//! Payload masking.
//!
//! Client frames carry a 4-byte key XORed round-robin over the payload;
//! applying the same key again recovers the original bytes.

use rand::RngCore;

/// Creates a fresh masking key from a cryptographically strong source.
pub fn make_masking_key() -> [u8; 4] {
    let mut key = [0u8; 4];
    rand::rng().fill_bytes(&mut key);
    key
}

/// XORs `data` in place with `key`, repeating the key every 4 bytes.
///
/// The operation is its own inverse, so it both masks outgoing payloads
/// and unmasks incoming ones.
pub fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i & 3];
    }
}
