// ── AES-256-CBC frame codec ──
//
// The bridge speaks AES-256-CBC with a null-byte padding scheme that is
// neither PKCS#7 nor ISO 7816: pad = 16 - (len % 16), and an already
// aligned payload still receives a full block of zeroes. Encrypted frames
// travel as base64 text terminated by a single 0x04 byte. Both sides must
// reproduce this bit-for-bit.

use std::fmt;

use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;

use crate::error::ProtoError;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// End-of-transmission marker appended to every encrypted frame.
pub const FRAME_TERMINATOR: u8 = 0x04;

const BLOCK: usize = 16;

/// AES key + IV for one WebSocket session.
///
/// Generated locally during the key exchange and never reused across
/// sessions; a reconnect runs the handshake again with a fresh context.
#[derive(Clone)]
pub struct EncryptionContext {
    key: [u8; 32],
    iv: [u8; 16],
}

impl EncryptionContext {
    /// Generate a fresh context from the OS entropy source.
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        let mut iv = [0u8; 16];
        OsRng.fill_bytes(&mut key);
        OsRng.fill_bytes(&mut iv);
        Self { key, iv }
    }

    /// Build a context from known key material (peer side, tests).
    pub fn from_parts(key: [u8; 32], iv: [u8; 16]) -> Self {
        Self { key, iv }
    }

    pub fn key(&self) -> &[u8; 32] {
        &self.key
    }

    pub fn iv(&self) -> &[u8; 16] {
        &self.iv
    }
}

// Key material stays out of logs.
impl fmt::Debug for EncryptionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionContext").finish_non_exhaustive()
    }
}

/// Number of padding bytes for a payload of `len` bytes: always in 1..=16.
pub fn pad_len(len: usize) -> usize {
    BLOCK - (len % BLOCK)
}

/// Serialize `payload` to JSON, pad, encrypt, and frame for the wire.
///
/// The returned string is base64 ciphertext followed by the `0x04`
/// terminator, ready to go out as a WebSocket text frame.
pub fn encrypt_frame<T: Serialize>(
    payload: &T,
    ctx: &EncryptionContext,
) -> Result<String, ProtoError> {
    let mut plain = serde_json::to_vec(payload)?;
    let padded_len = plain.len() + pad_len(plain.len());
    plain.resize(padded_len, 0);

    let ciphertext = Aes256CbcEnc::new(&ctx.key.into(), &ctx.iv.into())
        .encrypt_padded_vec_mut::<NoPadding>(&plain);

    let mut text = BASE64.encode(ciphertext);
    text.push(FRAME_TERMINATOR as char);
    Ok(text)
}

/// Decrypt a frame body (terminator already stripped) back into JSON.
///
/// Ciphertext that is not block-aligned is right-padded with zeroes before
/// decryption; some firmware revisions truncate frames mid-block. Trailing
/// null bytes in the plaintext are padding and are stripped before parsing.
pub fn decrypt_frame(
    body: &str,
    ctx: &EncryptionContext,
) -> Result<serde_json::Value, ProtoError> {
    let mut ciphertext = BASE64.decode(body)?;
    if ciphertext.len() % BLOCK != 0 {
        let aligned = ciphertext.len() + pad_len(ciphertext.len());
        ciphertext.resize(aligned, 0);
    }

    let mut plain = Aes256CbcDec::new(&ctx.key.into(), &ctx.iv.into())
        .decrypt_padded_vec_mut::<NoPadding>(&ciphertext)
        .map_err(|_| ProtoError::BlockAlignment)?;

    while plain.last() == Some(&0) {
        plain.pop();
    }

    let text = String::from_utf8(plain)?;
    Ok(serde_json::from_str(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_ctx() -> EncryptionContext {
        EncryptionContext::from_parts([7u8; 32], [3u8; 16])
    }

    #[test]
    fn round_trip_preserves_payload() {
        let ctx = test_ctx();
        let payload = json!({
            "type": 310,
            "mc": 42,
            "item": [{"deviceId": "D1", "switch": true, "dimmvalue": 50}],
        });

        let framed = encrypt_frame(&payload, &ctx).unwrap();
        assert!(framed.ends_with(FRAME_TERMINATOR as char));

        let body = framed.strip_suffix(FRAME_TERMINATOR as char).unwrap();
        let decoded = decrypt_frame(body, &ctx).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn padding_is_always_one_to_sixteen_bytes() {
        for len in 0..=64 {
            let pad = pad_len(len);
            assert!((1..=16).contains(&pad), "len {len} -> pad {pad}");
            assert_eq!((len + pad) % 16, 0, "len {len} not aligned after pad");
        }
    }

    #[test]
    fn aligned_payload_gets_a_full_extra_block() {
        let ctx = test_ctx();
        // Grow a string field until the serialized JSON is block-aligned,
        // then check that the ciphertext still grew by one block.
        for extra in 0..16 {
            let payload = json!({ "p": "x".repeat(extra) });
            let serialized = serde_json::to_vec(&payload).unwrap();
            let framed = encrypt_frame(&payload, &ctx).unwrap();
            let body = framed.strip_suffix(FRAME_TERMINATOR as char).unwrap();
            let ciphertext = BASE64.decode(body).unwrap();

            let expected = serialized.len() + pad_len(serialized.len());
            assert_eq!(ciphertext.len(), expected);
            if serialized.len() % 16 == 0 {
                assert_eq!(ciphertext.len(), serialized.len() + 16);
            }
        }
    }

    #[test]
    fn different_sessions_produce_different_ciphertext() {
        let payload = json!({"type": 2});
        let a = encrypt_frame(&payload, &test_ctx()).unwrap();
        let b = encrypt_frame(
            &payload,
            &EncryptionContext::from_parts([9u8; 32], [1u8; 16]),
        )
        .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn misaligned_ciphertext_is_realigned_not_panicking() {
        // Three bytes of garbage: zero-padded to one block, decrypted to
        // noise, rejected at the JSON stage rather than crashing.
        let result = decrypt_frame(&BASE64.encode([1u8, 2, 3]), &test_ctx());
        assert!(result.is_err());
    }

    #[test]
    fn garbage_base64_is_an_error() {
        assert!(decrypt_frame("not base64 at all!", &test_ctx()).is_err());
    }

    #[test]
    fn debug_does_not_leak_key_material() {
        let rendered = format!("{:?}", test_ctx());
        assert!(!rendered.contains('7'));
    }
}
