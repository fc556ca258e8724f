// ── RSA key wrap ──
//
// During the handshake the bridge sends its RSA public key and expects the
// freshly generated AES key + IV back, formatted as `hex(key):::hex(iv)`
// and encrypted with RSAES-PKCS1-v1_5. The `:::` delimiter is part of the
// protocol.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};

use crate::codec::EncryptionContext;
use crate::error::ProtoError;

const MIN_MODULUS_BITS: usize = 2048;
const SECRET_DELIMITER: &str = ":::";

/// Wrap the session secret for the bridge.
///
/// Accepts the PEM public key as received in PublicKeyResponse (SPKI
/// "PUBLIC KEY" or PKCS#1 "RSA PUBLIC KEY" headers; firmware varies) and
/// returns the base64 ciphertext for the SecretExchange message.
pub fn wrap_session_secret(
    pem: &str,
    ctx: &EncryptionContext,
) -> Result<String, ProtoError> {
    let key = parse_public_key(pem)?;

    let modulus_bits = key.size() * 8;
    if modulus_bits < MIN_MODULUS_BITS {
        return Err(ProtoError::PublicKey(format!(
            "modulus too small: {modulus_bits} bits (need >= {MIN_MODULUS_BITS})"
        )));
    }

    let secret = format!(
        "{}{}{}",
        hex::encode(ctx.key()),
        SECRET_DELIMITER,
        hex::encode(ctx.iv())
    );
    let wrapped = key.encrypt(&mut OsRng, Pkcs1v15Encrypt, secret.as_bytes())?;
    Ok(BASE64.encode(wrapped))
}

fn parse_public_key(pem: &str) -> Result<RsaPublicKey, ProtoError> {
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| ProtoError::PublicKey(e.to_string()))
}
