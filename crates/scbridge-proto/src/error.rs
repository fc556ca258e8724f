use thiserror::Error;

/// Failures at the wire level: framing, encryption, key wrap.
///
/// The session layer treats most of these as per-frame problems (log and
/// drop), not as session-fatal errors. Key-wrap failures abort the
/// handshake.
#[derive(Debug, Error)]
pub enum ProtoError {
    // ── Framing ─────────────────────────────────────────────────────
    /// Frame body was not valid base64.
    #[error("frame is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Decrypted payload was not valid UTF-8.
    #[error("decrypted frame is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Payload (or decrypted payload) was not valid JSON.
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame envelope was JSON but missed a mandatory field.
    #[error("frame envelope missing field `{0}`")]
    Envelope(&'static str),

    /// Ciphertext could not be block-aligned for decryption.
    #[error("ciphertext is not block-aligned")]
    BlockAlignment,

    // ── Key exchange ────────────────────────────────────────────────
    /// The bridge's public key was unusable (bad PEM or modulus too small).
    #[error("bridge public key rejected: {0}")]
    PublicKey(String),

    /// RSA encryption of the session secret failed.
    #[error("session secret wrap failed: {0}")]
    Rsa(#[from] rsa::Error),
}
