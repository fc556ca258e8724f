use thiserror::Error;

use scbridge_proto::ProtoError;

/// Top-level error type for the bridge client.
///
/// Connect-time failures come back from [`connect()`](crate::BridgeClient::connect);
/// per-frame problems are logged and dropped inside the session; command
/// failures surface from the individual facade calls.
#[derive(Debug, Error)]
pub enum BridgeError {
    // ── Configuration ───────────────────────────────────────────────
    /// A mandatory configuration value was empty at connect time.
    #[error("missing configuration value: {field}")]
    ConfigMissing { field: &'static str },

    // ── Connect / handshake ─────────────────────────────────────────
    /// Handshake or discovery did not finish inside the connect window.
    #[error("bridge did not become ready within {timeout_secs}s")]
    ConnectTimeout { timeout_secs: u64 },

    /// The bridge refused the connection during the handshake.
    #[error("bridge declined the connection: {reason}")]
    ConnectionDeclined { reason: String },

    /// The login exchange failed or the handshake derailed.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    // ── Session ─────────────────────────────────────────────────────
    /// A call that needs an authenticated session was made without one.
    #[error("not connected to the bridge")]
    NotConnected,

    /// A command was retried to exhaustion without an acknowledgement.
    #[error("no acknowledgement after {attempts} attempts")]
    AckTimeout { attempts: u32 },

    /// The bridge closed the socket.
    #[error("bridge closed the connection")]
    TransportClosed,

    /// WebSocket-level failure (connect refused, I/O error, protocol error).
    #[error("transport error: {0}")]
    Transport(String),

    // ── Input validation ────────────────────────────────────────────
    /// A facade argument was rejected before anything hit the wire.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // ── Wire format ─────────────────────────────────────────────────
    /// A frame failed to decrypt or parse.
    #[error("codec failure: {0}")]
    Codec(#[from] ProtoError),
}

impl BridgeError {
    /// `true` for errors where a retry or reconnect may help.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectTimeout { .. }
                | Self::AckTimeout { .. }
                | Self::TransportClosed
                | Self::Transport(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(BridgeError::TransportClosed.is_transient());
        assert!(BridgeError::AckTimeout { attempts: 3 }.is_transient());
        assert!(!BridgeError::NotConnected.is_transient());
        assert!(!BridgeError::ConfigMissing { field: "address" }.is_transient());
    }
}
