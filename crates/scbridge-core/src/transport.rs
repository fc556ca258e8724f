// ── WebSocket transport ──
//
// Socket lifecycle for one session: URL shaping, connect with Nagle
// disabled, and the 0x04 frame-terminator convention. The bridge firmware
// interleaves its own keep-alives, so no WebSocket-level ping handling is
// layered on top.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use scbridge_proto::FRAME_TERMINATOR;

use crate::error::BridgeError;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub(crate) type WsSink = SplitSink<WsStream, Message>;
pub(crate) type WsSource = SplitStream<WsStream>;

/// Open the bridge socket and split it into writer/reader halves.
///
/// Plain `ws://` on port 80 unless the address carries its own port. The
/// third argument to `connect_async_with_config` disables Nagle
/// (TCP_NODELAY) so small ACK frames leave without delay; no compression
/// extension is negotiated.
pub(crate) async fn connect(address: &str) -> Result<(WsSink, WsSource), BridgeError> {
    let url = if address.contains("://") {
        address.to_owned()
    } else {
        format!("ws://{address}")
    };
    debug!(url = %url, "connecting to bridge");

    let (stream, _response) = connect_async_with_config(&url, None, true)
        .await
        .map_err(|e| BridgeError::Transport(e.to_string()))?;

    debug!("bridge socket established");
    Ok(stream.split())
}

/// Split a received text frame into payload and framing kind.
///
/// Encrypted frames end with the 0x04 end-of-transmission marker;
/// handshake JSON does not. Returns the payload without the marker and
/// whether the marker was present.
pub(crate) fn strip_terminator(text: &str) -> (&str, bool) {
    match text.strip_suffix(FRAME_TERMINATOR as char) {
        Some(body) => (body, true),
        None => (text, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminator_marks_encrypted_frames() {
        let (body, encrypted) = strip_terminator("YWJj\u{4}");
        assert_eq!(body, "YWJj");
        assert!(encrypted);

        let (body, encrypted) = strip_terminator("{\"type\":10}");
        assert_eq!(body, "{\"type\":10}");
        assert!(!encrypted);
    }

    #[test]
    fn only_the_trailing_marker_is_stripped() {
        let (body, encrypted) = strip_terminator("YQ\u{4}Yg\u{4}");
        assert_eq!(body, "YQ\u{4}Yg");
        assert!(encrypted);
    }
}
