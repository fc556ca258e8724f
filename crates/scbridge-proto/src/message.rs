// ── Message registry ──
//
// Numeric message types as spoken by the bridge, and the decoded inbound
// envelope. Payload fields beyond the envelope vary per type and are kept
// as raw JSON for the handlers to pick apart.

use serde_json::Value;

use crate::error::ProtoError;

/// Every message type the client knows about.
///
/// Inbound frames with other codes are still acknowledged (when they carry
/// `mc`) and then logged; new firmware revisions introduce types faster
/// than this registry tracks them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Nack,
    Ack,
    Heartbeat,
    Ping,
    ConnectionStart,
    ConnectionConfirm,
    ScInitResponse,
    ConnectionDeclined,
    ScInitRequest,
    PublicKeyResponse,
    SecretExchange,
    SecretExchangeAck,
    LoginRequest,
    LoginResponse,
    TokenApply,
    TokenApplyAck,
    TokenRenew,
    TokenRenewResponse,
    RequestDevices,
    RequestRooms,
    DeviceDim,
    DeviceSwitch,
    RoomDim,
    RoomSwitch,
    ActivateScene,
    ErrorInfo,
    SetAllData,
    SetHomeData,
    LogData,
    StateUpdate,
    SetBridgeState,
    LogEntries,
}

impl MessageType {
    /// Numeric code on the wire.
    pub fn code(self) -> i64 {
        match self {
            Self::Nack => 0,
            Self::Ack => 1,
            Self::Heartbeat => 2,
            Self::Ping => 3,
            Self::ConnectionStart => 10,
            Self::ConnectionConfirm => 11,
            Self::ScInitResponse => 12,
            Self::ConnectionDeclined => 13,
            Self::ScInitRequest => 14,
            Self::PublicKeyResponse => 15,
            Self::SecretExchange => 16,
            Self::SecretExchangeAck => 17,
            Self::LoginRequest => 30,
            Self::LoginResponse => 32,
            Self::TokenApply => 33,
            Self::TokenApplyAck => 34,
            Self::TokenRenew => 37,
            Self::TokenRenewResponse => 38,
            Self::RequestDevices => 240,
            Self::RequestRooms => 242,
            Self::DeviceDim => 280,
            Self::DeviceSwitch => 281,
            Self::RoomDim => 283,
            Self::RoomSwitch => 284,
            Self::ActivateScene => 285,
            Self::ErrorInfo => 295,
            Self::SetAllData => 300,
            Self::SetHomeData => 303,
            Self::LogData => 304,
            Self::StateUpdate => 310,
            Self::SetBridgeState => 364,
            Self::LogEntries => 408,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        const ALL: [MessageType; 32] = [
            MessageType::Nack,
            MessageType::Ack,
            MessageType::Heartbeat,
            MessageType::Ping,
            MessageType::ConnectionStart,
            MessageType::ConnectionConfirm,
            MessageType::ScInitResponse,
            MessageType::ConnectionDeclined,
            MessageType::ScInitRequest,
            MessageType::PublicKeyResponse,
            MessageType::SecretExchange,
            MessageType::SecretExchangeAck,
            MessageType::LoginRequest,
            MessageType::LoginResponse,
            MessageType::TokenApply,
            MessageType::TokenApplyAck,
            MessageType::TokenRenew,
            MessageType::TokenRenewResponse,
            MessageType::RequestDevices,
            MessageType::RequestRooms,
            MessageType::DeviceDim,
            MessageType::DeviceSwitch,
            MessageType::RoomDim,
            MessageType::RoomSwitch,
            MessageType::ActivateScene,
            MessageType::ErrorInfo,
            MessageType::SetAllData,
            MessageType::SetHomeData,
            MessageType::LogData,
            MessageType::StateUpdate,
            MessageType::SetBridgeState,
            MessageType::LogEntries,
        ];
        ALL.iter().copied().find(|t| t.code() == code)
    }
}

/// A decoded inbound frame.
///
/// `mc` is the bridge's message counter (we must acknowledge it), `reference`
/// is the counter being ACKed/NACKed back at us. `payload` keeps the whole
/// object, envelope fields included, for type-specific handlers.
#[derive(Debug, Clone)]
pub struct Frame {
    pub type_code: i64,
    pub mc: Option<u64>,
    pub reference: Option<u64>,
    pub payload: Value,
}

impl Frame {
    pub fn from_value(value: Value) -> Result<Self, ProtoError> {
        let type_code = value
            .get("type")
            .and_then(Value::as_i64)
            .ok_or(ProtoError::Envelope("type"))?;
        let mc = value.get("mc").and_then(Value::as_u64);
        let reference = value.get("ref").and_then(Value::as_u64);
        Ok(Self {
            type_code,
            mc,
            reference,
            payload: value,
        })
    }

    /// Registered type for this frame, if any.
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_code(self.type_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn codes_round_trip() {
        for code in [
            0, 1, 2, 3, 10, 11, 12, 13, 14, 15, 16, 17, 30, 32, 33, 34, 37, 38, 240, 242,
            280, 281, 283, 284, 285, 295, 300, 303, 304, 310, 364, 408,
        ] {
            let t = MessageType::from_code(code).unwrap_or_else(|| panic!("code {code}"));
            assert_eq!(t.code(), code);
        }
        assert!(MessageType::from_code(999).is_none());
    }

    #[test]
    fn frame_extracts_envelope_fields() {
        let frame = Frame::from_value(json!({
            "type": 310,
            "mc": 100,
            "item": [],
        }))
        .unwrap();

        assert_eq!(frame.type_code, 310);
        assert_eq!(frame.mc, Some(100));
        assert_eq!(frame.reference, None);
        assert_eq!(frame.message_type(), Some(MessageType::StateUpdate));
        assert!(frame.payload.get("item").is_some());
    }

    #[test]
    fn frame_reads_ack_reference() {
        let frame = Frame::from_value(json!({"type": 1, "ref": 7})).unwrap();
        assert_eq!(frame.message_type(), Some(MessageType::Ack));
        assert_eq!(frame.reference, Some(7));
    }

    #[test]
    fn frame_without_type_is_rejected() {
        let err = Frame::from_value(json!({"mc": 1}));
        assert!(matches!(err, Err(ProtoError::Envelope("type"))));
    }
}
