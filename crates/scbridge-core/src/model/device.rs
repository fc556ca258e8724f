// ── Device domain types ──

use serde::{Deserialize, Serialize};

/// Opaque info entry on a device record.
///
/// Carries sensor readings and other bridge-internal values keyed by a
/// numeric text code; the state fanout knows how to interpret a few of
/// them, everything else is passed through untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoEntry {
    #[serde(rename = "text_code", alias = "text", default)]
    pub text_code: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

/// A device as discovered from the bridge inventory.
///
/// Created on discovery (SetAllData / SetHomeData), replaced in place on
/// re-discovery, and only dropped when the client is torn down.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    #[serde(rename = "deviceId")]
    pub id: String,

    #[serde(default)]
    pub name: String,

    /// Bridge-internal kind tag.
    #[serde(rename = "devType", default)]
    pub dev_type: i64,

    /// Whether the device accepts dim commands.
    #[serde(default)]
    pub dimmable: bool,

    #[serde(default)]
    pub info: Vec<InfoEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_discovery_shape() {
        let device: Device = serde_json::from_value(json!({
            "deviceId": "D1",
            "name": "Lamp",
            "devType": 101,
            "dimmable": true,
            "info": [{"text_code": "1222", "value": "21.0"}],
        }))
        .unwrap();

        assert_eq!(device.id, "D1");
        assert_eq!(device.name, "Lamp");
        assert_eq!(device.dev_type, 101);
        assert!(device.dimmable);
        assert_eq!(device.info.len(), 1);
        assert_eq!(device.info[0].text_code, "1222");
    }

    #[test]
    fn optional_fields_default() {
        let device: Device = serde_json::from_value(json!({"deviceId": "D2"})).unwrap();
        assert_eq!(device.name, "");
        assert_eq!(device.dev_type, 0);
        assert!(!device.dimmable);
        assert!(device.info.is_empty());
    }
}
