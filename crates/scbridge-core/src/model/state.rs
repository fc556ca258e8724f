// ── State update types ──
//
// What listeners receive. Fields mirror exactly what the bridge reported
// in the triggering StateUpdate frame; absent fields mean "unchanged".

use serde::{Deserialize, Serialize};

use super::room::RoomState;

/// Sensor readings decoded from an `info` array.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceMetadata {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
}

impl DeviceMetadata {
    pub fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.humidity.is_none()
    }
}

/// State change for a single device, coalesced per update frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceStateUpdate {
    pub switch: Option<bool>,
    pub dim_value: Option<i64>,
    pub power: Option<f64>,
    pub cur_state: Option<i64>,
    pub metadata: Option<DeviceMetadata>,
}

/// State change for a room. Room items are never coalesced; each item in
/// the update frame produces one of these.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomStateUpdate {
    pub room_id: String,
    pub state: RoomState,
}

/// Entry in a StateUpdate `info` array: `{text, value}` on the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct StateInfoEntry {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

// Text codes the bridge uses for sensor readings.
const TEXT_TEMPERATURE: &str = "1222";
const TEXT_HUMIDITY: &str = "1223";
// Dimming actuators report their temperature under a separate code.
const TEXT_TEMPERATURE_DIMMER: &str = "1109";

/// Decode the recognized text codes from an `info` array.
///
/// Values arrive as strings or numbers depending on firmware; both parse
/// to `f64`. Unrecognized codes are skipped.
pub(crate) fn parse_metadata(entries: &[StateInfoEntry]) -> DeviceMetadata {
    let mut metadata = DeviceMetadata::default();
    for entry in entries {
        let Some(value) = numeric_value(&entry.value) else {
            continue;
        };
        match entry.text.as_str() {
            TEXT_TEMPERATURE | TEXT_TEMPERATURE_DIMMER => metadata.temperature = Some(value),
            TEXT_HUMIDITY => metadata.humidity = Some(value),
            _ => {}
        }
    }
    metadata
}

fn numeric_value(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entries(raw: serde_json::Value) -> Vec<StateInfoEntry> {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn recognizes_temperature_and_humidity() {
        let meta = parse_metadata(&entries(json!([
            {"text": "1222", "value": "21.5"},
            {"text": "1223", "value": 48},
        ])));
        assert_eq!(meta.temperature, Some(21.5));
        assert_eq!(meta.humidity, Some(48.0));
    }

    #[test]
    fn dimmer_temperature_code_maps_to_temperature() {
        let meta = parse_metadata(&entries(json!([{"text": "1109", "value": "22.5"}])));
        assert_eq!(meta.temperature, Some(22.5));
        assert_eq!(meta.humidity, None);
    }

    #[test]
    fn unknown_codes_and_bad_values_are_skipped() {
        let meta = parse_metadata(&entries(json!([
            {"text": "9999", "value": "1.0"},
            {"text": "1222", "value": "not a number"},
            {"text": "1223", "value": null},
        ])));
        assert!(meta.is_empty());
    }
}
