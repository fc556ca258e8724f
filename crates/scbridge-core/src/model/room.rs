// ── Room domain types ──

use serde::{Deserialize, Serialize};

/// Aggregate room state as the bridge reports it.
///
/// Every field is independently present-or-absent; absence means
/// "unchanged" in state updates and "unknown" in discovery.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomState {
    pub switch: Option<bool>,

    #[serde(rename = "dimmvalue")]
    pub dim_value: Option<i64>,

    #[serde(rename = "lightsOn")]
    pub lights_on: Option<i64>,

    #[serde(rename = "loadsOn")]
    pub loads_on: Option<i64>,

    #[serde(rename = "windowsOpen")]
    pub windows_open: Option<i64>,

    #[serde(rename = "doorsOpen")]
    pub doors_open: Option<i64>,

    pub presence: Option<i64>,

    #[serde(rename = "shadesClosed")]
    pub shades_closed: Option<i64>,

    pub power: Option<f64>,

    pub error: Option<bool>,
}

impl RoomState {
    /// Overlay the present fields of `update` onto `self`.
    pub(crate) fn merge_from(&mut self, update: &RoomState) {
        macro_rules! take {
            ($field:ident) => {
                if update.$field.is_some() {
                    self.$field = update.$field.clone();
                }
            };
        }
        take!(switch);
        take!(dim_value);
        take!(lights_on);
        take!(loads_on);
        take!(windows_open);
        take!(doors_open);
        take!(presence);
        take!(shades_closed);
        take!(power);
        take!(error);
    }
}

/// A room and its member devices.
///
/// Only device *ids* are stored; devices are looked up in the inventory on
/// demand, which keeps the entity graph acyclic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    #[serde(rename = "roomId")]
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(rename = "devices", default)]
    pub device_ids: Vec<String>,

    /// Last-seen aggregate state.
    #[serde(flatten)]
    pub state: RoomState,
}
