// ── Scene domain types ──

use serde::{Deserialize, Serialize};

/// One device target inside a scene definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneDevice {
    #[serde(rename = "deviceId")]
    pub device_id: String,
    #[serde(default)]
    pub value: Option<i64>,
}

/// A scene as discovered from the bridge inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    #[serde(rename = "sceneId")]
    pub id: i64,

    #[serde(default)]
    pub name: String,

    /// Device → value list, when the bridge includes it.
    #[serde(default)]
    pub devices: Vec<SceneDevice>,
}
