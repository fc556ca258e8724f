// ── Bridge inventory ──
//
// Concurrent maps of devices, rooms and scenes keyed by their bridge ids.
// Discovery payloads (SetAllData / SetHomeData) merge wholesale by primary
// key; `lastItem` flips the discovery-complete flag that unblocks
// `connect()`. Entities survive reconnects -- only client teardown drops
// the inventory.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::debug;

use crate::model::{Device, Room, RoomState, Scene};

/// Discovery payload carried by SetAllData (300) / SetHomeData (303).
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct DiscoveryPayload {
    pub devices: Vec<Device>,
    pub rooms: Vec<Room>,
    pub scenes: Vec<Scene>,
    #[serde(rename = "lastItem")]
    pub last_item: bool,
}

pub struct Inventory {
    devices: DashMap<String, Arc<Device>>,
    rooms: DashMap<String, Arc<Room>>,
    scenes: DashMap<i64, Arc<Scene>>,
    discovery_complete: watch::Sender<bool>,
}

impl Inventory {
    pub(crate) fn new() -> Self {
        let (discovery_complete, _) = watch::channel(false);
        Self {
            devices: DashMap::new(),
            rooms: DashMap::new(),
            scenes: DashMap::new(),
            discovery_complete,
        }
    }

    /// Merge a discovery payload into the maps, replacing entities in
    /// place on re-receipt.
    pub(crate) fn apply(&self, payload: DiscoveryPayload) {
        for device in payload.devices {
            self.devices.insert(device.id.clone(), Arc::new(device));
        }
        for room in payload.rooms {
            self.rooms.insert(room.id.clone(), Arc::new(room));
        }
        for scene in payload.scenes {
            self.scenes.insert(scene.id, Arc::new(scene));
        }

        if payload.last_item {
            debug!(
                devices = self.devices.len(),
                rooms = self.rooms.len(),
                scenes = self.scenes.len(),
                "inventory discovery complete"
            );
            self.discovery_complete.send_replace(true);
        }
    }

    /// Overlay a room state update onto the stored room, so snapshots
    /// reflect the latest aggregates.
    pub(crate) fn apply_room_state(&self, room_id: &str, update: &RoomState) {
        if let Some(mut entry) = self.rooms.get_mut(room_id) {
            let mut room = (**entry).clone();
            room.state.merge_from(update);
            *entry = Arc::new(room);
        }
    }

    // ── Snapshot accessors ──────────────────────────────────────────

    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.devices.iter().map(|r| Arc::clone(r.value())).collect()
    }

    pub fn rooms(&self) -> Vec<Arc<Room>> {
        self.rooms.iter().map(|r| Arc::clone(r.value())).collect()
    }

    pub fn scenes(&self) -> Vec<Arc<Scene>> {
        self.scenes.iter().map(|r| Arc::clone(r.value())).collect()
    }

    pub fn device(&self, id: &str) -> Option<Arc<Device>> {
        self.devices.get(id).map(|r| Arc::clone(r.value()))
    }

    pub fn room(&self, id: &str) -> Option<Arc<Room>> {
        self.rooms.get(id).map(|r| Arc::clone(r.value()))
    }

    // ── Discovery gate ──────────────────────────────────────────────

    #[cfg(test)]
    pub(crate) fn discovery_complete(&self) -> bool {
        *self.discovery_complete.borrow()
    }

    pub(crate) fn subscribe_discovery(&self) -> watch::Receiver<bool> {
        self.discovery_complete.subscribe()
    }

    /// New session, new discovery round.
    pub(crate) fn reset_discovery(&self) {
        self.discovery_complete.send_replace(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(raw: serde_json::Value) -> DiscoveryPayload {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn apply_merges_by_primary_key() {
        let inventory = Inventory::new();
        inventory.apply(payload(json!({
            "devices": [{"deviceId": "D1", "name": "Lamp"}],
            "rooms": [{"roomId": "R1", "name": "Kitchen"}],
            "scenes": [{"sceneId": 4, "name": "Evening"}],
        })));

        assert_eq!(inventory.devices().len(), 1);
        assert_eq!(inventory.rooms().len(), 1);
        assert_eq!(inventory.scenes().len(), 1);
        assert!(!inventory.discovery_complete());

        // Re-discovery replaces wholesale.
        inventory.apply(payload(json!({
            "devices": [{"deviceId": "D1", "name": "Desk lamp"}],
            "lastItem": true,
        })));

        assert_eq!(inventory.devices().len(), 1);
        assert_eq!(inventory.device("D1").unwrap().name, "Desk lamp");
        assert!(inventory.discovery_complete());
    }

    #[test]
    fn reset_discovery_reopens_the_gate() {
        let inventory = Inventory::new();
        inventory.apply(payload(json!({"lastItem": true})));
        assert!(inventory.discovery_complete());

        inventory.reset_discovery();
        assert!(!inventory.discovery_complete());
        // Entities are kept across sessions.
    }

    #[test]
    fn room_state_overlay_updates_snapshot() {
        let inventory = Inventory::new();
        inventory.apply(payload(json!({
            "rooms": [{"roomId": "R1", "name": "Kitchen", "lightsOn": 1}],
        })));

        inventory.apply_room_state(
            "R1",
            &RoomState {
                switch: Some(true),
                lights_on: Some(3),
                ..RoomState::default()
            },
        );

        let room = inventory.room("R1").unwrap();
        assert_eq!(room.state.switch, Some(true));
        assert_eq!(room.state.lights_on, Some(3));
        assert_eq!(room.name, "Kitchen");

        // Unknown rooms are ignored, not created.
        inventory.apply_room_state("R9", &RoomState::default());
        assert!(inventory.room("R9").is_none());
    }
}
