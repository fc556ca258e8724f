// ── Per-entity state fanout ──
//
// Observer lists keyed by device/room id, plus the coalescing rules for
// StateUpdate payloads. Listener registrations live on the client, not the
// session, so they survive reconnects. Callbacks run on the dispatch task,
// never on the frame reader, and a panicking callback is contained and
// logged.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;
use tracing::{error, trace};

use crate::inventory::Inventory;
use crate::model::{
    parse_metadata, DeviceMetadata, DeviceStateUpdate, RoomState, RoomStateUpdate,
};

pub(crate) type DeviceStateCallback = Arc<dyn Fn(&DeviceStateUpdate) + Send + Sync>;
pub(crate) type RoomStateCallback = Arc<dyn Fn(&RoomStateUpdate) + Send + Sync>;

#[derive(Debug, Clone)]
enum ListenerTarget {
    Device(String),
    Room(String),
}

/// Unsubscribe handle returned by the listener registrations.
///
/// Dropping the handle keeps the listener registered; call
/// [`unsubscribe`](Self::unsubscribe) to remove it. Handles outlive the
/// client harmlessly.
pub struct ListenerHandle {
    fanout: Weak<StateFanout>,
    target: ListenerTarget,
    token: u64,
}

impl ListenerHandle {
    pub fn unsubscribe(self) {
        if let Some(fanout) = self.fanout.upgrade() {
            fanout.remove(&self.target, self.token);
        }
    }
}

pub(crate) struct StateFanout {
    device_listeners: Mutex<HashMap<String, Vec<(u64, DeviceStateCallback)>>>,
    room_listeners: Mutex<HashMap<String, Vec<(u64, RoomStateCallback)>>>,
    next_token: AtomicU64,
}

impl StateFanout {
    pub fn new() -> Self {
        Self {
            device_listeners: Mutex::new(HashMap::new()),
            room_listeners: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        }
    }

    pub fn add_device_listener(
        self: &Arc<Self>,
        device_id: &str,
        callback: DeviceStateCallback,
    ) -> ListenerHandle {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.device_listeners
            .lock()
            .expect("device listener lock")
            .entry(device_id.to_owned())
            .or_default()
            .push((token, callback));
        ListenerHandle {
            fanout: Arc::downgrade(self),
            target: ListenerTarget::Device(device_id.to_owned()),
            token,
        }
    }

    pub fn add_room_listener(
        self: &Arc<Self>,
        room_id: &str,
        callback: RoomStateCallback,
    ) -> ListenerHandle {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.room_listeners
            .lock()
            .expect("room listener lock")
            .entry(room_id.to_owned())
            .or_default()
            .push((token, callback));
        ListenerHandle {
            fanout: Arc::downgrade(self),
            target: ListenerTarget::Room(room_id.to_owned()),
            token,
        }
    }

    fn remove(&self, target: &ListenerTarget, token: u64) {
        match target {
            ListenerTarget::Device(id) => {
                let mut map = self.device_listeners.lock().expect("device listener lock");
                if let Some(list) = map.get_mut(id) {
                    list.retain(|(t, _)| *t != token);
                    if list.is_empty() {
                        map.remove(id);
                    }
                }
            }
            ListenerTarget::Room(id) => {
                let mut map = self.room_listeners.lock().expect("room listener lock");
                if let Some(list) = map.get_mut(id) {
                    list.retain(|(t, _)| *t != token);
                    if list.is_empty() {
                        map.remove(id);
                    }
                }
            }
        }
    }

    /// Process one StateUpdate `item` array: coalesce device items by id,
    /// map room items 1:1, then notify listeners in payload order.
    ///
    /// Runs on the dispatch task. Room aggregates are folded into the
    /// inventory before any callback fires.
    pub fn dispatch(&self, items: &[Value], inventory: &Inventory) {
        enum Slot {
            Device(String),
            Room(RoomStateUpdate),
        }

        let mut order: Vec<Slot> = Vec::new();
        let mut merged: HashMap<String, DeviceStateUpdate> = HashMap::new();

        for item in items {
            if let Some(device_id) = item.get("deviceId").and_then(Value::as_str) {
                if !merged.contains_key(device_id) {
                    merged.insert(device_id.to_owned(), DeviceStateUpdate::default());
                    order.push(Slot::Device(device_id.to_owned()));
                }
                let update = merged.get_mut(device_id).expect("just inserted");
                merge_device_item(update, item);
            } else if let Some(room_id) = item.get("roomId").and_then(Value::as_str) {
                let state: RoomState =
                    serde_json::from_value(item.clone()).unwrap_or_default();
                order.push(Slot::Room(RoomStateUpdate {
                    room_id: room_id.to_owned(),
                    state,
                }));
            } else {
                trace!("state item without deviceId or roomId ignored");
            }
        }

        for slot in &order {
            match slot {
                // Every device id that appeared in the item array gets its
                // callback, even when no item contributed any fields.
                Slot::Device(id) => self.notify_device(id, &merged[id]),
                Slot::Room(update) => {
                    inventory.apply_room_state(&update.room_id, &update.state);
                    self.notify_room(update);
                }
            }
        }
    }

    fn notify_device(&self, device_id: &str, update: &DeviceStateUpdate) {
        let callbacks: Vec<DeviceStateCallback> = {
            let map = self.device_listeners.lock().expect("device listener lock");
            match map.get(device_id) {
                Some(list) => list.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
                None => return,
            }
        };
        // Invoked outside the lock: a callback may re-register listeners.
        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(update))).is_err() {
                error!(device_id, "device state listener panicked");
            }
        }
    }

    fn notify_room(&self, update: &RoomStateUpdate) {
        let callbacks: Vec<RoomStateCallback> = {
            let map = self.room_listeners.lock().expect("room listener lock");
            match map.get(&update.room_id) {
                Some(list) => list.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
                None => return,
            }
        };
        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(update))).is_err() {
                error!(room_id = %update.room_id, "room state listener panicked");
            }
        }
    }
}

/// Apply one `item` entry to the device's merged update.
///
/// Items carrying `switch`/`dimmvalue` keys contribute the switch block;
/// items carrying an `info` array contribute metadata; anything else is
/// ignored.
fn merge_device_item(update: &mut DeviceStateUpdate, item: &Value) {
    if item.get("switch").is_some() || item.get("dimmvalue").is_some() {
        update.switch = item.get("switch").and_then(Value::as_bool);
        update.dim_value = item.get("dimmvalue").and_then(Value::as_i64);
        update.power = item.get("power").and_then(Value::as_f64);
        update.cur_state = item.get("curstate").and_then(Value::as_i64);
    } else if let Some(info) = item.get("info").and_then(Value::as_array) {
        let entries: Vec<_> = info
            .iter()
            .filter_map(|v| serde_json::from_value(v.clone()).ok())
            .collect();
        let metadata = parse_metadata(&entries);
        if !metadata.is_empty() {
            let slot = update.metadata.get_or_insert_with(DeviceMetadata::default);
            if metadata.temperature.is_some() {
                slot.temperature = metadata.temperature;
            }
            if metadata.humidity.is_some() {
                slot.humidity = metadata.humidity;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    fn collect_device_updates(
        fanout: &Arc<StateFanout>,
        device_id: &str,
    ) -> (Arc<StdMutex<Vec<DeviceStateUpdate>>>, ListenerHandle) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handle = fanout.add_device_listener(
            device_id,
            Arc::new(move |update: &DeviceStateUpdate| {
                sink.lock().unwrap().push(update.clone());
            }),
        );
        (seen, handle)
    }

    #[test]
    fn device_items_are_coalesced_by_id() {
        let fanout = Arc::new(StateFanout::new());
        let inventory = Inventory::new();
        let (seen, _handle) = collect_device_updates(&fanout, "D1");

        let items = [
            json!({"deviceId": "D1", "switch": true, "dimmvalue": 80}),
            json!({"deviceId": "D1", "info": [{"text": "1109", "value": "22.5"}]}),
        ];
        fanout.dispatch(&items, &inventory);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1, "both items must merge into one update");
        assert_eq!(seen[0].switch, Some(true));
        assert_eq!(seen[0].dim_value, Some(80));
        assert_eq!(
            seen[0].metadata.as_ref().and_then(|m| m.temperature),
            Some(22.5)
        );
    }

    #[test]
    fn content_free_items_still_reach_the_listener() {
        let fanout = Arc::new(StateFanout::new());
        let inventory = Inventory::new();
        let (seen, _handle) = collect_device_updates(&fanout, "D1");

        // No switch/dimmvalue block and no info array: the item itself
        // contributes nothing, but the device id appeared in the array, so
        // its listener fires with an empty update.
        fanout.dispatch(&[json!({"deviceId": "D1", "somethingElse": 1})], &inventory);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], DeviceStateUpdate::default());
    }

    #[test]
    fn unrecognized_info_codes_still_dispatch_an_empty_update() {
        let fanout = Arc::new(StateFanout::new());
        let inventory = Inventory::new();
        let (seen, _handle) = collect_device_updates(&fanout, "D1");

        // The info array is recognized but yields no metadata fields; the
        // callback still fires for the id, carrying a default update.
        fanout.dispatch(
            &[json!({"deviceId": "D1", "info": [{"text": "9999", "value": "1.0"}]})],
            &inventory,
        );

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], DeviceStateUpdate::default());
        assert!(seen[0].metadata.is_none());
    }

    #[test]
    fn room_items_are_not_coalesced() {
        let fanout = Arc::new(StateFanout::new());
        let inventory = Inventory::new();

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _handle = fanout.add_room_listener(
            "R1",
            Arc::new(move |update: &RoomStateUpdate| {
                sink.lock().unwrap().push(update.clone());
            }),
        );

        let items = [
            json!({"roomId": "R1", "switch": true, "lightsOn": 2}),
            json!({"roomId": "R1", "lightsOn": 3}),
        ];
        fanout.dispatch(&items, &inventory);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].state.lights_on, Some(2));
        assert_eq!(seen[1].state.lights_on, Some(3));
    }

    #[test]
    fn unsubscribe_removes_the_listener() {
        let fanout = Arc::new(StateFanout::new());
        let inventory = Inventory::new();
        let (seen, handle) = collect_device_updates(&fanout, "D1");

        handle.unsubscribe();
        fanout.dispatch(&[json!({"deviceId": "D1", "switch": true})], &inventory);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn panicking_listener_does_not_poison_the_rest() {
        let fanout = Arc::new(StateFanout::new());
        let inventory = Inventory::new();

        let _bad = fanout.add_device_listener(
            "D1",
            Arc::new(|_: &DeviceStateUpdate| panic!("listener bug")),
        );
        let (seen, _good) = collect_device_updates(&fanout, "D1");

        fanout.dispatch(&[json!({"deviceId": "D1", "switch": false})], &inventory);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn updates_only_reach_the_matching_id() {
        let fanout = Arc::new(StateFanout::new());
        let inventory = Inventory::new();
        let (seen_d1, _h1) = collect_device_updates(&fanout, "D1");
        let (seen_d2, _h2) = collect_device_updates(&fanout, "D2");

        fanout.dispatch(&[json!({"deviceId": "D2", "switch": true})], &inventory);
        assert!(seen_d1.lock().unwrap().is_empty());
        assert_eq!(seen_d2.lock().unwrap().len(), 1);
    }
}
