// ── Domain model ──
//
// Entities as the bridge reports them. Wire names are camelCase / bridge
// jargon ("dimmvalue", "devType"); the Rust fields are renamed accordingly
// so the same types deserialize discovery payloads directly.

mod device;
mod room;
mod scene;
mod state;

pub use device::{Device, InfoEntry};
pub use room::{Room, RoomState};
pub use scene::{Scene, SceneDevice};
pub use state::{DeviceMetadata, DeviceStateUpdate, RoomStateUpdate, StateInfoEntry};

pub(crate) use state::parse_metadata;
