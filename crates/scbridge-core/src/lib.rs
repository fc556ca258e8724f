//! Async client runtime for the SC home-automation bridge.
//!
//! The bridge speaks a custom WebSocket protocol: a multi-step handshake
//! establishes an AES-256-CBC session (key delivered via RSA key wrap),
//! after which all traffic is encrypted, counter-stamped and acknowledged
//! per message. This crate owns the whole session lifecycle:
//!
//! - [`BridgeClient`] -- the public facade: connect, inventory snapshots,
//!   device/room/scene control, state listeners.
//! - a session actor per connection that drives the handshake
//!   state machine, routes inbound frames, and emits the mandatory ACK for
//!   every counter-stamped message before any other processing.
//! - a reconnect supervisor that re-runs the handshake with a fresh
//!   encryption context after a lost session, keeping listener
//!   registrations intact.
//!
//! Wire-level primitives (codec, key wrap, auth hash) live in
//! [`scbridge_proto`].
//!
//! # Example
//!
//! ```rust,ignore
//! use scbridge_core::{BridgeClient, BridgeConfig};
//!
//! let client = BridgeClient::new(BridgeConfig::new("192.168.1.50", auth_key));
//! client.connect().await?;
//!
//! let handle = client.subscribe_device("D1", |update| {
//!     println!("D1 -> {update:?}");
//! });
//!
//! client.switch_device("D1", true).await?;
//! handle.unsubscribe();
//! client.disconnect().await;
//! ```

mod ack;
mod auth;
mod session;
mod transport;

pub mod bridge;
pub mod config;
pub mod error;
pub mod fanout;
pub mod inventory;
pub mod model;

// ── Primary re-exports ──────────────────────────────────────────────
pub use bridge::{BridgeClient, ConnectionState, RoomCommand};
pub use config::{BridgeConfig, ClientIdentity, Timing};
pub use error::BridgeError;
pub use fanout::ListenerHandle;
pub use model::{
    Device, DeviceMetadata, DeviceStateUpdate, InfoEntry, Room, RoomState, RoomStateUpdate,
    Scene, SceneDevice,
};
