// ── Bridge client facade ──
//
// Public entry point. Owns everything that outlives a single socket:
// configuration, inventory, listener registrations, the ACK tracker and
// the connection-state observable. Sessions are run by a supervisor task
// that performs the single-attempt reconnect dance after a lost session.

use std::sync::{Arc, Mutex, Weak};

use serde_json::{json, Value};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use scbridge_proto::MessageType;

use crate::ack::{self, AckTracker};
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::fanout::{ListenerHandle, StateFanout};
use crate::inventory::Inventory;
use crate::model::{Device, DeviceStateUpdate, Room, RoomStateUpdate, Scene};
use crate::session::{self, Outbound, SessionContext};

/// Connection state observable by consumers.
///
/// `Connected` means the handshake finished *and* the initial inventory
/// discovery completed; commands are accepted only in this state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Room-level control operations.
///
/// Dim values are clamped to the wire range 1..=99; "off" is expressed
/// via `Switch(false)`, never as a dim value of zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RoomCommand {
    Switch(bool),
    Dim(f64),
}

/// The main entry point for consumers.
///
/// Cheaply cloneable. One client per bridge; the client never holds more
/// than one socket at a time.
#[derive(Clone)]
pub struct BridgeClient {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    ctx: Arc<SessionContext>,
    cancel: Mutex<Option<CancellationToken>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl BridgeClient {
    /// Create a client from configuration. Does not connect -- call
    /// [`connect()`](Self::connect).
    pub fn new(config: BridgeConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let ctx = Arc::new(SessionContext {
            config: Arc::new(config),
            inventory: Arc::new(Inventory::new()),
            fanout: Arc::new(StateFanout::new()),
            ack: Arc::new(AckTracker::default()),
            state,
            outbound: Mutex::new(None),
        });
        Self {
            inner: Arc::new(BridgeInner {
                ctx,
                cancel: Mutex::new(None),
                supervisor: Mutex::new(None),
            }),
        }
    }

    // ── Connection lifecycle ────────────────────────────────────────

    /// Establish the session: handshake, authentication, initial
    /// discovery. Returns once the client is fully connected or the
    /// connect window expires.
    ///
    /// A first-connect failure is returned to the caller without any
    /// automatic retry; once a session has been fully connected, lost
    /// sessions trigger one reconnect attempt each (listener
    /// registrations survive, pending command waiters do not).
    pub async fn connect(&self) -> Result<(), BridgeError> {
        self.inner.ctx.config.validate()?;

        let cancel = {
            let mut slot = self.inner.cancel.lock().expect("cancel slot");
            if slot.is_some() {
                return Err(BridgeError::InvalidArgument(
                    "client is already connected or connecting".into(),
                ));
            }
            let cancel = CancellationToken::new();
            *slot = Some(cancel.clone());
            cancel
        };

        self.inner.ctx.state.send_replace(ConnectionState::Connecting);

        let (connected_tx, connected_rx) = oneshot::channel();
        // The supervisor gets a weak handle back to the client so that a
        // dropped client tears the background tasks down (see Drop below).
        let handle = tokio::spawn(supervisor(
            Arc::downgrade(&self.inner),
            Arc::clone(&self.inner.ctx),
            cancel,
            connected_tx,
        ));
        *self.inner.supervisor.lock().expect("supervisor slot") = Some(handle);

        match connected_rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                // First-connect failure: the supervisor is already on its
                // way out. Join it so a fresh connect() can follow.
                self.join_supervisor().await;
                Err(e)
            }
            // The supervisor went away without an answer: shut down mid-connect.
            Err(_) => {
                self.join_supervisor().await;
                Err(BridgeError::NotConnected)
            }
        }
    }

    async fn join_supervisor(&self) {
        let handle = self.inner.supervisor.lock().expect("supervisor slot").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.inner.cancel.lock().expect("cancel slot").take();
    }

    /// Tear everything down: heartbeats, pending command waiters, the
    /// socket. Subsequent commands fail with `NotConnected`; a fresh
    /// `connect()` is allowed afterwards.
    pub async fn disconnect(&self) {
        let cancel = self.inner.cancel.lock().expect("cancel slot").take();
        if let Some(cancel) = cancel {
            cancel.cancel();
        }

        // Waiters resolve now rather than at session teardown.
        self.inner.ctx.ack.abort_all();

        let handle = self.inner.supervisor.lock().expect("supervisor slot").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        self.inner
            .ctx
            .state
            .send_replace(ConnectionState::Disconnected);
        info!("bridge client shut down");
    }

    // ── State observation ───────────────────────────────────────────

    pub fn is_connected(&self) -> bool {
        *self.inner.ctx.state.borrow() == ConnectionState::Connected
    }

    /// Subscribe to connection state changes.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.ctx.state.subscribe()
    }

    // ── Inventory snapshots ─────────────────────────────────────────

    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.inner.ctx.inventory.devices()
    }

    pub fn rooms(&self) -> Vec<Arc<Room>> {
        self.inner.ctx.inventory.rooms()
    }

    pub fn scenes(&self) -> Vec<Arc<Scene>> {
        self.inner.ctx.inventory.scenes()
    }

    pub fn device(&self, device_id: &str) -> Option<Arc<Device>> {
        self.inner.ctx.inventory.device(device_id)
    }

    pub fn room(&self, room_id: &str) -> Option<Arc<Room>> {
        self.inner.ctx.inventory.room(room_id)
    }

    // ── State listeners ─────────────────────────────────────────────

    /// Register a device state listener. Registrations survive
    /// reconnects; use the returned handle to unsubscribe.
    pub fn subscribe_device(
        &self,
        device_id: &str,
        callback: impl Fn(&DeviceStateUpdate) + Send + Sync + 'static,
    ) -> ListenerHandle {
        self.inner
            .ctx
            .fanout
            .add_device_listener(device_id, Arc::new(callback))
    }

    /// Register a room state listener.
    pub fn subscribe_room(
        &self,
        room_id: &str,
        callback: impl Fn(&RoomStateUpdate) + Send + Sync + 'static,
    ) -> ListenerHandle {
        self.inner
            .ctx
            .fanout
            .add_room_listener(room_id, Arc::new(callback))
    }

    // ── Control operations ──────────────────────────────────────────
    //
    // Success means the bridge acknowledged the command, not that the
    // physical action happened; that arrives asynchronously as a
    // StateUpdate.

    pub async fn switch_device(&self, device_id: &str, on: bool) -> Result<(), BridgeError> {
        require_id(device_id, "device id")?;
        self.send_command(json!({
            "type": MessageType::DeviceSwitch.code(),
            "deviceId": device_id,
            "switch": on,
        }))
        .await
    }

    /// Dim a device. `value` is clamped into the wire range 1..=99; use
    /// [`switch_device`](Self::switch_device) to turn a device off.
    pub async fn set_dimmer_value(&self, device_id: &str, value: f64) -> Result<(), BridgeError> {
        require_id(device_id, "device id")?;
        let dim = clamp_dim(value)?;
        self.send_command(json!({
            "type": MessageType::DeviceDim.code(),
            "deviceId": device_id,
            "dimmvalue": dim,
        }))
        .await
    }

    pub async fn control_room(
        &self,
        room_id: &str,
        command: RoomCommand,
    ) -> Result<(), BridgeError> {
        require_id(room_id, "room id")?;
        let payload = match command {
            RoomCommand::Switch(on) => json!({
                "type": MessageType::RoomSwitch.code(),
                "roomId": room_id,
                "switch": on,
            }),
            RoomCommand::Dim(value) => json!({
                "type": MessageType::RoomDim.code(),
                "roomId": room_id,
                "dimmvalue": clamp_dim(value)?,
            }),
        };
        self.send_command(payload).await
    }

    pub async fn activate_scene(&self, scene_id: i64) -> Result<(), BridgeError> {
        if scene_id < 0 {
            return Err(BridgeError::InvalidArgument(format!(
                "scene id must be non-negative, got {scene_id}"
            )));
        }
        self.send_command(json!({
            "type": MessageType::ActivateScene.code(),
            "sceneId": scene_id,
        }))
        .await
    }

    /// Re-request the full inventory and fire a heartbeat to solicit
    /// fresh state from every device.
    pub fn refresh_all(&self) -> Result<(), BridgeError> {
        if !self.is_connected() {
            return Err(BridgeError::NotConnected);
        }
        let outbound = self.outbound()?;
        outbound.send_message(json!({"type": MessageType::RequestDevices.code()}))?;
        outbound.send_message(json!({"type": MessageType::RequestRooms.code()}))?;
        outbound.send_message(json!({"type": MessageType::Heartbeat.code()}))?;
        Ok(())
    }

    // ── Internals ───────────────────────────────────────────────────

    async fn send_command(&self, payload: Value) -> Result<(), BridgeError> {
        if !self.is_connected() {
            return Err(BridgeError::NotConnected);
        }
        let outbound = self.outbound()?;
        ack::send_with_retry(&outbound, &self.inner.ctx.config.timing, payload).await
    }

    fn outbound(&self) -> Result<Outbound, BridgeError> {
        self.inner
            .ctx
            .outbound
            .lock()
            .expect("outbound slot")
            .clone()
            .ok_or(BridgeError::NotConnected)
    }
}

// A dropped client takes its background tasks with it.
impl Drop for BridgeInner {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.lock().expect("cancel slot").take() {
            cancel.cancel();
        }
    }
}

// ── Supervisor ──────────────────────────────────────────────────────

/// Session loop: run a session; once one has been fully connected, allow
/// one reconnect attempt per loss, for as long as sessions keep coming
/// up. A first-connect failure ends the loop (the error has already been
/// delivered to the `connect()` caller).
async fn supervisor(
    inner: Weak<BridgeInner>,
    ctx: Arc<SessionContext>,
    cancel: CancellationToken,
    first_connect: oneshot::Sender<Result<(), BridgeError>>,
) {
    let mut signal = Some(first_connect);

    loop {
        ctx.state.send_replace(ConnectionState::Connecting);
        let outcome = session::run(&ctx, cancel.child_token(), signal.take()).await;

        if cancel.is_cancelled() {
            break;
        }

        if !outcome.reached_connected {
            if let Some(e) = outcome.error {
                warn!(error = %e, "session never reached the connected state, giving up");
            }
            break;
        }

        match outcome.error {
            Some(e) => warn!(
                error = %e,
                delay = ?ctx.config.timing.reconnect_delay,
                "session lost, scheduling reconnect"
            ),
            None => warn!("session ended, scheduling reconnect"),
        }
        ctx.state.send_replace(ConnectionState::Reconnecting);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(ctx.config.timing.reconnect_delay) => {}
        }
    }

    ctx.state.send_replace(ConnectionState::Disconnected);
    if let Some(inner) = inner.upgrade() {
        inner.cancel.lock().expect("cancel slot").take();
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn require_id(id: &str, what: &str) -> Result<(), BridgeError> {
    if id.trim().is_empty() {
        return Err(BridgeError::InvalidArgument(format!(
            "{what} must not be empty"
        )));
    }
    Ok(())
}

/// Clamp a dim value into the wire range 1..=99, rejecting non-finite
/// input. Zero means "off" on the wire and is never produced here.
fn clamp_dim(value: f64) -> Result<i64, BridgeError> {
    if !value.is_finite() {
        return Err(BridgeError::InvalidArgument(format!(
            "dim value must be a finite number, got {value}"
        )));
    }
    Ok(value.clamp(1.0, 99.0).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dim_values_clamp_into_wire_range() {
        assert_eq!(clamp_dim(-5.0).unwrap(), 1);
        assert_eq!(clamp_dim(0.0).unwrap(), 1);
        assert_eq!(clamp_dim(0.9).unwrap(), 1);
        assert_eq!(clamp_dim(50.4).unwrap(), 50);
        assert_eq!(clamp_dim(99.0).unwrap(), 99);
        assert_eq!(clamp_dim(150.0).unwrap(), 99);
        assert!(clamp_dim(f64::NAN).is_err());
        assert!(clamp_dim(f64::INFINITY).is_err());
    }

    #[tokio::test]
    async fn arguments_are_validated_before_the_connection_check() {
        let client = BridgeClient::new(BridgeConfig::new("192.168.1.50", "key"));

        assert!(matches!(
            client.switch_device("", true).await,
            Err(BridgeError::InvalidArgument(_))
        ));
        assert!(matches!(
            client.set_dimmer_value("D1", f64::NAN).await,
            Err(BridgeError::InvalidArgument(_))
        ));
        assert!(matches!(
            client.activate_scene(-1).await,
            Err(BridgeError::InvalidArgument(_))
        ));
        assert!(matches!(
            client
                .control_room("R1", RoomCommand::Dim(f64::NAN))
                .await,
            Err(BridgeError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn commands_without_a_session_fail_not_connected() {
        let client = BridgeClient::new(BridgeConfig::new("192.168.1.50", "key"));

        assert!(matches!(
            client.switch_device("D1", true).await,
            Err(BridgeError::NotConnected)
        ));
        assert!(matches!(
            client.refresh_all(),
            Err(BridgeError::NotConnected)
        ));
        assert!(!client.is_connected());
        assert!(client.devices().is_empty());
    }

    #[tokio::test]
    async fn connect_rejects_missing_config() {
        let client = BridgeClient::new(BridgeConfig::new("", "key"));
        assert!(matches!(
            client.connect().await,
            Err(BridgeError::ConfigMissing { field: "address" })
        ));
    }
}
