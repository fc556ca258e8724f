// ── Session actor ──
//
// One task per WebSocket session. The reader half drives the handshake
// and classifies inbound frames; a writer task owns the sink, the
// encryption context and the message counter; semantic processing happens
// on a dispatch task so the mandatory ACK always leaves before any
// payload handling or observer callback.

use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use scbridge_proto::{decrypt_frame, encrypt_frame, EncryptionContext, Frame, MessageType};

use crate::ack::{AckOutcome, AckTracker};
use crate::auth::{AuthStep, Authenticator};
use crate::bridge::ConnectionState;
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::fanout::StateFanout;
use crate::inventory::{DiscoveryPayload, Inventory};
use crate::transport::{self, WsSink};

// ── Outbound writer ─────────────────────────────────────────────────

enum WireCommand {
    /// Raw JSON text (pre-secret handshake traffic).
    Plain(Value),
    /// Encrypted once a context is installed, raw JSON before that.
    Auto(Value),
    Install(EncryptionContext),
    Close,
}

/// Handle for enqueueing outbound messages.
///
/// Counter assignment and queue insertion happen under one lock, so wire
/// order always matches counter order and the sequence the bridge sees is
/// strictly increasing from 1 within a session.
#[derive(Clone)]
pub(crate) struct Outbound {
    inner: Arc<Mutex<OutboundInner>>,
    ack: Arc<AckTracker>,
}

struct OutboundInner {
    next_mc: u64,
    tx: mpsc::UnboundedSender<WireCommand>,
}

impl Outbound {
    fn new(tx: mpsc::UnboundedSender<WireCommand>, ack: Arc<AckTracker>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(OutboundInner { next_mc: 1, tx })),
            ack,
        }
    }

    /// Immediate ACK for an inbound counter. Untracked and not counted.
    pub fn send_ack(&self, reference: u64) -> Result<(), BridgeError> {
        let inner = self.inner.lock().expect("outbound lock");
        inner
            .tx
            .send(WireCommand::Auto(json!({
                "type": MessageType::Ack.code(),
                "ref": reference,
            })))
            .map_err(|_| BridgeError::NotConnected)
    }

    /// Plain handshake message; stamped with the next counter value.
    pub fn send_plain(&self, payload: Value) -> Result<u64, BridgeError> {
        self.enqueue(payload, true, false).map(|(mc, _)| mc)
    }

    /// Untracked post-handshake message (heartbeats, discovery requests).
    pub fn send_message(&self, payload: Value) -> Result<u64, BridgeError> {
        self.enqueue(payload, false, false).map(|(mc, _)| mc)
    }

    /// Tracked message: registers an ACK waiter under the assigned counter.
    pub fn send_tracked(
        &self,
        payload: Value,
    ) -> Result<(u64, oneshot::Receiver<AckOutcome>), BridgeError> {
        let (mc, waiter) = self.enqueue(payload, false, true)?;
        Ok((mc, waiter.expect("tracked send registers a waiter")))
    }

    pub fn forget(&self, mc: u64) {
        self.ack.forget(mc);
    }

    fn install(&self, crypto: EncryptionContext) {
        let inner = self.inner.lock().expect("outbound lock");
        let _ = inner.tx.send(WireCommand::Install(crypto));
    }

    fn close(&self) {
        let inner = self.inner.lock().expect("outbound lock");
        let _ = inner.tx.send(WireCommand::Close);
    }

    fn enqueue(
        &self,
        mut payload: Value,
        plain: bool,
        tracked: bool,
    ) -> Result<(u64, Option<oneshot::Receiver<AckOutcome>>), BridgeError> {
        let mut inner = self.inner.lock().expect("outbound lock");
        let mc = inner.next_mc;
        payload["mc"] = Value::from(mc);

        // Register before the frame can possibly go out, so a fast ACK
        // always finds its waiter.
        let waiter = tracked.then(|| self.ack.register(mc));

        let command = if plain {
            WireCommand::Plain(payload)
        } else {
            WireCommand::Auto(payload)
        };
        if inner.tx.send(command).is_err() {
            self.ack.forget(mc);
            return Err(BridgeError::NotConnected);
        }

        inner.next_mc += 1;
        Ok((mc, waiter))
    }
}

/// Owns the sink and the encryption context; single writer by design.
async fn writer_task(mut sink: WsSink, mut rx: mpsc::UnboundedReceiver<WireCommand>) {
    let mut crypto: Option<EncryptionContext> = None;

    while let Some(command) = rx.recv().await {
        let text = match command {
            WireCommand::Install(new_crypto) => {
                crypto = Some(new_crypto);
                continue;
            }
            WireCommand::Close => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            WireCommand::Plain(payload) => payload.to_string(),
            WireCommand::Auto(payload) => match crypto.as_ref() {
                Some(crypto) => match encrypt_frame(&payload, crypto) {
                    Ok(framed) => framed,
                    Err(e) => {
                        error!(error = %e, "failed to encrypt outbound frame");
                        continue;
                    }
                },
                None => payload.to_string(),
            },
        };

        if let Err(e) = sink.send(Message::Text(text)).await {
            debug!(error = %e, "outbound send failed, writer exiting");
            break;
        }
    }
}

// ── Deferred semantic processing ────────────────────────────────────

enum DispatchWork {
    Discovery(Value),
    StateUpdate(Vec<Value>),
}

/// Processes inventory merges and observer callbacks in arrival order,
/// off the frame reader's latency path.
async fn dispatch_task(
    mut rx: mpsc::UnboundedReceiver<DispatchWork>,
    inventory: Arc<Inventory>,
    fanout: Arc<StateFanout>,
) {
    while let Some(work) = rx.recv().await {
        match work {
            DispatchWork::Discovery(payload) => {
                match serde_json::from_value::<DiscoveryPayload>(payload) {
                    Ok(discovery) => inventory.apply(discovery),
                    Err(e) => warn!(error = %e, "malformed discovery payload"),
                }
            }
            DispatchWork::StateUpdate(items) => fanout.dispatch(&items, &inventory),
        }
    }
}

/// Keep-alive sender. The first tick fires immediately, which doubles as
/// the initial heartbeat required right after authentication.
async fn heartbeat_task(outbound: Outbound, interval: std::time::Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if outbound
                    .send_message(json!({"type": MessageType::Heartbeat.code()}))
                    .is_err()
                {
                    break;
                }
                trace!("heartbeat sent");
            }
        }
    }
}

// ── Session ─────────────────────────────────────────────────────────

/// Everything a session shares with the facade. Lives on the client;
/// sessions come and go underneath it.
pub(crate) struct SessionContext {
    pub config: Arc<BridgeConfig>,
    pub inventory: Arc<Inventory>,
    pub fanout: Arc<StateFanout>,
    pub ack: Arc<AckTracker>,
    pub state: watch::Sender<ConnectionState>,
    /// Live sender for the current session, `None` while disconnected.
    pub outbound: Mutex<Option<Outbound>>,
}

pub(crate) struct SessionOutcome {
    /// Whether this session reached the fully-connected state at any point.
    pub reached_connected: bool,
    /// Terminal error, unless it was already delivered to a waiting
    /// `connect()` call.
    pub error: Option<BridgeError>,
}

struct Session<'a> {
    ctx: &'a SessionContext,
    outbound: Outbound,
    work_tx: mpsc::UnboundedSender<DispatchWork>,
    auth: Authenticator,
    crypto: Option<EncryptionContext>,
    authenticated: bool,
    scope: CancellationToken,
}

/// Run one complete session: connect, handshake, route frames until the
/// socket dies or the client is shut down.
///
/// `connected_signal` (present for the first session of a `connect()`
/// call) resolves when the session is fully connected or terminally
/// failed; later reconnect sessions run without one.
pub(crate) async fn run(
    ctx: &SessionContext,
    cancel: CancellationToken,
    mut connected_signal: Option<oneshot::Sender<Result<(), BridgeError>>>,
) -> SessionOutcome {
    ctx.inventory.reset_discovery();

    let (sink, mut source) = match transport::connect(&ctx.config.address).await {
        Ok(halves) => halves,
        Err(e) => {
            let error = deliver(&mut connected_signal, e);
            return SessionOutcome {
                reached_connected: false,
                error,
            };
        }
    };

    let (wire_tx, wire_rx) = mpsc::unbounded_channel();
    let outbound = Outbound::new(wire_tx, Arc::clone(&ctx.ack));
    *ctx.outbound.lock().expect("outbound slot") = Some(outbound.clone());

    let writer = tokio::spawn(writer_task(sink, wire_rx));

    let (work_tx, work_rx) = mpsc::unbounded_channel();
    let dispatcher = tokio::spawn(dispatch_task(
        work_rx,
        Arc::clone(&ctx.inventory),
        Arc::clone(&ctx.fanout),
    ));

    let scope = cancel.child_token();
    let mut session = Session {
        ctx,
        outbound: outbound.clone(),
        work_tx,
        auth: Authenticator::new(Arc::clone(&ctx.config)),
        crypto: None,
        authenticated: false,
        scope: scope.clone(),
    };

    let mut discovery = ctx.inventory.subscribe_discovery();
    let watchdog = tokio::time::sleep(ctx.config.timing.connect_timeout);
    tokio::pin!(watchdog);

    let mut authenticated = false;
    let mut reached_connected = false;
    let mut error: Option<BridgeError> = None;

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            _ = &mut watchdog, if !reached_connected => {
                let timeout_secs = ctx.config.timing.connect_timeout.as_secs();
                error = deliver(
                    &mut connected_signal,
                    BridgeError::ConnectTimeout { timeout_secs },
                );
                break;
            }

            changed = discovery.changed(), if authenticated && !reached_connected => {
                if changed.is_ok() && *discovery.borrow_and_update() {
                    reached_connected = true;
                    ctx.state.send_replace(ConnectionState::Connected);
                    if let Some(signal) = connected_signal.take() {
                        let _ = signal.send(Ok(()));
                    }
                    info!("bridge session fully connected");
                }
            }

            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    match session.handle_text(&text) {
                        Ok(()) => authenticated = session.authenticated,
                        Err(e) => {
                            error = deliver(&mut connected_signal, e);
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    error = deliver(&mut connected_signal, BridgeError::TransportClosed);
                    break;
                }
                // Binary frames and ping/pong control frames are not part
                // of the protocol; tungstenite answers pings on its own.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error = deliver(&mut connected_signal, BridgeError::Transport(e.to_string()));
                    break;
                }
            },
        }
    }

    // Teardown: stop the heartbeat, detach the facade, resolve waiters,
    // flush the writer.
    scope.cancel();
    *ctx.outbound.lock().expect("outbound slot") = None;
    ctx.ack.abort_all();
    outbound.close();
    drop(session);
    let _ = writer.await;
    let _ = dispatcher.await;

    SessionOutcome {
        reached_connected,
        error,
    }
}

/// Hand a terminal error to the waiting `connect()` call if there is one;
/// otherwise return it for the supervisor.
fn deliver(
    signal: &mut Option<oneshot::Sender<Result<(), BridgeError>>>,
    e: BridgeError,
) -> Option<BridgeError> {
    match signal.take() {
        Some(s) => {
            let _ = s.send(Err(e));
            None
        }
        None => Some(e),
    }
}

impl Session<'_> {
    /// Per-frame hot path: decode once, ACK immediately, then route.
    fn handle_text(&mut self, text: &str) -> Result<(), BridgeError> {
        let (body, encrypted) = transport::strip_terminator(text);

        let value: Value = if encrypted {
            let Some(crypto) = self.crypto.as_ref() else {
                warn!("encrypted frame before key exchange, dropping");
                return Ok(());
            };
            match decrypt_frame(body, crypto) {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "dropping frame that failed to decrypt");
                    return Ok(());
                }
            }
        } else {
            match serde_json::from_str(body) {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "dropping unparseable frame");
                    return Ok(());
                }
            }
        };

        let frame = match Frame::from_value(value) {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "dropping frame without an envelope");
                return Ok(());
            }
        };

        // The mandatory ACK leaves before any semantic processing.
        if let Some(mc) = frame.mc {
            self.outbound.send_ack(mc)?;
        }

        self.route(frame)
    }

    fn route(&mut self, frame: Frame) -> Result<(), BridgeError> {
        use MessageType::*;

        match frame.message_type() {
            Some(Ack) => match frame.reference {
                Some(reference) => self.ctx.ack.resolve(reference, AckOutcome::Ack),
                None => warn!("ack without a ref field"),
            },
            Some(Nack) => {
                let info = frame
                    .payload
                    .get("info")
                    .and_then(Value::as_str)
                    .map(str::to_owned);
                warn!(
                    reference = ?frame.reference,
                    info = info.as_deref().unwrap_or(""),
                    "bridge rejected a message"
                );
                if let Some(reference) = frame.reference {
                    self.ctx.ack.resolve(reference, AckOutcome::Nack { info });
                }
            }
            Some(Heartbeat) => trace!("heartbeat echo"),
            // Nothing beyond the mandatory ACK.
            Some(Ping) => trace!("bridge ping"),

            Some(SetAllData) | Some(SetHomeData) => {
                let _ = self.work_tx.send(DispatchWork::Discovery(frame.payload));
            }
            Some(StateUpdate) => {
                let items = frame
                    .payload
                    .get("item")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                let _ = self.work_tx.send(DispatchWork::StateUpdate(items));
            }
            Some(SetBridgeState) => trace!("bridge state frame ignored"),
            Some(ErrorInfo) => {
                let info = frame
                    .payload
                    .get("info")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                warn!(info, "bridge reported an error");
            }
            Some(LogData) | Some(LogEntries) => {
                debug!(type_code = frame.type_code, "bridge log frame");
            }

            Some(
                ConnectionStart | ScInitResponse | ConnectionDeclined | ScInitRequest
                | PublicKeyResponse | SecretExchangeAck | LoginResponse | TokenApplyAck
                | TokenRenewResponse,
            ) => {
                let steps = self.auth.handle(&frame);
                self.apply_auth_steps(steps)?;
            }

            // Client-origin codes have no inbound meaning.
            Some(
                ConnectionConfirm | SecretExchange | LoginRequest | TokenApply | TokenRenew
                | RequestDevices | RequestRooms | DeviceDim | DeviceSwitch | RoomDim
                | RoomSwitch | ActivateScene,
            ) => debug!(type_code = frame.type_code, "client-origin code received, ignoring"),

            None => info!("Unhandled message type: {}", frame.type_code),
        }

        Ok(())
    }

    fn apply_auth_steps(&mut self, steps: Vec<AuthStep>) -> Result<(), BridgeError> {
        for step in steps {
            match step {
                AuthStep::SendPlain(payload) => {
                    self.outbound.send_plain(payload)?;
                }
                AuthStep::SendEncrypted(payload) => {
                    self.outbound.send_message(payload)?;
                }
                AuthStep::InstallContext(crypto) => {
                    self.crypto = Some(crypto.clone());
                    self.outbound.install(crypto);
                }
                AuthStep::Established => self.on_authenticated()?,
                AuthStep::Abort(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Entering the authenticated phase kicks off discovery and the
    /// keep-alive; the session counts as connected once discovery
    /// completes.
    fn on_authenticated(&mut self) -> Result<(), BridgeError> {
        self.authenticated = true;
        info!("handshake complete, requesting inventory");
        self.outbound
            .send_message(json!({"type": MessageType::RequestDevices.code()}))?;
        self.outbound
            .send_message(json!({"type": MessageType::RequestRooms.code()}))?;

        tokio::spawn(heartbeat_task(
            self.outbound.clone(),
            self.ctx.config.timing.heartbeat_interval,
            self.scope.clone(),
        ));
        Ok(())
    }
}
