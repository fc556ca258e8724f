// ── Handshake state machine ──
//
// Drives the session from ConnectionStart through token renewal. The
// machine itself does no I/O: each inbound frame yields a list of steps
// for the session loop to execute (send a message, install the freshly
// generated encryption context, declare the handshake done or failed).
//
// Encryption boundary: everything up to and including SecretExchange goes
// out as plain JSON -- the bridge only learns the AES key by unwrapping
// that message. The first encrypted outbound is LoginRequest; inbound
// decryption starts at SecretExchangeAck.

use std::sync::Arc;

use secrecy::ExposeSecret;
use serde_json::{json, Value};
use tracing::{debug, warn};

use scbridge_proto::{
    generate_salt, password_hash, wrap_session_secret, EncryptionContext, Frame, MessageType,
    DEFAULT_SALT_LEN,
};

use crate::config::BridgeConfig;
use crate::error::BridgeError;

/// Where the handshake currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AuthPhase {
    Idle,
    AwaitingScInit,
    AwaitingPublicKey,
    AwaitingSecretAck,
    AwaitingLoginResponse,
    AwaitingTokenApply,
    AwaitingTokenRenew,
    AwaitingTokenApplyFinal,
    Authenticated,
}

/// Instructions handed back to the session loop.
pub(crate) enum AuthStep {
    /// Send as raw JSON text (pre-secret handshake traffic).
    SendPlain(Value),
    /// Send through the codec.
    SendEncrypted(Value),
    /// Install the freshly generated encryption context on both halves
    /// of the connection before the next send.
    InstallContext(EncryptionContext),
    /// Terminal: the session is authenticated.
    Established,
    /// Terminal: the handshake failed.
    Abort(BridgeError),
}

pub(crate) struct Authenticator {
    config: Arc<BridgeConfig>,
    phase: AuthPhase,
    /// Bridge-advertised device id from ConnectionStart; part of the
    /// login hash.
    bridge_device_id: String,
    connection_id: String,
    token: String,
}

impl Authenticator {
    pub fn new(config: Arc<BridgeConfig>) -> Self {
        Self {
            config,
            phase: AuthPhase::Idle,
            bridge_device_id: String::new(),
            connection_id: String::new(),
            token: String::new(),
        }
    }

    #[cfg(test)]
    pub fn phase(&self) -> AuthPhase {
        self.phase
    }

    /// Feed one inbound handshake frame through the machine.
    pub fn handle(&mut self, frame: &Frame) -> Vec<AuthStep> {
        use MessageType::*;

        let Some(kind) = frame.message_type() else {
            return self.unexpected(frame);
        };

        // Declined is fatal from any phase.
        if kind == ConnectionDeclined {
            let reason = frame
                .payload
                .get("info")
                .and_then(Value::as_str)
                .unwrap_or("no reason given")
                .to_owned();
            return vec![AuthStep::Abort(BridgeError::ConnectionDeclined { reason })];
        }

        match (self.phase, kind) {
            (AuthPhase::Idle, ConnectionStart) => {
                self.bridge_device_id = frame
                    .payload
                    .get("deviceId")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned();
                self.connection_id = frame
                    .payload
                    .get("connectionId")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned();
                debug!(
                    bridge_device_id = %self.bridge_device_id,
                    connection_id = %self.connection_id,
                    "bridge connection started"
                );

                let identity = &self.config.identity;
                self.phase = AuthPhase::AwaitingScInit;
                vec![AuthStep::SendPlain(json!({
                    "type": ConnectionConfirm.code(),
                    "clientType": identity.client_type,
                    "clientId": identity.client_id,
                    "clientVersion": identity.client_version,
                    "connectionId": self.connection_id,
                }))]
            }

            (AuthPhase::AwaitingScInit, ScInitResponse) => {
                self.phase = AuthPhase::AwaitingPublicKey;
                vec![AuthStep::SendPlain(json!({"type": ScInitRequest.code()}))]
            }

            // Older firmwares echo our ScInitRequest back instead of
            // answering with the public key; answering again unsticks them.
            (AuthPhase::AwaitingPublicKey, ScInitRequest) => {
                debug!("sc-init request echoed by bridge, repeating");
                vec![AuthStep::SendPlain(json!({"type": ScInitRequest.code()}))]
            }

            (AuthPhase::AwaitingPublicKey, PublicKeyResponse) => {
                let Some(pem) = frame.payload.get("publicKey").and_then(Value::as_str) else {
                    return vec![AuthStep::Abort(BridgeError::AuthFailed(
                        "public key response carried no key".into(),
                    ))];
                };

                let ctx = EncryptionContext::generate();
                match wrap_session_secret(pem, &ctx) {
                    Ok(secret) => {
                        self.phase = AuthPhase::AwaitingSecretAck;
                        vec![
                            AuthStep::InstallContext(ctx),
                            AuthStep::SendPlain(json!({
                                "type": SecretExchange.code(),
                                "secret": secret,
                            })),
                        ]
                    }
                    Err(e) => vec![AuthStep::Abort(BridgeError::AuthFailed(format!(
                        "session secret wrap failed: {e}"
                    )))],
                }
            }

            (AuthPhase::AwaitingSecretAck, SecretExchangeAck) => {
                let salt = generate_salt(DEFAULT_SALT_LEN);
                let password = password_hash(
                    &self.bridge_device_id,
                    self.config.auth_key.expose_secret(),
                    &salt,
                );
                self.phase = AuthPhase::AwaitingLoginResponse;
                vec![AuthStep::SendEncrypted(json!({
                    "type": LoginRequest.code(),
                    "username": "default",
                    "password": password,
                    "salt": salt,
                }))]
            }

            (AuthPhase::AwaitingLoginResponse, LoginResponse) => {
                let Some(token) = frame.payload.get("token").and_then(Value::as_str) else {
                    return vec![AuthStep::Abort(BridgeError::AuthFailed(
                        "login did not yield a token".into(),
                    ))];
                };
                self.token = token.to_owned();
                self.phase = AuthPhase::AwaitingTokenApply;
                vec![AuthStep::SendEncrypted(self.token_apply())]
            }

            (AuthPhase::AwaitingTokenApply, TokenApplyAck) => {
                self.phase = AuthPhase::AwaitingTokenRenew;
                vec![AuthStep::SendEncrypted(json!({
                    "type": TokenRenew.code(),
                    "token": self.token,
                }))]
            }

            (AuthPhase::AwaitingTokenRenew, TokenRenewResponse) => {
                let Some(token) = frame.payload.get("token").and_then(Value::as_str) else {
                    return vec![AuthStep::Abort(BridgeError::AuthFailed(
                        "token renewal did not yield a token".into(),
                    ))];
                };
                self.token = token.to_owned();
                self.phase = AuthPhase::AwaitingTokenApplyFinal;
                vec![AuthStep::SendEncrypted(self.token_apply())]
            }

            (AuthPhase::AwaitingTokenApplyFinal, TokenApplyAck) => {
                self.phase = AuthPhase::Authenticated;
                debug!("handshake complete");
                vec![AuthStep::Established]
            }

            _ => self.unexpected(frame),
        }
    }

    fn token_apply(&self) -> Value {
        json!({
            "type": MessageType::TokenApply.code(),
            "token": self.token,
        })
    }

    fn unexpected(&self, frame: &Frame) -> Vec<AuthStep> {
        warn!(
            phase = ?self.phase,
            type_code = frame.type_code,
            "unexpected message during handshake, ignoring"
        );
        Vec::new()
    }
}
