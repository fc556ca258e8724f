// ── Runtime connection configuration ──
//
// Describes how to reach and authenticate with one bridge. Built by the
// embedding application and handed to `BridgeClient::new`; the core never
// reads config files. Address and auth key are consumed at connect time --
// changing them requires a fresh client.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::error::BridgeError;

/// Client identity announced in ConnectionConfirm. Fixed at build time.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    pub client_type: String,
    pub client_id: String,
    pub client_version: String,
}

impl Default for ClientIdentity {
    fn default() -> Self {
        Self {
            client_type: "app".into(),
            client_id: "scbridge-rs".into(),
            client_version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}

/// Protocol timing knobs.
///
/// The defaults match what the bridge firmware expects; tests shrink them.
#[derive(Debug, Clone)]
pub struct Timing {
    /// Window for handshake + initial discovery. Default: 30 s.
    pub connect_timeout: Duration,
    /// Keep-alive heartbeat period. Default: 30 s.
    pub heartbeat_interval: Duration,
    /// Delay before the single reconnect attempt after a lost session.
    /// Default: 5 s.
    pub reconnect_delay: Duration,
    /// How long to wait for an ACK per attempt. Default: 5 s.
    pub ack_timeout: Duration,
    /// Pause between command attempts. Default: 500 ms.
    pub retry_delay: Duration,
    /// Total send attempts per command. Default: 3.
    pub max_attempts: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(5),
            ack_timeout: Duration::from_secs(5),
            retry_delay: Duration::from_millis(500),
            max_attempts: 3,
        }
    }
}

/// Configuration for a single bridge connection.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Bridge address: bare IP/hostname (port 80) or `host:port`.
    pub address: String,
    /// Pairing auth key, used in the login hash and never logged.
    pub auth_key: SecretString,
    pub identity: ClientIdentity,
    pub timing: Timing,
}

impl BridgeConfig {
    pub fn new(address: impl Into<String>, auth_key: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            auth_key: SecretString::from(auth_key.into()),
            identity: ClientIdentity::default(),
            timing: Timing::default(),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), BridgeError> {
        if self.address.trim().is_empty() {
            return Err(BridgeError::ConfigMissing { field: "address" });
        }
        if self.auth_key.expose_secret().is_empty() {
            return Err(BridgeError::ConfigMissing { field: "auth_key" });
        }
        Ok(())
    }
}
