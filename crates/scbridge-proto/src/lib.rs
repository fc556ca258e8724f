//! Wire-level primitives for the SC bridge WebSocket protocol.
//!
//! This crate contains the pure, I/O-free pieces of the protocol:
//!
//! - **Frame codec** ([`codec`]) -- AES-256-CBC with the bridge's null-byte
//!   padding scheme and the `0x04`-terminated base64 framing.
//! - **Key wrap** ([`keywrap`]) -- RSAES-PKCS1-v1_5 wrapping of a freshly
//!   generated session secret for delivery to the bridge.
//! - **Auth hash** ([`authhash`]) -- the double-SHA-256 login password
//!   derivation and salt generation.
//! - **Message registry** ([`message`]) -- numeric message types and the
//!   decoded inbound frame envelope.
//!
//! The connection runtime lives in `scbridge-core`; everything here is
//! deterministic (given an RNG) and directly unit-testable.

pub mod authhash;
pub mod codec;
pub mod error;
pub mod keywrap;
pub mod message;

pub use authhash::{generate_salt, password_hash, DEFAULT_SALT_LEN};
pub use codec::{decrypt_frame, encrypt_frame, EncryptionContext, FRAME_TERMINATOR};
pub use error::ProtoError;
pub use keywrap::wrap_session_secret;
pub use message::{Frame, MessageType};
