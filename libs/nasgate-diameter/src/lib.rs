//! NASGate Diameter Protocol Library
//!
//! Server-side implementation of the Diameter base protocol (RFC 6733):
//! - AVP and message wire codec with strict length/padding handling
//! - streaming frame reader with idle and partial-frame deadlines
//! - per-connection session state machine
//! - CER/CEA, DWR/DWA, DPR/DPA and a sample authentication command,
//!   dispatched through a JSON-driven command/AVP dictionary
//!
//! The server accepts stream-oriented peer connections, negotiates a common
//! application set, sustains the session against watchdog probes and tears
//! peers down cooperatively. Proxy/relay routing, SCTP and TLS transports
//! and a client-initiator mode are out of scope.

pub mod avp;
pub mod common;
pub mod config;
pub mod dictionary;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod message;
pub mod server;
pub mod session;
pub mod transport;

pub use avp::*;
pub use common::*;
pub use config::*;
pub use dictionary::{AvpDef, CommandDef, Dictionary};
pub use dispatch::*;
pub use error::*;
pub use message::*;
pub use server::*;
pub use session::*;
pub use transport::*;

/// Diameter protocol version
pub const DIAMETER_VERSION: u8 = 1;

/// Default Diameter port
pub const DIAMETER_PORT: u16 = 3868;

/// Upper bound this server accepts for a single message
pub const MAX_MESSAGE_SIZE: u32 = 10_000;
