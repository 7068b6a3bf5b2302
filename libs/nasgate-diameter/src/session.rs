//! Per-connection session state
//!
//! One session exists per accepted peer connection. It is created when the
//! connection is accepted, owned exclusively by that connection's task, and
//! destroyed when the connection closes. State transitions are driven by the
//! command handlers; the read loop watches `needs_close` to terminate after
//! a DPA has been flushed.

use std::time::{SystemTime, UNIX_EPOCH};

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connection accepted, no capabilities exchanged yet
    New,
    /// CER/CEA completed with at least one common application
    Established,
    /// Multi-round authentication in flight
    AuthInProgress,
    /// Accounting exchange in flight
    AcctInProgress,
    /// DPR received, DPA pending flush
    Closing,
    /// Connection torn down
    Closed,
}

/// Per-peer session
#[derive(Debug)]
pub struct Session {
    /// Session identifier
    pub id: String,
    /// Current lifecycle state
    pub state: SessionState,
    /// Set by the DPR handler; the read loop exits once the answer is flushed
    pub needs_close: bool,
}

impl Session {
    /// Create a session in the `New` state with a freshly generated id
    pub fn new(origin_host: &str) -> Self {
        Self {
            id: generate_session_id(origin_host),
            state: SessionState::New,
            needs_close: false,
        }
    }

    /// Check whether capabilities exchange has completed
    pub fn is_established(&self) -> bool {
        self.state == SessionState::Established
    }
}

/// Generate a session identifier: `<origin_host>;<unix_seconds>.<nanos>;<pid>`
pub fn generate_session_id(origin_host: &str) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!(
        "{};{}.{:09};{}",
        origin_host,
        now.as_secs(),
        now.subsec_nanos(),
        std::process::id()
    )
}
