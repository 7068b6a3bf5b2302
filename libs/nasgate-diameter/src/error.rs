//! Diameter error types

use thiserror::Error;

/// Diameter error type
#[derive(Error, Debug)]
pub enum DiameterError {
    #[error("invalid message header: {0}")]
    InvalidHeader(String),

    #[error("invalid AVP: {0}")]
    InvalidAvp(String),

    #[error("missing AVP, need one of {0:?}")]
    MissingAvp(Vec<u32>),

    #[error("unknown command code: {0}")]
    UnknownCommand(u32),

    #[error("AVP overruns message body: {consumed} of {declared} body bytes consumed")]
    BodyOverrun { declared: usize, consumed: usize },

    #[error("message body length mismatch: read {read}, expect {expect}")]
    BodyLengthMismatch { read: usize, expect: usize },

    #[error("idle timeout waiting for message header")]
    IdleTimeout,

    #[error("timed out reading message body")]
    PartialFrameTimeout,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("dictionary error: {0}")]
    Dictionary(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Diameter result type
pub type DiameterResult<T> = Result<T, DiameterError>;

/// Diameter Result-Code values (RFC 6733)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ResultCode {
    // Success (2xxx)
    Success = 2001,

    // Protocol errors (3xxx)
    CommandUnsupported = 3001,
    UnableToDeliver = 3002,
    RealmNotServed = 3003,
    DestinationHostUnsupported = 3004,
    ApplicationUnsupported = 3007,

    // Transient failures (4xxx)
    AuthenticationRejected = 4001,

    // Permanent failures (5xxx)
    AvpUnsupported = 5001,
    UnknownSessionId = 5002,
    MissingAvp = 5005,
    NoCommonApplication = 5010,
    UnableToComply = 5012,
}

impl ResultCode {
    /// Check if result code indicates success
    pub fn is_success(&self) -> bool {
        let code = *self as u32;
        (2000..3000).contains(&code)
    }

    /// Check if result code indicates protocol error
    pub fn is_protocol_error(&self) -> bool {
        let code = *self as u32;
        (3000..4000).contains(&code)
    }

    /// Check if result code indicates transient failure
    pub fn is_transient_failure(&self) -> bool {
        let code = *self as u32;
        (4000..5000).contains(&code)
    }

    /// Check if result code indicates permanent failure
    pub fn is_permanent_failure(&self) -> bool {
        let code = *self as u32;
        (5000..6000).contains(&code)
    }
}

impl From<u32> for ResultCode {
    fn from(value: u32) -> Self {
        match value {
            2001 => ResultCode::Success,
            3001 => ResultCode::CommandUnsupported,
            3002 => ResultCode::UnableToDeliver,
            3003 => ResultCode::RealmNotServed,
            3004 => ResultCode::DestinationHostUnsupported,
            3007 => ResultCode::ApplicationUnsupported,
            4001 => ResultCode::AuthenticationRejected,
            5001 => ResultCode::AvpUnsupported,
            5002 => ResultCode::UnknownSessionId,
            5005 => ResultCode::MissingAvp,
            5010 => ResultCode::NoCommonApplication,
            _ => ResultCode::UnableToComply,
        }
    }
}
