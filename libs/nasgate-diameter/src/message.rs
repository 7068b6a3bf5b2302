//! Diameter message header and base message types
//!
//! Message format (RFC 6733):
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |    Version    |                 Message Length                |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! | command flags |                  Command-Code                 |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                         Application-ID                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                      Hop-by-Hop Identifier                    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                      End-to-End Identifier                    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  AVPs ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::avp::Avp;
use crate::common::avp_code;
use crate::dictionary::Dictionary;
use crate::error::{DiameterError, DiameterResult};
use crate::{DIAMETER_VERSION, MAX_MESSAGE_SIZE};

/// Diameter message header size
pub const DIAMETER_HEADER_SIZE: usize = 20;

/// Command flags
pub mod cmd_flags {
    /// Request bit
    pub const REQUEST: u8 = 0x80;
    /// Proxiable bit
    pub const PROXIABLE: u8 = 0x40;
    /// Error bit
    pub const ERROR: u8 = 0x20;
    /// Potentially re-transmitted bit
    pub const RETRANSMIT: u8 = 0x10;
}

/// Base Diameter command codes (RFC 6733)
pub mod base_cmd {
    /// Capabilities-Exchange-Request/Answer
    pub const CAPABILITIES_EXCHANGE: u32 = 257;
    /// Device-Watchdog-Request/Answer
    pub const DEVICE_WATCHDOG: u32 = 280;
    /// Disconnect-Peer-Request/Answer
    pub const DISCONNECT_PEER: u32 = 282;
}

/// Diameter message header
#[derive(Debug, Clone, PartialEq)]
pub struct DiameterHeader {
    /// Protocol version (always 1)
    pub version: u8,
    /// Message length including header and padded AVPs
    pub length: u32,
    /// Command flags
    pub flags: u8,
    /// Command code
    pub command_code: u32,
    /// Application ID
    pub application_id: u32,
    /// Hop-by-Hop identifier
    pub hop_by_hop_id: u32,
    /// End-to-End identifier
    pub end_to_end_id: u32,
}

impl DiameterHeader {
    /// Create a new request header
    pub fn new_request(command_code: u32, application_id: u32) -> Self {
        Self {
            version: DIAMETER_VERSION,
            length: DIAMETER_HEADER_SIZE as u32,
            flags: cmd_flags::REQUEST,
            command_code,
            application_id,
            hop_by_hop_id: 0,
            end_to_end_id: 0,
        }
    }

    /// Create an answer header from a request: command, application and both
    /// correlation identifiers are copied, the R-bit is cleared
    pub fn new_answer(request: &DiameterHeader) -> Self {
        Self {
            version: DIAMETER_VERSION,
            length: DIAMETER_HEADER_SIZE as u32,
            flags: request.flags & cmd_flags::PROXIABLE,
            command_code: request.command_code,
            application_id: request.application_id,
            hop_by_hop_id: request.hop_by_hop_id,
            end_to_end_id: request.end_to_end_id,
        }
    }

    /// Check if this is a request
    pub fn is_request(&self) -> bool {
        self.flags & cmd_flags::REQUEST != 0
    }

    /// Check if this is an answer
    pub fn is_answer(&self) -> bool {
        !self.is_request()
    }

    /// Check if the error bit is set
    pub fn is_error(&self) -> bool {
        self.flags & cmd_flags::ERROR != 0
    }

    /// Validate an inbound header on the server path: version 1, length
    /// within `20..=10_000`, R-bit set (this peer only accepts requests)
    pub fn validate_inbound(&self) -> DiameterResult<()> {
        if self.version != DIAMETER_VERSION {
            return Err(DiameterError::InvalidHeader(format!(
                "unsupported Diameter version: {}",
                self.version
            )));
        }
        if self.length < DIAMETER_HEADER_SIZE as u32 || self.length > MAX_MESSAGE_SIZE {
            return Err(DiameterError::InvalidHeader(format!(
                "message length {} out of range {DIAMETER_HEADER_SIZE}..={MAX_MESSAGE_SIZE}",
                self.length
            )));
        }
        if !self.is_request() {
            return Err(DiameterError::InvalidHeader(
                "not a request message (R-bit not set)".into(),
            ));
        }
        Ok(())
    }

    /// Encode header to bytes
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.version);
        // Length is 3 bytes
        buf.put_u8(((self.length >> 16) & 0xFF) as u8);
        buf.put_u16((self.length & 0xFFFF) as u16);
        buf.put_u8(self.flags);
        // Command code is 3 bytes
        buf.put_u8(((self.command_code >> 16) & 0xFF) as u8);
        buf.put_u16((self.command_code & 0xFFFF) as u16);
        buf.put_u32(self.application_id);
        buf.put_u32(self.hop_by_hop_id);
        buf.put_u32(self.end_to_end_id);
    }

    /// Decode header from bytes
    pub fn decode(buf: &mut Bytes) -> DiameterResult<Self> {
        if buf.remaining() < DIAMETER_HEADER_SIZE {
            return Err(DiameterError::InvalidHeader(format!(
                "truncated header: {} bytes",
                buf.remaining()
            )));
        }

        let version = buf.get_u8();
        let len_high = buf.get_u8() as u32;
        let len_low = buf.get_u16() as u32;
        let length = (len_high << 16) | len_low;

        let flags = buf.get_u8();
        let cmd_high = buf.get_u8() as u32;
        let cmd_low = buf.get_u16() as u32;
        let command_code = (cmd_high << 16) | cmd_low;

        let application_id = buf.get_u32();
        let hop_by_hop_id = buf.get_u32();
        let end_to_end_id = buf.get_u32();

        Ok(Self {
            version,
            length,
            flags,
            command_code,
            application_id,
            hop_by_hop_id,
            end_to_end_id,
        })
    }
}

/// Diameter message (header + ordered AVPs)
///
/// The body is a sequence, not a map: a command may legally carry several
/// AVPs of the same code (e.g. multiple Auth-Application-Id in a CER).
#[derive(Debug, Clone)]
pub struct DiameterMessage {
    /// Message header
    pub header: DiameterHeader,
    /// AVPs in wire order
    pub avps: Vec<Avp>,
}

impl DiameterMessage {
    /// Create a new request message
    pub fn new_request(command_code: u32, application_id: u32) -> Self {
        Self {
            header: DiameterHeader::new_request(command_code, application_id),
            avps: Vec::new(),
        }
    }

    /// Create a new answer message from a request
    pub fn new_answer(request: &DiameterMessage) -> Self {
        Self {
            header: DiameterHeader::new_answer(&request.header),
            avps: Vec::new(),
        }
    }

    /// Append an AVP to the message
    pub fn add_avp(&mut self, avp: Avp) -> &mut Self {
        self.avps.push(avp);
        self
    }

    /// Find the first AVP with the given code
    pub fn find_avp(&self, code: u32) -> Option<&Avp> {
        crate::avp::find_avp(&self.avps, code)
    }

    /// Find every AVP with the given code, in wire order
    pub fn find_all_avps(&self, code: u32) -> Vec<&Avp> {
        crate::avp::find_all_avps(&self.avps, code)
    }

    /// Total message length: header plus every AVP with its padding
    pub fn calculate_length(&self) -> u32 {
        let avp_len: usize = self.avps.iter().map(|a| a.encoded_len()).sum();
        (DIAMETER_HEADER_SIZE + avp_len) as u32
    }

    /// Encode the message, recomputing the length field
    pub fn encode(&self) -> DiameterResult<BytesMut> {
        let mut buf = BytesMut::with_capacity(self.calculate_length() as usize);

        let mut header = self.header.clone();
        header.length = self.calculate_length();
        header.encode(&mut buf);

        for avp in &self.avps {
            avp.encode(&mut buf)?;
        }

        Ok(buf)
    }

    /// Decode the AVP sequence of a message whose header is already parsed.
    ///
    /// `buf` must hold exactly the body (everything after the 20-byte
    /// header). Each AVP's padded length is charged against the declared
    /// body length; an AVP that would run past it, or a body that does not
    /// land exactly on it, is rejected.
    pub fn decode_body(header: &DiameterHeader, buf: &mut Bytes) -> DiameterResult<Vec<Avp>> {
        let body_len = (header.length as usize).saturating_sub(DIAMETER_HEADER_SIZE);
        if buf.remaining() < body_len {
            return Err(DiameterError::BodyLengthMismatch {
                read: buf.remaining(),
                expect: body_len,
            });
        }

        let mut avps = Vec::new();
        let mut consumed = 0usize;
        while consumed < body_len {
            let before = buf.remaining();
            let avp = Avp::decode(buf)?;
            let taken = before - buf.remaining();
            if consumed + taken > body_len {
                return Err(DiameterError::BodyOverrun {
                    declared: body_len,
                    consumed: consumed + taken,
                });
            }
            consumed += taken;
            avps.push(avp);
        }

        if consumed != body_len {
            return Err(DiameterError::BodyLengthMismatch {
                read: consumed,
                expect: body_len,
            });
        }
        Ok(avps)
    }

    /// Decode a complete message from bytes
    pub fn decode(buf: &mut Bytes) -> DiameterResult<Self> {
        let header = DiameterHeader::decode(buf)?;
        if (header.length as usize) < DIAMETER_HEADER_SIZE {
            return Err(DiameterError::InvalidHeader(format!(
                "message length {} is less than header size",
                header.length
            )));
        }

        let body_len = header.length as usize - DIAMETER_HEADER_SIZE;
        let mut body = buf.copy_to_bytes(body_len.min(buf.remaining()));
        let avps = Self::decode_body(&header, &mut body)?;

        Ok(Self { header, avps })
    }

    /// Check that every AVP group the dictionary requires for this command
    /// is satisfied by at least one present AVP.
    ///
    /// Extra AVPs are fine, and order is not checked. Unknown commands are
    /// rejected here; unknown AVP codes never are.
    pub fn validate_avps(&self, dict: &Dictionary) -> DiameterResult<()> {
        let command = dict
            .command(self.header.command_code)
            .ok_or(DiameterError::UnknownCommand(self.header.command_code))?;

        for group in &command.required_avps {
            let satisfied = group.iter().any(|code| self.find_avp(*code).is_some());
            if !satisfied {
                return Err(DiameterError::MissingAvp(group.clone()));
            }
        }
        Ok(())
    }

    /// Get Session-Id AVP value
    pub fn session_id(&self) -> Option<&str> {
        self.find_avp(avp_code::SESSION_ID)?.as_utf8()
    }

    /// Get Origin-Host AVP value
    pub fn origin_host(&self) -> Option<&str> {
        self.find_avp(avp_code::ORIGIN_HOST)?.as_utf8()
    }

    /// Get Origin-Realm AVP value
    pub fn origin_realm(&self) -> Option<&str> {
        self.find_avp(avp_code::ORIGIN_REALM)?.as_utf8()
    }

    /// Get Result-Code AVP value
    pub fn result_code(&self) -> Option<u32> {
        self.find_avp(avp_code::RESULT_CODE)?.as_u32()
    }

    /// Get Error-Message AVP value
    pub fn error_message(&self) -> Option<&str> {
        self.find_avp(avp_code::ERROR_MESSAGE)?.as_utf8()
    }
}
