//! Diameter AVP (Attribute-Value Pair) encoding and decoding
//!
//! AVP format (RFC 6733):
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           AVP Code                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V M P r r r r r|                  AVP Length                   |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Vendor-ID (opt)                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |    Data ...
//! +-+-+-+-+-+-+-+-+
//! ```
//!
//! The AVP Length covers the fixed header, the optional Vendor-ID and the
//! payload, but never the trailing padding. On the wire every AVP record is
//! zero-padded to the next 4-byte boundary.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::error::{DiameterError, DiameterResult};

/// AVP flags
pub mod avp_flags {
    /// Vendor-Specific bit
    pub const VENDOR: u8 = 0x80;
    /// Mandatory bit
    pub const MANDATORY: u8 = 0x40;
    /// Protected bit (encryption)
    pub const PROTECTED: u8 = 0x20;
}

/// AVP header size without vendor ID
pub const AVP_HEADER_SIZE: usize = 8;
/// AVP header size with vendor ID
pub const AVP_HEADER_SIZE_VENDOR: usize = 12;

/// Round up to the next 4-byte boundary
pub(crate) fn align4(len: usize) -> usize {
    (len + 3) & !3
}

/// Diameter AVP
#[derive(Debug, Clone, PartialEq)]
pub struct Avp {
    /// AVP code
    pub code: u32,
    /// AVP flags
    pub flags: u8,
    /// Vendor ID (if vendor-specific)
    pub vendor_id: Option<u32>,
    /// AVP payload
    pub data: AvpData,
}

/// AVP payload representations
///
/// Decoding always yields `Raw` bytes; the typed variants exist for message
/// construction, and the typed accessors on [`Avp`] interpret payloads on
/// demand. Many applications never look at most AVPs, so nothing is parsed
/// eagerly.
#[derive(Debug, Clone, PartialEq)]
pub enum AvpData {
    /// OctetString
    OctetString(Bytes),
    /// Unsigned32
    Unsigned32(u32),
    /// UTF8String
    Utf8String(String),
    /// DiameterIdentity (FQDN)
    DiameterIdentity(String),
    /// Address, wire-encoded with a 2-byte address-family tag
    Address(IpAddr),
    /// Time (seconds since the Unix epoch)
    Time(u32),
    /// Raw bytes (everything that came off the wire)
    Raw(Bytes),
}

impl Avp {
    /// Create a new AVP
    pub fn new(code: u32, flags: u8, vendor_id: Option<u32>, data: AvpData) -> Self {
        Self {
            code,
            flags,
            vendor_id,
            data,
        }
    }

    /// Create a mandatory AVP
    pub fn mandatory(code: u32, data: AvpData) -> Self {
        Self::new(code, avp_flags::MANDATORY, None, data)
    }

    /// Create a vendor-specific mandatory AVP
    pub fn vendor_mandatory(code: u32, vendor_id: u32, data: AvpData) -> Self {
        Self::new(
            code,
            avp_flags::VENDOR | avp_flags::MANDATORY,
            Some(vendor_id),
            data,
        )
    }

    /// Check if AVP is vendor-specific
    pub fn is_vendor_specific(&self) -> bool {
        self.flags & avp_flags::VENDOR != 0
    }

    /// Check if AVP is mandatory
    pub fn is_mandatory(&self) -> bool {
        self.flags & avp_flags::MANDATORY != 0
    }

    /// Payload length in bytes
    pub fn data_len(&self) -> usize {
        self.data.encoded_len()
    }

    /// The AVP Length field value: header + optional vendor ID + payload,
    /// excluding padding
    pub fn declared_len(&self) -> usize {
        let header_len = if self.is_vendor_specific() {
            AVP_HEADER_SIZE_VENDOR
        } else {
            AVP_HEADER_SIZE
        };
        header_len + self.data.encoded_len()
    }

    /// Bytes this AVP occupies on the wire, including padding
    pub fn encoded_len(&self) -> usize {
        align4(self.declared_len())
    }

    /// Encode AVP to the buffer, zero-padding to 4-byte alignment
    pub fn encode(&self, buf: &mut BytesMut) -> DiameterResult<()> {
        match (self.is_vendor_specific(), self.vendor_id) {
            (true, None) => {
                return Err(DiameterError::InvalidAvp(format!(
                    "AVP {} has V-bit set but no vendor ID",
                    self.code
                )))
            }
            (false, Some(_)) => {
                return Err(DiameterError::InvalidAvp(format!(
                    "AVP {} carries a vendor ID but the V-bit is clear",
                    self.code
                )))
            }
            _ => {}
        }

        let avp_len = self.declared_len();

        // AVP Code
        buf.put_u32(self.code);

        // Flags and 3-byte Length
        buf.put_u8(self.flags);
        buf.put_u8(((avp_len >> 16) & 0xFF) as u8);
        buf.put_u16((avp_len & 0xFFFF) as u16);

        // Vendor ID (if present)
        if let Some(vendor_id) = self.vendor_id {
            buf.put_u32(vendor_id);
        }

        // Payload
        self.data.encode(buf);

        // Padding
        for _ in avp_len..align4(avp_len) {
            buf.put_u8(0);
        }

        Ok(())
    }

    /// Parse and validate the 8-byte fixed AVP header.
    ///
    /// Returns `(code, flags, declared_length)`. Used by the streaming frame
    /// reader, which must know the declared length before pulling the rest of
    /// the record off the socket.
    pub fn parse_header(head: &[u8; AVP_HEADER_SIZE]) -> DiameterResult<(u32, u8, usize)> {
        let code = u32::from_be_bytes([head[0], head[1], head[2], head[3]]);
        let flags = head[4];
        let avp_len = ((head[5] as usize) << 16) | ((head[6] as usize) << 8) | head[7] as usize;

        if avp_len < AVP_HEADER_SIZE {
            return Err(DiameterError::InvalidAvp(format!(
                "AVP length {avp_len} is less than header size {AVP_HEADER_SIZE}"
            )));
        }
        if flags & avp_flags::VENDOR != 0 && avp_len < AVP_HEADER_SIZE_VENDOR {
            return Err(DiameterError::InvalidAvp(format!(
                "AVP length {avp_len} with Vendor-ID must be at least {AVP_HEADER_SIZE_VENDOR}"
            )));
        }

        Ok((code, flags, avp_len))
    }

    /// Decode one AVP from the buffer, consuming its padding
    pub fn decode(buf: &mut Bytes) -> DiameterResult<Self> {
        if buf.remaining() < AVP_HEADER_SIZE {
            return Err(DiameterError::InvalidAvp(format!(
                "truncated AVP header: {} bytes remaining",
                buf.remaining()
            )));
        }

        let mut head = [0u8; AVP_HEADER_SIZE];
        buf.copy_to_slice(&mut head);
        let (code, flags, avp_len) = Self::parse_header(&head)?;

        let is_vendor = flags & avp_flags::VENDOR != 0;
        let vendor_id = if is_vendor {
            if buf.remaining() < 4 {
                return Err(DiameterError::InvalidAvp(format!(
                    "truncated Vendor-ID in AVP {code}"
                )));
            }
            Some(buf.get_u32())
        } else {
            None
        };

        let header_len = if is_vendor {
            AVP_HEADER_SIZE_VENDOR
        } else {
            AVP_HEADER_SIZE
        };
        let data_len = avp_len - header_len;
        let padding = align4(avp_len) - avp_len;
        if buf.remaining() < data_len + padding {
            return Err(DiameterError::InvalidAvp(format!(
                "truncated AVP {code}: need {} payload bytes, have {}",
                data_len + padding,
                buf.remaining()
            )));
        }

        let data = buf.copy_to_bytes(data_len);
        buf.advance(padding);

        Ok(Self {
            code,
            flags,
            vendor_id,
            data: AvpData::Raw(data),
        })
    }

    /// Get payload as raw bytes
    pub fn as_octets(&self) -> Option<Bytes> {
        match &self.data {
            AvpData::OctetString(b) | AvpData::Raw(b) => Some(b.clone()),
            _ => None,
        }
    }

    /// Get payload as Unsigned32
    pub fn as_u32(&self) -> Option<u32> {
        match &self.data {
            AvpData::Unsigned32(v) | AvpData::Time(v) => Some(*v),
            AvpData::OctetString(b) | AvpData::Raw(b) if b.len() >= 4 => {
                Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
            }
            _ => None,
        }
    }

    /// Get payload as UTF8String
    pub fn as_utf8(&self) -> Option<&str> {
        match &self.data {
            AvpData::Utf8String(s) | AvpData::DiameterIdentity(s) => Some(s),
            AvpData::OctetString(b) | AvpData::Raw(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Get payload as Time: seconds since the Unix epoch
    pub fn as_time(&self) -> Option<u32> {
        self.as_u32()
    }

    /// Get payload as an IPv4 address.
    ///
    /// The payload must carry the 2-byte address-family tag `0x0001`; a bare
    /// 4-byte address or any other family is not IPv4.
    pub fn as_ipv4(&self) -> Option<Ipv4Addr> {
        match self.as_address()? {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        }
    }

    /// Get payload as an Address (IPv4 or IPv6, family-tagged)
    pub fn as_address(&self) -> Option<IpAddr> {
        match &self.data {
            AvpData::Address(addr) => Some(*addr),
            AvpData::OctetString(b) | AvpData::Raw(b) if b.len() >= 6 => {
                let family = u16::from_be_bytes([b[0], b[1]]);
                match family {
                    1 if b.len() >= 6 => {
                        let octets: [u8; 4] = [b[2], b[3], b[4], b[5]];
                        Some(IpAddr::V4(Ipv4Addr::from(octets)))
                    }
                    2 if b.len() >= 18 => {
                        let mut octets = [0u8; 16];
                        octets.copy_from_slice(&b[2..18]);
                        Some(IpAddr::V6(Ipv6Addr::from(octets)))
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

impl AvpData {
    /// Payload length in bytes
    pub fn encoded_len(&self) -> usize {
        match self {
            AvpData::OctetString(b) | AvpData::Raw(b) => b.len(),
            AvpData::Unsigned32(_) | AvpData::Time(_) => 4,
            AvpData::Utf8String(s) | AvpData::DiameterIdentity(s) => s.len(),
            AvpData::Address(addr) => match addr {
                IpAddr::V4(_) => 6,  // 2-byte family tag + 4-byte address
                IpAddr::V6(_) => 18, // 2-byte family tag + 16-byte address
            },
        }
    }

    /// Encode payload to the buffer
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            AvpData::OctetString(b) | AvpData::Raw(b) => buf.put_slice(b),
            AvpData::Unsigned32(v) | AvpData::Time(v) => buf.put_u32(*v),
            AvpData::Utf8String(s) | AvpData::DiameterIdentity(s) => buf.put_slice(s.as_bytes()),
            AvpData::Address(addr) => match addr {
                IpAddr::V4(v4) => {
                    buf.put_u16(1); // AddressType: IPv4
                    buf.put_slice(&v4.octets());
                }
                IpAddr::V6(v6) => {
                    buf.put_u16(2); // AddressType: IPv6
                    buf.put_slice(&v6.octets());
                }
            },
        }
    }
}

/// Find the first AVP with the given code
pub fn find_avp(avps: &[Avp], code: u32) -> Option<&Avp> {
    avps.iter().find(|a| a.code == code)
}

/// Find every AVP with the given code, in wire order
pub fn find_all_avps(avps: &[Avp], code: u32) -> Vec<&Avp> {
    avps.iter().filter(|a| a.code == code).collect()
}
