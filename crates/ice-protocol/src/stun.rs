//! STUN message codec
//!
//! Covers the part of RFC 5389 used by ICE connectivity checks: Binding
//! requests and responses carrying USERNAME, XOR-MAPPED-ADDRESS,
//! MESSAGE-INTEGRITY and FINGERPRINT.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::ops::Range;

use bytes::Bytes;
use crc32fast::Hasher;
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::{ProtocolError, ProtocolResult};

type HmacSha1 = Hmac<Sha1>;

/// Size of the fixed STUN header
pub const STUN_HEADER_SIZE: usize = 20;

/// Magic cookie present in every RFC 5389 message
pub const STUN_MAGIC_COOKIE: u32 = 0x2112A442;

const ATTR_HEADER_SIZE: usize = 4;
const MESSAGE_INTEGRITY_SIZE: usize = 20;
const FINGERPRINT_SIZE: usize = 4;
const FINGERPRINT_XOR: u32 = 0x5354554E;

const ATTR_USERNAME: u16 = 0x0006;
const ATTR_MESSAGE_INTEGRITY: u16 = 0x0008;
const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;
const ATTR_FINGERPRINT: u16 = 0x8028;

const FAMILY_IPV4: u8 = 0x01;
const FAMILY_IPV6: u8 = 0x02;

/// 96-bit STUN transaction identifier
pub type TransactionId = [u8; 12];

/// STUN message class and method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StunMessageType {
    BindingRequest,
    BindingResponse,
    BindingErrorResponse,
    Other(u16),
}

impl StunMessageType {
    /// Wire value of the message type
    pub fn code(self) -> u16 {
        match self {
            Self::BindingRequest => 0x0001,
            Self::BindingResponse => 0x0101,
            Self::BindingErrorResponse => 0x0111,
            Self::Other(code) => code,
        }
    }

    pub fn from_code(code: u16) -> Self {
        match code {
            0x0001 => Self::BindingRequest,
            0x0101 => Self::BindingResponse,
            0x0111 => Self::BindingErrorResponse,
            other => Self::Other(other),
        }
    }
}

/// A STUN message backed by its wire encoding.
///
/// Attributes are appended in place; the header length is kept in sync
/// after every append so `as_bytes` is always a valid message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StunMessage {
    buf: Vec<u8>,
}

impl StunMessage {
    /// Create an attribute-less message
    pub fn new(message_type: StunMessageType, transaction_id: TransactionId) -> Self {
        let mut buf = Vec::with_capacity(128);
        buf.extend_from_slice(&message_type.code().to_be_bytes());
        buf.extend_from_slice(&0u16.to_be_bytes());
        buf.extend_from_slice(&STUN_MAGIC_COOKIE.to_be_bytes());
        buf.extend_from_slice(&transaction_id);
        Self { buf }
    }

    /// Create a message with a fresh random transaction ID
    pub fn with_random_transaction_id(message_type: StunMessageType) -> Self {
        Self::new(message_type, rand::random())
    }

    /// Parse and validate the header of a received datagram.
    ///
    /// Bytes past the length announced in the header are dropped.
    pub fn parse(data: &[u8]) -> ProtocolResult<Self> {
        if data.len() < STUN_HEADER_SIZE {
            return Err(ProtocolError::Truncated {
                needed: STUN_HEADER_SIZE,
                actual: data.len(),
            });
        }
        if data[0] & 0xC0 != 0 {
            return Err(ProtocolError::MalformedHeader("leading bits must be zero"));
        }

        let cookie = read_u32(data, 4);
        if cookie != STUN_MAGIC_COOKIE {
            return Err(ProtocolError::BadMagicCookie(cookie));
        }

        let length = read_u16(data, 2) as usize;
        if length % 4 != 0 {
            return Err(ProtocolError::MalformedHeader(
                "length is not a multiple of four",
            ));
        }

        let total = STUN_HEADER_SIZE + length;
        if data.len() < total {
            return Err(ProtocolError::Truncated {
                needed: total,
                actual: data.len(),
            });
        }

        Ok(Self {
            buf: data[..total].to_vec(),
        })
    }

    /// Cheap check used to demultiplex STUN from other traffic on a socket
    pub fn looks_like_stun(data: &[u8]) -> bool {
        data.len() >= STUN_HEADER_SIZE
            && data[0] & 0xC0 == 0
            && read_u32(data, 4) == STUN_MAGIC_COOKIE
    }

    pub fn message_type(&self) -> StunMessageType {
        StunMessageType::from_code(read_u16(&self.buf, 0))
    }

    /// Attribute section length from the header
    pub fn length(&self) -> u16 {
        read_u16(&self.buf, 2)
    }

    pub fn transaction_id(&self) -> TransactionId {
        let mut tid = [0u8; 12];
        tid.copy_from_slice(&self.buf[8..STUN_HEADER_SIZE]);
        tid
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Bytes {
        Bytes::from(self.buf)
    }

    /// Append a USERNAME attribute
    pub fn add_username(&mut self, username: &str) -> ProtocolResult<()> {
        self.push_attr(ATTR_USERNAME, username.as_bytes())
    }

    /// The USERNAME attribute, if present
    pub fn username(&self) -> ProtocolResult<Option<&str>> {
        match self.find_attr(ATTR_USERNAME) {
            Some((value, _)) => std::str::from_utf8(&self.buf[value])
                .map(Some)
                .map_err(|_| ProtocolError::InvalidUsername),
            None => Ok(None),
        }
    }

    /// Append an XOR-MAPPED-ADDRESS attribute describing `addr`
    pub fn add_xor_mapped_address(&mut self, addr: SocketAddr) -> ProtocolResult<()> {
        let value = encode_xor_address(addr, &self.transaction_id());
        self.push_attr(ATTR_XOR_MAPPED_ADDRESS, &value)
    }

    /// The XOR-MAPPED-ADDRESS attribute, if present
    pub fn xor_mapped_address(&self) -> ProtocolResult<Option<SocketAddr>> {
        match self.find_attr(ATTR_XOR_MAPPED_ADDRESS) {
            Some((value, _)) => {
                decode_xor_address(&self.buf[value], &self.transaction_id()).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Append MESSAGE-INTEGRITY computed with `key` over everything so far
    pub fn add_message_integrity(&mut self, key: &[u8]) -> ProtocolResult<()> {
        let offset = self.buf.len();
        let tag = self.integrity_mac(key, offset)?.finalize().into_bytes();
        self.push_attr(ATTR_MESSAGE_INTEGRITY, &tag)
    }

    /// Check MESSAGE-INTEGRITY against `key` in constant time
    pub fn validate_message_integrity(&self, key: &[u8]) -> bool {
        let Some((value, offset)) = self.find_attr(ATTR_MESSAGE_INTEGRITY) else {
            return false;
        };
        if value.len() != MESSAGE_INTEGRITY_SIZE {
            return false;
        }

        match self.integrity_mac(key, offset) {
            Ok(mac) => mac.verify_slice(&self.buf[value]).is_ok(),
            Err(_) => false,
        }
    }

    /// Append FINGERPRINT over everything so far
    pub fn add_fingerprint(&mut self) -> ProtocolResult<()> {
        let offset = self.buf.len();
        let fingerprint = self.fingerprint(offset);
        self.push_attr(ATTR_FINGERPRINT, &fingerprint.to_be_bytes())
    }

    /// Check the FINGERPRINT attribute; false when absent
    pub fn validate_fingerprint(&self) -> bool {
        let Some((value, offset)) = self.find_attr(ATTR_FINGERPRINT) else {
            return false;
        };
        if value.len() != FINGERPRINT_SIZE {
            return false;
        }

        self.fingerprint(offset) == read_u32(&self.buf, value.start)
    }

    /// HMAC-SHA1 over the message up to `offset`, with the header length
    /// rewritten as if MESSAGE-INTEGRITY were the last attribute
    fn integrity_mac(&self, key: &[u8], offset: usize) -> ProtocolResult<HmacSha1> {
        let adjusted = offset - STUN_HEADER_SIZE + ATTR_HEADER_SIZE + MESSAGE_INTEGRITY_SIZE;
        let header = self.header_with_length(adjusted)?;

        let mut mac = HmacSha1::new_from_slice(key)
            .map_err(|_| ProtocolError::InvalidKey)?;
        mac.update(&header);
        mac.update(&self.buf[STUN_HEADER_SIZE..offset]);
        Ok(mac)
    }

    fn fingerprint(&self, offset: usize) -> u32 {
        let adjusted = offset - STUN_HEADER_SIZE + ATTR_HEADER_SIZE + FINGERPRINT_SIZE;
        let mut crc = Hasher::new();
        match self.header_with_length(adjusted) {
            Ok(header) => crc.update(&header),
            // Unreachable for messages that fit in a datagram; yields a
            // value that will never validate.
            Err(_) => return !0,
        }
        crc.update(&self.buf[STUN_HEADER_SIZE..offset]);
        crc.finalize() ^ FINGERPRINT_XOR
    }

    fn header_with_length(&self, length: usize) -> ProtocolResult<[u8; STUN_HEADER_SIZE]> {
        let length = u16::try_from(length).map_err(|_| ProtocolError::AttributeTooLarge {
            size: length,
            max: u16::MAX as usize,
        })?;
        let mut header = [0u8; STUN_HEADER_SIZE];
        header.copy_from_slice(&self.buf[..STUN_HEADER_SIZE]);
        header[2..4].copy_from_slice(&length.to_be_bytes());
        Ok(header)
    }

    /// Locate the first attribute of type `attr_type`.
    ///
    /// Returns the value range and the offset of the attribute header.
    /// The walk stops at the first attribute that overruns the message.
    fn find_attr(&self, attr_type: u16) -> Option<(Range<usize>, usize)> {
        let end = self.buf.len();
        let mut pos = STUN_HEADER_SIZE;

        while pos + ATTR_HEADER_SIZE <= end {
            let current = read_u16(&self.buf, pos);
            let len = read_u16(&self.buf, pos + 2) as usize;
            let start = pos + ATTR_HEADER_SIZE;
            if start + len > end {
                return None;
            }
            if current == attr_type {
                return Some((start..start + len, pos));
            }
            pos = start + padded(len);
        }

        None
    }

    fn push_attr(&mut self, attr_type: u16, value: &[u8]) -> ProtocolResult<()> {
        let max = u16::MAX as usize;
        let new_length = self.buf.len() - STUN_HEADER_SIZE + ATTR_HEADER_SIZE + padded(value.len());
        if value.len() > max || new_length > max {
            return Err(ProtocolError::AttributeTooLarge {
                size: value.len(),
                max,
            });
        }

        self.buf.extend_from_slice(&attr_type.to_be_bytes());
        self.buf.extend_from_slice(&(value.len() as u16).to_be_bytes());
        self.buf.extend_from_slice(value);
        self.buf.resize(STUN_HEADER_SIZE + new_length, 0);
        self.buf[2..4].copy_from_slice(&(new_length as u16).to_be_bytes());
        Ok(())
    }
}

fn padded(len: usize) -> usize {
    (len + 3) & !3
}

fn read_u16(data: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([data[at], data[at + 1]])
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn xor_key(transaction_id: &TransactionId) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..4].copy_from_slice(&STUN_MAGIC_COOKIE.to_be_bytes());
    key[4..].copy_from_slice(transaction_id);
    key
}

fn encode_xor_address(addr: SocketAddr, transaction_id: &TransactionId) -> Vec<u8> {
    let key = xor_key(transaction_id);
    let xport = addr.port() ^ (STUN_MAGIC_COOKIE >> 16) as u16;

    let mut value = Vec::with_capacity(20);
    value.push(0);
    match addr.ip() {
        IpAddr::V4(ip) => {
            value.push(FAMILY_IPV4);
            value.extend_from_slice(&xport.to_be_bytes());
            value.extend(ip.octets().iter().zip(key).map(|(b, k)| b ^ k));
        }
        IpAddr::V6(ip) => {
            value.push(FAMILY_IPV6);
            value.extend_from_slice(&xport.to_be_bytes());
            value.extend(ip.octets().iter().zip(key).map(|(b, k)| b ^ k));
        }
    }
    value
}

fn decode_xor_address(value: &[u8], transaction_id: &TransactionId) -> ProtocolResult<SocketAddr> {
    if value.len() < 4 {
        return Err(ProtocolError::Truncated {
            needed: 4,
            actual: value.len(),
        });
    }

    let key = xor_key(transaction_id);
    let port = read_u16(value, 2) ^ (STUN_MAGIC_COOKIE >> 16) as u16;
    let family = value[1];

    let ip = match family {
        FAMILY_IPV4 => {
            let raw = value.get(4..8).ok_or(ProtocolError::Truncated {
                needed: 8,
                actual: value.len(),
            })?;
            let mut octets = [0u8; 4];
            for (i, b) in raw.iter().enumerate() {
                octets[i] = b ^ key[i];
            }
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        FAMILY_IPV6 => {
            let raw = value.get(4..20).ok_or(ProtocolError::Truncated {
                needed: 20,
                actual: value.len(),
            })?;
            let mut octets = [0u8; 16];
            for (i, b) in raw.iter().enumerate() {
                octets[i] = b ^ key[i];
            }
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        other => return Err(ProtocolError::AddressFamily(other)),
    };

    Ok(SocketAddr::new(ip, port))
}
