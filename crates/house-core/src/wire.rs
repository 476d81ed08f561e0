//! House wire format: HNCP constants and the message envelope.
//!
//! These values ARE the protocol. Every constant and every field size here is
//! shared with deployed peers and must stay bit-for-bit compatible.
//!
//! A message on the wire (all integers big-endian):
//!
//! ```text
//! [priority: u8][recipient: u64][payload_len: u16][package: u16][service: u16][data ..]
//!                                                 |<-------- payload_len bytes -------->|
//! ```
//!
//! The fixed headers are zerocopy structs over big-endian integer types, so
//! there is no manual shifting and no unsafe code in this module.

use std::net::Ipv4Addr;

use static_assertions::assert_eq_size;
use zerocopy::byteorder::{BigEndian, U16, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::identity::HouseIdentifier;

// ── HNCP handshake bytes ─────────────────────────────────────────────────────

/// The single protocol version this implementation speaks.
pub const VERSION: u8 = 1;
/// 0001 0000: hub opens the handshake.
pub const INITIATION: u8 = 16;
/// 0011 0000: extension acknowledges the initiation.
pub const ACKNOWLEDGEMENT: u8 = 48;
/// 1010 0000
pub const VERSION_ACCEPTANCE: u8 = 160;
/// 0101 0000
pub const VERSION_REJECTION: u8 = 80;
/// 0110 0000: hub has no identifiers left to hand out.
pub const NO_IDENTIFIERS_AVAILABLE: u8 = 96;
/// 0111 0000
pub const COMPLETE: u8 = 112;
/// 0101 0101: "no idea what you mean", terminate.
pub const UNKNOWN_FALLBACK: u8 = 85;

// ── Network constants ────────────────────────────────────────────────────────

/// TCP port extensions accept connections on.
pub const EXTENSION_PORT: u16 = 40052;
/// TCP port the hub accepts connections on.
pub const HUB_PORT: u16 = 40053;
/// IPv4 multicast group for hub beacons.
pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(225, 0, 0, 37);
/// UDP port for hub beacons.
pub const MULTICAST_PORT: u16 = 4053;
/// Beacon datagram payload.
pub const BEACON_MESSAGE: &[u8] = b"houseHub here";

/// Default per-step handshake receive timeout.
pub const HANDSHAKE_STEP_TIMEOUT_MS: u64 = 5000;

// ── Addressing ───────────────────────────────────────────────────────────────

pub type PackageIdentifier = u16;
pub type ServiceIdentifier = u16;

/// Largest encoded bundle: the payload length prefix is a u16.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

/// Largest bundle data: the payload also carries the package/service header.
pub const MAX_BUNDLE_DATA: usize = MAX_PAYLOAD - BUNDLE_HEADER_LEN;

// ── Headers ──────────────────────────────────────────────────────────────────

/// Fixed prefix of every message frame.
///
/// Wire size: 11 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct MessageHeader {
    pub priority: u8,
    pub recipient: U64<BigEndian>,
    /// Length of the encoded bundle that follows.
    pub payload_len: U16<BigEndian>,
}

assert_eq_size!(MessageHeader, [u8; 11]);

pub const MESSAGE_HEADER_LEN: usize = std::mem::size_of::<MessageHeader>();

/// Fixed prefix of every encoded service bundle.
///
/// Wire size: 4 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct BundleHeader {
    pub package: U16<BigEndian>,
    pub service: U16<BigEndian>,
}

assert_eq_size!(BundleHeader, [u8; 4]);

pub const BUNDLE_HEADER_LEN: usize = std::mem::size_of::<BundleHeader>();

// ── Priority ─────────────────────────────────────────────────────────────────

/// Importance of a message. Higher priorities always leave the outbox first.
///
/// Only use `SafetyCritical` for messages that concern the health and safety
/// of occupants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum Priority {
    #[default]
    Normal = 0,
    SafetyCritical = 1,
}

impl TryFrom<u8> for Priority {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Priority::Normal),
            1 => Ok(Priority::SafetyCritical),
            _ => Err(CodecError::Malformed("unknown priority byte")),
        }
    }
}

impl From<Priority> for u8 {
    fn from(p: Priority) -> u8 {
        p as u8
    }
}

// ── Service bundle ───────────────────────────────────────────────────────────

/// Data addressed to a `(package, service)` pair: the unit of application
/// dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceBundle {
    package: PackageIdentifier,
    service: ServiceIdentifier,
    data: Vec<u8>,
}

impl ServiceBundle {
    /// Build a bundle. Fails when the encoded bundle would not fit the
    /// message's u16 payload length.
    pub fn new(
        package: PackageIdentifier,
        service: ServiceIdentifier,
        data: impl Into<Vec<u8>>,
    ) -> Result<Self, CodecError> {
        let data = data.into();
        if data.len() > MAX_BUNDLE_DATA {
            return Err(CodecError::PayloadTooLarge(data.len()));
        }
        Ok(Self { package, service, data })
    }

    pub fn package(&self) -> PackageIdentifier {
        self.package
    }

    pub fn service(&self) -> ServiceIdentifier {
        self.service
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn encoded_len(&self) -> usize {
        BUNDLE_HEADER_LEN + self.data.len()
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        let header = BundleHeader {
            package: U16::new(self.package),
            service: U16::new(self.service),
        };
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(&self.data);
    }

    /// Decode a bundle occupying exactly `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let header = BundleHeader::read_from_prefix(bytes).ok_or(CodecError::Malformed(
            "bundle shorter than its package/service header",
        ))?;
        Self::new(
            header.package.get(),
            header.service.get(),
            &bytes[BUNDLE_HEADER_LEN..],
        )
    }
}

// ── Message ──────────────────────────────────────────────────────────────────

/// Data to be carried across the House network to one recipient.
///
/// Immutable once built. Equality is structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Message {
    recipient: HouseIdentifier,
    priority: Priority,
    bundle: ServiceBundle,
}

impl Message {
    pub fn new(recipient: HouseIdentifier, priority: Priority, bundle: ServiceBundle) -> Self {
        Self { recipient, priority, bundle }
    }

    pub fn recipient(&self) -> HouseIdentifier {
        self.recipient
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn bundle(&self) -> &ServiceBundle {
        &self.bundle
    }

    pub fn into_bundle(self) -> ServiceBundle {
        self.bundle
    }

    pub fn encoded_len(&self) -> usize {
        MESSAGE_HEADER_LEN + self.bundle.encoded_len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut out);
        out
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        // ServiceBundle::new caps the data, so the cast cannot truncate.
        let header = MessageHeader {
            priority: self.priority.into(),
            recipient: U64::new(self.recipient),
            payload_len: U16::new(self.bundle.encoded_len() as u16),
        };
        out.extend_from_slice(header.as_bytes());
        self.bundle.encode_into(out);
    }

    /// Decode the first message in `buf`.
    ///
    /// Returns the message and the bytes that follow it, or `None` when the
    /// message ended exactly at the end of the buffer. Callers streaming from
    /// a socket keep feeding the remainder back in until this returns an
    /// [`CodecError::Incomplete`], which means "wait for more bytes".
    pub fn decode_prefix(buf: &[u8]) -> Result<(Message, Option<&[u8]>), CodecError> {
        let header = MessageHeader::read_from_prefix(buf).ok_or(CodecError::Incomplete {
            needed: MESSAGE_HEADER_LEN,
            available: buf.len(),
        })?;
        let priority = Priority::try_from(header.priority)?;

        let end = MESSAGE_HEADER_LEN + header.payload_len.get() as usize;
        if buf.len() < end {
            return Err(CodecError::Incomplete {
                needed: end,
                available: buf.len(),
            });
        }

        let bundle = ServiceBundle::decode(&buf[MESSAGE_HEADER_LEN..end])?;
        let message = Message::new(header.recipient.get(), priority, bundle);

        let rest = &buf[end..];
        if rest.is_empty() {
            Ok((message, None))
        } else {
            Ok((message, Some(rest)))
        }
    }

    /// One-shot decode with no continuation. Any failure, including
    /// `Incomplete`, is terminal for this buffer. Trailing bytes are ignored.
    pub fn decode(buf: &[u8]) -> Result<Message, CodecError> {
        Self::decode_prefix(buf).map(|(message, _)| message)
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Message(to: {}, priority: {:?}, bundle: {}-{} [{} bytes])",
            self.recipient,
            self.priority,
            self.bundle.package,
            self.bundle.service,
            self.bundle.data.len()
        )
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

/// Errors that can arise when building or interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Not enough bytes yet. In a stream this means "keep reading".
    #[error("incomplete frame: need {needed} bytes, have {available}")]
    Incomplete { needed: usize, available: usize },

    /// The framing can no longer be trusted; drop what is buffered.
    #[error("malformed frame: {0}")]
    Malformed(&'static str),

    #[error("bundle data length {0} exceeds maximum {}", MAX_BUNDLE_DATA)]
    PayloadTooLarge(usize),
}

impl CodecError {
    /// `Incomplete` is the only failure more bytes can fix; everything else
    /// means the framing itself is broken.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, CodecError::Incomplete { .. })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
