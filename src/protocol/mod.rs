//! Wire protocol for the numeric frame link
//!
//! A session exchanges fixed-shape arrays of numbers. Shapes are agreed once
//! by the handshake and never change afterwards.
//!
//! # Handshake
//!
//! ```text
//! first sender:  [id i32][outputs i32][inputs i32][encoding i32][aux i32 × K]
//! responder:     [id i32][inputs i32][outputs i32][encoding i32][aux i32 × K]
//! ```
//!
//! The special peer ("Mevea") neither sends nor expects the encoding selector
//! or auxiliary arguments; both directions are forced to `Float64`.
//!
//! # Data frame
//!
//! ```text
//! ┌───────────────────────────────┬──────────────┐
//! │ count × width payload bytes   │ XOR (1 byte) │
//! └───────────────────────────────┴──────────────┘
//! ```
//!
//! Width is 1 for `Int8` and 8 for `Float64`. All multi-byte fields use the
//! session byte order (little-endian by default).

pub mod frame;
pub mod handshake;

pub use frame::{FrameCodec, xor_checksum};
pub use handshake::{AuxArgs, Handshake, HandshakeOutcome, LocalEndpoint};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Size of the trailing checksum byte
pub const CHECKSUM_SIZE: usize = 1;

/// Size of one handshake integer
pub const HANDSHAKE_FIELD_SIZE: usize = 4;

/// Default number of auxiliary handshake arguments
pub const DEFAULT_AUX_COUNT: usize = 3;

/// Name returned for identities missing from the registry
pub const UNDEFINED_PEER: &str = "Undefined";

/// Identity of the peer that skips encoding and aux negotiation
pub const SPECIAL_PEER: &str = "Mevea";

/// Numeric encoding of frame elements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Encoding {
    /// Signed 1-byte integer (selector 0)
    #[serde(rename = "int")]
    Int8,
    /// 8-byte IEEE-754 float (selector 1)
    #[default]
    #[serde(rename = "double")]
    Float64,
}

impl Encoding {
    /// Selector value sent during the handshake
    pub fn code(self) -> i32 {
        match self {
            Encoding::Int8 => 0,
            Encoding::Float64 => 1,
        }
    }

    /// Resolve a selector received from the peer. Anything but 0 is a double.
    pub fn from_code(code: i32) -> Self {
        if code == 0 {
            Encoding::Int8
        } else {
            Encoding::Float64
        }
    }

    /// Bytes per element
    pub fn width(self) -> usize {
        match self {
            Encoding::Int8 => 1,
            Encoding::Float64 => 8,
        }
    }
}

/// Byte order for handshake integers, frame elements and log records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

impl ByteOrder {
    pub fn i32_to_bytes(self, value: i32) -> [u8; 4] {
        match self {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        }
    }

    pub fn i32_from_bytes(self, bytes: [u8; 4]) -> i32 {
        match self {
            ByteOrder::Little => i32::from_le_bytes(bytes),
            ByteOrder::Big => i32::from_be_bytes(bytes),
        }
    }

    pub fn f64_to_bytes(self, value: f64) -> [u8; 8] {
        match self {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        }
    }

    pub fn f64_from_bytes(self, bytes: [u8; 8]) -> f64 {
        match self {
            ByteOrder::Little => f64::from_le_bytes(bytes),
            ByteOrder::Big => f64::from_be_bytes(bytes),
        }
    }
}

/// Immutable identity → role name table
///
/// Injected into the handshake rather than kept as process-wide state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRegistry {
    names: BTreeMap<i32, String>,
}

impl PeerRegistry {
    /// Build a registry from explicit entries
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (i32, S)>,
        S: Into<String>,
    {
        Self {
            names: entries.into_iter().map(|(id, n)| (id, n.into())).collect(),
        }
    }

    /// Return a copy with extra entries added or replaced
    pub fn with_entries<I, S>(&self, entries: I) -> Self
    where
        I: IntoIterator<Item = (i32, S)>,
        S: Into<String>,
    {
        let mut names = self.names.clone();
        names.extend(entries.into_iter().map(|(id, n)| (id, n.into())));
        Self { names }
    }

    /// Role name for an identity, or "Undefined"
    pub fn name(&self, id: i32) -> &str {
        self.names.get(&id).map(String::as_str).unwrap_or(UNDEFINED_PEER)
    }

    /// Whether the identity resolves to the special peer
    pub fn is_special(&self, id: i32) -> bool {
        self.name(id) == SPECIAL_PEER
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new([
            (0, "Excavator"),
            (1, SPECIAL_PEER),
            (2, "Motion Platform"),
            (3, "Digicenter"),
        ])
    }
}

/// Negotiated wire format, fixed for the rest of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    /// Encoding of frames we send
    pub outbound: Encoding,
    /// Encoding of frames we receive
    pub inbound: Encoding,
    /// Elements per outbound frame
    pub outputs: usize,
    /// Elements per inbound frame
    pub inputs: usize,
    pub byte_order: ByteOrder,
}

impl FrameLayout {
    /// Outbound frame size including the checksum byte
    pub fn send_size(&self) -> usize {
        self.outbound.width() * self.outputs + CHECKSUM_SIZE
    }

    /// Inbound frame size including the checksum byte
    pub fn recv_size(&self) -> usize {
        self.inbound.width() * self.inputs + CHECKSUM_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let registry = PeerRegistry::default();
        assert_eq!(registry.name(0), "Excavator");
        assert_eq!(registry.name(2), "Motion Platform");
        assert_eq!(registry.name(42), UNDEFINED_PEER);
        assert_eq!(registry.name(-1), UNDEFINED_PEER);
        assert!(registry.is_special(1));
        assert!(!registry.is_special(3));
    }

    #[test]
    fn test_registry_extension_keeps_original() {
        let base = PeerRegistry::default();
        let extended = base.with_entries([(7, "Test Rig"), (3, "Lab")]);
        assert_eq!(extended.name(7), "Test Rig");
        assert_eq!(extended.name(3), "Lab");
        assert_eq!(base.name(3), "Digicenter");
        assert_eq!(base.name(7), UNDEFINED_PEER);
    }

    #[test]
    fn test_encoding_codes() {
        assert_eq!(Encoding::Int8.code(), 0);
        assert_eq!(Encoding::Float64.code(), 1);
        assert_eq!(Encoding::from_code(0), Encoding::Int8);
        assert_eq!(Encoding::from_code(1), Encoding::Float64);
        // Unknown selectors fall back to doubles
        assert_eq!(Encoding::from_code(9), Encoding::Float64);
        assert_eq!(Encoding::Int8.width(), 1);
        assert_eq!(Encoding::Float64.width(), 8);
    }

    #[test]
    fn test_layout_sizes() {
        let layout = FrameLayout {
            outbound: Encoding::Int8,
            inbound: Encoding::Float64,
            outputs: 6,
            inputs: 20,
            byte_order: ByteOrder::Little,
        };
        assert_eq!(layout.send_size(), 7);
        assert_eq!(layout.recv_size(), 161);

        let empty = FrameLayout {
            outputs: 0,
            ..layout
        };
        assert_eq!(empty.send_size(), CHECKSUM_SIZE);
    }

    #[test]
    fn test_byte_order() {
        assert_eq!(ByteOrder::Little.i32_to_bytes(1), [1, 0, 0, 0]);
        assert_eq!(ByteOrder::Big.i32_to_bytes(1), [0, 0, 0, 1]);
        assert_eq!(ByteOrder::Big.i32_from_bytes([0xFF, 0xFF, 0xFF, 0xFE]), -2);
        let bytes = ByteOrder::Big.f64_to_bytes(1.5);
        assert_eq!(ByteOrder::Big.f64_from_bytes(bytes), 1.5);
        assert_ne!(ByteOrder::Little.f64_from_bytes(bytes), 1.5);
    }
}
