//! SetuIO - handshaked numeric frame link
//!
//! Exchanges fixed-shape arrays of numbers with one remote peer over TCP
//! (optionally UDP after the handshake), keeps the freshest inbound array
//! for polling, and records every inbound array to a binary log in the
//! background.

pub mod cache;
pub mod config;
pub mod error;
pub mod protocol;
pub mod receiver;
pub mod recorder;
pub mod session;
pub mod stats;
pub mod transport;

// Re-export commonly used types
pub use cache::LatestValue;
pub use config::Config;
pub use error::{Error, Result};
pub use protocol::{ByteOrder, Encoding, FrameCodec, FrameLayout, PeerRegistry};
pub use receiver::RetryPolicy;
pub use session::{RecorderOptions, Session, SessionOptions};
pub use stats::{LinkStats, StatsSnapshot};
pub use transport::{Connection, Role, TransportKind};
