//! Error types for SetuIO

use std::path::PathBuf;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// SetuIO error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    /// Configuration value rejected by validation
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Socket setup failed (socket already open, unknown role)
    #[error("Setup error: {0}")]
    Setup(String),

    /// Peer declared counts that do not mirror ours
    #[error(
        "Handshake count mismatch with {peer}: peer outputs {peer_outputs} / inputs {peer_inputs}, \
         local outputs {local_outputs} / inputs {local_inputs}"
    )]
    CountMismatch {
        /// Resolved peer name
        peer: String,
        /// Outputs declared by the peer
        peer_outputs: i32,
        /// Inputs declared by the peer
        peer_inputs: i32,
        /// Local outputs
        local_outputs: i32,
        /// Local inputs
        local_inputs: i32,
    },

    /// Data-path operation attempted before the handshake finished
    #[error("Handshake not completed")]
    HandshakeIncomplete,

    /// Frame checksum mismatch
    #[error("Checksum error: expected {expected:#04x}, got {actual:#04x}")]
    Checksum {
        /// Checksum computed over the payload
        expected: u8,
        /// Checksum byte carried by the frame
        actual: u8,
    },

    /// Frame length differs from the negotiated size
    #[error("Frame size error: expected {expected} bytes, got {actual}")]
    FrameSize {
        /// Negotiated frame size
        expected: usize,
        /// Received or supplied size
        actual: usize,
    },

    /// Value cannot be represented in the negotiated encoding
    #[error("Value {value} at index {index} does not fit the outbound encoding")]
    ValueOutOfRange {
        /// Position in the outbound array
        index: usize,
        /// Offending value
        value: f64,
    },

    /// Invalid protocol state transition
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Binary log write failure
    #[error("Log write error ({path}): {source}")]
    LogWrite {
        /// Log file path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Worker thread panicked
    #[error("Thread panic")]
    ThreadPanic,

    /// Worker thread did not stop within the join timeout
    #[error("Timed out joining {0} thread")]
    JoinTimeout(&'static str),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}
