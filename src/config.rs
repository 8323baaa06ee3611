//! Configuration for SetuIO
//!
//! Loads link, handshake and recorder parameters from a TOML file. Every
//! section is optional; missing values take the defaults below.

use crate::error::{Error, Result};
use crate::protocol::handshake::{AuxArgs, LocalEndpoint};
use crate::protocol::{ByteOrder, DEFAULT_AUX_COUNT, Encoding, PeerRegistry};
use crate::receiver::RetryPolicy;
use crate::recorder::DEFAULT_THRESHOLD;
use crate::transport::{DEFAULT_UDP_RECV_BUFFER, Role};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub link: LinkConfig,
    pub handshake: HandshakeConfig,
    pub recorder: RecorderConfig,
    pub receiver: ReceiverConfig,
    pub shutdown: ShutdownConfig,
    pub logging: LoggingConfig,
    pub registry: RegistryConfig,
}

/// Socket and endpoint parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Address to bind (server) or connect to (client)
    pub address: String,
    pub port: u16,
    /// "server" or "client"
    pub role: String,
    /// Switch to UDP once the handshake completes
    pub udp: bool,
    /// Identity number announced in the handshake
    pub identity: i32,
    /// Values expected per inbound frame
    pub inputs: usize,
    /// Values sent per outbound frame
    pub outputs: usize,
    pub byte_order: ByteOrder,
    /// Receive timeout used to poll the stop flag
    pub read_timeout_ms: u64,
    /// UDP receive buffer size in bytes after the switch; 0 keeps the OS default
    pub udp_recv_buffer: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 5005,
            role: "server".to_string(),
            udp: false,
            identity: 0,
            inputs: 20,
            outputs: 0,
            byte_order: ByteOrder::Little,
            read_timeout_ms: 500,
            udp_recv_buffer: DEFAULT_UDP_RECV_BUFFER,
        }
    }
}

/// One named auxiliary handshake argument
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AuxArg {
    pub name: String,
    pub value: i32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HandshakeConfig {
    /// Outbound element encoding ("int" or "double")
    pub encoding: Encoding,
    /// Number of auxiliary integers exchanged
    pub aux_count: usize,
    /// Sent in order; truncated or zero-padded to `aux_count`
    pub aux_args: Vec<AuxArg>,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            encoding: Encoding::Float64,
            aux_count: DEFAULT_AUX_COUNT,
            aux_args: Vec::new(),
        }
    }
}

/// Binary log of inbound frames
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub enabled: bool,
    pub dir: PathBuf,
    /// File name before the `_YYYY-MM-DD` date suffix
    pub base_filename: String,
    pub extension: String,
    /// Records per saver wake-up
    pub threshold: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("log"),
            base_filename: "data_recording".to_string(),
            extension: ".bin".to_string(),
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

/// Receiver backoff after transport errors
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReceiverConfig {
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            retry_initial_ms: 10,
            retry_max_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long to wait for each worker thread to exit
    pub join_timeout_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            join_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Extra identity names, added to or replacing the built-in table
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub peers: Vec<PeerName>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PeerName {
    pub id: i32,
    pub name: String,
}

impl Config {
    /// Load and validate a TOML configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Self::from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML configuration file without validating it
    ///
    /// Lets the caller set up logging from the file before [`validate`](Self::validate)
    /// reports anything.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Reject values that would make the session unusable
    pub fn validate(&self) -> Result<()> {
        self.role()?;
        if self.link.address.is_empty() {
            return Err(Error::InvalidConfig("link.address is empty".to_string()));
        }
        if self.link.read_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "link.read_timeout_ms must be positive".to_string(),
            ));
        }
        for (name, count) in [("inputs", self.link.inputs), ("outputs", self.link.outputs)] {
            if i32::try_from(count).is_err() {
                return Err(Error::InvalidConfig(format!(
                    "link.{} = {} does not fit the handshake",
                    name, count
                )));
            }
        }
        if self.recorder.threshold == 0 {
            return Err(Error::InvalidConfig(
                "recorder.threshold must be at least 1".to_string(),
            ));
        }
        if self.receiver.retry_initial_ms > self.receiver.retry_max_ms {
            return Err(Error::InvalidConfig(
                "receiver.retry_initial_ms exceeds retry_max_ms".to_string(),
            ));
        }
        if self.handshake.aux_args.len() > self.handshake.aux_count {
            log::warn!(
                "{} aux args configured, only the first {} are sent",
                self.handshake.aux_args.len(),
                self.handshake.aux_count
            );
        }
        Ok(())
    }

    pub fn role(&self) -> Result<Role> {
        self.link.role.parse()
    }

    pub fn local_endpoint(&self) -> LocalEndpoint {
        LocalEndpoint {
            id: self.link.identity,
            inputs: self.link.inputs,
            outputs: self.link.outputs,
        }
    }

    pub fn aux_args(&self) -> AuxArgs {
        AuxArgs::from_named(
            self.handshake
                .aux_args
                .iter()
                .map(|arg| (arg.name.as_str(), arg.value)),
            self.handshake.aux_count,
        )
    }

    /// Built-in identity table plus `[registry]` overrides
    pub fn registry(&self) -> PeerRegistry {
        PeerRegistry::default().with_entries(
            self.registry
                .peers
                .iter()
                .map(|peer| (peer.id, peer.name.clone())),
        )
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.link.read_timeout_ms)
    }

    pub fn udp_recv_buffer(&self) -> Option<usize> {
        (self.link.udp_recv_buffer > 0).then_some(self.link.udp_recv_buffer)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.receiver.retry_initial_ms),
            Duration::from_millis(self.receiver.retry_max_ms),
        )
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown.join_timeout_ms)
    }
}
