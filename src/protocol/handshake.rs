//! One-shot handshake negotiating identity, counts and encodings
//!
//! # Server sequence
//!
//! ```text
//! 1. read  [id][peer outputs][peer inputs]
//! 2. check peer inputs == local outputs && peer outputs == local inputs
//! 3a. special peer: reply [id][local inputs][local outputs]
//! 3b. otherwise:    read [encoding][aux × K],
//!                   reply [id][local inputs][local outputs][encoding][aux × K]
//! ```
//!
//! # Client sequence
//!
//! ```text
//! 1. send  [id][local outputs][local inputs][encoding][aux × K]
//! 2. read  [id][peer inputs][peer outputs]
//! 3. check counts (same rule as the server)
//! 4. unless special peer: read [encoding][aux × K]
//! ```
//!
//! There are no retries. A count mismatch aborts session bring-up.

use super::{ByteOrder, Encoding, FrameLayout, HANDSHAKE_FIELD_SIZE, PeerRegistry};
use crate::error::{Error, Result};
use std::io::{Read, Write};

/// Local identity and direction counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalEndpoint {
    /// Identity number announced to the peer
    pub id: i32,
    /// Elements we expect per inbound frame
    pub inputs: usize,
    /// Elements we send per outbound frame
    pub outputs: usize,
}

/// Fixed-length auxiliary integers carried by the handshake
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuxArgs(Vec<i32>);

impl AuxArgs {
    /// Build from caller-supplied named values, truncated or zero-padded to `count`
    ///
    /// Names only label the values for the caller; the wire carries values in
    /// the order they were supplied.
    pub fn from_named<I, S>(args: I, count: usize) -> Self
    where
        I: IntoIterator<Item = (S, i32)>,
        S: AsRef<str>,
    {
        let mut values: Vec<i32> = args
            .into_iter()
            .take(count)
            .map(|(name, value)| {
                log::debug!("Handshake aux arg {} = {}", name.as_ref(), value);
                value
            })
            .collect();
        values.resize(count, 0);
        Self(values)
    }

    /// All-zero arguments
    pub fn zeros(count: usize) -> Self {
        Self(vec![0; count])
    }

    pub fn values(&self) -> &[i32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Result of a successful handshake
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeOutcome {
    pub peer_id: i32,
    /// Registry name of the peer ("Undefined" when unknown)
    pub peer_name: String,
    /// Elements per frame the peer sends
    pub peer_outputs: usize,
    /// Elements per frame the peer expects
    pub peer_inputs: usize,
    /// Auxiliary arguments received; `None` when the peer skipped negotiation
    pub peer_aux: Option<Vec<i32>>,
    /// Negotiated wire format
    pub layout: FrameLayout,
}

/// Handshake parameters for one session
#[derive(Debug, Clone)]
pub struct Handshake {
    registry: PeerRegistry,
    local: LocalEndpoint,
    encoding: Encoding,
    aux: AuxArgs,
    byte_order: ByteOrder,
}

impl Handshake {
    pub fn new(
        registry: PeerRegistry,
        local: LocalEndpoint,
        encoding: Encoding,
        aux: AuxArgs,
        byte_order: ByteOrder,
    ) -> Self {
        Self {
            registry,
            local,
            encoding,
            aux,
            byte_order,
        }
    }

    pub fn local(&self) -> &LocalEndpoint {
        &self.local
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// Run the server side: receive first, then respond
    pub fn as_server<S: Read + Write>(&self, stream: &mut S) -> Result<HandshakeOutcome> {
        let (local_outputs, local_inputs) = self.local_counts()?;

        let header = self.read_ints(stream, 3)?;
        let (peer_id, peer_outputs, peer_inputs) = (header[0], header[1], header[2]);
        let peer_name = self.registry.name(peer_id).to_string();
        log::debug!(
            "Handshake header from {} (id {}): outputs={}, inputs={}",
            peer_name,
            peer_id,
            peer_outputs,
            peer_inputs
        );

        self.check_counts(&peer_name, peer_outputs, peer_inputs)?;

        let (inbound, outbound, peer_aux, reply) = if self.registry.is_special(peer_id) {
            let reply = vec![self.local.id, local_inputs, local_outputs];
            (Encoding::Float64, Encoding::Float64, None, reply)
        } else {
            let code = self.read_ints(stream, 1)?[0];
            let peer_aux = self.read_ints(stream, self.aux.len())?;
            let mut reply = vec![
                self.local.id,
                local_inputs,
                local_outputs,
                self.encoding.code(),
            ];
            reply.extend_from_slice(self.aux.values());
            (Encoding::from_code(code), self.encoding, Some(peer_aux), reply)
        };

        self.write_ints(stream, &reply)?;

        Ok(self.outcome(
            peer_id,
            peer_name,
            peer_outputs,
            peer_inputs,
            peer_aux,
            inbound,
            outbound,
        ))
    }

    /// Run the client side: announce first, then receive
    pub fn as_client<S: Read + Write>(&self, stream: &mut S) -> Result<HandshakeOutcome> {
        let (local_outputs, local_inputs) = self.local_counts()?;

        let mut announce = vec![
            self.local.id,
            local_outputs,
            local_inputs,
            self.encoding.code(),
        ];
        announce.extend_from_slice(self.aux.values());
        self.write_ints(stream, &announce)?;

        let header = self.read_ints(stream, 3)?;
        let (peer_id, peer_inputs, peer_outputs) = (header[0], header[1], header[2]);
        let peer_name = self.registry.name(peer_id).to_string();
        log::debug!(
            "Handshake reply from {} (id {}): inputs={}, outputs={}",
            peer_name,
            peer_id,
            peer_inputs,
            peer_outputs
        );

        self.check_counts(&peer_name, peer_outputs, peer_inputs)?;

        let (inbound, outbound, peer_aux) = if self.registry.is_special(peer_id) {
            (Encoding::Float64, Encoding::Float64, None)
        } else {
            let code = self.read_ints(stream, 1)?[0];
            let peer_aux = self.read_ints(stream, self.aux.len())?;
            (Encoding::from_code(code), self.encoding, Some(peer_aux))
        };

        Ok(self.outcome(
            peer_id,
            peer_name,
            peer_outputs,
            peer_inputs,
            peer_aux,
            inbound,
            outbound,
        ))
    }

    /// Peer inputs must mirror our outputs and vice versa
    fn check_counts(&self, peer_name: &str, peer_outputs: i32, peer_inputs: i32) -> Result<()> {
        let (local_outputs, local_inputs) = self.local_counts()?;
        if peer_inputs != local_outputs || peer_outputs != local_inputs {
            log::error!("Mismatch in expected inputs/outputs with {}", peer_name);
            return Err(Error::CountMismatch {
                peer: peer_name.to_string(),
                peer_outputs,
                peer_inputs,
                local_outputs,
                local_inputs,
            });
        }
        Ok(())
    }

    /// Local (outputs, inputs) as wire integers
    fn local_counts(&self) -> Result<(i32, i32)> {
        let to_wire = |count: usize| {
            i32::try_from(count)
                .map_err(|_| Error::InvalidConfig(format!("count {} exceeds i32", count)))
        };
        Ok((to_wire(self.local.outputs)?, to_wire(self.local.inputs)?))
    }

    #[allow(clippy::too_many_arguments)]
    fn outcome(
        &self,
        peer_id: i32,
        peer_name: String,
        peer_outputs: i32,
        peer_inputs: i32,
        peer_aux: Option<Vec<i32>>,
        inbound: Encoding,
        outbound: Encoding,
    ) -> HandshakeOutcome {
        // Counts were checked against ours, so they are non-negative
        HandshakeOutcome {
            peer_id,
            peer_name,
            peer_outputs: peer_outputs as usize,
            peer_inputs: peer_inputs as usize,
            peer_aux,
            layout: FrameLayout {
                outbound,
                inbound,
                outputs: self.local.outputs,
                inputs: self.local.inputs,
                byte_order: self.byte_order,
            },
        }
    }

    fn read_ints<R: Read>(&self, reader: &mut R, count: usize) -> Result<Vec<i32>> {
        let mut buf = vec![0u8; count * HANDSHAKE_FIELD_SIZE];
        reader.read_exact(&mut buf)?;
        Ok(buf
            .chunks_exact(HANDSHAKE_FIELD_SIZE)
            .map(|c| self.byte_order.i32_from_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    fn write_ints<W: Write>(&self, writer: &mut W, values: &[i32]) -> Result<()> {
        let mut buf = Vec::with_capacity(values.len() * HANDSHAKE_FIELD_SIZE);
        for &value in values {
            buf.extend_from_slice(&self.byte_order.i32_to_bytes(value));
        }
        writer.write_all(&buf)?;
        writer.flush()?;
        Ok(())
    }
}
