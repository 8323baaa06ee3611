//! Data frame encoding with XOR checksum trailer
//!
//! Frame format: [PAYLOAD: count × width bytes] [CHECKSUM: 1 byte]
//!
//! Checksum: XOR of every payload byte. Frames that fail the checksum or
//! arrive with the wrong length are dropped whole, never partially decoded.

use super::{CHECKSUM_SIZE, Encoding, FrameLayout};
use crate::error::{Error, Result};

/// XOR of all bytes
pub fn xor_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc ^ b)
}

/// Encoder/decoder bound to a negotiated layout
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    layout: FrameLayout,
}

impl FrameCodec {
    pub fn new(layout: FrameLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &FrameLayout {
        &self.layout
    }

    /// Pack outbound values and append the checksum byte
    ///
    /// Returns the exact bytes to transmit. `Int8` sessions only accept
    /// integral values in `[-128, 127]`.
    pub fn encode(&self, values: &[f64]) -> Result<Vec<u8>> {
        if values.len() != self.layout.outputs {
            return Err(Error::FrameSize {
                expected: self.layout.outputs,
                actual: values.len(),
            });
        }

        let mut frame = Vec::with_capacity(self.layout.send_size());
        match self.layout.outbound {
            Encoding::Int8 => {
                for (index, &value) in values.iter().enumerate() {
                    if value.fract() != 0.0
                        || value < i8::MIN as f64
                        || value > i8::MAX as f64
                        || !value.is_finite()
                    {
                        return Err(Error::ValueOutOfRange { index, value });
                    }
                    frame.push(value as i8 as u8);
                }
            }
            Encoding::Float64 => {
                for &value in values {
                    frame.extend_from_slice(&self.layout.byte_order.f64_to_bytes(value));
                }
            }
        }

        frame.push(xor_checksum(&frame));
        Ok(frame)
    }

    /// Verify and unpack an inbound frame
    pub fn try_decode(&self, frame: &[u8]) -> Result<Vec<f64>> {
        let expected = self.layout.recv_size();
        if frame.len() != expected {
            return Err(Error::FrameSize {
                expected,
                actual: frame.len(),
            });
        }

        let (payload, trailer) = frame.split_at(frame.len() - CHECKSUM_SIZE);
        let computed = xor_checksum(payload);
        if computed != trailer[0] {
            return Err(Error::Checksum {
                expected: computed,
                actual: trailer[0],
            });
        }

        let values = match self.layout.inbound {
            Encoding::Int8 => payload.iter().map(|&b| b as i8 as f64).collect(),
            Encoding::Float64 => payload
                .chunks_exact(8)
                .map(|chunk| {
                    let mut bytes = [0u8; 8];
                    bytes.copy_from_slice(chunk);
                    self.layout.byte_order.f64_from_bytes(bytes)
                })
                .collect(),
        };
        Ok(values)
    }

    /// Decode, returning `None` for any corrupt or mis-sized frame
    pub fn decode(&self, frame: &[u8]) -> Option<Vec<f64>> {
        match self.try_decode(frame) {
            Ok(values) => Some(values),
            Err(e) => {
                log::debug!("Dropping inbound frame: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ByteOrder;

    /// Layout where the codec talks to itself (outbound shape == inbound shape)
    fn loopback(encoding: Encoding, count: usize, byte_order: ByteOrder) -> FrameCodec {
        FrameCodec::new(FrameLayout {
            outbound: encoding,
            inbound: encoding,
            outputs: count,
            inputs: count,
            byte_order,
        })
    }

    #[test]
    fn test_xor_checksum() {
        assert_eq!(xor_checksum(&[]), 0x00);
        assert_eq!(xor_checksum(&[0xAB]), 0xAB);
        assert_eq!(xor_checksum(&[0x0F, 0xF0]), 0xFF);
        assert_eq!(xor_checksum(&[0x55, 0x55]), 0x00);
    }

    #[test]
    fn test_int_frame_layout() {
        let codec = loopback(Encoding::Int8, 3, ByteOrder::Little);
        let frame = codec.encode(&[1.0, -1.0, 127.0]).unwrap();

        // payload: 0x01, 0xFF, 0x7F; checksum: 0x01 ^ 0xFF ^ 0x7F = 0x81
        assert_eq!(frame, vec![0x01, 0xFF, 0x7F, 0x81]);
    }

    #[test]
    fn test_double_frame_layout() {
        let codec = loopback(Encoding::Float64, 2, ByteOrder::Little);
        let frame = codec.encode(&[1.0, 0.0]).unwrap();

        assert_eq!(frame.len(), 17);
        assert_eq!(&frame[..8], &1.0f64.to_le_bytes());
        assert_eq!(&frame[8..16], &[0u8; 8]);
        assert_eq!(frame[16], xor_checksum(&1.0f64.to_le_bytes()));
    }

    #[test]
    fn test_round_trip() {
        let values = [0.0, -3.25, 1e-9, 42.5, f64::MAX, -0.0];
        for order in [ByteOrder::Little, ByteOrder::Big] {
            let codec = loopback(Encoding::Float64, values.len(), order);
            let frame = codec.encode(&values).unwrap();
            assert_eq!(codec.decode(&frame).unwrap(), values.to_vec());
        }

        let ints = [-128.0, -1.0, 0.0, 1.0, 127.0];
        let codec = loopback(Encoding::Int8, ints.len(), ByteOrder::Little);
        let frame = codec.encode(&ints).unwrap();
        assert_eq!(codec.decode(&frame).unwrap(), ints.to_vec());
    }

    #[test]
    fn test_single_bit_flip_is_rejected() {
        let codec = loopback(Encoding::Float64, 3, ByteOrder::Little);
        let frame = codec.encode(&[1.5, -2.0, 1000.125]).unwrap();

        for byte in 0..frame.len() {
            for bit in 0..8 {
                let mut corrupted = frame.clone();
                corrupted[byte] ^= 1 << bit;
                assert!(
                    codec.decode(&corrupted).is_none(),
                    "flip at byte {} bit {} was accepted",
                    byte,
                    bit
                );
            }
        }
    }

    #[test]
    fn test_checksum_error_reports_both_values() {
        let codec = loopback(Encoding::Int8, 2, ByteOrder::Little);
        let mut frame = codec.encode(&[3.0, 4.0]).unwrap();
        frame[2] = 0xEE;

        match codec.try_decode(&frame) {
            Err(Error::Checksum { expected, actual }) => {
                assert_eq!(expected, 0x07);
                assert_eq!(actual, 0xEE);
            }
            other => panic!("expected checksum error, got {:?}", other),
        }
    }

    #[test]
    fn test_wrong_length_is_rejected() {
        let codec = loopback(Encoding::Int8, 4, ByteOrder::Little);
        let frame = codec.encode(&[1.0, 2.0, 3.0, 4.0]).unwrap();

        // Truncated frame with a checksum that happens to be valid for its payload
        let mut short = frame[..3].to_vec();
        short.push(xor_checksum(&short));
        assert!(matches!(
            codec.try_decode(&short),
            Err(Error::FrameSize {
                expected: 5,
                actual: 4
            })
        ));

        let mut long = frame.clone();
        long.push(0x00);
        assert!(codec.decode(&long).is_none());
        assert!(codec.decode(&[]).is_none());
    }

    #[test]
    fn test_encode_rejects_wrong_count() {
        let codec = loopback(Encoding::Float64, 3, ByteOrder::Little);
        assert!(matches!(
            codec.encode(&[1.0, 2.0]),
            Err(Error::FrameSize {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_int_encoding_rejects_unrepresentable_values() {
        let codec = loopback(Encoding::Int8, 1, ByteOrder::Little);
        assert!(matches!(
            codec.encode(&[128.0]),
            Err(Error::ValueOutOfRange { index: 0, .. })
        ));
        assert!(codec.encode(&[-129.0]).is_err());
        assert!(codec.encode(&[0.5]).is_err());
        assert!(codec.encode(&[f64::NAN]).is_err());
    }

    #[test]
    fn test_asymmetric_layout() {
        // We send 2 ints, peer sends us 1 double
        let codec = FrameCodec::new(FrameLayout {
            outbound: Encoding::Int8,
            inbound: Encoding::Float64,
            outputs: 2,
            inputs: 1,
            byte_order: ByteOrder::Little,
        });
        assert_eq!(codec.encode(&[5.0, 6.0]).unwrap().len(), 3);

        let mut inbound = 9.75f64.to_le_bytes().to_vec();
        inbound.push(xor_checksum(&inbound));
        assert_eq!(codec.decode(&inbound), Some(vec![9.75]));
    }

    #[test]
    fn test_empty_payload_frame() {
        let codec = loopback(Encoding::Float64, 0, ByteOrder::Little);
        let frame = codec.encode(&[]).unwrap();
        assert_eq!(frame, vec![0x00]);
        assert_eq!(codec.decode(&frame), Some(vec![]));
    }
}
