//! Frame codec.
//!
//! Wire layout, both directions:
//!
//! ```text
//! [marker, length, code, payload..., checksum]
//! ```
//!
//! `marker` is `0xEA` for host frames and `0xED` for device frames,
//! `length` is `payload.len() + 2`, `code` is the opcode (host) or status
//! (device), and `checksum` makes the XOR of the whole frame zero.

use thiserror::Error;

use super::constants::{
    DEVICE_FRAME_MARKER, FRAME_CODE_OFFSET, FRAME_OVERHEAD, HOST_FRAME_MARKER, MAX_PAYLOAD_LEN,
    STATUS_ERROR,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Payload too long: {len} bytes, maximum {max}")]
    PayloadTooLong { len: usize, max: usize },

    #[error("Malformed frame: expected marker 0x{expected:02X}, got {}", to_hex(.raw))]
    Malformed { expected: u8, raw: Vec<u8> },

    #[error("Invalid frame length byte {length}")]
    InvalidLength { length: u8 },

    #[error("Truncated frame: need {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },

    #[error("Checksum mismatch: {}", to_hex(.frame))]
    ChecksumMismatch { frame: Vec<u8> },

    #[error("Device reported an error: {}", to_hex(.frame))]
    DeviceError { frame: Vec<u8> },
}

/// A frame that passed marker, length and checksum validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
}

impl Frame {
    pub fn marker(&self) -> u8 {
        self.bytes[0]
    }

    pub fn length(&self) -> u8 {
        self.bytes[1]
    }

    /// Opcode of a host frame, status of a device frame.
    pub fn code(&self) -> u8 {
        self.bytes[FRAME_CODE_OFFSET]
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[FRAME_CODE_OFFSET + 1..self.bytes.len() - 1]
    }

    pub fn checksum(&self) -> u8 {
        self.bytes[self.bytes.len() - 1]
    }

    /// Byte at an absolute frame offset.
    pub fn byte(&self, offset: usize) -> Option<u8> {
        self.bytes.get(offset).copied()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// XOR of all bytes.
pub fn xor_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

/// Colon separated hex dump, e.g. `ea:02:b0:58`.
pub fn to_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Assemble a frame. The caller guarantees `payload.len() <= MAX_PAYLOAD_LEN`.
pub(crate) fn build_frame(marker: u8, code: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_OVERHEAD + payload.len());
    frame.push(marker);
    frame.push((payload.len() + 2) as u8);
    frame.push(code);
    frame.extend_from_slice(payload);
    frame.push(xor_checksum(&frame));
    frame
}

/// Encode a host -> device command frame.
pub fn encode(opcode: u8, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(FrameError::PayloadTooLong {
            len: payload.len(),
            max: MAX_PAYLOAD_LEN,
        });
    }
    Ok(build_frame(HOST_FRAME_MARKER, opcode, payload))
}

/// Encode a device -> host response frame.
pub fn encode_response(status: u8, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(FrameError::PayloadTooLong {
            len: payload.len(),
            max: MAX_PAYLOAD_LEN,
        });
    }
    Ok(build_frame(DEVICE_FRAME_MARKER, status, payload))
}

/// Decode a device response read from a feature report.
///
/// Bytes past the declared length (report padding) are ignored.
pub fn decode(raw: &[u8]) -> Result<Frame, FrameError> {
    let frame = parse(raw, DEVICE_FRAME_MARKER)?;
    if frame.code() == STATUS_ERROR {
        return Err(FrameError::DeviceError { frame: frame.bytes });
    }
    Ok(frame)
}

/// Parse a host command frame, the counterpart of [`encode`].
pub fn parse_command(raw: &[u8]) -> Result<Frame, FrameError> {
    parse(raw, HOST_FRAME_MARKER)
}

fn parse(raw: &[u8], marker: u8) -> Result<Frame, FrameError> {
    if raw.first() != Some(&marker) {
        return Err(FrameError::Malformed {
            expected: marker,
            raw: raw.to_vec(),
        });
    }

    let length = *raw.get(1).ok_or(FrameError::Truncated {
        needed: FRAME_OVERHEAD,
        available: raw.len(),
    })?;

    // The checksum covers whatever the length byte claims, clamped to the
    // bytes actually read, so a corrupted length shows up as a bad XOR.
    let total = length as usize + 2;
    let end = total.min(raw.len());
    let bytes = raw[..end].to_vec();
    if xor_checksum(&bytes) != 0 {
        return Err(FrameError::ChecksumMismatch { frame: bytes });
    }

    if length < 2 {
        return Err(FrameError::InvalidLength { length });
    }
    if end < total {
        return Err(FrameError::Truncated {
            needed: total,
            available: raw.len(),
        });
    }

    Ok(Frame { bytes })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_version_query() {
        let frame = encode(0xB0, &[]).unwrap();
        assert_eq!(frame, vec![0xEA, 0x02, 0xB0, 0x58]);
    }

    #[test]
    fn test_encode_with_payload() {
        let frame = encode(0xA1, &[0x01, 0x00, 0xAA, 0xBB]).unwrap();
        assert_eq!(frame[0], HOST_FRAME_MARKER);
        assert_eq!(frame[1], 6);
        assert_eq!(frame[2], 0xA1);
        assert_eq!(&frame[3..7], &[0x01, 0x00, 0xAA, 0xBB]);
        assert_eq!(frame.len(), 8);
        assert_eq!(xor_checksum(&frame), 0);
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        assert!(encode(0xA1, &[0u8; MAX_PAYLOAD_LEN]).is_ok());
        assert_eq!(
            encode(0xA1, &[0u8; MAX_PAYLOAD_LEN + 1]),
            Err(FrameError::PayloadTooLong {
                len: MAX_PAYLOAD_LEN + 1,
                max: MAX_PAYLOAD_LEN
            })
        );
    }

    #[test]
    fn test_command_roundtrip_all_lengths() {
        for len in [0usize, 1, 2, 8, 10, 62, 63, 64, 127, 200, MAX_PAYLOAD_LEN] {
            for opcode in [0x00u8, 0x0A, 0x4E, 0xA5, 0xB0, 0xFF] {
                let payload: Vec<u8> = (0..len).map(|i| (i as u8).wrapping_mul(31) ^ opcode).collect();
                let raw = encode(opcode, &payload).unwrap();
                assert_eq!(xor_checksum(&raw), 0);

                let frame = parse_command(&raw).unwrap();
                assert_eq!(frame.code(), opcode);
                assert_eq!(frame.payload(), payload.as_slice());
                assert_eq!(frame.length() as usize, len + 2);
            }
        }
    }

    #[test]
    fn test_decode_version_response() {
        let mut raw = vec![0xED, 0x06, 0x01, 0x00, 0x00, 0x2A, 0x00];
        raw.push(xor_checksum(&raw));
        // Report padding after the frame is ignored.
        raw.extend_from_slice(&[0u8; 56]);

        let frame = decode(&raw).unwrap();
        assert_eq!(frame.len(), 8);
        assert_eq!(frame.code(), 0x01);
        assert_eq!(frame.payload(), &[0x00, 0x00, 0x2A, 0x00]);
        assert_eq!(frame.byte(4), Some(frame.payload()[1]));
        assert_eq!(frame.byte(5), Some(0x2A));
    }

    #[test]
    fn test_decode_rejects_host_marker() {
        let raw = encode(0xB0, &[]).unwrap();
        assert!(matches!(
            decode(&raw),
            Err(FrameError::Malformed {
                expected: DEVICE_FRAME_MARKER,
                ..
            })
        ));
        assert!(matches!(decode(&[]), Err(FrameError::Malformed { .. })));
    }

    #[test]
    fn test_decode_status_zero_is_device_error() {
        let raw = encode_response(STATUS_ERROR, &[0x01]).unwrap();
        assert!(matches!(decode(&raw), Err(FrameError::DeviceError { .. })));
    }

    #[test]
    fn test_decode_truncated() {
        // Cut short inside the frame: the partial XOR is already wrong.
        let raw = encode_response(0x01, &[1, 2, 3, 4]).unwrap();
        assert!(matches!(
            decode(&raw[..5]),
            Err(FrameError::ChecksumMismatch { .. })
        ));

        // Partial bytes that happen to XOR to zero.
        assert_eq!(
            decode(&[DEVICE_FRAME_MARKER, 0x06, 0x01, 0xEA]),
            Err(FrameError::Truncated {
                needed: 8,
                available: 4
            })
        );
        assert_eq!(
            decode(&[DEVICE_FRAME_MARKER]),
            Err(FrameError::Truncated {
                needed: FRAME_OVERHEAD,
                available: 1
            })
        );
        assert_eq!(
            decode(&[DEVICE_FRAME_MARKER, 0x01, 0xEC]),
            Err(FrameError::InvalidLength { length: 1 })
        );
        assert!(matches!(
            decode(&[DEVICE_FRAME_MARKER, 0x01, 0x01]),
            Err(FrameError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_single_byte_corruption_is_detected() {
        let mut raw = encode_response(0x01, &[0x00, 0x17, 0x2A, 0x99, 0x00]).unwrap();
        // As read back from a 64-byte feature report.
        raw.resize(64, 0);
        let frame_len = raw[1] as usize + 2;

        // Length, status, payload and checksum bytes: any change breaks the
        // XOR.
        for offset in 1..frame_len {
            for mask in 1..=255u8 {
                let mut corrupt = raw.clone();
                corrupt[offset] ^= mask;
                assert!(
                    matches!(decode(&corrupt), Err(FrameError::ChecksumMismatch { .. })),
                    "offset {} mask {:02x}",
                    offset,
                    mask
                );
            }
        }

        // Marker byte.
        for mask in 1..=255u8 {
            let mut corrupt = raw.clone();
            corrupt[0] ^= mask;
            assert!(matches!(decode(&corrupt), Err(FrameError::Malformed { .. })));
        }
    }

    #[test]
    fn test_corrupt_length_on_short_response() {
        let mut raw = encode_response(0x01, &[0x00, 0x2A]).unwrap();
        raw.resize(64, 0);
        for length in [0x00u8, 0x01, 0x02, 0x03, 0x40, 0x41, 0xFF] {
            let mut corrupt = raw.clone();
            corrupt[1] = length;
            assert!(
                matches!(decode(&corrupt), Err(FrameError::ChecksumMismatch { .. })),
                "length {:02x}",
                length
            );
        }
    }

    #[test]
    fn test_checksum_checked_before_status() {
        let mut raw = encode_response(0x01, &[0x05]).unwrap();
        raw[2] = STATUS_ERROR;
        assert!(matches!(
            decode(&raw),
            Err(FrameError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_to_hex() {
        assert_eq!(to_hex(&[0xEA, 0x02, 0xB0, 0x58]), "ea:02:b0:58");
        assert_eq!(to_hex(&[]), "");
    }
}
