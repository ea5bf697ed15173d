/*!
Command frame encoding.

Every command sent to the device travels inside the same envelope:

```text
01 LL LL CMD <args...> CS CS 02
```

`LL LL` is the little-endian length `len(args) + 3` and `CS CS` the
little-endian 16-bit sum of every byte before it except the leading `0x01`.
*/

use crate::error::{CodecError, Result};
use crate::protocol::{FRAME_END, FRAME_OVERHEAD, FRAME_START};

/// An opcode with its argument bytes, built per call and never stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    pub opcode: u8,
    pub args: Vec<u8>,
}

impl CommandFrame {
    /// Create a new command frame
    pub fn new(opcode: u8, args: impl Into<Vec<u8>>) -> Self {
        Self {
            opcode,
            args: args.into(),
        }
    }

    /// Encode this frame for the wire
    pub fn encode(&self) -> Vec<u8> {
        encode_frame(self.opcode, &self.args)
    }

    /// Parse a complete wire frame, verifying length, checksum and terminator
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < FRAME_OVERHEAD {
            return Err(CodecError::invalid_frame(format!(
                "Frame of {} bytes is shorter than the {} byte envelope",
                bytes.len(),
                FRAME_OVERHEAD
            )));
        }
        if bytes[0] != FRAME_START || bytes[bytes.len() - 1] != FRAME_END {
            return Err(CodecError::invalid_frame("Missing start or end marker"));
        }

        let length = u16::from_le_bytes([bytes[1], bytes[2]]) as usize;
        if length + 4 != bytes.len() {
            return Err(CodecError::invalid_frame(format!(
                "Length field {} does not match frame size {}",
                length,
                bytes.len()
            )));
        }

        let body_end = bytes.len() - 3;
        let expected = checksum(&bytes[..body_end]);
        let actual = u16::from_le_bytes([bytes[body_end], bytes[body_end + 1]]);
        if expected != actual {
            return Err(CodecError::invalid_frame(format!(
                "Checksum mismatch: expected {:04X}, got {:04X}",
                expected, actual
            )));
        }

        Ok(Self {
            opcode: bytes[3],
            args: bytes[4..body_end].to_vec(),
        })
    }
}

/// Low and high byte of a 16-bit quantity, truncating anything wider
#[inline]
pub fn little_endian(value: usize) -> [u8; 2] {
    [(value & 0xFF) as u8, ((value >> 8) & 0xFF) as u8]
}

/// Mask an integer argument down to one byte the way the device tolerates it
#[inline]
pub fn mask(value: i64) -> u8 {
    (value & 0xFF) as u8
}

/// Sum of every byte except the first, modulo 65536
fn checksum(body: &[u8]) -> u16 {
    body.iter()
        .skip(1)
        .fold(0u16, |acc, &b| acc.wrapping_add(b as u16))
}

/// Encode an opcode and its arguments into a transport frame
pub fn encode_frame(opcode: u8, args: &[u8]) -> Vec<u8> {
    let payload_size = little_endian(args.len() + 3);

    let mut frame = Vec::with_capacity(args.len() + FRAME_OVERHEAD);
    frame.push(FRAME_START);
    frame.extend_from_slice(&payload_size);
    frame.push(opcode);
    frame.extend_from_slice(args);

    let cs = checksum(&frame);
    frame.extend_from_slice(&cs.to_le_bytes());
    frame.push(FRAME_END);

    frame
}
