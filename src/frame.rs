//! Frame codec: wire decode, encode and legality validation (RFC 6455 §5).

use bytes::{BufMut, BytesMut};
use monoio_compat::AsyncReadExt;

use crate::mask::apply_mask;

/// Control frame payloads must not exceed 125 bytes.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Largest payload length this client will read. RFC 6455 §5.2 requires
/// the most significant bit of the 64-bit length field to be zero.
pub const MAX_FRAME_PAYLOAD: u64 = i64::MAX as u64;

/// Opcodes define the interpretation of the payload data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    /// A continuation frame of a fragmented message.
    Continuation = 0x0,
    /// A text frame.
    Text = 0x1,
    /// A binary frame.
    Binary = 0x2,
    /// A connection close.
    Close = 0x8,
    /// A ping.
    Ping = 0x9,
    /// A pong.
    Pong = 0xA,
}

impl OpCode {
    /// Maps a raw 4-bit opcode; reserved values (3-7 and 11-15) yield
    /// `None`.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }

    /// Close, Ping and Pong.
    pub fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }

    /// Text and Binary.
    pub fn is_data(self) -> bool {
        matches!(self, Self::Text | Self::Binary)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error("unable to read all frame data")]
    Read(#[from] std::io::Error),
    #[error("announced payload of {0} bytes exceeds the readable limit")]
    TooLarge(u64),
    #[error("reserved bits must be 0")]
    ReservedBits,
    #[error("reserved opcode {0:#x}")]
    ReservedOpcode(u8),
    #[error("control frame must not be fragmented")]
    FragmentedControl,
    #[error("control frame payload of {0} bytes exceeds 125")]
    OversizedControl(usize),
    #[error("no fragmented message to continue")]
    StrayContinuation,
    #[error("expected a continuation frame")]
    ExpectedContinuation,
}

/// A single wire unit, as decoded from the transport.
///
/// The opcode is kept as the raw 4-bit value so that frames carrying a
/// reserved opcode survive decoding and are rejected by
/// [`Frame::validate`] instead of aborting the read.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Final fragment marker.
    pub fin: bool,
    /// True when any of the three reserved bits is set.
    pub rsv: bool,
    /// Raw 4-bit opcode.
    pub opcode: u8,
    /// Payload length in bytes.
    pub len: usize,
    /// Payload data, unmasked.
    pub payload: Vec<u8>,
    /// Masking key, when the frame was masked on the wire.
    pub mask: Option<[u8; 4]>,
}

impl Frame {
    /// Reads one frame off the transport, blocking until every piece
    /// has arrived.
    ///
    /// Any short read is a fatal [`FrameError::Read`]. An announced
    /// 64-bit length above [`MAX_FRAME_PAYLOAD`] fails with
    /// [`FrameError::TooLarge`] before any payload allocation.
    pub async fn read<S>(stream: &mut S) -> Result<Self, FrameError>
    where
        S: AsyncReadExt + Unpin,
    {
        let mut header = [0u8; 2];
        stream.read_exact(&mut header).await?;

        let fin = header[0] & 0x80 != 0;
        let rsv = header[0] & 0x70 != 0;
        let opcode = header[0] & 0x0F;
        let masked = header[1] & 0x80 != 0;

        let mut len = u64::from(header[1] & 0x7F);
        if len == 126 {
            let mut ext = [0u8; 2];
            stream.read_exact(&mut ext).await?;
            len = u64::from(u16::from_be_bytes(ext));
        } else if len == 127 {
            let mut ext = [0u8; 8];
            stream.read_exact(&mut ext).await?;
            len = u64::from_be_bytes(ext);
            if len > MAX_FRAME_PAYLOAD {
                return Err(FrameError::TooLarge(len));
            }
        }
        let len = usize::try_from(len).map_err(|_| FrameError::TooLarge(len))?;

        let mask = if masked {
            let mut key = [0u8; 4];
            stream.read_exact(&mut key).await?;
            Some(key)
        } else {
            None
        };

        let mut payload = vec![0u8; len];
        stream.read_exact(&mut payload).await?;
        if let Some(key) = mask {
            apply_mask(&mut payload, key);
        }

        Ok(Self {
            fin,
            rsv,
            opcode,
            len,
            payload,
            mask,
        })
    }

    /// Checks the frame against protocol legality rules and yields the
    /// typed opcode.
    ///
    /// `reassembly_open` tells the validator whether a fragmented
    /// message is currently pending; a Continuation frame is only legal
    /// while one is.
    pub fn validate(&self, reassembly_open: bool) -> Result<OpCode, FrameError> {
        if self.rsv {
            return Err(FrameError::ReservedBits);
        }

        let opcode = OpCode::from_u8(self.opcode).ok_or(FrameError::ReservedOpcode(self.opcode))?;

        if opcode.is_control() {
            if !self.fin {
                return Err(FrameError::FragmentedControl);
            }
            if self.len > MAX_CONTROL_PAYLOAD {
                return Err(FrameError::OversizedControl(self.len));
            }
        }

        if opcode == OpCode::Continuation && !reassembly_open {
            return Err(FrameError::StrayContinuation);
        }

        Ok(opcode)
    }
}

/// Serializes a client frame into one contiguous buffer: header bytes,
/// mask key, then the payload XOR-masked with `key`.
pub fn encode(fin: bool, opcode: OpCode, payload: &[u8], key: [u8; 4]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(payload.len() + 14);

    buf.put_u8(((fin as u8) << 7) | opcode as u8);
    match payload.len() {
        len @ 0..=125 => buf.put_u8(len as u8 | 0x80),
        len @ 126..=65535 => {
            buf.put_u8(126 | 0x80);
            buf.put_u16(len as u16);
        }
        len => {
            buf.put_u8(127 | 0x80);
            buf.put_u64(len as u64);
        }
    }
    buf.put_slice(&key);

    let start = buf.len();
    buf.put_slice(payload);
    apply_mask(&mut buf[start..], key);

    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run<F: Future>(fut: F) -> F::Output {
        monoio::RuntimeBuilder::<monoio::FusionDriver>::new()
            .enable_all()
            .build()
            .expect("runtime")
            .block_on(fut)
    }

    async fn read_from(bytes: &[u8]) -> Result<Frame, FrameError> {
        let mut input = bytes;
        Frame::read(&mut input).await
    }

    #[test]
    fn decodes_unmasked_text_frame() {
        let frame = run(read_from(&[0x81, 0x05, 0x48, 0x65, 0x6c, 0x6c, 0x6f])).unwrap();
        assert!(frame.fin);
        assert!(!frame.rsv);
        assert_eq!(frame.opcode, 0x1);
        assert_eq!(frame.len, 5);
        assert_eq!(frame.payload, b"Hello");
        assert!(frame.mask.is_none());
    }

    #[test]
    fn decodes_masked_text_frame() {
        let frame = run(read_from(&[
            0x81, 0x85, // FIN + Text, MASK + len=5
            0x37, 0xfa, 0x21, 0x3d, // mask key
            0x7f, 0x9f, 0x4d, 0x51, 0x58, // masked "Hello"
        ]))
        .unwrap();
        assert_eq!(frame.payload, b"Hello");
        assert_eq!(frame.mask, Some([0x37, 0xfa, 0x21, 0x3d]));
    }

    #[test]
    fn decodes_sixteen_bit_extended_length() {
        let mut wire = vec![0x82, 0x7e, 0x01, 0x00];
        wire.extend(vec![0xab; 256]);
        let frame = run(read_from(&wire)).unwrap();
        assert_eq!(frame.opcode, 0x2);
        assert_eq!(frame.len, 256);
        assert!(frame.payload.iter().all(|&b| b == 0xab));
    }

    #[test]
    fn decodes_sixty_four_bit_extended_length() {
        let mut wire = vec![0x82, 0x7f];
        wire.extend(66000u64.to_be_bytes());
        wire.extend(vec![0xcd; 66000]);
        let frame = run(read_from(&wire)).unwrap();
        assert_eq!(frame.len, 66000);
    }

    #[test]
    fn rejects_length_above_the_readable_limit() {
        let mut wire = vec![0x82, 0x7f];
        wire.extend(u64::MAX.to_be_bytes());
        let result = run(read_from(&wire));
        assert!(matches!(result, Err(FrameError::TooLarge(u64::MAX))));
    }

    #[test]
    fn short_payload_read_is_fatal() {
        // len=5 but only 3 payload bytes on the wire.
        let result = run(read_from(&[0x81, 0x05, 0x48, 0x65, 0x6c]));
        assert!(matches!(result, Err(FrameError::Read(_))));
    }

    #[test]
    fn short_header_read_is_fatal() {
        let result = run(read_from(&[0x81]));
        assert!(matches!(result, Err(FrameError::Read(_))));
    }

    #[test]
    fn any_reserved_bit_sets_rsv() {
        for byte0 in [0xc1, 0xa1, 0x91] {
            let frame = run(read_from(&[byte0, 0x00])).unwrap();
            assert!(frame.rsv, "bit pattern {byte0:#x} must flag rsv");
            assert!(matches!(
                frame.validate(false),
                Err(FrameError::ReservedBits)
            ));
        }
    }

    #[test]
    fn validates_reserved_opcodes() {
        for opcode in (0x3..=0x7).chain(0xB..=0xF) {
            let frame = run(read_from(&[0x80 | opcode, 0x00])).unwrap();
            assert!(matches!(
                frame.validate(false),
                Err(FrameError::ReservedOpcode(op)) if op == opcode
            ));
        }
    }

    #[test]
    fn rejects_fragmented_control_frame() {
        // Ping with fin=0.
        let frame = run(read_from(&[0x09, 0x00])).unwrap();
        assert!(matches!(
            frame.validate(false),
            Err(FrameError::FragmentedControl)
        ));
    }

    #[test]
    fn rejects_oversized_control_frame() {
        let mut wire = vec![0x89, 0x7e, 0x00, 0x7e];
        wire.extend(vec![0u8; 126]);
        let frame = run(read_from(&wire)).unwrap();
        assert!(matches!(
            frame.validate(false),
            Err(FrameError::OversizedControl(126))
        ));
    }

    #[test]
    fn control_frame_at_limit_passes() {
        let mut wire = vec![0x89, 125];
        wire.extend(vec![0u8; 125]);
        let frame = run(read_from(&wire)).unwrap();
        assert_eq!(frame.validate(false).unwrap(), OpCode::Ping);
    }

    #[test]
    fn continuation_requires_open_reassembly() {
        for wire in [[0x80, 0x00], [0x00, 0x00]] {
            let frame = run(read_from(&wire)).unwrap();
            assert!(matches!(
                frame.validate(false),
                Err(FrameError::StrayContinuation)
            ));
            assert_eq!(frame.validate(true).unwrap(), OpCode::Continuation);
        }
    }

    #[test]
    fn encodes_masked_text_frame() {
        let wire = encode(true, OpCode::Text, b"Hello", [0x37, 0xfa, 0x21, 0x3d]);
        assert_eq!(
            &wire[..],
            &[
                0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58
            ]
        );
    }

    #[test]
    fn encodes_sixteen_bit_length_header() {
        let payload = vec![0xab; 256];
        let wire = encode(true, OpCode::Binary, &payload, [0, 0, 0, 0]);
        assert_eq!(wire[0], 0x82);
        assert_eq!(wire[1], 0x7e | 0x80);
        assert_eq!(&wire[2..4], &[0x01, 0x00]);
        // Zero key: payload goes out unchanged.
        assert_eq!(&wire[8..], payload.as_slice());
    }

    #[test]
    fn encodes_sixty_four_bit_length_header() {
        let payload = vec![0xcd; 65536];
        let wire = encode(true, OpCode::Binary, &payload, [0, 0, 0, 0]);
        assert_eq!(wire[0], 0x82);
        assert_eq!(wire[1], 0x7f | 0x80);
        assert_eq!(&wire[2..10], &65536u64.to_be_bytes());
        assert_eq!(wire.len(), 14 + 65536);
    }

    #[test]
    fn encode_then_decode_recovers_payload() {
        let wire = encode(true, OpCode::Binary, &[1, 2, 3, 4, 5], [9, 8, 7, 6]);
        let frame = run(read_from(&wire)).unwrap();
        assert_eq!(frame.payload, [1, 2, 3, 4, 5]);
        assert_eq!(frame.mask, Some([9, 8, 7, 6]));
        assert_eq!(frame.validate(false).unwrap(), OpCode::Binary);
    }

    #[test]
    fn non_final_fragment_decodes() {
        let frame = run(read_from(&[0x01, 0x03, 0x48, 0x65, 0x6c])).unwrap();
        assert!(!frame.fin);
        assert_eq!(frame.validate(false).unwrap(), OpCode::Text);
    }
}
