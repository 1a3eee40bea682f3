//! Wire framing for the shipper protocol.
//!
//! Every frame starts with a protocol version byte and a frame type byte.
//! Three frame types exist:
//!
//! * data (`D`, client to collector): `u32` sequence number, `u32` pair
//!   count, then length-prefixed key/value byte strings for each field.
//! * window (`W`, client to collector): `u32` announcing how many data
//!   frames the client may send before waiting for acknowledgement.
//! * ack (`A`, collector to client): `u32` sequence number, cumulatively
//!   acknowledging every data frame up to and including that sequence.
//!
//! All integers are big-endian.

use std::error::Error;
use std::fmt;

use crate::record::Record;

/// Version byte carried by every frame.
pub const PROTOCOL_VERSION: u8 = b'1';

/// Frame type byte for data frames.
pub const FRAME_DATA: u8 = b'D';

/// Frame type byte for window size frames.
pub const FRAME_WINDOW: u8 = b'W';

/// Frame type byte for acknowledgement frames.
pub const FRAME_ACK: u8 = b'A';

/// Upper bound on the size of a single encoded data frame.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Number of bytes in the fixed version/type header.
const HEADER_SIZE: usize = 2;

/// Total size of an ack frame on the wire.
const ACK_FRAME_SIZE: usize = HEADER_SIZE + 4;

/// Errors arising from encoding or decoding protocol frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The peer sent a frame with a version byte this client does not speak.
    UnsupportedVersion(u8),
    /// The peer sent a frame type this client does not recognise.
    UnknownFrameType(u8),
    /// A record encoded to a data frame larger than [`MAX_FRAME_SIZE`].
    FrameTooLarge { size: usize },
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::UnsupportedVersion(version) => {
                write!(f, "unsupported protocol version byte 0x{version:02x}")
            }
            ProtocolError::UnknownFrameType(frame_type) => {
                write!(f, "unknown frame type byte 0x{frame_type:02x}")
            }
            ProtocolError::FrameTooLarge { size } => {
                write!(
                    f,
                    "encoded data frame of {size} bytes exceeds the {MAX_FRAME_SIZE} byte limit"
                )
            }
        }
    }
}

impl Error for ProtocolError {}

/// Encode a record as a data frame carrying the given sequence number.
///
/// Field values that are JSON strings are written as their raw text; any
/// other value is rendered as compact JSON. Fields are written in sorted
/// name order, so the encoding of a record is deterministic.
///
/// # Errors
///
/// Returns [`ProtocolError::FrameTooLarge`] if the encoded frame would
/// exceed [`MAX_FRAME_SIZE`].
pub fn encode_data_frame(sequence: u32, record: &Record) -> Result<Vec<u8>, ProtocolError> {
    let mut frame = Vec::with_capacity(64);
    frame.push(PROTOCOL_VERSION);
    frame.push(FRAME_DATA);
    frame.extend_from_slice(&sequence.to_be_bytes());
    frame.extend_from_slice(&(record.len() as u32).to_be_bytes());

    for (name, value) in record.fields() {
        push_bytes(&mut frame, name.as_bytes())?;
        match value.as_str() {
            Some(text) => push_bytes(&mut frame, text.as_bytes())?,
            None => push_bytes(&mut frame, value.to_string().as_bytes())?,
        }
    }

    if frame.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge { size: frame.len() });
    }
    Ok(frame)
}

/// Encode a window size announcement.
pub fn encode_window_frame(window_size: u32) -> [u8; 6] {
    let mut frame = [0u8; 6];
    frame[0] = PROTOCOL_VERSION;
    frame[1] = FRAME_WINDOW;
    frame[2..6].copy_from_slice(&window_size.to_be_bytes());
    frame
}

fn push_bytes(frame: &mut Vec<u8>, bytes: &[u8]) -> Result<(), ProtocolError> {
    let length = u32::try_from(bytes.len()).map_err(|_| ProtocolError::FrameTooLarge {
        size: bytes.len(),
    })?;
    frame.extend_from_slice(&length.to_be_bytes());
    frame.extend_from_slice(bytes);
    Ok(())
}

/// Incremental decoder for the collector-to-client ack stream.
///
/// Bytes read off the socket are fed in as they arrive; complete ack
/// frames are handed back one at a time. Partial frames are buffered
/// until the remaining bytes show up.
#[derive(Debug, Default)]
pub struct AckDecoder {
    buffer: Vec<u8>,
}

impl AckDecoder {
    /// Create a decoder with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly read bytes to the decode buffer.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Try to decode the next complete ack frame.
    ///
    /// Returns `Ok(None)` when more bytes are needed.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if the buffered bytes carry an
    /// unsupported version byte or a frame type other than ack. The
    /// decoder is not usable after an error; the connection it was
    /// reading from should be torn down.
    pub fn next_ack(&mut self) -> Result<Option<u32>, ProtocolError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        if self.buffer[0] != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(self.buffer[0]));
        }
        if self.buffer.len() < HEADER_SIZE {
            return Ok(None);
        }
        if self.buffer[1] != FRAME_ACK {
            return Err(ProtocolError::UnknownFrameType(self.buffer[1]));
        }
        if self.buffer.len() < ACK_FRAME_SIZE {
            return Ok(None);
        }

        let mut sequence_bytes = [0u8; 4];
        sequence_bytes.copy_from_slice(&self.buffer[HEADER_SIZE..ACK_FRAME_SIZE]);
        self.buffer.drain(..ACK_FRAME_SIZE);
        Ok(Some(u32::from_be_bytes(sequence_bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ack_bytes(sequence: u32) -> Vec<u8> {
        let mut bytes = vec![PROTOCOL_VERSION, FRAME_ACK];
        bytes.extend_from_slice(&sequence.to_be_bytes());
        bytes
    }

    #[test]
    fn test_data_frame_layout() {
        let record = Record::new().with_field("line", "hello");
        let frame = encode_data_frame(7, &record).expect("encode");

        assert_eq!(frame[0], PROTOCOL_VERSION);
        assert_eq!(frame[1], FRAME_DATA);
        assert_eq!(&frame[2..6], &7u32.to_be_bytes());
        assert_eq!(&frame[6..10], &1u32.to_be_bytes());
        // key: length then bytes
        assert_eq!(&frame[10..14], &4u32.to_be_bytes());
        assert_eq!(&frame[14..18], b"line");
        // value: length then bytes
        assert_eq!(&frame[18..22], &5u32.to_be_bytes());
        assert_eq!(&frame[22..27], b"hello");
        assert_eq!(frame.len(), 27);
    }

    #[test]
    fn test_data_frame_renders_non_string_values_as_json() {
        let record = Record::new().with_field("count", 42);
        let frame = encode_data_frame(1, &record).expect("encode");

        // "count" (5 bytes) then "42" (2 bytes)
        assert_eq!(&frame[10..14], &5u32.to_be_bytes());
        assert_eq!(&frame[14..19], b"count");
        assert_eq!(&frame[19..23], &2u32.to_be_bytes());
        assert_eq!(&frame[23..25], b"42");
    }

    #[test]
    fn test_data_frame_field_order_is_deterministic() {
        let record = Record::new()
            .with_field("b", "2")
            .with_field("a", "1");
        let first = encode_data_frame(1, &record).expect("encode");
        let second = encode_data_frame(1, &record).expect("encode");

        assert_eq!(first, second);
        // "a" comes before "b" regardless of insertion order.
        assert_eq!(&first[14..15], b"a");
    }

    #[test]
    fn test_oversize_record_rejected() {
        let record = Record::new().with_field("blob", "x".repeat(MAX_FRAME_SIZE));
        let err = encode_data_frame(1, &record).expect_err("must reject");
        assert!(matches!(err, ProtocolError::FrameTooLarge { .. }));
    }

    #[test]
    fn test_window_frame_layout() {
        let frame = encode_window_frame(16);
        assert_eq!(frame[0], PROTOCOL_VERSION);
        assert_eq!(frame[1], FRAME_WINDOW);
        assert_eq!(&frame[2..6], &16u32.to_be_bytes());
    }

    #[test]
    fn test_ack_decoder_single_frame() {
        let mut decoder = AckDecoder::new();
        decoder.feed(&ack_bytes(3));

        assert_eq!(decoder.next_ack().expect("decode"), Some(3));
        assert_eq!(decoder.next_ack().expect("decode"), None);
    }

    #[test]
    fn test_ack_decoder_handles_split_frames() {
        let bytes = ack_bytes(9);
        let mut decoder = AckDecoder::new();

        decoder.feed(&bytes[..3]);
        assert_eq!(decoder.next_ack().expect("decode"), None);

        decoder.feed(&bytes[3..]);
        assert_eq!(decoder.next_ack().expect("decode"), Some(9));
    }

    #[test]
    fn test_ack_decoder_multiple_frames_in_one_read() {
        let mut bytes = ack_bytes(1);
        bytes.extend_from_slice(&ack_bytes(2));
        let mut decoder = AckDecoder::new();
        decoder.feed(&bytes);

        assert_eq!(decoder.next_ack().expect("decode"), Some(1));
        assert_eq!(decoder.next_ack().expect("decode"), Some(2));
        assert_eq!(decoder.next_ack().expect("decode"), None);
    }

    #[test]
    fn test_ack_decoder_rejects_bad_version() {
        let mut decoder = AckDecoder::new();
        decoder.feed(&[b'2', FRAME_ACK, 0, 0, 0, 1]);

        assert_eq!(
            decoder.next_ack(),
            Err(ProtocolError::UnsupportedVersion(b'2'))
        );
    }

    #[test]
    fn test_ack_decoder_rejects_unknown_frame_type() {
        let mut decoder = AckDecoder::new();
        decoder.feed(&[PROTOCOL_VERSION, b'Q', 0, 0, 0, 1]);

        assert_eq!(decoder.next_ack(), Err(ProtocolError::UnknownFrameType(b'Q')));
    }
}
