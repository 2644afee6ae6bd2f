//! gRPC-Web-Text framing for the IQAir command API.
//!
//! Every frame on the wire is
//! ```text
//! ┌────────┬──────────────┬─────────────┐
//! │ Type   │ Length       │ Payload     │
//! │ 1 byte │ u32 BE       │ Length bytes│
//! └────────┴──────────────┴─────────────┘
//! ```
//! and is base64 encoded. A response body may hold several frames back to
//! back (typically DATA then TRAILERS) with nothing but `=` padding between
//! them.
//!
//! The request side only ever builds one message shape: the serial number
//! as field 1, optionally followed by a single `field, value` byte pair.

use std::fmt;

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};

use super::error::{IqairError, Result};

/// Prefix the state API puts in front of serial numbers.
pub const DEVICE_ID_PREFIX: &str = "UI2_";

/// Frame header size in bytes (type + length).
pub const FRAME_HEADER_LEN: usize = 5;

/// Protobuf tag of the serial number (field 1, length delimited).
const SERIAL_NUMBER_TAG: u8 = 0x0A;

const ENCODE_ENGINE: GeneralPurpose = base64::engine::general_purpose::STANDARD;

// Responses are decoded leniently: the last frame of a body is sometimes
// unpadded, and trailing bits are not always zero.
const DECODE_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Wire tag identifying which attribute a command addresses.
///
/// Several attributes share a code; the endpoint that carries the payload
/// is what tells them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldCode(pub u8);

impl FieldCode {
    pub const POWER: FieldCode = FieldCode(0x10);
    pub const FAN_SPEED: FieldCode = FieldCode(0x18);
    pub const LIGHT_INDICATOR: FieldCode = FieldCode(0x10);
    pub const LIGHT_LEVEL: FieldCode = FieldCode(0x10);
    pub const AUTO_MODE: FieldCode = FieldCode(0x10);
    pub const AUTO_MODE_PROFILE: FieldCode = FieldCode(0x10);
    pub const LOCKS: FieldCode = FieldCode(0x10);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Data,
    Trailers,
    Unknown(u8),
}

impl From<u8> for FrameType {
    fn from(byte: u8) -> Self {
        match byte {
            0x00 => FrameType::Data,
            0x80 => FrameType::Trailers,
            other => FrameType::Unknown(other),
        }
    }
}

impl FrameType {
    pub fn as_byte(self) -> u8 {
        match self {
            FrameType::Data => 0x00,
            FrameType::Trailers => 0x80,
            FrameType::Unknown(b) => b,
        }
    }
}

/// One decoded frame.
///
/// `length` is the declared length from the header. It is not checked
/// against `payload`, which holds whatever bytes followed the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub length: u32,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Parse a frame from raw bytes. Returns `None` if the header is incomplete.
    pub fn parse(bytes: &[u8]) -> Option<Frame> {
        if bytes.len() < FRAME_HEADER_LEN {
            return None;
        }
        let length = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        Some(Frame {
            frame_type: FrameType::from(bytes[0]),
            length,
            payload: bytes[FRAME_HEADER_LEN..].to_vec(),
        })
    }

    /// Size of the frame as it was on the wire, header included.
    pub fn raw_len(&self) -> usize {
        FRAME_HEADER_LEN + self.payload.len()
    }

    /// Byte at the given offset of the raw frame (header included).
    pub fn raw_byte(&self, offset: usize) -> Option<u8> {
        match offset {
            0 => Some(self.frame_type.as_byte()),
            1..=4 => Some(self.length.to_be_bytes()[offset - 1]),
            _ => self.payload.get(offset - FRAME_HEADER_LEN).copied(),
        }
    }

    pub fn is_data(&self) -> bool {
        self.frame_type == FrameType::Data
    }
}

/// Outcome of decoding one base64 segment of a response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedFrame {
    Frame(Frame),
    /// Valid base64 but fewer than [`FRAME_HEADER_LEN`] bytes.
    TooShort(usize),
    /// Not valid base64.
    Invalid(String),
}

impl fmt::Display for DecodedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodedFrame::Frame(frame) => {
                let (kind, payload) = match frame.frame_type {
                    FrameType::Data => ("DATA (0x00)".to_string(), hex(&frame.payload)),
                    FrameType::Trailers => match std::str::from_utf8(&frame.payload) {
                        Ok(text) => ("TRAILERS (0x80)".to_string(), format!("'{}'", text.trim())),
                        Err(e) => return write!(f, "[Decoding Error: {e}]"),
                    },
                    FrameType::Unknown(b) => (format!("Unknown (0x{b:02x})"), hex(&frame.payload)),
                };
                write!(
                    f,
                    "[Frame: {}, Length: {}, Payload: {}]",
                    kind, frame.length, payload
                )
            }
            DecodedFrame::TooShort(len) => {
                write!(f, "[Invalid Frame: Too short ({len} bytes)]")
            }
            DecodedFrame::Invalid(reason) => write!(f, "[Decoding Error: {reason}]"),
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_base64_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '+' || c == '/'
}

/// Remove the leading device-id prefix from a serial number, if present.
pub fn strip_device_prefix(serial_number: &str) -> &str {
    serial_number
        .strip_prefix(DEVICE_ID_PREFIX)
        .unwrap_or(serial_number)
}

/// Build the base64 request body for a command.
///
/// `value` of `None` sends the serial number alone, which the device reads
/// as "field cleared".
pub fn encode_command(
    serial_number: Option<&str>,
    field: FieldCode,
    value: Option<u8>,
) -> Result<String> {
    let serial = serial_number
        .filter(|s| !s.is_empty())
        .ok_or(IqairError::MissingSerialNumber)?;
    let sn = strip_device_prefix(serial).as_bytes();
    let sn_len = u8::try_from(sn.len()).map_err(|_| {
        IqairError::InvalidArgument(format!("serial number too long ({} bytes)", sn.len()))
    })?;

    let mut message = Vec::with_capacity(sn.len() + 4);
    message.push(SERIAL_NUMBER_TAG);
    message.push(sn_len);
    message.extend_from_slice(sn);
    if let Some(value) = value {
        message.push(field.0);
        message.push(value);
    }

    let mut framed = Vec::with_capacity(FRAME_HEADER_LEN + message.len());
    framed.push(FrameType::Data.as_byte());
    framed.extend_from_slice(&(message.len() as u32).to_be_bytes());
    framed.extend_from_slice(&message);

    Ok(ENCODE_ENGINE.encode(framed))
}

/// Split a response body into its base64 frames.
///
/// Frames are separated by line breaks, and a new frame also starts wherever
/// a run of `=` padding is followed by another base64 character. Empty
/// segments are dropped.
pub fn split_frames(text: &str) -> Vec<&str> {
    let mut frames = Vec::new();

    for line in text.split(['\n', '\r']) {
        let line = line.trim();
        let mut start = 0;
        let mut prev = None;

        for (i, c) in line.char_indices() {
            if prev == Some('=') && is_base64_char(c) {
                frames.push(&line[start..i]);
                start = i;
            }
            prev = Some(c);
        }
        if start < line.len() {
            frames.push(&line[start..]);
        }
    }
    frames
}

/// Decode a single base64 frame segment.
pub fn decode_frame(segment: &str) -> DecodedFrame {
    match DECODE_ENGINE.decode(segment) {
        Ok(bytes) => match Frame::parse(&bytes) {
            Some(frame) => DecodedFrame::Frame(frame),
            None => DecodedFrame::TooShort(bytes.len()),
        },
        Err(e) => DecodedFrame::Invalid(e.to_string()),
    }
}

/// Decode every frame in a response body, in order.
///
/// A bad segment becomes a diagnostic entry and does not stop the rest.
pub fn decode_frames(text: &str) -> Vec<DecodedFrame> {
    split_frames(text).into_iter().map(decode_frame).collect()
}

/// Human-readable rendering of a gRPC-Web-Text body, for logs.
pub fn describe_frames(text: &str) -> String {
    let frames = decode_frames(text);
    if frames.is_empty() {
        return "  [Empty Response Body]".to_string();
    }
    frames
        .iter()
        .map(|frame| format!("  {frame}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b64(bytes: &[u8]) -> String {
        ENCODE_ENGINE.encode(bytes)
    }

    #[test]
    fn test_encode_with_value() {
        let body = encode_command(Some("UI2_ABC"), FieldCode::FAN_SPEED, Some(4)).unwrap();
        let bytes = ENCODE_ENGINE.decode(&body).unwrap();
        assert_eq!(
            bytes,
            vec![0x00, 0, 0, 0, 7, 0x0A, 3, b'A', b'B', b'C', 0x18, 4]
        );
    }

    #[test]
    fn test_encode_without_value() {
        let body = encode_command(Some("XYZ1"), FieldCode::LIGHT_INDICATOR, None).unwrap();
        let bytes = ENCODE_ENGINE.decode(&body).unwrap();
        assert_eq!(bytes, vec![0x00, 0, 0, 0, 6, 0x0A, 4, b'X', b'Y', b'Z', b'1']);
    }

    #[test]
    fn test_encode_requires_serial_number() {
        assert!(matches!(
            encode_command(None, FieldCode::POWER, Some(2)),
            Err(IqairError::MissingSerialNumber)
        ));
        assert!(matches!(
            encode_command(Some(""), FieldCode::POWER, Some(2)),
            Err(IqairError::MissingSerialNumber)
        ));
    }

    #[test]
    fn test_encode_rejects_oversized_serial() {
        let serial = "A".repeat(300);
        assert!(matches!(
            encode_command(Some(&serial), FieldCode::POWER, Some(2)),
            Err(IqairError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_strip_device_prefix() {
        assert_eq!(strip_device_prefix("UI2_12345"), "12345");
        assert_eq!(strip_device_prefix("12345"), "12345");
        // Only a leading prefix is removed.
        assert_eq!(strip_device_prefix("12UI2_345"), "12UI2_345");
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let body = encode_command(Some("UI2_SN9876"), FieldCode::POWER, Some(3)).unwrap();
        let frames = decode_frames(&body);
        assert_eq!(frames.len(), 1);

        let DecodedFrame::Frame(frame) = &frames[0] else {
            panic!("expected a frame, got {:?}", frames[0]);
        };
        assert!(frame.is_data());
        assert_eq!(frame.length as usize, frame.payload.len());
        assert_eq!(frame.payload[0], 0x0A);
        assert_eq!(frame.payload[1] as usize, "SN9876".len());
        assert_eq!(&frame.payload[2..8], b"SN9876");
        assert_eq!(&frame.payload[8..], &[0x10, 3]);
    }

    #[test]
    fn test_decode_empty() {
        assert!(decode_frames("").is_empty());
        assert!(decode_frames("  \n").is_empty());
        assert_eq!(describe_frames(""), "  [Empty Response Body]");
    }

    #[test]
    fn test_split_on_padding_boundary() {
        assert_eq!(split_frames("AAAA=BBBB"), vec!["AAAA=", "BBBB"]);
        assert_eq!(split_frames("AA==BB=="), vec!["AA==", "BB=="]);
        assert_eq!(split_frames("AAAABBBB"), vec!["AAAABBBB"]);
    }

    #[test]
    fn test_decode_multi_frame() {
        let data = [0x00, 0, 0, 0, 2, 0x08, 0x02];
        let trailers = b"\x80\x00\x00\x00\x0fgrpc-status:0\r\n";
        let body = format!("{}{}", b64(&data), b64(trailers));

        let frames = decode_frames(&body);
        assert_eq!(frames.len(), 2);

        let DecodedFrame::Frame(first) = &frames[0] else {
            panic!("first frame should decode");
        };
        assert_eq!(first.frame_type, FrameType::Data);
        assert_eq!(first.payload, vec![0x08, 0x02]);

        let DecodedFrame::Frame(second) = &frames[1] else {
            panic!("second frame should decode");
        };
        assert_eq!(second.frame_type, FrameType::Trailers);
        assert_eq!(second.length, 15);
    }

    #[test]
    fn test_decode_newline_separated_frames() {
        let data = [0x00, 0, 0, 0, 2, 0x08, 0x02];
        let trailers = b"\x80\x00\x00\x00\x0fgrpc-status:0\r\n";
        let body = format!("{}\n{}\r\n", b64(&data), b64(trailers));

        let frames = decode_frames(&body);
        assert_eq!(frames.len(), 2);
        assert!(matches!(&frames[0], DecodedFrame::Frame(f) if f.payload == vec![0x08, 0x02]));
        assert!(matches!(
            &frames[1],
            DecodedFrame::Frame(f) if f.frame_type == FrameType::Trailers
        ));
        assert_eq!(describe_frames(&body).lines().count(), 2);
    }

    #[test]
    fn test_split_drops_empty_lines() {
        assert_eq!(split_frames("AA==\n\nBB==\n"), vec!["AA==", "BB=="]);
        assert!(split_frames("\r\n").is_empty());
    }

    #[test]
    fn test_non_utf8_trailers_reported_as_error() {
        let trailers = [0x80, 0, 0, 0, 2, 0xff, 0xfe];
        let text = describe_frames(&b64(&trailers));
        assert!(text.starts_with("  [Decoding Error:"), "got {text}");
    }

    #[test]
    fn test_too_short_frame_does_not_block_others() {
        let short = b64(&[0x00, 0x01]);
        let data = b64(&[0x00, 0, 0, 0, 1, 0x05]);
        let frames = decode_frames(&format!("{short}{data}"));

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], DecodedFrame::TooShort(2));
        assert!(matches!(frames[1], DecodedFrame::Frame(_)));
    }

    #[test]
    fn test_invalid_base64_is_described() {
        let frames = decode_frames("!!!!");
        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0], DecodedFrame::Invalid(_)));
        assert!(describe_frames("!!!!").starts_with("  [Decoding Error:"));
    }

    #[test]
    fn test_declared_length_not_enforced() {
        // Header claims 10 bytes, only 1 follows.
        let frames = decode_frames(&b64(&[0x00, 0, 0, 0, 10, 0xff]));
        let DecodedFrame::Frame(frame) = &frames[0] else {
            panic!("frame should decode");
        };
        assert_eq!(frame.length, 10);
        assert_eq!(frame.payload, vec![0xff]);
    }

    #[test]
    fn test_describe_frames() {
        let data = [0x00, 0, 0, 0, 2, 0x08, 0x02];
        let trailers = b"\x80\x00\x00\x00\x0egrpc-status:0\n";
        let unknown = [0x42, 0, 0, 0, 1, 0xab];
        let body = format!("{}{}{}", b64(&data), b64(trailers), b64(&unknown));

        let text = describe_frames(&body);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "  [Frame: DATA (0x00), Length: 2, Payload: 08 02]");
        assert_eq!(
            lines[1],
            "  [Frame: TRAILERS (0x80), Length: 14, Payload: 'grpc-status:0']"
        );
        assert_eq!(lines[2], "  [Frame: Unknown (0x42), Length: 1, Payload: ab]");
        assert_eq!(
            DecodedFrame::TooShort(3).to_string(),
            "[Invalid Frame: Too short (3 bytes)]"
        );
    }

    #[test]
    fn test_raw_byte_offsets() {
        let frame = Frame::parse(&[0x00, 0, 0, 0, 2, 0x08, 0x04]).unwrap();
        assert_eq!(frame.raw_len(), 7);
        assert_eq!(frame.raw_byte(0), Some(0x00));
        assert_eq!(frame.raw_byte(4), Some(2));
        assert_eq!(frame.raw_byte(6), Some(0x04));
        assert_eq!(frame.raw_byte(7), None);
    }
}
