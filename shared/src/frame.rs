//! Outbound call frames.
//!
//! Layout of the 61-byte header, all fields little-endian:
//!
//! | offset | size | field                          |
//! |--------|------|--------------------------------|
//! | 0      | 4    | message type (always 4)        |
//! | 4      | 4    | frame type (always 1)          |
//! | 8      | 4    | net id                         |
//! | 16     | 4    | state (always 8)               |
//! | 24     | 4    | delay in milliseconds          |
//! | 60     | 1    | number of appended arguments   |
//!
//! Arguments follow the header as `{index, tag, payload}` and are numbered from zero.

use crate::variant::{Variant, VariantType};
use crate::{MessageType, WireError};

pub const FRAME_HEADER_SIZE: usize = 61;
pub const FRAME_TYPE_CALL: u32 = 1;
pub const FRAME_STATE: u32 = 8;
/// Net id used for frames that are not addressed at a particular in-world entity
pub const NO_NET_ID: i32 = -1;

const ARG_COUNT_OFFSET: usize = FRAME_HEADER_SIZE - 1;

#[derive(Debug, Clone, PartialEq)]
pub struct FrameBuilder {
    data: Vec<u8>,
}

impl FrameBuilder {
    pub fn new(delay: u32, net_id: i32) -> Self {
        let mut data = vec![0u8; FRAME_HEADER_SIZE];
        data[0..4].copy_from_slice(&(MessageType::GamePacket as u32).to_le_bytes());
        data[4..8].copy_from_slice(&FRAME_TYPE_CALL.to_le_bytes());
        data[8..12].copy_from_slice(&net_id.to_le_bytes());
        data[16..20].copy_from_slice(&FRAME_STATE.to_le_bytes());
        data[24..28].copy_from_slice(&delay.to_le_bytes());
        Self { data }
    }

    /// A frame calling `function` on the client, with no delay and no target entity
    pub fn call(function: &str) -> Self {
        Self::new(0, NO_NET_ID).push(function)
    }

    /// Appends one argument. Unused values carry nothing and are skipped.
    pub fn push(mut self, value: impl Into<Variant>) -> Self {
        let value = value.into();
        if value.is_unused() {
            return self;
        }

        let index = self.data[ARG_COUNT_OFFSET];
        self.data.reserve_exact(2 + value.payload_len());
        self.data.push(index);
        self.data.push(value.variant_type().tag());
        value.write_payload(&mut self.data);
        self.data[ARG_COUNT_OFFSET] = index.wrapping_add(1);
        self
    }

    pub fn arg_count(&self) -> u8 {
        self.data[ARG_COUNT_OFFSET]
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

/// A decoded outbound frame. Clients and tests use this to inspect what the gateway sent.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFrame {
    pub message_type: u32,
    pub frame_type: u32,
    pub net_id: i32,
    pub state: u32,
    pub delay: u32,
    pub args: Vec<Variant>,
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

impl ParsedFrame {
    pub fn parse(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < FRAME_HEADER_SIZE {
            return Err(WireError::Truncated {
                needed: FRAME_HEADER_SIZE,
                got: data.len(),
            });
        }

        let count = data[ARG_COUNT_OFFSET] as usize;
        let mut args = Vec::with_capacity(count);
        let mut rest = &data[FRAME_HEADER_SIZE..];

        for _ in 0..count {
            if rest.len() < 2 {
                return Err(WireError::Truncated {
                    needed: 2,
                    got: rest.len(),
                });
            }
            let ty = VariantType::from_tag(rest[1]).ok_or(WireError::UnknownTag(rest[1]))?;
            let (value, used) = Variant::read_payload(ty, &rest[2..])?;
            args.push(value);
            rest = &rest[2 + used..];
        }

        Ok(Self {
            message_type: read_u32(data, 0),
            frame_type: read_u32(data, 4),
            net_id: read_u32(data, 8) as i32,
            state: read_u32(data, 16),
            delay: read_u32(data, 24),
            args,
        })
    }

    /// Name of the client function the frame invokes, by convention its first argument
    pub fn function_name(&self) -> Option<&str> {
        self.args.first().and_then(Variant::as_str)
    }

    pub fn arg_str(&self, index: usize) -> Option<&str> {
        self.args.get(index).and_then(Variant::as_str)
    }

    pub fn arg_int32(&self, index: usize) -> Option<i32> {
        self.args.get(index).and_then(Variant::as_int32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let frame = FrameBuilder::new(250, 12);
        let bytes = frame.as_bytes();

        assert_eq!(bytes.len(), FRAME_HEADER_SIZE);
        assert_eq!(&bytes[0..4], &4u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &1u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &12i32.to_le_bytes());
        assert_eq!(&bytes[16..20], &8u32.to_le_bytes());
        assert_eq!(&bytes[24..28], &250u32.to_le_bytes());
        assert_eq!(bytes[60], 0);
    }

    #[test]
    fn test_trailing_byte_tracks_arg_count() {
        let frame = FrameBuilder::call("OnConsoleMessage");
        assert_eq!(frame.arg_count(), 1);

        let frame = frame.push("hello").push(5i32).push(Variant::Unused);
        assert_eq!(frame.arg_count(), 3);
        assert_eq!(frame.as_bytes()[60], 3);
    }

    #[test]
    fn test_argument_encoding() {
        let frame = FrameBuilder::call("f").push(-2i32);
        let bytes = frame.into_bytes();

        // index 0, string tag, length 1, "f"
        assert_eq!(&bytes[61..68], &[0, 2, 1, 0, 0, 0, b'f']);
        // index 1, int32 tag, -2
        assert_eq!(&bytes[68..70], &[1, 9]);
        assert_eq!(&bytes[70..74], &(-2i32).to_le_bytes());
        assert_eq!(bytes.len(), 74);
    }

    #[test]
    fn test_parse_built_frame() {
        let frame = FrameBuilder::call("OnSendToServer")
            .push(17091i32)
            .push(0i32)
            .push("127.0.0.1|0|S1");

        let parsed = ParsedFrame::parse(frame.as_bytes()).unwrap();
        assert_eq!(parsed.message_type, 4);
        assert_eq!(parsed.net_id, NO_NET_ID);
        assert_eq!(parsed.function_name(), Some("OnSendToServer"));
        assert_eq!(parsed.arg_int32(1), Some(17091));
        assert_eq!(parsed.arg_str(3), Some("127.0.0.1|0|S1"));
    }

    #[test]
    fn test_parse_truncated() {
        assert!(matches!(
            ParsedFrame::parse(&[4, 0, 0, 0]),
            Err(WireError::Truncated { needed: 61, .. })
        ));

        let mut bytes = FrameBuilder::call("OnConsoleMessage").into_bytes();
        bytes.truncate(bytes.len() - 3);
        assert!(ParsedFrame::parse(&bytes).is_err());
    }
}
