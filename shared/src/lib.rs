//! Wire protocol shared by the logon gateway and the clients that talk to it.
//!
//! Two layers live here:
//! - the transport envelope ([`Packet`]), bincode-encoded and carried one per UDP datagram
//! - the game messages carried inside `Packet::Data`: a 4-byte message type followed by
//!   either a text command (inbound) or a tagged-variant call frame (outbound)

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod frame;
pub mod text;
pub mod variant;

pub use frame::{FrameBuilder, ParsedFrame};
pub use text::TextScanner;
pub use variant::{Variant, VariantList, VariantType};

pub const PROTOCOL_VERSION: u32 = 1;

/// Largest datagram either side will read. World menus can run to a few kilobytes.
pub const MAX_DATAGRAM_SIZE: usize = 16 * 1024;

/// Message type codes found in the first four bytes of every game message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageType {
    ServerHello = 1,
    GenericText = 2,
    GameMessage = 3,
    GamePacket = 4,
}

impl MessageType {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::ServerHello),
            2 => Some(Self::GenericText),
            3 => Some(Self::GameMessage),
            4 => Some(Self::GamePacket),
            _ => None,
        }
    }
}

/// Transport envelope exchanged over the UDP socket
///
/// `Data` is delivered reliably and in order: the receiver answers every `Data` with an
/// `Ack` carrying its sequence, and the sender repeats unacknowledged data until it is
/// acknowledged or the peer is given up on. `Ping`/`Pong` keep a quiet peer alive.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    Connect {
        client_version: u32,
    },
    Data {
        sequence: u32,
        payload: Vec<u8>,
    },
    /// Sent by the client to leave, and in reply to `Disconnected`
    Disconnect,

    Connected {
        connection_id: u32,
    },
    Disconnected {
        reason: String,
    },

    Ack {
        sequence: u32,
    },
    Ping,
    Pong,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("message truncated: needed {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },

    #[error("unknown variant type tag {0}")]
    UnknownTag(u8),

    #[error("variant slot {0} is out of range")]
    SlotOutOfRange(usize),

    #[error("string payload is not valid UTF-8")]
    InvalidUtf8,
}

/// Inbound game message after the envelope has been stripped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub message_type: u32,
    pub text: String,
}

/// Splits a game message into its type code and text payload.
///
/// The payload's last byte is always treated as the terminator and overwritten, so a
/// client that forgets the trailing zero loses its final character, never more.
pub fn decode_message(payload: &[u8]) -> Result<InboundMessage, WireError> {
    if payload.len() < 4 {
        return Err(WireError::Truncated {
            needed: 4,
            got: payload.len(),
        });
    }

    let message_type = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
    let body = if payload.len() > 4 {
        &payload[4..payload.len() - 1]
    } else {
        &[][..]
    };
    let body = match body.iter().position(|b| *b == 0) {
        Some(end) => &body[..end],
        None => body,
    };

    Ok(InboundMessage {
        message_type,
        text: String::from_utf8_lossy(body).into_owned(),
    })
}

/// Encodes a zero-terminated text message, the format clients send commands in
pub fn encode_text_message(message_type: MessageType, text: &str) -> Vec<u8> {
    let mut data = Vec::with_capacity(text.len() + 5);
    data.extend_from_slice(&(message_type as u32).to_le_bytes());
    data.extend_from_slice(text.as_bytes());
    data.push(0);
    data
}

/// The fixed hello a client expects once its connection has been accepted
pub fn encode_hello() -> Vec<u8> {
    encode_text_message(MessageType::ServerHello, "")
}
