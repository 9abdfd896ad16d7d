//! Message envelope types

use crate::config;
use crate::core::{Error, MessageFlags, MessagePriority, Result};

/// Receiver id meaning "all subscribers"
pub const BROADCAST_RECEIVER: u16 = 0xffff;

/// Fixed message header, present on every envelope
///
/// `kind` carries the topic id once the message has passed through
/// [`super::Broker::publish`]. A zero `timestamp` or `sequence` is treated
/// as "unset" and stamped by the broker; nonzero values are preserved so
/// producers can measure end-to-end latency and drive their own numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MessageHeader {
    /// Message type; the topic id after publish
    pub kind: u16,
    pub sender_id: u16,
    /// `BROADCAST_RECEIVER` addresses every subscriber
    pub receiver_id: u16,
    pub priority: MessagePriority,
    pub flags: MessageFlags,
    /// Microseconds; 0 = stamp on publish
    pub timestamp: u64,
    /// Valid payload bytes
    pub payload_size: u16,
    /// 0 = assign on publish
    pub sequence: u16,
}

impl MessageHeader {
    pub const fn new() -> Self {
        Self {
            kind: 0,
            sender_id: 0,
            receiver_id: 0,
            priority: MessagePriority::Normal,
            flags: MessageFlags::NONE,
            timestamp: 0,
            payload_size: 0,
            sequence: 0,
        }
    }
}

/// Common surface of every message envelope the broker can route
pub trait Envelope: Clone {
    fn header(&self) -> &MessageHeader;
    fn header_mut(&mut self) -> &mut MessageHeader;

    fn has_flag(&self, flag: MessageFlags) -> bool {
        self.header().flags.contains(flag)
    }
}

/// Inline-payload message envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Message<const N: usize> {
    pub header: MessageHeader,
    pub payload: [u8; N],
}

pub type SmallMessage = Message<{ config::SMALL_PAYLOAD_BYTES }>;
pub type MediumMessage = Message<{ config::MEDIUM_PAYLOAD_BYTES }>;
pub type LargeMessage = Message<{ config::LARGE_PAYLOAD_BYTES }>;

impl<const N: usize> Message<N> {
    pub const CAPACITY: usize = N;

    pub const fn new() -> Self {
        Self {
            header: MessageHeader::new(),
            payload: [0; N],
        }
    }

    pub fn with_payload(data: &[u8]) -> Result<Self> {
        let mut msg = Self::new();
        msg.set_payload(data)?;
        Ok(msg)
    }

    /// The valid payload bytes
    pub fn payload(&self) -> &[u8] {
        let len = (self.header.payload_size as usize).min(N);
        &self.payload[..len]
    }

    pub fn set_payload(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > N {
            return Err(Error::InvalidParameter);
        }
        self.payload[..data.len()].copy_from_slice(data);
        self.header.payload_size = data.len() as u16;
        Ok(())
    }
}

impl<const N: usize> Default for Message<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Envelope for Message<N> {
    fn header(&self) -> &MessageHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }
}

/// Message acknowledgment record
///
/// Travels as the raw little-endian payload of a small message on the
/// configured ACK topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MessageAck {
    pub sequence: u16,
    pub sender_id: u16,
    pub success: bool,
    pub error_code: u8,
}

impl MessageAck {
    pub const WIRE_SIZE: usize = 6;

    pub fn to_bytes(&self) -> [u8; Self::WIRE_SIZE] {
        let mut out = [0; Self::WIRE_SIZE];
        out[0..2].copy_from_slice(&self.sequence.to_le_bytes());
        out[2..4].copy_from_slice(&self.sender_id.to_le_bytes());
        out[4] = u8::from(self.success);
        out[5] = self.error_code;
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::WIRE_SIZE {
            return None;
        }
        Some(Self {
            sequence: u16::from_le_bytes([bytes[0], bytes[1]]),
            sender_id: u16::from_le_bytes([bytes[2], bytes[3]]),
            success: bytes[4] != 0,
            error_code: bytes[5],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_round_trip() {
        let msg = SmallMessage::with_payload(&[1, 2, 3]).unwrap();
        assert_eq!(msg.payload(), &[1, 2, 3]);
        assert_eq!(msg.header.payload_size, 3);

        assert!(SmallMessage::with_payload(&[0; 17]).is_err());
    }

    #[test]
    fn test_ack_wire_image() {
        let ack = MessageAck {
            sequence: 0x1234,
            sender_id: 0x0002,
            success: true,
            error_code: 0,
        };
        let bytes = ack.to_bytes();
        assert_eq!(bytes, [0x34, 0x12, 0x02, 0x00, 0x01, 0x00]);
        assert_eq!(MessageAck::from_bytes(&bytes), Some(ack));
        assert_eq!(MessageAck::from_bytes(&bytes[..5]), None);
    }
}
