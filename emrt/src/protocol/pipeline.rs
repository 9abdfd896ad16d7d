//! Pipeline glue: byte ring → parser → dispatcher
//!
//! The driver or ISR feeds raw bytes in; a task context calls one of the
//! `process_*` methods to drain the ring, reassemble packets and dispatch
//! them, bounded either by packet count or by bytes consumed.

use super::dispatcher::CommandDispatcher;
use super::parser::{FrameConfig, Packet, PacketParser};
use super::ring::ByteRing;

pub struct PacketPipeline<
    C: FrameConfig,
    const RING_SIZE: usize,
    const MAX_PAYLOAD: usize,
    const MAX_HANDLERS: usize,
> {
    ring: ByteRing<RING_SIZE>,
    parser: PacketParser<C, MAX_PAYLOAD>,
    dispatcher: CommandDispatcher<MAX_HANDLERS, MAX_PAYLOAD>,
}

impl<C: FrameConfig, const RING_SIZE: usize, const MAX_PAYLOAD: usize, const MAX_HANDLERS: usize>
    PacketPipeline<C, RING_SIZE, MAX_PAYLOAD, MAX_HANDLERS>
{
    pub fn new() -> Self {
        Self {
            ring: ByteRing::new(),
            parser: PacketParser::new(),
            dispatcher: CommandDispatcher::new(),
        }
    }

    /// Store one received byte (producer side); false when the ring is full
    pub fn feed_byte(&mut self, byte: u8) -> bool {
        self.ring.push(byte)
    }

    /// Store received bytes (producer side); returns the number stored
    pub fn feed_bytes(&mut self, data: &[u8]) -> usize {
        self.ring.push_n(data)
    }

    /// Drain the ring, dispatching up to `max_packets` completed packets.
    /// Returns the number dispatched.
    pub fn process_available(&mut self, max_packets: usize) -> usize {
        let mut packets = 0;
        while packets < max_packets {
            let Some(byte) = self.ring.pop() else {
                break;
            };
            if self.parser.decode(byte) && self.parser.has_packet() {
                let mut packet = Packet::new();
                if self.parser.get_packet(&mut packet) {
                    self.dispatcher.dispatch(&packet);
                    packets += 1;
                }
            }
        }
        packets
    }

    /// Consume at most `max_bytes` from the ring; useful for time-slicing.
    /// Returns the bytes consumed and reports dispatched packets through
    /// `packets_out`.
    pub fn process_bytes(&mut self, max_bytes: usize, packets_out: &mut usize) -> usize {
        let mut processed = 0;
        *packets_out = 0;
        while processed < max_bytes {
            let Some(byte) = self.ring.pop() else {
                break;
            };
            processed += 1;
            if self.parser.decode(byte) && self.parser.has_packet() {
                let mut packet = Packet::new();
                if self.parser.get_packet(&mut packet) {
                    self.dispatcher.dispatch(&packet);
                    *packets_out += 1;
                }
            }
        }
        processed
    }

    pub fn ring(&self) -> &ByteRing<RING_SIZE> {
        &self.ring
    }

    pub fn parser(&self) -> &PacketParser<C, MAX_PAYLOAD> {
        &self.parser
    }

    pub fn dispatcher(&self) -> &CommandDispatcher<MAX_HANDLERS, MAX_PAYLOAD> {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut CommandDispatcher<MAX_HANDLERS, MAX_PAYLOAD> {
        &mut self.dispatcher
    }
}

impl<C: FrameConfig, const RING_SIZE: usize, const MAX_PAYLOAD: usize, const MAX_HANDLERS: usize>
    Default for PacketPipeline<C, RING_SIZE, MAX_PAYLOAD, MAX_HANDLERS>
{
    fn default() -> Self {
        Self::new()
    }
}
