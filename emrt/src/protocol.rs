//! Framed byte-protocol engine
//!
//! Wire format: `SYNC | opcode (1B) | length (1B or 2B BE) | data | checksum (2B BE)`
//! with a Fletcher-16 checksum over `opcode | length | data`. Bytes arrive
//! through an SPSC ring (ISR-safe producer side), a table-driven FSM
//! reassembles packets, and completed packets go to the opcode dispatcher.
//! The field codec maps packet payloads onto application structs from
//! per-opcode layout tables.

mod dispatcher;
mod fields;
mod fletcher;
mod parser;
mod pipeline;
mod ring;

pub use dispatcher::{CommandDispatcher, CommandHandler, RegisterOutcome};
pub use fields::{FieldDecoder, FieldEncoder, FieldSink, FieldSource, FieldType, FieldValue};
pub use fletcher::{fletcher16, Fletcher16};
pub use parser::{DefaultFrame, FrameConfig, Packet, PacketParser, ParserError};
pub use pipeline::PacketPipeline;
pub use ring::ByteRing;
