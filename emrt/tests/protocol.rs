use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use emrt::protocol::{
    fletcher16, ByteRing, CommandDispatcher, DefaultFrame, FieldDecoder, FieldEncoder, FieldSink,
    FieldSource, FieldType, FieldValue, Packet, PacketParser, PacketPipeline, ParserError,
    RegisterOutcome,
};

type TestParser = PacketParser<DefaultFrame, 64>;
type TestPacket = Packet<64>;

fn feed(parser: &mut TestParser, bytes: &[u8]) -> Option<TestPacket> {
    let mut out = None;
    for &byte in bytes {
        if parser.decode(byte) {
            let mut packet = TestPacket::new();
            assert!(parser.get_packet(&mut packet));
            out = Some(packet);
        }
    }
    out
}

fn frame(opcode: u8, payload: &[u8]) -> Vec<u8> {
    let mut bytes = vec![0x55, 0xaa, opcode];
    let len = payload.len() as u16;
    bytes.push((len >> 8) as u8);
    bytes.push(len as u8);
    bytes.extend_from_slice(payload);
    let checksum = {
        let mut body = vec![opcode, (len >> 8) as u8, len as u8];
        body.extend_from_slice(payload);
        fletcher16(&body)
    };
    bytes.push((checksum >> 8) as u8);
    bytes.push(checksum as u8);
    bytes
}

#[test]
fn test_parser_happy_path() {
    let mut parser = TestParser::new();

    let checksum = fletcher16(&[0x04, 0x00, 0x02, 0xde, 0xad]);
    let mut stream = vec![0x55, 0xaa, 0x04, 0x00, 0x02, 0xde, 0xad];
    stream.push((checksum >> 8) as u8);
    stream.push(checksum as u8);

    // No packet before the final checksum byte
    for &byte in &stream[..stream.len() - 1] {
        assert!(!parser.decode(byte));
    }
    assert!(parser.decode(stream[stream.len() - 1]));

    let mut packet = TestPacket::new();
    assert!(parser.get_packet(&mut packet));
    assert_eq!(packet.opcode, 0x04);
    assert_eq!(packet.length, 2);
    assert_eq!(packet.payload(), &[0xde, 0xad]);
    assert_eq!(packet.checksum, checksum);

    // Ready flag clears on get_packet
    assert!(!parser.has_packet());
    assert!(!parser.get_packet(&mut packet));
}

#[test]
fn test_parser_resync_on_repeated_sync_byte() {
    let mut parser = TestParser::new();

    let checksum = fletcher16(&[0x01, 0x00, 0x00]);
    let mut stream = vec![0x55, 0x55, 0xaa, 0x01, 0x00, 0x00];
    stream.push((checksum >> 8) as u8);
    stream.push(checksum as u8);

    let packet = feed(&mut parser, &stream).expect("resync should produce a packet");
    assert_eq!(packet.opcode, 0x01);
    assert_eq!(packet.length, 0);
}

#[test]
fn test_parser_zero_length_validates_checksum() {
    let mut parser = TestParser::new();

    // Wrong checksum over opcode | length
    let stream = [0x55, 0xaa, 0x01, 0x00, 0x00, 0xff, 0xff];
    assert!(feed(&mut parser, &stream).is_none());
    assert_eq!(parser.last_error(), Some(ParserError::ChecksumMismatch));

    // The parser recovers on the next good frame and clears the error
    let packet = feed(&mut parser, &frame(0x07, &[])).expect("recovery frame");
    assert_eq!(packet.opcode, 0x07);
    assert_eq!(parser.last_error(), None);
}

#[test]
fn test_parser_length_overflow() {
    let mut parser = TestParser::new();

    // 65 > 64-byte payload capacity
    assert!(feed(&mut parser, &[0x55, 0xaa, 0x01, 0x00, 0x41]).is_none());
    assert_eq!(parser.last_error(), Some(ParserError::LengthOverflow));

    let packet = feed(&mut parser, &frame(0x02, &[0x11])).expect("parser recovered");
    assert_eq!(packet.payload(), &[0x11]);
}

#[test]
fn test_parser_garbage_between_frames() {
    let mut parser = TestParser::new();

    let mut stream = vec![0x00, 0x13, 0x55, 0x01, 0xaa];
    stream.extend_from_slice(&frame(0x09, &[1, 2, 3]));
    let packet = feed(&mut parser, &stream).expect("frame after garbage");
    assert_eq!(packet.opcode, 0x09);
    assert_eq!(packet.payload(), &[1, 2, 3]);
}

static DISPATCHED: AtomicU32 = AtomicU32::new(0);
static LAST_OPCODE: AtomicU8 = AtomicU8::new(0);

fn count_handler(packet: &Packet<64>) {
    DISPATCHED.fetch_add(1, Ordering::SeqCst);
    LAST_OPCODE.store(packet.opcode, Ordering::SeqCst);
}

fn other_handler(_packet: &Packet<64>) {
    DISPATCHED.fetch_add(100, Ordering::SeqCst);
}

#[test]
fn test_dispatcher_register_replace_deregister() {
    let mut dispatcher: CommandDispatcher<4, 64> = CommandDispatcher::new();

    assert_eq!(
        dispatcher.register_handler(0x10, count_handler),
        Ok(RegisterOutcome::New)
    );
    // Replace-on-register leaves the count unchanged
    assert_eq!(
        dispatcher.register_handler(0x10, count_handler),
        Ok(RegisterOutcome::Replaced)
    );
    assert_eq!(dispatcher.len(), 1);

    for opcode in 0x11..0x14 {
        assert_eq!(
            dispatcher.register_handler(opcode, other_handler),
            Ok(RegisterOutcome::New)
        );
    }
    assert!(dispatcher.register_handler(0x20, other_handler).is_err());

    assert!(dispatcher.deregister_handler(0x12));
    assert!(!dispatcher.deregister_handler(0x12));
    assert!(dispatcher.has_handler(0x13));
    assert_eq!(dispatcher.len(), 3);
}

#[test]
fn test_dispatcher_fallback() {
    let mut dispatcher: CommandDispatcher<4, 64> = CommandDispatcher::new();
    dispatcher.register_handler(0x01, count_handler).unwrap();
    dispatcher.set_fallback_handler(other_handler);

    DISPATCHED.store(0, Ordering::SeqCst);
    let mut packet = Packet::<64>::new();
    packet.opcode = 0x01;
    dispatcher.dispatch(&packet);
    assert_eq!(DISPATCHED.load(Ordering::SeqCst), 1);

    packet.opcode = 0x77;
    dispatcher.dispatch(&packet);
    assert_eq!(DISPATCHED.load(Ordering::SeqCst), 101);
}

#[test]
fn test_pipeline_feeds_and_dispatches() {
    let mut pipeline: PacketPipeline<DefaultFrame, 128, 64, 4> = PacketPipeline::new();
    pipeline
        .dispatcher_mut()
        .register_handler(0x21, count_handler)
        .unwrap();

    DISPATCHED.store(0, Ordering::SeqCst);
    let first = frame(0x21, &[0xab]);
    let second = frame(0x21, &[0xcd]);
    assert_eq!(pipeline.feed_bytes(&first), first.len());
    // A stray byte between frames is skipped by sync search
    assert!(pipeline.feed_byte(0x00));
    assert_eq!(pipeline.feed_bytes(&second), second.len());

    // Bounded processing: one packet per call
    assert_eq!(pipeline.process_available(1), 1);
    assert_eq!(DISPATCHED.load(Ordering::SeqCst), 1);
    assert_eq!(LAST_OPCODE.load(Ordering::SeqCst), 0x21);

    let mut packets = 0;
    let consumed = pipeline.process_bytes(usize::MAX, &mut packets);
    assert_eq!(consumed, second.len() + 1);
    assert_eq!(packets, 1);
    assert_eq!(DISPATCHED.load(Ordering::SeqCst), 2);
    assert!(pipeline.ring().is_empty());
}

// -------- Field codec --------

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct QueryStatus {
    device: u8,
    address: u16,
    serial: u32,
    blob: Vec<u8>,
}

const QUERY_LAYOUT: &[FieldType] = &[
    FieldType::U8,
    FieldType::U16,
    FieldType::U32,
    FieldType::U8Array,
];

impl FieldSource for QueryStatus {
    fn field(&self, index: usize) -> FieldValue<'_> {
        match index {
            0 => FieldValue::U8(self.device),
            1 => FieldValue::U16(self.address),
            2 => FieldValue::U32(self.serial),
            _ => FieldValue::Bytes(&self.blob),
        }
    }
}

impl FieldSink for QueryStatus {
    fn set_field(&mut self, index: usize, value: FieldValue<'_>) -> bool {
        match (index, value) {
            (0, FieldValue::U8(v)) => self.device = v,
            (1, FieldValue::U16(v)) => self.address = v,
            (2, FieldValue::U32(v)) => self.serial = v,
            (3, FieldValue::Bytes(v)) => self.blob = v.to_vec(),
            _ => return false,
        }
        true
    }
}

fn sample() -> QueryStatus {
    QueryStatus {
        device: 0x42,
        address: 0xbeef,
        serial: 0x0102_0304,
        blob: vec![9, 8, 7],
    }
}

#[test]
fn test_codec_round_trip() {
    let mut encoder: FieldEncoder<DefaultFrame, 8, 64> = FieldEncoder::new();
    let mut decoder: FieldDecoder<8, 64> = FieldDecoder::new();
    encoder.set_layout(0x30, QUERY_LAYOUT).unwrap();
    decoder.set_layout(0x30, QUERY_LAYOUT).unwrap();

    let source = sample();
    let mut wire = Vec::new();
    encoder.encode(0x30, &source, |byte| wire.push(byte)).unwrap();

    // 1 + 2 + 4 + 3 payload bytes
    assert_eq!(encoder.payload_length(0x30, &source).unwrap(), 10);
    assert_eq!(wire.len(), 2 + 1 + 2 + 10 + 2);
    // Big-endian primitives on the wire
    assert_eq!(&wire[5..12], &[0x42, 0xbe, 0xef, 0x01, 0x02, 0x03, 0x04]);

    let mut parser = TestParser::new();
    let packet = feed(&mut parser, &wire).expect("encoded frame parses");
    assert_eq!(packet.opcode, 0x30);

    let mut decoded = QueryStatus::default();
    decoder.decode_fields(&packet, &mut decoded).unwrap();
    assert_eq!(decoded, source);
}

#[test]
fn test_codec_streaming_matches_stateless() {
    let mut encoder: FieldEncoder<DefaultFrame, 8, 64> = FieldEncoder::new();
    encoder.set_layout(0x30, QUERY_LAYOUT).unwrap();
    let source = sample();

    let mut stateless = Vec::new();
    encoder
        .encode(0x30, &source, |byte| stateless.push(byte))
        .unwrap();

    let mut streamed = Vec::new();
    encoder.start(0x30, &source).unwrap();
    while let Some(byte) = encoder.encode_step(&source) {
        streamed.push(byte);
    }
    assert!(encoder.is_complete());
    assert_eq!(streamed, stateless);
}

#[test]
fn test_codec_errors() {
    let mut encoder: FieldEncoder<DefaultFrame, 8, 64> = FieldEncoder::new();
    let decoder: FieldDecoder<8, 64> = FieldDecoder::new();

    // No layout registered
    assert!(encoder.encode(0x31, &sample(), |_| {}).is_err());
    let mut decoded = QueryStatus::default();
    let packet = Packet::<64>::new();
    assert!(decoder.decode_fields(&packet, &mut decoded).is_err());

    // Too many fields for the table
    let wide = [FieldType::U8; 9];
    assert!(encoder.set_layout(0x32, &wide).is_err());

    // Truncated payload fails the decode
    let mut decoder: FieldDecoder<8, 64> = FieldDecoder::new();
    decoder
        .set_layout(0x33, &[FieldType::U32])
        .unwrap();
    let mut short = Packet::<64>::new();
    short.opcode = 0x33;
    short.length = 2;
    assert!(decoder.decode_fields(&short, &mut decoded).is_err());
}

#[test]
fn test_byte_ring_against_parser() {
    // Split delivery across ring pushes must not disturb parsing
    let mut ring: ByteRing<32> = ByteRing::new();
    let mut parser = TestParser::new();
    let stream = frame(0x05, &[0xaa, 0xbb]);

    let (head, tail) = stream.split_at(4);
    assert_eq!(ring.push_n(head), head.len());
    let mut packet_seen = false;
    while let Some(byte) = ring.pop() {
        packet_seen |= parser.decode(byte);
    }
    assert_eq!(ring.push_n(tail), tail.len());
    while let Some(byte) = ring.pop() {
        packet_seen |= parser.decode(byte);
    }
    assert!(packet_seen);
}
