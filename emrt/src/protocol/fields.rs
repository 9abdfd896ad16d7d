//! Layout-driven field codec
//!
//! Per-opcode layouts describe a packet payload as an ordered list of
//! [`FieldType`]s. Encoding walks the layout pulling values from a
//! [`FieldSource`]; decoding walks it pushing values into a [`FieldSink`].
//! Primitives travel big-endian; a byte-array field is greedy and consumes
//! the remaining payload, surfacing on decode as a slice borrowed from the
//! packet buffer (copy it to keep it).

use heapless::Vec;

use crate::core::{Error, Result};

use super::fletcher::Fletcher16;
use super::parser::{FrameConfig, Packet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FieldType {
    U8,
    U16,
    U32,
    /// Greedy tail: consumes the rest of the payload
    U8Array,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue<'a> {
    U8(u8),
    U16(u16),
    U32(u32),
    Bytes(&'a [u8]),
}

/// Provides field values, in layout order, for encoding
pub trait FieldSource {
    fn field(&self, index: usize) -> FieldValue<'_>;
}

/// Accepts decoded field values, in layout order.
///
/// Return false to abort the decode. `FieldValue::Bytes` borrows from the
/// packet being decoded and must be copied if kept.
pub trait FieldSink {
    fn set_field(&mut self, index: usize, value: FieldValue<'_>) -> bool;
}

struct Layout<const MAX_FIELDS: usize> {
    fields: Vec<FieldType, MAX_FIELDS>,
}

impl<const MAX_FIELDS: usize> Layout<MAX_FIELDS> {
    const fn new() -> Self {
        Self { fields: Vec::new() }
    }
}

fn store_layout<const MAX_FIELDS: usize, const OPCODE_SPACE: usize>(
    layouts: &mut [Layout<MAX_FIELDS>; OPCODE_SPACE],
    opcode: u8,
    fields: &[FieldType],
) -> Result<()> {
    let layout = layouts
        .get_mut(opcode as usize)
        .ok_or(Error::InvalidParameter)?;
    if fields.len() > MAX_FIELDS {
        return Err(Error::InvalidParameter);
    }
    layout.fields.clear();
    for &field in fields {
        let _ = layout.fields.push(field);
    }
    Ok(())
}

// -------- Decoder --------

pub struct FieldDecoder<const MAX_FIELDS: usize, const OPCODE_SPACE: usize> {
    layouts: [Layout<MAX_FIELDS>; OPCODE_SPACE],
}

impl<const MAX_FIELDS: usize, const OPCODE_SPACE: usize>
    FieldDecoder<MAX_FIELDS, OPCODE_SPACE>
{
    pub fn new() -> Self {
        Self {
            layouts: core::array::from_fn(|_| Layout::new()),
        }
    }

    /// Register the field layout of an opcode, replacing any previous one
    pub fn set_layout(&mut self, opcode: u8, fields: &[FieldType]) -> Result<()> {
        store_layout(&mut self.layouts, opcode, fields)
    }

    /// Walk the layout of `packet.opcode` over its payload.
    ///
    /// `NotFound` without a registered layout, `InvalidParameter` when the
    /// payload is short or the sink rejects a field.
    pub fn decode_fields<const MAX_PAYLOAD: usize>(
        &self,
        packet: &Packet<MAX_PAYLOAD>,
        sink: &mut impl FieldSink,
    ) -> Result<()> {
        let layout = self
            .layouts
            .get(packet.opcode as usize)
            .ok_or(Error::NotFound)?;
        if layout.fields.is_empty() {
            return Err(Error::NotFound);
        }

        let data = packet.payload();
        let mut offset = 0usize;
        for (index, &ty) in layout.fields.iter().enumerate() {
            let value = match ty {
                FieldType::U8 => {
                    if offset >= data.len() {
                        return Err(Error::InvalidParameter);
                    }
                    let value = FieldValue::U8(data[offset]);
                    offset += 1;
                    value
                }
                FieldType::U16 => {
                    if offset + 2 > data.len() {
                        return Err(Error::InvalidParameter);
                    }
                    let value =
                        FieldValue::U16(u16::from_be_bytes([data[offset], data[offset + 1]]));
                    offset += 2;
                    value
                }
                FieldType::U32 => {
                    if offset + 4 > data.len() {
                        return Err(Error::InvalidParameter);
                    }
                    let value = FieldValue::U32(u32::from_be_bytes([
                        data[offset],
                        data[offset + 1],
                        data[offset + 2],
                        data[offset + 3],
                    ]));
                    offset += 4;
                    value
                }
                FieldType::U8Array => {
                    if offset >= data.len() {
                        return Err(Error::InvalidParameter);
                    }
                    let value = FieldValue::Bytes(&data[offset..]);
                    offset = data.len();
                    value
                }
            };
            if !sink.set_field(index, value) {
                return Err(Error::InvalidParameter);
            }
        }
        Ok(())
    }
}

impl<const MAX_FIELDS: usize, const OPCODE_SPACE: usize> Default
    for FieldDecoder<MAX_FIELDS, OPCODE_SPACE>
{
    fn default() -> Self {
        Self::new()
    }
}

// -------- Encoder --------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EncodeState {
    Sync,
    Opcode,
    LengthHigh,
    LengthLow,
    Payload,
    ChecksumHigh,
    ChecksumLow,
    Complete,
}

pub struct FieldEncoder<C: FrameConfig, const MAX_FIELDS: usize, const OPCODE_SPACE: usize> {
    layouts: [Layout<MAX_FIELDS>; OPCODE_SPACE],

    // Streaming state
    state: EncodeState,
    opcode: u8,
    payload_len: u16,
    sync_index: usize,
    field_index: usize,
    byte_index: usize,
    acc: Fletcher16,
    _config: core::marker::PhantomData<C>,
}

impl<C: FrameConfig, const MAX_FIELDS: usize, const OPCODE_SPACE: usize>
    FieldEncoder<C, MAX_FIELDS, OPCODE_SPACE>
{
    pub fn new() -> Self {
        Self {
            layouts: core::array::from_fn(|_| Layout::new()),
            state: EncodeState::Complete,
            opcode: 0,
            payload_len: 0,
            sync_index: 0,
            field_index: 0,
            byte_index: 0,
            acc: Fletcher16::new(),
            _config: core::marker::PhantomData,
        }
    }

    /// Register the field layout of an opcode, replacing any previous one
    pub fn set_layout(&mut self, opcode: u8, fields: &[FieldType]) -> Result<()> {
        store_layout(&mut self.layouts, opcode, fields)
    }

    /// Payload length the layout of `opcode` produces for `src`
    pub fn payload_length(&self, opcode: u8, src: &impl FieldSource) -> Result<u16> {
        let layout = self
            .layouts
            .get(opcode as usize)
            .ok_or(Error::NotFound)?;
        if layout.fields.is_empty() {
            return Err(Error::NotFound);
        }
        let mut total = 0usize;
        for (index, &ty) in layout.fields.iter().enumerate() {
            total += match (ty, src.field(index)) {
                (FieldType::U8, FieldValue::U8(_)) => 1,
                (FieldType::U16, FieldValue::U16(_)) => 2,
                (FieldType::U32, FieldValue::U32(_)) => 4,
                (FieldType::U8Array, FieldValue::Bytes(bytes)) => bytes.len(),
                _ => return Err(Error::InvalidParameter),
            };
        }
        u16::try_from(total).map_err(|_| Error::InvalidParameter)
    }

    /// Stateless path: emit the whole frame through `out`
    pub fn encode(
        &self,
        opcode: u8,
        src: &impl FieldSource,
        mut out: impl FnMut(u8),
    ) -> Result<()> {
        let payload_len = self.payload_length(opcode, src)?;
        let layout = &self.layouts[opcode as usize];
        let mut acc = Fletcher16::new();

        for &byte in C::SYNC {
            out(byte);
        }

        // The sync pattern stays outside the checksum
        let mut emit = |byte: u8, acc: &mut Fletcher16| {
            acc.add(byte);
            out(byte);
        };
        emit(opcode, &mut acc);
        if C::LENGTH_16BIT {
            emit((payload_len >> 8) as u8, &mut acc);
        }
        emit(payload_len as u8, &mut acc);

        for (index, &ty) in layout.fields.iter().enumerate() {
            match (ty, src.field(index)) {
                (FieldType::U8, FieldValue::U8(value)) => emit(value, &mut acc),
                (FieldType::U16, FieldValue::U16(value)) => {
                    emit((value >> 8) as u8, &mut acc);
                    emit(value as u8, &mut acc);
                }
                (FieldType::U32, FieldValue::U32(value)) => {
                    for shift in [24, 16, 8, 0] {
                        emit((value >> shift) as u8, &mut acc);
                    }
                }
                (FieldType::U8Array, FieldValue::Bytes(bytes)) => {
                    for &byte in bytes {
                        emit(byte, &mut acc);
                    }
                }
                _ => return Err(Error::InvalidParameter),
            }
        }

        let checksum = acc.value();
        out((checksum >> 8) as u8);
        out(checksum as u8);
        Ok(())
    }

    /// Begin a streaming encode for [`Self::encode_step`]
    pub fn start(&mut self, opcode: u8, src: &impl FieldSource) -> Result<()> {
        self.payload_len = self.payload_length(opcode, src)?;
        self.opcode = opcode;
        self.state = EncodeState::Sync;
        self.sync_index = 0;
        self.field_index = 0;
        self.byte_index = 0;
        self.acc.reset();
        Ok(())
    }

    /// Emit exactly one byte per call; `None` once the frame is complete.
    /// `src` must be the source passed to [`Self::start`].
    pub fn encode_step(&mut self, src: &impl FieldSource) -> Option<u8> {
        loop {
            match self.state {
                EncodeState::Sync => {
                    if self.sync_index < C::SYNC.len() {
                        let byte = C::SYNC[self.sync_index];
                        self.sync_index += 1;
                        return Some(byte);
                    }
                    self.state = EncodeState::Opcode;
                }
                EncodeState::Opcode => {
                    let byte = self.opcode;
                    self.acc.add(byte);
                    self.state = if C::LENGTH_16BIT {
                        EncodeState::LengthHigh
                    } else {
                        EncodeState::LengthLow
                    };
                    return Some(byte);
                }
                EncodeState::LengthHigh => {
                    let byte = (self.payload_len >> 8) as u8;
                    self.acc.add(byte);
                    self.state = EncodeState::LengthLow;
                    return Some(byte);
                }
                EncodeState::LengthLow => {
                    let byte = self.payload_len as u8;
                    self.acc.add(byte);
                    self.state = EncodeState::Payload;
                    self.field_index = 0;
                    self.byte_index = 0;
                    return Some(byte);
                }
                EncodeState::Payload => {
                    if let Some(byte) = self.payload_step(src) {
                        return Some(byte);
                    }
                    self.state = EncodeState::ChecksumHigh;
                }
                EncodeState::ChecksumHigh => {
                    let byte = (self.acc.value() >> 8) as u8;
                    self.state = EncodeState::ChecksumLow;
                    return Some(byte);
                }
                EncodeState::ChecksumLow => {
                    let byte = self.acc.value() as u8;
                    self.state = EncodeState::Complete;
                    return Some(byte);
                }
                EncodeState::Complete => return None,
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state == EncodeState::Complete
    }

    fn payload_step(&mut self, src: &impl FieldSource) -> Option<u8> {
        loop {
            let ty = self.layouts[self.opcode as usize]
                .fields
                .get(self.field_index)
                .copied()?;
            let byte = match (ty, src.field(self.field_index)) {
                (FieldType::U8, FieldValue::U8(value)) => {
                    self.field_index += 1;
                    value
                }
                (FieldType::U16, FieldValue::U16(value)) => {
                    let byte = if self.byte_index == 0 {
                        (value >> 8) as u8
                    } else {
                        value as u8
                    };
                    self.byte_index += 1;
                    if self.byte_index == 2 {
                        self.byte_index = 0;
                        self.field_index += 1;
                    }
                    byte
                }
                (FieldType::U32, FieldValue::U32(value)) => {
                    let shift = 24 - 8 * self.byte_index;
                    let byte = (value >> shift) as u8;
                    self.byte_index += 1;
                    if self.byte_index == 4 {
                        self.byte_index = 0;
                        self.field_index += 1;
                    }
                    byte
                }
                (FieldType::U8Array, FieldValue::Bytes(bytes)) => {
                    if self.byte_index < bytes.len() {
                        let byte = bytes[self.byte_index];
                        self.byte_index += 1;
                        byte
                    } else {
                        self.byte_index = 0;
                        self.field_index += 1;
                        continue;
                    }
                }
                // Source no longer matches the layout; end the payload
                _ => return None,
            };
            self.acc.add(byte);
            return Some(byte);
        }
    }
}

impl<C: FrameConfig, const MAX_FIELDS: usize, const OPCODE_SPACE: usize> Default
    for FieldEncoder<C, MAX_FIELDS, OPCODE_SPACE>
{
    fn default() -> Self {
        Self::new()
    }
}
