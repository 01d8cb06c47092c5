//! Wire-level encoding primitives for the open data protocol
//!
//! Open data packets use protobuf-compatible framing: every field is a key
//! (`field_number << 3 | wire_type`) followed by a varint, a little-endian
//! 64-bit or 32-bit word, or a length-delimited byte run. Readers skip fields
//! they do not know so newer producers stay readable.
//!
//! All reads are bounds checked and report [`TelemetryError::Parse`] with the
//! message being decoded as context.

use crate::{Result, TelemetryError};

// Varints never exceed 10 bytes for a u64
const MAX_VARINT_LEN: usize = 10;

/// Protobuf wire types supported by the open data protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    Varint,
    Fixed64,
    LengthDelimited,
    Fixed32,
}

impl WireType {
    const fn bits(self) -> u64 {
        match self {
            WireType::Varint => 0,
            WireType::Fixed64 => 1,
            WireType::LengthDelimited => 2,
            WireType::Fixed32 => 5,
        }
    }

    fn from_bits(bits: u64, context: &str) -> Result<Self> {
        match bits {
            0 => Ok(WireType::Varint),
            1 => Ok(WireType::Fixed64),
            2 => Ok(WireType::LengthDelimited),
            5 => Ok(WireType::Fixed32),
            other => Err(TelemetryError::parse(
                context,
                format!("Unsupported wire type {}", other),
            )),
        }
    }
}

/// Message types that can be written to and read from open data bytes.
pub trait OpenDataMessage: Sized {
    /// Name used as error context while decoding.
    const CONTEXT: &'static str;

    /// Append this message's fields to the writer.
    fn encode_fields(&self, writer: &mut WireWriter);

    /// Build this message from the reader's remaining fields.
    fn decode_fields(reader: &mut WireReader<'_>) -> Result<Self>;

    /// Serialize the message.
    fn to_bytes(&self) -> Vec<u8> {
        let mut writer = WireWriter::new();
        self.encode_fields(&mut writer);
        writer.into_bytes()
    }

    /// Deserialize a message from a complete byte buffer.
    fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut reader = WireReader::new(data, Self::CONTEXT);
        Self::decode_fields(&mut reader)
    }
}

/// Append-only field writer.
///
/// Scalar helpers omit default values (zero, empty, `false`) the way proto3
/// does. Use the `*_always` variants for oneof members, which must be written
/// even when they hold a default.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn key(&mut self, field: u32, wire_type: WireType) {
        self.varint((u64::from(field) << 3) | wire_type.bits());
    }

    fn varint(&mut self, mut value: u64) {
        while value >= 0x80 {
            self.buf.push((value as u8) | 0x80);
            value >>= 7;
        }
        self.buf.push(value as u8);
    }

    fn length_delimited(&mut self, field: u32, data: &[u8]) {
        self.key(field, WireType::LengthDelimited);
        self.varint(data.len() as u64);
        self.buf.extend_from_slice(data);
    }

    pub fn uint64(&mut self, field: u32, value: u64) {
        if value != 0 {
            self.uint64_always(field, value);
        }
    }

    pub fn uint64_always(&mut self, field: u32, value: u64) {
        self.key(field, WireType::Varint);
        self.varint(value);
    }

    pub fn uint32(&mut self, field: u32, value: u32) {
        self.uint64(field, u64::from(value));
    }

    pub fn int64(&mut self, field: u32, value: i64) {
        self.uint64(field, value as u64);
    }

    /// Negative int32 values are sign-extended to ten bytes, as protobuf does.
    pub fn int32(&mut self, field: u32, value: i32) {
        self.uint64(field, i64::from(value) as u64);
    }

    pub fn bool(&mut self, field: u32, value: bool) {
        if value {
            self.uint64_always(field, 1);
        }
    }

    pub fn double(&mut self, field: u32, value: f64) {
        if value.to_bits() != 0 {
            self.key(field, WireType::Fixed64);
            self.buf.extend_from_slice(&value.to_le_bytes());
        }
    }

    pub fn string(&mut self, field: u32, value: &str) {
        if !value.is_empty() {
            self.length_delimited(field, value.as_bytes());
        }
    }

    /// Write a repeated string field, one entry per element (empty entries included).
    pub fn strings<S: AsRef<str>>(&mut self, field: u32, values: &[S]) {
        for value in values {
            self.length_delimited(field, value.as_ref().as_bytes());
        }
    }

    pub fn bytes(&mut self, field: u32, value: &[u8]) {
        if !value.is_empty() {
            self.length_delimited(field, value);
        }
    }

    /// Write a repeated double field in packed form.
    pub fn packed_doubles(&mut self, field: u32, values: &[f64]) {
        if values.is_empty() {
            return;
        }
        let mut packed = Vec::with_capacity(values.len() * 8);
        for value in values {
            packed.extend_from_slice(&value.to_le_bytes());
        }
        self.length_delimited(field, &packed);
    }

    /// Write an embedded message. Always emitted, even when empty.
    pub fn message<M: OpenDataMessage>(&mut self, field: u32, message: &M) {
        self.nested(field, |nested| message.encode_fields(nested));
    }

    /// Write an embedded message whose fields are produced by `encode`.
    pub fn nested(&mut self, field: u32, encode: impl FnOnce(&mut WireWriter)) {
        let mut nested = WireWriter::new();
        encode(&mut nested);
        self.length_delimited(field, &nested.buf);
    }

    /// Write each element of a repeated message field.
    pub fn messages<M: OpenDataMessage>(&mut self, field: u32, messages: &[M]) {
        for message in messages {
            self.message(field, message);
        }
    }
}

/// Bounds-checked field reader over a borrowed buffer.
#[derive(Debug)]
pub struct WireReader<'a> {
    data: &'a [u8],
    position: usize,
    context: &'static str,
}

impl<'a> WireReader<'a> {
    pub fn new(data: &'a [u8], context: &'static str) -> Self {
        Self { data, position: 0, context }
    }

    fn error(&self, details: impl Into<String>) -> TelemetryError {
        TelemetryError::parse(self.context, details)
    }

    /// Read the next field key, or `None` at the end of the buffer.
    pub fn next_field(&mut self) -> Result<Option<(u32, WireType)>> {
        if self.position >= self.data.len() {
            return Ok(None);
        }

        let key = self.read_varint()?;
        let wire_type = WireType::from_bits(key & 0x7, self.context)?;
        let field = key >> 3;
        if field == 0 || field > u64::from(u32::MAX >> 3) {
            return Err(self.error(format!("Invalid field number {}", field)));
        }

        Ok(Some((field as u32, wire_type)))
    }

    pub fn read_varint(&mut self) -> Result<u64> {
        let mut value = 0u64;
        for index in 0..MAX_VARINT_LEN {
            let byte = *self.data.get(self.position).ok_or_else(|| {
                self.error(format!("Truncated varint at offset {}", self.position))
            })?;
            self.position += 1;

            value |= u64::from(byte & 0x7F) << (7 * index);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(self.error(format!("Varint longer than {} bytes", MAX_VARINT_LEN)))
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.position.checked_add(len).filter(|end| *end <= self.data.len());
        let Some(end) = end else {
            return Err(self.error(format!(
                "Insufficient data at offset {} (need {} bytes, have {})",
                self.position,
                len,
                self.data.len() - self.position
            )));
        };
        let slice = &self.data[self.position..end];
        self.position = end;
        Ok(slice)
    }

    pub fn read_fixed64(&mut self) -> Result<u64> {
        let bytes = self.take(8)?;
        Ok(u64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]))
    }

    pub fn read_fixed32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_varint()?;
        let len = usize::try_from(len)
            .map_err(|_| self.error(format!("Length {} does not fit in memory", len)))?;
        self.take(len)
    }

    pub fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|e| self.error(format!("Invalid UTF-8 string: {}", e)))
    }

    pub fn read_int64(&mut self) -> Result<i64> {
        Ok(self.read_varint()? as i64)
    }

    /// Protobuf int32 keeps the low 32 bits of the varint.
    pub fn read_int32(&mut self) -> Result<i32> {
        Ok(self.read_varint()? as i32)
    }

    pub fn read_uint32(&mut self) -> Result<u32> {
        let value = self.read_varint()?;
        u32::try_from(value).map_err(|_| self.error(format!("Value {} overflows uint32", value)))
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_varint()? != 0)
    }

    pub fn read_double(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_fixed64()?))
    }

    /// Read a repeated double field that may be packed or unpacked.
    pub fn read_doubles_into(&mut self, wire_type: WireType, out: &mut Vec<f64>) -> Result<()> {
        match wire_type {
            WireType::Fixed64 => out.push(self.read_double()?),
            WireType::LengthDelimited => {
                let packed = self.read_bytes()?;
                if packed.len() % 8 != 0 {
                    return Err(self.error(format!(
                        "Packed doubles length {} is not a multiple of 8",
                        packed.len()
                    )));
                }
                out.extend(packed.chunks_exact(8).map(|chunk| {
                    f64::from_le_bytes([
                        chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6],
                        chunk[7],
                    ])
                }));
            }
            other => return Err(self.unexpected(0, other, WireType::Fixed64)),
        }
        Ok(())
    }

    /// Decode an embedded message field.
    pub fn read_message<M: OpenDataMessage>(&mut self) -> Result<M> {
        let bytes = self.read_bytes()?;
        M::from_bytes(bytes)
    }

    /// Skip over a field value of the given wire type.
    pub fn skip(&mut self, wire_type: WireType) -> Result<()> {
        match wire_type {
            WireType::Varint => {
                self.read_varint()?;
            }
            WireType::Fixed64 => {
                self.take(8)?;
            }
            WireType::LengthDelimited => {
                self.read_bytes()?;
            }
            WireType::Fixed32 => {
                self.take(4)?;
            }
        }
        Ok(())
    }

    /// Check a known field arrived with the wire type its schema declares.
    pub fn expect(&self, field: u32, actual: WireType, expected: WireType) -> Result<()> {
        if actual == expected { Ok(()) } else { Err(self.unexpected(field, actual, expected)) }
    }

    fn unexpected(&self, field: u32, actual: WireType, expected: WireType) -> TelemetryError {
        self.error(format!("Field {} has wire type {:?}, expected {:?}", field, actual, expected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn single_varint(value: u64) -> Vec<u8> {
        let mut writer = WireWriter::new();
        writer.uint64_always(1, value);
        writer.into_bytes()
    }

    #[test]
    fn test_varint_known_encodings() {
        assert_eq!(single_varint(1), vec![0x08, 0x01]);
        assert_eq!(single_varint(300), vec![0x08, 0xAC, 0x02]);
    }

    #[test]
    fn test_negative_int32_uses_ten_bytes() {
        let mut writer = WireWriter::new();
        writer.int32(1, -1);
        let bytes = writer.into_bytes();
        assert_eq!(bytes.len(), 11);

        let mut reader = WireReader::new(&bytes, "test");
        assert_eq!(reader.next_field().unwrap(), Some((1, WireType::Varint)));
        assert_eq!(reader.read_int32().unwrap(), -1);
    }

    #[test]
    fn test_defaults_are_omitted() {
        let mut writer = WireWriter::new();
        writer.uint64(1, 0);
        writer.string(2, "");
        writer.bool(3, false);
        writer.double(4, 0.0);
        writer.bytes(5, &[]);
        assert!(writer.into_bytes().is_empty());
    }

    #[test]
    fn test_truncated_length_delimited_is_rejected() {
        // Field 1, length 5, only 2 bytes of payload
        let data = [0x0A, 0x05, b'a', b'b'];
        let mut reader = WireReader::new(&data, "test");
        reader.next_field().unwrap();
        let err = reader.read_bytes().unwrap_err();
        assert!(matches!(err, TelemetryError::Parse { .. }));
    }

    #[test]
    fn test_unterminated_varint_is_rejected() {
        let data = [0x08, 0xFF, 0xFF];
        let mut reader = WireReader::new(&data, "test");
        reader.next_field().unwrap();
        assert!(reader.read_varint().is_err());
    }

    #[test]
    fn test_group_wire_type_is_rejected() {
        // Field 1, wire type 3 (start group)
        let data = [0x0B];
        let mut reader = WireReader::new(&data, "test");
        assert!(reader.next_field().is_err());
    }

    #[test]
    fn test_field_zero_is_rejected() {
        let data = [0x00, 0x01];
        let mut reader = WireReader::new(&data, "test");
        assert!(reader.next_field().is_err());
    }

    #[test]
    fn test_unpacked_doubles_are_accepted() {
        let mut data = vec![0x09];
        data.extend_from_slice(&1.5f64.to_le_bytes());
        data.push(0x09);
        data.extend_from_slice(&(-2.0f64).to_le_bytes());

        let mut reader = WireReader::new(&data, "test");
        let mut values = Vec::new();
        while let Some((_, wire_type)) = reader.next_field().unwrap() {
            reader.read_doubles_into(wire_type, &mut values).unwrap();
        }
        assert_eq!(values, vec![1.5, -2.0]);
    }

    proptest! {
        #[test]
        fn prop_varints_decode_to_written_value(value in any::<u64>()) {
            let bytes = single_varint(value);
            let mut reader = WireReader::new(&bytes, "test");
            prop_assert_eq!(reader.next_field().unwrap(), Some((1, WireType::Varint)));
            prop_assert_eq!(reader.read_varint().unwrap(), value);
            prop_assert_eq!(reader.next_field().unwrap(), None);
        }

        #[test]
        fn prop_arbitrary_bytes_never_panic(data in prop::collection::vec(any::<u8>(), 0..256)) {
            let mut reader = WireReader::new(&data, "fuzz");
            while let Ok(Some((_, wire_type))) = reader.next_field() {
                if reader.skip(wire_type).is_err() {
                    break;
                }
            }
        }
    }
}
