//! Periodic data payloads
//!
//! A [`PeriodicDataPacket`] carries evenly spaced samples for one or more
//! parameters: sample `j` of every column is taken at
//! `start_time + j * interval` nanoseconds. Column `i` belongs to parameter
//! `i` of the packet's data format, either listed inline or registered under a
//! [`DataFormatId`] with the data format management service.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::wire::{OpenDataMessage, WireReader, WireType, WireWriter};
use crate::Result;

/// Identifier correlating a registered parameter list with periodic packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct DataFormatId(pub u64);

impl fmt::Display for DataFormatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Quality flag attached to every sample.
///
/// Codes this crate does not know are kept as [`DataStatus::Other`] and
/// written back unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DataStatus {
    #[default]
    Unspecified,
    Valid,
    Invalid,
    Missing,
    Other(u64),
}

impl DataStatus {
    pub const fn to_wire(self) -> u64 {
        match self {
            DataStatus::Unspecified => 0,
            DataStatus::Valid => 1,
            DataStatus::Invalid => 2,
            DataStatus::Missing => 3,
            DataStatus::Other(value) => value,
        }
    }

    pub const fn from_wire(value: u64) -> Self {
        match value {
            0 => DataStatus::Unspecified,
            1 => DataStatus::Valid,
            2 => DataStatus::Invalid,
            3 => DataStatus::Missing,
            other => DataStatus::Other(other),
        }
    }
}

/// Where a periodic packet's parameter names come from.
///
/// The two sources are mutually exclusive on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleDataFormat {
    /// Parameters registered with the data format management service.
    Identifier(DataFormatId),
    /// Parameters listed inline, in column order.
    Parameters(Vec<String>),
}

impl SampleDataFormat {
    /// The registered identifier, or the default id when parameters are inline.
    pub fn identifier(&self) -> DataFormatId {
        match self {
            SampleDataFormat::Identifier(id) => *id,
            SampleDataFormat::Parameters(_) => DataFormatId::default(),
        }
    }

    /// Inline parameters, if any are present.
    pub fn embedded_parameters(&self) -> Option<&[String]> {
        match self {
            SampleDataFormat::Parameters(parameters) if !parameters.is_empty() => Some(parameters),
            _ => None,
        }
    }
}

impl Default for SampleDataFormat {
    fn default() -> Self {
        SampleDataFormat::Identifier(DataFormatId::default())
    }
}

const FORMAT_FIELD_IDENTIFIER: u32 = 1;
const FORMAT_FIELD_PARAMETERS: u32 = 2;
const PARAMETER_LIST_FIELD_IDENTIFIERS: u32 = 1;

impl OpenDataMessage for SampleDataFormat {
    const CONTEXT: &'static str = "SampleDataFormat";

    fn encode_fields(&self, writer: &mut WireWriter) {
        match self {
            SampleDataFormat::Identifier(id) => writer.uint64_always(FORMAT_FIELD_IDENTIFIER, id.0),
            SampleDataFormat::Parameters(parameters) => writer.nested(FORMAT_FIELD_PARAMETERS, |list| {
                list.strings(PARAMETER_LIST_FIELD_IDENTIFIERS, parameters)
            }),
        }
    }

    fn decode_fields(reader: &mut WireReader<'_>) -> Result<Self> {
        let mut format = SampleDataFormat::default();

        // Last oneof member on the wire wins
        while let Some((field, wire_type)) = reader.next_field()? {
            match field {
                FORMAT_FIELD_IDENTIFIER => {
                    reader.expect(field, wire_type, WireType::Varint)?;
                    format = SampleDataFormat::Identifier(DataFormatId(reader.read_varint()?));
                }
                FORMAT_FIELD_PARAMETERS => {
                    reader.expect(field, wire_type, WireType::LengthDelimited)?;
                    let ParameterList(parameters) = reader.read_message()?;
                    format = SampleDataFormat::Parameters(parameters);
                }
                _ => reader.skip(wire_type)?,
            }
        }

        Ok(format)
    }
}

struct ParameterList(Vec<String>);

impl OpenDataMessage for ParameterList {
    const CONTEXT: &'static str = "ParameterList";

    fn encode_fields(&self, writer: &mut WireWriter) {
        writer.strings(PARAMETER_LIST_FIELD_IDENTIFIERS, &self.0);
    }

    fn decode_fields(reader: &mut WireReader<'_>) -> Result<Self> {
        let mut parameters = Vec::new();
        while let Some((field, wire_type)) = reader.next_field()? {
            if field == PARAMETER_LIST_FIELD_IDENTIFIERS {
                reader.expect(field, wire_type, WireType::LengthDelimited)?;
                parameters.push(reader.read_string()?);
            } else {
                reader.skip(wire_type)?;
            }
        }
        Ok(Self(parameters))
    }
}

const SAMPLE_FIELD_VALUE: u32 = 1;
const SAMPLE_FIELD_STATUS: u32 = 2;

fn read_status(reader: &mut WireReader<'_>, wire_type: WireType) -> Result<DataStatus> {
    reader.expect(SAMPLE_FIELD_STATUS, wire_type, WireType::Varint)?;
    Ok(DataStatus::from_wire(reader.read_varint()?))
}

/// 64-bit floating point sample.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DoubleSample {
    pub value: f64,
    pub status: DataStatus,
}

impl OpenDataMessage for DoubleSample {
    const CONTEXT: &'static str = "DoubleSample";

    fn encode_fields(&self, writer: &mut WireWriter) {
        writer.double(SAMPLE_FIELD_VALUE, self.value);
        writer.uint64(SAMPLE_FIELD_STATUS, self.status.to_wire());
    }

    fn decode_fields(reader: &mut WireReader<'_>) -> Result<Self> {
        let mut sample = Self::default();
        while let Some((field, wire_type)) = reader.next_field()? {
            match field {
                SAMPLE_FIELD_VALUE => {
                    reader.expect(field, wire_type, WireType::Fixed64)?;
                    sample.value = reader.read_double()?;
                }
                SAMPLE_FIELD_STATUS => sample.status = read_status(reader, wire_type)?,
                _ => reader.skip(wire_type)?,
            }
        }
        Ok(sample)
    }
}

/// 32-bit integer sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Int32Sample {
    pub value: i32,
    pub status: DataStatus,
}

impl OpenDataMessage for Int32Sample {
    const CONTEXT: &'static str = "Int32Sample";

    fn encode_fields(&self, writer: &mut WireWriter) {
        writer.int32(SAMPLE_FIELD_VALUE, self.value);
        writer.uint64(SAMPLE_FIELD_STATUS, self.status.to_wire());
    }

    fn decode_fields(reader: &mut WireReader<'_>) -> Result<Self> {
        let mut sample = Self::default();
        while let Some((field, wire_type)) = reader.next_field()? {
            match field {
                SAMPLE_FIELD_VALUE => {
                    reader.expect(field, wire_type, WireType::Varint)?;
                    sample.value = reader.read_int32()?;
                }
                SAMPLE_FIELD_STATUS => sample.status = read_status(reader, wire_type)?,
                _ => reader.skip(wire_type)?,
            }
        }
        Ok(sample)
    }
}

/// Boolean sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BoolSample {
    pub value: bool,
    pub status: DataStatus,
}

impl OpenDataMessage for BoolSample {
    const CONTEXT: &'static str = "BoolSample";

    fn encode_fields(&self, writer: &mut WireWriter) {
        writer.bool(SAMPLE_FIELD_VALUE, self.value);
        writer.uint64(SAMPLE_FIELD_STATUS, self.status.to_wire());
    }

    fn decode_fields(reader: &mut WireReader<'_>) -> Result<Self> {
        let mut sample = Self::default();
        while let Some((field, wire_type)) = reader.next_field()? {
            match field {
                SAMPLE_FIELD_VALUE => {
                    reader.expect(field, wire_type, WireType::Varint)?;
                    sample.value = reader.read_bool()?;
                }
                SAMPLE_FIELD_STATUS => sample.status = read_status(reader, wire_type)?,
                _ => reader.skip(wire_type)?,
            }
        }
        Ok(sample)
    }
}

/// Wire wrapper for a homogeneous repeated sample field.
struct SampleList<S>(Vec<S>);

const SAMPLE_LIST_FIELD_SAMPLES: u32 = 1;

impl<S: OpenDataMessage> OpenDataMessage for SampleList<S> {
    const CONTEXT: &'static str = "SampleList";

    fn encode_fields(&self, writer: &mut WireWriter) {
        writer.messages(SAMPLE_LIST_FIELD_SAMPLES, &self.0);
    }

    fn decode_fields(reader: &mut WireReader<'_>) -> Result<Self> {
        let mut samples = Vec::new();
        while let Some((field, wire_type)) = reader.next_field()? {
            if field == SAMPLE_LIST_FIELD_SAMPLES {
                reader.expect(field, wire_type, WireType::LengthDelimited)?;
                samples.push(reader.read_message()?);
            } else {
                reader.skip(wire_type)?;
            }
        }
        Ok(Self(samples))
    }
}

fn write_sample_list<S: OpenDataMessage>(writer: &mut WireWriter, field: u32, samples: &[S]) {
    writer.nested(field, |list| list.messages(SAMPLE_LIST_FIELD_SAMPLES, samples));
}

/// One parameter's samples within a periodic packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SampleColumn {
    Double(Vec<DoubleSample>),
    Int32(Vec<Int32Sample>),
    Bool(Vec<BoolSample>),
    /// Column whose sample list was not set by the producer.
    Empty,
}

impl SampleColumn {
    /// Number of samples in the column.
    pub fn len(&self) -> usize {
        match self {
            SampleColumn::Double(samples) => samples.len(),
            SampleColumn::Int32(samples) => samples.len(),
            SampleColumn::Bool(samples) => samples.len(),
            SampleColumn::Empty => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

const COLUMN_FIELD_DOUBLE: u32 = 1;
const COLUMN_FIELD_INT32: u32 = 2;
const COLUMN_FIELD_BOOL: u32 = 3;

impl OpenDataMessage for SampleColumn {
    const CONTEXT: &'static str = "SampleColumn";

    fn encode_fields(&self, writer: &mut WireWriter) {
        match self {
            SampleColumn::Double(samples) => write_sample_list(writer, COLUMN_FIELD_DOUBLE, samples),
            SampleColumn::Int32(samples) => write_sample_list(writer, COLUMN_FIELD_INT32, samples),
            SampleColumn::Bool(samples) => write_sample_list(writer, COLUMN_FIELD_BOOL, samples),
            SampleColumn::Empty => {}
        }
    }

    fn decode_fields(reader: &mut WireReader<'_>) -> Result<Self> {
        let mut column = SampleColumn::Empty;
        while let Some((field, wire_type)) = reader.next_field()? {
            match field {
                COLUMN_FIELD_DOUBLE => {
                    reader.expect(field, wire_type, WireType::LengthDelimited)?;
                    let SampleList(samples) = reader.read_message()?;
                    column = SampleColumn::Double(samples);
                }
                COLUMN_FIELD_INT32 => {
                    reader.expect(field, wire_type, WireType::LengthDelimited)?;
                    let SampleList(samples) = reader.read_message()?;
                    column = SampleColumn::Int32(samples);
                }
                COLUMN_FIELD_BOOL => {
                    reader.expect(field, wire_type, WireType::LengthDelimited)?;
                    let SampleList(samples) = reader.read_message()?;
                    column = SampleColumn::Bool(samples);
                }
                _ => reader.skip(wire_type)?,
            }
        }
        Ok(column)
    }
}

/// Time-series payload of evenly spaced samples.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PeriodicDataPacket {
    pub data_format: SampleDataFormat,
    /// Timestamp of the first sample, nanoseconds since the Unix epoch.
    pub start_time: i64,
    /// Spacing between samples in nanoseconds.
    pub interval: i64,
    pub columns: Vec<SampleColumn>,
}

impl PeriodicDataPacket {
    /// Timestamp of sample `index`, or `None` on overflow.
    pub fn timestamp_at(&self, index: usize) -> Option<i64> {
        let index = i64::try_from(index).ok()?;
        self.interval.checked_mul(index)?.checked_add(self.start_time)
    }
}

const PERIODIC_FIELD_DATA_FORMAT: u32 = 1;
const PERIODIC_FIELD_START_TIME: u32 = 2;
const PERIODIC_FIELD_INTERVAL: u32 = 3;
const PERIODIC_FIELD_COLUMNS: u32 = 4;

impl OpenDataMessage for PeriodicDataPacket {
    const CONTEXT: &'static str = "PeriodicDataPacket";

    fn encode_fields(&self, writer: &mut WireWriter) {
        writer.message(PERIODIC_FIELD_DATA_FORMAT, &self.data_format);
        writer.int64(PERIODIC_FIELD_START_TIME, self.start_time);
        writer.int64(PERIODIC_FIELD_INTERVAL, self.interval);
        writer.messages(PERIODIC_FIELD_COLUMNS, &self.columns);
    }

    fn decode_fields(reader: &mut WireReader<'_>) -> Result<Self> {
        let mut packet = Self::default();
        while let Some((field, wire_type)) = reader.next_field()? {
            match field {
                PERIODIC_FIELD_DATA_FORMAT => {
                    reader.expect(field, wire_type, WireType::LengthDelimited)?;
                    packet.data_format = reader.read_message()?;
                }
                PERIODIC_FIELD_START_TIME => {
                    reader.expect(field, wire_type, WireType::Varint)?;
                    packet.start_time = reader.read_int64()?;
                }
                PERIODIC_FIELD_INTERVAL => {
                    reader.expect(field, wire_type, WireType::Varint)?;
                    packet.interval = reader.read_int64()?;
                }
                PERIODIC_FIELD_COLUMNS => {
                    reader.expect(field, wire_type, WireType::LengthDelimited)?;
                    packet.columns.push(reader.read_message()?);
                }
                _ => reader.skip(wire_type)?,
            }
        }
        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(value: f64, status: DataStatus) -> DoubleSample {
        DoubleSample { value, status }
    }

    #[test]
    fn test_periodic_packet_roundtrip_with_identifier() {
        let packet = PeriodicDataPacket {
            data_format: SampleDataFormat::Identifier(DataFormatId(17)),
            start_time: 1_700_000_000_000_000_000,
            interval: 10_000_000,
            columns: vec![
                SampleColumn::Double(vec![
                    sample(0.0, DataStatus::Valid),
                    sample(-1.25, DataStatus::Invalid),
                ]),
                SampleColumn::Int32(vec![Int32Sample { value: -7, status: DataStatus::Valid }]),
                SampleColumn::Bool(vec![BoolSample { value: true, status: DataStatus::Missing }]),
            ],
        };

        let decoded = PeriodicDataPacket::from_bytes(&packet.to_bytes()).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_identifier_zero_survives_roundtrip() {
        let format = SampleDataFormat::Identifier(DataFormatId(0));
        let decoded = SampleDataFormat::from_bytes(&format.to_bytes()).unwrap();
        assert_eq!(decoded, format);
    }

    #[test]
    fn test_embedded_parameters_roundtrip() {
        let format = SampleDataFormat::Parameters(vec!["A".into(), "vCar:Chassis".into()]);
        let decoded = SampleDataFormat::from_bytes(&format.to_bytes()).unwrap();
        assert_eq!(decoded.embedded_parameters().map(<[String]>::len), Some(2));
        assert_eq!(decoded, format);
    }

    #[test]
    fn test_empty_parameter_list_is_not_embedded() {
        let format = SampleDataFormat::Parameters(Vec::new());
        assert!(format.embedded_parameters().is_none());
        assert_eq!(format.identifier(), DataFormatId(0));
    }

    #[test]
    fn test_empty_column_list_decodes() {
        let packet = PeriodicDataPacket {
            columns: vec![SampleColumn::Double(Vec::new()), SampleColumn::Empty],
            ..Default::default()
        };
        let decoded = PeriodicDataPacket::from_bytes(&packet.to_bytes()).unwrap();
        assert_eq!(decoded.columns.len(), 2);
        assert_eq!(decoded.columns[0], SampleColumn::Double(Vec::new()));
        assert_eq!(decoded.columns[1], SampleColumn::Empty);
    }

    #[test]
    fn test_unknown_status_is_kept_and_written_back() {
        let mut writer = WireWriter::new();
        writer.uint64(SAMPLE_FIELD_STATUS, 42);

        let sample = DoubleSample::from_bytes(&writer.into_bytes()).unwrap();
        assert_eq!(sample.status, DataStatus::Other(42));

        let reread = DoubleSample::from_bytes(&sample.to_bytes()).unwrap();
        assert_eq!(reread.status, DataStatus::Other(42));
    }

    #[test]
    fn test_timestamp_at() {
        let packet = PeriodicDataPacket { start_time: 100, interval: 10, ..Default::default() };
        assert_eq!(packet.timestamp_at(0), Some(100));
        assert_eq!(packet.timestamp_at(7), Some(170));

        let overflowing = PeriodicDataPacket { start_time: i64::MAX, interval: 1, ..Default::default() };
        assert_eq!(overflowing.timestamp_at(1), None);
    }
}
