//! Session lifecycle, session info and marker packets

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::wire::{OpenDataMessage, WireReader, WireType, WireWriter};
use crate::Result;

/// Point-in-time annotation such as a lap trigger.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MarkerPacket {
    /// Nanoseconds since the Unix epoch.
    pub timestamp: i64,
    pub label: String,
    pub marker_type: String,
    pub description: String,
    pub source: String,
    pub value: f64,
}

const MARKER_FIELD_TIMESTAMP: u32 = 1;
const MARKER_FIELD_LABEL: u32 = 2;
const MARKER_FIELD_TYPE: u32 = 3;
const MARKER_FIELD_DESCRIPTION: u32 = 4;
const MARKER_FIELD_SOURCE: u32 = 5;
const MARKER_FIELD_VALUE: u32 = 6;

impl OpenDataMessage for MarkerPacket {
    const CONTEXT: &'static str = "MarkerPacket";

    fn encode_fields(&self, writer: &mut WireWriter) {
        writer.int64(MARKER_FIELD_TIMESTAMP, self.timestamp);
        writer.string(MARKER_FIELD_LABEL, &self.label);
        writer.string(MARKER_FIELD_TYPE, &self.marker_type);
        writer.string(MARKER_FIELD_DESCRIPTION, &self.description);
        writer.string(MARKER_FIELD_SOURCE, &self.source);
        writer.double(MARKER_FIELD_VALUE, self.value);
    }

    fn decode_fields(reader: &mut WireReader<'_>) -> Result<Self> {
        let mut marker = Self::default();
        while let Some((field, wire_type)) = reader.next_field()? {
            match field {
                MARKER_FIELD_TIMESTAMP => {
                    reader.expect(field, wire_type, WireType::Varint)?;
                    marker.timestamp = reader.read_int64()?;
                }
                MARKER_FIELD_LABEL => {
                    reader.expect(field, wire_type, WireType::LengthDelimited)?;
                    marker.label = reader.read_string()?;
                }
                MARKER_FIELD_TYPE => {
                    reader.expect(field, wire_type, WireType::LengthDelimited)?;
                    marker.marker_type = reader.read_string()?;
                }
                MARKER_FIELD_DESCRIPTION => {
                    reader.expect(field, wire_type, WireType::LengthDelimited)?;
                    marker.description = reader.read_string()?;
                }
                MARKER_FIELD_SOURCE => {
                    reader.expect(field, wire_type, WireType::LengthDelimited)?;
                    marker.source = reader.read_string()?;
                }
                MARKER_FIELD_VALUE => {
                    reader.expect(field, wire_type, WireType::Fixed64)?;
                    marker.value = reader.read_double()?;
                }
                _ => reader.skip(wire_type)?,
            }
        }
        Ok(marker)
    }
}

/// Descriptive session details, sent on its own or inside [`NewSessionPacket`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionInfoPacket {
    pub data_source: String,
    pub identifier: String,
    pub session_type: String,
    pub version: u32,
    pub associate_session_keys: Vec<String>,
    pub details: BTreeMap<String, String>,
}

const INFO_FIELD_DATA_SOURCE: u32 = 1;
const INFO_FIELD_IDENTIFIER: u32 = 2;
const INFO_FIELD_TYPE: u32 = 3;
const INFO_FIELD_VERSION: u32 = 4;
const INFO_FIELD_ASSOCIATES: u32 = 5;
const INFO_FIELD_DETAILS: u32 = 6;
const ENTRY_FIELD_KEY: u32 = 1;
const ENTRY_FIELD_VALUE: u32 = 2;

impl OpenDataMessage for SessionInfoPacket {
    const CONTEXT: &'static str = "SessionInfoPacket";

    fn encode_fields(&self, writer: &mut WireWriter) {
        writer.string(INFO_FIELD_DATA_SOURCE, &self.data_source);
        writer.string(INFO_FIELD_IDENTIFIER, &self.identifier);
        writer.string(INFO_FIELD_TYPE, &self.session_type);
        writer.uint32(INFO_FIELD_VERSION, self.version);
        writer.strings(INFO_FIELD_ASSOCIATES, &self.associate_session_keys);
        // Map entries use the protobuf map encoding: one message per pair
        for (key, value) in &self.details {
            writer.nested(INFO_FIELD_DETAILS, |entry| {
                entry.string(ENTRY_FIELD_KEY, key);
                entry.string(ENTRY_FIELD_VALUE, value);
            });
        }
    }

    fn decode_fields(reader: &mut WireReader<'_>) -> Result<Self> {
        let mut info = Self::default();
        while let Some((field, wire_type)) = reader.next_field()? {
            match field {
                INFO_FIELD_DATA_SOURCE => {
                    reader.expect(field, wire_type, WireType::LengthDelimited)?;
                    info.data_source = reader.read_string()?;
                }
                INFO_FIELD_IDENTIFIER => {
                    reader.expect(field, wire_type, WireType::LengthDelimited)?;
                    info.identifier = reader.read_string()?;
                }
                INFO_FIELD_TYPE => {
                    reader.expect(field, wire_type, WireType::LengthDelimited)?;
                    info.session_type = reader.read_string()?;
                }
                INFO_FIELD_VERSION => {
                    reader.expect(field, wire_type, WireType::Varint)?;
                    info.version = reader.read_uint32()?;
                }
                INFO_FIELD_ASSOCIATES => {
                    reader.expect(field, wire_type, WireType::LengthDelimited)?;
                    info.associate_session_keys.push(reader.read_string()?);
                }
                INFO_FIELD_DETAILS => {
                    reader.expect(field, wire_type, WireType::LengthDelimited)?;
                    let DetailEntry(key, value) = reader.read_message()?;
                    info.details.insert(key, value);
                }
                _ => reader.skip(wire_type)?,
            }
        }
        Ok(info)
    }
}

struct DetailEntry(String, String);

impl OpenDataMessage for DetailEntry {
    const CONTEXT: &'static str = "SessionInfoPacket.DetailsEntry";

    fn encode_fields(&self, writer: &mut WireWriter) {
        writer.string(ENTRY_FIELD_KEY, &self.0);
        writer.string(ENTRY_FIELD_VALUE, &self.1);
    }

    fn decode_fields(reader: &mut WireReader<'_>) -> Result<Self> {
        let mut entry = DetailEntry(String::new(), String::new());
        while let Some((field, wire_type)) = reader.next_field()? {
            match field {
                ENTRY_FIELD_KEY => {
                    reader.expect(field, wire_type, WireType::LengthDelimited)?;
                    entry.0 = reader.read_string()?;
                }
                ENTRY_FIELD_VALUE => {
                    reader.expect(field, wire_type, WireType::LengthDelimited)?;
                    entry.1 = reader.read_string()?;
                }
                _ => reader.skip(wire_type)?,
            }
        }
        Ok(entry)
    }
}

/// Marker opening a session on one stream.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NewSessionPacket {
    pub data_source: String,
    /// Local time offset from UTC in seconds.
    pub utc_offset_secs: i64,
    pub session_info: SessionInfoPacket,
}

const NEW_SESSION_FIELD_DATA_SOURCE: u32 = 1;
const NEW_SESSION_FIELD_UTC_OFFSET: u32 = 2;
const NEW_SESSION_FIELD_INFO: u32 = 3;

impl OpenDataMessage for NewSessionPacket {
    const CONTEXT: &'static str = "NewSessionPacket";

    fn encode_fields(&self, writer: &mut WireWriter) {
        writer.string(NEW_SESSION_FIELD_DATA_SOURCE, &self.data_source);
        writer.int64(NEW_SESSION_FIELD_UTC_OFFSET, self.utc_offset_secs);
        writer.message(NEW_SESSION_FIELD_INFO, &self.session_info);
    }

    fn decode_fields(reader: &mut WireReader<'_>) -> Result<Self> {
        let mut packet = Self::default();
        while let Some((field, wire_type)) = reader.next_field()? {
            match field {
                NEW_SESSION_FIELD_DATA_SOURCE => {
                    reader.expect(field, wire_type, WireType::LengthDelimited)?;
                    packet.data_source = reader.read_string()?;
                }
                NEW_SESSION_FIELD_UTC_OFFSET => {
                    reader.expect(field, wire_type, WireType::Varint)?;
                    packet.utc_offset_secs = reader.read_int64()?;
                }
                NEW_SESSION_FIELD_INFO => {
                    reader.expect(field, wire_type, WireType::LengthDelimited)?;
                    packet.session_info = reader.read_message()?;
                }
                _ => reader.skip(wire_type)?,
            }
        }
        Ok(packet)
    }
}

/// Marker closing a session on one stream.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EndOfSessionPacket {
    pub data_source: String,
}

const END_SESSION_FIELD_DATA_SOURCE: u32 = 1;

impl OpenDataMessage for EndOfSessionPacket {
    const CONTEXT: &'static str = "EndOfSessionPacket";

    fn encode_fields(&self, writer: &mut WireWriter) {
        writer.string(END_SESSION_FIELD_DATA_SOURCE, &self.data_source);
    }

    fn decode_fields(reader: &mut WireReader<'_>) -> Result<Self> {
        let mut packet = Self::default();
        while let Some((field, wire_type)) = reader.next_field()? {
            if field == END_SESSION_FIELD_DATA_SOURCE {
                reader.expect(field, wire_type, WireType::LengthDelimited)?;
                packet.data_source = reader.read_string()?;
            } else {
                reader.skip(wire_type)?;
            }
        }
        Ok(packet)
    }
}
