//! Outer packet envelope

use std::fmt;

use serde::{Deserialize, Serialize};

use super::wire::{OpenDataMessage, WireReader, WireType, WireWriter};
use crate::Result;

// Packet field numbers
const FIELD_TYPE: u32 = 1;
const FIELD_SESSION_KEY: u32 = 2;
const FIELD_IS_ESSENTIAL: u32 = 3;
const FIELD_CONTENT: u32 = 4;
const FIELD_ID: u32 = 5;

/// Discriminator carried in the envelope's type tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PacketType {
    PeriodicData,
    Configuration,
    Marker,
    SessionInfo,
    NewSession,
    EndOfSession,
    /// Any tag this crate does not interpret, kept verbatim.
    Other(String),
}

impl PacketType {
    /// The tag string written on the wire.
    pub fn as_str(&self) -> &str {
        match self {
            PacketType::PeriodicData => "PeriodicData",
            PacketType::Configuration => "Configuration",
            PacketType::Marker => "Marker",
            PacketType::SessionInfo => "SessionInfo",
            PacketType::NewSession => "NewSession",
            PacketType::EndOfSession => "EndOfSession",
            PacketType::Other(tag) => tag,
        }
    }

    /// Parse a wire tag. Unknown tags become [`PacketType::Other`].
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "PeriodicData" => PacketType::PeriodicData,
            "Configuration" => PacketType::Configuration,
            "Marker" => PacketType::Marker,
            "SessionInfo" => PacketType::SessionInfo,
            "NewSession" => PacketType::NewSession,
            "EndOfSession" => PacketType::EndOfSession,
            other => PacketType::Other(other.to_string()),
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tagged envelope wrapping every payload exchanged with the broker.
///
/// `content` holds the serialized inner message selected by `packet_type`.
/// Envelopes are immutable once serialized; build a new one per unit of data.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub packet_type: PacketType,
    pub session_key: String,
    /// Whether the broker must deliver this packet even under backpressure.
    pub is_essential: bool,
    pub content: Vec<u8>,
    /// Per-writer sequence id.
    pub id: u64,
}

impl Packet {
    /// Wrap an inner message in an envelope.
    pub fn wrap<M: OpenDataMessage>(
        packet_type: PacketType,
        session_key: impl Into<String>,
        is_essential: bool,
        message: &M,
        id: u64,
    ) -> Self {
        Self {
            packet_type,
            session_key: session_key.into(),
            is_essential,
            content: message.to_bytes(),
            id,
        }
    }

    /// Decode the inner message.
    pub fn content_as<M: OpenDataMessage>(&self) -> Result<M> {
        M::from_bytes(&self.content)
    }
}

impl OpenDataMessage for Packet {
    const CONTEXT: &'static str = "Packet";

    fn encode_fields(&self, writer: &mut WireWriter) {
        writer.string(FIELD_TYPE, self.packet_type.as_str());
        writer.string(FIELD_SESSION_KEY, &self.session_key);
        writer.bool(FIELD_IS_ESSENTIAL, self.is_essential);
        writer.bytes(FIELD_CONTENT, &self.content);
        writer.uint64(FIELD_ID, self.id);
    }

    fn decode_fields(reader: &mut WireReader<'_>) -> Result<Self> {
        let mut packet_type = String::new();
        let mut session_key = String::new();
        let mut is_essential = false;
        let mut content = Vec::new();
        let mut id = 0;

        while let Some((field, wire_type)) = reader.next_field()? {
            match field {
                FIELD_TYPE => {
                    reader.expect(field, wire_type, WireType::LengthDelimited)?;
                    packet_type = reader.read_string()?;
                }
                FIELD_SESSION_KEY => {
                    reader.expect(field, wire_type, WireType::LengthDelimited)?;
                    session_key = reader.read_string()?;
                }
                FIELD_IS_ESSENTIAL => {
                    reader.expect(field, wire_type, WireType::Varint)?;
                    is_essential = reader.read_bool()?;
                }
                FIELD_CONTENT => {
                    reader.expect(field, wire_type, WireType::LengthDelimited)?;
                    content = reader.read_bytes()?.to_vec();
                }
                FIELD_ID => {
                    reader.expect(field, wire_type, WireType::Varint)?;
                    id = reader.read_varint()?;
                }
                _ => reader.skip(wire_type)?,
            }
        }

        Ok(Self {
            packet_type: PacketType::from_tag(&packet_type),
            session_key,
            is_essential,
            content,
            id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_type_tags() {
        for packet_type in [
            PacketType::PeriodicData,
            PacketType::Configuration,
            PacketType::Marker,
            PacketType::SessionInfo,
            PacketType::NewSession,
            PacketType::EndOfSession,
        ] {
            assert_eq!(PacketType::from_tag(packet_type.as_str()), packet_type);
        }
        assert_eq!(PacketType::from_tag("Event"), PacketType::Other("Event".to_string()));
    }

    #[test]
    fn test_packet_envelope_roundtrip() {
        let packet = Packet {
            packet_type: PacketType::Marker,
            session_key: "a1b2".to_string(),
            is_essential: true,
            content: vec![1, 2, 3],
            id: 42,
        };
        let decoded = Packet::from_bytes(&packet.to_bytes()).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_unknown_fields_are_skipped() {
        let mut writer = WireWriter::new();
        writer.string(FIELD_TYPE, "PeriodicData");
        writer.uint64(99, 7);
        writer.string(100, "future");
        writer.uint64(FIELD_ID, 3);
        let decoded = Packet::from_bytes(&writer.into_bytes()).unwrap();

        assert_eq!(decoded.packet_type, PacketType::PeriodicData);
        assert_eq!(decoded.id, 3);
    }

    #[test]
    fn test_wrong_wire_type_is_rejected() {
        let mut writer = WireWriter::new();
        writer.uint64(FIELD_TYPE, 5);
        assert!(Packet::from_bytes(&writer.into_bytes()).is_err());
    }
}
