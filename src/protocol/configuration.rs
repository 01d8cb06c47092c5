//! Configuration (schema) packets
//!
//! A configuration packet describes the parameters and groups a writer will
//! publish. Recorders need it before any periodic data on the session.

use serde::{Deserialize, Serialize};

use super::wire::{OpenDataMessage, WireReader, WireType, WireWriter};
use crate::{Result, TelemetryError};

/// Declared storage type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DataType {
    #[default]
    Unspecified,
    Float32,
    Float64,
    Int8,
    Int16,
    Int32,
    Int64,
    Bool,
    String,
}

impl DataType {
    pub const fn to_wire(self) -> u64 {
        match self {
            DataType::Unspecified => 0,
            DataType::Float32 => 1,
            DataType::Float64 => 2,
            DataType::Int8 => 3,
            DataType::Int16 => 4,
            DataType::Int32 => 5,
            DataType::Int64 => 6,
            DataType::Bool => 7,
            DataType::String => 8,
        }
    }

    pub fn from_wire(value: u64) -> Result<Self> {
        Ok(match value {
            0 => DataType::Unspecified,
            1 => DataType::Float32,
            2 => DataType::Float64,
            3 => DataType::Int8,
            4 => DataType::Int16,
            5 => DataType::Int32,
            6 => DataType::Int64,
            7 => DataType::Bool,
            8 => DataType::String,
            other => {
                return Err(TelemetryError::parse("DataType", format!("Unknown data type {}", other)));
            }
        })
    }
}

/// Definition of one published parameter.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParameterDefinition {
    /// Fully qualified identifier, `name:application`.
    pub identifier: String,
    pub name: String,
    pub application_name: String,
    pub description: String,
    pub groups: Vec<String>,
    pub units: String,
    pub data_type: DataType,
    pub format_string: String,
    pub min_value: f64,
    pub max_value: f64,
    pub warning_min_value: f64,
    pub warning_max_value: f64,
    /// Nominal sample rates in Hz.
    pub frequencies: Vec<f64>,
    pub includes_row_data: bool,
    pub includes_synchro_data: bool,
}

const PARAM_FIELD_IDENTIFIER: u32 = 1;
const PARAM_FIELD_NAME: u32 = 2;
const PARAM_FIELD_APPLICATION: u32 = 3;
const PARAM_FIELD_DESCRIPTION: u32 = 4;
const PARAM_FIELD_GROUPS: u32 = 5;
const PARAM_FIELD_UNITS: u32 = 6;
const PARAM_FIELD_DATA_TYPE: u32 = 7;
const PARAM_FIELD_FORMAT: u32 = 8;
const PARAM_FIELD_MIN: u32 = 9;
const PARAM_FIELD_MAX: u32 = 10;
const PARAM_FIELD_WARNING_MIN: u32 = 11;
const PARAM_FIELD_WARNING_MAX: u32 = 12;
const PARAM_FIELD_FREQUENCIES: u32 = 13;
const PARAM_FIELD_ROW_DATA: u32 = 14;
const PARAM_FIELD_SYNCHRO_DATA: u32 = 15;

impl OpenDataMessage for ParameterDefinition {
    const CONTEXT: &'static str = "ParameterDefinition";

    fn encode_fields(&self, writer: &mut WireWriter) {
        writer.string(PARAM_FIELD_IDENTIFIER, &self.identifier);
        writer.string(PARAM_FIELD_NAME, &self.name);
        writer.string(PARAM_FIELD_APPLICATION, &self.application_name);
        writer.string(PARAM_FIELD_DESCRIPTION, &self.description);
        writer.strings(PARAM_FIELD_GROUPS, &self.groups);
        writer.string(PARAM_FIELD_UNITS, &self.units);
        writer.uint64(PARAM_FIELD_DATA_TYPE, self.data_type.to_wire());
        writer.string(PARAM_FIELD_FORMAT, &self.format_string);
        writer.double(PARAM_FIELD_MIN, self.min_value);
        writer.double(PARAM_FIELD_MAX, self.max_value);
        writer.double(PARAM_FIELD_WARNING_MIN, self.warning_min_value);
        writer.double(PARAM_FIELD_WARNING_MAX, self.warning_max_value);
        writer.packed_doubles(PARAM_FIELD_FREQUENCIES, &self.frequencies);
        writer.bool(PARAM_FIELD_ROW_DATA, self.includes_row_data);
        writer.bool(PARAM_FIELD_SYNCHRO_DATA, self.includes_synchro_data);
    }

    fn decode_fields(reader: &mut WireReader<'_>) -> Result<Self> {
        let mut definition = Self::default();
        while let Some((field, wire_type)) = reader.next_field()? {
            match field {
                PARAM_FIELD_IDENTIFIER
                | PARAM_FIELD_NAME
                | PARAM_FIELD_APPLICATION
                | PARAM_FIELD_DESCRIPTION
                | PARAM_FIELD_GROUPS
                | PARAM_FIELD_UNITS
                | PARAM_FIELD_FORMAT => {
                    reader.expect(field, wire_type, WireType::LengthDelimited)?;
                    let value = reader.read_string()?;
                    match field {
                        PARAM_FIELD_IDENTIFIER => definition.identifier = value,
                        PARAM_FIELD_NAME => definition.name = value,
                        PARAM_FIELD_APPLICATION => definition.application_name = value,
                        PARAM_FIELD_DESCRIPTION => definition.description = value,
                        PARAM_FIELD_GROUPS => definition.groups.push(value),
                        PARAM_FIELD_UNITS => definition.units = value,
                        _ => definition.format_string = value,
                    }
                }
                PARAM_FIELD_DATA_TYPE => {
                    reader.expect(field, wire_type, WireType::Varint)?;
                    definition.data_type = DataType::from_wire(reader.read_varint()?)?;
                }
                PARAM_FIELD_MIN | PARAM_FIELD_MAX | PARAM_FIELD_WARNING_MIN
                | PARAM_FIELD_WARNING_MAX => {
                    reader.expect(field, wire_type, WireType::Fixed64)?;
                    let value = reader.read_double()?;
                    match field {
                        PARAM_FIELD_MIN => definition.min_value = value,
                        PARAM_FIELD_MAX => definition.max_value = value,
                        PARAM_FIELD_WARNING_MIN => definition.warning_min_value = value,
                        _ => definition.warning_max_value = value,
                    }
                }
                PARAM_FIELD_FREQUENCIES => {
                    reader.read_doubles_into(wire_type, &mut definition.frequencies)?;
                }
                PARAM_FIELD_ROW_DATA => {
                    reader.expect(field, wire_type, WireType::Varint)?;
                    definition.includes_row_data = reader.read_bool()?;
                }
                PARAM_FIELD_SYNCHRO_DATA => {
                    reader.expect(field, wire_type, WireType::Varint)?;
                    definition.includes_synchro_data = reader.read_bool()?;
                }
                _ => reader.skip(wire_type)?,
            }
        }
        Ok(definition)
    }
}

/// Named grouping of parameters, nestable through `groups`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GroupDefinition {
    pub identifier: String,
    pub name: String,
    pub application_name: String,
    pub description: String,
    pub groups: Vec<String>,
}

const GROUP_FIELD_IDENTIFIER: u32 = 1;
const GROUP_FIELD_NAME: u32 = 2;
const GROUP_FIELD_APPLICATION: u32 = 3;
const GROUP_FIELD_DESCRIPTION: u32 = 4;
const GROUP_FIELD_GROUPS: u32 = 5;

impl OpenDataMessage for GroupDefinition {
    const CONTEXT: &'static str = "GroupDefinition";

    fn encode_fields(&self, writer: &mut WireWriter) {
        writer.string(GROUP_FIELD_IDENTIFIER, &self.identifier);
        writer.string(GROUP_FIELD_NAME, &self.name);
        writer.string(GROUP_FIELD_APPLICATION, &self.application_name);
        writer.string(GROUP_FIELD_DESCRIPTION, &self.description);
        writer.strings(GROUP_FIELD_GROUPS, &self.groups);
    }

    fn decode_fields(reader: &mut WireReader<'_>) -> Result<Self> {
        let mut group = Self::default();
        while let Some((field, wire_type)) = reader.next_field()? {
            if !(GROUP_FIELD_IDENTIFIER..=GROUP_FIELD_GROUPS).contains(&field) {
                reader.skip(wire_type)?;
                continue;
            }
            reader.expect(field, wire_type, WireType::LengthDelimited)?;
            let value = reader.read_string()?;
            match field {
                GROUP_FIELD_IDENTIFIER => group.identifier = value,
                GROUP_FIELD_NAME => group.name = value,
                GROUP_FIELD_APPLICATION => group.application_name = value,
                GROUP_FIELD_DESCRIPTION => group.description = value,
                _ => group.groups.push(value),
            }
        }
        Ok(group)
    }
}

/// Schema packet sent once per session before periodic data.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConfigurationPacket {
    pub config_id: String,
    pub parameter_definitions: Vec<ParameterDefinition>,
    pub group_definitions: Vec<GroupDefinition>,
}

impl ConfigurationPacket {
    /// Look up a parameter definition by identifier.
    pub fn parameter(&self, identifier: &str) -> Option<&ParameterDefinition> {
        self.parameter_definitions.iter().find(|definition| definition.identifier == identifier)
    }
}

const CONFIG_FIELD_ID: u32 = 1;
const CONFIG_FIELD_PARAMETERS: u32 = 2;
const CONFIG_FIELD_GROUPS: u32 = 3;

impl OpenDataMessage for ConfigurationPacket {
    const CONTEXT: &'static str = "ConfigurationPacket";

    fn encode_fields(&self, writer: &mut WireWriter) {
        writer.string(CONFIG_FIELD_ID, &self.config_id);
        writer.messages(CONFIG_FIELD_PARAMETERS, &self.parameter_definitions);
        writer.messages(CONFIG_FIELD_GROUPS, &self.group_definitions);
    }

    fn decode_fields(reader: &mut WireReader<'_>) -> Result<Self> {
        let mut packet = Self::default();
        while let Some((field, wire_type)) = reader.next_field()? {
            match field {
                CONFIG_FIELD_ID => {
                    reader.expect(field, wire_type, WireType::LengthDelimited)?;
                    packet.config_id = reader.read_string()?;
                }
                CONFIG_FIELD_PARAMETERS => {
                    reader.expect(field, wire_type, WireType::LengthDelimited)?;
                    packet.parameter_definitions.push(reader.read_message()?);
                }
                CONFIG_FIELD_GROUPS => {
                    reader.expect(field, wire_type, WireType::LengthDelimited)?;
                    packet.group_definitions.push(reader.read_message()?);
                }
                _ => reader.skip(wire_type)?,
            }
        }
        Ok(packet)
    }
}
