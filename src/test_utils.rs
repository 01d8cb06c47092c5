//! Test utilities for building packets and scripted collaborators
//!
//! This module provides fixture builders shared by unit tests and benches.

#![cfg(any(test, feature = "benchmark"))]

use std::collections::{HashMap, VecDeque};

use crate::protocol::{
    DataFormatId, DataStatus, DoubleSample, EndOfSessionPacket, NewSessionPacket, OpenDataMessage,
    Packet, PacketType, PeriodicDataPacket, SampleColumn, SampleDataFormat, SessionInfoPacket,
};
use crate::services::{DataFormatService, PacketSource, SourceMessage};
use crate::types::ReceivedPacket;
use crate::{Result, TelemetryError};

/// Session key used by fixture packets.
pub const TEST_SESSION_KEY: &str = "key-1";

/// Data source used by fixture packets.
pub const TEST_DATA_SOURCE: &str = "Default";

/// Fixed parameter lists keyed by `(data source, data format id)`.
#[derive(Debug, Default, Clone)]
pub struct StaticDataFormats {
    formats: HashMap<(String, DataFormatId), Vec<String>>,
}

impl StaticDataFormats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_format(mut self, data_source: &str, id: DataFormatId, parameters: &[&str]) -> Self {
        self.formats.insert(
            (data_source.to_string(), id),
            parameters.iter().map(|p| p.to_string()).collect(),
        );
        self
    }
}

#[async_trait::async_trait]
impl DataFormatService for StaticDataFormats {
    async fn get_parameters_list(
        &self,
        data_source: &str,
        data_format_id: DataFormatId,
    ) -> Result<Vec<String>> {
        self.formats.get(&(data_source.to_string(), data_format_id)).cloned().ok_or_else(|| {
            TelemetryError::ParameterLookup {
                data_source: data_source.to_string(),
                data_format_id: data_format_id.0,
                reason: "not registered".to_string(),
            }
        })
    }

    async fn get_parameter_data_format_id(
        &self,
        data_source: &str,
        parameters: &[String],
    ) -> Result<DataFormatId> {
        self.formats
            .iter()
            .find(|((source, _), list)| source == data_source && list.as_slice() == parameters)
            .map(|((_, id), _)| *id)
            .ok_or_else(|| {
                TelemetryError::service_failed(
                    "data format",
                    "get_parameter_data_format_id",
                    "static registry is read-only",
                )
            })
    }
}

/// Packet source replaying a fixed script, then ending.
pub struct ScriptedSource {
    script: VecDeque<Result<SourceMessage>>,
}

impl ScriptedSource {
    pub fn new(script: impl IntoIterator<Item = Result<SourceMessage>>) -> Self {
        Self { script: script.into_iter().collect() }
    }

    /// Source delivering the given packets in order.
    pub fn from_packets(packets: impl IntoIterator<Item = ReceivedPacket>) -> Self {
        Self::new(packets.into_iter().map(|p| Ok(SourceMessage::Packet(p))))
    }
}

#[async_trait::async_trait]
impl PacketSource for ScriptedSource {
    async fn next_message(&mut self) -> Result<Option<SourceMessage>> {
        self.script.pop_front().transpose()
    }
}

/// Column of valid double samples.
pub fn double_column(values: &[f64]) -> SampleColumn {
    SampleColumn::Double(
        values.iter().map(|&value| DoubleSample { value, status: DataStatus::Valid }).collect(),
    )
}

/// Periodic data envelope on the fixture session.
pub fn periodic_packet(
    data_format: SampleDataFormat,
    start_time: i64,
    interval: i64,
    columns: Vec<SampleColumn>,
) -> Packet {
    let periodic = PeriodicDataPacket { data_format, start_time, interval, columns };
    Packet::wrap(PacketType::PeriodicData, TEST_SESSION_KEY, false, &periodic, 0)
}

/// Fixture envelope as delivered on the main stream.
pub fn received(packet: &Packet) -> ReceivedPacket {
    received_on(packet, "")
}

/// Fixture envelope as delivered on `stream`.
pub fn received_on(packet: &Packet, stream: &str) -> ReceivedPacket {
    ReceivedPacket::new(TEST_DATA_SOURCE, stream, packet.session_key.clone(), packet.to_bytes())
}

/// New-session marker for `session_key` with the given identifier.
pub fn new_session_packet(session_key: &str, identifier: &str) -> Packet {
    let new_session = NewSessionPacket {
        data_source: TEST_DATA_SOURCE.to_string(),
        utc_offset_secs: 0,
        session_info: SessionInfoPacket {
            data_source: TEST_DATA_SOURCE.to_string(),
            identifier: identifier.to_string(),
            session_type: "Session".to_string(),
            version: 1,
            ..Default::default()
        },
    };
    Packet::wrap(PacketType::NewSession, session_key, true, &new_session, 0)
}

/// End-of-session marker for `session_key`.
pub fn end_of_session_packet(session_key: &str) -> Packet {
    let end = EndOfSessionPacket { data_source: TEST_DATA_SOURCE.to_string() };
    Packet::wrap(PacketType::EndOfSession, session_key, true, &end, 0)
}
