//! Session-scoped packet writing
//!
//! The broker expects a fixed order within a session: new-session markers on
//! every stream first, the configuration packet before any data, and
//! end-of-session markers on every stream before the session is closed.
//! [`SessionWriter`] provides those steps; [`MockDataWriter`] runs the whole
//! sequence with a generated sine wave.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{Local, Utc};
use tracing::{debug, error, info, warn};

use crate::generator::{PacketIdGenerator, PeriodicPacketGenerator};
use crate::protocol::{
    ConfigurationPacket, DataFormatId, DataType, EndOfSessionPacket, GroupDefinition, MarkerPacket,
    OpenDataMessage, Packet, PacketType, ParameterDefinition, SessionInfoPacket,
};
use crate::services::{DataFormatService, PacketWriter, SessionService};
use crate::types::{InfoType, SessionCreationInfo, SessionInfo};
use crate::{Result, TelemetryError};

/// Writer of the packets of one or more sessions over a fixed set of streams.
///
/// Every envelope gets the next id of the writer's [`PacketIdGenerator`].
pub struct SessionWriter {
    sessions: Arc<dyn SessionService>,
    writer: Arc<dyn PacketWriter>,
    streams: Vec<String>,
    ids: PacketIdGenerator,
    stream_timeout: Option<Duration>,
    packets_written: AtomicU64,
    failed_writes: AtomicU64,
}

impl SessionWriter {
    pub fn new(
        sessions: Arc<dyn SessionService>,
        writer: Arc<dyn PacketWriter>,
        streams: Vec<String>,
    ) -> Self {
        Self {
            sessions,
            writer,
            streams,
            ids: PacketIdGenerator::new(),
            stream_timeout: None,
            packets_written: AtomicU64::new(0),
            failed_writes: AtomicU64::new(0),
        }
    }

    /// Give up on a new-session marker after `timeout`.
    ///
    /// The broker creates a stream on its first packet, so this bounds stream
    /// creation. A marker that times out counts as a failed write.
    pub fn with_stream_timeout(mut self, timeout: Duration) -> Self {
        self.stream_timeout = Some(timeout);
        self
    }

    pub fn streams(&self) -> &[String] {
        &self.streams
    }

    /// Envelopes accepted by the packet writer so far.
    pub fn packets_written(&self) -> u64 {
        self.packets_written.load(Ordering::Relaxed)
    }

    /// Envelopes the packet writer refused so far.
    pub fn failed_writes(&self) -> u64 {
        self.failed_writes.load(Ordering::Relaxed)
    }

    /// Create a session and open it on every stream.
    ///
    /// A failed new-session marker is logged and counted; the session is
    /// still returned.
    pub async fn start_session(&self, creation: SessionCreationInfo) -> Result<SessionInfo> {
        let session = self.sessions.create_session(creation).await?;
        let new_session = session.to_new_session_packet();

        for stream in &self.streams {
            let packet = Packet::wrap(
                PacketType::NewSession,
                session.session_key.clone(),
                false,
                &new_session,
                self.ids.next_id(),
            );
            let write = self.writer.write_data(
                &session.data_source,
                stream,
                &session.session_key,
                packet.to_bytes(),
            );
            let result = match self.stream_timeout {
                Some(duration) => tokio::time::timeout(duration, write)
                    .await
                    .unwrap_or_else(|_| Err(TelemetryError::Timeout { duration })),
                None => write.await,
            };
            if let Err(e) = self.record(&packet, result) {
                warn!("Failed to open stream '{}' of session {}: {}", stream, session.session_key, e);
            }
        }

        info!("Started session {} on {} streams", session.session_key, self.streams.len());
        Ok(session)
    }

    /// Wrap `message` in an envelope and write it to one stream of `session`.
    pub async fn send_packet<M>(
        &self,
        session: &SessionInfo,
        stream: &str,
        packet_type: PacketType,
        is_essential: bool,
        message: &M,
    ) -> Result<()>
    where
        M: OpenDataMessage + Sync,
    {
        let packet =
            Packet::wrap(packet_type, session.session_key.clone(), is_essential, message, self.ids.next_id());
        let result = self
            .writer
            .write_data(&session.data_source, stream, &session.session_key, packet.to_bytes())
            .await;
        self.record(&packet, result)
    }

    /// Write a session info update out of band.
    pub async fn send_info(&self, session: &SessionInfo, update: &SessionInfoPacket) -> Result<()> {
        let packet = Packet::wrap(
            PacketType::SessionInfo,
            session.session_key.clone(),
            false,
            update,
            self.ids.next_id(),
        );
        let result = self.writer.write_info(packet.to_bytes(), InfoType::SessionInfo).await;
        self.record(&packet, result)
    }

    /// Close `session` on every stream, then end it.
    ///
    /// Failed end-of-session markers are logged and counted; only the final
    /// `end_session` call decides the result.
    pub async fn end_session(&self, session: &SessionInfo) -> Result<()> {
        let end = EndOfSessionPacket { data_source: session.data_source.clone() };
        for stream in &self.streams {
            if let Err(e) = self.send_packet(session, stream, PacketType::EndOfSession, false, &end).await {
                warn!("Failed to close stream '{}' of session {}: {}", stream, session.session_key, e);
            }
        }

        self.sessions.end_session(&session.session_key).await?;
        info!("Ended session {}", session.session_key);
        Ok(())
    }

    fn record(&self, packet: &Packet, result: Result<()>) -> Result<()> {
        match &result {
            Ok(()) => {
                self.packets_written.fetch_add(1, Ordering::Relaxed);
                debug!("Wrote {} packet {}", packet.packet_type, packet.id);
            }
            Err(e) => {
                self.failed_writes.fetch_add(1, Ordering::Relaxed);
                debug!("Write of {} packet {} failed: {}", packet.packet_type, packet.id, e);
            }
        }
        result
    }
}

/// Settings for [`MockDataWriter`].
#[derive(Debug, Clone, PartialEq)]
pub struct MockWriterOptions {
    pub data_source: String,
    pub identifier: String,
    pub session_type: String,
    pub version: u32,
    pub utc_offset_secs: i64,
    /// Streams opened and closed around the session.
    pub streams: Vec<String>,
    /// Stream receiving the periodic data.
    pub data_stream: String,
    /// Generated parameter, `name:application`.
    pub parameter: String,
    pub frequency: f64,
    pub packet_count: usize,
    /// Timestamp of the first sample; the current time when `None`.
    pub first_timestamp: Option<i64>,
    /// Limit for opening each stream of the session.
    pub stream_creation_timeout: Duration,
}

impl Default for MockWriterOptions {
    fn default() -> Self {
        Self {
            data_source: "Default".to_string(),
            identifier: "SupportLibrarySession".to_string(),
            session_type: "Session".to_string(),
            version: 1,
            utc_offset_secs: i64::from(Local::now().offset().local_minus_utc()),
            streams: vec![String::new(), "Stream1".to_string()],
            data_stream: "Stream1".to_string(),
            parameter: "Sin:MyApp".to_string(),
            frequency: 100.0,
            packet_count: 100,
            first_timestamp: None,
            stream_creation_timeout: Duration::from_secs(10),
        }
    }
}

/// Outcome of a [`MockDataWriter::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteSummary {
    pub session_key: String,
    pub packets_written: u64,
    pub failed_writes: u64,
}

/// Writes one complete session of generated sine wave data.
pub struct MockDataWriter {
    data_formats: Arc<dyn DataFormatService>,
    writer: SessionWriter,
    options: MockWriterOptions,
}

impl MockDataWriter {
    pub fn new(
        writer: Arc<dyn PacketWriter>,
        data_formats: Arc<dyn DataFormatService>,
        sessions: Arc<dyn SessionService>,
        options: MockWriterOptions,
    ) -> Self {
        let writer = SessionWriter::new(sessions, writer, options.streams.clone())
            .with_stream_timeout(options.stream_creation_timeout);
        Self { data_formats, writer, options }
    }

    /// Create, fill and end one session.
    ///
    /// If the configuration packet or the data format id cannot be obtained,
    /// the session is ended and the error returned.
    pub async fn run(&self) -> Result<WriteSummary> {
        let options = &self.options;
        // Reject bad generator settings before a session exists
        PeriodicPacketGenerator::new(options.frequency, DataFormatId::default(), 0)?;

        let creation = SessionCreationInfo::new(
            options.data_source.clone(),
            options.identifier.clone(),
            options.session_type.clone(),
            options.version,
            options.utc_offset_secs,
        );
        let session = self.writer.start_session(creation).await.inspect_err(|e| {
            error!("Failed to create new session: {}", e);
        })?;

        let configuration = sine_configuration(&options.parameter, options.frequency);
        if let Err(e) = self
            .writer
            .send_packet(&session, "", PacketType::Configuration, true, &configuration)
            .await
        {
            error!("Failed to send config packet: {}", e);
            self.abandon(&session).await;
            return Err(e);
        }

        let parameters = vec![options.parameter.clone()];
        let data_format_id = match self
            .data_formats
            .get_parameter_data_format_id(&options.data_source, &parameters)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                error!("Failed to get data format id: {}", e);
                self.abandon(&session).await;
                return Err(e);
            }
        };

        let first_timestamp = options.first_timestamp.unwrap_or_else(now_nanos);

        let lap = MarkerPacket {
            timestamp: first_timestamp,
            label: "Out Lap".to_string(),
            marker_type: "Lap Trigger".to_string(),
            description: "Out Lap Marker".to_string(),
            source: "0".to_string(),
            value: 1.0,
        };
        if let Err(e) = self.writer.send_packet(&session, "", PacketType::Marker, false, &lap).await {
            warn!("Failed to send lap marker: {}", e);
        }

        let update = SessionInfoPacket {
            data_source: session.data_source.clone(),
            identifier: session.identifier.clone(),
            session_type: session.session_type.clone(),
            version: session.version,
            associate_session_keys: Vec::new(),
            details: BTreeMap::from([("Test Detail".to_string(), "Test Value".to_string())]),
        };
        if let Err(e) = self.writer.send_info(&session, &update).await {
            warn!("Failed to send session info update: {}", e);
        }

        let mut generator =
            PeriodicPacketGenerator::new(options.frequency, data_format_id, first_timestamp)?;
        for index in 0..options.packet_count {
            let periodic = generator.generate_packet().await;
            if let Err(e) = self
                .writer
                .send_packet(&session, &options.data_stream, PacketType::PeriodicData, false, &periodic)
                .await
            {
                warn!("Failed to send periodic packet {}: {}", index, e);
            }
        }
        if generator.overruns() > 0 {
            warn!("{} samples overran their interval", generator.overruns());
        }

        self.writer.end_session(&session).await?;

        Ok(WriteSummary {
            session_key: session.session_key,
            packets_written: self.writer.packets_written(),
            failed_writes: self.writer.failed_writes(),
        })
    }

    async fn abandon(&self, session: &SessionInfo) {
        if let Err(e) = self.writer.end_session(session).await {
            error!("Failed to end session {}: {}", session.session_key, e);
        }
    }
}

/// Configuration packet declaring one float parameter and its application group.
pub fn sine_configuration(parameter: &str, frequency: f64) -> ConfigurationPacket {
    let (name, application) = parameter.split_once(':').unwrap_or((parameter, ""));

    let definition = ParameterDefinition {
        identifier: parameter.to_string(),
        name: name.to_string(),
        application_name: application.to_string(),
        description: "Sine Wave".to_string(),
        groups: Vec::new(),
        units: "test unit".to_string(),
        data_type: DataType::Float64,
        format_string: "%5.2f".to_string(),
        min_value: -1.0,
        max_value: 1.0,
        warning_min_value: -1.0,
        warning_max_value: 1.0,
        frequencies: vec![frequency],
        includes_row_data: false,
        includes_synchro_data: false,
    };
    let group = GroupDefinition {
        identifier: application.to_string(),
        name: application.to_string(),
        application_name: application.to_string(),
        description: application.to_string(),
        groups: Vec::new(),
    };

    ConfigurationPacket {
        config_id: "ConfigPacket".to_string(),
        parameter_definitions: vec![definition],
        group_definitions: vec![group],
    }
}

fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}
