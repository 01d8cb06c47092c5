//! Service traits for the streaming broker
//!
//! Each trait covers one concern of the broker-side support library. Every
//! operation returns a typed [`Result`]; a refused or failed call surfaces as
//! a [`crate::TelemetryError`] rather than a success flag next to the data.

use crate::Result;
use crate::protocol::DataFormatId;
use crate::types::{
    CoverageCursorInfo, InfoType, ReceivedPacket, SessionAssociationInfo, SessionCreationInfo,
    SessionInfo,
};

/// Registry mapping parameter lists to compact data format identifiers.
#[async_trait::async_trait]
pub trait DataFormatService: Send + Sync {
    /// Resolve the parameter list registered under `data_format_id`.
    ///
    /// Fails with [`crate::TelemetryError::ParameterLookup`] when the id is
    /// unknown on `data_source`.
    async fn get_parameters_list(
        &self,
        data_source: &str,
        data_format_id: DataFormatId,
    ) -> Result<Vec<String>>;

    /// Register `parameters` (or find an existing registration) and return its id.
    ///
    /// The same list on the same data source always yields the same id.
    async fn get_parameter_data_format_id(
        &self,
        data_source: &str,
        parameters: &[String],
    ) -> Result<DataFormatId>;
}

/// Creation, lookup and completion of recording sessions.
#[async_trait::async_trait]
pub trait SessionService: Send + Sync {
    async fn create_session(&self, info: SessionCreationInfo) -> Result<SessionInfo>;

    /// Mark a session complete. Completed sessions accept no further writes.
    async fn end_session(&self, session_key: &str) -> Result<()>;

    async fn get_all_sessions(&self) -> Result<Vec<SessionInfo>>;

    async fn get_session_info(&self, session_key: &str) -> Result<SessionInfo>;

    async fn update_session_identifier(&self, session_key: &str, identifier: &str) -> Result<()>;

    async fn add_associate_session(
        &self,
        session_key: &str,
        associate_session_key: &str,
    ) -> Result<()>;
}

/// Delivery of serialized envelopes to the broker.
#[async_trait::async_trait]
pub trait PacketWriter: Send + Sync {
    /// Write one envelope to a stream of a session.
    async fn write_data(
        &self,
        data_source: &str,
        stream: &str,
        session_key: &str,
        bytes: Vec<u8>,
    ) -> Result<()>;

    /// Write an out-of-band information envelope.
    ///
    /// The target session is taken from the envelope itself.
    async fn write_info(&self, bytes: Vec<u8>, info_type: InfoType) -> Result<()>;
}

/// One item delivered by a [`PacketSource`].
#[derive(Debug, Clone, PartialEq)]
pub enum SourceMessage {
    Packet(ReceivedPacket),
    CoverageCursor { session_key: String, cursor: CoverageCursorInfo },
    SessionAssociation(SessionAssociationInfo),
}

/// Ordered source of broker messages for a reader.
///
/// Sources handle their own waiting: `next_message` resolves when the next
/// message is available.
#[async_trait::async_trait]
pub trait PacketSource: Send + 'static {
    /// Get the next message
    ///
    /// Returns:
    /// - `Ok(Some(message))` - New message available
    /// - `Ok(None)` - Source ended (normal termination)
    /// - `Err(e)` - Error occurred; the reader may retry
    async fn next_message(&mut self) -> Result<Option<SourceMessage>>;
}

/// Consumer of received packets.
///
/// Handlers own their error policy: a failure for one packet is logged by the
/// handler and never stops the reader.
#[async_trait::async_trait]
pub trait PacketHandler: Send + Sync {
    async fn handle(&self, packet: &ReceivedPacket);
}
