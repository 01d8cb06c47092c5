//! In-process broker backed by per-session logs

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use crate::config::{
    PacketReadingConfiguration, PacketReadingType, StreamDestination, StreamingApiConfiguration,
};
use crate::protocol::{
    DataFormatId, OpenDataMessage, Packet, PacketType, PeriodicDataPacket, SessionInfoPacket,
};
use crate::services::{
    DataFormatService, PacketSource, PacketWriter, SessionService, SourceMessage,
};
use crate::types::{
    CoverageCursorInfo, InfoType, ReceivedPacket, SessionAssociationInfo, SessionCreationInfo,
    SessionInfo,
};
use crate::{Result, TelemetryError};

/// Messages buffered per live subscriber before it starts lagging.
pub const LIVE_CHANNEL_CAPACITY: usize = 4096;

#[derive(Debug)]
struct LogEntry {
    /// Broker destination of a written packet; `None` for cursors and associations.
    destination: Option<StreamDestination>,
    message: SourceMessage,
}

#[derive(Debug)]
struct StoredSession {
    info: SessionInfo,
    log: Vec<LogEntry>,
}

#[derive(Debug, Default)]
struct BrokerState {
    format_ids: HashMap<(String, Vec<String>), DataFormatId>,
    format_parameters: HashMap<(String, DataFormatId), Vec<String>>,
    next_format_id: u64,
    /// Sessions in creation order.
    sessions: Vec<StoredSession>,
    next_session: u64,
}

impl BrokerState {
    fn session(&self, session_key: &str) -> Result<&StoredSession> {
        self.sessions
            .iter()
            .find(|s| s.info.session_key == session_key)
            .ok_or_else(|| TelemetryError::SessionNotFound { session_key: session_key.to_string() })
    }

    fn session_mut(&mut self, session_key: &str) -> Result<&mut StoredSession> {
        self.sessions
            .iter_mut()
            .find(|s| s.info.session_key == session_key)
            .ok_or_else(|| TelemetryError::SessionNotFound { session_key: session_key.to_string() })
    }

    fn open_session_mut(&mut self, session_key: &str, operation: &str) -> Result<&mut StoredSession> {
        let session = self.session_mut(session_key)?;
        if session.info.is_complete {
            return Err(TelemetryError::service_failed(
                "packet writing",
                operation,
                format!("session {} has ended", session_key),
            ));
        }
        Ok(session)
    }
}

/// Broker keeping every session in memory.
///
/// Implements the data format, session and packet writing services, and hands
/// out [`BrokerSource`]s for readers through [`subscribe`](Self::subscribe).
/// Written packets are appended to their session's log under the destination
/// the configured stream creation strategy yields, and forwarded to live
/// subscribers.
pub struct InMemoryBroker {
    config: StreamingApiConfiguration,
    state: Mutex<BrokerState>,
    live: Mutex<Option<broadcast::Sender<SourceMessage>>>,
}

impl InMemoryBroker {
    pub fn new(config: &StreamingApiConfiguration) -> Result<Self> {
        config.validate()?;
        info!(
            "In-memory broker for {} ({:?})",
            config.broker_url, config.stream_creation_strategy
        );
        let (live, _) = broadcast::channel(LIVE_CHANNEL_CAPACITY);
        Ok(Self {
            config: config.clone(),
            state: Mutex::new(BrokerState { next_format_id: 1, ..Default::default() }),
            live: Mutex::new(Some(live)),
        })
    }

    pub fn config(&self) -> &StreamingApiConfiguration {
        &self.config
    }

    /// Open a packet source for a reader.
    ///
    /// Historic subscriptions replay the selected session's log and then end.
    /// Live subscriptions receive everything written after this call until
    /// the broker shuts down.
    pub fn subscribe(&self, config: &PacketReadingConfiguration) -> Result<BrokerSource> {
        config.validate()?;
        match config.reading_type {
            PacketReadingType::Historic => {
                let session_key = config.session_key.as_deref().unwrap_or_default();
                let state = self.state();
                let session = state.session(session_key)?;
                let replay: VecDeque<SourceMessage> =
                    session.log.iter().map(|entry| entry.message.clone()).collect();
                debug!("Replaying {} messages of session {}", replay.len(), session_key);
                Ok(BrokerSource::Historic(replay))
            }
            PacketReadingType::Live => match self.live().as_ref() {
                Some(live) => Ok(BrokerSource::Live(live.subscribe())),
                None => Err(TelemetryError::connection_failed("broker has shut down")),
            },
        }
    }

    /// Packets written to one stream of a session, in write order.
    pub fn stream_log(&self, session_key: &str, stream: &str) -> Result<Vec<ReceivedPacket>> {
        let state = self.state();
        let session = state.session(session_key)?;
        let destination = self.config.destination(&session.info.data_source, stream)?;
        Ok(session
            .log
            .iter()
            .filter(|entry| entry.destination.as_ref() == Some(&destination))
            .filter_map(|entry| match &entry.message {
                SourceMessage::Packet(packet) if packet.stream == stream => Some(packet.clone()),
                _ => None,
            })
            .collect())
    }

    /// Close live subscriptions. Later writes are still logged.
    pub fn shutdown(&self) {
        if self.live().take().is_some() {
            info!("In-memory broker shut down");
        }
    }

    fn publish(&self, message: SourceMessage) {
        if let Some(live) = self.live().as_ref() {
            // No live subscribers is not an error
            let _ = live.send(message);
        }
    }

    fn append(&self, session_key: &str, destination: Option<StreamDestination>, message: SourceMessage) -> Result<()> {
        let mut state = self.state();
        let session = state.session_mut(session_key)?;
        session.log.push(LogEntry { destination, message });
        Ok(())
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn live(&self) -> MutexGuard<'_, Option<broadcast::Sender<SourceMessage>>> {
        self.live.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// End of the time range covered by a periodic packet.
fn coverage_end(packet: &Packet) -> Option<i64> {
    if packet.packet_type != PacketType::PeriodicData {
        return None;
    }
    let periodic: PeriodicDataPacket = packet.content_as().ok()?;
    let samples = periodic.columns.iter().map(|c| c.len()).max()?;
    periodic.timestamp_at(samples.saturating_sub(1))
}

#[async_trait::async_trait]
impl DataFormatService for InMemoryBroker {
    async fn get_parameters_list(
        &self,
        data_source: &str,
        data_format_id: DataFormatId,
    ) -> Result<Vec<String>> {
        self.state()
            .format_parameters
            .get(&(data_source.to_string(), data_format_id))
            .cloned()
            .ok_or_else(|| TelemetryError::ParameterLookup {
                data_source: data_source.to_string(),
                data_format_id: data_format_id.0,
                reason: "no parameter list registered under this id".to_string(),
            })
    }

    async fn get_parameter_data_format_id(
        &self,
        data_source: &str,
        parameters: &[String],
    ) -> Result<DataFormatId> {
        if parameters.is_empty() {
            return Err(TelemetryError::service_failed(
                "data format",
                "get_parameter_data_format_id",
                "parameter list is empty",
            ));
        }

        let mut state = self.state();
        let key = (data_source.to_string(), parameters.to_vec());
        if let Some(id) = state.format_ids.get(&key) {
            return Ok(*id);
        }

        let id = DataFormatId(state.next_format_id);
        state.next_format_id += 1;
        state.format_ids.insert(key, id);
        state.format_parameters.insert((data_source.to_string(), id), parameters.to_vec());
        debug!("Registered data format {} on {} for {} parameters", id, data_source, parameters.len());
        Ok(id)
    }
}

#[async_trait::async_trait]
impl SessionService for InMemoryBroker {
    async fn create_session(&self, creation: SessionCreationInfo) -> Result<SessionInfo> {
        if creation.data_source.is_empty() {
            return Err(TelemetryError::service_failed(
                "session management",
                "create_session",
                "data source must not be empty",
            ));
        }

        let mut state = self.state();
        state.next_session += 1;
        let info = SessionInfo {
            data_source: creation.data_source,
            session_key: format!("session-{:06}", state.next_session),
            identifier: creation.identifier,
            session_type: creation.session_type,
            version: creation.version,
            utc_offset_secs: creation.utc_offset_secs,
            associate_session_keys: creation.associate_session_keys,
            details: creation.details,
            is_complete: false,
        };
        state.sessions.push(StoredSession { info: info.clone(), log: Vec::new() });

        info!("Created session {} ('{}') on {}", info.session_key, info.identifier, info.data_source);
        Ok(info)
    }

    async fn end_session(&self, session_key: &str) -> Result<()> {
        let mut state = self.state();
        let session = state.session_mut(session_key)?;
        if session.info.is_complete {
            debug!("Session {} already ended", session_key);
        } else {
            session.info.is_complete = true;
            info!("Ended session {} after {} messages", session_key, session.log.len());
        }
        Ok(())
    }

    async fn get_all_sessions(&self) -> Result<Vec<SessionInfo>> {
        Ok(self.state().sessions.iter().map(|s| s.info.clone()).collect())
    }

    async fn get_session_info(&self, session_key: &str) -> Result<SessionInfo> {
        Ok(self.state().session(session_key)?.info.clone())
    }

    async fn update_session_identifier(&self, session_key: &str, identifier: &str) -> Result<()> {
        let mut state = self.state();
        state.session_mut(session_key)?.info.identifier = identifier.to_string();
        Ok(())
    }

    async fn add_associate_session(
        &self,
        session_key: &str,
        associate_session_key: &str,
    ) -> Result<()> {
        let association = {
            let mut state = self.state();
            let session = state.session_mut(session_key)?;
            if session.info.associate_session_keys.iter().any(|k| k == associate_session_key) {
                return Ok(());
            }
            session.info.associate_session_keys.push(associate_session_key.to_string());
            SessionAssociationInfo {
                data_source: session.info.data_source.clone(),
                session_key: session_key.to_string(),
                associate_session_key: associate_session_key.to_string(),
            }
        };

        let message = SourceMessage::SessionAssociation(association);
        self.append(session_key, None, message.clone())?;
        self.publish(message);
        Ok(())
    }
}

#[async_trait::async_trait]
impl PacketWriter for InMemoryBroker {
    async fn write_data(
        &self,
        data_source: &str,
        stream: &str,
        session_key: &str,
        bytes: Vec<u8>,
    ) -> Result<()> {
        let destination = self.config.destination(data_source, stream)?;
        let envelope = Packet::from_bytes(&bytes)?;
        let received = ReceivedPacket::new(data_source, stream, session_key, bytes);

        {
            let mut state = self.state();
            let session = state.open_session_mut(session_key, "write_data")?;
            if session.info.data_source != data_source {
                return Err(TelemetryError::service_failed(
                    "packet writing",
                    "write_data",
                    format!(
                        "session {} belongs to data source {}, not {}",
                        session_key, session.info.data_source, data_source
                    ),
                ));
            }
            session.log.push(LogEntry {
                destination: Some(destination.clone()),
                message: SourceMessage::Packet(received.clone()),
            });
        }
        trace!(
            "Wrote {} packet {} to {}[{}]",
            envelope.packet_type, envelope.id, destination.topic, destination.partition
        );
        self.publish(SourceMessage::Packet(received));

        if let Some(coverage_cursor_time) = coverage_end(&envelope) {
            let message = SourceMessage::CoverageCursor {
                session_key: session_key.to_string(),
                cursor: CoverageCursorInfo { coverage_cursor_time },
            };
            self.append(session_key, None, message.clone())?;
            self.publish(message);
        }
        Ok(())
    }

    async fn write_info(&self, bytes: Vec<u8>, info_type: InfoType) -> Result<()> {
        match info_type {
            InfoType::SystemStatus => {
                debug!("Received {} byte system status packet", bytes.len());
                Ok(())
            }
            InfoType::SessionInfo => {
                let envelope = Packet::from_bytes(&bytes)?;
                if envelope.packet_type != PacketType::SessionInfo {
                    warn!("Session info write carried a {} packet", envelope.packet_type);
                    return Err(TelemetryError::parse(
                        "write_info",
                        format!("expected SessionInfo packet, got {}", envelope.packet_type),
                    ));
                }
                let update: SessionInfoPacket = envelope.content_as()?;

                let received = {
                    let mut state = self.state();
                    let session = state.open_session_mut(&envelope.session_key, "write_info")?;
                    session.info.apply_info_packet(&update);

                    let data_source = session.info.data_source.clone();
                    let destination = self.config.destination(&data_source, "")?;
                    let received = ReceivedPacket::new(data_source, "", envelope.session_key.clone(), bytes);
                    session.log.push(LogEntry {
                        destination: Some(destination),
                        message: SourceMessage::Packet(received.clone()),
                    });
                    received
                };
                debug!("Updated session info of {}", envelope.session_key);
                self.publish(SourceMessage::Packet(received));
                Ok(())
            }
        }
    }
}

/// Packet source handed out by [`InMemoryBroker::subscribe`].
pub enum BrokerSource {
    /// Snapshot of a session's log.
    Historic(VecDeque<SourceMessage>),
    /// Messages written after subscribing.
    Live(broadcast::Receiver<SourceMessage>),
}

#[async_trait::async_trait]
impl PacketSource for BrokerSource {
    async fn next_message(&mut self) -> Result<Option<SourceMessage>> {
        match self {
            BrokerSource::Historic(replay) => Ok(replay.pop_front()),
            BrokerSource::Live(receiver) => match receiver.recv().await {
                Ok(message) => Ok(Some(message)),
                Err(broadcast::error::RecvError::Closed) => Ok(None),
                Err(broadcast::error::RecvError::Lagged(skipped)) => Err(TelemetryError::service_failed(
                    "packet reading",
                    "next_message",
                    format!("live subscriber lagged, {} messages dropped", skipped),
                )),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PartitionMapping, StreamCreationStrategy};
    use crate::protocol::{EndOfSessionPacket, SampleDataFormat};
    use crate::test_utils::{double_column, periodic_packet};

    fn broker() -> InMemoryBroker {
        InMemoryBroker::new(&StreamingApiConfiguration::default()).unwrap()
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    async fn session(broker: &InMemoryBroker) -> SessionInfo {
        broker
            .create_session(SessionCreationInfo::new("Default", "FP1", "Session", 1, 0))
            .await
            .unwrap()
    }

    fn periodic_bytes(session_key: &str, start_time: i64) -> Vec<u8> {
        let mut packet = periodic_packet(
            SampleDataFormat::Identifier(DataFormatId(1)),
            start_time,
            10,
            vec![double_column(&[0.0, 1.0, 2.0])],
        );
        packet.session_key = session_key.to_string();
        packet.to_bytes()
    }

    fn end_bytes(session_key: &str) -> Vec<u8> {
        let end = EndOfSessionPacket { data_source: "Default".to_string() };
        Packet::wrap(PacketType::EndOfSession, session_key, false, &end, 0).to_bytes()
    }

    #[tokio::test]
    async fn test_data_format_ids_are_sequential_and_reused() {
        let broker = broker();
        let sin = broker.get_parameter_data_format_id("Default", &names(&["Sin:MyApp"])).await.unwrap();
        let pair = broker.get_parameter_data_format_id("Default", &names(&["A", "B"])).await.unwrap();
        let again = broker.get_parameter_data_format_id("Default", &names(&["Sin:MyApp"])).await.unwrap();
        let other_source = broker.get_parameter_data_format_id("Other", &names(&["Sin:MyApp"])).await.unwrap();

        assert_eq!(sin, DataFormatId(1));
        assert_eq!(pair, DataFormatId(2));
        assert_eq!(again, sin);
        assert_eq!(other_source, DataFormatId(3));

        assert_eq!(broker.get_parameters_list("Default", pair).await.unwrap(), names(&["A", "B"]));
    }

    #[tokio::test]
    async fn test_unknown_format_is_lookup_error() {
        let broker = broker();
        let err = broker.get_parameters_list("Default", DataFormatId(42)).await.unwrap_err();
        assert!(matches!(err, TelemetryError::ParameterLookup { data_format_id: 42, .. }));

        let err = broker.get_parameter_data_format_id("Default", &[]).await.unwrap_err();
        assert!(matches!(err, TelemetryError::Service { .. }));
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let broker = broker();
        let first = session(&broker).await;
        let second = session(&broker).await;
        assert_ne!(first.session_key, second.session_key);

        broker.update_session_identifier(&first.session_key, "Renamed").await.unwrap();
        broker.end_session(&first.session_key).await.unwrap();
        broker.end_session(&first.session_key).await.unwrap();

        let sessions = broker.get_all_sessions().await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].identifier, "Renamed");
        assert!(sessions[0].is_complete);
        assert!(!sessions[1].is_complete);

        let err = broker.get_session_info("missing").await.unwrap_err();
        assert!(matches!(err, TelemetryError::SessionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_writes_rejected_for_unknown_or_ended_sessions() {
        let broker = broker();
        let err = broker.write_data("Default", "", "missing", end_bytes("missing")).await.unwrap_err();
        assert!(matches!(err, TelemetryError::SessionNotFound { .. }));

        let info = session(&broker).await;
        broker.end_session(&info.session_key).await.unwrap();
        let err = broker
            .write_data("Default", "", &info.session_key, end_bytes(&info.session_key))
            .await
            .unwrap_err();
        assert!(matches!(err, TelemetryError::Service { .. }));
    }

    #[tokio::test]
    async fn test_write_rejects_garbage_and_foreign_data_source() {
        let broker = broker();
        let info = session(&broker).await;

        let err = broker.write_data("Default", "", &info.session_key, vec![0xff]).await.unwrap_err();
        assert!(matches!(err, TelemetryError::Parse { .. }));

        let err = broker
            .write_data("Other", "", &info.session_key, end_bytes(&info.session_key))
            .await
            .unwrap_err();
        assert!(matches!(err, TelemetryError::Service { .. }));
    }

    #[tokio::test]
    async fn test_historic_subscription_replays_log_then_ends() {
        let broker = broker();
        let info = session(&broker).await;
        broker
            .write_data("Default", "Stream1", &info.session_key, periodic_bytes(&info.session_key, 100))
            .await
            .unwrap();
        broker
            .write_data("Default", "Stream1", &info.session_key, end_bytes(&info.session_key))
            .await
            .unwrap();

        let config = PacketReadingConfiguration::historic("Default", info.session_key.clone());
        let mut source = broker.subscribe(&config).unwrap();

        match source.next_message().await.unwrap() {
            Some(SourceMessage::Packet(packet)) => assert_eq!(packet.stream, "Stream1"),
            other => panic!("Expected packet, got {:?}", other),
        }
        match source.next_message().await.unwrap() {
            Some(SourceMessage::CoverageCursor { cursor, .. }) => {
                assert_eq!(cursor.coverage_cursor_time, 120);
            }
            other => panic!("Expected coverage cursor, got {:?}", other),
        }
        assert!(matches!(source.next_message().await.unwrap(), Some(SourceMessage::Packet(_))));
        assert!(source.next_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_historic_subscription_needs_known_session() {
        let broker = broker();
        let config = PacketReadingConfiguration::historic("Default", "missing");
        assert!(matches!(broker.subscribe(&config), Err(TelemetryError::SessionNotFound { .. })));
    }

    #[tokio::test]
    async fn test_live_subscription_follows_writes_until_shutdown() {
        let broker = broker();
        let mut source = broker.subscribe(&PacketReadingConfiguration::live("Default")).unwrap();

        let info = session(&broker).await;
        broker.add_associate_session(&info.session_key, "session-x").await.unwrap();
        broker
            .write_data("Default", "", &info.session_key, end_bytes(&info.session_key))
            .await
            .unwrap();
        broker.shutdown();

        match source.next_message().await.unwrap() {
            Some(SourceMessage::SessionAssociation(association)) => {
                assert_eq!(association.associate_session_key, "session-x");
            }
            other => panic!("Expected association, got {:?}", other),
        }
        assert!(matches!(source.next_message().await.unwrap(), Some(SourceMessage::Packet(_))));
        assert!(source.next_message().await.unwrap().is_none());

        assert!(broker.subscribe(&PacketReadingConfiguration::live("Default")).is_err());
    }

    #[tokio::test]
    async fn test_write_info_updates_session_details() {
        let broker = broker();
        let info = session(&broker).await;
        let update = SessionInfoPacket {
            data_source: "Default".to_string(),
            identifier: info.identifier.clone(),
            session_type: info.session_type.clone(),
            version: info.version,
            details: [("Test Detail".to_string(), "Test Value".to_string())].into(),
            ..Default::default()
        };
        let envelope = Packet::wrap(PacketType::SessionInfo, info.session_key.clone(), false, &update, 5);

        broker.write_info(envelope.to_bytes(), InfoType::SessionInfo).await.unwrap();

        let stored = broker.get_session_info(&info.session_key).await.unwrap();
        assert_eq!(stored.details.get("Test Detail").map(String::as_str), Some("Test Value"));
        assert_eq!(broker.stream_log(&info.session_key, "").unwrap().len(), 1);

        let err = broker.write_info(end_bytes(&info.session_key), InfoType::SessionInfo).await.unwrap_err();
        assert!(matches!(err, TelemetryError::Parse { .. }));
    }

    #[tokio::test]
    async fn test_stream_logs_follow_partition_strategy() {
        let config = StreamingApiConfiguration {
            stream_creation_strategy: StreamCreationStrategy::PartitionBased,
            partition_mappings: vec![PartitionMapping { stream: "Stream1".to_string(), partition: 1 }],
            ..Default::default()
        };
        let broker = InMemoryBroker::new(&config).unwrap();
        let info = session(&broker).await;

        broker
            .write_data("Default", "Stream1", &info.session_key, end_bytes(&info.session_key))
            .await
            .unwrap();
        let err = broker
            .write_data("Default", "Stream2", &info.session_key, end_bytes(&info.session_key))
            .await
            .unwrap_err();
        assert!(matches!(err, TelemetryError::Config { .. }));

        assert_eq!(broker.stream_log(&info.session_key, "Stream1").unwrap().len(), 1);
        assert!(broker.stream_log(&info.session_key, "").unwrap().is_empty());
    }
}
