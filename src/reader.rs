//! Packet reader driver
//!
//! A [`PacketReader`] owns a [`PacketSource`] inside a spawned task. The task
//! filters incoming packets against a [`PacketReadingConfiguration`], derives
//! session lifecycle events from the packet flow, publishes them on an
//! [`EventBus`] and dispatches each accepted packet to every registered
//! [`PacketHandler`].
//!
//! Lifecycle derivation:
//!
//! | Received                                   | Events                                                   |
//! |--------------------------------------------|----------------------------------------------------------|
//! | first packet of a stream                   | `StreamReadingStarted` (+ `SessionReadingStarted` first) |
//! | `EndOfSession` on a stream                 | `StreamReadingCompleted` (+ `SessionReadingCompleted`)   |
//! | `SessionInfo` packet                       | `SessionInfoUpdated`                                     |
//! | coverage cursor for a read session         | `CoverageCursorReceived`                                 |
//! | association for a read session             | `SessionAssociationUpdated`                              |
//!
//! A session completes once every stream it started on has ended.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::{PacketReadingConfiguration, PacketReadingType};
use crate::events::{EventBus, ReaderEvent};
use crate::protocol::{NewSessionPacket, Packet, PacketType, SessionInfoPacket};
use crate::services::{PacketHandler, PacketSource, SourceMessage};
use crate::types::{ReceivedPacket, SessionInfo, StreamInfo};
use crate::Result;

const MAX_ERRORS: u32 = 10;

/// Completed and rejected sessions remembered per reader before the oldest are forgotten.
const RETAINED_SESSIONS: usize = 1024;

/// Handle identifying one registered packet handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

type HandlerList = RwLock<Vec<(HandlerId, Arc<dyn PacketHandler>)>>;

/// Counters reported when a reader task ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderSummary {
    /// Packets delivered by the source.
    pub packets_received: u64,
    /// Packets that passed the filter and went to handlers.
    pub packets_dispatched: u64,
    pub sessions_completed: u64,
}

/// Reader of packets from a [`PacketSource`].
///
/// Handlers and observers may be registered before or after
/// [`start`](Self::start); packets received while no handler is registered
/// are dropped.
pub struct PacketReader {
    config: Arc<PacketReadingConfiguration>,
    handlers: Arc<HandlerList>,
    events: Arc<EventBus>,
    next_handler_id: AtomicU64,
    cancel: CancellationToken,
    task: Option<JoinHandle<ReaderSummary>>,
}

impl PacketReader {
    /// Create a reader for `config` without starting it.
    pub fn new(config: PacketReadingConfiguration) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            handlers: Arc::new(RwLock::new(Vec::new())),
            events: Arc::new(EventBus::new()),
            next_handler_id: AtomicU64::new(1),
            cancel: CancellationToken::new(),
            task: None,
        })
    }

    /// Create a reader and start it on `source`.
    pub fn spawn<S>(source: S, config: PacketReadingConfiguration) -> Result<Self>
    where
        S: PacketSource,
    {
        let mut reader = Self::new(config)?;
        reader.start(source);
        Ok(reader)
    }

    /// Start reading from `source`. Has no effect if the reader already started.
    pub fn start<S>(&mut self, source: S)
    where
        S: PacketSource,
    {
        if self.task.is_some() {
            warn!("Packet reader already started, ignoring new source");
            return;
        }

        let config = Arc::clone(&self.config);
        let handlers = Arc::clone(&self.handlers);
        let events = Arc::clone(&self.events);
        let cancel = self.cancel.clone();

        self.task = Some(tokio::spawn(async move {
            Self::reader_task(source, config, handlers, events, cancel).await
        }));
    }

    /// Event bus carrying this reader's lifecycle events.
    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.events)
    }

    pub fn config(&self) -> &PacketReadingConfiguration {
        &self.config
    }

    /// Register a handler for every accepted packet.
    pub async fn set_handler(&self, handler: Arc<dyn PacketHandler>) -> HandlerId {
        let id = HandlerId(self.next_handler_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().await.push((id, handler));
        debug!("Packet handler {:?} registered", id);
        id
    }

    /// Remove a handler. Returns `false` if `id` was not registered.
    ///
    /// Waits for a dispatch in progress; the handler is not called after this returns.
    pub async fn remove_handler(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write().await;
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        handlers.len() != before
    }

    /// Token cancelling the reader task.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the source to end without cancelling.
    ///
    /// Returns `None` if the reader was never started or already joined.
    pub async fn finished(&mut self) -> Option<ReaderSummary> {
        let task = self.task.take()?;
        match task.await {
            Ok(summary) => Some(summary),
            Err(e) => {
                error!("Packet reader task failed: {}", e);
                None
            }
        }
    }

    /// Cancel the reader task and wait for it to end.
    pub async fn stop(&mut self) -> Option<ReaderSummary> {
        self.cancel.cancel();
        self.finished().await
    }

    /// Reader task - pulls messages, filters them and fans them out
    async fn reader_task<S>(
        mut source: S,
        config: Arc<PacketReadingConfiguration>,
        handlers: Arc<HandlerList>,
        events: Arc<EventBus>,
        cancel: CancellationToken,
    ) -> ReaderSummary
    where
        S: PacketSource,
    {
        info!(
            "Packet reader started: data_source={}, mode={:?}",
            config.data_source, config.reading_type
        );
        let mut summary = ReaderSummary::default();
        let mut state = ReadingState::default();
        let mut error_count = 0u32;
        let read_timeout = config.read_timeout();

        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Packet reader cancelled");
                    break;
                }
                result = tokio::time::timeout(read_timeout, source.next_message()) => result,
            };

            let result = match result {
                Ok(result) => result,
                Err(_) if config.reading_type == PacketReadingType::Historic => {
                    warn!("No messages for {:?} while replaying, ending read", read_timeout);
                    break;
                }
                Err(_) => {
                    debug!("No messages for {:?}, waiting for live sessions", read_timeout);
                    continue;
                }
            };

            match result {
                Ok(Some(SourceMessage::Packet(packet))) => {
                    summary.packets_received += 1;
                    error_count = 0;

                    let Some(lifecycle) = state.observe(&config, &packet) else {
                        trace!(
                            "Filtered packet on {}/{} for session {}",
                            packet.data_source, packet.stream, packet.session_key
                        );
                        continue;
                    };

                    for event in &lifecycle.before {
                        events.publish(event);
                    }

                    for (_, handler) in handlers.read().await.iter() {
                        handler.handle(&packet).await;
                    }
                    summary.packets_dispatched += 1;

                    for event in &lifecycle.after {
                        if matches!(event, ReaderEvent::SessionReadingCompleted(_)) {
                            summary.sessions_completed += 1;
                        }
                        events.publish(event);
                    }
                }
                Ok(Some(SourceMessage::CoverageCursor { session_key, cursor })) => {
                    error_count = 0;
                    if state.is_reading(&config, &session_key) {
                        events.publish(&ReaderEvent::CoverageCursorReceived(cursor));
                    }
                }
                Ok(Some(SourceMessage::SessionAssociation(association))) => {
                    error_count = 0;
                    if association.data_source == config.data_source
                        && state.is_reading(&config, &association.session_key)
                    {
                        events.publish(&ReaderEvent::SessionAssociationUpdated(association));
                    }
                }
                Ok(None) => {
                    info!("Packet source ended after {} packets", summary.packets_received);
                    break;
                }
                Err(e) if e.is_record_scoped() => {
                    warn!("Skipping undecodable message: {}", e);
                }
                Err(e) => {
                    // Source error - don't crash on transient failures
                    error_count += 1;
                    error!("Packet source error ({}/{}): {}", error_count, MAX_ERRORS, e);

                    if error_count >= MAX_ERRORS {
                        error!("Too many packet source errors, shutting down");
                        break;
                    }

                    // Exponential backoff: 50ms, 100ms, 200ms, ...
                    let backoff = Duration::from_millis(50 * (1 << error_count.min(5)));
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            info!("Packet reader cancelled during backoff");
                            break;
                        }
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }

        info!(
            "Packet reader ended (received {}, dispatched {})",
            summary.packets_received, summary.packets_dispatched
        );
        summary
    }
}

impl Drop for PacketReader {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Events to publish around the dispatch of one packet.
#[derive(Debug, Default)]
struct Lifecycle {
    before: Vec<ReaderEvent>,
    after: Vec<ReaderEvent>,
}

#[derive(Debug)]
struct SessionState {
    info: SessionInfo,
    started_streams: HashSet<String>,
    completed_streams: HashSet<String>,
    completed: bool,
}

impl SessionState {
    fn new(data_source: &str, session_key: &str) -> Self {
        Self {
            info: SessionInfo {
                data_source: data_source.to_string(),
                session_key: session_key.to_string(),
                ..Default::default()
            },
            started_streams: HashSet::new(),
            completed_streams: HashSet::new(),
            completed: false,
        }
    }

    fn stream_info(&self, stream: &str) -> StreamInfo {
        StreamInfo {
            data_source: self.info.data_source.clone(),
            session_key: self.info.session_key.clone(),
            stream: stream.to_string(),
        }
    }
}

/// Per-reader view of the sessions seen so far.
///
/// Open sessions are always kept. Completed and rejected sessions are kept
/// up to `retained` each, oldest forgotten first.
#[derive(Debug)]
struct ReadingState {
    sessions: HashMap<String, SessionState>,
    /// Live sessions whose identifier did not match the configured pattern.
    rejected: HashSet<String>,
    completed_order: VecDeque<String>,
    rejected_order: VecDeque<String>,
    retained: usize,
}

impl Default for ReadingState {
    fn default() -> Self {
        Self::with_retained(RETAINED_SESSIONS)
    }
}

impl ReadingState {
    fn with_retained(retained: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            rejected: HashSet::new(),
            completed_order: VecDeque::new(),
            rejected_order: VecDeque::new(),
            retained,
        }
    }

    fn retire_completed(&mut self, session_key: &str) {
        self.completed_order.push_back(session_key.to_string());
        while self.completed_order.len() > self.retained {
            if let Some(oldest) = self.completed_order.pop_front() {
                trace!("Forgetting completed session {}", oldest);
                self.sessions.remove(&oldest);
            }
        }
    }

    fn reject(&mut self, session_key: &str) {
        if self.rejected.insert(session_key.to_string()) {
            self.rejected_order.push_back(session_key.to_string());
        }
        while self.rejected_order.len() > self.retained {
            if let Some(oldest) = self.rejected_order.pop_front() {
                self.rejected.remove(&oldest);
            }
        }
    }

    /// Whether cursors and associations for `session_key` concern this reader.
    fn is_reading(&self, config: &PacketReadingConfiguration, session_key: &str) -> bool {
        match config.reading_type {
            PacketReadingType::Historic => config.session_key.as_deref() == Some(session_key),
            PacketReadingType::Live => self.sessions.contains_key(session_key),
        }
    }

    /// Apply the reading filter and derive lifecycle events.
    ///
    /// Returns `None` when the packet is filtered out.
    fn observe(
        &mut self,
        config: &PacketReadingConfiguration,
        received: &ReceivedPacket,
    ) -> Option<Lifecycle> {
        if received.data_source != config.data_source || !config.includes_stream(&received.stream) {
            return None;
        }

        let session_key = received.session_key.as_str();
        if config.reading_type == PacketReadingType::Historic
            && config.session_key.as_deref() != Some(session_key)
        {
            return None;
        }
        if self.rejected.contains(session_key) {
            return None;
        }

        let packet = match received.packet() {
            Ok(packet) => Some(packet),
            Err(e) => {
                warn!("Undecodable envelope for session {}: {}", session_key, e);
                None
            }
        };
        let new_session = packet
            .as_ref()
            .filter(|p| p.packet_type == PacketType::NewSession)
            .and_then(|p| decode_content::<NewSessionPacket>(p, session_key));

        let mut lifecycle = Lifecycle::default();

        if !self.sessions.contains_key(session_key) {
            let mut session = SessionState::new(&received.data_source, session_key);
            if let Some(new_session) = &new_session {
                session.info = SessionInfo::from_new_session_packet(session_key, new_session);
            }

            if config.reading_type == PacketReadingType::Live
                && config.session_identifier_pattern != "*"
                && !(new_session.is_some() && config.matches_identifier(&session.info.identifier))
            {
                debug!(
                    "Session {} ('{}') does not match '{}'",
                    session_key, session.info.identifier, config.session_identifier_pattern
                );
                self.reject(session_key);
                return None;
            }

            lifecycle.before.push(ReaderEvent::SessionReadingStarted(session.info.clone()));
            self.sessions.insert(session_key.to_string(), session);
        }

        let session = self.sessions.get_mut(session_key)?;

        if session.started_streams.insert(received.stream.clone()) {
            lifecycle
                .before
                .push(ReaderEvent::StreamReadingStarted(session.stream_info(&received.stream)));
        }

        let Some(packet) = packet else {
            return Some(lifecycle);
        };

        match packet.packet_type {
            PacketType::SessionInfo => {
                if let Some(update) = decode_content::<SessionInfoPacket>(&packet, session_key) {
                    session.info.apply_info_packet(&update);
                    lifecycle.after.push(ReaderEvent::SessionInfoUpdated(session.info.clone()));
                }
            }
            PacketType::EndOfSession => {
                if session.completed_streams.insert(received.stream.clone()) {
                    lifecycle.after.push(ReaderEvent::StreamReadingCompleted(
                        session.stream_info(&received.stream),
                    ));
                }
                if !session.completed && session.started_streams.is_subset(&session.completed_streams) {
                    session.completed = true;
                    session.info.is_complete = true;
                    lifecycle.after.push(ReaderEvent::SessionReadingCompleted(session.info.clone()));
                    self.retire_completed(session_key);
                }
            }
            _ => {}
        }

        Some(lifecycle)
    }
}

fn decode_content<M: crate::protocol::OpenDataMessage>(packet: &Packet, session_key: &str) -> Option<M> {
    match packet.content_as::<M>() {
        Ok(message) => Some(message),
        Err(e) => {
            warn!("Bad {} content for session {}: {}", packet.packet_type, session_key, e);
            None
        }
    }
}
